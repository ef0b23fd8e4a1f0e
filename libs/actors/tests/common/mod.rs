//! Shared fixtures for integration tests

#![allow(dead_code)]

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use troupe::{ActorSystem, CallSite, Fault, FaultAction, FaultPolicy, SchedulerConfig};

/// Fault policy that tracks outstanding invocations and records faults
///
/// An invocation is outstanding from `before_enqueue` until `after_run`.
#[derive(Default)]
pub struct QuiescenceProbe {
    outstanding: Mutex<i64>,
    idle: Condvar,
    faults: Mutex<Vec<Fault>>,
}

impl QuiescenceProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Block until nothing is queued or running
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut outstanding = self.outstanding.lock();
        while *outstanding > 0 {
            if self.idle.wait_until(&mut outstanding, deadline).timed_out() {
                return *outstanding == 0;
            }
        }
        true
    }

    pub fn faults(&self) -> Vec<Fault> {
        self.faults.lock().clone()
    }

    pub fn outstanding(&self) -> i64 {
        *self.outstanding.lock()
    }
}

impl FaultPolicy for QuiescenceProbe {
    fn before_enqueue(&self, _site: &CallSite) {
        *self.outstanding.lock() += 1;
    }

    fn after_run(&self, _site: &CallSite, _fault: Option<&Fault>) {
        let mut outstanding = self.outstanding.lock();
        *outstanding -= 1;
        if *outstanding <= 0 {
            self.idle.notify_all();
        }
    }

    fn on_fault(&self, fault: &Fault) -> FaultAction {
        self.faults.lock().push(fault.clone());
        FaultAction::Discard
    }
}

/// System on its own runtime with a probe installed
pub fn probed_system() -> (ActorSystem, Arc<QuiescenceProbe>) {
    init_test_tracing();
    let system = ActorSystem::new().expect("actor system");
    let probe = QuiescenceProbe::new();
    system.set_fault_policy(probe.clone());
    (system, probe)
}

/// Scheduler settings with a short deferred poll interval
pub fn fast_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        deferred_poll_interval_ms: 5,
        ..SchedulerConfig::default()
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
