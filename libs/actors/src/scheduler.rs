//! Actor Scheduler
//!
//! Owns the mapping from actor identity to pending invocations and guarantees
//! that at most one worker drains a given actor's queue at any instant.
//!
//! # Queue lifecycle
//!
//! ```text
//!  enqueue (absent) ──► create queue ──► submit one drain task
//!  enqueue (present) ─► append only
//!  drain: pop ──► run outside the lock ──► pop ... ──► empty: remove entry
//! ```
//!
//! A queue entry is present exactly while one drain task is scheduled or
//! running for that actor. The entry is removed under its shard lock at the
//! moment a pop finds it empty, so an enqueue either lands in the live queue
//! (and the running drain picks it up) or finds the entry absent and schedules
//! a fresh drain. Idle actors hold no queue memory.
//!
//! # Lock discipline
//!
//! Shard locks are held only to push or pop. They are never held while a job,
//! a fault hook or an executor runs, which keeps inline executors and
//! re-entrant sends free of deadlocks.

use crate::actor::ActorId;
use crate::error::{ActorError, Result};
use crate::executor::{Executor, Task};
use crate::fault::{log_fault, shield, CallSite, DiscardFaults, Fault, FaultAction, FaultPolicy};
use crate::marshal::ParameterMarshaler;

use crossbeam_channel::{Receiver, Sender};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use troupe_config::SchedulerConfig;

/// Queued work: runs once, never retried
pub type Job = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

/// One fully bound call awaiting execution
pub struct Invocation {
    site: CallSite,
    job: Job,
}

impl Invocation {
    pub fn new(site: CallSite, job: Job) -> Self {
        Self { site, job }
    }

    pub fn site(&self) -> &CallSite {
        &self.site
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation").field("site", &self.site).finish()
    }
}

/// Queue identity plus the optional external executor that drains it
#[derive(Clone)]
pub struct QueueTarget {
    id: ActorId,
    executor: Option<Arc<dyn Executor>>,
}

impl QueueTarget {
    pub fn new(id: ActorId) -> Self {
        Self { id, executor: None }
    }

    pub fn with_executor(id: ActorId, executor: Arc<dyn Executor>) -> Self {
        Self {
            id,
            executor: Some(executor),
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn executor(&self) -> Option<&Arc<dyn Executor>> {
        self.executor.as_ref()
    }
}

impl fmt::Debug for QueueTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueTarget")
            .field("id", &self.id)
            .field("executor", &self.executor.as_ref().map(|e| e.name().to_string()))
            .finish()
    }
}

/// Tunables the scheduler and its handles read at run time
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub drain_batch_limit: usize,
    pub deferred_poll_interval: Duration,
    pub deferred_wait_timeout: Duration,
    pub capture_search_depth: usize,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&SchedulerConfig::default())
    }
}

impl From<&SchedulerConfig> for SchedulerSettings {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            drain_batch_limit: config.drain_batch_limit.max(1),
            deferred_poll_interval: config.deferred_poll_interval(),
            deferred_wait_timeout: config.deferred_wait_timeout(),
            capture_search_depth: config.capture_search_depth,
        }
    }
}

/// Scheduler counters
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    pub invocations_enqueued: std::sync::atomic::AtomicU64,
    pub invocations_executed: std::sync::atomic::AtomicU64,
    pub invocations_faulted: std::sync::atomic::AtomicU64,
    pub queues_created: std::sync::atomic::AtomicU64,
    pub queues_retired: std::sync::atomic::AtomicU64,
    pub external_dispatches: std::sync::atomic::AtomicU64,
    pub detached_runs: std::sync::atomic::AtomicU64,
    pub total_execution_time_ns: std::sync::atomic::AtomicU64,
}

impl SchedulerMetrics {
    pub fn record_execution(&self, duration: Duration, faulted: bool) {
        use std::sync::atomic::Ordering;
        self.invocations_executed.fetch_add(1, Ordering::Relaxed);
        self.total_execution_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
        if faulted {
            self.invocations_faulted.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn avg_execution_time_ns(&self) -> f64 {
        use std::sync::atomic::Ordering;
        let count = self.invocations_executed.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        let total = self.total_execution_time_ns.load(Ordering::Relaxed);
        total as f64 / count as f64
    }

    fn bump(counter: &std::sync::atomic::AtomicU64) {
        counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    /// Point-in-time snapshot
    pub fn snapshot(&self, active_queues: usize) -> SchedulerStats {
        use std::sync::atomic::Ordering;
        SchedulerStats {
            invocations_enqueued: self.invocations_enqueued.load(Ordering::Relaxed),
            invocations_executed: self.invocations_executed.load(Ordering::Relaxed),
            invocations_faulted: self.invocations_faulted.load(Ordering::Relaxed),
            queues_created: self.queues_created.load(Ordering::Relaxed),
            queues_retired: self.queues_retired.load(Ordering::Relaxed),
            external_dispatches: self.external_dispatches.load(Ordering::Relaxed),
            detached_runs: self.detached_runs.load(Ordering::Relaxed),
            active_queues,
            avg_execution_time_ns: self.avg_execution_time_ns(),
        }
    }
}

/// Snapshot of [`SchedulerMetrics`]
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerStats {
    pub invocations_enqueued: u64,
    pub invocations_executed: u64,
    pub invocations_faulted: u64,
    pub queues_created: u64,
    pub queues_retired: u64,
    pub external_dispatches: u64,
    pub detached_runs: u64,
    pub active_queues: usize,
    pub avg_execution_time_ns: f64,
}

/// Pending invocations of one actor. Only touched under the map's shard
/// write lock; the mutex lends `Sync` to jobs that are only `Send`.
type ActorQueue = Mutex<VecDeque<Invocation>>;

struct Shared {
    queues: DashMap<ActorId, ActorQueue>,
    pool: Arc<dyn Executor>,
    policy: RwLock<Arc<dyn FaultPolicy>>,
    escalation_tx: Sender<Fault>,
    escalation_rx: Receiver<Fault>,
    metrics: SchedulerMetrics,
    settings: SchedulerSettings,
    marshaler: ParameterMarshaler,
}

/// Per-actor serialized dispatch over a shared executor
///
/// Cheap to clone; clones share the same queues, policy and metrics.
#[derive(Clone)]
pub struct ActorScheduler {
    shared: Arc<Shared>,
}

impl ActorScheduler {
    pub fn new(pool: Arc<dyn Executor>, settings: SchedulerSettings) -> Self {
        let (escalation_tx, escalation_rx) = crossbeam_channel::unbounded();
        let marshaler = ParameterMarshaler::new(settings.capture_search_depth);
        Self {
            shared: Arc::new(Shared {
                queues: DashMap::new(),
                pool,
                policy: RwLock::new(Arc::new(DiscardFaults)),
                escalation_tx,
                escalation_rx,
                metrics: SchedulerMetrics::default(),
                settings,
                marshaler,
            }),
        }
    }

    /// Queue an invocation for the target actor. Never blocks.
    ///
    /// Runs the policy's `before_enqueue` hook on the calling thread first.
    pub fn enqueue(&self, target: &QueueTarget, invocation: Invocation) {
        self.notify_before_enqueue(invocation.site());
        self.submit(target, invocation);
    }

    /// Queue without the pre-enqueue hook; used when the hook already ran at
    /// call time (replay of buffered calls)
    pub(crate) fn submit(&self, target: &QueueTarget, invocation: Invocation) {
        SchedulerMetrics::bump(&self.shared.metrics.invocations_enqueued);

        let created = match self.shared.queues.entry(target.id()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().get_mut().push_back(invocation);
                false
            }
            Entry::Vacant(entry) => {
                let mut queue = VecDeque::with_capacity(4);
                queue.push_back(invocation);
                entry.insert(Mutex::new(queue));
                true
            }
        };

        if created {
            SchedulerMetrics::bump(&self.shared.metrics.queues_created);
            trace!(actor_id = %target.id(), "Queue created, scheduling drain");
            self.dispatch_drain(target.clone());
        }
    }

    /// Run one invocation outside any actor queue, with full fault handling.
    /// Used for standalone construction.
    pub fn run_detached(&self, executor: Option<&Arc<dyn Executor>>, invocation: Invocation) {
        self.notify_before_enqueue(invocation.site());
        SchedulerMetrics::bump(&self.shared.metrics.detached_runs);

        let scheduler = self.clone();
        let task: Task = Box::new(move || scheduler.execute(invocation));
        match executor {
            Some(executor) => executor.execute(task),
            None => self.shared.pool.execute(task),
        }
    }

    pub(crate) fn notify_before_enqueue(&self, site: &CallSite) {
        let policy = self.policy();
        shield("before_enqueue", || policy.before_enqueue(site));
    }

    /// Close out a call that passed `before_enqueue` but will never run
    pub(crate) fn notify_dropped(&self, site: &CallSite, error: ActorError) {
        let policy = self.policy();
        let fault = Fault::error(site.clone(), error);
        shield("after_run", || policy.after_run(site, Some(&fault)));
    }

    fn dispatch_drain(&self, target: QueueTarget) {
        let scheduler = self.clone();
        match target.executor().cloned() {
            Some(executor) => {
                SchedulerMetrics::bump(&self.shared.metrics.external_dispatches);
                executor.execute(Box::new(move || scheduler.drain(target)));
            }
            None => {
                self.shared
                    .pool
                    .execute(Box::new(move || scheduler.drain(target)));
            }
        }
    }

    fn drain(&self, target: QueueTarget) {
        let limit = self.shared.settings.drain_batch_limit;
        let mut executed = 0;

        loop {
            let next = match self.shared.queues.entry(target.id()) {
                Entry::Occupied(mut entry) => match entry.get_mut().get_mut().pop_front() {
                    Some(invocation) => invocation,
                    None => {
                        entry.remove();
                        SchedulerMetrics::bump(&self.shared.metrics.queues_retired);
                        trace!(actor_id = %target.id(), executed, "Queue drained and retired");
                        return;
                    }
                },
                // Only the drain task removes entries, so this cannot happen
                Entry::Vacant(_) => return,
            };

            self.execute(next);
            executed += 1;

            if executed >= limit {
                // Hand the worker back; the entry stays, so no second drain starts
                trace!(actor_id = %target.id(), executed, "Drain batch limit reached");
                self.dispatch_drain(target);
                return;
            }
        }
    }

    fn execute(&self, invocation: Invocation) {
        let Invocation { site, job } = invocation;
        let policy = self.policy();

        shield("before_run", || policy.before_run(&site));
        trace!(actor_id = %site.actor, method = site.method, "Executing invocation");

        let started = Instant::now();
        let fault = match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(Fault::error(site.clone(), err)),
            Err(payload) => Some(Fault::panic(site.clone(), payload)),
        };
        self.shared
            .metrics
            .record_execution(started.elapsed(), fault.is_some());

        if let Some(fault) = &fault {
            self.handle_fault(policy.as_ref(), fault);
        }

        shield("after_run", || policy.after_run(&site, fault.as_ref()));
    }

    fn handle_fault(&self, policy: &dyn FaultPolicy, fault: &Fault) {
        let action = shield("on_fault", || policy.on_fault(fault)).unwrap_or(FaultAction::Log);
        match action {
            FaultAction::Discard => {
                trace!(actor_id = %fault.site.actor, method = fault.site.method, "Fault discarded");
            }
            FaultAction::Log => log_fault(fault),
            FaultAction::Escalate => {
                log_fault(fault);
                // The receiver lives in `shared`, so the channel is never closed
                let _ = self.shared.escalation_tx.send(fault.clone());
            }
        }
    }

    /// Replace the installed fault policy
    pub fn set_policy(&self, policy: Arc<dyn FaultPolicy>) {
        *self.shared.policy.write() = policy;
        debug!("Fault policy replaced");
    }

    pub fn policy(&self) -> Arc<dyn FaultPolicy> {
        self.shared.policy.read().clone()
    }

    /// Faults whose policy chose [`FaultAction::Escalate`]
    pub fn escalations(&self) -> Receiver<Fault> {
        self.shared.escalation_rx.clone()
    }

    /// True while the actor has a scheduled or running drain
    pub fn has_queue(&self, id: ActorId) -> bool {
        self.shared.queues.contains_key(&id)
    }

    /// Invocations waiting behind the one currently running
    pub fn queue_len(&self, id: ActorId) -> usize {
        self.shared
            .queues
            .get(&id)
            .map(|queue| queue.lock().len())
            .unwrap_or(0)
    }

    pub fn active_queues(&self) -> usize {
        self.shared.queues.len()
    }

    pub fn metrics(&self) -> &SchedulerMetrics {
        &self.shared.metrics
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.metrics.snapshot(self.active_queues())
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.shared.settings
    }

    pub fn marshaler(&self) -> &ParameterMarshaler {
        &self.shared.marshaler
    }

    pub(crate) fn pool(&self) -> &Arc<dyn Executor> {
        &self.shared.pool
    }
}

impl fmt::Debug for ActorScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorScheduler")
            .field("pool", &self.shared.pool.name())
            .field("active_queues", &self.active_queues())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActorError;
    use crate::executor::InlineExecutor;

    /// Holds tasks until the test runs them
    #[derive(Default)]
    struct ManualExecutor {
        tasks: Mutex<VecDeque<Task>>,
    }

    impl ManualExecutor {
        fn pending(&self) -> usize {
            self.tasks.lock().len()
        }

        fn run_next(&self) -> bool {
            let task = self.tasks.lock().pop_front();
            match task {
                Some(task) => {
                    task();
                    true
                }
                None => false,
            }
        }

        fn run_all(&self) {
            while self.run_next() {}
        }
    }

    impl Executor for ManualExecutor {
        fn execute(&self, task: Task) {
            self.tasks.lock().push_back(task);
        }
    }

    fn site(id: ActorId) -> CallSite {
        CallSite::new(id, "Probe", "record")
    }

    fn record(log: &Arc<Mutex<Vec<u32>>>, value: u32) -> Job {
        let log = log.clone();
        Box::new(move || {
            log.lock().push(value);
            Ok(())
        })
    }

    #[test]
    fn test_single_drain_per_queue() {
        let pool = Arc::new(ManualExecutor::default());
        let scheduler = ActorScheduler::new(pool.clone(), SchedulerSettings::default());
        let target = QueueTarget::new(ActorId::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            scheduler.enqueue(&target, Invocation::new(site(target.id()), record(&log, i)));
        }

        assert_eq!(pool.pending(), 1);
        assert!(scheduler.has_queue(target.id()));
        assert_eq!(scheduler.queue_len(target.id()), 3);

        pool.run_all();

        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert!(!scheduler.has_queue(target.id()));
        assert_eq!(scheduler.active_queues(), 0);

        let stats = scheduler.stats();
        assert_eq!(stats.queues_created, 1);
        assert_eq!(stats.queues_retired, 1);
        assert_eq!(stats.invocations_executed, 3);
    }

    #[test]
    fn test_enqueue_during_drain_joins_live_queue() {
        let pool = Arc::new(ManualExecutor::default());
        let scheduler = ActorScheduler::new(pool.clone(), SchedulerSettings::default());
        let target = QueueTarget::new(ActorId::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner = scheduler.clone();
        let inner_target = target.clone();
        let inner_log = log.clone();
        scheduler.enqueue(
            &target,
            Invocation::new(
                site(target.id()),
                Box::new(move || {
                    inner_log.lock().push(1);
                    inner.enqueue(
                        &inner_target,
                        Invocation::new(site(inner_target.id()), record(&inner_log, 2)),
                    );
                    Ok(())
                }),
            ),
        );

        assert!(pool.run_next());
        // The follow-up joined the running drain instead of scheduling another
        assert_eq!(pool.pending(), 0);
        assert_eq!(*log.lock(), vec![1, 2]);
        assert!(!scheduler.has_queue(target.id()));
    }

    #[test]
    fn test_queue_recreated_after_retire() {
        let scheduler = ActorScheduler::new(Arc::new(InlineExecutor), SchedulerSettings::default());
        let target = QueueTarget::new(ActorId::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        scheduler.enqueue(&target, Invocation::new(site(target.id()), record(&log, 1)));
        assert!(!scheduler.has_queue(target.id()));
        scheduler.enqueue(&target, Invocation::new(site(target.id()), record(&log, 2)));
        assert!(!scheduler.has_queue(target.id()));

        assert_eq!(*log.lock(), vec![1, 2]);
        assert_eq!(scheduler.stats().queues_created, 2);
    }

    #[test]
    fn test_batch_limit_yields_worker() {
        let pool = Arc::new(ManualExecutor::default());
        let settings = SchedulerSettings {
            drain_batch_limit: 2,
            ..SchedulerSettings::default()
        };
        let scheduler = ActorScheduler::new(pool.clone(), settings);
        let target = QueueTarget::new(ActorId::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5 {
            scheduler.enqueue(&target, Invocation::new(site(target.id()), record(&log, i)));
        }

        assert!(pool.run_next());
        assert_eq!(*log.lock(), vec![0, 1]);
        assert_eq!(pool.pending(), 1);
        assert!(scheduler.has_queue(target.id()));

        pool.run_all();
        assert_eq!(*log.lock(), vec![0, 1, 2, 3, 4]);
        assert!(!scheduler.has_queue(target.id()));
    }

    #[test]
    fn test_external_executor_receives_drains() {
        let pool = Arc::new(ManualExecutor::default());
        let external = Arc::new(ManualExecutor::default());
        let scheduler = ActorScheduler::new(pool.clone(), SchedulerSettings::default());
        let target = QueueTarget::with_executor(ActorId::new(), external.clone());
        let log = Arc::new(Mutex::new(Vec::new()));

        scheduler.enqueue(&target, Invocation::new(site(target.id()), record(&log, 9)));

        assert_eq!(pool.pending(), 0);
        assert_eq!(external.pending(), 1);
        external.run_all();
        assert_eq!(*log.lock(), vec![9]);
        assert_eq!(scheduler.stats().external_dispatches, 1);
    }

    #[test]
    fn test_faults_do_not_stop_drain() {
        let inline = ActorScheduler::new(Arc::new(InlineExecutor), SchedulerSettings::default());
        inline.set_policy(Arc::new(crate::fault::EscalateFaults));
        let target = QueueTarget::new(ActorId::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let escalations = inline.escalations();

        inline.enqueue(
            &target,
            Invocation::new(site(target.id()), Box::new(|| -> Result<()> { panic!("first call blew up") })),
        );
        inline.enqueue(
            &target,
            Invocation::new(
                site(target.id()),
                Box::new(|| -> Result<()> { Err(ActorError::invocation("record", "rejected")) }),
            ),
        );
        inline.enqueue(&target, Invocation::new(site(target.id()), record(&log, 3)));

        assert_eq!(*log.lock(), vec![3]);
        let first = escalations.try_recv().unwrap();
        assert!(first.is_panic());
        assert_eq!(first.message(), "first call blew up");
        let second = escalations.try_recv().unwrap();
        assert!(!second.is_panic());
        assert_eq!(inline.stats().invocations_faulted, 2);
        assert!(escalations.try_recv().is_err());
    }

    #[test]
    fn test_panicking_policy_is_contained() {
        struct Grumpy;
        impl FaultPolicy for Grumpy {
            fn before_enqueue(&self, _site: &CallSite) {
                panic!("before_enqueue");
            }
            fn before_run(&self, _site: &CallSite) {
                panic!("before_run");
            }
            fn on_fault(&self, _fault: &Fault) -> FaultAction {
                panic!("on_fault");
            }
        }

        let scheduler = ActorScheduler::new(Arc::new(InlineExecutor), SchedulerSettings::default());
        scheduler.set_policy(Arc::new(Grumpy));
        let target = QueueTarget::new(ActorId::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        scheduler.enqueue(&target, Invocation::new(site(target.id()), Box::new(|| -> Result<()> { panic!("job") })));
        scheduler.enqueue(&target, Invocation::new(site(target.id()), record(&log, 1)));

        assert_eq!(*log.lock(), vec![1]);
        assert!(!scheduler.has_queue(target.id()));
    }
}
