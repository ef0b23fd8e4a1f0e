//! Periodic timer firing a marshaled callback

use crate::error::{ActorError, Result};
use crate::marshal::Callback;
use crate::system::ActorSystem;

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::debug;

/// Fires `elapsed` every `period` until stopped or dropped
///
/// The callback is marshaled once at start: a callback capturing an actor
/// fires on that actor's queue, never on the timer task.
#[derive(Debug)]
pub struct Timer {
    period: Duration,
    task: Option<JoinHandle<()>>,
}

impl Timer {
    /// Start ticking on the system's runtime
    ///
    /// With `auto_reset` false the timer fires once.
    pub fn start(
        system: &ActorSystem,
        period: Duration,
        auto_reset: bool,
        elapsed: Callback<()>,
    ) -> Result<Self> {
        if period.is_zero() {
            return Err(ActorError::configuration("timer period must be positive", Some("period")));
        }
        let runtime = system
            .runtime_handle()
            .ok_or_else(|| ActorError::runtime("timer requires a Tokio runtime"))?;
        let elapsed = system.scheduler().marshaler().marshal_callback(elapsed)?;

        debug!(period_ms = period.as_millis() as u64, auto_reset, "Starting timer");
        let task = runtime.spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                elapsed.call(());
                if !auto_reset {
                    break;
                }
            }
        });

        Ok(Self {
            period,
            task: Some(task),
        })
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop firing; a tick already handed to an actor queue still runs
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}
