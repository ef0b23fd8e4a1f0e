//! Deferred construction
//!
//! A handle is usable the moment an actor is requested, before its factory
//! has run. Calls made meanwhile are buffered in issuance order and replayed
//! into the real queue once the object exists.
//!
//! ```text
//! Pending ──complete──► Replaying ──buffer empty──► Ready
//!    │
//!    └────fail────────► Failed
//! ```
//!
//! Calls arriving during replay join the buffer behind the ones being
//! replayed, so order per caller is kept across the transition. `Ready` and
//! `Failed` are final.

use crate::actor::ActorId;
use crate::error::{ActorError, Result};
use crate::fault::CallSite;
use crate::handle::{bind_call, Call, Cell};
use crate::scheduler::{ActorScheduler, Invocation, QueueTarget};

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Method name recorded for construction invocations
pub const CONSTRUCT_METHOD: &str = "<construct>";

/// Construction state as seen from a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Pending,
    Ready,
    Failed,
}

struct Buffered<T> {
    site: CallSite,
    call: Call<T>,
}

enum DeferredState<T> {
    Pending(VecDeque<Buffered<T>>),
    Replaying {
        cell: Cell<T>,
        buffered: VecDeque<Buffered<T>>,
    },
    Ready(Cell<T>),
    Failed(String),
}

/// Actor whose backing object is still being constructed
pub struct DeferredActor<T> {
    target: QueueTarget,
    scheduler: ActorScheduler,
    state: Mutex<DeferredState<T>>,
    ready: Condvar,
}

impl<T: Send + 'static> DeferredActor<T> {
    pub(crate) fn new(target: QueueTarget, scheduler: ActorScheduler) -> Self {
        Self {
            target,
            scheduler,
            state: Mutex::new(DeferredState::Pending(VecDeque::new())),
            ready: Condvar::new(),
        }
    }

    pub fn id(&self) -> ActorId {
        self.target.id()
    }

    pub fn readiness(&self) -> Readiness {
        match &*self.state.lock() {
            DeferredState::Pending(_) | DeferredState::Replaying { .. } => Readiness::Pending,
            DeferredState::Ready(_) => Readiness::Ready,
            DeferredState::Failed(_) => Readiness::Failed,
        }
    }

    /// Calls waiting for construction to finish
    pub fn buffered(&self) -> usize {
        match &*self.state.lock() {
            DeferredState::Pending(buffered) => buffered.len(),
            DeferredState::Replaying { buffered, .. } => buffered.len(),
            _ => 0,
        }
    }

    /// Route one call: buffer while pending, queue once ready
    ///
    /// The state is read once. A call the pre-enqueue hook has seen is either
    /// buffered or queued, never rejected afterwards.
    pub(crate) fn route(&self, site: CallSite, call: Call<T>) -> Result<()> {
        let mut state = self.state.lock();
        match &mut *state {
            DeferredState::Pending(buffered) | DeferredState::Replaying { buffered, .. } => {
                self.scheduler.notify_before_enqueue(&site);
                buffered.push_back(Buffered { site, call });
                Ok(())
            }
            DeferredState::Ready(cell) => {
                let cell = cell.clone();
                drop(state);
                self.scheduler.notify_before_enqueue(&site);
                self.scheduler
                    .submit(&self.target, Invocation::new(site, bind_call(cell, call)));
                Ok(())
            }
            DeferredState::Failed(reason) => {
                let reason = reason.clone();
                drop(state);
                debug!(actor_id = %self.id(), method = site.method, "Rejecting call to failed actor");
                Err(ActorError::construction_failed(self.id(), reason))
            }
        }
    }

    /// Install the constructed object and replay buffered calls
    pub(crate) fn complete(&self, value: T) {
        let cell: Cell<T> = Arc::new(Mutex::new(value));

        let mut pending = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, DeferredState::Failed(String::new())) {
                DeferredState::Pending(buffered) => {
                    *state = DeferredState::Replaying {
                        cell: cell.clone(),
                        buffered: VecDeque::new(),
                    };
                    buffered
                }
                other => {
                    *state = other;
                    return;
                }
            }
        };

        let mut replayed = 0usize;
        loop {
            // Submitted outside the lock: an inline executor may run these
            // right here, and they may call back into this handle
            for Buffered { site, call } in pending.drain(..) {
                replayed += 1;
                self.scheduler
                    .submit(&self.target, Invocation::new(site, bind_call(cell.clone(), call)));
            }

            let mut state = self.state.lock();
            if let DeferredState::Replaying { buffered, .. } = &mut *state {
                if buffered.is_empty() {
                    *state = DeferredState::Ready(cell);
                    self.ready.notify_all();
                    break;
                }
                pending = std::mem::take(buffered);
            } else {
                break;
            }
        }

        debug!(actor_id = %self.id(), replayed, "Deferred actor ready");
    }

    /// Mark construction as failed
    ///
    /// Buffered calls are dropped. Each one is reported to `after_run` with a
    /// construction failure so hooks see every call they saw enqueued finish.
    pub(crate) fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let dropped = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, DeferredState::Failed(reason.clone())) {
                DeferredState::Pending(buffered) => buffered,
                other => {
                    // Ready or already failed: final states are never replaced
                    *state = other;
                    return;
                }
            }
        };
        self.ready.notify_all();

        warn!(
            actor_id = %self.id(),
            dropped = dropped.len(),
            "Actor construction failed, dropping buffered calls: {}",
            reason
        );
        for Buffered { site, .. } in dropped {
            self.scheduler
                .notify_dropped(&site, ActorError::construction_failed(self.id(), reason.clone()));
        }
    }

    /// Block until ready or until `timeout` elapses
    ///
    /// Re-checks every poll interval so a missed wake-up costs at most one
    /// interval. A failed construction never becomes ready; waiters see the
    /// timeout.
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let poll = self.scheduler.settings().deferred_poll_interval;
        // None: too far out to represent, wait without a deadline
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();

        loop {
            if matches!(*state, DeferredState::Ready(_)) {
                return Ok(());
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ActorError::construction_timeout(self.id(), timeout));
                    }
                    poll.min(deadline - now)
                }
                None => poll,
            };
            self.ready.wait_for(&mut state, slice);
        }
    }
}

impl<T> fmt::Debug for DeferredActor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredActor")
            .field("target", &self.target)
            .finish()
    }
}

/// Owns the right to finish a construction
///
/// Dropped without finishing (a panicking factory, or a construction call
/// that never got queued) marks the actor failed.
pub(crate) struct ConstructionGuard<T: Send + 'static> {
    deferred: Option<Arc<DeferredActor<T>>>,
}

impl<T: Send + 'static> ConstructionGuard<T> {
    pub(crate) fn new(deferred: Arc<DeferredActor<T>>) -> Self {
        Self {
            deferred: Some(deferred),
        }
    }

    pub(crate) fn finish(mut self, outcome: Result<T>) -> Result<()> {
        let Some(deferred) = self.deferred.take() else {
            return Ok(());
        };
        match outcome {
            Ok(value) => {
                deferred.complete(value);
                Ok(())
            }
            Err(err) => {
                deferred.fail(err.to_string());
                Err(err)
            }
        }
    }
}

impl<T: Send + 'static> Drop for ConstructionGuard<T> {
    fn drop(&mut self) {
        if let Some(deferred) = self.deferred.take() {
            deferred.fail("construction did not complete");
        }
    }
}
