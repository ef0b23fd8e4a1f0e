//! Async bridge
//!
//! Lets an actor method suspend on `.await` without leaving its actor. The
//! method body becomes an [`ActorTask`]; its waker queues the next poll onto
//! the same actor queue instead of resuming on whatever thread completed the
//! awaited value. Code after an `.await` is therefore just another invocation
//! on that queue.

use crate::actor::ActorId;
use crate::fault::CallSite;
use crate::handle::{ActorHandle, Cell};
use crate::scheduler::{ActorScheduler, Invocation, QueueTarget};

use futures::future::BoxFuture;
use futures::task::{waker_ref, ArcWake};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::trace;

/// Method name recorded for resumed polls
pub const RESUME_METHOD: &str = "<resume>";

/// State access for an async method body
pub struct ActorContext<T> {
    cell: Cell<T>,
    handle: ActorHandle<T>,
}

impl<T: Send + 'static> ActorContext<T> {
    pub(crate) fn new(cell: Cell<T>, handle: ActorHandle<T>) -> Self {
        Self { cell, handle }
    }

    /// Borrow the actor's state for the duration of `f`
    ///
    /// Only meaningful inside the body's own polls, which the actor queue
    /// serializes with every other call.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut state = self.cell.lock();
        f(&mut state)
    }

    /// Handle to the actor running this body
    pub fn handle(&self) -> &ActorHandle<T> {
        &self.handle
    }

    pub fn id(&self) -> ActorId {
        self.handle.id()
    }
}

impl<T> Clone for ActorContext<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            handle: self.handle.clone(),
        }
    }
}

/// A suspended actor method body
pub(crate) struct ActorTask {
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    scheduled: AtomicBool,
    target: QueueTarget,
    scheduler: ActorScheduler,
    site: CallSite,
}

impl ActorTask {
    /// Create the task and run its first poll; the caller is already on the
    /// actor's queue
    pub(crate) fn start<F>(
        target: QueueTarget,
        scheduler: ActorScheduler,
        actor_type: &'static str,
        body: F,
    ) where
        F: Future<Output = ()> + Send + 'static,
    {
        let site = CallSite::new(target.id(), actor_type, RESUME_METHOD);
        let task = Arc::new(ActorTask {
            future: Mutex::new(Some(Box::pin(body))),
            scheduled: AtomicBool::new(false),
            target,
            scheduler,
            site,
        });
        task.poll();
    }

    fn poll(self: &Arc<Self>) {
        self.scheduled.store(false, Ordering::Release);

        // Taken out so a wake during the poll never contends on the slot
        let Some(mut future) = self.future.lock().take() else {
            return;
        };

        let waker = waker_ref(self);
        let mut cx = Context::from_waker(&waker);
        match future.as_mut().poll(&mut cx) {
            Poll::Ready(()) => {
                trace!(actor_id = %self.target.id(), "Async body finished");
            }
            Poll::Pending => {
                *self.future.lock() = Some(future);
            }
        }
    }
}

impl ArcWake for ActorTask {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        if arc_self.scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let task = arc_self.clone();
        arc_self.scheduler.enqueue(
            &arc_self.target,
            Invocation::new(
                arc_self.site.clone(),
                Box::new(move || {
                    task.poll();
                    Ok(())
                }),
            ),
        );
    }
}
