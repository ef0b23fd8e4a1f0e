//! Actor handles
//!
//! An [`ActorHandle`] is the only way to reach a wrapped object. Every call is
//! turned into an [`Invocation`] on the actor's queue; the object itself is
//! locked only while one of those invocations runs, which the queue already
//! serializes.

use crate::actor::{short_type_name, ActorId};
use crate::bridge::{ActorContext, ActorTask};
use crate::deferred::{ConstructionGuard, DeferredActor, Readiness, CONSTRUCT_METHOD};
use crate::error::Result;
use crate::fault::CallSite;
use crate::future::{completion, ActorFuture};
use crate::marshal::{ActorLink, Callback, Captures};
use crate::scheduler::{ActorScheduler, Invocation, Job, QueueTarget};

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Shared storage of a constructed actor object
pub(crate) type Cell<T> = Arc<Mutex<T>>;

/// A call waiting for the actor's cell
pub(crate) type Call<T> = Box<dyn FnOnce(&Cell<T>) -> Result<()> + Send + 'static>;

pub(crate) fn bind_call<T: Send + 'static>(cell: Cell<T>, call: Call<T>) -> Job {
    Box::new(move || call(&cell))
}

fn with_state<T, F>(f: F) -> Call<T>
where
    T: Send + 'static,
    F: FnOnce(&mut T) -> Result<()> + Send + 'static,
{
    Box::new(move |cell: &Cell<T>| {
        let mut state = cell.lock();
        f(&mut state)
    })
}

enum Slot<T> {
    Live(Cell<T>),
    Deferred(Arc<DeferredActor<T>>),
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        match self {
            Slot::Live(cell) => Slot::Live(cell.clone()),
            Slot::Deferred(deferred) => Slot::Deferred(deferred.clone()),
        }
    }
}

/// Dispatch handle to one actor
///
/// Clones address the same actor. Calls from one thread run in the order
/// they were made; at most one call runs at a time.
pub struct ActorHandle<T> {
    target: QueueTarget,
    actor_type: &'static str,
    scheduler: ActorScheduler,
    slot: Slot<T>,
}

impl<T> Clone for ActorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            actor_type: self.actor_type,
            scheduler: self.scheduler.clone(),
            slot: self.slot.clone(),
        }
    }
}

impl<T: Send + 'static> ActorHandle<T> {
    pub(crate) fn live(target: QueueTarget, scheduler: ActorScheduler, value: T) -> Self {
        Self {
            target,
            actor_type: short_type_name::<T>(),
            scheduler,
            slot: Slot::Live(Arc::new(Mutex::new(value))),
        }
    }

    pub(crate) fn deferred(
        target: QueueTarget,
        scheduler: ActorScheduler,
        deferred: Arc<DeferredActor<T>>,
    ) -> Self {
        Self {
            target,
            actor_type: short_type_name::<T>(),
            scheduler,
            slot: Slot::Deferred(deferred),
        }
    }

    pub fn id(&self) -> ActorId {
        self.target.id()
    }

    pub fn actor_type(&self) -> &'static str {
        self.actor_type
    }

    pub fn readiness(&self) -> Readiness {
        match &self.slot {
            Slot::Live(_) => Readiness::Ready,
            Slot::Deferred(deferred) => deferred.readiness(),
        }
    }

    /// Block until the backing object exists
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        match &self.slot {
            Slot::Live(_) => Ok(()),
            Slot::Deferred(deferred) => deferred.wait_ready(timeout),
        }
    }

    /// [`wait_ready`](Self::wait_ready) with the configured construction timeout
    pub fn ensure_ready(&self) -> Result<()> {
        self.wait_ready(self.scheduler.settings().deferred_wait_timeout)
    }

    /// Fire-and-forget call
    pub fn send<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut T) + Send + 'static,
    {
        self.route(
            "send",
            with_state(move |state: &mut T| {
                f(state);
                Ok(())
            }),
        )
    }

    /// Value-returning call; the value arrives through the future
    pub fn ask<R, F>(&self, f: F) -> Result<ActorFuture<R>>
    where
        R: Send + 'static,
        F: FnOnce(&mut T) -> R + Send + 'static,
    {
        let (sink, reply) = completion();
        self.route(
            "ask",
            with_state(move |state: &mut T| {
                sink.complete(f(state));
                Ok(())
            }),
        )?;
        Ok(reply)
    }

    /// Run an async method body on this actor's queue
    ///
    /// The body is created inside the first poll. Each time it is woken, the
    /// next poll is queued behind this actor's other calls, so code after an
    /// `.await` is mutually exclusive with them. Reach the state through
    /// [`ActorContext::with`]; borrows cannot be held across an `.await`.
    pub fn call_async<R, F, Fut>(&self, f: F) -> Result<ActorFuture<R>>
    where
        R: Send + 'static,
        F: FnOnce(ActorContext<T>) -> Fut + Send + 'static,
        Fut: Future<Output = R> + Send + 'static,
    {
        let (sink, reply) = completion();
        let handle = self.clone();
        self.route(
            "call_async",
            Box::new(move |cell: &Cell<T>| {
                let ctx = ActorContext::new(cell.clone(), handle.clone());
                let body = async move {
                    let value = f(ctx).await;
                    sink.complete(value);
                };
                ActorTask::start(handle.target.clone(), handle.scheduler.clone(), handle.actor_type, body);
                Ok(())
            }),
        )?;
        Ok(reply)
    }

    /// A callback that runs `method` on this actor's queue
    pub fn bind<A, M>(&self, method: M) -> Callback<A>
    where
        A: Send + 'static,
        M: Fn(&mut T, A) + Send + Sync + 'static,
    {
        let method = Arc::new(method);
        let handle = self.clone();
        let f = move |arg: A| {
            let method = method.clone();
            if let Err(err) = handle.send(move |state| method(state, arg)) {
                tracing::warn!(actor_id = %handle.id(), "Dropping bound call: {}", err);
            }
        };
        Callback::homed(Arc::new(f), Captures::new().actor(self), self.id())
    }

    /// Create a component object owned by this actor
    ///
    /// The creator runs on this actor's queue with access to its state. The
    /// returned handle is usable at once and shares this actor's queue, so
    /// component calls never overlap owner calls.
    pub fn wrap_component<C, F>(&self, creator: F) -> Result<ActorHandle<C>>
    where
        C: Send + 'static,
        F: FnOnce(&mut T) -> C + Send + 'static,
    {
        self.wrap_component_with(CONSTRUCT_METHOD, move |state: &mut T| Ok(creator(state)))
    }

    pub(crate) fn wrap_component_with<C, F>(
        &self,
        method: &'static str,
        creator: F,
    ) -> Result<ActorHandle<C>>
    where
        C: Send + 'static,
        F: FnOnce(&mut T) -> Result<C> + Send + 'static,
    {
        let deferred = Arc::new(DeferredActor::new(self.target.clone(), self.scheduler.clone()));
        let component = ActorHandle::deferred(self.target.clone(), self.scheduler.clone(), deferred.clone());
        let guard = ConstructionGuard::new(deferred);

        self.route(
            method,
            Box::new(move |cell: &Cell<T>| {
                let created = {
                    let mut owner = cell.lock();
                    creator(&mut owner)
                };
                guard.finish(created)
            }),
        )?;

        Ok(component)
    }

    /// Run `f` on the queue with the state locked; errors go to the fault policy
    pub(crate) fn invoke_with<F>(&self, method: &'static str, f: F) -> Result<()>
    where
        F: FnOnce(&mut T) -> Result<()> + Send + 'static,
    {
        self.route(method, with_state(f))
    }

    pub(crate) fn route(&self, method: &'static str, call: Call<T>) -> Result<()> {
        let site = CallSite::new(self.target.id(), self.actor_type, method);
        match &self.slot {
            Slot::Live(cell) => {
                self.scheduler
                    .enqueue(&self.target, Invocation::new(site, bind_call(cell.clone(), call)));
                Ok(())
            }
            Slot::Deferred(deferred) => deferred.route(site, call),
        }
    }

    pub fn queue_target(&self) -> &QueueTarget {
        &self.target
    }

    pub fn scheduler(&self) -> &ActorScheduler {
        &self.scheduler
    }
}

impl<T: Send + 'static> ActorLink for ActorHandle<T> {
    fn actor_id(&self) -> ActorId {
        self.target.id()
    }

    fn queue_target(&self) -> QueueTarget {
        self.target.clone()
    }

    fn scheduler(&self) -> &ActorScheduler {
        &self.scheduler
    }

    fn dispatch(&self, method: &'static str, job: Job) -> Result<()> {
        self.route(method, Box::new(move |_: &Cell<T>| job()))
    }
}

impl<T> PartialEq for ActorHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.target.id() == other.target.id()
    }
}

impl<T> Eq for ActorHandle<T> {}

impl<T> fmt::Debug for ActorHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorHandle")
            .field("id", &self.target.id())
            .field("actor_type", &self.actor_type)
            .field("deferred", &matches!(self.slot, Slot::Deferred(_)))
            .finish()
    }
}
