//! Dispatch targets behind interface adapters
//!
//! A [`Dispatch`] either queues calls onto an actor or, for an [`Audience`],
//! runs them inline on the calling thread. Arguments are marshaled the same
//! way in both cases, so an actor can hand an audience callbacks that find
//! their way back to the actor's queue.

use crate::actor::{short_type_name, ActorId};
use crate::deferred::Readiness;
use crate::descriptor::InvocationDescriptor;
use crate::error::{ActorError, Result};
use crate::future::{completion, ActorFuture};
use crate::handle::ActorHandle;
use crate::marshal::{Args, ParameterMarshaler};

use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

type Deferred<T> = Box<dyn FnOnce(&mut T) -> Result<()> + Send + 'static>;

struct Stage<T> {
    object: RefCell<T>,
    /// Calls made from inside a running call, in arrival order
    backlog: RefCell<VecDeque<(&'static str, Deferred<T>)>>,
}

/// A non-actor object that actors may call into directly
///
/// Calls run on the caller's thread and are never queued. Callers on other
/// threads wait their turn. A call that re-enters the audience from inside
/// one of its own methods (say, a listener posting back) runs on the same
/// thread as soon as the outer method returns.
pub struct Audience<T> {
    id: ActorId,
    stage: Arc<ReentrantMutex<Stage<T>>>,
    marshaler: ParameterMarshaler,
}

impl<T> Clone for Audience<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            stage: self.stage.clone(),
            marshaler: self.marshaler.clone(),
        }
    }
}

impl<T: Send + 'static> Audience<T> {
    pub(crate) fn new(value: T, marshaler: ParameterMarshaler) -> Self {
        Self {
            id: ActorId::new(),
            stage: Arc::new(ReentrantMutex::new(Stage {
                object: RefCell::new(value),
                backlog: RefCell::new(VecDeque::new()),
            })),
            marshaler,
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    /// Run `f` inline against the object
    ///
    /// Fails with [`ActorError::Protocol`] when called from inside a method
    /// already running on this audience, since the object is in use.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let stage = self.stage.lock();
        let Ok(mut object) = stage.object.try_borrow_mut() else {
            return Err(ActorError::protocol(
                short_type_name::<T>(),
                format!("audience {} re-entered for a synchronous result", self.id),
            ));
        };
        let result = f(&mut *object);
        self.run_backlog(&stage, &mut *object);
        Ok(result)
    }

    /// Run a call now, or after the running call when re-entered
    ///
    /// A call that had to wait reports its error to the log; the caller has
    /// already returned by then.
    pub(crate) fn perform<F>(&self, method: &'static str, f: F) -> Result<()>
    where
        F: FnOnce(&mut T) -> Result<()> + Send + 'static,
    {
        let stage = self.stage.lock();
        let Ok(mut object) = stage.object.try_borrow_mut() else {
            stage.backlog.borrow_mut().push_back((method, Box::new(f)));
            return Ok(());
        };
        let result = f(&mut *object);
        self.run_backlog(&stage, &mut *object);
        result
    }

    fn run_backlog(&self, stage: &Stage<T>, object: &mut T) {
        loop {
            let Some((method, call)) = stage.backlog.borrow_mut().pop_front() else {
                break;
            };
            if let Err(err) = call(object) {
                warn!(audience_id = %self.id, method, error = %err, "Re-entrant audience call failed");
            }
        }
    }

    pub fn marshaler(&self) -> &ParameterMarshaler {
        &self.marshaler
    }
}

impl<T> fmt::Debug for Audience<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Audience")
            .field("id", &self.id)
            .field("type", &short_type_name::<T>())
            .finish()
    }
}

/// Forwarding target of an interface adapter
pub enum Dispatch<T> {
    Actor(ActorHandle<T>),
    Audience(Audience<T>),
}

impl<T> Clone for Dispatch<T> {
    fn clone(&self) -> Self {
        match self {
            Dispatch::Actor(handle) => Dispatch::Actor(handle.clone()),
            Dispatch::Audience(audience) => Dispatch::Audience(audience.clone()),
        }
    }
}

impl<T: Send + 'static> Dispatch<T> {
    pub fn id(&self) -> ActorId {
        match self {
            Dispatch::Actor(handle) => handle.id(),
            Dispatch::Audience(audience) => audience.id(),
        }
    }

    pub fn readiness(&self) -> Readiness {
        match self {
            Dispatch::Actor(handle) => handle.readiness(),
            Dispatch::Audience(_) => Readiness::Ready,
        }
    }

    /// The actor handle, when this dispatches to an actor
    pub fn handle(&self) -> Option<&ActorHandle<T>> {
        match self {
            Dispatch::Actor(handle) => Some(handle),
            Dispatch::Audience(_) => None,
        }
    }

    fn marshal(&self, args: Args) -> Result<Args> {
        match self {
            Dispatch::Actor(handle) => handle.scheduler().marshaler().marshal(args),
            Dispatch::Audience(audience) => audience.marshaler.marshal(args),
        }
    }

    /// Fire-and-forget method
    ///
    /// For actors, errors returned by the method body go to the fault policy;
    /// only marshaling and construction errors reach the caller. For audiences
    /// the body's result is returned directly.
    pub fn invoke(&self, descriptor: &InvocationDescriptor<T>, args: Args) -> Result<()> {
        let name = descriptor.name();
        let call = descriptor.function();
        let args = self.marshal(args.for_method(name))?;
        match self {
            Dispatch::Actor(handle) => handle.invoke_with(name, move |target: &mut T| call(target, args)),
            Dispatch::Audience(audience) => audience.perform(name, move |target: &mut T| call(target, args)),
        }
    }

    /// Value-returning method; the value arrives through the future
    ///
    /// If the method body returns an error the future is abandoned: `wait`
    /// reports [`ActorError::Abandoned`] and an `.await` never resolves. The
    /// error itself goes to the fault policy, or for audiences to the caller.
    pub fn invoke_returning<R: Send + 'static>(
        &self,
        descriptor: &InvocationDescriptor<T, R>,
        args: Args,
    ) -> Result<ActorFuture<R>> {
        let name = descriptor.name();
        let call = descriptor.function();
        let args = self.marshal(args.for_method(name))?;
        match self {
            Dispatch::Actor(handle) => {
                let (sink, reply) = completion();
                handle.invoke_with(name, move |target: &mut T| {
                    sink.complete(call(target, args)?);
                    Ok(())
                })?;
                Ok(reply)
            }
            Dispatch::Audience(audience) => {
                let (sink, reply) = completion();
                audience.perform(name, move |target: &mut T| {
                    sink.complete(call(target, args)?);
                    Ok(())
                })?;
                Ok(reply)
            }
        }
    }

    /// Method producing a component owned by the target actor
    ///
    /// The component is built on the owner's queue; its handle is usable
    /// immediately and buffers calls until construction finishes.
    pub fn invoke_component<C: Send + 'static>(
        &self,
        descriptor: &InvocationDescriptor<T, C>,
        args: Args,
    ) -> Result<ActorHandle<C>> {
        let name = descriptor.name();
        let call = descriptor.function();
        let args = self.marshal(args.for_method(name))?;
        match self {
            Dispatch::Actor(handle) => handle.wrap_component_with(name, move |target: &mut T| call(target, args)),
            Dispatch::Audience(audience) => Err(ActorError::protocol(
                short_type_name::<T>(),
                format!(
                    "audience {} cannot own components (method '{}')",
                    audience.id(),
                    name
                ),
            )),
        }
    }

    /// Synchronous value method; audiences only
    pub fn invoke_value<R>(&self, descriptor: &InvocationDescriptor<T, R>, args: Args) -> Result<R> {
        let name = descriptor.name();
        let call = descriptor.function();
        let args = self.marshal(args.for_method(name))?;
        match self {
            Dispatch::Audience(audience) => audience.with(|target| call(target, args))?,
            Dispatch::Actor(handle) => Err(ActorError::protocol(
                handle.actor_type(),
                format!("method '{}' would block the caller on an actor", name),
            )),
        }
    }
}

impl<T> fmt::Debug for Dispatch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dispatch::Actor(handle) => f.debug_tuple("Dispatch::Actor").field(handle).finish(),
            Dispatch::Audience(audience) => f.debug_tuple("Dispatch::Audience").field(audience).finish(),
        }
    }
}
