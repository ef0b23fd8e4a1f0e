//! Parameter marshaling
//!
//! Arguments crossing an actor boundary are inspected once, when the outer
//! call is made. Plain values pass through. A callback whose captured
//! environment reaches exactly one actor is replaced by a callback that queues
//! the original onto that actor; an owned component object is wrapped into a
//! handle bound to its owner's queue.
//!
//! Closures cannot be introspected, so a callback declares its environment
//! explicitly:
//!
//! ```rust,ignore
//! let on_reply = Callback::new(move |n: u32| counter.fetch_add(n, SeqCst))
//!     .capturing(&requester);          // runs serialized with `requester`
//! ```
//!
//! Owner search is best effort. It walks the declared environment, including
//! nested environments up to the configured depth, and refuses to guess: an
//! environment reaching two distinct actors is rejected.

use crate::actor::{short_type_name, ActorId};
use crate::error::{ActorError, Result};
use crate::future::{completion, ActorFuture};
use crate::handle::ActorHandle;
use crate::scheduler::{ActorScheduler, Job, QueueTarget};

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// Method name recorded for rehomed callback invocations
pub const CALLBACK_METHOD: &str = "<callback>";

/// Type-erased view of an actor's dispatch handle
pub trait ActorLink: Send + Sync + 'static {
    fn actor_id(&self) -> ActorId;

    fn queue_target(&self) -> QueueTarget;

    fn scheduler(&self) -> &ActorScheduler;

    /// Queue a state-free job on this actor's queue
    fn dispatch(&self, method: &'static str, job: Job) -> Result<()>;
}

#[derive(Clone)]
enum Capture {
    Actor(Arc<dyn ActorLink>),
    Env(Captures),
}

/// Declared capture environment of a callback or component
#[derive(Clone, Default)]
pub struct Captures {
    entries: Vec<Capture>,
}

impl Captures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a captured actor reference
    pub fn actor<L: ActorLink + Clone>(mut self, link: &L) -> Self {
        self.entries.push(Capture::Actor(Arc::new(link.clone())));
        self
    }

    pub fn link(mut self, link: Arc<dyn ActorLink>) -> Self {
        self.entries.push(Capture::Actor(link));
        self
    }

    /// Record a nested environment, searched one level deeper
    pub fn env(mut self, nested: Captures) -> Self {
        self.entries.push(Capture::Env(nested));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct actors reachable within `max_depth` levels of nesting
    pub fn owners(&self, max_depth: usize) -> Vec<Arc<dyn ActorLink>> {
        let mut found = Vec::new();
        self.collect(0, max_depth, &mut found);
        found
    }

    fn collect(&self, depth: usize, max_depth: usize, found: &mut Vec<Arc<dyn ActorLink>>) {
        for entry in &self.entries {
            match entry {
                Capture::Actor(link) => {
                    let id = link.actor_id();
                    if !found.iter().any(|known| known.actor_id() == id) {
                        found.push(link.clone());
                    }
                }
                Capture::Env(nested) if depth < max_depth => {
                    nested.collect(depth + 1, max_depth, found);
                }
                Capture::Env(_) => {
                    trace!(depth, "Capture search depth exhausted");
                }
            }
        }
    }
}

impl fmt::Debug for Captures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for entry in &self.entries {
            match entry {
                Capture::Actor(link) => list.entry(&link.actor_id()),
                Capture::Env(nested) => list.entry(nested),
            };
        }
        list.finish()
    }
}

/// Fire-and-forget callback
pub struct Callback<A> {
    f: Arc<dyn Fn(A) + Send + Sync>,
    captures: Captures,
    home: Option<ActorId>,
}

impl<A: Send + 'static> Callback<A> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            captures: Captures::new(),
            home: None,
        }
    }

    /// Declare that the closure captures this actor
    pub fn capturing<L: ActorLink + Clone>(mut self, link: &L) -> Self {
        self.captures = self.captures.actor(link);
        self
    }

    /// Declare a nested capture environment
    pub fn capturing_env(mut self, env: Captures) -> Self {
        self.captures = self.captures.env(env);
        self
    }

    pub fn call(&self, arg: A) {
        (self.f)(arg)
    }

    /// Actor whose queue this callback already runs on, if any
    pub fn home(&self) -> Option<ActorId> {
        self.home
    }

    pub fn captures(&self) -> &Captures {
        &self.captures
    }

    pub(crate) fn homed(f: Arc<dyn Fn(A) + Send + Sync>, captures: Captures, home: ActorId) -> Self {
        Self {
            f,
            captures,
            home: Some(home),
        }
    }

    fn rehomed(self, owner: Arc<dyn ActorLink>) -> Self {
        let inner = self.f;
        let home = owner.actor_id();
        let f = move |arg: A| {
            let inner = inner.clone();
            let job: Job = Box::new(move || {
                inner(arg);
                Ok(())
            });
            if let Err(err) = owner.dispatch(CALLBACK_METHOD, job) {
                warn!(actor_id = %home, "Dropping callback for unavailable owner: {}", err);
            }
        };
        Self::homed(Arc::new(f), self.captures, home)
    }
}

impl<A> Clone for Callback<A> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            captures: self.captures.clone(),
            home: self.home,
        }
    }
}

impl<A> fmt::Debug for Callback<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("home", &self.home)
            .field("captures", &self.captures)
            .finish()
    }
}

/// Callback whose result arrives asynchronously
pub struct AsyncCallback<A, R> {
    f: Arc<dyn Fn(A) -> ActorFuture<R> + Send + Sync>,
    captures: Captures,
    home: Option<ActorId>,
}

impl<A: Send + 'static, R: Send + 'static> AsyncCallback<A, R> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(A) -> ActorFuture<R> + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            captures: Captures::new(),
            home: None,
        }
    }

    pub fn capturing<L: ActorLink + Clone>(mut self, link: &L) -> Self {
        self.captures = self.captures.actor(link);
        self
    }

    pub fn capturing_env(mut self, env: Captures) -> Self {
        self.captures = self.captures.env(env);
        self
    }

    pub fn call(&self, arg: A) -> ActorFuture<R> {
        (self.f)(arg)
    }

    pub fn home(&self) -> Option<ActorId> {
        self.home
    }

    fn rehomed(self, owner: Arc<dyn ActorLink>) -> Self {
        let inner = self.f;
        let home = owner.actor_id();
        let f = move |arg: A| {
            let (sink, reply) = completion();
            let inner = inner.clone();
            let job: Job = Box::new(move || {
                inner(arg).then(move |value| sink.complete(value));
                Ok(())
            });
            if let Err(err) = owner.dispatch(CALLBACK_METHOD, job) {
                warn!(actor_id = %home, "Dropping callback for unavailable owner: {}", err);
            }
            reply
        };
        Self {
            f: Arc::new(f),
            captures: self.captures,
            home: Some(home),
        }
    }
}

impl<A, R> Clone for AsyncCallback<A, R> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            captures: self.captures.clone(),
            home: self.home,
        }
    }
}

/// Callback returning a value synchronously
///
/// Only usable when nothing in its environment is an actor; such a callback
/// cannot be serviced on another actor's queue without blocking the caller.
pub struct ValueCallback<A, R> {
    f: Arc<dyn Fn(A) -> R + Send + Sync>,
    captures: Captures,
}

impl<A: Send + 'static, R: Send + 'static> ValueCallback<A, R> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            captures: Captures::new(),
        }
    }

    pub fn capturing<L: ActorLink + Clone>(mut self, link: &L) -> Self {
        self.captures = self.captures.actor(link);
        self
    }

    pub fn capturing_env(mut self, env: Captures) -> Self {
        self.captures = self.captures.env(env);
        self
    }

    pub fn call(&self, arg: A) -> R {
        (self.f)(arg)
    }
}

impl<A, R> Clone for ValueCallback<A, R> {
    fn clone(&self) -> Self {
        Self {
            f: self.f.clone(),
            captures: self.captures.clone(),
        }
    }
}

/// Object-safe view of the callback shapes above
pub trait MarshalCallback: Send {
    fn captures(&self) -> &Captures;

    fn home(&self) -> Option<ActorId>;

    fn shape(&self) -> &'static str;

    /// Replace with a callback that runs on `owner`'s queue
    fn rehome(self: Box<Self>, owner: Arc<dyn ActorLink>) -> Result<Box<dyn MarshalCallback>>;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<A: Send + 'static> MarshalCallback for Callback<A> {
    fn captures(&self) -> &Captures {
        &self.captures
    }

    fn home(&self) -> Option<ActorId> {
        self.home
    }

    fn shape(&self) -> &'static str {
        "action"
    }

    fn rehome(self: Box<Self>, owner: Arc<dyn ActorLink>) -> Result<Box<dyn MarshalCallback>> {
        Ok(Box::new(self.rehomed(owner)))
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

impl<A: Send + 'static, R: Send + 'static> MarshalCallback for AsyncCallback<A, R> {
    fn captures(&self) -> &Captures {
        &self.captures
    }

    fn home(&self) -> Option<ActorId> {
        self.home
    }

    fn shape(&self) -> &'static str {
        "async"
    }

    fn rehome(self: Box<Self>, owner: Arc<dyn ActorLink>) -> Result<Box<dyn MarshalCallback>> {
        Ok(Box::new(self.rehomed(owner)))
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

impl<A: Send + 'static, R: Send + 'static> MarshalCallback for ValueCallback<A, R> {
    fn captures(&self) -> &Captures {
        &self.captures
    }

    fn home(&self) -> Option<ActorId> {
        None
    }

    fn shape(&self) -> &'static str {
        "value"
    }

    fn rehome(self: Box<Self>, owner: Arc<dyn ActorLink>) -> Result<Box<dyn MarshalCallback>> {
        Err(ActorError::callback_shape(format!(
            "callback returning {} synchronously captures {}; return an ActorFuture instead",
            short_type_name::<R>(),
            owner.actor_id()
        )))
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// A non-callback object that may belong to an actor
///
/// When owned, the receiving side gets a handle whose calls run on the owner's
/// queue instead of the raw object.
pub struct Component<C> {
    value: C,
    captures: Captures,
}

impl<C: Send + 'static> Component<C> {
    pub fn new(value: C) -> Self {
        Self {
            value,
            captures: Captures::new(),
        }
    }

    pub fn owned_by<L: ActorLink + Clone>(mut self, owner: &L) -> Self {
        self.captures = self.captures.actor(owner);
        self
    }

    pub fn capturing_env(mut self, env: Captures) -> Self {
        self.captures = self.captures.env(env);
        self
    }
}

/// What an adapter receives for a [`Component`] argument
pub enum ComponentRef<C> {
    /// Bound to the owner's queue
    Owned(ActorHandle<C>),
    /// No owner found; the object itself
    Free(C),
}

impl<C> fmt::Debug for ComponentRef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentRef::Owned(_) => f.write_str("ComponentRef::Owned"),
            ComponentRef::Free(_) => f.write_str("ComponentRef::Free"),
        }
    }
}

/// Object-safe view of [`Component`]
pub trait ComponentArg: Send {
    fn captures(&self) -> &Captures;

    fn adopt(self: Box<Self>, owner: Arc<dyn ActorLink>) -> Box<dyn Any + Send>;

    fn release(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<C: Send + 'static> ComponentArg for Component<C> {
    fn captures(&self) -> &Captures {
        &self.captures
    }

    fn adopt(self: Box<Self>, owner: Arc<dyn ActorLink>) -> Box<dyn Any + Send> {
        let handle = ActorHandle::live(owner.queue_target(), owner.scheduler().clone(), self.value);
        Box::new(ComponentRef::Owned(handle))
    }

    fn release(self: Box<Self>) -> Box<dyn Any + Send> {
        Box::new(ComponentRef::Free(self.value))
    }
}

/// One outgoing argument
pub enum Arg {
    Value(Box<dyn Any + Send>),
    Callback(Box<dyn MarshalCallback>),
    Component(Box<dyn ComponentArg>),
}

impl fmt::Debug for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Value(_) => f.write_str("Value"),
            Arg::Callback(cb) => write!(f, "Callback({})", cb.shape()),
            Arg::Component(_) => f.write_str("Component"),
        }
    }
}

/// Positional arguments of one adapter call
///
/// Each argument is taken at most once, by index.
#[derive(Debug, Default)]
pub struct Args {
    items: Vec<Option<Arg>>,
    method: &'static str,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value<V: Any + Send>(mut self, value: V) -> Self {
        self.items.push(Some(Arg::Value(Box::new(value))));
        self
    }

    pub fn callback<A: Send + 'static>(mut self, callback: Callback<A>) -> Self {
        self.items.push(Some(Arg::Callback(Box::new(callback))));
        self
    }

    pub fn async_callback<A: Send + 'static, R: Send + 'static>(
        mut self,
        callback: AsyncCallback<A, R>,
    ) -> Self {
        self.items.push(Some(Arg::Callback(Box::new(callback))));
        self
    }

    pub fn value_callback<A: Send + 'static, R: Send + 'static>(
        mut self,
        callback: ValueCallback<A, R>,
    ) -> Self {
        self.items.push(Some(Arg::Callback(Box::new(callback))));
        self
    }

    pub fn component<C: Send + 'static>(mut self, component: Component<C>) -> Self {
        self.items.push(Some(Arg::Component(Box::new(component))));
        self
    }

    pub fn push(&mut self, arg: Arg) {
        self.items.push(Some(arg));
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn for_method(mut self, method: &'static str) -> Self {
        self.method = method;
        self
    }

    /// Fail unless exactly `expected` arguments were passed
    pub fn expect_len(&self, expected: usize) -> Result<()> {
        if self.items.len() == expected {
            Ok(())
        } else {
            Err(ActorError::argument_mismatch(
                self.method,
                format!("expected {} arguments, got {}", expected, self.items.len()),
            ))
        }
    }

    fn take_any(&mut self, index: usize) -> Result<Box<dyn Any + Send>> {
        let arg = self
            .items
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| {
                ActorError::argument_mismatch(
                    self.method,
                    format!("argument {} missing or already taken", index),
                )
            })?;
        Ok(match arg {
            Arg::Value(value) => value,
            Arg::Callback(callback) => callback.into_any(),
            Arg::Component(component) => component.release(),
        })
    }

    fn downcast<V: Any>(&self, index: usize, boxed: Box<dyn Any + Send>) -> Result<V> {
        boxed.downcast::<V>().map(|value| *value).map_err(|_| {
            ActorError::argument_mismatch(
                self.method,
                format!("argument {} is not a {}", index, std::any::type_name::<V>()),
            )
        })
    }

    /// Take a plain value argument
    pub fn take<V: Any + Send>(&mut self, index: usize) -> Result<V> {
        let boxed = self.take_any(index)?;
        self.downcast(index, boxed)
    }

    pub fn take_callback<A: Send + 'static>(&mut self, index: usize) -> Result<Callback<A>> {
        self.take(index)
    }

    pub fn take_async_callback<A: Send + 'static, R: Send + 'static>(
        &mut self,
        index: usize,
    ) -> Result<AsyncCallback<A, R>> {
        self.take(index)
    }

    pub fn take_value_callback<A: Send + 'static, R: Send + 'static>(
        &mut self,
        index: usize,
    ) -> Result<ValueCallback<A, R>> {
        self.take(index)
    }

    pub fn take_component<C: Send + 'static>(&mut self, index: usize) -> Result<ComponentRef<C>> {
        self.take(index)
    }
}

/// Rewrites outgoing arguments so callbacks and components run on their
/// owning actor's queue
#[derive(Debug, Clone)]
pub struct ParameterMarshaler {
    search_depth: usize,
}

impl ParameterMarshaler {
    pub fn new(search_depth: usize) -> Self {
        Self { search_depth }
    }

    pub fn search_depth(&self) -> usize {
        self.search_depth
    }

    /// The actor that must serialize an argument, if any
    ///
    /// `home` is the actor the argument already runs on; an argument homed to
    /// its only owner needs no further wrapping.
    pub fn resolve_owner(
        &self,
        captures: &Captures,
        home: Option<ActorId>,
    ) -> Result<Option<Arc<dyn ActorLink>>> {
        let mut owners = captures.owners(self.search_depth);
        match owners.len() {
            0 => Ok(None),
            1 => {
                let owner = owners.remove(0);
                if home == Some(owner.actor_id()) {
                    Ok(None)
                } else {
                    Ok(Some(owner))
                }
            }
            _ => Err(ActorError::ambiguous_owner(
                owners.iter().map(|owner| owner.actor_id()).collect(),
            )),
        }
    }

    /// Marshal every argument of one outgoing call
    pub fn marshal(&self, args: Args) -> Result<Args> {
        let Args { items, method } = args;
        let mut marshaled = Vec::with_capacity(items.len());

        for item in items {
            let Some(arg) = item else {
                marshaled.push(None);
                continue;
            };

            let arg = match arg {
                Arg::Value(value) => Arg::Value(value),
                Arg::Callback(callback) => {
                    match self.resolve_owner(callback.captures(), callback.home())? {
                        Some(owner) => {
                            trace!(
                                method,
                                owner = %owner.actor_id(),
                                shape = callback.shape(),
                                "Rehoming callback onto owner queue"
                            );
                            Arg::Callback(callback.rehome(owner)?)
                        }
                        None => Arg::Callback(callback),
                    }
                }
                Arg::Component(component) => {
                    match self.resolve_owner(component.captures(), None)? {
                        Some(owner) => {
                            trace!(method, owner = %owner.actor_id(), "Binding component to owner queue");
                            Arg::Value(component.adopt(owner))
                        }
                        None => Arg::Value(component.release()),
                    }
                }
            };
            marshaled.push(Some(arg));
        }

        Ok(Args {
            items: marshaled,
            method,
        })
    }

    /// Marshal a single fire-and-forget callback
    pub fn marshal_callback<A: Send + 'static>(&self, callback: Callback<A>) -> Result<Callback<A>> {
        match self.resolve_owner(callback.captures(), callback.home())? {
            Some(owner) => Ok(callback.rehomed(owner)),
            None => Ok(callback),
        }
    }

    /// Marshal a single async callback
    pub fn marshal_async_callback<A: Send + 'static, R: Send + 'static>(
        &self,
        callback: AsyncCallback<A, R>,
    ) -> Result<AsyncCallback<A, R>> {
        match self.resolve_owner(&callback.captures, callback.home)? {
            Some(owner) => Ok(callback.rehomed(owner)),
            None => Ok(callback),
        }
    }
}

impl Default for ParameterMarshaler {
    fn default() -> Self {
        Self::new(8)
    }
}
