//! Actor System
//!
//! Entry point of the runtime. Owns the scheduler (and, unless one is
//! supplied, the Tokio runtime whose blocking pool drains actor queues) and
//! wraps objects into actors and audiences.
//!
//! # Wrapping surfaces
//!
//! | Call                      | Construction               | Execution         |
//! |---------------------------|----------------------------|-------------------|
//! | `spawn` / `wrap_actor`    | deferred, on the pool      | actor queue       |
//! | `spawn_on` / `wrap_actor_on` | deferred, on the executor | executor       |
//! | `adopt` / `wrap_existing` | already built              | actor queue       |
//! | `audience` / `wrap_audience` | already built           | inline, caller    |
//!
//! The interface-level calls additionally validate the adapter's method
//! shapes and fail fast on a protocol violation.

use crate::actor::{short_type_name, Actor, ActorId};
use crate::audience::{Audience, Dispatch};
use crate::deferred::{ConstructionGuard, DeferredActor, CONSTRUCT_METHOD};
use crate::descriptor::{validate_interface, ActorInterface};
use crate::error::{ActorError, Result};
use crate::executor::{Executor, WorkerPool};
use crate::fault::{CallSite, Fault, FaultPolicy};
use crate::handle::ActorHandle;
use crate::scheduler::{ActorScheduler, Invocation, QueueTarget, SchedulerSettings, SchedulerStats};

use crossbeam_channel::Receiver;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info};
use troupe_config::{RuntimeConfig, SchedulerConfig};

/// Core actor system managing wrapping and dispatch
pub struct ActorSystem {
    scheduler: ActorScheduler,

    /// Runtime owned by this system, if it built one
    runtime: Option<Runtime>,

    /// Runtime used for timers and other async utilities
    handle: Option<Handle>,
}

impl ActorSystem {
    /// System with default configuration and its own runtime
    pub fn new() -> Result<Self> {
        Self::from_config(&RuntimeConfig::default())
    }

    /// Build a runtime sized by `config` and a system on top of it
    pub fn from_config(config: &RuntimeConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| ActorError::configuration(format!("{:#}", e), None))?;

        let scheduler_config = &config.scheduler;
        let runtime = Builder::new_multi_thread()
            .worker_threads(scheduler_config.worker_threads)
            .max_blocking_threads(scheduler_config.max_blocking_threads)
            .thread_name(scheduler_config.thread_name.clone())
            .enable_all()
            .build()
            .map_err(|e| ActorError::runtime(format!("failed to build worker pool: {}", e)))?;

        let handle = runtime.handle().clone();
        let pool = Arc::new(WorkerPool::new(handle.clone()));
        info!(
            worker_threads = scheduler_config.worker_threads,
            max_blocking_threads = scheduler_config.max_blocking_threads,
            "Actor system started"
        );

        Ok(Self {
            scheduler: ActorScheduler::new(pool, SchedulerSettings::from(scheduler_config)),
            runtime: Some(runtime),
            handle: Some(handle),
        })
    }

    /// System on an existing Tokio runtime
    pub fn with_handle(handle: Handle, config: &SchedulerConfig) -> Self {
        let pool = Arc::new(WorkerPool::new(handle.clone()));
        Self {
            scheduler: ActorScheduler::new(pool, SchedulerSettings::from(config)),
            runtime: None,
            handle: Some(handle),
        }
    }

    /// System whose shared pool is `executor`
    ///
    /// With [`InlineExecutor`](crate::InlineExecutor) every call runs to
    /// completion on the calling thread, which makes tests deterministic.
    pub fn with_executor(executor: Arc<dyn Executor>, config: &SchedulerConfig) -> Self {
        Self {
            scheduler: ActorScheduler::new(executor, SchedulerSettings::from(config)),
            runtime: None,
            handle: Handle::try_current().ok(),
        }
    }

    pub fn scheduler(&self) -> &ActorScheduler {
        &self.scheduler
    }

    /// Runtime for async utilities such as timers
    pub fn runtime_handle(&self) -> Option<Handle> {
        self.handle.clone().or_else(|| Handle::try_current().ok())
    }

    /// Replace the fault policy; no composition with the previous one
    pub fn set_fault_policy(&self, policy: Arc<dyn FaultPolicy>) {
        self.scheduler.set_policy(policy);
    }

    /// Faults escalated by the installed policy
    pub fn escalations(&self) -> Receiver<Fault> {
        self.scheduler.escalations()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Request an actor built by `creator` on the worker pool
    ///
    /// Returns at once. Calls made before construction finishes are held and
    /// run in order afterwards.
    pub fn spawn<T, F>(&self, creator: F) -> ActorHandle<T>
    where
        T: Actor,
        F: FnOnce() -> T + Send + 'static,
    {
        self.spawn_deferred(QueueTarget::new(ActorId::new()), creator)
    }

    /// Like [`spawn`](Self::spawn), with construction and every call running
    /// on `executor`
    pub fn spawn_on<T, F>(&self, executor: Arc<dyn Executor>, creator: F) -> ActorHandle<T>
    where
        T: Actor,
        F: FnOnce() -> T + Send + 'static,
    {
        self.spawn_deferred(QueueTarget::with_executor(ActorId::new(), executor), creator)
    }

    fn spawn_deferred<T, F>(&self, target: QueueTarget, creator: F) -> ActorHandle<T>
    where
        T: Actor,
        F: FnOnce() -> T + Send + 'static,
    {
        let actor_type = short_type_name::<T>();
        debug!(actor_id = %target.id(), actor_type, "Spawning actor");

        let deferred = Arc::new(DeferredActor::new(target.clone(), self.scheduler.clone()));
        let handle = ActorHandle::deferred(target.clone(), self.scheduler.clone(), deferred.clone());
        let guard = ConstructionGuard::new(deferred);

        let site = CallSite::new(target.id(), actor_type, CONSTRUCT_METHOD);
        self.scheduler.run_detached(
            target.executor(),
            Invocation::new(site, Box::new(move || guard.finish(Ok(creator())))),
        );

        handle
    }

    /// Wrap an already constructed object
    ///
    /// The caller must not touch the object directly afterwards.
    pub fn adopt<T: Actor>(&self, object: T) -> ActorHandle<T> {
        self.adopt_at(QueueTarget::new(ActorId::new()), object)
    }

    pub fn adopt_on<T: Actor>(&self, executor: Arc<dyn Executor>, object: T) -> ActorHandle<T> {
        self.adopt_at(QueueTarget::with_executor(ActorId::new(), executor), object)
    }

    fn adopt_at<T: Actor>(&self, target: QueueTarget, object: T) -> ActorHandle<T> {
        debug!(actor_id = %target.id(), actor_type = short_type_name::<T>(), "Wrapping existing object");
        ActorHandle::live(target, self.scheduler.clone(), object)
    }

    /// Wrap a thread-safe object whose calls run inline
    pub fn audience<T: Send + 'static>(&self, object: T) -> Audience<T> {
        Audience::new(object, self.scheduler.marshaler().clone())
    }

    /// Interface-level [`spawn`](Self::spawn)
    pub fn wrap_actor<P, F>(&self, creator: F) -> Result<P>
    where
        P: ActorInterface,
        P::Target: Actor,
        F: FnOnce() -> P::Target + Send + 'static,
    {
        validate_interface::<P>()?;
        Ok(P::from_dispatch(Dispatch::Actor(self.spawn(creator))))
    }

    /// Interface-level [`spawn_on`](Self::spawn_on)
    pub fn wrap_actor_on<P, F>(&self, executor: Arc<dyn Executor>, creator: F) -> Result<P>
    where
        P: ActorInterface,
        P::Target: Actor,
        F: FnOnce() -> P::Target + Send + 'static,
    {
        validate_interface::<P>()?;
        Ok(P::from_dispatch(Dispatch::Actor(self.spawn_on(executor, creator))))
    }

    /// Interface-level [`adopt`](Self::adopt)
    pub fn wrap_existing<P>(&self, object: P::Target) -> Result<P>
    where
        P: ActorInterface,
        P::Target: Actor,
    {
        validate_interface::<P>()?;
        Ok(P::from_dispatch(Dispatch::Actor(self.adopt(object))))
    }

    /// Interface-level [`audience`](Self::audience); method shapes are not
    /// checked because nothing is queued
    pub fn wrap_audience<P: ActorInterface>(&self, object: P::Target) -> P {
        P::from_dispatch(Dispatch::Audience(self.audience(object)))
    }
}

impl Drop for ActorSystem {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            debug!("Shutting down actor system runtime");
            // Safe inside async contexts, unlike dropping the runtime
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for ActorSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorSystem")
            .field("scheduler", &self.scheduler)
            .field("owns_runtime", &self.runtime.is_some())
            .finish()
    }
}
