//! Actor-Style Dispatch Runtime
//!
//! Wraps ordinary objects so that every call on them is queued and run one at
//! a time, while a shared worker pool serves all actors. Callers never block
//! on an actor; values come back through [`ActorFuture`]s or callbacks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  enqueue   ┌─────────────────────────┐   drain   ┌─────────────┐
//! │ ActorHandle  │──────────▶│ ActorScheduler          │─────────▶│ WorkerPool  │
//! │ Dispatch     │            │  DashMap<ActorId, Queue> │           │ (blocking)  │
//! └──────┬───────┘            └─────────────────────────┘           └─────────────┘
//!        │ marshal args                    ▲
//!        ▼                                 │ resume / callback
//! ┌──────────────────┐            ┌─────────┴────────┐
//! │ ParameterMarshaler│           │ ActorTask waker  │
//! └──────────────────┘            └──────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - **Mutual exclusion**: at most one invocation per actor runs at a time
//! - **FIFO per caller**: calls made by one thread run in the order made
//! - **Queue reclamation**: an actor with nothing queued holds no queue
//! - **Affinity**: callbacks and code after `.await` run on their actor's queue
//!
//! # Examples
//!
//! ```rust,no_run
//! use troupe::{Actor, ActorSystem};
//!
//! struct Counter {
//!     count: u64,
//! }
//!
//! impl Actor for Counter {}
//!
//! let system = ActorSystem::new()?;
//! let counter = system.spawn(|| Counter { count: 0 });
//! counter.send(|c| c.count += 1)?;
//! let count = counter.ask(|c| c.count)?.wait()?;
//! assert_eq!(count, 1);
//! # Ok::<(), troupe::ActorError>(())
//! ```

pub mod actor;
pub mod audience;
pub mod bridge;
pub mod deferred;
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod fault;
pub mod future;
pub mod handle;
pub mod marshal;
pub mod scheduler;
pub mod system;
pub mod utils;

pub use actor::{Actor, ActorId};
pub use audience::{Audience, Dispatch};
pub use bridge::ActorContext;
pub use deferred::{DeferredActor, Readiness};
pub use descriptor::{
    validate_interface, ActorInterface, InvocationDescriptor, MethodSignature, ReturnShape,
};
pub use error::{ActorError, Result};
pub use executor::{Executor, InlineExecutor, Task, WorkerPool};
pub use fault::{
    CallSite, DiscardFaults, EscalateFaults, Fault, FaultAction, FaultKind, FaultPolicy, LogFaults,
};
pub use future::{completion, ActorFuture, CompletionSink};
pub use handle::ActorHandle;
pub use marshal::{
    ActorLink, Arg, Args, AsyncCallback, Callback, Captures, Component, ComponentArg, ComponentRef,
    MarshalCallback, ParameterMarshaler, ValueCallback,
};
pub use scheduler::{
    ActorScheduler, Invocation, Job, QueueTarget, SchedulerMetrics, SchedulerSettings,
    SchedulerStats,
};
pub use system::ActorSystem;

pub use troupe_config::{RuntimeConfig, SchedulerConfig};
