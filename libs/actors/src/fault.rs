//! Fault policy hooks
//!
//! One policy is installed per [`ActorSystem`](crate::ActorSystem) and wraps
//! every dispatched invocation. Installing a new policy replaces the previous
//! one; policies do not compose.
//!
//! Hook order for one invocation:
//!
//! ```text
//! caller thread:  before_enqueue(site)
//! worker thread:  before_run(site) -> job -> [on_fault(fault)] -> after_run(site, fault)
//! ```

use crate::actor::ActorId;
use crate::error::ActorError;
use std::any::Any;
use std::fmt;
use tracing::{error, warn};

/// Where an invocation is headed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    pub actor: ActorId,
    pub actor_type: &'static str,
    pub method: &'static str,
}

impl CallSite {
    pub fn new(actor: ActorId, actor_type: &'static str, method: &'static str) -> Self {
        Self {
            actor,
            actor_type,
            method,
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{} on {}", self.actor_type, self.method, self.actor)
    }
}

/// What went wrong inside an invocation
#[derive(Debug, Clone, PartialEq)]
pub enum FaultKind {
    /// The method body panicked
    Panic(String),
    /// The method body returned an error
    Error(ActorError),
}

/// A failed invocation, handed to the fault policy
#[derive(Debug, Clone, PartialEq)]
pub struct Fault {
    pub site: CallSite,
    pub kind: FaultKind,
}

impl Fault {
    pub fn error(site: CallSite, error: ActorError) -> Self {
        Self {
            site,
            kind: FaultKind::Error(error),
        }
    }

    pub fn panic(site: CallSite, payload: Box<dyn Any + Send>) -> Self {
        Self {
            site,
            kind: FaultKind::Panic(panic_message(payload.as_ref())),
        }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self.kind, FaultKind::Panic(_))
    }

    pub fn message(&self) -> String {
        match &self.kind {
            FaultKind::Panic(message) => message.clone(),
            FaultKind::Error(err) => err.to_string(),
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FaultKind::Panic(message) => write!(f, "{} panicked: {}", self.site, message),
            FaultKind::Error(err) => write!(f, "{} failed: {}", self.site, err),
        }
    }
}

impl std::error::Error for Fault {}

/// Disposition of a fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// Swallow silently
    Discard,
    /// Record at error level and continue
    Log,
    /// Forward to the system's escalation channel
    Escalate,
}

/// Hooks wrapped around every dispatched invocation
///
/// All hooks default to no-ops and `on_fault` defaults to discarding. A panic
/// raised by a hook is contained and never stops a queue from draining.
pub trait FaultPolicy: Send + Sync + 'static {
    /// Runs on the caller's thread before an invocation is queued.
    /// Must not block.
    fn before_enqueue(&self, _site: &CallSite) {}

    /// Runs on the worker right before the invocation body
    fn before_run(&self, _site: &CallSite) {}

    /// Runs on the worker after the invocation body and fault handling
    fn after_run(&self, _site: &CallSite, _fault: Option<&Fault>) {}

    /// Decide what happens to a fault
    fn on_fault(&self, _fault: &Fault) -> FaultAction {
        FaultAction::Discard
    }
}

/// Default policy: faults are swallowed
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardFaults;

impl FaultPolicy for DiscardFaults {}

/// Logs every fault at error level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFaults;

impl FaultPolicy for LogFaults {
    fn on_fault(&self, _fault: &Fault) -> FaultAction {
        FaultAction::Log
    }
}

/// Escalates every fault
#[derive(Debug, Default, Clone, Copy)]
pub struct EscalateFaults;

impl FaultPolicy for EscalateFaults {
    fn on_fault(&self, _fault: &Fault) -> FaultAction {
        FaultAction::Escalate
    }
}

pub(crate) fn log_fault(fault: &Fault) {
    error!(
        actor_id = %fault.site.actor,
        actor_type = fault.site.actor_type,
        method = fault.site.method,
        panicked = fault.is_panic(),
        "Actor invocation failed: {}",
        fault.message()
    );
}

/// Run a policy hook, containing any panic it raises
pub(crate) fn shield<R>(hook: &'static str, f: impl FnOnce() -> R) -> Option<R> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(payload) => {
            warn!(
                hook,
                "Fault policy hook panicked: {}",
                panic_message(payload.as_ref())
            );
            None
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
