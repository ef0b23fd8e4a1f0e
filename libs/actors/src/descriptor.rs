//! Invocation descriptors and interface adapters
//!
//! Proxies are hand-written adapter structs. Each adapter method forwards to a
//! [`Dispatch`](crate::Dispatch) through a `static` [`InvocationDescriptor`]
//! that says how to apply positional [`Args`] to the target object:
//!
//! ```rust,ignore
//! static SET_VALUE: InvocationDescriptor<Store> =
//!     InvocationDescriptor::action("set_value", |store, mut args| {
//!         store.value = args.take(0)?;
//!         Ok(())
//!     });
//!
//! pub struct StoreProxy { dispatch: Dispatch<Store> }
//!
//! impl StoreProxy {
//!     pub fn set_value(&self, value: i64) -> Result<()> {
//!         self.dispatch.invoke(&SET_VALUE, Args::new().value(value))
//!     }
//! }
//! ```
//!
//! The adapter lists its method signatures through [`ActorInterface`], and the
//! system checks them before wrapping: a method that hands back a plain value
//! synchronously cannot be serviced without blocking the caller.

use crate::audience::Dispatch;
use crate::error::{ActorError, Result};
use crate::marshal::Args;
use std::collections::HashSet;
use std::fmt;

/// What a method hands back to its caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnShape {
    /// Nothing; fire-and-forget
    Unit,
    /// An [`ActorFuture`](crate::ActorFuture)
    Async,
    /// Another actor capability
    Actor,
    /// A plain value, synchronously. Rejected for actors.
    Value,
}

/// Name and return shape of one interface method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodSignature {
    pub name: &'static str,
    pub shape: ReturnShape,
}

impl MethodSignature {
    pub const fn new(name: &'static str, shape: ReturnShape) -> Self {
        Self { name, shape }
    }
}

/// How to call one method on a `T`, given boxed arguments
///
/// Built once per method, usually as a `static`.
pub struct InvocationDescriptor<T, R = ()> {
    name: &'static str,
    shape: ReturnShape,
    call: fn(&mut T, Args) -> Result<R>,
}

impl<T> InvocationDescriptor<T, ()> {
    /// Fire-and-forget method
    pub const fn action(name: &'static str, call: fn(&mut T, Args) -> Result<()>) -> Self {
        Self {
            name,
            shape: ReturnShape::Unit,
            call,
        }
    }
}

impl<T, R> InvocationDescriptor<T, R> {
    /// Method whose value is delivered through a future
    pub const fn returning(name: &'static str, call: fn(&mut T, Args) -> Result<R>) -> Self {
        Self {
            name,
            shape: ReturnShape::Async,
            call,
        }
    }

    /// Method producing a component owned by the target
    pub const fn component(name: &'static str, call: fn(&mut T, Args) -> Result<R>) -> Self {
        Self {
            name,
            shape: ReturnShape::Actor,
            call,
        }
    }

    /// Method returning a plain value synchronously; only audiences accept it
    pub const fn value(name: &'static str, call: fn(&mut T, Args) -> Result<R>) -> Self {
        Self {
            name,
            shape: ReturnShape::Value,
            call,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn shape(&self) -> ReturnShape {
        self.shape
    }

    pub const fn signature(&self) -> MethodSignature {
        MethodSignature::new(self.name, self.shape)
    }

    /// Apply the method directly to a target
    pub fn call(&self, target: &mut T, args: Args) -> Result<R> {
        (self.call)(target, args.for_method(self.name))
    }

    pub(crate) fn function(&self) -> fn(&mut T, Args) -> Result<R> {
        self.call
    }
}

impl<T, R> fmt::Debug for InvocationDescriptor<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationDescriptor")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .finish()
    }
}

/// Implemented by adapter structs standing in for an actor interface
pub trait ActorInterface: Sized {
    type Target: Send + 'static;

    /// Interface name for diagnostics
    fn name() -> &'static str {
        crate::actor::short_type_name::<Self>()
    }

    fn signatures() -> Vec<MethodSignature>;

    fn from_dispatch(dispatch: Dispatch<Self::Target>) -> Self;
}

/// Check an interface before it is wrapped around an actor
pub fn validate_interface<P: ActorInterface>() -> Result<()> {
    validate_signatures(P::name(), &P::signatures())
}

pub(crate) fn validate_signatures(interface: &str, signatures: &[MethodSignature]) -> Result<()> {
    let mut seen = HashSet::new();
    for signature in signatures {
        if signature.name.is_empty() {
            return Err(ActorError::protocol(interface, "method with an empty name"));
        }
        if !seen.insert(signature.name) {
            return Err(ActorError::protocol(
                interface,
                format!("method '{}' declared twice", signature.name),
            ));
        }
        if signature.shape == ReturnShape::Value {
            return Err(ActorError::protocol(
                interface,
                format!(
                    "method '{}' returns a plain value; return nothing, an ActorFuture or an actor",
                    signature.name
                ),
            ));
        }
    }
    Ok(())
}
