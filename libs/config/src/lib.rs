//! # Troupe Runtime Configuration
//!
//! Centralized configuration for the troupe actor runtime: worker pool sizing,
//! deferred-construction timing, callback marshaling limits and logging.
//!
//! ## Sources
//!
//! Configuration is layered, later sources overriding earlier ones:
//!
//! 1. Built-in defaults ([`RuntimeConfig::default`])
//! 2. A TOML file (`troupe.toml` unless a path is given)
//! 3. An environment overlay, `environments/<env>.toml` next to the base file
//! 4. `TROUPE_`-prefixed environment variables, e.g.
//!    `TROUPE_SCHEDULER__WORKER_THREADS=8`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use troupe_config::{init_tracing, load_config};
//!
//! let config = load_config(Some("production")).unwrap();
//! init_tracing(&config.logging).unwrap();
//! ```

pub mod logging;
pub mod runtime_config;

pub use logging::init_tracing;
pub use runtime_config::{load_config, LoggingConfig, RuntimeConfig, SchedulerConfig};
