//! Helpers built on the runtime

pub mod dictionary;
pub mod iteration;
pub mod timer;

pub use dictionary::{Dictionary, DictionaryActor, Transaction};
pub use iteration::{for_each_then, Done};
pub use timer::Timer;
