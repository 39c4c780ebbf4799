//! # odemon-core - Domain Types
//!
//! Shared types for odemon: the error type, the signal/event model, and the
//! logging bootstrap. The `odemon-driver` crate builds the coordination
//! primitives and the process driver on top of these.
//!
//! ## Public API
//!
//! - [`Error`] / [`Result`] - typed driver errors ([`error`])
//! - [`Signal`] / [`SignalEvent`] - named signals and their payloads ([`signal`])
//! - [`logging::init()`] - tracing subscriber setup
//! - [`prelude`] - common imports for downstream crates

pub mod error;
pub mod logging;
pub mod prelude;
pub mod signal;

pub use error::{Error, Result, ResultExt};
pub use signal::{Signal, SignalEvent};
