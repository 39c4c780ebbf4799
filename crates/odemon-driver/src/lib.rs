//! # odemon-driver - Tool Lifecycle Driver
//!
//! Launches and controls an interactive debugger-style REPL subprocess,
//! feeding it line-oriented commands and interpreting its output as a stream
//! of typed signals. Built from three coordination primitives that guarantee
//! no timer or subscription survives a settled wait.
//!
//! Depends on [`odemon_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Coordination primitives
//! - [`timed()`] - bound an async operation with an optional deadline
//! - [`Waiter`] - cancellable wait for one occurrence of a signal
//! - [`race()`] - first-settlement race with guaranteed cleanup
//! - [`EventBus`] - named-signal broadcaster the waiters subscribe to
//!
//! ### Driving a tool
//! - [`ProcessDriver`] - `start` / `stop` / `send_command` over the lifecycle
//!   state machine ([`DriverState`])
//! - [`DriverConfig`] - executable, launch args, markers, timeouts
//! - [`LineClassifier`] - chunk-to-signal output classification
//! - [`ToolProcess`] / [`ProcessEvent`] - the owned subprocess handle

pub mod bus;
pub mod classify;
pub mod config;
pub mod driver;
pub mod process;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;
pub mod wait;

// Public API re-exports
pub use bus::EventBus;
pub use classify::{LineClassifier, DEFAULT_READY_MARKER};
pub use config::DriverConfig;
pub use driver::{DriverState, ProcessDriver};
pub use process::{ProcessEvent, ToolProcess};
pub use wait::{race, timed, Waiter};

/// Re-exported from `odemon_core` for convenience. Canonical import:
/// `odemon_core::{Signal, SignalEvent}`.
pub use odemon_core::{Signal, SignalEvent};
