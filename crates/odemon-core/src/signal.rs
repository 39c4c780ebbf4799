//! Signal and event definitions
//!
//! A [`Signal`] is the name of a category of asynchronous occurrence; a
//! [`SignalEvent`] is one concrete occurrence, carrying its payload. Signals
//! are the only unit of cross-component communication: the driver publishes
//! events on the bus, waiters and observers subscribe by signal name.

use serde::{Deserialize, Serialize};

/// Named signal categories broadcast by the driver.
///
/// The `Display` strings are the wire names consumers see
/// (e.g. `console:data`, `driver:initialized`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// A trimmed stdout line from the tool
    ConsoleData,
    /// A trimmed stderr line from the tool
    ConsoleError,
    /// A command line that was just written to the tool's stdin
    ConsoleWrite,
    /// The tool emitted its ready marker for the first time
    DriverInitialized,
    /// The driver reached its terminal state for this process instance
    DriverStopped,
    /// The tool process exited (code observed, if any)
    ProcessExited,
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Signal::ConsoleData => "console:data",
            Signal::ConsoleError => "console:error",
            Signal::ConsoleWrite => "console:write",
            Signal::DriverInitialized => "driver:initialized",
            Signal::DriverStopped => "driver:stopped",
            Signal::ProcessExited => "process:exited",
        };
        f.write_str(name)
    }
}

/// One occurrence of a [`Signal`], with its payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalEvent {
    ConsoleData(String),
    ConsoleError(String),
    ConsoleWrite(String),
    DriverInitialized,
    DriverStopped,
    ProcessExited { code: Option<i32> },
}

impl SignalEvent {
    /// The signal this event is an occurrence of
    pub fn signal(&self) -> Signal {
        match self {
            SignalEvent::ConsoleData(_) => Signal::ConsoleData,
            SignalEvent::ConsoleError(_) => Signal::ConsoleError,
            SignalEvent::ConsoleWrite(_) => Signal::ConsoleWrite,
            SignalEvent::DriverInitialized => Signal::DriverInitialized,
            SignalEvent::DriverStopped => Signal::DriverStopped,
            SignalEvent::ProcessExited { .. } => Signal::ProcessExited,
        }
    }

    /// The text payload, for line-carrying events
    pub fn text(&self) -> Option<&str> {
        match self {
            SignalEvent::ConsoleData(s)
            | SignalEvent::ConsoleError(s)
            | SignalEvent::ConsoleWrite(s) => Some(s),
            _ => None,
        }
    }

    /// The exit code payload, for `process:exited`
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            SignalEvent::ProcessExited { code } => *code,
            _ => None,
        }
    }
}
