//! Output classification for the driven tool
//!
//! Raw stdout chunks are split into newline-delimited lines, trimmed, and
//! matched against the classifier's table of recognized exact lines. Every
//! non-empty line becomes a `console:data` event; the ready marker
//! additionally fires `driver:initialized`, once. Anything else is a
//! diagnostic, never an error, so output the classifier does not yet
//! understand cannot fail a run.

use odemon_core::prelude::*;
use odemon_core::SignalEvent;

/// Default ready prompt of the driven tool
pub const DEFAULT_READY_MARKER: &str = "(ocd)";

/// Stateful chunk-to-event classifier.
///
/// Keeps an unterminated tail buffered between chunks so a line split across
/// reads is reassembled before classification. The initialization latch makes
/// `driver:initialized` fire exactly once per classifier instance, no matter
/// how often the marker appears.
#[derive(Debug)]
pub struct LineClassifier {
    ready_marker: String,
    buffer: String,
    initialized: bool,
}

impl LineClassifier {
    pub fn new(ready_marker: impl Into<String>) -> Self {
        Self {
            ready_marker: ready_marker.into(),
            buffer: String::new(),
            initialized: false,
        }
    }

    /// Whether the ready marker has been seen.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Feed one raw chunk; returns the events it produced, in line order.
    ///
    /// An interactive prompt usually arrives without a trailing newline, so a
    /// buffered tail that trims to exactly the ready marker is classified
    /// immediately instead of waiting for a newline that never comes.
    pub fn push_chunk(&mut self, chunk: &str) -> Vec<SignalEvent> {
        let mut events = Vec::new();
        self.buffer.push_str(chunk);

        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            self.classify_line(line.trim(), &mut events);
        }

        if self.buffer.trim() == self.ready_marker {
            self.buffer.clear();
            let marker = self.ready_marker.clone();
            self.classify_line(&marker, &mut events);
        }

        events
    }

    /// Drain a buffered tail (used at stream end).
    pub fn flush(&mut self) -> Vec<SignalEvent> {
        let tail = std::mem::take(&mut self.buffer);
        let mut events = Vec::new();
        self.classify_line(tail.trim(), &mut events);
        events
    }

    fn classify_line(&mut self, line: &str, events: &mut Vec<SignalEvent>) {
        if line.is_empty() {
            return;
        }

        events.push(SignalEvent::ConsoleData(line.to_string()));

        if line == self.ready_marker {
            if !self.initialized {
                self.initialized = true;
                events.push(SignalEvent::DriverInitialized);
            }
        } else {
            debug!("unclassified tool output: {}", line);
        }
    }
}
