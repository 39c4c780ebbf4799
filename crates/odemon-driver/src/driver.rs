//! Tool lifecycle driver
//!
//! [`ProcessDriver`] owns the subprocess handle and drives it through an
//! explicit state machine: `Stopped → Starting → Initialized → Stopping →
//! Stopped`. Transitions happen only inside the driver's own methods; the
//! background tasks report outcomes exclusively through bus signals and the
//! process handle's exit flag, keeping a single writer for all lifecycle
//! state.
//!
//! `start()` confirms readiness by racing the `driver:initialized` waiter
//! against a `process:exited` failure waiter under the start timeout.
//! `stop()` sends the quit command and waits for the exit signal; on timeout
//! it escalates to a forced kill and retries the wait under the kill grace
//! period. Both always leave the driver in a definitive state.

use std::time::Duration;

use tokio::sync::mpsc;

use odemon_core::prelude::*;
use odemon_core::{Signal, SignalEvent};

use crate::bus::EventBus;
use crate::classify::LineClassifier;
use crate::config::DriverConfig;
use crate::process::{ProcessEvent, ToolProcess};
use crate::wait::{race, timed, Waiter};

/// Lifecycle state of a [`ProcessDriver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Stopped,
    Starting,
    Initialized,
    Stopping,
}

impl std::fmt::Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DriverState::Stopped => "stopped",
            DriverState::Starting => "starting",
            DriverState::Initialized => "initialized",
            DriverState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Drives one interactive REPL tool through its lifecycle.
pub struct ProcessDriver {
    config: DriverConfig,
    bus: EventBus,
    process: Option<ToolProcess>,
    state: DriverState,
}

impl ProcessDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            bus: EventBus::new(),
            process: None,
            state: DriverState::Stopped,
        }
    }

    /// The bus this driver publishes on. Clone it (cheap) or call
    /// [`EventBus::watch`] to observe `console:*` and `driver:*` signals.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Whether a live subprocess handle exists.
    pub fn is_running(&self) -> bool {
        self.process.as_ref().is_some_and(ToolProcess::is_running)
    }

    pub fn is_initialized(&self) -> bool {
        self.state == DriverState::Initialized && self.is_running()
    }

    /// Test-only access to the live process handle.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn process_mut(&mut self) -> Option<&mut ToolProcess> {
        self.process.as_mut()
    }

    /// Validated state transition. Illegal transitions are logged and
    /// rejected rather than silently overwriting the current state.
    fn transition(&mut self, to: DriverState) {
        use DriverState::*;
        let legal = matches!(
            (self.state, to),
            (Stopped, Starting)
                | (Starting, Initialized)
                | (Starting, Stopped)
                | (Starting, Stopping)
                | (Initialized, Stopping)
                | (Stopping, Stopped)
        );
        if legal {
            debug!("driver state: {} -> {}", self.state, to);
            self.state = to;
        } else {
            warn!("illegal driver state transition {} -> {}, ignoring", self.state, to);
        }
    }

    /// Start the tool and wait for its ready marker.
    ///
    /// If a subprocess is already live, a full [`stop`](Self::stop) runs
    /// first — at most one handle is live per driver. Fails with
    /// [`Error::UnexpectedExit`] if the tool exits before the marker, or
    /// [`Error::Timeout`] if the readiness race exceeds the configured start
    /// timeout; on any failure the driver ends up `Stopped`, never stuck in
    /// `Starting`.
    pub async fn start(&mut self) -> Result<()> {
        self.start_with_timeout(self.config.start_timeout()).await
    }

    /// [`start`](Self::start) with an explicit deadline (zero = unbounded).
    pub async fn start_with_timeout(&mut self, deadline: Duration) -> Result<()> {
        if self.process.is_some() {
            info!("start requested while a tool process is live, stopping it first");
            self.stop().await?;
        }
        self.transition(DriverState::Starting);

        let (event_tx, event_rx) = mpsc::channel::<ProcessEvent>(64);
        let process = match ToolProcess::spawn(&self.config, event_tx) {
            Ok(process) => process,
            Err(e) => {
                self.transition(DriverState::Stopped);
                return Err(e);
            }
        };
        self.process = Some(process);

        // Register both waiters before the pump starts publishing, so neither
        // a fast prompt nor a fast crash can slip past the race.
        let ready = Waiter::resolve_on(&self.bus, Signal::DriverInitialized);
        let exited = Waiter::fail_on(&self.bus, Signal::ProcessExited, |ev| {
            Error::UnexpectedExit {
                code: ev.exit_code(),
            }
        });

        tokio::spawn(pump(
            event_rx,
            self.bus.clone(),
            LineClassifier::new(&self.config.ready_marker),
        ));

        match race(deadline, vec![ready, exited]).await {
            Ok(_) => {
                info!("tool is initialized and accepting commands");
                self.transition(DriverState::Initialized);
                Ok(())
            }
            Err(e) => {
                warn!("tool failed to initialize: {}", e);
                if let Some(mut process) = self.process.take() {
                    process.force_kill();
                }
                self.transition(DriverState::Stopped);
                Err(e)
            }
        }
    }

    /// Stop the tool.
    ///
    /// Sends the quit command and waits for the exit signal. A graceful-wait
    /// timeout is recoverable: the driver force-kills and retries the wait
    /// under the kill grace period; if even that times out it logs and
    /// proceeds. Always ends `Stopped` with the handle cleared. Calling with
    /// no subprocess is a successful no-op.
    pub async fn stop(&mut self) -> Result<()> {
        self.stop_with_timeout(self.config.stop_timeout()).await
    }

    /// [`stop`](Self::stop) with an explicit deadline (zero = unbounded).
    pub async fn stop_with_timeout(&mut self, deadline: Duration) -> Result<()> {
        let Some(mut process) = self.process.take() else {
            debug!("stop requested with no tool process, nothing to do");
            return Ok(());
        };
        self.transition(DriverState::Stopping);

        if process.has_exited() {
            info!("tool process already exited");
            self.transition(DriverState::Stopped);
            return Ok(());
        }

        // Register before sending quit, so a fast exit cannot be missed.
        let exit = Waiter::resolve_on(&self.bus, Signal::ProcessExited);

        match process.send(&self.config.quit_command).await {
            Ok(()) => self
                .bus
                .publish(SignalEvent::ConsoleWrite(self.config.quit_command.clone())),
            Err(e) => warn!("failed to send quit command (continuing to wait): {}", e),
        }

        match timed(deadline, exit.wait()).await {
            Ok(_) => info!("tool exited gracefully"),
            Err(Error::Timeout { .. }) => {
                warn!("timeout waiting for graceful exit, force killing");
                process.force_kill();

                let grace = self.config.kill_grace();
                match timed(grace, async {
                    process.wait_exit().await;
                    Ok(())
                })
                .await
                {
                    Ok(()) => info!("tool exited after force kill"),
                    Err(_) => warn!(
                        "tool did not confirm exit within {:?} after force kill",
                        grace
                    ),
                }
            }
            Err(e) => warn!("exit wait failed (continuing): {}", e),
        }

        self.transition(DriverState::Stopped);
        Ok(())
    }

    /// Write one command line to the tool's stdin.
    ///
    /// Fails with [`Error::NotRunning`] when no live handle exists and with
    /// [`Error::WriteFailure`] when the write is rejected. On success the
    /// exact text written is published as `console:write`.
    pub async fn send_command(&self, text: &str) -> Result<()> {
        let process = self.process.as_ref().ok_or(Error::NotRunning)?;
        if process.has_exited() {
            return Err(Error::NotRunning);
        }

        process.send(text).await?;
        self.bus.publish(SignalEvent::ConsoleWrite(text.to_string()));
        Ok(())
    }
}

/// Single consumer of raw process events: classifies stdout in arrival order
/// and publishes the resulting signals. Ends after forwarding the exit, which
/// it reports as `process:exited` followed by `driver:stopped` — each exactly
/// once per process instance.
async fn pump(
    mut event_rx: mpsc::Receiver<ProcessEvent>,
    bus: EventBus,
    mut classifier: LineClassifier,
) {
    while let Some(event) = event_rx.recv().await {
        match event {
            ProcessEvent::StdoutChunk(chunk) => {
                for signal_event in classifier.push_chunk(&chunk) {
                    bus.publish(signal_event);
                }
            }
            ProcessEvent::StderrLine(line) => {
                let line = line.trim();
                if !line.is_empty() {
                    bus.publish(SignalEvent::ConsoleError(line.to_string()));
                }
            }
            ProcessEvent::Exited { code } => {
                for signal_event in classifier.flush() {
                    bus.publish(signal_event);
                }
                bus.publish(SignalEvent::ProcessExited { code });
                bus.publish(SignalEvent::DriverStopped);
                break;
            }
        }
    }
    debug!("event pump finished");
}
