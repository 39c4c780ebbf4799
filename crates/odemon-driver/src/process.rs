//! Tool subprocess management
//!
//! [`ToolProcess`] owns the spawned REPL tool. The `Child` handle is moved
//! into a dedicated `wait_for_exit` background task that calls `child.wait()`,
//! so the real exit code is captured and emitted as
//! [`ProcessEvent::Exited`] exactly once. The handle retains a kill channel
//! for force-kill requests, an atomic flag for synchronous `has_exited()`
//! checks, and a [`Notify`] so callers can await the exit without holding a
//! lock across `.await`.
//!
//! Stdout is read in raw chunks rather than lines: an interactive prompt ends
//! without a newline and must still reach the classifier.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Notify};

use odemon_core::prelude::*;

use crate::config::DriverConfig;

/// Raw occurrences reported by the reader/wait tasks, consumed in order by
/// the driver's event pump.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// A raw stdout chunk (UTF-8, possibly a partial line)
    StdoutChunk(String),
    /// One stderr line
    StderrLine(String),
    /// The process exited; emitted exactly once
    Exited { code: Option<i32> },
}

/// One queued stdin command and the channel that reports its write outcome.
struct StdinCommand {
    line: String,
    ack: oneshot::Sender<Result<()>>,
}

/// Handle to a running tool subprocess.
pub struct ToolProcess {
    /// Sender for stdin command lines
    stdin_tx: mpsc::Sender<StdinCommand>,
    /// Process ID for logging
    pid: Option<u32>,
    /// One-shot sender that tells the wait task to force-kill the process.
    /// Consumed on first use (or on drop).
    kill_tx: Option<oneshot::Sender<()>>,
    /// Set to `true` by the wait task once the child has exited.
    exited: Arc<AtomicBool>,
    /// Notified by the wait task immediately after the child exits.
    exit_notify: Arc<Notify>,
}

impl ToolProcess {
    /// Spawn the configured tool with piped stdio.
    ///
    /// Events flow to `event_tx` for consumption by the driver's pump task.
    pub fn spawn(config: &DriverConfig, event_tx: mpsc::Sender<ProcessEvent>) -> Result<Self> {
        let program = config.resolve_program()?;

        info!(
            "Spawning tool: {} {}",
            program.display(),
            config.args.join(" ")
        );

        let mut child = Command::new(&program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true) // Critical: cleanup on drop
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::tool_not_found(&config.program)
                } else {
                    Error::process_spawn(e.to_string())
                }
            })?;

        let pid = child.id();
        info!("Tool process started with PID: {:?}", pid);

        // Take ownership of stdin and create the command channel
        let stdin = child.stdin.take().expect("stdin was configured");
        let (stdin_tx, stdin_rx) = mpsc::channel::<StdinCommand>(32);
        tokio::spawn(Self::stdin_writer(stdin, stdin_rx));

        // Chunked stdout reader (no Exited emission — that's the wait task's job)
        let stdout = child.stdout.take().expect("stdout was configured");
        tokio::spawn(Self::stdout_reader(stdout, event_tx.clone()));

        // Line-based stderr reader
        let stderr = child.stderr.take().expect("stderr was configured");
        tokio::spawn(Self::stderr_reader(stderr, event_tx.clone()));

        // Shared exit-state primitives
        let exited = Arc::new(AtomicBool::new(false));
        let exit_notify = Arc::new(Notify::new());

        // Kill channel: ToolProcess holds the sender, wait task the receiver.
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        // Dedicated wait task — takes ownership of `child`.
        tokio::spawn(Self::wait_for_exit(
            child,
            kill_rx,
            event_tx,
            Arc::clone(&exited),
            Arc::clone(&exit_notify),
        ));

        Ok(Self {
            stdin_tx,
            pid,
            kill_tx: Some(kill_tx),
            exited,
            exit_notify,
        })
    }

    /// Background task: owns `child`, waits for it to exit, emits
    /// [`ProcessEvent::Exited`].
    ///
    /// Two ways the task can end:
    /// 1. The tool exits naturally — `child.wait()` resolves.
    /// 2. `kill_rx` fires — we kill the child first, then wait for it.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        event_tx: mpsc::Sender<ProcessEvent>,
        exited: Arc<AtomicBool>,
        exit_notify: Arc<Notify>,
    ) {
        let code: Option<i32> = tokio::select! {
            // Natural exit path
            result = child.wait() => {
                match result {
                    Ok(status) => {
                        info!("Tool process exited with status: {:?}", status);
                        status.code()
                    }
                    Err(e) => {
                        error!("Error waiting for tool process: {}", e);
                        None
                    }
                }
            }
            // Force-kill path: kill_tx was sent (by the driver or drop)
            _ = kill_rx => {
                info!("Kill signal received, force-killing tool process");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill tool process: {}", e);
                }
                match child.wait().await {
                    Ok(status) => {
                        info!("Tool process killed, exit status: {:?}", status);
                        status.code()
                    }
                    Err(e) => {
                        error!("Error waiting after kill: {}", e);
                        None
                    }
                }
            }
        };

        // Mark as exited and wake waiters before sending the event, so
        // `has_exited()` is already true when the event is observed.
        exited.store(true, Ordering::Release);
        exit_notify.notify_waiters();

        debug!("Sending ProcessEvent::Exited {{ code: {:?} }}", code);
        let _ = event_tx.send(ProcessEvent::Exited { code }).await;
    }

    /// Read raw chunks from stdout and forward as [`ProcessEvent::StdoutChunk`].
    async fn stdout_reader(mut stdout: tokio::process::ChildStdout, tx: mpsc::Sender<ProcessEvent>) {
        let mut buf = vec![0u8; 4096];

        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                    trace!("stdout chunk: {:?}", chunk);
                    if tx.send(ProcessEvent::StdoutChunk(chunk)).await.is_err() {
                        debug!("stdout channel closed");
                        break;
                    }
                }
                Err(e) => {
                    debug!("stdout read error: {}", e);
                    break;
                }
            }
        }

        // EOF just means the pipe closed; the wait task emits the real exit.
        info!("stdout reader finished, process likely exiting");
    }

    /// Read lines from stderr and forward as [`ProcessEvent::StderrLine`].
    async fn stderr_reader(stderr: tokio::process::ChildStderr, tx: mpsc::Sender<ProcessEvent>) {
        let mut reader = BufReader::new(stderr).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("stderr: {}", line);

            if tx.send(ProcessEvent::StderrLine(line)).await.is_err() {
                debug!("stderr channel closed");
                break;
            }
        }

        debug!("stderr reader finished");
    }

    /// Write command lines to stdin, newline-terminated and flushed.
    ///
    /// Each command is acknowledged over its `ack` channel once the flush
    /// completes (or fails), so `send()` reports the real write outcome
    /// rather than mere enqueueing.
    async fn stdin_writer(
        mut stdin: tokio::process::ChildStdin,
        mut rx: mpsc::Receiver<StdinCommand>,
    ) {
        while let Some(StdinCommand { line, ack }) = rx.recv().await {
            debug!("Sending to tool: {}", line);

            let outcome = Self::write_line(&mut stdin, &line).await;
            let failed = outcome.is_err();
            if let Err(e) = &outcome {
                error!("Failed to write to stdin: {}", e);
            }
            // The sender may have given up waiting; nothing to do then.
            let _ = ack.send(outcome.map_err(|e| Error::write_failure(e.to_string())));

            if failed {
                break;
            }
        }

        debug!("stdin writer finished");
    }

    async fn write_line(stdin: &mut tokio::process::ChildStdin, line: &str) -> std::io::Result<()> {
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }

    /// Send one command line to the tool, suspending until the write has
    /// flushed. Fails with [`Error::WriteFailure`] if the write is rejected
    /// or the writer task is gone.
    pub async fn send(&self, command: &str) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.stdin_tx
            .send(StdinCommand {
                line: command.to_string(),
                ack: ack_tx,
            })
            .await
            .map_err(|_| Error::write_failure("stdin channel closed"))?;

        match ack_rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::write_failure("stdin writer stopped")),
        }
    }

    /// Force kill the process by signalling the wait task.
    ///
    /// The wait task calls `child.kill()` then `child.wait()`, so the OS
    /// reaps the process before [`ProcessEvent::Exited`] is emitted.
    pub fn force_kill(&mut self) {
        warn!("Force killing tool process via kill channel");
        if let Some(tx) = self.kill_tx.take() {
            // Ignore send error — the wait task may have already exited naturally.
            let _ = tx.send(());
        }
    }

    /// Await process exit.
    ///
    /// Race-free: the `notified()` future is created before the final
    /// `has_exited()` check, so a notification firing in between is not lost.
    pub async fn wait_exit(&self) {
        let notified = self.exit_notify.notified();
        if self.has_exited() {
            return;
        }
        notified.await;
    }

    /// Non-blocking check whether the process has exited, backed by the
    /// atomic flag set by the wait task.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Logical complement of `has_exited()`.
    pub fn is_running(&self) -> bool {
        !self.has_exited()
    }

    /// Get the process ID
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Take the kill channel out of the handle, leaving `force_kill` with
    /// nothing to send. Lets tests drive the path where a forced termination
    /// is never confirmed. The caller must keep the returned sender alive:
    /// dropping it wakes the wait task's kill branch.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn take_kill_channel(&mut self) -> Option<oneshot::Sender<()>> {
        self.kill_tx.take()
    }
}

impl Drop for ToolProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            warn!("ToolProcess dropped while process may still be running");
            // Send the kill signal so the wait task tears the child down.
            // If kill_tx was already consumed, this is a no-op.
            if let Some(tx) = self.kill_tx.take() {
                let _ = tx.send(());
            }
        }
        // kill_on_drop(true) on the Child is the final safety net if the
        // wait task hasn't handled the kill yet.
        debug!("ToolProcess dropped");
    }
}
