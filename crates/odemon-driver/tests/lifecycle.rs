//! End-to-end lifecycle tests driving scripted `sh` stand-ins for the tool.

use std::time::Duration;

use tokio::sync::broadcast;

use odemon_core::{Error, Signal, SignalEvent};
use odemon_driver::test_utils::{crashing_tool, prompt_tool, silent_tool, stubborn_tool};
use odemon_driver::{DriverState, ProcessDriver};

/// Drain `rx` until an event for `signal` arrives, within an overall bound.
async fn expect_signal(
    rx: &mut broadcast::Receiver<SignalEvent>,
    signal: Signal,
) -> SignalEvent {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            let event = rx.recv().await.expect("bus closed while waiting");
            if event.signal() == signal {
                return event;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("did not observe {} in time", signal))
}

#[tokio::test]
async fn start_then_stop_ends_stopped_with_no_handle() {
    let mut driver = ProcessDriver::new(prompt_tool());
    let mut events = driver.bus().watch();

    driver.start().await.expect("start should succeed");
    assert_eq!(driver.state(), DriverState::Initialized);
    assert!(driver.is_running());
    assert!(driver.is_initialized());

    expect_signal(&mut events, Signal::DriverInitialized).await;

    driver.stop().await.expect("stop should succeed");
    assert_eq!(driver.state(), DriverState::Stopped);
    assert!(!driver.is_running());
    assert!(!driver.is_initialized());

    expect_signal(&mut events, Signal::DriverStopped).await;
}

#[tokio::test]
async fn start_fails_when_tool_exits_before_ready_marker() {
    let mut driver = ProcessDriver::new(crashing_tool(7));

    let outcome = driver.start().await;
    assert!(matches!(
        outcome,
        Err(Error::UnexpectedExit { code: Some(7) })
    ));
    assert_eq!(driver.state(), DriverState::Stopped);
    assert!(!driver.is_running());
}

#[tokio::test]
async fn start_fails_with_timeout_when_marker_never_appears() {
    let mut driver = ProcessDriver::new(silent_tool());

    let outcome = driver
        .start_with_timeout(Duration::from_millis(100))
        .await;
    assert!(matches!(outcome, Err(Error::Timeout { .. })));
    assert_eq!(driver.state(), DriverState::Stopped);
    assert!(!driver.is_running());

    // The readiness race must not leave subscriptions behind.
    assert_eq!(driver.bus().waiter_count(Signal::DriverInitialized), 0);
    assert_eq!(driver.bus().waiter_count(Signal::ProcessExited), 0);
}

#[tokio::test]
async fn stop_without_start_is_a_successful_noop() {
    let mut driver = ProcessDriver::new(prompt_tool());
    driver.stop().await.expect("stop with no process is Ok");
    assert_eq!(driver.state(), DriverState::Stopped);
}

#[tokio::test]
async fn stop_escalates_to_force_kill_when_quit_is_ignored() {
    let mut driver = ProcessDriver::new(stubborn_tool());
    driver.start().await.expect("start should succeed");

    driver
        .stop_with_timeout(Duration::from_millis(150))
        .await
        .expect("stop should succeed via escalation");
    assert_eq!(driver.state(), DriverState::Stopped);
    assert!(!driver.is_running());
}

#[tokio::test]
async fn stop_reaches_stopped_even_without_kill_confirmation() {
    let mut config = stubborn_tool();
    config.kill_grace_ms = 150;
    let mut driver = ProcessDriver::new(config);
    driver.start().await.expect("start should succeed");

    // Hold the kill channel so the forced termination never reaches the
    // wait task and its exit confirmation never arrives.
    let held_kill = driver
        .process_mut()
        .expect("live process")
        .take_kill_channel();
    assert!(held_kill.is_some());

    driver
        .stop_with_timeout(Duration::from_millis(150))
        .await
        .expect("stop must proceed to a terminal state");
    assert_eq!(driver.state(), DriverState::Stopped);
    assert!(!driver.is_running());

    // Releasing the channel lets the wait task tear the child down.
    drop(held_kill);
}

#[tokio::test]
async fn failed_write_surfaces_write_failure_without_console_write() {
    let mut config = prompt_tool();
    // Tool closes its own stdin before printing the prompt, so every write
    // after startup hits a pipe with no reader.
    config.args[1] = r#"exec 0<&-
echo "(ocd)"
exec sleep 60"#
        .to_string();

    let mut driver = ProcessDriver::new(config);
    let mut events = driver.bus().watch();
    driver.start().await.expect("start should succeed");

    let outcome = driver.send_command("step").await;
    assert!(matches!(outcome, Err(Error::WriteFailure { .. })));

    driver
        .stop_with_timeout(Duration::from_millis(150))
        .await
        .expect("stop should succeed via escalation");
    assert_eq!(driver.state(), DriverState::Stopped);

    while let Ok(event) = events.try_recv() {
        assert_ne!(
            event.signal(),
            Signal::ConsoleWrite,
            "console:write must not fire for a failed write"
        );
    }
}

#[tokio::test]
async fn send_command_round_trips_through_the_tool() {
    let mut driver = ProcessDriver::new(prompt_tool());
    let mut events = driver.bus().watch();
    driver.start().await.expect("start should succeed");

    driver.send_command("step").await.expect("write should succeed");

    let write = expect_signal(&mut events, Signal::ConsoleWrite).await;
    assert_eq!(write.text(), Some("step"));

    // The scripted tool echoes every non-quit command back.
    let deadline = Duration::from_secs(5);
    let echoed = tokio::time::timeout(deadline, async {
        loop {
            let event = events.recv().await.expect("bus closed");
            if event.signal() == Signal::ConsoleData && event.text() == Some("> step") {
                return event;
            }
        }
    })
    .await;
    assert!(echoed.is_ok(), "expected the tool to echo the command");

    driver.stop().await.unwrap();
}

#[tokio::test]
async fn send_command_without_process_publishes_nothing() {
    let driver = ProcessDriver::new(prompt_tool());
    let mut events = driver.bus().watch();

    let outcome = driver.send_command("step").await;
    assert!(matches!(outcome, Err(Error::NotRunning)));

    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
}

#[tokio::test]
async fn send_command_after_tool_crash_fails_not_running() {
    let mut driver = ProcessDriver::new(prompt_tool());
    let mut events = driver.bus().watch();
    driver.start().await.expect("start should succeed");

    // Ask the tool to quit directly, bypassing stop(), then wait for the
    // exit signal. The driver still holds the (dead) handle.
    driver.send_command("quit").await.unwrap();
    expect_signal(&mut events, Signal::ProcessExited).await;

    let outcome = driver.send_command("step").await;
    assert!(matches!(outcome, Err(Error::NotRunning)));

    driver.stop().await.unwrap();
    assert_eq!(driver.state(), DriverState::Stopped);
}

#[tokio::test]
async fn stderr_lines_surface_as_console_error() {
    let mut config = prompt_tool();
    config.args[1] = r#"echo "flash warning" >&2
echo "(ocd)"
while read line; do
  if [ "$line" = quit ]; then exit 0; fi
done"#
        .to_string();

    let mut driver = ProcessDriver::new(config);
    let mut events = driver.bus().watch();
    driver.start().await.expect("start should succeed");

    let error = expect_signal(&mut events, Signal::ConsoleError).await;
    assert_eq!(error.text(), Some("flash warning"));

    driver.stop().await.unwrap();
}

#[tokio::test]
async fn restart_stops_the_previous_process_first() {
    let mut driver = ProcessDriver::new(prompt_tool());
    driver.start().await.expect("first start");
    assert!(driver.is_initialized());

    // A second start must fully stop the live process before spawning.
    driver.start().await.expect("second start");
    assert_eq!(driver.state(), DriverState::Initialized);
    assert!(driver.is_running());

    driver.stop().await.unwrap();
    assert_eq!(driver.state(), DriverState::Stopped);
}

#[tokio::test]
async fn driver_stopped_fires_once_per_process_instance() {
    let mut driver = ProcessDriver::new(prompt_tool());
    let mut events = driver.bus().watch();

    driver.start().await.unwrap();
    driver.stop().await.unwrap();

    expect_signal(&mut events, Signal::DriverStopped).await;

    // No second stop signal for the same instance.
    let extra = tokio::time::timeout(Duration::from_millis(300), async {
        loop {
            let event = events.recv().await.expect("bus closed");
            if event.signal() == Signal::DriverStopped {
                return event;
            }
        }
    })
    .await;
    assert!(extra.is_err(), "driver:stopped fired more than once");
}

#[tokio::test]
async fn repeated_cycles_leave_no_subscriptions_behind() {
    let mut driver = ProcessDriver::new(prompt_tool());

    for _ in 0..3 {
        driver.start().await.expect("start should succeed");
        driver.stop().await.expect("stop should succeed");
    }

    for signal in [
        Signal::DriverInitialized,
        Signal::DriverStopped,
        Signal::ProcessExited,
    ] {
        assert_eq!(driver.bus().waiter_count(signal), 0, "leaked {}", signal);
    }
}
