//! Timed, cancellable, and raced waits
//!
//! The three coordination primitives the driver is built from:
//!
//! - [`timed`] bounds one asynchronous operation with an optional deadline
//! - [`Waiter`] turns the next occurrence of a signal into a cancellable
//!   awaitable
//! - [`race`] settles with the first of several waiters and guarantees that
//!   every losing subscription and the timer are released
//!
//! Cleanup rides on `Drop`: a `Waiter` deregisters its bus subscription when
//! dropped, so the race combinator (and any caller that abandons a wait, for
//! whatever reason) cannot leak subscriptions.

use std::time::Duration;

use futures_util::future::select_all;
use tokio::sync::oneshot;

use odemon_core::prelude::*;
use odemon_core::{Signal, SignalEvent};

use crate::bus::EventBus;

/// Bound `fut` by `deadline`.
///
/// A zero deadline means "no timeout": the future is awaited directly and no
/// timer is created. Otherwise the elapse of the deadline fails the wait with
/// [`Error::Timeout`]; the timer is dropped the moment either side settles.
pub async fn timed<F, T>(deadline: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    if deadline.is_zero() {
        return fut.await;
    }
    match tokio::time::timeout(deadline, fut).await {
        Ok(outcome) => outcome,
        Err(_) => Err(Error::timeout(deadline)),
    }
}

/// Maps a settling event to the error a failure-waiter reports.
pub type ErrorFactory = fn(SignalEvent) -> Error;

/// A pending wait for exactly one occurrence of a signal.
///
/// Settles at most once: the bus removes the subscription entry before
/// fulfilling it, so later occurrences of the signal cannot re-settle the
/// waiter. [`cancel`](Self::cancel) detaches the subscription without
/// resolving or rejecting; it is idempotent and a no-op after settlement.
/// Dropping an unsettled waiter cancels it.
pub struct Waiter {
    bus: EventBus,
    signal: Signal,
    id: u64,
    rx: Option<oneshot::Receiver<SignalEvent>>,
    make_error: Option<ErrorFactory>,
}

impl Waiter {
    /// Wait for `signal`; settle `Ok` with the event that carried it.
    pub fn resolve_on(bus: &EventBus, signal: Signal) -> Self {
        Self::new(bus, signal, None)
    }

    /// Wait for `signal`; settle `Err` with the error `make_error` builds
    /// from the event. This expresses "this signal means failure", e.g. an
    /// unexpected process exit while waiting for readiness.
    pub fn fail_on(bus: &EventBus, signal: Signal, make_error: ErrorFactory) -> Self {
        Self::new(bus, signal, Some(make_error))
    }

    fn new(bus: &EventBus, signal: Signal, make_error: Option<ErrorFactory>) -> Self {
        let (id, rx) = bus.register(signal);
        Self {
            bus: bus.clone(),
            signal,
            id,
            rx: Some(rx),
            make_error,
        }
    }

    /// The signal this waiter is subscribed to
    pub fn signal(&self) -> Signal {
        self.signal
    }

    /// Detach the subscription without settling. Idempotent; calling after
    /// settlement is a no-op (the bus entry is already gone).
    pub fn cancel(&mut self) {
        self.rx = None;
        self.bus.deregister(self.signal, self.id);
    }

    /// Await the next occurrence of the signal.
    ///
    /// Returns [`Error::ChannelClosed`] if the waiter was cancelled before
    /// settlement or the bus side went away.
    pub async fn wait(mut self) -> Result<SignalEvent> {
        let Some(rx) = self.rx.take() else {
            return Err(Error::ChannelClosed);
        };
        match rx.await {
            Ok(event) => match self.make_error {
                Some(make_error) => Err(make_error(event)),
                None => Ok(event),
            },
            Err(_) => Err(Error::ChannelClosed),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Race several waiters against an optional deadline.
///
/// Settles with whichever waiter settles first (value or error), or with
/// [`Error::Timeout`] if a positive deadline elapses before any of them. The
/// instant anything settles, every losing waiter is cancelled and the timer
/// cleared — no subscription from a losing waiter survives the race, on any
/// exit path.
pub async fn race(deadline: Duration, waiters: Vec<Waiter>) -> Result<SignalEvent> {
    debug_assert!(!waiters.is_empty(), "race requires at least one waiter");
    if waiters.is_empty() {
        return Err(Error::ChannelClosed);
    }

    timed(deadline, async move {
        let pending: Vec<_> = waiters.into_iter().map(|w| Box::pin(w.wait())).collect();
        let (outcome, _index, losers) = select_all(pending).await;
        // Dropping a pending wait deregisters its subscription.
        drop(losers);
        outcome
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_timed_zero_deadline_never_times_out() {
        let outcome = timed(Duration::ZERO, async {
            sleep(Duration::from_millis(50)).await;
            Ok(7)
        })
        .await;
        assert_eq!(outcome.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_timed_deadline_elapses_first() {
        let start = Instant::now();
        let outcome: Result<()> = timed(Duration::from_millis(20), async {
            sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;
        assert!(matches!(outcome, Err(Error::Timeout { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_timed_operation_wins() {
        let outcome = timed(Duration::from_secs(30), async { Ok("done") }).await;
        assert_eq!(outcome.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_timed_propagates_operation_error() {
        let outcome: Result<()> =
            timed(Duration::from_secs(30), async { Err(Error::NotRunning) }).await;
        assert!(matches!(outcome, Err(Error::NotRunning)));
    }

    #[tokio::test]
    async fn test_waiter_resolves_with_payload() {
        let bus = EventBus::new();
        let waiter = Waiter::resolve_on(&bus, Signal::ConsoleData);

        bus.publish(SignalEvent::ConsoleData("hello".into()));
        let event = waiter.wait().await.unwrap();
        assert_eq!(event.text(), Some("hello"));
    }

    #[tokio::test]
    async fn test_fail_on_waiter_builds_error_from_event() {
        let bus = EventBus::new();
        let waiter = Waiter::fail_on(&bus, Signal::ProcessExited, |ev| Error::UnexpectedExit {
            code: ev.exit_code(),
        });

        bus.publish(SignalEvent::ProcessExited { code: Some(3) });
        let outcome = waiter.wait().await;
        assert!(matches!(
            outcome,
            Err(Error::UnexpectedExit { code: Some(3) })
        ));
    }

    #[tokio::test]
    async fn test_cancel_detaches_and_is_idempotent() {
        let bus = EventBus::new();
        let mut waiter = Waiter::resolve_on(&bus, Signal::DriverStopped);
        assert_eq!(bus.waiter_count(Signal::DriverStopped), 1);

        waiter.cancel();
        waiter.cancel();
        assert_eq!(bus.waiter_count(Signal::DriverStopped), 0);

        bus.publish(SignalEvent::DriverStopped);
        assert!(matches!(waiter.wait().await, Err(Error::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_drop_deregisters() {
        let bus = EventBus::new();
        {
            let _waiter = Waiter::resolve_on(&bus, Signal::DriverInitialized);
            assert_eq!(bus.waiter_count(Signal::DriverInitialized), 1);
        }
        assert_eq!(bus.waiter_count(Signal::DriverInitialized), 0);
    }

    #[tokio::test]
    async fn test_race_first_settlement_wins_and_cancels_losers() {
        let bus = EventBus::new();
        let ready = Waiter::resolve_on(&bus, Signal::DriverInitialized);
        let exited = Waiter::fail_on(&bus, Signal::ProcessExited, |ev| Error::UnexpectedExit {
            code: ev.exit_code(),
        });

        let bus2 = bus.clone();
        let publisher = tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            bus2.publish(SignalEvent::DriverInitialized);
        });

        let outcome = race(Duration::from_secs(30), vec![ready, exited]).await;
        publisher.await.unwrap();

        assert_eq!(outcome.unwrap(), SignalEvent::DriverInitialized);
        // The losing subscription was cancelled exactly when the race settled.
        assert_eq!(bus.waiter_count(Signal::ProcessExited), 0);
        assert_eq!(bus.waiter_count(Signal::DriverInitialized), 0);

        // A late occurrence of the losing signal settles nothing.
        bus.publish(SignalEvent::ProcessExited { code: Some(1) });
        assert_eq!(bus.waiter_count(Signal::ProcessExited), 0);
    }

    #[tokio::test]
    async fn test_race_error_settlement_wins() {
        let bus = EventBus::new();
        let ready = Waiter::resolve_on(&bus, Signal::DriverInitialized);
        let exited = Waiter::fail_on(&bus, Signal::ProcessExited, |ev| Error::UnexpectedExit {
            code: ev.exit_code(),
        });

        bus.publish(SignalEvent::ProcessExited { code: None });
        let outcome = race(Duration::from_secs(30), vec![ready, exited]).await;
        assert!(matches!(outcome, Err(Error::UnexpectedExit { code: None })));
        assert_eq!(bus.waiter_count(Signal::DriverInitialized), 0);
    }

    #[tokio::test]
    async fn test_race_timeout_cancels_everything() {
        let bus = EventBus::new();
        let ready = Waiter::resolve_on(&bus, Signal::DriverInitialized);
        let exited = Waiter::resolve_on(&bus, Signal::ProcessExited);

        let outcome = race(Duration::from_millis(20), vec![ready, exited]).await;
        assert!(matches!(outcome, Err(Error::Timeout { .. })));
        assert_eq!(bus.waiter_count(Signal::DriverInitialized), 0);
        assert_eq!(bus.waiter_count(Signal::ProcessExited), 0);
    }

    #[tokio::test]
    async fn test_race_zero_deadline_waits_indefinitely() {
        let bus = EventBus::new();
        let stopped = Waiter::resolve_on(&bus, Signal::DriverStopped);

        let bus2 = bus.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            bus2.publish(SignalEvent::DriverStopped);
        });

        let outcome = race(Duration::ZERO, vec![stopped]).await;
        assert_eq!(outcome.unwrap(), SignalEvent::DriverStopped);
    }

    #[tokio::test]
    async fn test_race_empty_set_is_rejected() {
        // debug_assert fires in debug builds; the release behavior is a
        // definitive error rather than a hang.
        let outcome = std::panic::AssertUnwindSafe(race(Duration::from_millis(10), Vec::new()));
        let outcome = futures_util::FutureExt::catch_unwind(outcome).await;
        match outcome {
            Ok(settled) => assert!(settled.is_err()),
            Err(_) => {} // debug_assert panic
        }
    }
}
