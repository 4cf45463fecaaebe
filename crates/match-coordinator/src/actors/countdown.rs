//! Countdown sequencer.
//!
//! A single-shot, cancellable timer that ticks once per whole second from
//! `ceil(duration)` down to zero and then commits. It never looks at the
//! quorum; the room actor cancels it as soon as the quorum is lost.
//!
//! Callbacks run on the countdown's own task, one at a time, in real-time
//! order. Exactly one of `on_commit` and `on_cancel` is ever invoked.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Receives countdown callbacks.
pub trait CountdownObserver: Send + 'static {
    fn on_tick(&mut self, seconds_remaining: u32);
    fn on_commit(&mut self);
    fn on_cancel(&mut self);
}

/// Callback payload for observers that prefer a single entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownSignal {
    Tick(u32),
    Commit,
    Cancel,
}

impl<F> CountdownObserver for F
where
    F: FnMut(CountdownSignal) + Send + 'static,
{
    fn on_tick(&mut self, seconds_remaining: u32) {
        self(CountdownSignal::Tick(seconds_remaining));
    }

    fn on_commit(&mut self) {
        self(CountdownSignal::Commit);
    }

    fn on_cancel(&mut self) {
        self(CountdownSignal::Cancel);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CountdownState {
    #[default]
    Idle,
    Running {
        remaining_seconds: u32,
    },
    Committed,
    Cancelled,
}

/// Whole seconds the countdown starts from.
#[must_use]
pub fn whole_seconds(duration: Duration) -> u32 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    u32::try_from(secs).unwrap_or(u32::MAX)
}

/// A running (or finished) countdown.
#[derive(Debug)]
pub struct Countdown {
    cancel_token: CancellationToken,
    state: watch::Receiver<CountdownState>,
    task: JoinHandle<()>,
}

impl Countdown {
    /// Start a countdown on a new task.
    pub fn start<O: CountdownObserver>(duration: Duration, observer: O) -> Self {
        let from = whole_seconds(duration);
        let cancel_token = CancellationToken::new();
        let (state_tx, state) = watch::channel(CountdownState::Running {
            remaining_seconds: from,
        });

        let task = tokio::spawn(run(from, observer, cancel_token.clone(), state_tx));

        Self {
            cancel_token,
            state,
            task,
        }
    }

    /// Cancel the countdown. Idempotent; does nothing once committed.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn state(&self) -> CountdownState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self.state(), CountdownState::Running { .. })
    }

    /// Wait for the countdown task to finish.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            debug!(target: "qm.room.countdown", error = %e, "Countdown task ended abnormally");
        }
    }
}

async fn run<O: CountdownObserver>(
    from: u32,
    mut observer: O,
    cancel_token: CancellationToken,
    state: watch::Sender<CountdownState>,
) {
    let mut remaining = from;
    let mut next_tick = Instant::now();

    loop {
        // Checked before every callback so a cancel that raced the timer
        // never produces a ghost tick.
        if cancel_token.is_cancelled() {
            state.send_replace(CountdownState::Cancelled);
            observer.on_cancel();
            debug!(target: "qm.room.countdown", remaining, "Countdown cancelled");
            return;
        }

        state.send_replace(CountdownState::Running {
            remaining_seconds: remaining,
        });
        trace!(target: "qm.room.countdown", remaining, "Countdown tick");
        observer.on_tick(remaining);

        if remaining == 0 {
            state.send_replace(CountdownState::Committed);
            observer.on_commit();
            debug!(target: "qm.room.countdown", from, "Countdown committed");
            return;
        }

        next_tick += TICK_INTERVAL;
        tokio::select! {
            biased;
            () = cancel_token.cancelled() => {}
            () = tokio::time::sleep_until(next_tick) => {
                remaining -= 1;
            }
        }
    }
}
