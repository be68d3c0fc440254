//! Countdown clocks for Parley's actor loops.
//!
//! A [`TickClock`] fires at a fixed rate (1 Hz for lobby countdowns) and
//! can be paused while nothing is counting down. A [`Countdown`] is the
//! per-record remaining-seconds counter the clock drives.
//!
//! The clock sits inside an actor's `tokio::select!` loop, so stopping or
//! pausing it is just another command handled on the same queue:
//!
//! ```ignore
//! loop {
//!     tokio::select! {
//!         Some(cmd) = cmd_rx.recv() => { /* may call clock.pause() */ }
//!         tick = clock.wait_for_tick() => { coordinator.tick(); }
//!     }
//! }
//! ```

use std::time::Duration;

use tokio::time::{self, Instant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Tick rate in Hz. 0 = idle (the clock never fires).
    pub tick_rate_hz: u32,
    /// Start paused; the first tick comes one period after `resume()`.
    pub start_paused: bool,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 1,
            start_paused: false,
        }
    }
}

impl TickConfig {
    pub const MAX_TICK_RATE_HZ: u32 = 128;

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Clamps the rate to [`Self::MAX_TICK_RATE_HZ`].
    pub fn validated(mut self) -> Self {
        if self.tick_rate_hz > Self::MAX_TICK_RATE_HZ {
            warn!(
                rate = self.tick_rate_hz,
                max = Self::MAX_TICK_RATE_HZ,
                "tick_rate_hz exceeds maximum, clamping"
            );
            self.tick_rate_hz = Self::MAX_TICK_RATE_HZ;
        }
        self
    }

    /// Duration of one tick, or `None` when idle.
    pub fn tick_duration(&self) -> Option<Duration> {
        if self.tick_rate_hz == 0 {
            None
        } else {
            Some(Duration::from_secs_f64(1.0 / self.tick_rate_hz as f64))
        }
    }
}

/// Returned by [`TickClock::wait_for_tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickInfo {
    /// Starts at 1 and never repeats.
    pub tick: u64,
    pub dt: Duration,
    /// Whole periods that elapsed without a tick because the loop was busy.
    pub ticks_skipped: u64,
}

// ---------------------------------------------------------------------------
// TickClock
// ---------------------------------------------------------------------------

/// A fixed-rate clock with pause/resume.
///
/// Missed periods are skipped rather than replayed: a countdown that
/// stalls for three seconds resumes one tick later, it does not fire three
/// ticks in a burst.
pub struct TickClock {
    tick_duration: Option<Duration>,
    tick_count: u64,
    next_tick: Option<Instant>,
    paused: bool,
}

impl TickClock {
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let tick_duration = config.tick_duration();
        let paused = config.start_paused;
        let next_tick = tick_duration.map(|d| Instant::now() + d);

        debug!(rate_hz = config.tick_rate_hz, paused, "tick clock created");

        Self {
            tick_duration,
            tick_count: 0,
            next_tick,
            paused,
        }
    }

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Waits for the next tick.
    ///
    /// Pends forever while paused or idle; `select!` keeps serving the other
    /// branches in the meantime.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (next, dt) = match (self.next_tick, self.tick_duration) {
            (Some(next), Some(dt)) if !self.paused => (next, dt),
            _ => std::future::pending().await,
        };

        time::sleep_until(next).await;

        let now = Instant::now();
        self.tick_count += 1;

        let late_by = now.saturating_duration_since(next);
        let ticks_skipped = (late_by.as_nanos() / dt.as_nanos()) as u64;
        if ticks_skipped > 0 {
            warn!(tick = self.tick_count, skipped = ticks_skipped, "tick clock fell behind, skipping ahead");
        }
        self.next_tick = Some(now + dt);

        trace!(tick = self.tick_count, "tick");

        TickInfo {
            tick: self.tick_count,
            dt,
            ticks_skipped,
        }
    }

    /// Idempotent.
    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick_count, "tick clock paused");
        }
    }

    /// Restarts the clock; the next tick is one full period away.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            if let Some(dt) = self.tick_duration {
                self.next_tick = Some(Instant::now() + dt);
            }
            debug!(tick = self.tick_count, "tick clock resumed");
        }
    }

    /// Pauses or resumes so the clock runs exactly when `running` is true.
    pub fn set_running(&mut self, running: bool) {
        if running {
            self.resume();
        } else {
            self.pause();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_idle(&self) -> bool {
        self.tick_duration.is_none()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn tick_duration(&self) -> Option<Duration> {
        self.tick_duration
    }
}

// ---------------------------------------------------------------------------
// Countdown
// ---------------------------------------------------------------------------

/// Remaining whole ticks until something happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    remaining: u32,
}

impl Countdown {
    pub fn new(ticks: u32) -> Self {
        Self { remaining: ticks }
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_elapsed(&self) -> bool {
        self.remaining == 0
    }

    /// Counts one tick down. Returns `true` on the tick that reaches zero;
    /// further ticks keep returning `false`.
    pub fn tick(&mut self) -> bool {
        match self.remaining {
            0 => false,
            n => {
                self.remaining = n - 1;
                self.remaining == 0
            }
        }
    }

    pub fn reset(&mut self, ticks: u32) {
        self.remaining = ticks;
    }
}
