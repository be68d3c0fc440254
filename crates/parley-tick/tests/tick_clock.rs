//! Tick clock behavior under Tokio's paused clock.

use std::time::Duration;

use parley_tick::{TickClock, TickConfig};

#[test]
fn test_default_config_ticks_once_per_second() {
    let cfg = TickConfig::default();
    assert_eq!(cfg.tick_duration(), Some(Duration::from_secs(1)));
}

#[test]
fn test_zero_rate_is_idle() {
    let clock = TickClock::with_rate(0);
    assert!(clock.is_idle());
    assert_eq!(clock.tick_duration(), None);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_fires_after_one_period() {
    let mut clock = TickClock::with_rate(1);
    let start = tokio::time::Instant::now();

    let info = clock.wait_for_tick().await;

    assert_eq!(info.tick, 1);
    assert_eq!(info.dt, Duration::from_secs(1));
    assert_eq!(start.elapsed(), Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_ticks_increment_monotonically() {
    let mut clock = TickClock::with_rate(4);
    for expected in 1..=5 {
        assert_eq!(clock.wait_for_tick().await.tick, expected);
    }
    assert_eq!(clock.tick_count(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_idle_clock_never_fires() {
    let mut clock = TickClock::with_rate(0);
    let result = tokio::time::timeout(Duration::from_secs(10), clock.wait_for_tick()).await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_paused_clock_pends() {
    let mut clock = TickClock::with_rate(1);
    clock.wait_for_tick().await;

    clock.pause();
    let result = tokio::time::timeout(Duration::from_secs(5), clock.wait_for_tick()).await;
    assert!(result.is_err(), "paused clock should pend");
}

#[tokio::test(start_paused = true)]
async fn test_start_paused_waits_for_resume() {
    let mut clock = TickClock::new(TickConfig {
        tick_rate_hz: 1,
        start_paused: true,
    });
    assert!(clock.is_paused());
    let result = tokio::time::timeout(Duration::from_secs(3), clock.wait_for_tick()).await;
    assert!(result.is_err());

    clock.set_running(true);
    let start = tokio::time::Instant::now();
    assert_eq!(clock.wait_for_tick().await.tick, 1);
    assert_eq!(start.elapsed(), Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_pause_resume_is_idempotent() {
    let mut clock = TickClock::with_rate(1);
    clock.pause();
    clock.pause();
    assert!(clock.is_paused());
    clock.resume();
    clock.resume();
    assert!(!clock.is_paused());
    assert_eq!(clock.wait_for_tick().await.tick, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stall_skips_instead_of_bursting() {
    let mut clock = TickClock::with_rate(1);
    tokio::time::advance(Duration::from_millis(3_500)).await;

    let info = clock.wait_for_tick().await;
    assert_eq!(info.tick, 1);
    assert_eq!(info.ticks_skipped, 2);

    // Next tick is a full period later, not immediately.
    let start = tokio::time::Instant::now();
    clock.wait_for_tick().await;
    assert_eq!(start.elapsed(), Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_select_loop_pattern() {
    let mut clock = TickClock::with_rate(1);
    let (tx, mut rx) = tokio::sync::mpsc::channel::<&str>(4);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(3_200)).await;
        tx.send("stop").await.ok();
    });

    let mut fired = 0u64;
    loop {
        tokio::select! {
            Some(cmd) = rx.recv() => {
                assert_eq!(cmd, "stop");
                break;
            }
            info = clock.wait_for_tick() => {
                fired += 1;
                assert_eq!(info.tick, fired);
            }
        }
    }
    assert_eq!(fired, 3);
}
