//! Fixed-timestep tick scheduling.
//!
//! Each pass adds the wall time elapsed since the previous pass to a carried
//! remainder, runs as many whole `dt` steps as the remainder covers and
//! sleeps until the remainder would reach `dt` again. Every step advances
//! simulated time by exactly `dt`, including catch-up steps after a stall.

use crate::config::SimulationConfig;
use crate::world::World;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{info, warn};

/// Accumulator state for a fixed `dt`.
#[derive(Debug, Clone)]
pub struct TickScheduler {
    dt: Duration,
    accumulator: Duration,
    last_pass: Option<Instant>,
}

impl TickScheduler {
    /// A zero `dt` is raised to one millisecond.
    pub fn new(dt: Duration) -> Self {
        Self {
            dt: dt.max(Duration::from_millis(1)),
            accumulator: Duration::ZERO,
            last_pass: None,
        }
    }

    #[inline]
    pub fn dt(&self) -> Duration {
        self.dt
    }

    /// Time carried over that does not yet make a whole step.
    #[inline]
    pub fn remainder(&self) -> Duration {
        self.accumulator
    }

    /// Record a scheduling pass at `now` and return how many steps are due.
    /// The first pass only starts the clock.
    pub fn accumulate(&mut self, now: Instant) -> u32 {
        if let Some(last) = self.last_pass {
            self.accumulator += now.saturating_duration_since(last);
        }
        self.last_pass = Some(now);

        let steps = (self.accumulator.as_nanos() / self.dt.as_nanos()).min(u32::MAX as u128) as u32;
        self.accumulator -= self.dt * steps;
        steps
    }

    /// When the next step falls due, measured from the latest pass.
    pub fn next_deadline(&self) -> Instant {
        let base = self.last_pass.unwrap_or_else(Instant::now);
        base + self.dt.saturating_sub(self.accumulator)
    }
}

/// Allows at most one event per interval and counts the rest.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
    suppressed: u64,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
            suppressed: 0,
        }
    }

    /// Returns `Some(suppressed)` when the event may be reported, where
    /// `suppressed` counts the events swallowed since the last report.
    pub fn check(&mut self, now: Instant) -> Option<u64> {
        let allowed = match self.last {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if allowed {
            self.last = Some(now);
            Some(std::mem::take(&mut self.suppressed))
        } else {
            self.suppressed += 1;
            None
        }
    }
}

/// Run up to `steps` steps of `dt`, stopping early once `shutdown` is set.
/// Returns the number of steps run.
async fn run_due_steps(
    world: &World,
    steps: u32,
    dt: Duration,
    shutdown: &watch::Receiver<bool>,
    slow_steps: &mut RateLimiter,
) -> u32 {
    let dt_secs = dt.as_secs_f32();
    let mut ran = 0;
    while ran < steps && !*shutdown.borrow() {
        let started = Instant::now();
        let report = world.step(dt_secs).await;
        ran += 1;
        let took = started.elapsed();
        if took > dt {
            if let Some(suppressed) = slow_steps.check(Instant::now()) {
                warn!(
                    tick = report.tick,
                    took_ms = took.as_secs_f64() * 1000.0,
                    budget_ms = dt.as_secs_f64() * 1000.0,
                    suppressed,
                    "Slow tick"
                );
            }
        }
    }
    ran
}

/// Drive `world` at the configured rate until `shutdown` flips to true or its
/// sender is dropped.
pub async fn run_tick_loop(
    world: Arc<World>,
    config: SimulationConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut scheduler = TickScheduler::new(config.tick_interval());
    let dt = scheduler.dt();
    let mut slow_steps = RateLimiter::new(config.overrun_log_interval());
    let mut catch_ups = RateLimiter::new(config.overrun_log_interval());

    info!(
        tick_rate = config.tick_rate,
        dt_ms = dt.as_secs_f64() * 1000.0,
        "Tick loop started"
    );
    scheduler.accumulate(Instant::now());

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = sleep_until(scheduler.next_deadline()) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let steps = scheduler.accumulate(Instant::now());
        run_due_steps(&world, steps, dt, &shutdown, &mut slow_steps).await;

        if steps > 1 {
            if let Some(suppressed) = catch_ups.check(Instant::now()) {
                warn!(
                    steps,
                    remainder_ms = scheduler.remainder().as_secs_f64() * 1000.0,
                    suppressed,
                    "Tick loop behind schedule, running catch-up steps"
                );
            }
        }
    }

    info!("Tick loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    const DT: Duration = Duration::from_millis(20);

    #[test]
    fn test_first_pass_starts_clock() {
        let mut scheduler = TickScheduler::new(DT);
        let t0 = Instant::now();
        assert_eq!(scheduler.accumulate(t0), 0);
        assert_eq!(scheduler.next_deadline(), t0 + DT);
    }

    #[test]
    fn test_jitter_is_absorbed_without_drift() {
        let mut scheduler = TickScheduler::new(DT);
        let t0 = Instant::now();
        scheduler.accumulate(t0);

        // Passes arrive late and early around the nominal schedule.
        let offsets_ms = [23, 38, 61, 79, 100];
        let mut total = 0;
        for ms in offsets_ms {
            total += scheduler.accumulate(t0 + Duration::from_millis(ms));
        }
        // 100ms of wall time is exactly five steps.
        assert_eq!(total, 5);
        assert_eq!(scheduler.remainder(), Duration::ZERO);
    }

    #[test]
    fn test_remainder_carries_over() {
        let mut scheduler = TickScheduler::new(DT);
        let t0 = Instant::now();
        scheduler.accumulate(t0);
        assert_eq!(scheduler.accumulate(t0 + Duration::from_millis(30)), 1);
        assert_eq!(scheduler.remainder(), Duration::from_millis(10));
        assert_eq!(
            scheduler.next_deadline(),
            t0 + Duration::from_millis(30) + Duration::from_millis(10)
        );
        assert_eq!(scheduler.accumulate(t0 + Duration::from_millis(40)), 1);
        assert_eq!(scheduler.remainder(), Duration::ZERO);
    }

    #[test]
    fn test_stall_yields_catch_up_steps() {
        let mut scheduler = TickScheduler::new(DT);
        let t0 = Instant::now();
        scheduler.accumulate(t0);
        assert_eq!(scheduler.accumulate(t0 + Duration::from_millis(205)), 10);
        assert_eq!(scheduler.remainder(), Duration::from_millis(5));
    }

    #[test]
    fn test_rate_limiter_counts_suppressed() {
        let mut limiter = RateLimiter::new(Duration::from_secs(1));
        let t0 = Instant::now();
        assert_eq!(limiter.check(t0), Some(0));
        assert_eq!(limiter.check(t0 + Duration::from_millis(100)), None);
        assert_eq!(limiter.check(t0 + Duration::from_millis(900)), None);
        assert_eq!(limiter.check(t0 + Duration::from_millis(1000)), Some(2));
        assert_eq!(limiter.check(t0 + Duration::from_millis(1500)), None);
    }

    #[tokio::test]
    async fn test_catch_up_stops_on_shutdown() {
        let world = World::new(&Config::default());
        let mut limiter = RateLimiter::new(Duration::from_secs(5));
        let (stop_tx, stop_rx) = watch::channel(false);

        assert_eq!(run_due_steps(&world, 3, DT, &stop_rx, &mut limiter).await, 3);
        assert_eq!(world.tick_count().await, 3);

        // A long backlog is abandoned as soon as shutdown is requested.
        stop_tx.send(true).unwrap();
        assert_eq!(run_due_steps(&world, 100_000, DT, &stop_rx, &mut limiter).await, 0);
        assert_eq!(world.tick_count().await, 3);
    }

    #[tokio::test]
    async fn test_loop_ticks_and_stops() {
        let config = Config::from_toml_str("[simulation]\ntick_rate = 100\n").unwrap();
        let world = Arc::new(World::new(&config));
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(run_tick_loop(
            Arc::clone(&world),
            config.simulation.clone(),
            stop_rx,
        ));
        tokio::time::sleep(Duration::from_millis(150)).await;
        stop_tx.send(true).unwrap();
        handle.await.unwrap();

        let ticks = world.tick_count().await;
        assert!(ticks >= 1, "expected the loop to tick, got {ticks}");

        // No further ticks after shutdown.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(world.tick_count().await, ticks);
    }
}
