//! Periodic job scheduling.
//!
//! Two flavours share this module. Aligned jobs (sync, alert dispatch, dead-man tick)
//! fire on local wall-clock boundaries that are multiples of their period counted from
//! local midnight, so a 3 minute job runs at :00, :03, :06 and a 16 minute job at 00:00,
//! 00:16 and on through 10:08, 10:24. Each window fires at most once. Plain jobs (cache
//! refresh) run every period measured from start-up.
//!
//! A failing cycle is logged and the next tick still fires. Ticks missed because a cycle
//! overran are skipped, never replayed.

use crate::error::GatewayResult;
use chrono::{DateTime, Local};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Wall-clock alignment for one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignedSchedule {
    period_ms: i64,
}

impl AlignedSchedule {
    /// Schedule with the given period (clamped to at least one millisecond).
    pub fn new(period: Duration) -> Self {
        let period_ms = i64::try_from(period.as_millis()).unwrap_or(i64::MAX).max(1);
        Self { period_ms }
    }

    /// Period of the schedule.
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.unsigned_abs())
    }

    fn local_millis(now: DateTime<Local>) -> i64 {
        let offset_ms = i64::from(now.offset().local_minus_utc()) * 1000;
        now.timestamp_millis() + offset_ms
    }

    /// Index of the window containing `now`. Consecutive windows have consecutive indices.
    pub fn window_index(&self, now: DateTime<Local>) -> i64 {
        Self::local_millis(now).div_euclid(self.period_ms)
    }

    /// Start of the window containing `now`.
    pub fn floor(&self, now: DateTime<Local>) -> DateTime<Local> {
        let rem = Self::local_millis(now).rem_euclid(self.period_ms);
        now - chrono::Duration::milliseconds(rem)
    }

    /// Time left until the next boundary; zero when `now` sits exactly on one.
    pub fn delay_until_next_boundary(&self, now: DateTime<Local>) -> Duration {
        let rem = Self::local_millis(now).rem_euclid(self.period_ms);
        if rem == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis((self.period_ms - rem).unsigned_abs())
        }
    }

    /// Delay and window of the next firing after `last_fired`.
    ///
    /// The returned window is always later than `last_fired`, even when the timer woke up
    /// slightly before the boundary it was aiming for.
    pub fn next_fire(&self, now: DateTime<Local>, last_fired: Option<i64>) -> (Duration, i64) {
        let local = Self::local_millis(now);
        let mut target = local.div_euclid(self.period_ms);
        if local.rem_euclid(self.period_ms) != 0 {
            target += 1;
        }
        if let Some(last) = last_fired {
            target = target.max(last.saturating_add(1));
        }
        let wait_ms = target
            .saturating_mul(self.period_ms)
            .saturating_sub(local)
            .max(0);
        (Duration::from_millis(wait_ms.unsigned_abs()), target)
    }
}

/// Run `job` on every aligned boundary of `period`.
pub fn spawn_aligned<F, Fut>(name: &'static str, period: Duration, mut job: F) -> JoinHandle<()>
where
    F: FnMut(DateTime<Local>) -> Fut + Send + 'static,
    Fut: Future<Output = GatewayResult<()>> + Send + 'static,
{
    let schedule = AlignedSchedule::new(period);
    tokio::spawn(async move {
        let mut last_fired: Option<i64> = None;
        loop {
            let (delay, window) = schedule.next_fire(Local::now(), last_fired);
            tracing::trace!(job = name, delay_ms = delay.as_millis() as u64, "Waiting for boundary");
            tokio::time::sleep(delay).await;
            last_fired = Some(window);

            if let Err(e) = job(Local::now()).await {
                tracing::error!(job = name, error = %e, "Scheduled cycle failed");
            }
        }
    })
}

/// Run `job` every `period`, starting one period from now.
pub fn spawn_every<F, Fut>(name: &'static str, period: Duration, mut job: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = GatewayResult<()>> + Send + 'static,
{
    let period = period.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(e) = job().await {
                tracing::warn!(job = name, error = %e, "Periodic job failed");
            }
        }
    })
}
