//! Cron-driven scheduling of monitor ticks
//!
//! Each scheduled job gets its own long-running task that sleeps until the next
//! fire time. Ticks are spawned, not awaited, so a slow tick does not delay the
//! schedule; overlap is the job's concern.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::SchedulerError;

/// Something to run on every fire
#[async_trait]
pub trait TickTarget: Send + Sync {
    async fn tick(&self);
}

pub trait Scheduler: Send + Sync {
    /// Start firing `target` on `cron`, replacing any job of the same name
    fn schedule(
        &self,
        job_name: &str,
        cron: &str,
        target: Arc<dyn TickTarget>,
    ) -> Result<(), SchedulerError>;

    /// Keep the target, change the cadence
    fn reschedule(&self, job_name: &str, cron: &str) -> Result<(), SchedulerError>;

    /// Stop firing; false when nothing was scheduled under `job_name`
    fn cancel(&self, job_name: &str) -> bool;

    fn is_scheduled(&self, job_name: &str) -> bool;
}

/// Parse a Quartz-style expression (seconds first, `?` allowed for day fields)
pub fn parse_cron(expr: &str) -> Result<Schedule, SchedulerError> {
    let normalized = expr.replace('?', "*");
    Schedule::from_str(&normalized).map_err(|e| SchedulerError::InvalidCron {
        expr: expr.to_string(),
        reason: e.to_string(),
    })
}

/// First fire time after both the last fire and `now`
///
/// A timer that wakes slightly early must not yield `last` again, and a loop
/// that fell behind skips the missed times instead of firing them in a burst.
fn next_fire(schedule: &Schedule, last: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&last.max(now)).next()
}

struct ScheduledJob {
    cron: String,
    target: Arc<dyn TickTarget>,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct CronScheduler {
    jobs: DashMap<String, ScheduledJob>,
}

impl CronScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Cadence currently in effect for `job_name`
    pub fn cron_of(&self, job_name: &str) -> Option<String> {
        self.jobs.get(job_name).map(|j| j.cron.clone())
    }

    fn spawn_fire_loop(
        job_name: String,
        schedule: Schedule,
        target: Arc<dyn TickTarget>,
        cancel: CancellationToken,
    ) {
        tokio::spawn(async move {
            let mut last = Utc::now();
            loop {
                let Some(next) = next_fire(&schedule, last, Utc::now()) else {
                    debug!(job = %job_name, "Schedule has no further fire times");
                    break;
                };
                let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(job = %job_name, "Fire loop cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(wait) => {
                        last = next;
                        let target = target.clone();
                        tokio::spawn(async move { target.tick().await });
                    }
                }
            }
        });
    }
}

impl Scheduler for CronScheduler {
    fn schedule(
        &self,
        job_name: &str,
        cron: &str,
        target: Arc<dyn TickTarget>,
    ) -> Result<(), SchedulerError> {
        let schedule = parse_cron(cron)?;
        let cancel = CancellationToken::new();

        let previous = self.jobs.insert(
            job_name.to_string(),
            ScheduledJob {
                cron: cron.to_string(),
                target: target.clone(),
                cancel: cancel.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        Self::spawn_fire_loop(job_name.to_string(), schedule, target, cancel);
        info!(job = %job_name, cron = %cron, "Job scheduled");
        Ok(())
    }

    fn reschedule(&self, job_name: &str, cron: &str) -> Result<(), SchedulerError> {
        parse_cron(cron)?;
        let target = self
            .jobs
            .get(job_name)
            .map(|j| j.target.clone())
            .ok_or_else(|| SchedulerError::NotScheduled(job_name.to_string()))?;
        self.schedule(job_name, cron, target)
    }

    fn cancel(&self, job_name: &str) -> bool {
        match self.jobs.remove(job_name) {
            Some((_, job)) => {
                job.cancel.cancel();
                info!(job = %job_name, "Job unscheduled");
                true
            }
            None => false,
        }
    }

    fn is_scheduled(&self, job_name: &str) -> bool {
        self.jobs.contains_key(job_name)
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        for job in self.jobs.iter() {
            job.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter(AtomicUsize);

    #[async_trait]
    impl TickTarget for Counter {
        async fn tick(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_parse_quartz_expressions() {
        assert!(parse_cron("0/5 * * * * ?").is_ok());
        assert!(parse_cron("0 0/1 * * * ?").is_ok());
        assert!(matches!(
            parse_cron("every five seconds"),
            Err(SchedulerError::InvalidCron { .. })
        ));
    }

    #[test]
    fn test_next_fire_never_repeats_a_time() {
        use chrono::TimeZone;

        let every_second = parse_cron("* * * * * ?").unwrap();
        let last = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 5).unwrap();
        let woke_early = last - chrono::Duration::milliseconds(1);
        assert_eq!(
            next_fire(&every_second, last, woke_early),
            Some(last + chrono::Duration::seconds(1))
        );

        let every_five = parse_cron("0/5 * * * * ?").unwrap();
        let behind = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 30).unwrap()
            + chrono::Duration::milliseconds(500);
        assert_eq!(
            next_fire(&every_five, last, behind),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 35).unwrap())
        );
    }

    #[tokio::test]
    async fn test_fires_on_schedule() {
        let scheduler = CronScheduler::new();
        let counter = Arc::new(Counter::default());
        scheduler.schedule("MGR-g", "* * * * * ?", counter.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert!(counter.0.load(Ordering::SeqCst) >= 1);
        assert!(scheduler.is_scheduled("MGR-g"));
    }

    #[tokio::test]
    async fn test_cancel_stops_firing() {
        let scheduler = CronScheduler::new();
        let counter = Arc::new(Counter::default());
        scheduler.schedule("MGR-g", "* * * * * ?", counter.clone()).unwrap();

        assert!(scheduler.cancel("MGR-g"));
        assert!(!scheduler.cancel("MGR-g"));
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
        assert!(scheduler.is_empty());
    }

    #[tokio::test]
    async fn test_reschedule_keeps_target() {
        let scheduler = CronScheduler::new();
        let counter = Arc::new(Counter::default());
        scheduler.schedule("MGR-g", "0 0 0 1 1 ?", counter.clone()).unwrap();

        scheduler.reschedule("MGR-g", "* * * * * ?").unwrap();
        assert_eq!(scheduler.cron_of("MGR-g").as_deref(), Some("* * * * * ?"));
        assert_eq!(scheduler.len(), 1);

        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert!(counter.0.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_reschedule_errors() {
        let scheduler = CronScheduler::new();
        assert_eq!(
            scheduler.reschedule("MGR-x", "* * * * * ?"),
            Err(SchedulerError::NotScheduled("MGR-x".into()))
        );

        let counter = Arc::new(Counter::default());
        scheduler.schedule("MGR-g", "0/5 * * * * ?", counter).unwrap();
        assert!(scheduler.reschedule("MGR-g", "bogus").is_err());
        assert_eq!(scheduler.cron_of("MGR-g").as_deref(), Some("0/5 * * * * ?"));
    }
}
