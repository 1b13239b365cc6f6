//! Scheduler loop: checks enabled tasks on every tick and fires the due ones.
//! Uses tokio::time::interval, so it sleeps between checks.
//!
//! Duplicate protection is persisted: a cron task stores the minute it last
//! fired, a one-off task is disabled before its wake goes out.

use chrono::{DateTime, DurationRound, NaiveDateTime, TimeDelta, Utc};
use lanwake_core::config::SchedulerConfig;
use lanwake_core::error::{LanWakeError, Result};
use lanwake_core::traits::{HistoryRecorder, TaskStore};
use lanwake_core::types::{NewHistoryEntry, Schedule, ScheduledTask};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cron::CronSchedule;
use crate::tasks::wall_clock;
use crate::wake::{WakeAction, WakeSource};

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Ids of tasks fired this tick, in evaluation order.
    pub fired: Vec<i64>,
    /// Fired tasks whose wake reported an error.
    pub failed: usize,
}

/// Why a task is due, and how to mark it.
struct Firing {
    marker: DateTime<Utc>,
    disable: bool,
}

pub struct SchedulerLoop {
    tasks: Arc<dyn TaskStore>,
    waker: Arc<WakeAction>,
    history: Arc<dyn HistoryRecorder>,
    config: SchedulerConfig,
    started_at: DateTime<Utc>,
}

impl SchedulerLoop {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        waker: Arc<WakeAction>,
        history: Arc<dyn HistoryRecorder>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            tasks,
            waker,
            history,
            config,
            started_at: Utc::now(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Evaluate every enabled task against `now` and fire the due ones,
    /// one after another. A failing task never stops the rest.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let minute = now
            .duration_trunc(TimeDelta::minutes(1))
            .map_err(|e| LanWakeError::Scheduler(format!("truncate {now}: {e}")))?;
        let mut summary = TickSummary::default();

        for task in self.tasks.enabled_tasks()? {
            let Some(firing) = self.due(&task, now, minute) else {
                continue;
            };

            // Persist first so a crash mid-wake cannot fire it twice
            if let Err(e) = self.tasks.mark_fired(task.id, firing.marker, firing.disable) {
                tracing::warn!("⚠️ Could not mark task '{}' fired, skipping: {e}", task.name);
                continue;
            }

            tracing::info!("🔔 Task triggered: '{}' → {}", task.name, task.target);
            summary.fired.push(task.id);
            if !self.fire(&task).await {
                summary.failed += 1;
            }
        }
        Ok(summary)
    }

    fn due(&self, task: &ScheduledTask, now: DateTime<Utc>, minute: DateTime<Utc>) -> Option<Firing> {
        match &task.schedule {
            Schedule::Cron(expr) => {
                let cron = match CronSchedule::parse(expr) {
                    Ok(cron) => cron,
                    Err(e) => {
                        tracing::warn!("⚠️ Task '{}' skipped: {e}", task.name);
                        return None;
                    }
                };
                let clock = self.config.clock;
                let wall = wall_clock(minute, clock);
                let repeat = fired_in_minute(task.last_fired, wall, |t| wall_clock(t, clock));
                (cron.matches(&wall) && !repeat).then_some(Firing {
                    marker: minute,
                    disable: false,
                })
            }
            Schedule::Once(at) => {
                if *at > now {
                    return None;
                }
                if *at < self.started_at && !self.config.catch_up_one_off {
                    tracing::info!("⏭️ One-off task '{}' was missed at {at}, disabling", task.name);
                    if let Err(e) = self.tasks.mark_fired(task.id, now, true) {
                        tracing::warn!("⚠️ Could not disable task '{}': {e}", task.name);
                    }
                    return None;
                }
                Some(Firing { marker: now, disable: true })
            }
        }
    }

    /// Returns whether the wake went through cleanly.
    async fn fire(&self, task: &ScheduledTask) -> bool {
        let source = WakeSource::scheduled(&task.name);
        match self.waker.wake(&task.target, &source).await {
            Ok(report) => {
                if report.failed() > 0 {
                    tracing::warn!(
                        "⚠️ Task '{}': {} of {} wake(s) failed",
                        task.name,
                        report.failed(),
                        report.results.len()
                    );
                }
                report.failed() == 0
            }
            // already written to history by the waker
            Err(e @ (LanWakeError::SignalSend(_) | LanWakeError::Validation(_))) => {
                tracing::warn!("⚠️ Task '{}' failed: {e}", task.name);
                false
            }
            Err(e) => {
                tracing::warn!("⚠️ Task '{}' failed: {e}", task.name);
                let entry = NewHistoryEntry::unresolved(
                    &task.target,
                    format!("Scheduled task: {} - {e}", task.name),
                );
                if let Err(e) = self.history.record_wake(&entry) {
                    tracing::warn!("⚠️ Failed to record history for task '{}': {e}", task.name);
                }
                false
            }
        }
    }

    /// Tick until `shutdown` flips to `true` or its sender goes away.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let every = Duration::from_secs(self.config.tick_secs.max(1));
        tracing::info!("⏰ Scheduler started (check every {}s)", every.as_secs());

        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(summary) if !summary.fired.is_empty() => tracing::info!(
                            "📣 Scheduler fired {} task(s), {} with errors",
                            summary.fired.len(),
                            summary.failed
                        ),
                        Ok(_) => {}
                        Err(e) => tracing::warn!("⚠️ Scheduler tick failed: {e}"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("⏰ Scheduler stopped");
    }
}

/// Has the task already fired in this wall-clock minute? Comparing wall
/// time rather than instants keeps a repeated local hour (DST fall-back)
/// from firing the same cron minute twice.
fn fired_in_minute(
    last_fired: Option<DateTime<Utc>>,
    wall_minute: NaiveDateTime,
    to_wall: impl Fn(DateTime<Utc>) -> NaiveDateTime,
) -> bool {
    last_fired.map(to_wall) == Some(wall_minute)
}

/// Spawn the scheduler loop as a background tokio task.
pub fn spawn_scheduler(scheduler: Arc<SchedulerLoop>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(scheduler.run(shutdown))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NeverUp, StubDirectory, StubHistory, StubSender, StubTasks, group, machine};
    use chrono::TimeZone;
    use lanwake_core::config::ScheduleClock;
    use lanwake_core::traits::MachineDirectory;
    use lanwake_core::types::{HistoryStatus, TaskTarget};
    use lanwake_monitor::{MonitorPolicy, MonitorRegistry};

    struct Fixture {
        scheduler: Arc<SchedulerLoop>,
        tasks: Arc<StubTasks>,
        history: Arc<StubHistory>,
        sender: Arc<StubSender>,
    }

    fn fixture(tasks: Vec<ScheduledTask>, catch_up: bool) -> Fixture {
        let directory: Arc<dyn MachineDirectory> = Arc::new(
            StubDirectory::default()
                .with_group(group(1, "office"))
                .with_machine(machine(1, "alpha", Some(1)))
                .with_machine(machine(2, "bravo", Some(1))),
        );
        let history = Arc::new(StubHistory::default());
        let sender = Arc::new(StubSender::default());
        let monitors = Arc::new(MonitorRegistry::new(
            directory.clone(),
            Arc::new(NeverUp),
            MonitorPolicy::default(),
        ));
        let waker = Arc::new(WakeAction::new(directory, history.clone(), sender.clone(), monitors));
        let tasks = Arc::new(StubTasks::with(tasks));
        let config = SchedulerConfig {
            tick_secs: 30,
            clock: ScheduleClock::Utc,
            catch_up_one_off: catch_up,
        };
        Fixture {
            scheduler: Arc::new(SchedulerLoop::new(tasks.clone(), waker, history.clone(), config)),
            tasks,
            history,
            sender,
        }
    }

    fn task(id: i64, target: TaskTarget, schedule: Schedule) -> ScheduledTask {
        ScheduledTask {
            id,
            name: format!("task-{id}"),
            enabled: true,
            target,
            schedule,
            last_fired: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_every_minute_fires_once_per_minute() {
        let fx = fixture(
            vec![task(1, TaskTarget::machine(1), Schedule::Cron("* * * * *".into()))],
            true,
        );
        let start = Utc.with_ymd_and_hms(2026, 2, 22, 10, 0, 0).unwrap();

        let mut fired = 0;
        for i in 0..6 {
            let now = start + TimeDelta::seconds(30 * i);
            fired += fx.scheduler.tick(now).await.unwrap().fired.len();
        }
        assert_eq!(fired, 3);
        assert_eq!(fx.sender.sent_count(), 3);
        assert_eq!(
            fx.tasks.get(1).unwrap().last_fired,
            Some(Utc.with_ymd_and_hms(2026, 2, 22, 10, 2, 0).unwrap())
        );
    }

    #[tokio::test]
    async fn test_cron_only_at_matching_minute() {
        let fx = fixture(
            vec![task(1, TaskTarget::group(1), Schedule::Cron("30 7 * * *".into()))],
            true,
        );
        let early = Utc.with_ymd_and_hms(2026, 2, 22, 7, 29, 45).unwrap();
        assert!(fx.scheduler.tick(early).await.unwrap().fired.is_empty());

        let on_time = Utc.with_ymd_and_hms(2026, 2, 22, 7, 30, 15).unwrap();
        assert_eq!(fx.scheduler.tick(on_time).await.unwrap().fired, vec![1]);
        assert_eq!(fx.sender.sent_count(), 2);
        assert!(fx.history.entries().iter().all(|e| e.message == "Scheduled task: task-1"));
    }

    #[tokio::test]
    async fn test_overdue_one_off_fires_once_then_disabled() {
        let at = Utc::now() - TimeDelta::hours(1);
        let fx = fixture(vec![task(1, TaskTarget::machine(2), Schedule::Once(at))], true);

        let first = fx.scheduler.tick(Utc::now()).await.unwrap();
        assert_eq!(first.fired, vec![1]);
        assert!(!fx.tasks.get(1).unwrap().enabled);

        let second = fx.scheduler.tick(Utc::now()).await.unwrap();
        assert!(second.fired.is_empty());
        assert_eq!(fx.sender.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_overdue_one_off_skipped_without_catch_up() {
        let at = Utc::now() - TimeDelta::hours(1);
        let fx = fixture(vec![task(1, TaskTarget::machine(2), Schedule::Once(at))], false);

        assert!(fx.scheduler.tick(Utc::now()).await.unwrap().fired.is_empty());
        assert!(!fx.tasks.get(1).unwrap().enabled);
        assert_eq!(fx.sender.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_future_one_off_waits() {
        let at = Utc::now() + TimeDelta::minutes(10);
        let fx = fixture(vec![task(1, TaskTarget::machine(1), Schedule::Once(at))], false);

        assert!(fx.scheduler.tick(Utc::now()).await.unwrap().fired.is_empty());
        assert_eq!(fx.scheduler.tick(at + TimeDelta::seconds(5)).await.unwrap().fired, vec![1]);
    }

    #[tokio::test]
    async fn test_failing_task_does_not_block_others() {
        let now = Utc.with_ymd_and_hms(2026, 2, 22, 9, 0, 0).unwrap();
        let fx = fixture(
            vec![
                task(1, TaskTarget::machine(77), Schedule::Cron("0 9 * * *".into())),
                task(2, TaskTarget::group(1), Schedule::Cron("0 9 * * *".into())),
            ],
            true,
        );

        let summary = fx.scheduler.tick(now).await.unwrap();
        assert_eq!(summary.fired, vec![1, 2]);
        assert_eq!(summary.failed, 1);
        assert_eq!(fx.sender.sent_count(), 2);

        let entries = fx.history.entries();
        let unresolved = entries.iter().find(|e| e.machine_id.is_none()).unwrap();
        assert_eq!(unresolved.status, HistoryStatus::Failed);
        assert!(unresolved.message.starts_with("Scheduled task: task-1"));
    }

    #[test]
    fn test_repeated_local_hour_counts_as_same_minute() {
        // 05:30Z and 06:30Z both read 01:30 on a fall-back night
        let first = Utc.with_ymd_and_hms(2026, 11, 1, 5, 30, 0).unwrap();
        let second = Utc.with_ymd_and_hms(2026, 11, 1, 6, 30, 0).unwrap();
        let fall_back = |t: DateTime<Utc>| {
            let t = if t == second { first } else { t };
            t.naive_utc() - TimeDelta::hours(4)
        };

        let wall = fall_back(second);
        assert!(fired_in_minute(Some(first), wall, fall_back));
        assert!(!fired_in_minute(None, wall, fall_back));
        assert!(!fired_in_minute(Some(first - TimeDelta::days(1)), wall, fall_back));
    }

    #[tokio::test]
    async fn test_unparsable_cron_skipped() {
        let now = Utc.with_ymd_and_hms(2026, 2, 22, 9, 0, 0).unwrap();
        let fx = fixture(
            vec![
                task(1, TaskTarget::machine(1), Schedule::Cron("every day".into())),
                task(2, TaskTarget::machine(2), Schedule::Cron("* * * * *".into())),
            ],
            true,
        );
        assert_eq!(fx.scheduler.tick(now).await.unwrap().fired, vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let fx = fixture(vec![], true);
        let (tx, rx) = watch::channel(false);
        let handle = spawn_scheduler(fx.scheduler.clone(), rx);

        tokio::time::sleep(Duration::from_secs(65)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("scheduler should stop")
            .unwrap();
    }
}
