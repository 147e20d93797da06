//! Periodic task scheduling

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// A repeatable unit of work, producing a fresh future per run
pub type CycleTask = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Runs a task every `period`, starting immediately
pub trait Scheduler: Send + Sync {
    fn schedule(&self, period: Duration, task: CycleTask) -> ScheduleHandle;
}

/// Handle to a scheduled task. Dropping it leaves the task running.
#[derive(Debug)]
pub struct ScheduleHandle {
    cancelled: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ScheduleHandle {
    fn new(cancelled: Arc<AtomicBool>, join: Option<JoinHandle<()>>) -> Self {
        Self { cancelled, join }
    }

    /// Stop future runs; a run in progress is aborted at its next await point
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Tokio interval scheduler.
///
/// The first run starts as soon as the task is scheduled. A run that overlaps
/// the next tick delays it rather than triggering a burst of catch-up runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntervalScheduler;

impl Scheduler for IntervalScheduler {
    fn schedule(&self, period: Duration, task: CycleTask) -> ScheduleHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                task().await;
            }
            debug!("Scheduled task stopped");
        });

        ScheduleHandle::new(cancelled, Some(join))
    }
}

struct ManualEntry {
    period: Duration,
    task: CycleTask,
    cancelled: Arc<AtomicBool>,
}

/// Scheduler that only runs tasks when told to.
///
/// Lets callers step through periodic work without waiting on a clock.
#[derive(Default)]
pub struct ManualScheduler {
    entries: Mutex<Vec<ManualEntry>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every live task once, returning how many ran
    pub async fn fire(&self) -> usize {
        let tasks: Vec<CycleTask> = self
            .entries
            .lock()
            .iter()
            .filter(|e| !e.cancelled.load(Ordering::SeqCst))
            .map(|e| Arc::clone(&e.task))
            .collect();

        for task in &tasks {
            task().await;
        }
        tasks.len()
    }

    /// Periods of the live tasks, in scheduling order
    pub fn periods(&self) -> Vec<Duration> {
        self.entries
            .lock()
            .iter()
            .filter(|e| !e.cancelled.load(Ordering::SeqCst))
            .map(|e| e.period)
            .collect()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, period: Duration, task: CycleTask) -> ScheduleHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries.lock().push(ManualEntry {
            period,
            task,
            cancelled: Arc::clone(&cancelled),
        });
        ScheduleHandle::new(cancelled, None)
    }
}
