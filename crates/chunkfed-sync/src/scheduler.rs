//! Scheduled background jobs on a fixed-size worker pool.
//!
//! Each scheduled task runs in its own tokio task and waits `delay`, then runs
//! its job, then waits `interval` after the run completes (so runs of one task
//! never overlap). At most `workers` job bodies execute at once across the
//! scheduler. A leader-only task asks the coordinator immediately before every
//! run and skips the run when this node is not the leader.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::coordinator::ClusterCoordinator;
use crate::error::SyncError;

/// Boxed future returned by a job.
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

type Job = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// A unit of periodic work and its timing.
#[derive(Clone)]
pub struct ScheduledTask {
    /// Name used in logs.
    pub name: String,
    /// Wait before the first run.
    pub delay: Duration,
    /// Wait between the end of one run and the start of the next.
    pub interval: Duration,
    /// Run repeatedly (true) or once (false).
    pub repeat: bool,
    /// Only run on the cluster leader.
    pub leader_only: bool,
    job: Job,
}

impl ScheduledTask {
    /// A one-shot task with no delay.
    pub fn new<F, Fut>(name: impl Into<String>, job: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            name: name.into(),
            delay: Duration::ZERO,
            interval: Duration::ZERO,
            repeat: false,
            leader_only: false,
            job: Arc::new(move || Box::pin(job()) as JobFuture),
        }
    }

    /// Wait `delay` before the first run.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Repeat every `interval`.
    pub fn every(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self.repeat = true;
        self
    }

    /// Gate every run on leadership.
    pub fn leader_only(mut self) -> Self {
        self.leader_only = true;
        self
    }
}

impl std::fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("delay", &self.delay)
            .field("interval", &self.interval)
            .field("repeat", &self.repeat)
            .field("leader_only", &self.leader_only)
            .finish()
    }
}

/// Accepts tasks for background execution.
pub trait ScheduleDriver: Send + Sync {
    /// Start running `task`.
    fn schedule(&self, task: ScheduledTask) -> Result<ScheduleHandle, SyncError>;

    /// Cancel every task and refuse new ones.
    fn shutdown(&self);
}

/// Per-task counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskStats {
    /// Completed runs.
    pub runs: u64,
    /// Runs skipped because this node was not leader.
    pub skipped_not_leader: u64,
    /// Runs that panicked.
    pub panics: u64,
}

#[derive(Debug, Default)]
struct TaskCounters {
    runs: AtomicU64,
    skipped_not_leader: AtomicU64,
    panics: AtomicU64,
}

/// Handle to one scheduled task.
#[derive(Debug)]
pub struct ScheduleHandle {
    name: String,
    cancel: CancellationToken,
    counters: Arc<TaskCounters>,
    join: JoinHandle<()>,
}

impl ScheduleHandle {
    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stop the task after any in-flight run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once the task loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Counters snapshot.
    pub fn stats(&self) -> TaskStats {
        TaskStats {
            runs: self.counters.runs.load(Ordering::Relaxed),
            skipped_not_leader: self.counters.skipped_not_leader.load(Ordering::Relaxed),
            panics: self.counters.panics.load(Ordering::Relaxed),
        }
    }

    /// Wait for the task loop to exit.
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

/// Tokio-backed schedule driver with a fixed worker pool.
pub struct TokioScheduler {
    workers: Arc<Semaphore>,
    coordinator: Arc<dyn ClusterCoordinator>,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl TokioScheduler {
    /// Create a scheduler running at most `workers` jobs concurrently.
    pub fn new(workers: usize, coordinator: Arc<dyn ClusterCoordinator>) -> Self {
        Self {
            workers: Arc::new(Semaphore::new(workers.max(1))),
            coordinator,
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        }
    }
}

impl ScheduleDriver for TokioScheduler {
    fn schedule(&self, task: ScheduledTask) -> Result<ScheduleHandle, SyncError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::Shutdown);
        }
        let cancel = self.shutdown.child_token();
        let counters = Arc::new(TaskCounters::default());
        let name = task.name.clone();
        let join = tokio::spawn(drive(
            task,
            Arc::clone(&self.workers),
            Arc::clone(&self.coordinator),
            Arc::clone(&counters),
            cancel.clone(),
        ));
        Ok(ScheduleHandle {
            name,
            cancel,
            counters,
            join,
        })
    }

    fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdown.cancel();
    }
}

async fn drive(
    task: ScheduledTask,
    workers: Arc<Semaphore>,
    coordinator: Arc<dyn ClusterCoordinator>,
    counters: Arc<TaskCounters>,
    cancel: CancellationToken,
) {
    if !task.delay.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(task.delay) => {}
            _ = cancel.cancelled() => return,
        }
    }
    loop {
        if cancel.is_cancelled() {
            break;
        }
        if task.leader_only && !coordinator.is_leader() {
            counters.skipped_not_leader.fetch_add(1, Ordering::Relaxed);
            debug!(task = %task.name, "not leader, skipping run");
        } else {
            let permit = tokio::select! {
                permit = Arc::clone(&workers).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = cancel.cancelled() => break,
            };
            let outcome = tokio::spawn((task.job)()).await;
            drop(permit);
            match outcome {
                Ok(()) => {
                    counters.runs.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.panics.fetch_add(1, Ordering::Relaxed);
                    warn!(task = %task.name, error = %e, "scheduled task failed");
                }
            }
        }
        if !task.repeat {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(task.interval) => {}
            _ = cancel.cancelled() => break,
        }
    }
    debug!(task = %task.name, "scheduled task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::StaticCoordinator;
    use std::sync::atomic::AtomicUsize;

    fn counting_task(name: &str, counter: Arc<AtomicUsize>) -> ScheduledTask {
        ScheduledTask::new(name, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test]
    async fn test_one_shot_runs_once() {
        let sched = TokioScheduler::new(2, Arc::new(StaticCoordinator::new(false)));
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = sched.schedule(counting_task("once", counter.clone())).unwrap();
        let counters = Arc::clone(&handle.counters);
        handle.join().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(counters.runs.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_zero_delay() {
        let sched = TokioScheduler::new(2, Arc::new(StaticCoordinator::new(false)));
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = sched
            .schedule(counting_task("tick", counter.clone()).every(Duration::from_secs(10)))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(25)).await;
        handle.cancel();
        let stats = handle.stats();
        handle.join().await;
        // Runs at t=0, 10, 20.
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(stats.runs, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_only_skips_when_follower() {
        let coordinator = Arc::new(StaticCoordinator::new(false));
        let sched = TokioScheduler::new(1, coordinator.clone());
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = sched
            .schedule(
                counting_task("leader", counter.clone())
                    .every(Duration::from_secs(1))
                    .leader_only(),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(handle.stats().skipped_not_leader, 2);

        coordinator.set_leader(true);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        handle.cancel();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_panicking_job_is_contained() {
        let sched = TokioScheduler::new(1, Arc::new(StaticCoordinator::new(true)));
        let handle = sched
            .schedule(ScheduledTask::new("boom", || async { panic!("boom") }))
            .unwrap();
        let counters = Arc::clone(&handle.counters);
        handle.join().await;
        assert_eq!(counters.panics.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_tasks() {
        let sched = TokioScheduler::new(1, Arc::new(StaticCoordinator::new(true)));
        let handle = sched
            .schedule(
                ScheduledTask::new("slow", || async {})
                    .with_delay(Duration::from_secs(3600)),
            )
            .unwrap();
        sched.shutdown();
        handle.join().await;
        assert!(matches!(
            sched.schedule(ScheduledTask::new("late", || async {})),
            Err(SyncError::Shutdown)
        ));
    }

    #[tokio::test]
    async fn test_worker_pool_bounds_concurrency() {
        let sched = TokioScheduler::new(2, Arc::new(StaticCoordinator::new(true)));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..6 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(
                sched
                    .schedule(ScheduledTask::new(format!("job{}", i), move || {
                        let active = Arc::clone(&active);
                        let peak = Arc::clone(&peak);
                        async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        }
                    }))
                    .unwrap(),
            );
        }
        for h in handles {
            h.join().await;
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
