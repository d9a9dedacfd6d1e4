//! Cron scheduler: owns the active job set and dispatches executions.
//!
//! Each registered job gets its own timer task that fires on its schedule.
//! A firing builds a fresh [`Execution`] and a [`Context`] with a snapshot
//! of the job's middleware list, then walks the chain. Removing a job aborts
//! only its timer; an in-flight run completes against the old definition.

use crate::error::{Error, Result};
use crate::execution::Execution;
use crate::jobs::Job;
use crate::middleware::{Context, Middleware, MiddlewareStack};
use crate::schedule::Schedule;
use crate::telemetry::Metrics;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    jobs: Mutex<Vec<Arc<dyn Job>>>,
    globals: Mutex<MiddlewareStack>,
    timers: Mutex<HashMap<u64, JoinHandle<()>>>,
    next_id: AtomicU64,
    running: AtomicBool,
    /// Tracks in-flight executions so `stop` can drain them.
    tracker: TaskTracker,
    /// Cancels timer loops; never cancels an in-flight execution.
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(Vec::new()),
                globals: Mutex::new(MiddlewareStack::new()),
                timers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                running: AtomicBool::new(false),
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Register a scheduler-global middleware, merged ahead of every job's
    /// own chain at registration time.
    pub fn use_middleware(&self, middleware: Option<Arc<dyn Middleware>>) {
        let mut globals = self
            .inner
            .globals
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        globals.register(middleware);
    }

    /// Register a job and start firing it on its schedule.
    pub fn add_job(&self, job: Arc<dyn Job>) -> Result<()> {
        let metrics = Metrics::global();

        if job.schedule().is_empty() {
            metrics.register_errors_total.inc();
            return Err(Error::EmptySchedule);
        }
        let schedule: Schedule = match job.schedule().parse() {
            Ok(schedule) => schedule,
            Err(error) => {
                metrics.register_errors_total.inc();
                return Err(error.into());
            }
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        job.set_cron_id(id);

        {
            let globals = self
                .inner
                .globals
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            job.merge_global_middlewares(&globals);
        }

        {
            let mut jobs = self.inner.jobs.lock().unwrap_or_else(|e| e.into_inner());
            jobs.push(job.clone());
        }

        if self.inner.running.load(Ordering::SeqCst) {
            self.spawn_timer(id, schedule, job.clone());
        }

        metrics.scheduler_jobs.inc();
        tracing::info!(
            job = %job.name(),
            command = %job.command(),
            schedule = %job.schedule(),
            cron_id = id,
            "new job registered"
        );
        Ok(())
    }

    /// Deregister a job: its timer stops firing, but an in-flight run
    /// completes normally.
    pub fn remove_job(&self, job: &dyn Job) {
        let id = job.cron_id();
        tracing::info!(
            job = %job.name(),
            command = %job.command(),
            schedule = %job.schedule(),
            cron_id = id,
            "job deregistered (will not fire again)"
        );

        let handle = {
            let mut timers = self.inner.timers.lock().unwrap_or_else(|e| e.into_inner());
            timers.remove(&id)
        };
        if let Some(handle) = handle {
            handle.abort();
        }

        let mut jobs = self.inner.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let before = jobs.len();
        jobs.retain(|entry| entry.cron_id() != id);
        if jobs.len() < before {
            Metrics::global().scheduler_jobs.dec();
        }
    }

    /// Start firing registered jobs. Idempotent.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!("starting scheduler");

        let jobs: Vec<Arc<dyn Job>> = {
            let jobs = self.inner.jobs.lock().unwrap_or_else(|e| e.into_inner());
            jobs.clone()
        };
        for job in jobs {
            match job.schedule().parse::<Schedule>() {
                Ok(schedule) => self.spawn_timer(job.cron_id(), schedule, job),
                // Validated at registration; only reachable if the job was
                // mutated behind our back.
                Err(error) => {
                    tracing::error!(job = %job.name(), %error, "unschedulable job skipped")
                }
            }
        }
    }

    /// Stop firing and wait for in-flight executions to drain.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = {
            let mut timers = self.inner.timers.lock().unwrap_or_else(|e| e.into_inner());
            timers.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.abort();
        }

        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn jobs(&self) -> Vec<Arc<dyn Job>> {
        let jobs = self.inner.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.clone()
    }

    pub fn job_count(&self) -> usize {
        let jobs = self.inner.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.len()
    }

    fn spawn_timer(&self, id: u64, schedule: Schedule, job: Arc<dyn Job>) {
        let inner = self.inner.clone();
        let cancel = self.inner.cancel.clone();

        let handle = tokio::spawn(async move {
            match schedule {
                Schedule::Every(interval) => {
                    let mut ticker = tokio::time::interval(interval);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    // The first interval tick completes immediately; consume
                    // it so the job first fires one period from now.
                    ticker.tick().await;

                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = ticker.tick() => Inner::fire(&inner, &job),
                        }
                    }
                }
                Schedule::Cron(schedule) => loop {
                    let now = Utc::now();
                    let Some(next) = schedule.after(&now).next() else {
                        tracing::warn!(job = %job.name(), "schedule has no future firings, timer stopped");
                        return;
                    };
                    let delay = (next - now).to_std().unwrap_or_default();

                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => Inner::fire(&inner, &job),
                    }
                },
            }
        });

        let mut timers = self.inner.timers.lock().unwrap_or_else(|e| e.into_inner());
        timers.insert(id, handle);
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    /// Dispatch one firing on its own worker task. Concurrent firings of the
    /// same job are allowed; the overlap middleware gates them when
    /// configured.
    fn fire(inner: &Arc<Inner>, job: &Arc<dyn Job>) {
        let job = job.clone();
        inner.tracker.spawn(async move {
            run_job(job).await;
        });
    }
}

/// Execute one firing: walk the middleware chain, then record metrics and
/// log the outcome summary.
async fn run_job(job: Arc<dyn Job>) {
    let execution = Arc::new(Execution::new());
    let middlewares = job.middlewares();
    let mut ctx = Context::new(job.clone(), execution.clone(), middlewares);

    log_outcome(
        &ctx,
        format!("started - {}", job.command()),
    );

    let result = ctx.run().await;
    ctx.stop(result.err());

    let metrics = Metrics::global();
    metrics.runs_total.with_label_values(&[job.name()]).inc();
    if execution.is_failed() {
        metrics
            .run_errors_total
            .with_label_values(&[job.name()])
            .inc();
    }
    metrics
        .run_latest_timestamp
        .with_label_values(&[job.name()])
        .set(Utc::now().timestamp() as f64);
    metrics
        .run_duration_seconds
        .with_label_values(&[job.name()])
        .observe(execution.duration().num_milliseconds() as f64 / 1000.0);

    let output = execution.stdout();
    if !output.is_empty() {
        log_outcome(
            &ctx,
            format!("output: {}", String::from_utf8_lossy(&output)),
        );
    }

    log_outcome(
        &ctx,
        format!(
            "finished in {}, failed: {}, skipped: {}, error: {}",
            humantime::format_duration(
                std::time::Duration::from_millis(
                    execution.duration().num_milliseconds().max(0) as u64
                )
            ),
            execution.is_failed(),
            execution.is_skipped(),
            execution.error_message().unwrap_or_else(|| "none".to_string()),
        ),
    );
}

/// Log with severity mapped from the execution's outcome.
fn log_outcome(ctx: &Context, message: String) {
    let job = ctx.job.name();
    let execution = &ctx.execution.id;
    if ctx.execution.is_failed() {
        tracing::error!(job = %job, execution = %execution, "{message}");
    } else if ctx.execution.is_skipped() {
        tracing::warn!(job = %job, execution = %execution, "{message}");
    } else {
        tracing::info!(job = %job, execution = %execution, "{message}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobBase;
    use crate::middleware::OverlapConfig;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    /// Job whose body counts invocations and can linger.
    struct CountingJob {
        base: JobBase,
        runs: AtomicU32,
        linger: Duration,
    }

    impl CountingJob {
        fn new(name: &str, schedule: &str, linger: Duration) -> Arc<Self> {
            Arc::new(Self {
                base: JobBase::new(name, schedule, "true"),
                runs: AtomicU32::new(0),
                linger,
            })
        }

        fn count(&self) -> u32 {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Job for CountingJob {
        fn base(&self) -> &JobBase {
            &self.base
        }

        fn fingerprint(&self) -> String {
            String::new()
        }

        async fn run(&self, _ctx: &Context) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if !self.linger.is_zero() {
                tokio::time::sleep(self.linger).await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_schedule_is_rejected() {
        let scheduler = Scheduler::new();
        let job = CountingJob::new("no-schedule", "", Duration::ZERO);
        match scheduler.add_job(job) {
            Err(Error::EmptySchedule) => {}
            other => panic!("expected the empty-schedule error, got {other:?}"),
        }
        assert_eq!(scheduler.job_count(), 0);
    }

    #[tokio::test]
    async fn add_assigns_cron_ids_and_remove_drops_the_job() {
        let scheduler = Scheduler::new();
        let first = CountingJob::new("first", "@every 1h", Duration::ZERO);
        let second = CountingJob::new("second", "@every 1h", Duration::ZERO);

        scheduler.add_job(first.clone()).unwrap();
        scheduler.add_job(second.clone()).unwrap();
        assert_ne!(first.cron_id(), 0);
        assert_ne!(first.cron_id(), second.cron_id());
        assert_eq!(scheduler.job_count(), 2);

        scheduler.remove_job(first.as_ref());
        assert_eq!(scheduler.job_count(), 1);
        assert_eq!(scheduler.jobs()[0].name(), "second");
    }

    #[tokio::test]
    async fn jobs_fire_on_their_interval() {
        let scheduler = Scheduler::new();
        let job = CountingJob::new("ticker", "@every 50ms", Duration::ZERO);
        scheduler.add_job(job.clone()).unwrap();
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(180)).await;
        assert!(job.count() >= 2, "expected at least 2 runs, got {}", job.count());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn no_firings_after_stop() {
        let scheduler = Scheduler::new();
        let job = CountingJob::new("stopped", "@every 40ms", Duration::ZERO);
        scheduler.add_job(job.clone()).unwrap();
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        scheduler.stop().await;
        let after_stop = job.count();

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(job.count(), after_stop);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn stop_waits_for_the_in_flight_run() {
        let scheduler = Scheduler::new();
        let job = CountingJob::new("slow", "@every 30ms", Duration::from_millis(150));
        scheduler.add_job(job.clone()).unwrap();
        scheduler.start();

        // Let one firing begin, then stop while it is still lingering.
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await;

        assert!(job.count() >= 1);
        assert_eq!(job.running(), 0, "stop returned with a run still in flight");
    }

    #[tokio::test]
    async fn overlap_gates_concurrent_firings_of_one_job() {
        let scheduler = Scheduler::new();
        let job = CountingJob::new("gated", "@every 30ms", Duration::from_millis(200));
        job.use_middleware(OverlapConfig { no_overlap: true }.middleware());
        scheduler.add_job(job.clone()).unwrap();
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(160)).await;
        // Only the first firing ran; later ticks were skipped while it slept.
        assert_eq!(job.count(), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let scheduler = Scheduler::new();
        let job = CountingJob::new("idempotent", "@every 60ms", Duration::ZERO);
        scheduler.add_job(job.clone()).unwrap();
        scheduler.start();
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(100)).await;
        // A duplicated timer would have doubled the count.
        assert!(job.count() <= 2);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn global_middlewares_are_merged_into_new_jobs() {
        let scheduler = Scheduler::new();
        scheduler.use_middleware(OverlapConfig { no_overlap: true }.middleware());

        let job = CountingJob::new("merged", "@every 1h", Duration::ZERO);
        scheduler.add_job(job.clone()).unwrap();
        assert_eq!(job.middlewares().len(), 1);
    }
}
