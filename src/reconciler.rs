//! Label reconciler: keeps the scheduler's job set consistent with the
//! configuration declared on live containers.
//!
//! A fixed-cadence poll lists participating containers, rebuilds the
//! label-derived configuration, and applies a minimal diff: remove jobs
//! whose labels disappeared, cancel-and-restart jobs whose fingerprint
//! changed, add new ones. Jobs loaded from the static file are never
//! touched. An in-flight run always completes against the old definition;
//! a changed definition takes effect from the next firing.

use crate::config::{Config, JobRegistry, labels};
use crate::error::RuntimeError;
use crate::jobs::Job;
use crate::runtime::{Backoff, Container, Runtime};
use crate::scheduler::Scheduler;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_secs(10);

pub struct Reconciler {
    runtime: Arc<dyn Runtime>,
    scheduler: Scheduler,
    registry: Arc<JobRegistry>,
    cancel: CancellationToken,
    /// Overridable for tests; 10 s in production.
    pub poll_interval: Duration,
}

impl Reconciler {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        scheduler: Scheduler,
        registry: Arc<JobRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            scheduler,
            registry,
            cancel,
            poll_interval: POLL_INTERVAL,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let mut backoff = Backoff::new();
        let mut delay = self.poll_interval;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            match self.poll_containers().await {
                Ok(containers) => {
                    backoff.reset();
                    delay = self.poll_interval;
                    let parsed = Config::from_labels(&containers);
                    self.apply(&parsed);
                }
                Err(error) if error.is_unavailable() => {
                    delay = backoff.next_delay();
                    tracing::warn!(%error, retry_in = ?delay, "runtime unavailable, backing off");
                }
                Err(error) => {
                    delay = self.poll_interval;
                    tracing::debug!(%error, "label poll failed");
                }
            }
        }
    }

    /// List participating containers: those with the enabled marker plus
    /// those that only declare run jobs, de-duplicated by name.
    async fn poll_containers(&self) -> Result<Vec<Container>, RuntimeError> {
        let enabled = self
            .runtime
            .list_containers(label_filter(labels::enabled_filter()))
            .await?;
        let job_run = self
            .runtime
            .list_containers(label_filter(labels::job_run_filter()))
            .await?;

        let mut by_name: HashMap<String, Container> = HashMap::new();
        for container in enabled.into_iter().chain(job_run) {
            by_name.insert(container.name.clone(), container);
        }
        Ok(by_name.into_values().collect())
    }

    /// Apply the diff between the registry and the freshly parsed label
    /// configuration. Reconciling an unchanged label set is a no-op.
    pub fn apply(&self, parsed: &Config) {
        self.apply_exec(parsed);
        self.apply_local(parsed);
        self.apply_lifecycle(parsed);
    }

    fn apply_exec(&self, parsed: &Config) {
        let mut registry = self
            .registry
            .exec
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let names: Vec<String> = registry.keys().cloned().collect();
        for name in names {
            let current = registry[&name].clone();
            if !current.from_labels() {
                continue;
            }
            match parsed.exec_jobs.get(&name) {
                None => {
                    self.scheduler.remove_job(current.as_ref());
                    registry.remove(&name);
                }
                Some(config) => {
                    let candidate = config.build(self.runtime.clone());
                    if candidate.fingerprint() != current.fingerprint() {
                        self.scheduler.remove_job(current.as_ref());
                        if let Err(error) = self.scheduler.add_job(candidate.clone()) {
                            tracing::error!(job = %name, %error, "failed to re-register changed job");
                            registry.remove(&name);
                        } else {
                            registry.insert(name, candidate);
                        }
                    }
                }
            }
        }

        for (name, config) in &parsed.exec_jobs {
            if registry.contains_key(name) {
                continue;
            }
            let job = config.build(self.runtime.clone());
            if let Err(error) = self.scheduler.add_job(job.clone()) {
                tracing::error!(job = %name, %error, "failed to register labelled job");
                continue;
            }
            registry.insert(name.clone(), job);
        }
    }

    fn apply_local(&self, parsed: &Config) {
        let mut registry = self
            .registry
            .local
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let names: Vec<String> = registry.keys().cloned().collect();
        for name in names {
            let current = registry[&name].clone();
            if !current.from_labels() {
                continue;
            }
            match parsed.local_jobs.get(&name) {
                None => {
                    self.scheduler.remove_job(current.as_ref());
                    registry.remove(&name);
                }
                Some(config) => {
                    let candidate = config.build();
                    if candidate.fingerprint() != current.fingerprint() {
                        self.scheduler.remove_job(current.as_ref());
                        if let Err(error) = self.scheduler.add_job(candidate.clone()) {
                            tracing::error!(job = %name, %error, "failed to re-register changed job");
                            registry.remove(&name);
                        } else {
                            registry.insert(name, candidate);
                        }
                    }
                }
            }
        }

        for (name, config) in &parsed.local_jobs {
            if registry.contains_key(name) {
                continue;
            }
            let job = config.build();
            if let Err(error) = self.scheduler.add_job(job.clone()) {
                tracing::error!(job = %name, %error, "failed to register labelled job");
                continue;
            }
            registry.insert(name.clone(), job);
        }
    }

    /// Lifecycle jobs are not cron-scheduled; the diff edits the registry
    /// the event reactor reads from.
    fn apply_lifecycle(&self, parsed: &Config) {
        let mut registry = self
            .registry
            .lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        let names: Vec<String> = registry.keys().cloned().collect();
        for name in names {
            let current = registry[&name].clone();
            if !current.from_labels() {
                continue;
            }
            match parsed.lifecycle_jobs.get(&name) {
                None => {
                    registry.remove(&name);
                    tracing::info!(job = %name, "lifecycle job removed");
                }
                Some(config) => {
                    let candidate = config.build();
                    if candidate.fingerprint() != current.fingerprint() {
                        registry.insert(name.clone(), candidate);
                        tracing::info!(job = %name, "lifecycle job replaced");
                    }
                }
            }
        }

        for (name, config) in &parsed.lifecycle_jobs {
            if !registry.contains_key(name) {
                registry.insert(name.clone(), config.build());
                tracing::info!(job = %name, "lifecycle job registered");
            }
        }
    }
}

fn label_filter(filter: String) -> HashMap<String, Vec<String>> {
    HashMap::from([("label".to_string(), vec![filter])])
}
