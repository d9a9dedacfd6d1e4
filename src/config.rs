//! Configuration assembly: job definitions from the file and from container
//! labels, merged into live jobs wired to the scheduler.

pub mod file;
pub mod labels;

use crate::error::Result;
use crate::jobs::{
    ExecJob, Job, LifecycleEvent, LifecycleJob, LocalJob, PullPolicy, RunJob, RunServiceJob,
};
use crate::middleware::{GotifyConfig, MailConfig, OverlapConfig, SaveConfig, SlackConfig};
use crate::runtime::Runtime;
use crate::scheduler::Scheduler;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Global notifier sections, attached to the scheduler as middlewares for
/// every job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalConfig {
    pub slack: SlackConfig,
    pub save: SaveConfig,
    pub mail: MailConfig,
    pub gotify: GotifyConfig,
}

impl GlobalConfig {
    fn apply(&mut self, key: &str, value: &str) -> bool {
        self.slack.apply(key, value)
            || self.save.apply(key, value)
            || self.mail.apply(key, value)
            || self.gotify.apply(key, value)
    }
}

/// Per-job middleware sections shared by every job kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobNotifierConfig {
    pub overlap: OverlapConfig,
    pub slack: SlackConfig,
    pub save: SaveConfig,
    pub mail: MailConfig,
    pub gotify: GotifyConfig,
}

impl JobNotifierConfig {
    fn apply(&mut self, key: &str, value: &str) -> bool {
        self.overlap.apply(key, value)
            || self.slack.apply(key, value)
            || self.save.apply(key, value)
            || self.mail.apply(key, value)
            || self.gotify.apply(key, value)
    }

    /// Attach the configured middlewares in chain order.
    fn attach(&self, job: &dyn Job) {
        job.use_middleware(self.overlap.middleware());
        job.use_middleware(self.slack.middleware());
        job.use_middleware(self.save.middleware());
        job.use_middleware(self.mail.middleware());
        job.use_middleware(self.gotify.middleware());
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecJobConfig {
    pub name: String,
    pub schedule: String,
    pub command: String,
    pub container: String,
    pub user: String,
    pub tty: bool,
    pub workdir: String,
    pub notifiers: JobNotifierConfig,
    pub from_labels: bool,
}

impl ExecJobConfig {
    fn apply(&mut self, key: &str, value: &str) -> bool {
        match key {
            "schedule" => self.schedule = value.to_string(),
            "command" => self.command = value.to_string(),
            "container" => self.container = value.to_string(),
            "user" => self.user = value.to_string(),
            "tty" => self.tty = value.trim() == "true",
            "workdir" => self.workdir = value.to_string(),
            _ => return self.notifiers.apply(key, value),
        }
        true
    }

    fn apply_defaults(&mut self) {
        if self.user.is_empty() {
            self.user = "root".to_string();
        }
    }

    pub fn build(&self, runtime: Arc<dyn Runtime>) -> Arc<ExecJob> {
        let mut config = self.clone();
        config.apply_defaults();

        let mut job = ExecJob::new(runtime, &config.name, &config.schedule, &config.command);
        job.container = config.container;
        job.user = config.user;
        job.tty = config.tty;
        job.workdir = config.workdir;
        job.base.from_labels = config.from_labels;

        let job = Arc::new(job);
        config.notifiers.attach(job.as_ref());
        job
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunJobConfig {
    pub name: String,
    pub schedule: String,
    pub command: String,
    pub container: String,
    pub image: String,
    pub user: String,
    pub tty: bool,
    pub delete: Option<bool>,
    pub network: String,
    pub volumes: Vec<String>,
    pub pull: String,
    pub notifiers: JobNotifierConfig,
    pub from_labels: bool,
}

impl RunJobConfig {
    fn apply(&mut self, key: &str, value: &str) -> bool {
        match key {
            "schedule" => self.schedule = value.to_string(),
            "command" => self.command = value.to_string(),
            "container" => self.container = value.to_string(),
            "image" => self.image = value.to_string(),
            "user" => self.user = value.to_string(),
            "tty" => self.tty = value.trim() == "true",
            "delete" => self.delete = Some(value.trim() == "true"),
            "network" => self.network = value.to_string(),
            "volume" => self.volumes.extend(parse_volume_value(value)),
            "pull" => self.pull = value.to_string(),
            _ => return self.notifiers.apply(key, value),
        }
        true
    }

    fn apply_defaults(&mut self) {
        if self.user.is_empty() {
            self.user = "root".to_string();
        }
        if self.delete.is_none() {
            self.delete = Some(true);
        }
    }

    pub fn build(&self, runtime: Arc<dyn Runtime>) -> Arc<RunJob> {
        let mut config = self.clone();
        config.apply_defaults();

        let mut job = RunJob::new(runtime, &config.name, &config.schedule, &config.command);
        job.container = config.container;
        job.image = config.image;
        job.user = config.user;
        job.tty = config.tty;
        job.delete = config.delete.unwrap_or(true);
        job.network = config.network;
        job.volumes = config.volumes;
        if !config.pull.is_empty() {
            match config.pull.parse::<PullPolicy>() {
                Ok(policy) => job.pull = policy,
                Err(error) => {
                    tracing::warn!(job = %config.name, %error, "keeping the default pull policy");
                }
            }
        }
        job.base.from_labels = config.from_labels;

        let job = Arc::new(job);
        config.notifiers.attach(job.as_ref());
        job
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceJobConfig {
    pub name: String,
    pub schedule: String,
    pub command: String,
    pub image: String,
    pub network: String,
    pub delete: Option<bool>,
    pub notifiers: JobNotifierConfig,
    pub from_labels: bool,
}

impl ServiceJobConfig {
    fn apply(&mut self, key: &str, value: &str) -> bool {
        match key {
            "schedule" => self.schedule = value.to_string(),
            "command" => self.command = value.to_string(),
            "image" => self.image = value.to_string(),
            "network" => self.network = value.to_string(),
            "delete" => self.delete = Some(value.trim() == "true"),
            _ => return self.notifiers.apply(key, value),
        }
        true
    }

    pub fn build(&self, runtime: Arc<dyn Runtime>) -> Arc<RunServiceJob> {
        let mut job = RunServiceJob::new(runtime, &self.name, &self.schedule, &self.command);
        job.image = self.image.clone();
        job.network = self.network.clone();
        job.delete = self.delete.unwrap_or(true);
        job.base.from_labels = self.from_labels;

        let job = Arc::new(job);
        self.notifiers.attach(job.as_ref());
        job
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalJobConfig {
    pub name: String,
    pub schedule: String,
    pub command: String,
    pub dir: String,
    pub environment: Vec<String>,
    pub notifiers: JobNotifierConfig,
    pub from_labels: bool,
}

impl LocalJobConfig {
    fn apply(&mut self, key: &str, value: &str) -> bool {
        match key {
            "schedule" => self.schedule = value.to_string(),
            "command" => self.command = value.to_string(),
            "dir" => self.dir = value.to_string(),
            "environment" => self.environment.push(value.to_string()),
            _ => return self.notifiers.apply(key, value),
        }
        true
    }

    pub fn build(&self) -> Arc<LocalJob> {
        let mut job = LocalJob::new(&self.name, &self.schedule, &self.command);
        if !self.dir.is_empty() {
            job.dir = Some(self.dir.clone());
        }
        job.environment = self.environment.clone();
        job.base.from_labels = self.from_labels;

        let job = Arc::new(job);
        self.notifiers.attach(job.as_ref());
        job
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleJobConfig {
    pub name: String,
    pub command: String,
    pub container: String,
    pub event_type: String,
    pub notifiers: JobNotifierConfig,
    pub from_labels: bool,
}

impl LifecycleJobConfig {
    fn apply(&mut self, key: &str, value: &str) -> bool {
        match key {
            "command" => self.command = value.to_string(),
            "container" => self.container = value.to_string(),
            "event-type" => self.event_type = value.to_string(),
            // Tolerated so a lifecycle block can share a template with the
            // scheduled kinds; lifecycle jobs are event-driven.
            "schedule" => {}
            _ => return self.notifiers.apply(key, value),
        }
        true
    }

    pub fn build(&self) -> Arc<LifecycleJob> {
        let mut job = LifecycleJob::new(&self.name, &self.command);
        job.container = self.container.clone();
        if !self.event_type.is_empty() {
            match self.event_type.parse::<LifecycleEvent>() {
                Ok(event) => job.event_type = event,
                Err(error) => {
                    tracing::warn!(job = %self.name, %error, "keeping the default start event");
                }
            }
        }
        job.base.from_labels = self.from_labels;

        let job = Arc::new(job);
        self.notifiers.attach(job.as_ref());
        job
    }
}

/// A `volume` value is either a JSON string array or a single bind spec.
fn parse_volume_value(value: &str) -> Vec<String> {
    match serde_json::from_str::<Vec<String>>(value) {
        Ok(volumes) => volumes,
        Err(_) => vec![value.to_string()],
    }
}

/// The full declared configuration, from either source.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub global: GlobalConfig,
    pub exec_jobs: HashMap<String, ExecJobConfig>,
    pub run_jobs: HashMap<String, RunJobConfig>,
    pub service_jobs: HashMap<String, ServiceJobConfig>,
    pub local_jobs: HashMap<String, LocalJobConfig>,
    pub lifecycle_jobs: HashMap<String, LifecycleJobConfig>,
}

impl Config {
    pub fn job_count(&self) -> usize {
        self.exec_jobs.len()
            + self.run_jobs.len()
            + self.service_jobs.len()
            + self.local_jobs.len()
            + self.lifecycle_jobs.len()
    }

    /// Attach the global notifier middlewares to the scheduler.
    pub fn attach_global_middlewares(&self, scheduler: &Scheduler) {
        scheduler.use_middleware(self.global.slack.middleware());
        scheduler.use_middleware(self.global.save.middleware());
        scheduler.use_middleware(self.global.mail.middleware());
        scheduler.use_middleware(self.global.gotify.middleware());
    }

    /// Build every declared job and register it: scheduled kinds with the
    /// scheduler, lifecycle jobs with the event reactor's registry. Docker
    /// kinds are skipped when no runtime is available.
    pub fn register_jobs(
        &self,
        scheduler: &Scheduler,
        runtime: Option<Arc<dyn Runtime>>,
        registry: &JobRegistry,
    ) -> Result<()> {
        if let Some(runtime) = &runtime {
            for config in self.exec_jobs.values() {
                let job = config.build(runtime.clone());
                scheduler.add_job(job.clone())?;
                registry.store_exec(job);
            }
            for config in self.run_jobs.values() {
                scheduler.add_job(config.build(runtime.clone()))?;
            }
            for config in self.service_jobs.values() {
                scheduler.add_job(config.build(runtime.clone()))?;
            }
            for config in self.lifecycle_jobs.values() {
                registry.store_lifecycle(config.build());
            }
        } else if self.exec_jobs.len()
            + self.run_jobs.len()
            + self.service_jobs.len()
            + self.lifecycle_jobs.len()
            > 0
        {
            tracing::warn!(
                "docker integration is disabled; only job-local entries will run"
            );
        }

        for config in self.local_jobs.values() {
            let job = config.build();
            scheduler.add_job(job.clone())?;
            registry.store_local(job);
        }

        Ok(())
    }
}

/// Live jobs keyed by name, shared between the file loader, the label
/// reconciler, and the event reactor. Lifecycle jobs are owned here rather
/// than by the scheduler.
#[derive(Default)]
pub struct JobRegistry {
    pub exec: Mutex<HashMap<String, Arc<ExecJob>>>,
    pub local: Mutex<HashMap<String, Arc<LocalJob>>>,
    pub lifecycle: Mutex<HashMap<String, Arc<LifecycleJob>>>,
}

impl JobRegistry {
    pub fn store_exec(&self, job: Arc<ExecJob>) {
        let mut map = self.exec.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(job.name().to_string(), job);
    }

    pub fn store_local(&self, job: Arc<LocalJob>) {
        let mut map = self.local.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(job.name().to_string(), job);
    }

    pub fn store_lifecycle(&self, job: Arc<LifecycleJob>) {
        let mut map = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        map.insert(job.name().to_string(), job);
    }

    pub fn lifecycle_jobs(&self) -> Vec<Arc<LifecycleJob>> {
        let map = self.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        map.values().cloned().collect()
    }
}

/// Report a key nobody consumed. The config format tolerates unknown keys.
pub(crate) fn warn_unknown_key(section: &str, key: &str) {
    tracing::warn!(section = %section, key = %key, "ignoring unknown configuration key");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::mock::MockRuntime;

    #[test]
    fn exec_build_applies_the_user_default() {
        let config = ExecJobConfig {
            name: "backup".to_string(),
            schedule: "@every 10s".to_string(),
            command: "echo hi".to_string(),
            container: "db".to_string(),
            ..Default::default()
        };
        let job = config.build(Arc::new(MockRuntime::new()));
        assert_eq!(job.user, "root");
    }

    #[test]
    fn defaults_do_not_change_the_fingerprint_across_builds() {
        let config = ExecJobConfig {
            name: "backup".to_string(),
            schedule: "@every 10s".to_string(),
            command: "a".to_string(),
            ..Default::default()
        };
        let first = config.build(Arc::new(MockRuntime::new()));
        let second = config.build(Arc::new(MockRuntime::new()));
        assert_eq!(first.fingerprint(), second.fingerprint());

        let mut changed = config.clone();
        changed.command = "b".to_string();
        let third = changed.build(Arc::new(MockRuntime::new()));
        assert_ne!(first.fingerprint(), third.fingerprint());
    }

    #[test]
    fn run_build_defaults_delete_to_true() {
        let config = RunJobConfig {
            name: "nightly".to_string(),
            schedule: "@daily".to_string(),
            command: "true".to_string(),
            image: "alpine".to_string(),
            ..Default::default()
        };
        let job = config.build(Arc::new(MockRuntime::new()));
        assert!(job.delete);

        let mut keep = config.clone();
        keep.delete = Some(false);
        assert!(!keep.build(Arc::new(MockRuntime::new())).delete);
    }

    #[test]
    fn volume_values_accept_json_arrays() {
        assert_eq!(
            parse_volume_value(r#"["/a:/a","/b:/b"]"#),
            vec!["/a:/a".to_string(), "/b:/b".to_string()]
        );
        assert_eq!(parse_volume_value("/data:/data"), vec!["/data:/data".to_string()]);
    }

    #[test]
    fn notifier_middlewares_attach_in_order() {
        let mut config = LocalJobConfig {
            name: "notified".to_string(),
            schedule: "@every 1m".to_string(),
            command: "true".to_string(),
            ..Default::default()
        };
        config.notifiers.overlap.no_overlap = true;
        config.notifiers.slack.slack_webhook = "https://hooks.example/x".to_string();
        let job = config.build();
        assert_eq!(job.middlewares().len(), 2);
    }

    #[test]
    fn register_jobs_skips_docker_kinds_without_a_runtime() {
        let mut config = Config::default();
        config.exec_jobs.insert(
            "backup".to_string(),
            ExecJobConfig {
                name: "backup".to_string(),
                schedule: "@every 10s".to_string(),
                command: "true".to_string(),
                ..Default::default()
            },
        );
        config.local_jobs.insert(
            "cleanup".to_string(),
            LocalJobConfig {
                name: "cleanup".to_string(),
                schedule: "@every 1h".to_string(),
                command: "true".to_string(),
                ..Default::default()
            },
        );

        let scheduler = Scheduler::new();
        let registry = JobRegistry::default();
        config
            .register_jobs(&scheduler, None, &registry)
            .unwrap();
        assert_eq!(scheduler.job_count(), 1);
        assert_eq!(scheduler.jobs()[0].name(), "cleanup");
    }

    #[test]
    fn register_jobs_rejects_an_empty_schedule() {
        let mut config = Config::default();
        config.local_jobs.insert(
            "broken".to_string(),
            LocalJobConfig {
                name: "broken".to_string(),
                command: "true".to_string(),
                ..Default::default()
            },
        );

        let scheduler = Scheduler::new();
        let registry = JobRegistry::default();
        let result = config.register_jobs(&scheduler, None, &registry);
        assert!(matches!(result, Err(crate::error::Error::EmptySchedule)));
    }

    #[test]
    fn lifecycle_build_parses_the_event_type() {
        let config = LifecycleJobConfig {
            name: "on-stop".to_string(),
            command: "echo down".to_string(),
            container: "worker".to_string(),
            event_type: "stop".to_string(),
            ..Default::default()
        };
        let job = config.build();
        assert_eq!(job.event_type, crate::jobs::LifecycleEvent::Stop);
    }

}
