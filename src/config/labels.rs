//! Container-label configuration grammar.
//!
//! Keys use `.` as separator: `chadburn.<job-kind>.<job-name>.<field>`.
//! Two-segment keys (`chadburn.<field>`) are global options and only apply
//! when the container carries the service marker `chadburn.service=true`.

use super::{
    Config, ExecJobConfig, LifecycleJobConfig, LocalJobConfig, RunJobConfig, ServiceJobConfig,
};
use crate::LABEL_PREFIX;
use crate::runtime::Container;

const JOB_EXEC: &str = "job-exec";
const JOB_RUN: &str = "job-run";
const JOB_SERVICE_RUN: &str = "job-service-run";
const JOB_LOCAL: &str = "job-local";
const JOB_LIFECYCLE: &str = "job-lifecycle";

/// Label marking a container as participating: `chadburn.enabled=true`.
pub fn enabled_filter() -> String {
    format!("{LABEL_PREFIX}.enabled=true")
}

/// Label filter catching containers that only declare run jobs.
pub fn job_run_filter() -> String {
    format!("{LABEL_PREFIX}.{JOB_RUN}")
}

fn service_marker(container: &Container) -> bool {
    container
        .labels
        .get(&format!("{LABEL_PREFIX}.service"))
        .map(String::as_str)
        == Some("true")
}

impl Config {
    /// Build a configuration from the labels of the given containers.
    ///
    /// Kind-specific binding rules:
    /// - `job-exec` and `job-run` on a non-service container are forced to
    ///   target that container.
    /// - `job-local` and `job-service-run` are accepted only from the
    ///   service container.
    /// - `job-lifecycle` is always bound to the emitting container.
    pub fn from_labels(containers: &[Container]) -> Config {
        let mut config = Config::default();

        for container in containers {
            let is_service = service_marker(container);
            let prefix = format!("{LABEL_PREFIX}.");

            for (key, value) in &container.labels {
                let Some(rest) = key.strip_prefix(&prefix) else {
                    continue;
                };
                let parts: Vec<&str> = rest.splitn(3, '.').collect();

                match parts.as_slice() {
                    // Marker labels consumed by the poll filters themselves.
                    ["enabled"] | ["service"] => {}
                    // Two-segment key: a global option from the service
                    // container.
                    [field] => {
                        if is_service && !config.global.apply(field, value) {
                            super::warn_unknown_key("global (labels)", field);
                        }
                    }
                    // `<kind>.<name>` without a field segment.
                    [_, _] => {
                        tracing::debug!(
                            container = %container.name,
                            key = %key,
                            "ignoring label without a field segment"
                        );
                    }
                    [kind, name, field] => {
                        config.apply_job_label(container, is_service, kind, name, field, value);
                    }
                    _ => {}
                }
            }
        }

        config
    }

    fn apply_job_label(
        &mut self,
        container: &Container,
        is_service: bool,
        kind: &str,
        name: &str,
        field: &str,
        value: &str,
    ) {
        match kind {
            JOB_EXEC => {
                let job = self
                    .exec_jobs
                    .entry(name.to_string())
                    .or_insert_with(|| ExecJobConfig {
                        name: name.to_string(),
                        from_labels: true,
                        ..Default::default()
                    });
                if !job.apply(field, value) {
                    super::warn_unknown_key(JOB_EXEC, field);
                }
                // A label on a plain container means: exec in that container.
                if !is_service {
                    job.container = container.name.clone();
                }
            }
            JOB_LOCAL if is_service => {
                let job = self
                    .local_jobs
                    .entry(name.to_string())
                    .or_insert_with(|| LocalJobConfig {
                        name: name.to_string(),
                        from_labels: true,
                        ..Default::default()
                    });
                if !job.apply(field, value) {
                    super::warn_unknown_key(JOB_LOCAL, field);
                }
            }
            JOB_SERVICE_RUN if is_service => {
                let job = self
                    .service_jobs
                    .entry(name.to_string())
                    .or_insert_with(|| ServiceJobConfig {
                        name: name.to_string(),
                        from_labels: true,
                        ..Default::default()
                    });
                if !job.apply(field, value) {
                    super::warn_unknown_key(JOB_SERVICE_RUN, field);
                }
            }
            JOB_RUN => {
                let job = self
                    .run_jobs
                    .entry(name.to_string())
                    .or_insert_with(|| RunJobConfig {
                        name: name.to_string(),
                        from_labels: true,
                        ..Default::default()
                    });
                if !job.apply(field, value) {
                    super::warn_unknown_key(JOB_RUN, field);
                }
                if !is_service {
                    job.container = container.name.clone();
                }
            }
            JOB_LIFECYCLE => {
                let job = self
                    .lifecycle_jobs
                    .entry(name.to_string())
                    .or_insert_with(|| LifecycleJobConfig {
                        name: name.to_string(),
                        from_labels: true,
                        ..Default::default()
                    });
                if !job.apply(field, value) {
                    super::warn_unknown_key(JOB_LIFECYCLE, field);
                }
                job.container = container.name.clone();
            }
            JOB_LOCAL | JOB_SERVICE_RUN => {
                tracing::debug!(
                    container = %container.name,
                    kind = %kind,
                    job = %name,
                    "job kind only accepted from the service container, ignoring"
                );
            }
            other => {
                tracing::debug!(
                    container = %container.name,
                    kind = %other,
                    "ignoring unknown job kind label"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(name: &str, labels: &[(&str, &str)]) -> Container {
        Container {
            id: format!("{name}-id"),
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            running: true,
        }
    }

    #[test]
    fn exec_job_is_bound_to_the_emitting_container() {
        let containers = vec![container(
            "db",
            &[
                ("chadburn.enabled", "true"),
                ("chadburn.job-exec.backup.schedule", "@every 10s"),
                ("chadburn.job-exec.backup.command", "pg_dump db"),
            ],
        )];

        let config = Config::from_labels(&containers);
        let backup = &config.exec_jobs["backup"];
        assert_eq!(backup.container, "db");
        assert_eq!(backup.schedule, "@every 10s");
        assert!(backup.from_labels);
    }

    #[test]
    fn local_jobs_require_the_service_container() {
        let plain = vec![container(
            "app",
            &[
                ("chadburn.enabled", "true"),
                ("chadburn.job-local.sneaky.schedule", "@every 1m"),
                ("chadburn.job-local.sneaky.command", "true"),
            ],
        )];
        assert!(Config::from_labels(&plain).local_jobs.is_empty());

        let service = vec![container(
            "chadburn",
            &[
                ("chadburn.service", "true"),
                ("chadburn.job-local.ok.schedule", "@every 1m"),
                ("chadburn.job-local.ok.command", "true"),
            ],
        )];
        assert_eq!(Config::from_labels(&service).local_jobs.len(), 1);
    }

    #[test]
    fn service_run_jobs_require_the_service_container() {
        let plain = vec![container(
            "app",
            &[("chadburn.job-service-run.sync.image", "sync:latest")],
        )];
        assert!(Config::from_labels(&plain).service_jobs.is_empty());

        let service = vec![container(
            "chadburn",
            &[
                ("chadburn.service", "true"),
                ("chadburn.job-service-run.sync.image", "sync:latest"),
            ],
        )];
        assert_eq!(
            Config::from_labels(&service).service_jobs["sync"].image,
            "sync:latest"
        );
    }

    #[test]
    fn lifecycle_jobs_are_always_bound_to_the_emitting_container() {
        let containers = vec![container(
            "worker",
            &[
                ("chadburn.enabled", "true"),
                ("chadburn.job-lifecycle.on-start.command", "echo up"),
                ("chadburn.job-lifecycle.on-start.event-type", "start"),
                // A stray container field is overridden by the binding rule.
                ("chadburn.job-lifecycle.on-start.container", "elsewhere"),
            ],
        )];

        let config = Config::from_labels(&containers);
        assert_eq!(config.lifecycle_jobs["on-start"].container, "worker");
    }

    #[test]
    fn global_options_apply_only_from_the_service_container() {
        let plain = vec![container(
            "app",
            &[
                ("chadburn.enabled", "true"),
                ("chadburn.slack-webhook", "https://hooks.example/x"),
            ],
        )];
        assert!(Config::from_labels(&plain).global.slack.slack_webhook.is_empty());

        let service = vec![container(
            "chadburn",
            &[
                ("chadburn.service", "true"),
                ("chadburn.slack-webhook", "https://hooks.example/x"),
            ],
        )];
        assert_eq!(
            Config::from_labels(&service).global.slack.slack_webhook,
            "https://hooks.example/x"
        );
    }

    #[test]
    fn volume_labels_accept_json_arrays() {
        let containers = vec![container(
            "runner",
            &[
                ("chadburn.job-run.nightly.image", "batch:latest"),
                ("chadburn.job-run.nightly.volume", r#"["/a:/a","/b:/b"]"#),
            ],
        )];
        let config = Config::from_labels(&containers);
        assert_eq!(config.run_jobs["nightly"].volumes, vec!["/a:/a", "/b:/b"]);
    }

    #[test]
    fn round_trips_a_label_set_through_parse() {
        let labels = [
            ("chadburn.enabled", "true"),
            ("chadburn.job-exec.backup.schedule", "@every 10s"),
            ("chadburn.job-exec.backup.command", "a"),
            ("chadburn.job-exec.backup.no-overlap", "true"),
        ];
        let config = Config::from_labels(&[container("db", &labels)]);
        let backup = &config.exec_jobs["backup"];
        assert_eq!(backup.schedule, "@every 10s");
        assert_eq!(backup.command, "a");
        assert!(backup.notifiers.overlap.no_overlap);

        // Parsing the same labels again yields an identical configuration.
        let again = Config::from_labels(&[container("db", &labels)]);
        assert_eq!(*backup, again.exec_jobs["backup"]);
    }

    #[test]
    fn unrelated_labels_are_ignored() {
        let containers = vec![container(
            "app",
            &[
                ("maintainer", "someone@example.com"),
                ("chadburn.enabled", "true"),
            ],
        )];
        let config = Config::from_labels(&containers);
        assert_eq!(config.job_count(), 0);
    }
}
