//! INI configuration file parsing.
//!
//! Sections are `[global]` plus one section per job, with the job name in
//! quotes: `[job-exec "backup"]`. Unknown sections and keys are tolerated
//! with a warning.

use super::{
    Config, ExecJobConfig, LifecycleJobConfig, LocalJobConfig, RunJobConfig, ServiceJobConfig,
    warn_unknown_key,
};
use crate::error::ConfigError;
use ini_core::{Item, Parser};
use std::path::Path;

const JOB_EXEC: &str = "job-exec";
const JOB_RUN: &str = "job-run";
const JOB_SERVICE_RUN: &str = "job-service-run";
const JOB_LOCAL: &str = "job-local";
const JOB_LIFECYCLE: &str = "job-lifecycle";

/// Parse target for the section currently being read.
enum Section {
    Global,
    Exec(String),
    Run(String),
    Service(String),
    Local(String),
    Lifecycle(String),
    Unknown(String),
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Config::from_string(&text)
    }

    pub fn from_string(text: &str) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        let mut section = Section::Global;

        for item in Parser::new(text) {
            match item {
                Item::Section(heading) => {
                    section = parse_section_heading(heading.trim())?;
                    // Materialize the job entry so empty sections still show
                    // up in `validate` output.
                    config.touch(&section);
                }
                Item::Property(key, value) => {
                    let key = key.trim();
                    let value = value.unwrap_or("").trim();
                    config.apply_to_section(&section, key, value);
                }
                Item::Error(error) => {
                    return Err(ConfigError::Invalid(format!("malformed line: {error}")));
                }
                Item::SectionEnd | Item::Comment(_) | Item::Blank => {}
            }
        }

        Ok(config)
    }

    fn touch(&mut self, section: &Section) {
        match section {
            Section::Exec(name) => {
                self.exec_jobs
                    .entry(name.clone())
                    .or_insert_with(|| ExecJobConfig {
                        name: name.clone(),
                        ..Default::default()
                    });
            }
            Section::Run(name) => {
                self.run_jobs
                    .entry(name.clone())
                    .or_insert_with(|| RunJobConfig {
                        name: name.clone(),
                        ..Default::default()
                    });
            }
            Section::Service(name) => {
                self.service_jobs
                    .entry(name.clone())
                    .or_insert_with(|| ServiceJobConfig {
                        name: name.clone(),
                        ..Default::default()
                    });
            }
            Section::Local(name) => {
                self.local_jobs
                    .entry(name.clone())
                    .or_insert_with(|| LocalJobConfig {
                        name: name.clone(),
                        ..Default::default()
                    });
            }
            Section::Lifecycle(name) => {
                self.lifecycle_jobs
                    .entry(name.clone())
                    .or_insert_with(|| LifecycleJobConfig {
                        name: name.clone(),
                        ..Default::default()
                    });
            }
            Section::Global | Section::Unknown(_) => {}
        }
    }

    fn apply_to_section(&mut self, section: &Section, key: &str, value: &str) {
        let known = match section {
            Section::Global => self.global.apply(key, value),
            Section::Exec(name) => match self.exec_jobs.get_mut(name) {
                Some(job) => job.apply(key, value),
                None => false,
            },
            Section::Run(name) => match self.run_jobs.get_mut(name) {
                Some(job) => job.apply(key, value),
                None => false,
            },
            Section::Service(name) => match self.service_jobs.get_mut(name) {
                Some(job) => job.apply(key, value),
                None => false,
            },
            Section::Local(name) => match self.local_jobs.get_mut(name) {
                Some(job) => job.apply(key, value),
                None => false,
            },
            Section::Lifecycle(name) => match self.lifecycle_jobs.get_mut(name) {
                Some(job) => job.apply(key, value),
                None => false,
            },
            Section::Unknown(_) => false,
        };

        if !known {
            let section_name = match section {
                Section::Global => "global".to_string(),
                Section::Exec(name) => format!("{JOB_EXEC} {name:?}"),
                Section::Run(name) => format!("{JOB_RUN} {name:?}"),
                Section::Service(name) => format!("{JOB_SERVICE_RUN} {name:?}"),
                Section::Local(name) => format!("{JOB_LOCAL} {name:?}"),
                Section::Lifecycle(name) => format!("{JOB_LIFECYCLE} {name:?}"),
                Section::Unknown(name) => name.clone(),
            };
            warn_unknown_key(&section_name, key);
        }
    }
}

/// Split `job-exec "backup"` into the kind and the quoted name.
fn parse_section_heading(heading: &str) -> Result<Section, ConfigError> {
    if heading.eq_ignore_ascii_case("global") {
        return Ok(Section::Global);
    }

    let (kind, name) = match heading.split_once(char::is_whitespace) {
        Some((kind, rest)) => {
            let name = rest.trim().trim_matches('"');
            if name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "section {heading:?} is missing a job name"
                )));
            }
            (kind.trim(), name.to_string())
        }
        None => (heading, String::new()),
    };

    match kind {
        JOB_EXEC | JOB_RUN | JOB_SERVICE_RUN | JOB_LOCAL | JOB_LIFECYCLE if name.is_empty() => {
            Err(ConfigError::Invalid(format!(
                "section {heading:?} is missing a job name"
            )))
        }
        JOB_EXEC => Ok(Section::Exec(name)),
        JOB_RUN => Ok(Section::Run(name)),
        JOB_SERVICE_RUN => Ok(Section::Service(name)),
        JOB_LOCAL => Ok(Section::Local(name)),
        JOB_LIFECYCLE => Ok(Section::Lifecycle(name)),
        other => {
            tracing::warn!(section = %other, "ignoring unknown configuration section");
            Ok(Section::Unknown(other.to_string()))
        }
    }
}
