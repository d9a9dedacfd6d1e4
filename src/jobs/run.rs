//! Run jobs create, run, and optionally delete a throwaway container from an
//! image.

use super::exec::exec_in_container;
use super::{Job, JobBase, split_command};
use crate::error::{Error, Result, RuntimeError};
use crate::middleware::Context;
use crate::random_id;
use crate::runtime::{ContainerSpec, OutputChunk, Runtime};
use crate::variables::Variables;
use async_trait::async_trait;
use futures::StreamExt;
use std::str::FromStr;
use std::sync::Arc;

/// When to pull the job's image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PullPolicy {
    /// Pull unconditionally before every run.
    Always,
    /// Pull only when the image is not present on the host.
    #[default]
    Missing,
    /// Never pull; a missing image fails the run.
    Never,
}

impl FromStr for PullPolicy {
    type Err = crate::error::ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "always" | "true" => Ok(PullPolicy::Always),
            "missing" => Ok(PullPolicy::Missing),
            "never" | "false" => Ok(PullPolicy::Never),
            other => Err(crate::error::ConfigError::Invalid(format!(
                "unknown pull policy: {other:?}"
            ))),
        }
    }
}

pub struct RunJob {
    pub base: JobBase,
    pub runtime: Arc<dyn Runtime>,
    /// Target container for the image-less mode; forced to the emitting
    /// container when the job comes from a non-service container's labels.
    pub container: String,
    pub image: String,
    pub user: String,
    pub tty: bool,
    pub delete: bool,
    pub network: String,
    pub volumes: Vec<String>,
    pub pull: PullPolicy,
}

impl RunJob {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        name: impl Into<String>,
        schedule: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            base: JobBase::new(name, schedule, command),
            runtime,
            container: String::new(),
            image: String::new(),
            user: "root".to_string(),
            tty: false,
            delete: true,
            network: String::new(),
            volumes: Vec::new(),
            pull: PullPolicy::default(),
        }
    }

    async fn run_container(&self, ctx: &Context) -> Result<()> {
        let vars = Variables::for_container(&self.container, &self.container);
        let command = self.processed_command(&vars);
        let argv = if command.is_empty() {
            Vec::new()
        } else {
            split_command(&command)?
        };

        if self.pull == PullPolicy::Always {
            self.runtime.pull_image(&self.image).await?;
        }

        let spec = ContainerSpec {
            name: format!("chadburn-{}", random_id()),
            image: self.image.clone(),
            cmd: argv,
            env: Vec::new(),
            user: (!self.user.is_empty()).then(|| self.user.clone()),
            tty: self.tty,
            binds: self.volumes.clone(),
            network_mode: (!self.network.is_empty()).then(|| self.network.clone()),
            labels: Default::default(),
        };

        let id = match self.runtime.create_container(&spec).await {
            Ok(id) => id,
            Err(RuntimeError::ImageNotFound(_)) if self.pull == PullPolicy::Missing => {
                self.runtime.pull_image(&self.image).await?;
                self.runtime.create_container(&spec).await?
            }
            Err(error) => return Err(error.into()),
        };

        let result = self.start_and_watch(ctx, &id).await;

        if self.delete {
            if let Err(error) = self.runtime.remove_container(&id).await {
                tracing::warn!(job = %self.name(), container = %id, %error, "failed to remove container");
            }
        }

        result
    }

    async fn start_and_watch(&self, ctx: &Context, id: &str) -> Result<()> {
        self.runtime.start_container(id).await?;

        let mut logs = self.runtime.container_logs(id, true).await?;
        while let Some(chunk) = logs.next().await {
            match chunk? {
                OutputChunk::Stdout(bytes) => ctx.execution.write_stdout(&bytes),
                OutputChunk::Stderr(bytes) => ctx.execution.write_stderr(&bytes),
            }
        }

        match self.runtime.wait_container(id).await? {
            0 => Ok(()),
            code => Err(Error::ExitCode(code)),
        }
    }
}

#[async_trait]
impl Job for RunJob {
    fn base(&self) -> &JobBase {
        &self.base
    }

    fn fingerprint(&self) -> String {
        let mut out = String::new();
        self.base.write_fingerprint(&mut out);
        out.push_str(&self.container);
        out.push_str(&self.image);
        out.push_str(&self.user);
        out.push_str(if self.tty { "true" } else { "false" });
        out.push_str(if self.delete { "true" } else { "false" });
        out.push_str(&self.network);
        out.push_str(&self.volumes.join(","));
        out
    }

    async fn run(&self, ctx: &Context) -> Result<()> {
        if self.image.is_empty() && self.container.is_empty() {
            return Err(crate::error::ConfigError::Invalid(
                "a job-run needs either an image or a container".to_string(),
            )
            .into());
        }

        // No image: fold into the exec path against the existing container.
        if self.image.is_empty() {
            let vars = Variables::for_container(&self.container, &self.container);
            let command = self.processed_command(&vars);
            let argv = split_command(&command)?;
            return exec_in_container(
                self.runtime.as_ref(),
                ctx,
                &self.container,
                argv,
                &self.user,
                self.tty,
                "",
            )
            .await;
        }

        self.run_container(ctx).await
    }
}
