//! Local jobs run a command as a child process on the host.

use super::{Job, JobBase, split_command};
use crate::error::{Error, Result};
use crate::middleware::Context;
use crate::variables::Variables;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

#[derive(Debug)]
pub struct LocalJob {
    pub base: JobBase,
    pub dir: Option<String>,
    /// `KEY=VALUE` pairs. When non-empty the child gets exactly this
    /// environment instead of inheriting the daemon's.
    pub environment: Vec<String>,
    /// Resolved container identity for variable substitution. Not hashable.
    pub container_name: String,
    pub container_id: String,
}

impl LocalJob {
    pub fn new(
        name: impl Into<String>,
        schedule: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            base: JobBase::new(name, schedule, command),
            dir: None,
            environment: Vec::new(),
            container_name: String::new(),
            container_id: String::new(),
        }
    }
}

#[async_trait]
impl Job for LocalJob {
    fn base(&self) -> &JobBase {
        &self.base
    }

    fn fingerprint(&self) -> String {
        let mut out = String::new();
        self.base.write_fingerprint(&mut out);
        out
    }

    async fn run(&self, ctx: &Context) -> Result<()> {
        let vars = Variables::for_container(&self.container_name, &self.container_id);
        let command = self.processed_command(&vars);
        run_local_command(ctx, &command, self.dir.as_deref(), &self.environment).await
    }
}

/// Spawn a child process with stdout/stderr wired into the execution's
/// buffers and surface its exit status. Shared with lifecycle jobs.
pub(crate) async fn run_local_command(
    ctx: &Context,
    command: &str,
    dir: Option<&str>,
    environment: &[String],
) -> Result<()> {
    let argv = split_command(command)?;

    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    if !environment.is_empty() {
        cmd.env_clear();
        for pair in environment {
            if let Some((key, value)) = pair.split_once('=') {
                cmd.env(key, value);
            }
        }
    }

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let copy_stdout = async {
        if let Some(mut pipe) = stdout {
            let mut buf = [0u8; 8192];
            while let Ok(n) = pipe.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                ctx.execution.write_stdout(&buf[..n]);
            }
        }
    };
    let copy_stderr = async {
        if let Some(mut pipe) = stderr {
            let mut buf = [0u8; 8192];
            while let Ok(n) = pipe.read(&mut buf).await {
                if n == 0 {
                    break;
                }
                ctx.execution.write_stderr(&buf[..n]);
            }
        }
    };

    let (status, _, _) = tokio::join!(child.wait(), copy_stdout, copy_stderr);
    let status = status?;

    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(Error::ExitCode(code as i64)),
        None => Err(anyhow::anyhow!("child process terminated by signal").into()),
    }
}
