//! Exec jobs run a command inside an already-running container.

use super::{Job, JobBase, split_command};
use crate::error::{Error, Result};
use crate::middleware::Context;
use crate::runtime::{ExecSpec, OutputChunk, Runtime};
use crate::variables::Variables;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;

pub struct ExecJob {
    pub base: JobBase,
    pub runtime: Arc<dyn Runtime>,
    pub container: String,
    pub user: String,
    pub tty: bool,
    pub workdir: String,
}

impl ExecJob {
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
            user: "root".to_string(),
            tty: false,
            workdir: String::new(),
        }
    }
}

#[async_trait]
impl Job for ExecJob {
    fn base(&self) -> &JobBase {
        &self.base
    }

    fn fingerprint(&self) -> String {
        let mut out = String::new();
        self.base.write_fingerprint(&mut out);
        out.push_str(&self.container);
        out.push_str(&self.user);
        out.push_str(if self.tty { "true" } else { "false" });
        out.push_str(&self.workdir);
        out
    }

    async fn run(&self, ctx: &Context) -> Result<()> {
        let vars = Variables::for_container(&self.container, &self.container);
        let command = self.processed_command(&vars);
        let argv = split_command(&command)?;

        exec_in_container(
            self.runtime.as_ref(),
            ctx,
            &self.container,
            argv,
            &self.user,
            self.tty,
            &self.workdir,
        )
        .await
    }
}

/// Create, start, and drain an exec in `container`, copying its output into
/// the execution's buffers. Shared with the run job's container-only mode.
///
/// Exit code 0 is success; −1 is the distinguished "unexpected" error (wrong
/// user, broken exec setup); anything else surfaces as a non-zero exit.
pub(crate) async fn exec_in_container(
    runtime: &dyn Runtime,
    ctx: &Context,
    container: &str,
    argv: Vec<String>,
    user: &str,
    tty: bool,
    workdir: &str,
) -> Result<()> {
    let spec = ExecSpec {
        user: (!user.is_empty()).then(|| user.to_string()),
        tty,
        workdir: (!workdir.is_empty()).then(|| workdir.to_string()),
        attach_stdout: true,
        attach_stderr: true,
    };

    let exec_id = runtime.create_exec(container, argv, &spec).await?;
    let mut output = runtime.start_exec(&exec_id, tty).await?;

    while let Some(chunk) = output.next().await {
        match chunk? {
            OutputChunk::Stdout(bytes) => ctx.execution.write_stdout(&bytes),
            OutputChunk::Stderr(bytes) => ctx.execution.write_stderr(&bytes),
        }
    }

    let status = runtime.inspect_exec(&exec_id).await?;
    match status.exit_code {
        Some(0) => Ok(()),
        Some(-1) | None => Err(Error::UnexpectedExit),
        Some(code) => Err(Error::ExitCode(code)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Execution;
    use crate::runtime::mock::MockRuntime;

    fn exec_job(mock: Arc<MockRuntime>) -> Arc<ExecJob> {
        let mut job = ExecJob::new(mock, "backup", "@every 10s", "echo hi");
        job.container = "db".to_string();
        Arc::new(job)
    }

    fn context_for(job: Arc<ExecJob>) -> Context {
        Context::new(job, Arc::new(Execution::new()), Vec::new())
    }

    #[tokio::test]
    async fn exit_zero_is_success_and_output_is_captured() {
        let mock = Arc::new(MockRuntime::new());
        *mock.exec_output.lock().unwrap() = vec![OutputChunk::Stdout(b"hi\n".to_vec())];
        let job = exec_job(mock.clone());
        let ctx = context_for(job.clone());

        job.run(&ctx).await.unwrap();
        assert!(ctx.execution.stdout().starts_with(b"hi"));
        assert_eq!(mock.calls_matching("create_exec db"), 1);
    }

    #[tokio::test]
    async fn exit_minus_one_is_the_unexpected_error() {
        let mock = Arc::new(MockRuntime::new());
        *mock.exec_exit_code.lock().unwrap() = -1;
        let job = exec_job(mock);
        let ctx = context_for(job.clone());

        match job.run(&ctx).await {
            Err(Error::UnexpectedExit) => {}
            other => panic!("expected the unexpected-exit error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_exit_codes_surface() {
        let mock = Arc::new(MockRuntime::new());
        *mock.exec_exit_code.lock().unwrap() = 7;
        let job = exec_job(mock);
        let ctx = context_for(job.clone());

        match job.run(&ctx).await {
            Err(Error::ExitCode(7)) => {}
            other => panic!("expected exit code 7, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn command_is_tokenized_with_quoting() {
        let mock = Arc::new(MockRuntime::new());
        let mut job = ExecJob::new(mock.clone(), "quoted", "@every 10s", r#"sh -c "echo a b""#);
        job.container = "db".to_string();
        let job = Arc::new(job);
        let ctx = context_for(job.clone());

        job.run(&ctx).await.unwrap();
        assert_eq!(mock.calls_matching("create_exec db sh -c echo a b"), 1);
    }
}
