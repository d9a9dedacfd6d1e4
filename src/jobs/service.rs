//! Service jobs run a one-shot swarm service and poll its tasks until they
//! settle.

use super::{Job, JobBase, split_command};
use crate::error::{Error, Result};
use crate::middleware::Context;
use crate::random_id;
use crate::runtime::{Runtime, ServiceSpec, TaskState};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const TASK_POLL_INTERVAL: Duration = Duration::from_secs(1);
const TASK_DEADLINE: Duration = Duration::from_secs(10 * 60);

pub struct RunServiceJob {
    pub base: JobBase,
    pub runtime: Arc<dyn Runtime>,
    pub image: String,
    pub network: String,
    pub delete: bool,
    /// Overridable for tests; 1 Hz in production.
    pub poll_interval: Duration,
    /// Overridable for tests; 10 minutes in production.
    pub deadline: Duration,
}

impl RunServiceJob {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        name: impl Into<String>,
        schedule: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            base: JobBase::new(name, schedule, command),
            runtime,
            image: String::new(),
            network: String::new(),
            delete: true,
            poll_interval: TASK_POLL_INTERVAL,
            deadline: TASK_DEADLINE,
        }
    }

    async fn wait_for_tasks(&self, service_id: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.deadline;

        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::ServiceTimeout(service_id.to_string()));
            }
            tokio::time::sleep(self.poll_interval).await;

            let tasks = self.runtime.list_tasks(service_id).await?;

            let mut all_settled = !tasks.is_empty();
            for task in &tasks {
                tracing::debug!(task = %task.id, state = ?task.state, "service task state");
                match task.state {
                    TaskState::Failed => {
                        return Err(anyhow::anyhow!(
                            "task {} failed: {}",
                            task.id,
                            task.error.as_deref().unwrap_or("unknown")
                        )
                        .into());
                    }
                    TaskState::Complete => {}
                    TaskState::Running => all_settled = false,
                }
            }

            if all_settled {
                tracing::info!(service = %service_id, "service completed");
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl Job for RunServiceJob {
    fn base(&self) -> &JobBase {
        &self.base
    }

    fn fingerprint(&self) -> String {
        let mut out = String::new();
        self.base.write_fingerprint(&mut out);
        out.push_str(&self.image);
        out.push_str(&self.network);
        out.push_str(if self.delete { "true" } else { "false" });
        out
    }

    async fn run(&self, _ctx: &Context) -> Result<()> {
        self.runtime.pull_image(&self.image).await?;

        let spec = ServiceSpec {
            name: format!("chadburn-{}", random_id()),
            image: self.image.clone(),
            cmd: split_command(self.command()).unwrap_or_default(),
            network: (!self.network.is_empty()).then(|| self.network.clone()),
            labels: HashMap::from([(
                format!("{}.job", crate::LABEL_PREFIX),
                self.name().to_string(),
            )]),
        };

        let service_id = self.runtime.create_service(&spec).await?;
        tracing::info!(service = %service_id, job = %self.name(), "created service");

        let info = self.runtime.inspect_service(&service_id).await?;
        tracing::debug!(service = %service_id, name = %info.name, "service created");

        let result = self.wait_for_tasks(&service_id).await;

        if self.delete {
            if let Err(error) = self.runtime.remove_service(&service_id).await {
                tracing::warn!(
                    service = %service_id,
                    %error,
                    "service cannot be removed; it may already be gone"
                );
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Execution;
    use crate::runtime::mock::MockRuntime;
    use crate::runtime::ServiceTask;

    fn task(id: &str, state: TaskState) -> ServiceTask {
        ServiceTask {
            id: id.to_string(),
            state,
            error: None,
        }
    }

    fn service_job(mock: Arc<MockRuntime>) -> RunServiceJob {
        let mut job = RunServiceJob::new(mock, "batch", "@every 1h", "process --all");
        job.image = "batch:latest".to_string();
        job.poll_interval = Duration::from_millis(1);
        job.deadline = Duration::from_millis(250);
        job
    }

    fn context_for(job: Arc<RunServiceJob>) -> Context {
        Context::new(job, Arc::new(Execution::new()), Vec::new())
    }

    #[tokio::test]
    async fn completes_when_all_tasks_complete() {
        let mock = Arc::new(MockRuntime::new());
        mock.task_replies.lock().unwrap().extend([
            vec![task("t1", TaskState::Running)],
            vec![task("t1", TaskState::Complete)],
        ]);
        let job = Arc::new(service_job(mock.clone()));
        let ctx = context_for(job.clone());

        job.run(&ctx).await.unwrap();
        assert_eq!(mock.calls_matching("remove_service"), 1);
    }

    #[tokio::test]
    async fn a_failed_task_fails_the_job() {
        let mock = Arc::new(MockRuntime::new());
        mock.task_replies
            .lock()
            .unwrap()
            .push_back(vec![task("t1", TaskState::Failed)]);
        let job = Arc::new(service_job(mock));
        let ctx = context_for(job.clone());

        assert!(job.run(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn times_out_when_tasks_never_settle() {
        let mock = Arc::new(MockRuntime::new());
        mock.task_replies
            .lock()
            .unwrap()
            .push_back(vec![task("t1", TaskState::Running)]);
        let job = Arc::new(service_job(mock.clone()));
        let ctx = context_for(job.clone());

        match job.run(&ctx).await {
            Err(Error::ServiceTimeout(_)) => {}
            other => panic!("expected a service timeout, got {other:?}"),
        }
        // Delete defaults to true, so the timed-out service is removed.
        assert_eq!(mock.calls_matching("remove_service"), 1);
    }

    #[tokio::test]
    async fn timed_out_service_is_kept_without_delete() {
        let mock = Arc::new(MockRuntime::new());
        mock.task_replies
            .lock()
            .unwrap()
            .push_back(vec![task("t1", TaskState::Running)]);
        let mut job = service_job(mock.clone());
        job.delete = false;
        let job = Arc::new(job);
        let ctx = context_for(job.clone());

        assert!(job.run(&ctx).await.is_err());
        assert_eq!(mock.calls_matching("remove_service"), 0);
    }

    #[tokio::test]
    async fn service_carries_the_job_label() {
        let mock = Arc::new(MockRuntime::new());
        mock.task_replies
            .lock()
            .unwrap()
            .push_back(vec![task("t1", TaskState::Complete)]);
        let job = Arc::new(service_job(mock.clone()));
        let ctx = context_for(job.clone());

        job.run(&ctx).await.unwrap();
        assert_eq!(mock.calls_matching("create_service batch:latest"), 1);
    }
}
