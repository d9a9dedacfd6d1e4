//! Bollard-backed implementation of the [`Runtime`] trait.
//!
//! Honors `DOCKER_HOST` through bollard's default connector. Connection-level
//! failures are collapsed into [`RuntimeError::Unavailable`] so the
//! reconciler and the event reactor can back off and retry.

use super::{
    Container, ContainerSpec, ExecSpec, ExecStatus, OutputChunk, OutputStream, Runtime,
    RuntimeEvent, ServiceInfo, ServiceSpec, ServiceTask, TaskState,
};
use crate::error::RuntimeError;
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{
    EventMessageTypeEnum, HostConfig, NetworkAttachmentConfig, TaskSpec, TaskSpecContainerSpec,
    TaskSpecRestartPolicy, TaskSpecRestartPolicyConditionEnum,
};
use bollard::service::InspectServiceOptions;
use bollard::task::ListTasksOptions;
use bollard::system::EventsOptions;
use futures::StreamExt;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect using the environment (`DOCKER_HOST`) or the platform default
    /// socket.
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_defaults().map_err(map_error)?;
        Ok(Self { docker })
    }
}

/// Collapse bollard errors into the engine's error kinds. Transport-level
/// failures become `Unavailable`; a 404 mentioning a missing image becomes
/// `ImageNotFound` so the run job can pull and retry.
fn map_error(error: bollard::errors::Error) -> RuntimeError {
    match &error {
        bollard::errors::Error::IOError { err } => RuntimeError::Unavailable(err.to_string()),
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message,
        } if message.contains("No such image") => RuntimeError::ImageNotFound(message.clone()),
        _ => {
            let text = error.to_string();
            let lower = text.to_lowercase();
            if lower.contains("connection refused")
                || lower.contains("connection reset")
                || lower.contains("unexpected eof")
            {
                RuntimeError::Unavailable(text)
            } else {
                RuntimeError::Api(text)
            }
        }
    }
}

fn map_chunk(output: LogOutput) -> OutputChunk {
    match output {
        LogOutput::StdErr { message } => OutputChunk::Stderr(message.to_vec()),
        LogOutput::StdOut { message }
        | LogOutput::Console { message }
        | LogOutput::StdIn { message } => OutputChunk::Stdout(message.to_vec()),
    }
}

fn strip_name(name: &str) -> String {
    name.trim_start_matches('/').to_string()
}

#[async_trait]
impl Runtime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(map_error)?;
        Ok(())
    }

    async fn list_containers(
        &self,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<Vec<Container>, RuntimeError> {
        let options = ListContainersOptions::<String> {
            filters,
            ..Default::default()
        };
        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(map_error)?;

        Ok(summaries
            .into_iter()
            .map(|summary| {
                let id = summary.id.unwrap_or_default();
                let name = summary
                    .names
                    .as_ref()
                    .and_then(|names| names.first())
                    .map(|name| strip_name(name))
                    .unwrap_or_else(|| id.chars().take(12).collect());
                Container {
                    id,
                    name,
                    labels: summary.labels.unwrap_or_default(),
                    running: summary.state == Some(bollard::models::ContainerSummaryStateEnum::RUNNING),
                }
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<Container, RuntimeError> {
        let details = self
            .docker
            .inspect_container(id, None)
            .await
            .map_err(map_error)?;

        Ok(Container {
            id: details.id.unwrap_or_else(|| id.to_string()),
            name: details.name.as_deref().map(strip_name).unwrap_or_default(),
            labels: details
                .config
                .as_ref()
                .and_then(|config| config.labels.clone())
                .unwrap_or_default(),
            running: details
                .state
                .as_ref()
                .and_then(|state| state.running)
                .unwrap_or(false),
        })
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let config = Config {
            image: Some(spec.image.clone()),
            cmd: if spec.cmd.is_empty() {
                None
            } else {
                Some(spec.cmd.clone())
            },
            env: if spec.env.is_empty() {
                None
            } else {
                Some(spec.env.clone())
            },
            user: spec.user.clone(),
            tty: Some(spec.tty),
            attach_stdin: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            labels: if spec.labels.is_empty() {
                None
            } else {
                Some(spec.labels.clone())
            },
            host_config: Some(HostConfig {
                binds: if spec.binds.is_empty() {
                    None
                } else {
                    Some(spec.binds.clone())
                },
                network_mode: spec.network_mode.clone(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(map_error)?;
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(map_error)
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .stop_container(id, None::<StopContainerOptions>)
            .await
            .map_err(map_error)
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(map_error)
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        let mut wait = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);

        match wait.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // A non-zero exit is reported as a dedicated error variant by the
            // API client; the exit code is what the caller wants.
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(error)) => Err(map_error(error)),
            None => Err(RuntimeError::Unavailable(
                "wait stream closed before the container exited".to_string(),
            )),
        }
    }

    async fn container_logs(&self, id: &str, follow: bool) -> Result<OutputStream, RuntimeError> {
        let stream = self.docker.logs(
            id,
            Some(LogsOptions::<String> {
                follow,
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );

        Ok(Box::pin(stream.map(|item| {
            item.map(map_chunk).map_err(map_error)
        })))
    }

    async fn create_exec(
        &self,
        container: &str,
        cmd: Vec<String>,
        spec: &ExecSpec,
    ) -> Result<String, RuntimeError> {
        let options = CreateExecOptions {
            attach_stdin: Some(false),
            attach_stdout: Some(spec.attach_stdout),
            attach_stderr: Some(spec.attach_stderr),
            tty: Some(spec.tty),
            cmd: Some(cmd),
            user: spec.user.clone(),
            working_dir: spec.workdir.clone(),
            ..Default::default()
        };

        let created = self
            .docker
            .create_exec(container, options)
            .await
            .map_err(map_error)?;
        Ok(created.id)
    }

    async fn start_exec(&self, exec_id: &str, tty: bool) -> Result<OutputStream, RuntimeError> {
        let started = self
            .docker
            .start_exec(
                exec_id,
                Some(StartExecOptions {
                    detach: false,
                    tty,
                    output_capacity: None,
                }),
            )
            .await
            .map_err(map_error)?;

        match started {
            StartExecResults::Attached { output, .. } => Ok(Box::pin(output.map(|item| {
                item.map(map_chunk).map_err(map_error)
            }))),
            StartExecResults::Detached => Err(RuntimeError::Api(
                "exec started detached despite attach flags".to_string(),
            )),
        }
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecStatus, RuntimeError> {
        let inspect = self.docker.inspect_exec(exec_id).await.map_err(map_error)?;
        Ok(ExecStatus {
            running: inspect.running.unwrap_or(false),
            exit_code: inspect.exit_code,
        })
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let mut pull = self.docker.create_image(
            Some(CreateImageOptions::<String> {
                from_image: image.to_string(),
                ..Default::default()
            }),
            None,
            None,
        );

        while let Some(progress) = pull.next().await {
            progress.map_err(map_error)?;
        }
        Ok(())
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<String, RuntimeError> {
        let networks = spec.network.as_ref().map(|network| {
            vec![NetworkAttachmentConfig {
                target: Some(network.clone()),
                ..Default::default()
            }]
        });

        let service_spec = bollard::models::ServiceSpec {
            name: Some(spec.name.clone()),
            labels: Some(spec.labels.clone()),
            task_template: Some(TaskSpec {
                container_spec: Some(TaskSpecContainerSpec {
                    image: Some(spec.image.clone()),
                    command: if spec.cmd.is_empty() {
                        None
                    } else {
                        Some(spec.cmd.clone())
                    },
                    ..Default::default()
                }),
                restart_policy: Some(TaskSpecRestartPolicy {
                    condition: Some(TaskSpecRestartPolicyConditionEnum::NONE),
                    ..Default::default()
                }),
                networks,
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self
            .docker
            .create_service(service_spec, None)
            .await
            .map_err(map_error)?;
        response
            .id
            .ok_or_else(|| RuntimeError::Api("service created without an id".to_string()))
    }

    async fn inspect_service(&self, id: &str) -> Result<ServiceInfo, RuntimeError> {
        let service = self
            .docker
            .inspect_service(id, None::<InspectServiceOptions>)
            .await
            .map_err(map_error)?;
        Ok(ServiceInfo {
            id: service.id.unwrap_or_else(|| id.to_string()),
            name: service
                .spec
                .and_then(|spec| spec.name)
                .unwrap_or_default(),
        })
    }

    async fn list_tasks(&self, service_id: &str) -> Result<Vec<ServiceTask>, RuntimeError> {
        let mut filters = HashMap::new();
        filters.insert("service".to_string(), vec![service_id.to_string()]);

        let tasks = self
            .docker
            .list_tasks(Some(ListTasksOptions::<String> { filters }))
            .await
            .map_err(map_error)?;

        Ok(tasks
            .into_iter()
            .map(|task| {
                let status = task.status.unwrap_or_default();
                let state = match status.state {
                    Some(bollard::models::TaskState::COMPLETE) => TaskState::Complete,
                    Some(bollard::models::TaskState::FAILED) => TaskState::Failed,
                    _ => TaskState::Running,
                };
                ServiceTask {
                    id: task.id.unwrap_or_default(),
                    state,
                    error: status.err,
                }
            })
            .collect())
    }

    async fn remove_service(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker.delete_service(id).await.map_err(map_error)
    }

    fn watch_events(
        &self,
        cancel: CancellationToken,
        events: mpsc::Sender<RuntimeEvent>,
        errors: mpsc::Sender<RuntimeError>,
    ) {
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let mut filters = HashMap::new();
            filters.insert("type".to_string(), vec!["container".to_string()]);
            let mut stream = docker.events(Some(EventsOptions::<String> {
                filters,
                ..Default::default()
            }));

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    message = stream.next() => match message {
                        Some(Ok(message)) => {
                            if message.typ != Some(EventMessageTypeEnum::CONTAINER) {
                                continue;
                            }
                            let actor = message.actor.unwrap_or_default();
                            let event = RuntimeEvent {
                                kind: "container".to_string(),
                                action: message.action.unwrap_or_default(),
                                id: actor.id.unwrap_or_default(),
                                attributes: actor.attributes.unwrap_or_default(),
                            };
                            if events.send(event).await.is_err() {
                                return;
                            }
                        }
                        Some(Err(error)) => {
                            let _ = errors.send(map_error(error)).await;
                            return;
                        }
                        None => {
                            let _ = errors
                                .send(RuntimeError::Unavailable(
                                    "event stream closed (EOF)".to_string(),
                                ))
                                .await;
                            return;
                        }
                    },
                }
            }
        });
    }
}
