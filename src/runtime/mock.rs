//! Scripted in-memory runtime used by unit tests.

use super::{
    Container, ContainerSpec, ExecSpec, ExecStatus, OutputChunk, OutputStream, Runtime,
    RuntimeEvent, ServiceInfo, ServiceSpec, ServiceTask,
};
use crate::error::RuntimeError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Test double recording every call and replaying scripted replies.
#[derive(Default)]
pub struct MockRuntime {
    /// Containers returned by `list_containers` (label filters applied).
    pub containers: Mutex<Vec<Container>>,
    /// Exit code reported by `inspect_exec`.
    pub exec_exit_code: Mutex<i64>,
    /// Chunks streamed from `start_exec`.
    pub exec_output: Mutex<Vec<OutputChunk>>,
    /// Exit code reported by `wait_container`.
    pub wait_exit_code: Mutex<i64>,
    /// Chunks streamed from `container_logs`.
    pub log_output: Mutex<Vec<OutputChunk>>,
    /// Successive `list_tasks` replies; the last entry repeats once drained.
    pub task_replies: Mutex<VecDeque<Vec<ServiceTask>>>,
    /// When set, `list_containers` fails with this error once.
    pub next_list_error: Mutex<Option<RuntimeError>>,
    /// Ordered log of every operation invoked.
    pub calls: Mutex<Vec<String>>,
    /// Senders captured by `watch_events`, so tests can inject events.
    pub event_channel: Mutex<Option<(mpsc::Sender<RuntimeEvent>, mpsc::Sender<RuntimeError>)>>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_containers(containers: Vec<Container>) -> Self {
        let mock = Self::new();
        *mock.containers.lock().unwrap() = containers;
        mock
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn call_log(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }
}

fn chunk_stream(chunks: Vec<OutputChunk>) -> OutputStream {
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
}

/// Match a `label` filter of the form `key=value` or bare `key` against a
/// container's labels, the way the daemon's list endpoint does.
fn matches_label_filter(container: &Container, filters: &HashMap<String, Vec<String>>) -> bool {
    let Some(labels) = filters.get("label") else {
        return true;
    };
    labels.iter().all(|filter| match filter.split_once('=') {
        Some((key, value)) => container.labels.get(key).map(String::as_str) == Some(value),
        None => container.labels.keys().any(|key| {
            key == filter || key.starts_with(&format!("{filter}."))
        }),
    })
}

#[async_trait]
impl Runtime for MockRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.record("ping");
        Ok(())
    }

    async fn list_containers(
        &self,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<Vec<Container>, RuntimeError> {
        self.record("list_containers");
        if let Some(error) = self.next_list_error.lock().unwrap().take() {
            return Err(error);
        }
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .filter(|container| matches_label_filter(container, &filters))
            .cloned()
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<Container, RuntimeError> {
        self.record(format!("inspect_container {id}"));
        self.containers
            .lock()
            .unwrap()
            .iter()
            .find(|container| container.id == id || container.name == id)
            .cloned()
            .ok_or_else(|| RuntimeError::Api(format!("no such container: {id}")))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.record(format!("create_container {}", spec.image));
        Ok(format!("mock-{}", spec.name))
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("start_container {id}"));
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("stop_container {id}"));
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("remove_container {id}"));
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError> {
        self.record(format!("wait_container {id}"));
        Ok(*self.wait_exit_code.lock().unwrap())
    }

    async fn container_logs(&self, id: &str, _follow: bool) -> Result<OutputStream, RuntimeError> {
        self.record(format!("container_logs {id}"));
        Ok(chunk_stream(self.log_output.lock().unwrap().clone()))
    }

    async fn create_exec(
        &self,
        container: &str,
        cmd: Vec<String>,
        _spec: &ExecSpec,
    ) -> Result<String, RuntimeError> {
        self.record(format!("create_exec {container} {}", cmd.join(" ")));
        Ok("mock-exec".to_string())
    }

    async fn start_exec(&self, exec_id: &str, _tty: bool) -> Result<OutputStream, RuntimeError> {
        self.record(format!("start_exec {exec_id}"));
        Ok(chunk_stream(self.exec_output.lock().unwrap().clone()))
    }

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecStatus, RuntimeError> {
        self.record(format!("inspect_exec {exec_id}"));
        Ok(ExecStatus {
            running: false,
            exit_code: Some(*self.exec_exit_code.lock().unwrap()),
        })
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.record(format!("pull_image {image}"));
        Ok(())
    }

    async fn create_service(&self, spec: &ServiceSpec) -> Result<String, RuntimeError> {
        self.record(format!("create_service {}", spec.image));
        Ok("mock-service".to_string())
    }

    async fn inspect_service(&self, id: &str) -> Result<ServiceInfo, RuntimeError> {
        self.record(format!("inspect_service {id}"));
        Ok(ServiceInfo {
            id: id.to_string(),
            name: "mock-service".to_string(),
        })
    }

    async fn list_tasks(&self, service_id: &str) -> Result<Vec<ServiceTask>, RuntimeError> {
        self.record(format!("list_tasks {service_id}"));
        let mut replies = self.task_replies.lock().unwrap();
        if replies.len() > 1 {
            Ok(replies.pop_front().unwrap_or_default())
        } else {
            Ok(replies.front().cloned().unwrap_or_default())
        }
    }

    async fn remove_service(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(format!("remove_service {id}"));
        Ok(())
    }

    fn watch_events(
        &self,
        _cancel: CancellationToken,
        events: mpsc::Sender<RuntimeEvent>,
        errors: mpsc::Sender<RuntimeError>,
    ) {
        self.record("watch_events");
        *self.event_channel.lock().unwrap() = Some((events, errors));
    }
}
