//! Abstract interface between the engine and the container runtime.
//!
//! Every operation the jobs, the reconciler, and the event reactor need is
//! expressed here; [`docker::DockerRuntime`] is the bollard-backed
//! implementation. The only engine-level distinguished error is
//! [`RuntimeError::Unavailable`], which triggers reconnect backoff in the
//! background loops.

pub mod docker;
#[cfg(test)]
pub mod mock;

use crate::error::RuntimeError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A container as seen by the engine.
#[derive(Debug, Clone, Default)]
pub struct Container {
    pub id: String,
    /// Canonical name, without the leading `/` the API reports.
    pub name: String,
    pub labels: HashMap<String, String>,
    pub running: bool,
}

/// Options for creating an exec inside a running container.
#[derive(Debug, Clone, Default)]
pub struct ExecSpec {
    pub user: Option<String>,
    pub tty: bool,
    pub workdir: Option<String>,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
}

/// Options for creating a throwaway container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub user: Option<String>,
    pub tty: bool,
    pub binds: Vec<String>,
    pub network_mode: Option<String>,
    pub labels: HashMap<String, String>,
}

/// Options for creating a one-shot swarm service.
#[derive(Debug, Clone, Default)]
pub struct ServiceSpec {
    pub name: String,
    pub image: String,
    pub cmd: Vec<String>,
    pub network: Option<String>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Complete,
    Failed,
    Running,
}

#[derive(Debug, Clone)]
pub struct ServiceTask {
    pub id: String,
    pub state: TaskState,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecStatus {
    pub running: bool,
    pub exit_code: Option<i64>,
}

/// One chunk of a container or exec output stream.
#[derive(Debug, Clone)]
pub enum OutputChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
}

pub type OutputStream = BoxStream<'static, Result<OutputChunk, RuntimeError>>;

/// A container event as emitted by the runtime.
#[derive(Debug, Clone)]
pub struct RuntimeEvent {
    /// Event source kind, e.g. `container`.
    pub kind: String,
    /// Action, e.g. `start`, `die`, `stop`.
    pub action: String,
    /// Id of the container the event concerns.
    pub id: String,
    pub attributes: HashMap<String, String>,
}

/// Abstract operations on containers, execs, images, services, and events.
///
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait Runtime: Send + Sync + 'static {
    /// Sanity check that the runtime endpoint is reachable.
    async fn ping(&self) -> Result<(), RuntimeError>;

    async fn list_containers(
        &self,
        filters: HashMap<String, Vec<String>>,
    ) -> Result<Vec<Container>, RuntimeError>;

    async fn inspect_container(&self, id: &str) -> Result<Container, RuntimeError>;

    /// Create a container and return its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;

    /// Block until the container exits and return its exit code.
    async fn wait_container(&self, id: &str) -> Result<i64, RuntimeError>;

    /// Stream the container's stdout/stderr logs.
    async fn container_logs(&self, id: &str, follow: bool) -> Result<OutputStream, RuntimeError>;

    /// Create an exec in a running container and return the exec id.
    async fn create_exec(
        &self,
        container: &str,
        cmd: Vec<String>,
        spec: &ExecSpec,
    ) -> Result<String, RuntimeError>;

    /// Start a previously created exec and stream its output.
    async fn start_exec(&self, exec_id: &str, tty: bool) -> Result<OutputStream, RuntimeError>;

    async fn inspect_exec(&self, exec_id: &str) -> Result<ExecStatus, RuntimeError>;

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;

    /// Create a one-shot service and return its id.
    async fn create_service(&self, spec: &ServiceSpec) -> Result<String, RuntimeError>;

    async fn inspect_service(&self, id: &str) -> Result<ServiceInfo, RuntimeError>;

    async fn list_tasks(&self, service_id: &str) -> Result<Vec<ServiceTask>, RuntimeError>;

    async fn remove_service(&self, id: &str) -> Result<(), RuntimeError>;

    /// Fire-and-forget event producer. Emits container events on `events`
    /// until `cancel` fires; terminal errors are reported on `errors` and
    /// end the producer.
    fn watch_events(
        &self,
        cancel: CancellationToken,
        events: mpsc::Sender<RuntimeEvent>,
        errors: mpsc::Sender<RuntimeError>,
    );
}

const BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Exponential backoff for runtime reconnects: 100 ms doubling to 5 s.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            current: BACKOFF_INITIAL,
        }
    }

    /// Return the next delay and double the stored one, capped at the max.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(BACKOFF_MAX);
        delay
    }

    /// Reset to the initial delay after a successful operation.
    pub fn reset(&mut self) {
        self.current = BACKOFF_INITIAL;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
