//! Event reactor: fires one-shot lifecycle jobs on container events.
//!
//! Consumes the runtime's container event stream, maps `start`/`die`/`stop`
//! actions to lifecycle event kinds, and invokes every matching lifecycle
//! job whose `executed` latch is clear. The scheduler is not involved. Lost
//! streams are re-subscribed with the same exponential backoff the
//! reconciler uses.

use crate::config::JobRegistry;
use crate::execution::Execution;
use crate::jobs::{Job, LifecycleEvent, LifecycleJob};
use crate::middleware::Context;
use crate::runtime::{Backoff, Runtime, RuntimeEvent};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub struct EventReactor {
    runtime: Arc<dyn Runtime>,
    registry: Arc<JobRegistry>,
    cancel: CancellationToken,
}

impl EventReactor {
    pub fn new(
        runtime: Arc<dyn Runtime>,
        registry: Arc<JobRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            runtime,
            registry,
            cancel,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let mut backoff = Backoff::new();

        loop {
            let (event_tx, mut event_rx) = mpsc::channel(64);
            let (error_tx, mut error_rx) = mpsc::channel(8);
            self.runtime
                .watch_events(self.cancel.child_token(), event_tx, error_tx);
            tracing::info!("watching container events");

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    event = event_rx.recv() => match event {
                        Some(event) => {
                            backoff.reset();
                            self.handle(event).await;
                        }
                        None => break,
                    },
                    error = error_rx.recv() => {
                        if let Some(error) = error {
                            tracing::warn!(%error, "event stream error");
                        }
                        break;
                    }
                }
            }

            let delay = backoff.next_delay();
            tracing::debug!(retry_in = ?delay, "re-subscribing to container events");
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn handle(&self, event: RuntimeEvent) {
        if event.kind != "container" {
            return;
        }
        let Some(kind) = map_action(&event.action) else {
            return;
        };

        // Resolve the canonical name; the event attributes are the fallback
        // when the container is already gone.
        let name = match self.runtime.inspect_container(&event.id).await {
            Ok(container) => container.name,
            Err(error) => match event.attributes.get("name") {
                Some(name) => name.trim_start_matches('/').to_string(),
                None => {
                    tracing::debug!(container = %event.id, %error, "cannot resolve event container");
                    return;
                }
            },
        };
        tracing::debug!(container = %name, event = %kind, "container event");

        let jobs: Vec<Arc<LifecycleJob>> = self
            .registry
            .lifecycle_jobs()
            .into_iter()
            .filter(|job| job.container == name && job.should_run(kind))
            .collect();

        for job in jobs {
            tracing::info!(
                job = %job.name(),
                container = %name,
                event = %kind,
                "running lifecycle job"
            );
            run_lifecycle_job(job).await;
        }
    }
}

/// Invoke a lifecycle job through its middleware chain with a fresh
/// execution. A successful run latches the job inside `LifecycleJob::run`.
async fn run_lifecycle_job(job: Arc<LifecycleJob>) {
    let execution = Arc::new(Execution::new());
    let middlewares = job.middlewares();
    let mut ctx = Context::new(job.clone(), execution.clone(), middlewares);

    let result = ctx.run().await;
    ctx.stop(result.err());

    if execution.is_failed() {
        tracing::error!(
            job = %job.name(),
            execution = %execution.id,
            error = %execution.error_message().unwrap_or_default(),
            "lifecycle job failed"
        );
    } else {
        tracing::info!(job = %job.name(), execution = %execution.id, "lifecycle job completed");
    }
}

fn map_action(action: &str) -> Option<LifecycleEvent> {
    match action {
        "start" => Some(LifecycleEvent::Start),
        "die" | "stop" => Some(LifecycleEvent::Stop),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Container;
    use crate::runtime::mock::MockRuntime;
    use std::collections::HashMap;
    use std::time::Duration;

    fn start_event(id: &str) -> RuntimeEvent {
        RuntimeEvent {
            kind: "container".to_string(),
            action: "start".to_string(),
            id: id.to_string(),
            attributes: HashMap::new(),
        }
    }

    fn worker_container() -> Container {
        Container {
            id: "worker-id".to_string(),
            name: "worker".to_string(),
            labels: HashMap::new(),
            running: true,
        }
    }

    fn lifecycle_job(name: &str, container: &str, command: &str) -> Arc<LifecycleJob> {
        let mut job = LifecycleJob::new(name, command);
        job.container = container.to_string();
        Arc::new(job)
    }

    fn reactor_with(mock: Arc<MockRuntime>, registry: Arc<JobRegistry>) -> EventReactor {
        EventReactor::new(mock, registry, CancellationToken::new())
    }

    #[tokio::test]
    async fn start_event_runs_the_matching_job_once() {
        let mock = Arc::new(MockRuntime::with_containers(vec![worker_container()]));
        let registry = Arc::new(JobRegistry::default());
        registry.store_lifecycle(lifecycle_job("on-start", "worker", "echo up"));
        let reactor = reactor_with(mock, registry.clone());

        reactor.handle(start_event("worker-id")).await;
        let job = registry.lifecycle_jobs().pop().unwrap();
        assert!(job.executed());

        // The latch suppresses the second event.
        reactor.handle(start_event("worker-id")).await;
        assert!(job.executed());

        // Reset re-arms it.
        job.reset();
        assert!(job.should_run(LifecycleEvent::Start));
    }

    #[tokio::test]
    async fn events_for_other_containers_are_ignored() {
        let mock = Arc::new(MockRuntime::with_containers(vec![worker_container()]));
        let registry = Arc::new(JobRegistry::default());
        registry.store_lifecycle(lifecycle_job("on-start", "elsewhere", "echo up"));
        let reactor = reactor_with(mock, registry.clone());

        reactor.handle(start_event("worker-id")).await;
        assert!(!registry.lifecycle_jobs().pop().unwrap().executed());
    }

    #[tokio::test]
    async fn die_maps_to_the_stop_kind() {
        let mock = Arc::new(MockRuntime::with_containers(vec![worker_container()]));
        let registry = Arc::new(JobRegistry::default());
        let job = {
            let mut job = LifecycleJob::new("on-stop", "echo down");
            job.container = "worker".to_string();
            job.event_type = LifecycleEvent::Stop;
            Arc::new(job)
        };
        registry.store_lifecycle(job.clone());
        let reactor = reactor_with(mock, registry);

        let mut event = start_event("worker-id");
        event.action = "die".to_string();
        reactor.handle(event).await;
        assert!(job.executed());
    }

    #[tokio::test]
    async fn unknown_actions_are_ignored() {
        let mock = Arc::new(MockRuntime::with_containers(vec![worker_container()]));
        let registry = Arc::new(JobRegistry::default());
        let job = lifecycle_job("on-start", "worker", "echo up");
        registry.store_lifecycle(job.clone());
        let reactor = reactor_with(mock, registry);

        let mut event = start_event("worker-id");
        event.action = "health_status".to_string();
        reactor.handle(event).await;
        assert!(!job.executed());
    }

    #[tokio::test]
    async fn reactor_consumes_events_from_the_stream() {
        let mock = Arc::new(MockRuntime::with_containers(vec![worker_container()]));
        let registry = Arc::new(JobRegistry::default());
        let job = lifecycle_job("on-start", "worker", "echo up");
        registry.store_lifecycle(job.clone());

        let cancel = CancellationToken::new();
        let reactor = EventReactor::new(mock.clone(), registry, cancel.clone());
        let handle = tokio::spawn(reactor.run());

        // Wait for the reactor to subscribe, then inject an event.
        let sender = loop {
            if let Some((events, _)) = mock.event_channel.lock().unwrap().clone() {
                break events;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        sender.send(start_event("worker-id")).await.unwrap();

        // Give the reactor a moment to process, then shut down.
        for _ in 0..100 {
            if job.executed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(job.executed());

        cancel.cancel();
        handle.await.unwrap();
    }
}
