//! Overlap control: skip a firing while a previous run is still in flight.

use super::{Context, Middleware};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::any::TypeId;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlapConfig {
    pub no_overlap: bool,
}

impl OverlapConfig {
    pub fn apply(&mut self, key: &str, value: &str) -> bool {
        match key {
            "no-overlap" => {
                self.no_overlap = value.trim() == "true";
                true
            }
            _ => false,
        }
    }

    /// Build the middleware, or `None` when overlap control is not enabled.
    pub fn middleware(&self) -> Option<Arc<dyn Middleware>> {
        self.no_overlap.then(|| Arc::new(Overlap) as Arc<dyn Middleware>)
    }
}

pub struct Overlap;

#[async_trait]
impl Middleware for Overlap {
    async fn run(&self, ctx: &mut Context) -> Result<()> {
        // The chain already counted this execution, so anything above one
        // means another run is in flight.
        if ctx.job.running() > 1 {
            ctx.stop(Some(Error::Skipped));
            return Ok(());
        }
        ctx.run().await
    }

    fn continue_on_stop(&self) -> bool {
        false
    }

    fn type_key(&self) -> TypeId {
        TypeId::of::<Overlap>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Execution;
    use crate::jobs::{Job, LocalJob};

    fn gated_context(job: Arc<LocalJob>) -> Context {
        let middlewares = OverlapConfig { no_overlap: true }
            .middleware()
            .into_iter()
            .collect();
        Context::new(job, Arc::new(Execution::new()), middlewares)
    }

    #[tokio::test]
    async fn gates_when_another_run_is_in_flight() {
        let job = Arc::new(LocalJob::new("busy", "@every 1s", "echo hi"));
        // Simulate an in-flight run.
        job.notify_start();

        let mut ctx = gated_context(job.clone());
        ctx.run().await.unwrap();

        assert!(ctx.execution.is_skipped());
        assert!(!ctx.executed);
        // The gated run balanced its own counter; the in-flight one remains.
        assert_eq!(job.running(), 1);
    }

    #[tokio::test]
    async fn passes_through_when_idle() {
        let job = Arc::new(LocalJob::new("idle", "@every 1s", "echo hi"));
        let mut ctx = gated_context(job.clone());
        let result = ctx.run().await;
        ctx.stop(result.err());

        assert!(ctx.executed);
        assert!(!ctx.execution.is_skipped());
        assert_eq!(job.running(), 0);
    }

    #[test]
    fn empty_config_builds_no_middleware() {
        assert!(OverlapConfig::default().middleware().is_none());
    }

    #[test]
    fn config_applies_label_key() {
        let mut config = OverlapConfig::default();
        assert!(config.apply("no-overlap", "true"));
        assert!(config.no_overlap);
        assert!(!config.apply("unknown", "x"));
    }
}
