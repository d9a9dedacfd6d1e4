//! Middleware chain wrapping every job execution.
//!
//! A [`Context`] carries the job, its execution, and a snapshot of the
//! middleware list taken when the run fired. Middlewares run in registration
//! order and are expected to call [`Context::run`] to continue the chain;
//! omitting the call short-circuits it. A middleware whose
//! [`Middleware::continue_on_stop`] is false is skipped once a previous
//! stage recorded an error on the execution.

pub mod gotify;
pub mod mail;
pub mod overlap;
pub mod save;
pub mod slack;

pub use gotify::{Gotify, GotifyConfig};
pub use mail::{Mail, MailConfig};
pub use overlap::{Overlap, OverlapConfig};
pub use save::{Save, SaveConfig};
pub use slack::{Slack, SlackConfig};

use crate::error::{Error, Result};
use crate::execution::Execution;
use crate::jobs::Job;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::any::TypeId;
use std::sync::Arc;

/// A decorator wrapping a job execution.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Called instead of the job's own work. Implementations MUST call
    /// `ctx.run()` to continue the chain, or skip it to short-circuit.
    async fn run(&self, ctx: &mut Context) -> Result<()>;

    /// When true, the middleware still runs after a previous stage stopped
    /// the execution with an error.
    fn continue_on_stop(&self) -> bool {
        false
    }

    /// Identity used for de-duplication; one middleware per concrete type.
    fn type_key(&self) -> TypeId;
}

/// Ordered middleware list, de-duplicated by concrete type. The first
/// occurrence of a type wins.
#[derive(Clone, Default)]
pub struct MiddlewareStack {
    entries: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for MiddlewareStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareStack")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl MiddlewareStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware. `None` (an empty notifier config) and duplicate
    /// types are ignored.
    pub fn register(&mut self, middleware: Option<Arc<dyn Middleware>>) {
        let Some(middleware) = middleware else {
            return;
        };
        if self.contains_type(middleware.type_key()) {
            return;
        }
        self.entries.push(middleware);
    }

    /// Prepend the scheduler-global middlewares: the effective order is
    /// globals ++ locals, de-duplicated with the first occurrence winning.
    pub fn merge_front(&mut self, globals: &MiddlewareStack) {
        let mut merged = MiddlewareStack::new();
        for middleware in globals.entries.iter().chain(self.entries.iter()) {
            merged.register(Some(middleware.clone()));
        }
        *self = merged;
    }

    fn contains_type(&self, key: TypeId) -> bool {
        self.entries.iter().any(|entry| entry.type_key() == key)
    }

    pub fn list(&self) -> Vec<Arc<dyn Middleware>> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Per-execution state threaded through the middleware chain.
pub struct Context {
    pub job: Arc<dyn Job>,
    pub execution: Arc<Execution>,
    middlewares: Vec<Arc<dyn Middleware>>,
    current: usize,
    entered: bool,
    /// Whether the chain reached the job's own work.
    pub executed: bool,
}

impl Context {
    pub fn new(
        job: Arc<dyn Job>,
        execution: Arc<Execution>,
        middlewares: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        Self {
            job,
            execution,
            middlewares,
            current: 0,
            entered: false,
            executed: false,
        }
    }

    /// Advance the chain: invoke the next middleware, or the job's own work
    /// once the list is exhausted. Boxed because middlewares re-enter this
    /// function recursively.
    pub fn run(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if !self.entered {
                self.entered = true;
                self.job.notify_start();
                self.execution.start();
            }

            loop {
                let Some(middleware) = self.next_middleware() else {
                    break;
                };
                if self.execution.has_error() && !middleware.continue_on_stop() {
                    continue;
                }
                return middleware.run(self).await;
            }

            // A previous stage already sealed the outcome.
            if self.execution.has_error() {
                return Ok(());
            }

            self.executed = true;
            let job = self.job.clone();
            job.run(self).await
        })
    }

    fn next_middleware(&mut self) -> Option<Arc<dyn Middleware>> {
        let middleware = self.middlewares.get(self.current).cloned()?;
        self.current += 1;
        Some(middleware)
    }

    /// Seal the execution with an outcome and balance the job's running
    /// counter. Idempotent: only the first call takes effect.
    pub fn stop(&self, error: Option<Error>) {
        if self.execution.stop(error) {
            self.job.notify_stop();
        }
    }
}
