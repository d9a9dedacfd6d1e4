//! Job variants and their shared behavior.
//!
//! Every variant holds a [`JobBase`] and implements [`Job`]; the trait
//! provides the shared accessors, the atomic running counter the overlap
//! middleware relies on, and the middleware list. Only `run` and
//! `fingerprint` are variant-specific.

pub mod exec;
pub mod lifecycle;
pub mod local;
pub mod run;
pub mod service;

pub use exec::ExecJob;
pub use lifecycle::{LifecycleEvent, LifecycleJob};
pub use local::LocalJob;
pub use run::{PullPolicy, RunJob};
pub use service::RunServiceJob;

use crate::error::Result;
use crate::middleware::{Context, Middleware, MiddlewareStack};
use crate::variables::{self, Variables};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};

/// State shared by every job variant.
#[derive(Debug)]
pub struct JobBase {
    pub name: String,
    pub schedule: String,
    pub command: String,
    /// True when the job came from container labels rather than the static
    /// configuration file. Only label-sourced jobs may be removed by the
    /// reconciler.
    pub from_labels: bool,
    running: AtomicI32,
    cron_id: AtomicU64,
    middlewares: Mutex<MiddlewareStack>,
}

impl JobBase {
    pub fn new(
        name: impl Into<String>,
        schedule: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            command: command.into(),
            from_labels: false,
            running: AtomicI32::new(0),
            cron_id: AtomicU64::new(0),
            middlewares: Mutex::new(MiddlewareStack::new()),
        }
    }

    /// The base's contribution to the fingerprint, in field order.
    fn write_fingerprint(&self, out: &mut String) {
        out.push_str(&self.schedule);
        out.push_str(&self.name);
        out.push_str(&self.command);
    }
}

/// A named unit of work with a cron schedule and a command.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn base(&self) -> &JobBase;

    /// Variant-specific work, executed once the middleware chain has run to
    /// completion.
    async fn run(&self, ctx: &Context) -> Result<()>;

    /// Stable string derived from the hashable configuration fields, used
    /// only for change detection during reconciliation.
    fn fingerprint(&self) -> String;

    fn name(&self) -> &str {
        &self.base().name
    }

    fn schedule(&self) -> &str {
        &self.base().schedule
    }

    fn command(&self) -> &str {
        &self.base().command
    }

    /// The command with variable placeholders substituted. Falls back to the
    /// raw command on template errors.
    fn processed_command(&self, vars: &Variables) -> String {
        match variables::process(self.command(), vars) {
            Ok(command) => command,
            Err(error) => {
                tracing::debug!(
                    job = %self.name(),
                    %error,
                    "command template failed, using the raw command"
                );
                self.command().to_string()
            }
        }
    }

    /// Number of executions currently in flight. The counter is the sole
    /// source of truth for the overlap middleware.
    fn running(&self) -> i32 {
        self.base().running.load(Ordering::SeqCst)
    }

    fn notify_start(&self) {
        self.base().running.fetch_add(1, Ordering::SeqCst);
    }

    fn notify_stop(&self) {
        self.base().running.fetch_sub(1, Ordering::SeqCst);
    }

    fn cron_id(&self) -> u64 {
        self.base().cron_id.load(Ordering::SeqCst)
    }

    fn set_cron_id(&self, id: u64) {
        self.base().cron_id.store(id, Ordering::SeqCst);
    }

    fn middlewares(&self) -> Vec<Arc<dyn Middleware>> {
        let stack = self
            .base()
            .middlewares
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        stack.list()
    }

    fn use_middleware(&self, middleware: Option<Arc<dyn Middleware>>) {
        let mut stack = self
            .base()
            .middlewares
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        stack.register(middleware);
    }

    /// Merge the scheduler-global middlewares ahead of the job-local ones.
    fn merge_global_middlewares(&self, globals: &MiddlewareStack) {
        let mut stack = self
            .base()
            .middlewares
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        stack.merge_front(globals);
    }

    fn from_labels(&self) -> bool {
        self.base().from_labels
    }
}

/// Tokenize a command with shell-style quoting.
pub(crate) fn split_command(command: &str) -> Result<Vec<String>> {
    match shlex::split(command) {
        Some(argv) if !argv.is_empty() => Ok(argv),
        _ => Err(crate::error::ConfigError::Invalid(format!(
            "empty or unparsable command: {command:?}"
        ))
        .into()),
    }
}
