//! Lifecycle jobs fire once when a container starts or stops.
//!
//! They are never registered with the cron scheduler; the event reactor
//! invokes them directly. The `executed` latch makes them one-shot until
//! explicitly reset.

use super::local::run_local_command;
use super::{Job, JobBase};
use crate::error::Result;
use crate::middleware::Context;
use crate::variables::Variables;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

/// Container lifecycle event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleEvent {
    #[default]
    Start,
    Stop,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Start => write!(f, "start"),
            LifecycleEvent::Stop => write!(f, "stop"),
        }
    }
}

impl FromStr for LifecycleEvent {
    type Err = crate::error::ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "start" => Ok(LifecycleEvent::Start),
            "stop" => Ok(LifecycleEvent::Stop),
            other => Err(crate::error::ConfigError::Invalid(format!(
                "unknown event type: {other:?}"
            ))),
        }
    }
}

pub struct LifecycleJob {
    pub base: JobBase,
    /// Container name the job is bound to.
    pub container: String,
    pub event_type: LifecycleEvent,
    executed: AtomicBool,
}

impl LifecycleJob {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            // Lifecycle jobs have no cron schedule.
            base: JobBase::new(name, "", command),
            container: String::new(),
            event_type: LifecycleEvent::Start,
            executed: AtomicBool::new(false),
        }
    }

    pub fn executed(&self) -> bool {
        self.executed.load(Ordering::Acquire)
    }

    /// Whether this job should fire for the given event kind.
    pub fn should_run(&self, event: LifecycleEvent) -> bool {
        !self.executed() && self.event_type == event
    }

    /// Clear the one-shot latch so the job can fire again.
    pub fn reset(&self) {
        self.executed.store(false, Ordering::Release);
    }
}

#[async_trait]
impl Job for LifecycleJob {
    fn base(&self) -> &JobBase {
        &self.base
    }

    fn fingerprint(&self) -> String {
        let mut out = String::new();
        self.base.write_fingerprint(&mut out);
        out.push_str(&self.container);
        out.push_str(&self.event_type.to_string());
        out
    }

    async fn run(&self, ctx: &Context) -> Result<()> {
        if self.executed() {
            return Ok(());
        }

        let vars = Variables::for_container(&self.container, &self.container);
        let command = self.processed_command(&vars);
        run_local_command(ctx, &command, None, &[]).await?;

        self.executed.store(true, Ordering::Release);
        Ok(())
    }
}
