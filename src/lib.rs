//! Chadburn: a cron-style job scheduler that executes work against a
//! container runtime.
//!
//! Jobs are declared in a configuration file or through labels attached to
//! live containers. The [`scheduler::Scheduler`] owns the active job set and
//! dispatches executions through a middleware chain; the
//! [`reconciler::Reconciler`] keeps the job set consistent with container
//! labels; the [`events::EventReactor`] fires one-shot lifecycle jobs on
//! container events.

pub mod config;
pub mod daemon;
pub mod error;
pub mod events;
pub mod execution;
pub mod jobs;
pub mod middleware;
pub mod reconciler;
pub mod runtime;
pub mod schedule;
pub mod scheduler;
pub mod telemetry;
pub mod variables;

pub use error::{ConfigError, Error, Result, RuntimeError};

/// Label namespace shared by the reconciler and the label parser.
pub const LABEL_PREFIX: &str = "chadburn";

/// Generate a short random identifier: 6 random bytes, hex-encoded.
///
/// Used for execution ids and for the names of throwaway containers and
/// services.
pub fn random_id() -> String {
    let bytes: [u8; 6] = rand::random();
    hex::encode(bytes)
}
