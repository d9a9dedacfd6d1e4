//! Gotify notifier: pushes a markdown execution report to a Gotify server.

use super::{Context, Middleware};
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::any::TypeId;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GotifyConfig {
    pub gotify_webhook: String,
    pub gotify_only_on_error: bool,
    pub gotify_priority: i64,
}

impl GotifyConfig {
    pub fn is_empty(&self) -> bool {
        self.gotify_webhook.is_empty()
    }

    pub fn apply(&mut self, key: &str, value: &str) -> bool {
        match key {
            "gotify-webhook" => self.gotify_webhook = value.to_string(),
            "gotify-only-on-error" => self.gotify_only_on_error = value.trim() == "true",
            "gotify-priority" => self.gotify_priority = value.trim().parse().unwrap_or(0),
            _ => return false,
        }
        true
    }

    pub fn middleware(&self) -> Option<Arc<dyn Middleware>> {
        if self.is_empty() {
            return None;
        }
        Some(Arc::new(Gotify {
            config: self.clone(),
            client: reqwest::Client::new(),
        }))
    }
}

pub struct Gotify {
    config: GotifyConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct GotifyMessage {
    title: String,
    message: String,
    priority: i64,
    extras: GotifyExtras,
}

#[derive(Debug, Serialize)]
struct GotifyExtras {
    #[serde(rename = "client::display")]
    client_display: GotifyDisplay,
}

#[derive(Debug, Serialize)]
struct GotifyDisplay {
    #[serde(rename = "contentType")]
    content_type: String,
}

fn build_message(config: &GotifyConfig, ctx: &Context) -> GotifyMessage {
    let mut message = format!(
        "Job *{}* finished in *{}*, command `{}`",
        ctx.job.name(),
        humantime::format_duration(
            ctx.execution.duration().to_std().unwrap_or_default()
        ),
        ctx.job.command(),
    );

    if ctx.execution.is_failed() {
        message = format!("FAILED: {message}");
    } else if ctx.execution.is_skipped() {
        message = format!("Skipped: {message}");
    }

    GotifyMessage {
        title: ctx.job.name().to_string(),
        message,
        priority: config.gotify_priority,
        extras: GotifyExtras {
            client_display: GotifyDisplay {
                content_type: "text/markdown".to_string(),
            },
        },
    }
}

impl Gotify {
    async fn push_message(&self, ctx: &Context) {
        let message = build_message(&self.config, ctx);

        let response = self
            .client
            .post(&self.config.gotify_webhook)
            .json(&message)
            .send()
            .await;

        match response {
            Ok(response) if !response.status().is_success() => {
                tracing::error!(
                    webhook = %self.config.gotify_webhook,
                    status = %response.status(),
                    "gotify returned a non-success status"
                );
            }
            Ok(_) => {}
            Err(error) => {
                tracing::error!(webhook = %self.config.gotify_webhook, %error, "gotify call failed");
            }
        }
    }
}

#[async_trait]
impl Middleware for Gotify {
    async fn run(&self, ctx: &mut Context) -> Result<()> {
        let result = ctx.run().await;
        ctx.stop(result.err());

        if ctx.execution.is_failed() || !self.config.gotify_only_on_error {
            self.push_message(ctx).await;
        }

        Ok(())
    }

    fn continue_on_stop(&self) -> bool {
        true
    }

    fn type_key(&self) -> TypeId {
        TypeId::of::<Gotify>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::execution::Execution;
    use crate::jobs::LocalJob;

    fn context_with_outcome(error: Option<Error>) -> Context {
        let job = Arc::new(LocalJob::new("report", "@every 1m", "echo hi"));
        let execution = Arc::new(Execution::new());
        execution.start();
        execution.stop(error);
        Context::new(job, execution, Vec::new())
    }

    #[test]
    fn empty_config_builds_no_middleware() {
        assert!(GotifyConfig::default().middleware().is_none());
    }

    #[test]
    fn success_message_has_no_failed_prefix() {
        let ctx = context_with_outcome(None);
        let message = build_message(&GotifyConfig::default(), &ctx);
        assert!(!message.message.contains("FAILED"));
        assert_eq!(message.title, "report");
    }

    #[test]
    fn failure_message_is_prefixed() {
        let ctx = context_with_outcome(Some(Error::ExitCode(1)));
        let message = build_message(&GotifyConfig::default(), &ctx);
        assert!(message.message.starts_with("FAILED: "));
    }

    #[test]
    fn skipped_message_is_prefixed() {
        let ctx = context_with_outcome(Some(Error::Skipped));
        let message = build_message(&GotifyConfig::default(), &ctx);
        assert!(message.message.starts_with("Skipped: "));
    }

    #[test]
    fn priority_flows_from_the_config() {
        let config = GotifyConfig {
            gotify_priority: 7,
            ..Default::default()
        };
        let ctx = context_with_outcome(None);
        assert_eq!(build_message(&config, &ctx).priority, 7);
    }
}
