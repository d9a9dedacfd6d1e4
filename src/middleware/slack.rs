//! Slack notifier: posts an execution report to an incoming webhook.

use super::{Context, Middleware};
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::any::TypeId;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlackConfig {
    pub slack_webhook: String,
    pub slack_only_on_error: bool,
}

impl SlackConfig {
    pub fn is_empty(&self) -> bool {
        self.slack_webhook.is_empty()
    }

    pub fn apply(&mut self, key: &str, value: &str) -> bool {
        match key {
            "slack-webhook" => self.slack_webhook = value.to_string(),
            "slack-only-on-error" => self.slack_only_on_error = value.trim() == "true",
            _ => return false,
        }
        true
    }

    pub fn middleware(&self) -> Option<Arc<dyn Middleware>> {
        if self.is_empty() {
            return None;
        }
        Some(Arc::new(Slack {
            config: self.clone(),
            client: reqwest::Client::new(),
        }))
    }
}

pub struct Slack {
    config: SlackConfig,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SlackMessage {
    text: String,
    attachments: Vec<SlackAttachment>,
}

#[derive(Debug, Serialize)]
struct SlackAttachment {
    title: String,
    text: String,
    color: String,
}

fn build_message(ctx: &Context) -> SlackMessage {
    let text = format!(
        "Job *{}* finished in *{}*, command `{}`",
        ctx.job.name(),
        humantime::format_duration(
            ctx.execution.duration().to_std().unwrap_or_default()
        ),
        ctx.job.command(),
    );

    let attachment = if ctx.execution.is_failed() {
        SlackAttachment {
            title: "Execution failed".to_string(),
            text: ctx.execution.error_message().unwrap_or_default(),
            color: "#F35A00".to_string(),
        }
    } else if ctx.execution.is_skipped() {
        SlackAttachment {
            title: "Execution skipped".to_string(),
            text: String::new(),
            color: "#FFA500".to_string(),
        }
    } else {
        SlackAttachment {
            title: "Execution successful".to_string(),
            text: String::new(),
            color: "good".to_string(),
        }
    };

    SlackMessage {
        text,
        attachments: vec![attachment],
    }
}

impl Slack {
    async fn post_report(&self, ctx: &Context) {
        let message = build_message(ctx);
        let payload = match serde_json::to_string(&message) {
            Ok(payload) => payload,
            Err(error) => {
                tracing::error!(%error, "failed to serialize slack payload");
                return;
            }
        };

        // The webhook expects a form field named `payload`.
        let response = self
            .client
            .post(&self.config.slack_webhook)
            .form(&[("payload", payload)])
            .send()
            .await;

        match response {
            Ok(response) if !response.status().is_success() => {
                tracing::error!(
                    webhook = %self.config.slack_webhook,
                    status = %response.status(),
                    "slack webhook returned a non-success status"
                );
            }
            Ok(_) => {}
            Err(error) => {
                tracing::error!(webhook = %self.config.slack_webhook, %error, "slack webhook call failed");
            }
        }
    }
}

#[async_trait]
impl Middleware for Slack {
    async fn run(&self, ctx: &mut Context) -> Result<()> {
        let result = ctx.run().await;
        ctx.stop(result.err());

        if ctx.execution.is_failed() || !self.config.slack_only_on_error {
            self.post_report(ctx).await;
        }

        Ok(())
    }

    fn continue_on_stop(&self) -> bool {
        true
    }

    fn type_key(&self) -> TypeId {
        TypeId::of::<Slack>()
    }
}
