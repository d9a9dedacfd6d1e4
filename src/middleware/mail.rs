//! Mail notifier: sends an execution report over SMTP.

use super::{Context, Middleware};
use crate::error::Result;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::any::TypeId;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_password: String,
    pub email_to: String,
    pub email_from: String,
    pub mail_only_on_error: bool,
}

impl MailConfig {
    pub fn is_empty(&self) -> bool {
        self.smtp_host.is_empty() && self.email_to.is_empty() && self.email_from.is_empty()
    }

    pub fn apply(&mut self, key: &str, value: &str) -> bool {
        match key {
            "smtp-host" => self.smtp_host = value.to_string(),
            "smtp-port" => self.smtp_port = value.trim().parse().unwrap_or(0),
            "smtp-user" => self.smtp_user = value.to_string(),
            "smtp-password" => self.smtp_password = value.to_string(),
            "email-to" => self.email_to = value.to_string(),
            "email-from" => self.email_from = value.to_string(),
            "mail-only-on-error" => self.mail_only_on_error = value.trim() == "true",
            _ => return false,
        }
        true
    }

    pub fn middleware(&self) -> Option<Arc<dyn Middleware>> {
        if self.is_empty() {
            return None;
        }
        Some(Arc::new(Mail {
            config: self.clone(),
        }))
    }
}

pub struct Mail {
    config: MailConfig,
}

fn build_subject(ctx: &Context) -> String {
    let status = if ctx.execution.is_failed() {
        "FAILED"
    } else if ctx.execution.is_skipped() {
        "Skipped"
    } else {
        "Successful"
    };
    format!(
        "[Chadburn] {}: job \"{}\" finished in {}",
        status,
        ctx.job.name(),
        humantime::format_duration(ctx.execution.duration().to_std().unwrap_or_default()),
    )
}

fn build_body(ctx: &Context) -> String {
    let mut body = format!(
        "Job: {}\nCommand: {}\nExecution: {}\nFailed: {}\nSkipped: {}\nError: {}\n",
        ctx.job.name(),
        ctx.job.command(),
        ctx.execution.id,
        ctx.execution.is_failed(),
        ctx.execution.is_skipped(),
        ctx.execution.error_message().unwrap_or_else(|| "none".to_string()),
    );

    let stdout = ctx.execution.stdout();
    if !stdout.is_empty() {
        body.push_str("\nOutput:\n");
        body.push_str(&String::from_utf8_lossy(&stdout));
    }
    let stderr = ctx.execution.stderr();
    if !stderr.is_empty() {
        body.push_str("\nError output:\n");
        body.push_str(&String::from_utf8_lossy(&stderr));
    }
    body
}

impl Mail {
    async fn send_report(&self, ctx: &Context) {
        let from: Mailbox = match self.config.email_from.parse() {
            Ok(mailbox) => mailbox,
            Err(error) => {
                tracing::error!(address = %self.config.email_from, %error, "invalid from address");
                return;
            }
        };
        let to: Mailbox = match self.config.email_to.parse() {
            Ok(mailbox) => mailbox,
            Err(error) => {
                tracing::error!(address = %self.config.email_to, %error, "invalid to address");
                return;
            }
        };

        let message = match Message::builder()
            .from(from)
            .to(to)
            .subject(build_subject(ctx))
            .body(build_body(ctx))
        {
            Ok(message) => message,
            Err(error) => {
                tracing::error!(%error, "failed to build mail message");
                return;
            }
        };

        let mut builder =
            match AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host) {
                Ok(builder) => builder,
                Err(error) => {
                    tracing::error!(host = %self.config.smtp_host, %error, "failed to build smtp transport");
                    return;
                }
            };
        if self.config.smtp_port != 0 {
            builder = builder.port(self.config.smtp_port);
        }
        if !self.config.smtp_user.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.smtp_user.clone(),
                self.config.smtp_password.clone(),
            ));
        }

        if let Err(error) = builder.build().send(message).await {
            tracing::error!(host = %self.config.smtp_host, %error, "failed to send mail report");
        }
    }
}

#[async_trait]
impl Middleware for Mail {
    async fn run(&self, ctx: &mut Context) -> Result<()> {
        let result = ctx.run().await;
        ctx.stop(result.err());

        if ctx.execution.is_failed() || !self.config.mail_only_on_error {
            self.send_report(ctx).await;
        }

        Ok(())
    }

    fn continue_on_stop(&self) -> bool {
        true
    }

    fn type_key(&self) -> TypeId {
        TypeId::of::<Mail>()
    }
}
