//! Save middleware: persists execution reports to a folder on disk.

use super::{Context, Middleware};
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::any::TypeId;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveConfig {
    pub save_folder: String,
    pub save_only_on_error: bool,
}

impl SaveConfig {
    pub fn is_empty(&self) -> bool {
        self.save_folder.is_empty()
    }

    pub fn apply(&mut self, key: &str, value: &str) -> bool {
        match key {
            "save-folder" => self.save_folder = value.to_string(),
            "save-only-on-error" => self.save_only_on_error = value.trim() == "true",
            _ => return false,
        }
        true
    }

    pub fn middleware(&self) -> Option<Arc<dyn Middleware>> {
        if self.is_empty() {
            return None;
        }
        Some(Arc::new(Save {
            config: self.clone(),
        }))
    }
}

pub struct Save {
    config: SaveConfig,
}

/// Serialized execution report written next to the captured streams.
#[derive(Debug, Serialize)]
struct SaveReport<'a> {
    job: &'a str,
    command: &'a str,
    schedule: &'a str,
    execution: &'a str,
    date: String,
    duration_ms: i64,
    failed: bool,
    skipped: bool,
    error: Option<String>,
}

fn report_base_name(ctx: &Context) -> String {
    format!(
        "{}_{}_{}",
        ctx.execution.date.format("%Y%m%d%H%M%S"),
        ctx.job.name(),
        ctx.execution.id,
    )
}

async fn write_report(folder: &Path, ctx: &Context) -> std::io::Result<()> {
    tokio::fs::create_dir_all(folder).await?;
    let base = report_base_name(ctx);

    let report = SaveReport {
        job: ctx.job.name(),
        command: ctx.job.command(),
        schedule: ctx.job.schedule(),
        execution: &ctx.execution.id,
        date: ctx.execution.date.to_rfc3339(),
        duration_ms: ctx.execution.duration().num_milliseconds(),
        failed: ctx.execution.is_failed(),
        skipped: ctx.execution.is_skipped(),
        error: ctx.execution.error_message(),
    };
    let json = serde_json::to_vec_pretty(&report)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    tokio::fs::write(folder.join(format!("{base}.json")), json).await?;

    let stdout = ctx.execution.stdout();
    if !stdout.is_empty() {
        tokio::fs::write(folder.join(format!("{base}.stdout.log")), stdout).await?;
    }
    let stderr = ctx.execution.stderr();
    if !stderr.is_empty() {
        tokio::fs::write(folder.join(format!("{base}.stderr.log")), stderr).await?;
    }

    Ok(())
}

#[async_trait]
impl Middleware for Save {
    async fn run(&self, ctx: &mut Context) -> Result<()> {
        let result = ctx.run().await;
        ctx.stop(result.err());

        if ctx.execution.is_failed() || !self.config.save_only_on_error {
            let folder = PathBuf::from(&self.config.save_folder);
            if let Err(error) = write_report(&folder, ctx).await {
                tracing::error!(
                    folder = %folder.display(),
                    job = %ctx.job.name(),
                    %error,
                    "failed to save execution report"
                );
            }
        }

        Ok(())
    }

    fn continue_on_stop(&self) -> bool {
        true
    }

    fn type_key(&self) -> TypeId {
        TypeId::of::<Save>()
    }
}
