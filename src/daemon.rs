//! Daemon bootstrap: wire the configuration, the scheduler, and the
//! background loops, then run until a shutdown signal arrives.

use crate::config::{Config, JobRegistry};
use crate::error::{ConfigError, Error, Result};
use crate::events::EventReactor;
use crate::reconciler::Reconciler;
use crate::runtime::Runtime;
use crate::runtime::docker::DockerRuntime;
use crate::scheduler::Scheduler;
use crate::telemetry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct DaemonOptions {
    pub config_path: PathBuf,
    pub metrics: bool,
    pub listen_address: String,
    pub disable_docker: bool,
}

/// Boot the daemon and block until SIGINT or SIGTERM. In-flight executions
/// are drained before returning.
pub async fn run(options: DaemonOptions) -> Result<()> {
    // The config file is optional: globals and jobs may come entirely from
    // container labels.
    let config = match Config::from_file(&options.config_path) {
        Ok(config) => config,
        Err(ConfigError::Read { path, source }) => {
            tracing::debug!(config = %path, %source, "config file not found, starting without one");
            Config::default()
        }
        Err(error) => return Err(error.into()),
    };

    let scheduler = Scheduler::new();
    config.attach_global_middlewares(&scheduler);

    let registry = Arc::new(JobRegistry::default());
    let shutdown = CancellationToken::new();

    let runtime: Option<Arc<dyn Runtime>> = if options.disable_docker {
        tracing::info!("docker integration disabled; only job-local entries are supported");
        None
    } else {
        let runtime = DockerRuntime::connect()?;
        runtime.ping().await?;
        Some(Arc::new(runtime))
    };

    config.register_jobs(&scheduler, runtime.clone(), &registry)?;

    // Without a runtime no labels can ever add jobs; an empty job set would
    // idle forever.
    if runtime.is_none() && scheduler.job_count() == 0 {
        return Err(Error::EmptyScheduler);
    }

    if let Some(runtime) = &runtime {
        Reconciler::new(
            runtime.clone(),
            scheduler.clone(),
            registry.clone(),
            shutdown.clone(),
        )
        .spawn();
        EventReactor::new(runtime.clone(), registry.clone(), shutdown.clone()).spawn();
    }

    // The server task shuts down with the token; its handle is not awaited.
    let _metrics_server = if options.metrics {
        Some(
            telemetry::start_metrics_server(&options.listen_address, shutdown.clone())
                .await
                .map_err(Error::Other)?,
        )
    } else {
        None
    };

    scheduler.start();
    tracing::info!(
        config = %options.config_path.display(),
        jobs = scheduler.job_count(),
        "chadburn started"
    );

    wait_for_signal().await?;
    tracing::warn!("signal received, shutting down; waiting for running jobs");

    shutdown.cancel();
    scheduler.stop().await;
    Ok(())
}

/// Parse the config file and report the declared job inventory.
pub fn validate(config_path: &Path) -> Result<()> {
    let config = Config::from_file(config_path)?;

    println!("configuration {} loads cleanly", config_path.display());
    for name in config.exec_jobs.keys() {
        println!("  job-exec {name:?}");
    }
    for name in config.run_jobs.keys() {
        println!("  job-run {name:?}");
    }
    for name in config.service_jobs.keys() {
        println!("  job-service-run {name:?}");
    }
    for name in config.local_jobs.keys() {
        println!("  job-local {name:?}");
    }
    for name in config.lifecycle_jobs.keys() {
        println!("  job-lifecycle {name:?}");
    }
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
