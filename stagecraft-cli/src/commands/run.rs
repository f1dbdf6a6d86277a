//! `stagecraft run` - execute a pipeline.

use anyhow::{Context, Result};
use stagecraft_core::config::PipelineConfig;
use stagecraft_core::Event;
use stagecraft_engine::build_from_config;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Run a pipeline file to completion (batch) or until the timeout or Ctrl-C
/// (streaming).
pub async fn run(file: &str, timeout_secs: Option<u64>, print_events: bool) -> Result<()> {
    let config = PipelineConfig::from_file(Path::new(file))
        .with_context(|| format!("failed to load pipeline '{}'", file))?;

    let registry = super::full_registry()?;
    let pipeline = build_from_config(&config, &registry)
        .with_context(|| format!("failed to build pipeline '{}'", config.name))?;

    if print_events {
        pipeline.add_listener(Arc::new(|event: Event| {
            println!(
                "{} {:<18} {}",
                event.timestamp.format("%H:%M:%S%.3f"),
                event.kind,
                event.data
            );
        }));
    }

    pipeline
        .start()
        .with_context(|| format!("failed to start pipeline '{}'", config.name))?;
    tracing::info!(pipeline = %config.name, "running");

    match timeout_secs {
        Some(secs) => {
            tokio::select! {
                _ = pipeline.wait() => {}
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    tracing::info!("timeout reached, stopping pipeline");
                    if pipeline.is_running() {
                        pipeline.stop().await.context("pipeline did not stop cleanly")?;
                    }
                }
            }
        }
        None => {
            tokio::select! {
                _ = pipeline.wait() => {}
                signal = tokio::signal::ctrl_c() => {
                    signal.context("failed to listen for shutdown signal")?;
                    tracing::info!("interrupt received, stopping pipeline");
                    if pipeline.is_running() {
                        pipeline.stop().await.context("pipeline did not stop cleanly")?;
                    }
                }
            }
        }
    }

    Ok(())
}
