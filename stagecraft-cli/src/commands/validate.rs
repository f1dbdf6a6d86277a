//! `stagecraft validate` - check a pipeline file without running it.

use anyhow::{Context, Result};
use stagecraft_core::config::PipelineConfig;
use stagecraft_engine::build_from_config;
use std::path::Path;

/// Parse, build, and validate a pipeline file.
pub fn run(file: &str) -> Result<()> {
    let config = PipelineConfig::from_file(Path::new(file))
        .with_context(|| format!("failed to load pipeline '{}'", file))?;

    let registry = super::full_registry()?;
    let pipeline = build_from_config(&config, &registry)
        .with_context(|| format!("failed to build pipeline '{}'", config.name))?;

    pipeline
        .validate()
        .with_context(|| format!("pipeline '{}' is invalid", config.name))?;

    println!(
        "{}: OK ({} stage(s), {} mode)",
        config.name,
        pipeline.stage_ids().len(),
        pipeline.detect_execution_mode()
    );
    Ok(())
}
