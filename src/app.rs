//! Wires the prompt source, runner and output writer for one invocation.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::{
    config::RunConfig,
    llm::CompletionClient,
    output::write_pairs,
    prompts::load_prompts,
    runner::{CancelSignal, PromptRunner, RunResult},
};

/// Loads prompts, runs them, and saves whatever was collected.
pub async fn run_batch(
    config: &RunConfig,
    client: Arc<dyn CompletionClient>,
    cancel: &CancelSignal,
    show_progress: bool,
) -> Result<RunResult> {
    let sampling = &config.sampling;
    debug!(
        "Using parameters: temperature={}, top_p={}, frequency_penalty={}, presence_penalty={}",
        sampling.temperature, sampling.top_p, sampling.frequency_penalty, sampling.presence_penalty
    );

    let prompts = load_prompts(config.prompt_file.as_deref())?;
    info!("Loaded {} prompts", prompts.len());

    let runner =
        PromptRunner::new(client, config.sampling, config.delay).with_progress(show_progress);
    let result = runner.run(&prompts, cancel).await;

    save_results(&result, config)?;
    Ok(result)
}

/// Writes the collected pairs, or warns when there is nothing to write.
pub fn save_results(result: &RunResult, config: &RunConfig) -> Result<()> {
    if result.pairs.is_empty() {
        warn!("No responses to save.");
        return Ok(());
    }

    info!(
        "Saving responses to {} (format: {})",
        config.output.display(),
        config.output_format
    );
    write_pairs(&result.pairs, &config.output, config.output_format)
        .with_context(|| format!("Failed to save responses to {}", config.output.display()))
}
