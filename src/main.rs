use std::{io::IsTerminal, process::ExitCode, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use promptbatch::{
    app::run_batch,
    cli::Cli,
    config::{ClientSettings, RunConfig},
    llm::{CompletionClient, RigCompletionClient},
    runner::{RunOutcome, ctrl_c_signal},
};

mod tracing_setup;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = tracing_setup::init(cli.debug, cli.log_file.as_deref());

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Command failed: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let cancel = ctrl_c_signal();
    let config = RunConfig::from_cli(cli);
    let settings = ClientSettings::load(&config.ini)?;
    let client = RigCompletionClient::new(settings).context("Failed to set up completion client")?;
    info!(
        provider = client.provider().as_str(),
        model = client.model(),
        "Completion client ready"
    );
    let client: Arc<dyn CompletionClient> = Arc::new(client);

    let result = run_batch(&config, client, &cancel, std::io::stderr().is_terminal()).await?;
    match result.outcome {
        RunOutcome::Completed => info!("Processed {} prompts", result.pairs.len()),
        RunOutcome::Failed { .. } | RunOutcome::Interrupted => {
            info!("Run stopped early after {} responses", result.pairs.len())
        }
    }
    Ok(())
}
