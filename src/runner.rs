use std::{sync::Arc, time::Duration};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::llm::{CompletionClient, SamplingParameters};

/// A prompt together with the completion it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponsePair {
    pub prompt: String,
    pub response: String,
}

/// Why the prompt loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed { prompt: String, detail: String },
    Interrupted,
}

/// Pairs collected before the loop stopped, in prompt order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    pub pairs: Vec<ResponsePair>,
    pub outcome: RunOutcome,
}

/// Receiving side of the operator interrupt flag.
pub type CancelSignal = watch::Receiver<bool>;

/// Exit status used when a second Ctrl-C aborts the process.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Returns a signal that flips to `true` on the first Ctrl-C. A second Ctrl-C exits the
/// process at once, without saving.
pub fn ctrl_c_signal() -> CancelSignal {
    interrupt_signal(
        || async { tokio::signal::ctrl_c().await.is_ok() },
        || {
            warn!("Interrupted again; exiting without saving");
            std::process::exit(FORCED_EXIT_CODE);
        },
    )
}

/// Flips the returned signal the first time `next_interrupt` yields `true` and calls
/// `force_exit` if it yields `true` again while a receiver is still listening.
pub fn interrupt_signal<F, Fut, X>(mut next_interrupt: F, force_exit: X) -> CancelSignal
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send,
    X: FnOnce() + Send + 'static,
{
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if next_interrupt().await {
            let _ = tx.send(true);
            let again = tokio::select! {
                received = next_interrupt() => received,
                _ = tx.closed() => false,
            };
            if again {
                force_exit();
                return;
            }
        }
        // Keep the sender alive so receivers never observe a closed channel.
        tx.closed().await;
    });
    rx
}

/// Sends prompts one at a time, pausing between successes and stopping at the first
/// failure or interrupt.
pub struct PromptRunner {
    client: Arc<dyn CompletionClient>,
    params: SamplingParameters,
    delay: Duration,
    show_progress: bool,
}

impl PromptRunner {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        params: SamplingParameters,
        delay: Duration,
    ) -> Self {
        Self {
            client,
            params,
            delay,
            show_progress: false,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub async fn run(&self, prompts: &[String], cancel: &CancelSignal) -> RunResult {
        let mut cancel = cancel.clone();
        let progress = self.progress_bar(prompts.len());
        let mut pairs = Vec::with_capacity(prompts.len());

        let outcome = 'prompts: {
            for prompt in prompts {
                if *cancel.borrow() {
                    break 'prompts RunOutcome::Interrupted;
                }

                info!("Sending prompt: {prompt}");
                progress.set_message(truncate(prompt, 40));
                let result = tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => break 'prompts RunOutcome::Interrupted,
                    result = self.client.complete(prompt, &self.params) => result,
                };

                match result {
                    Ok(response) => {
                        debug!(chars = response.len(), "Received response");
                        pairs.push(ResponsePair {
                            prompt: prompt.clone(),
                            response,
                        });
                        progress.inc(1);
                    }
                    Err(err) => {
                        let detail = err.to_string();
                        error!("Error generating response for prompt: {prompt}");
                        error!("Exiting due to error: {detail}");
                        progress.suspend(|| {
                            eprintln!("Error generating response for prompt: {prompt}");
                            eprintln!("Exiting due to error: {detail}");
                        });
                        break 'prompts RunOutcome::Failed {
                            prompt: prompt.clone(),
                            detail,
                        };
                    }
                }

                tokio::select! {
                    biased;
                    _ = cancelled(&mut cancel) => break 'prompts RunOutcome::Interrupted,
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
            RunOutcome::Completed
        };

        progress.finish_and_clear();
        if outcome == RunOutcome::Interrupted {
            warn!("Interrupted by user. Saving partial results...");
        }
        RunResult { pairs, outcome }
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(len as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "Processing prompts [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-"),
        );
        bar
    }
}

/// Resolves once the flag is raised; never resolves if the sender is gone.
async fn cancelled(cancel: &mut CancelSignal) {
    if cancel.wait_for(|flag| *flag).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
