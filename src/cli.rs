use std::path::PathBuf;

use clap::Parser;

use crate::output::OutputFormat;

/// Sends a batch of prompts to a chat completion API and saves the answers.
#[derive(Debug, Parser)]
#[command(name = "promptbatch")]
#[command(about = "Batch prompts through a chat completion API", version)]
pub struct Cli {
    #[arg(
        short = 'i',
        long,
        default_value = "ai.ini",
        help = "Path to the ini file with API key and model settings"
    )]
    pub ini: PathBuf,

    #[arg(
        short = 's',
        long,
        default_value_t = 1,
        help = "Seconds to wait between requests to stay under rate limits"
    )]
    pub sleep: u64,

    #[arg(
        short = 'o',
        long,
        default_value = "output.docx",
        help = "Output filename"
    )]
    pub output: PathBuf,

    #[arg(
        short = 'f',
        long,
        default_value = "docx",
        value_parser = clap::value_parser!(OutputFormat),
        help = "Output format: docx, txt, md or stdout"
    )]
    pub output_format: OutputFormat,

    #[arg(
        short = 'p',
        long,
        help = "File with one prompt per line (defaults to the built-in prompts)"
    )]
    pub prompt_file: Option<PathBuf>,

    #[arg(short = 'd', long, help = "Enable debug logging")]
    pub debug: bool,

    #[arg(long, help = "Also write JSON debug logs to this file")]
    pub log_file: Option<PathBuf>,

    #[arg(long = "temperature", default_value_t = 1.0)]
    pub temperature: f64,

    #[arg(long = "top_p", default_value_t = 1.0)]
    pub top_p: f64,

    #[arg(long = "frequency_penalty", default_value_t = 0.0, allow_negative_numbers = true)]
    pub frequency_penalty: f64,

    #[arg(long = "presence_penalty", default_value_t = 0.0, allow_negative_numbers = true)]
    pub presence_penalty: f64,
}
