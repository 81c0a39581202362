use std::{fs, path::Path};

use crate::error::{Error, Result};

/// Prompts used when no `--prompt-file` is given.
pub const DEFAULT_PROMPTS: &[&str] = &[
    "Explain the difference between TCP and UDP in two short paragraphs.",
    "Summarize the main responsibilities of a DNS resolver.",
    "List five practical ways to reduce the attack surface of a home network.",
    "Describe what DHCP does and why networks rely on it.",
    "Write a short checklist for reviewing firewall rules.",
];

/// Loads prompts from `path`, or returns [`DEFAULT_PROMPTS`] when no path is given.
pub fn load_prompts(path: Option<&Path>) -> Result<Vec<String>> {
    match path {
        Some(path) => {
            let raw = fs::read_to_string(path).map_err(|err| Error::Source {
                path: path.display().to_string(),
                details: err.to_string(),
            })?;
            Ok(parse_prompts(&raw))
        }
        None => Ok(DEFAULT_PROMPTS.iter().map(|p| p.to_string()).collect()),
    }
}

/// One prompt per line; lines are trimmed and blank lines skipped.
pub fn parse_prompts(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
