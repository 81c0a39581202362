use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use ini::Ini;
use tracing::{debug, warn};

use crate::{
    cli::Cli,
    error::{Error, Result},
    llm::SamplingParameters,
    output::OutputFormat,
};

pub const SETTINGS_SECTION: &str = "ai";

/// Overrides the directory searched for the `.env` key file.
pub const HOME_OVERRIDE_VAR: &str = "PROMPTBATCH_HOME";

/// Completion backends selectable from the settings file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LlmProvider {
    #[default]
    Openai,
    Anthropic,
    Gemini,
    Grok,
}

impl LlmProvider {
    pub fn env_var(self) -> &'static str {
        match self {
            LlmProvider::Openai => "OPENAI_API_KEY",
            LlmProvider::Anthropic => "ANTHROPIC_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
            LlmProvider::Grok => "XAI_API_KEY",
        }
    }

    /// Model used when the settings file names none.
    pub fn default_model(self) -> &'static str {
        match self {
            LlmProvider::Openai => "gpt-4o-mini",
            LlmProvider::Anthropic => "claude-sonnet-4-0",
            LlmProvider::Gemini => "gemini-2.0-flash",
            LlmProvider::Grok => "grok-3-mini",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LlmProvider::Openai => "openai",
            LlmProvider::Anthropic => "anthropic",
            LlmProvider::Gemini => "gemini",
            LlmProvider::Grok => "grok",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(LlmProvider::Openai),
            "anthropic" => Some(LlmProvider::Anthropic),
            "gemini" => Some(LlmProvider::Gemini),
            "grok" | "xai" => Some(LlmProvider::Grok),
            _ => None,
        }
    }
}

/// Credentials and model selection for the completion client.
#[derive(Clone)]
pub struct ClientSettings {
    pub provider: LlmProvider,
    pub model: String,
    pub api_key: String,
    pub preamble: Option<String>,
    /// Endpoint override for OpenAI-compatible servers.
    pub base_url: Option<String>,
}

impl std::fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSettings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("preamble", &self.preamble)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ClientSettings {
    /// Reads the `[ai]` section of `path`. A missing file falls back to defaults and
    /// environment variables; a malformed one is an error. Key variables missing from the
    /// environment are looked up in the home `.env` file.
    pub fn load(path: &Path) -> Result<Self> {
        let key_file = home_key_file().map(|path| read_key_file(&path)).unwrap_or_default();
        let raw = match fs::read_to_string(path) {
            Ok(raw) => Some(raw),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(
                    "Settings file {} not found; using defaults and environment",
                    path.display()
                );
                None
            }
            Err(err) => {
                return Err(Error::Config(format!(
                    "Failed to read {}: {err}",
                    path.display()
                )));
            }
        };
        Self::resolve(raw.as_deref(), |name| {
            std::env::var(name).ok().or_else(|| key_file.get(name).cloned())
        })
            .map_err(|err| match err {
                Error::Config(msg) => Error::Config(format!("{msg} ({})", path.display())),
                other => other,
            })
    }

    /// Builds settings from ini text (if any), consulting `env` for the provider's key variable.
    pub fn resolve(raw: Option<&str>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let ini = match raw {
            Some(raw) => Some(
                Ini::load_from_str(raw)
                    .map_err(|err| Error::Config(format!("Invalid settings file: {err}")))?,
            ),
            None => None,
        };
        let section = ini.as_ref().and_then(|ini| ini.section(Some(SETTINGS_SECTION)));
        let value = |key: &str| section.and_then(|props| props.get(key)).and_then(non_blank);

        let provider = match value("provider") {
            Some(name) => LlmProvider::from_name(&name)
                .ok_or_else(|| Error::Config(format!("Unsupported provider '{name}'")))?,
            None => LlmProvider::default(),
        };
        let model = value("model").unwrap_or_else(|| provider.default_model().to_string());
        let api_key = pick_api_key(value("api_key"), env(provider.env_var())).ok_or_else(|| {
            Error::Config(format!(
                "Missing API key: set api_key in [{SETTINGS_SECTION}] or {}",
                provider.env_var()
            ))
        })?;

        debug!(provider = provider.as_str(), model = %model, "Resolved client settings");
        Ok(Self {
            provider,
            model,
            api_key,
            preamble: value("preamble"),
            base_url: value("base_url"),
        })
    }
}

/// Immutable settings for one invocation, built once from the command line.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub ini: PathBuf,
    pub delay: Duration,
    pub output: PathBuf,
    pub output_format: OutputFormat,
    pub prompt_file: Option<PathBuf>,
    pub sampling: SamplingParameters,
}

impl RunConfig {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            ini: cli.ini.clone(),
            delay: Duration::from_secs(cli.sleep),
            output: cli.output.clone(),
            output_format: cli.output_format,
            prompt_file: cli.prompt_file.clone(),
            sampling: SamplingParameters {
                temperature: cli.temperature,
                top_p: cli.top_p,
                frequency_penalty: cli.frequency_penalty,
                presence_penalty: cli.presence_penalty,
            },
        }
    }
}

fn pick_api_key(file_value: Option<String>, env_value: Option<String>) -> Option<String> {
    file_value.or_else(|| env_value.as_deref().and_then(non_blank))
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// `$PROMPTBATCH_HOME/.env`, falling back to the user's home directory.
fn home_key_file() -> Option<PathBuf> {
    let home = std::env::var_os(HOME_OVERRIDE_VAR)
        .or_else(|| std::env::var_os("HOME"))
        .or_else(|| std::env::var_os("USERPROFILE"))?;
    Some(PathBuf::from(home).join(".env"))
}

/// Loads `KEY=VALUE` pairs from a dotenv-style file. Unreadable or malformed files
/// contribute nothing.
fn read_key_file(path: &Path) -> HashMap<String, String> {
    match fs::read_to_string(path) {
        Ok(raw) => parse_key_file(&raw).unwrap_or_else(|err| {
            warn!("Ignoring {}: {err}", path.display());
            HashMap::new()
        }),
        Err(_) => HashMap::new(),
    }
}

fn parse_key_file(raw: &str) -> std::result::Result<HashMap<String, String>, ini::ParseError> {
    let ini = Ini::load_from_str_noescape(raw)?;
    Ok(ini
        .general_section()
        .iter()
        .filter_map(|(key, value)| {
            let key = key.strip_prefix("export ").unwrap_or(key).trim();
            Some((key.to_string(), non_blank(value)?))
        })
        .collect())
}
