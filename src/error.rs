use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// The prompt file could not be read.
    Source { path: String, details: String },
    /// Client settings are missing or invalid.
    Config(String),
    /// The completion backend rejected or failed a request.
    Completion { provider: String, details: String },
    /// The requested output format is not one we can write.
    UnknownFormat(String),
    /// Writing the output destination failed.
    Write { path: String, details: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Source { path, details } => {
                write!(f, "Failed to read prompts from {path}: {details}")
            }
            Error::Config(msg) => write!(f, "Configuration error: {msg}"),
            Error::Completion { provider, details } => {
                write!(f, "Completion error ({provider}): {details}")
            }
            Error::UnknownFormat(value) => write!(
                f,
                "Unknown output format: {value} (expected docx, txt, md or stdout)"
            ),
            Error::Write { path, details } => write!(f, "Failed to write {path}: {details}"),
        }
    }
}

impl std::error::Error for Error {}
