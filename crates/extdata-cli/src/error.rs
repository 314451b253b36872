use extdata_core::{CacheError, ConfigError, ErrorList};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("invalid parameters: {}", render_list(.0))]
    Params(ErrorList),

    #[error("invalid log level: {0}")]
    LogLevel(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("strict mode failed: warnings={warning_count}")]
    StrictModeViolation { warning_count: usize },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) | Self::Params(_) | Self::LogLevel(_) => 2,
            Self::Serialization(_) => 4,
            Self::StrictModeViolation { .. } => 5,
            Self::Cache(_) => 6,
            Self::Io(_) => 10,
        }
    }
}

fn render_list(errors: &ErrorList) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
