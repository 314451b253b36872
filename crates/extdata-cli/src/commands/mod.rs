mod cache;
mod fetch;
mod kinds;

use std::time::Instant;

use extdata_core::{ErrorList, ExternalData, Settings, Table};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::cli::{Cli, Command};
use crate::error::CliError;

/// What a command produced, before rendering.
#[derive(Debug, Serialize)]
pub struct CommandResult {
    pub command: &'static str,
    pub data: Value,
    /// Tabular form of `data`, used by the table renderer.
    #[serde(skip)]
    pub table: Option<Table>,
    pub errors: ErrorList,
    pub warnings: ErrorList,
    pub cache_hit: bool,
    pub stale: bool,
    pub latency_ms: u64,
}

impl CommandResult {
    pub fn ok(command: &'static str, data: Value) -> Self {
        Self {
            command,
            data,
            table: None,
            errors: ErrorList::new(),
            warnings: ErrorList::new(),
            cache_hit: false,
            stale: false,
            latency_ms: 0,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }
}

pub async fn run(cli: &Cli) -> Result<CommandResult, CliError> {
    let started = Instant::now();
    let result = match &cli.command {
        Command::Fetch(args) => fetch::run(args, &open(cli)?).await?,
        Command::Cache(args) => cache::run(args, &open(cli)?).await?,
        Command::Kinds => kinds::run()?,
    };
    let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    Ok(result.with_latency(elapsed))
}

fn open(cli: &Cli) -> Result<ExternalData, CliError> {
    let settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::from_env()?,
    };
    debug!(
        databases = settings.databases.len(),
        programs = settings.programs.len(),
        persistent_cache = settings.cache.store_path.is_some(),
        "settings loaded"
    );
    Ok(ExternalData::from_settings(settings)?)
}
