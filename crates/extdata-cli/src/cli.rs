//! CLI argument definitions for extdata.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fetch` | Retrieve data from one source and print the resulting table |
//! | `cache` | Purge expired entries or clear the cache |
//! | `kinds` | List source kinds and their entry points |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--config` | `$EXTDATA_CONFIG` | Settings file (JSON) |
//! | `--format` | `json` | Output format (json, table) |
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--strict` | `false` | Treat warnings as failures |
//! | `--log-level` | `warn` | Tracing filter directive |
//!
//! # Examples
//!
//! ```bash
//! # Scrape a value from a page
//! extdata fetch --kind web url=https://example.org "data=title=//title"
//!
//! # Kind inferred from the parameters, table output
//! extdata --format table fetch db=sales from=orders "data=id, total"
//!
//! # Drop expired cache entries
//! extdata cache purge
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use extdata_core::SourceKind;

/// Retrieve data from web pages, SOAP services, files, directories,
/// databases and programs, reshaped into named columns.
#[derive(Debug, Parser)]
#[command(name = "extdata", author, version, about)]
pub struct Cli {
    /// Settings file; falls back to the EXTDATA_CONFIG environment variable.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format for results.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub format: OutputFormat,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Exit with code 5 when the result carries warnings.
    #[arg(long, global = true, default_value_t = false)]
    pub strict: bool,

    /// Log filter, e.g. `info` or `extdata_core=debug`. Logs go to stderr.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Retrieve data from one source.
    Fetch(FetchArgs),
    /// Manage the result cache.
    Cache(CacheArgs),
    /// List source kinds.
    Kinds,
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Source kind; inferred from the parameters when omitted.
    #[arg(long, value_enum)]
    pub kind: Option<KindArg>,

    /// Request parameters as `key=value`. Mapping rules go in `data`.
    #[arg(value_name = "KEY=VALUE", required = true)]
    pub params: Vec<String>,
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Clone, Copy, Subcommand)]
pub enum CacheCommand {
    /// Remove entries past their TTL.
    Purge,
    /// Remove every entry.
    Clear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Web,
    File,
    Soap,
    Ldap,
    Db,
    Program,
}

impl From<KindArg> for SourceKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Web => Self::Web,
            KindArg::File => Self::File,
            KindArg::Soap => Self::Soap,
            KindArg::Ldap => Self::Ldap,
            KindArg::Db => Self::Db,
            KindArg::Program => Self::Program,
        }
    }
}
