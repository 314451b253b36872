use extdata_core::ExternalData;
use serde_json::json;

use crate::cli::{CacheArgs, CacheCommand};
use crate::error::CliError;

use super::CommandResult;

pub async fn run(args: &CacheArgs, data: &ExternalData) -> Result<CommandResult, CliError> {
    let (action, removed) = match args.command {
        CacheCommand::Purge => ("purge", data.purge_cache().await?),
        CacheCommand::Clear => ("clear", data.clear_cache().await?),
    };
    Ok(CommandResult::ok(
        "cache",
        json!({ "action": action, "removed": removed }),
    ))
}
