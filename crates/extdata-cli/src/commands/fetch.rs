use extdata_core::{ExternalData, ParamSet};
use serde_json::json;

use crate::cli::FetchArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(args: &FetchArgs, data: &ExternalData) -> Result<CommandResult, CliError> {
    let params = ParamSet::from_pairs(&args.params).map_err(CliError::Params)?;
    let ctx = data.context();

    let outcome = match args.kind {
        Some(kind) => data.fetch(kind.into(), params, &ctx).await,
        None => data.get_external_data(params, &ctx).await,
    };

    let payload = json!({
        "kind": outcome.kind,
        "values": outcome.values,
        "rows": outcome.rows,
    });
    Ok(CommandResult {
        table: outcome.values.clone(),
        errors: outcome.errors,
        warnings: outcome.warnings,
        cache_hit: outcome.cache_hit,
        stale: outcome.stale,
        ..CommandResult::ok("fetch", payload)
    })
}
