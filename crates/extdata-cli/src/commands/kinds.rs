use extdata_core::{SourceKind, Table};
use serde::Serialize;

use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct KindInfo {
    kind: SourceKind,
    entry_point: &'static str,
}

pub fn run() -> Result<CommandResult, CliError> {
    let kinds = SourceKind::ALL
        .into_iter()
        .map(|kind| KindInfo {
            kind,
            entry_point: kind.entry_point(),
        })
        .collect::<Vec<_>>();

    let table = Table::from_columns([
        (
            "kind",
            kinds.iter().map(|info| info.kind.to_string()).collect(),
        ),
        (
            "entry_point",
            kinds.iter().map(|info| info.entry_point.to_owned()).collect(),
        ),
    ]);

    Ok(CommandResult {
        table,
        ..CommandResult::ok("kinds", serde_json::to_value(kinds)?)
    })
}
