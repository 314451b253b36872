use std::io::{self, Write};

use extdata_core::Table;

use crate::cli::OutputFormat;
use crate::commands::CommandResult;
use crate::error::CliError;

pub fn render(result: &CommandResult, format: OutputFormat, pretty: bool) -> Result<(), CliError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match format {
        OutputFormat::Json => {
            let payload = if pretty {
                serde_json::to_string_pretty(result)?
            } else {
                serde_json::to_string(result)?
            };
            writeln!(out, "{payload}")?;
        }
        OutputFormat::Table => render_table(&mut out, result)?,
    }
    Ok(())
}

fn render_table(out: &mut impl Write, result: &CommandResult) -> Result<(), CliError> {
    writeln!(out, "command   : {}", result.command)?;
    writeln!(out, "latency_ms: {}", result.latency_ms)?;
    writeln!(out, "cache_hit : {}", result.cache_hit)?;
    if result.stale {
        writeln!(out, "stale     : true")?;
    }

    match &result.table {
        Some(table) => write_grid(out, table)?,
        None => {
            writeln!(out, "data:")?;
            for line in serde_json::to_string_pretty(&result.data)?.lines() {
                writeln!(out, "  {line}")?;
            }
        }
    }

    if !result.warnings.is_empty() {
        writeln!(out, "warnings:")?;
        for warning in &result.warnings {
            writeln!(out, "  - {warning}")?;
        }
    }
    if !result.errors.is_empty() {
        writeln!(out, "errors:")?;
        for error in &result.errors {
            writeln!(out, "  - {error}")?;
        }
    }
    Ok(())
}

/// Left-aligned columns separated by two spaces, header first.
fn write_grid(out: &mut impl Write, table: &Table) -> io::Result<()> {
    let columns: Vec<(&str, &[String])> = table.columns().collect();
    let widths: Vec<usize> = columns
        .iter()
        .map(|(name, values)| {
            values
                .iter()
                .map(|value| value.chars().count())
                .chain([name.chars().count()])
                .max()
                .unwrap_or(0)
        })
        .collect();

    let header = columns
        .iter()
        .zip(&widths)
        .map(|((name, _), &width)| format!("{name:<width$}"))
        .collect::<Vec<_>>();
    writeln!(out, "{}", header.join("  ").trim_end())?;

    for row in 0..table.row_count() {
        let cells = columns
            .iter()
            .zip(&widths)
            .map(|((_, values), &width)| format!("{:<width$}", values[row]))
            .collect::<Vec<_>>();
        writeln!(out, "{}", cells.join("  ").trim_end())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_aligns_columns() {
        let table = Table::from_columns([
            ("id", vec!["1".to_string(), "22".to_string()]),
            ("name", vec!["bolt".to_string(), "washer".to_string()]),
        ])
        .expect("equal lengths");
        let mut out = Vec::new();
        write_grid(&mut out, &table).expect("write");

        let text = String::from_utf8(out).expect("utf8");
        assert_eq!(text, "id  name\n1   bolt\n22  washer\n");
    }
}
