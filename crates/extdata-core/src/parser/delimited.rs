//! Comma- and tab-separated text.

use csv::ReaderBuilder;

use crate::error::ParseError;
use crate::params::Mappings;
use crate::table::{Table, TableBuilder};

use super::Parser;

/// Fields are addressed by header name (when the first row is a header) or
/// by 1-based column number.
#[derive(Debug, Clone, Copy)]
pub struct DelimitedParser {
    pub delimiter: u8,
    pub header: bool,
}

impl Parser for DelimitedParser {
    fn parse(&self, text: &str, rules: &Mappings, initial: &Table) -> Result<Table, ParseError> {
        let mut reader = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.header)
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(text.trim_start_matches('\u{feff}').as_bytes());

        let headers: Vec<String> = if self.header {
            reader
                .headers()
                .map_err(|error| ParseError::InvalidCsv(error.to_string()))?
                .iter()
                .map(str::to_owned)
                .collect()
        } else {
            Vec::new()
        };

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|error| ParseError::InvalidCsv(error.to_string()))?;
            rows.push(record.iter().map(str::to_owned).collect::<Vec<_>>());
        }

        let mut builder = TableBuilder::with_initial(initial);
        for mapping in rules {
            builder.declare(&mapping.column);
            let Some(position) = column_position(&headers, &mapping.external) else {
                continue;
            };
            let values = rows
                .iter()
                .map(|row| row.get(position).cloned().unwrap_or_default());
            builder.append(&mapping.column, values.collect::<Vec<_>>());
        }
        Ok(builder.finish())
    }
}

fn column_position(headers: &[String], field: &str) -> Option<usize> {
    let field = field.trim();
    headers
        .iter()
        .position(|header| header == field)
        .or_else(|| {
            headers
                .iter()
                .position(|header| header.eq_ignore_ascii_case(field))
        })
        .or_else(|| {
            field
                .parse::<usize>()
                .ok()
                .filter(|number| *number > 0)
                .map(|number| number - 1)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv(header: bool) -> DelimitedParser {
        DelimitedParser {
            delimiter: b',',
            header,
        }
    }

    #[test]
    fn header_names_select_columns() {
        let text = "Name, Year\nAda,1815\nGrace,1906\n";
        let table = csv(true)
            .parse(text, &Mappings::parse("who=name, when=Year"), &Table::new())
            .expect("parse");
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.value("who", 1), Some("Grace"));
        assert_eq!(table.value("when", 0), Some("1815"));
    }

    #[test]
    fn numeric_fields_select_by_position() {
        let text = "a\tb\tc\nx\ty\tz\n";
        let parser = DelimitedParser {
            delimiter: b'\t',
            header: false,
        };
        let table = parser
            .parse(text, &Mappings::parse("third=3"), &Table::new())
            .expect("parse");
        assert_eq!(
            table.column("third"),
            Some(&["c".to_string(), "z".to_string()][..])
        );
    }

    #[test]
    fn short_rows_and_unknown_columns_are_padded() {
        let text = "k,v\n1,one\n2\n";
        let table = csv(true)
            .parse(text, &Mappings::parse("k, v, missing"), &Table::new())
            .expect("parse");
        assert_eq!(table.value("v", 1), Some(""));
        assert_eq!(table.column("missing").map(<[String]>::len), Some(2));
    }

    #[test]
    fn quoted_fields_keep_embedded_delimiters() {
        let table = csv(false)
            .parse("\"a,b\"\n", &Mappings::parse("first=1"), &Table::new())
            .expect("parse");
        assert_eq!(table.value("first", 0), Some("a,b"));
    }
}
