//! INI-style `key = value` text.

use crate::error::ParseError;
use crate::params::Mappings;
use crate::table::{Table, TableBuilder};

use super::Parser;

/// `key = value` or `key: value` lines. `#` and `;` start comments and a
/// `[section]` line prefixes the following keys with `section.`. A field
/// matches either the qualified or the bare key; repeated keys produce
/// several rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyValueParser;

impl Parser for KeyValueParser {
    fn parse(&self, text: &str, rules: &Mappings, initial: &Table) -> Result<Table, ParseError> {
        let pairs = pairs(text);

        let mut builder = TableBuilder::with_initial(initial);
        for mapping in rules {
            builder.declare(&mapping.column);
            let wanted = mapping.external.trim();
            let values = pairs
                .iter()
                .filter(|pair| pair.qualified == wanted || pair.key == wanted)
                .map(|pair| pair.value.clone())
                .collect::<Vec<_>>();
            builder.append(&mapping.column, values);
        }
        Ok(builder.finish())
    }
}

struct Pair {
    qualified: String,
    key: String,
    value: String,
}

fn pairs(text: &str) -> Vec<Pair> {
    let mut section: Option<String> = None;
    let mut pairs = Vec::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            section = Some(name.trim().to_owned()).filter(|name| !name.is_empty());
            continue;
        }

        let Some(split) = line.find(['=', ':']) else {
            continue;
        };
        let key = line[..split].trim();
        if key.is_empty() {
            continue;
        }
        let value = unquote(line[split + 1..].trim());

        pairs.push(Pair {
            qualified: match &section {
                Some(section) => format!("{section}.{key}"),
                None => key.to_owned(),
            },
            key: key.to_owned(),
            value: value.to_owned(),
        });
    }
    pairs
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEXT: &str = "\
# service description
name = gateway
port: 8080

[owner]
name = \"Platform team\"
; ignored
email=platform@example.org
";

    #[test]
    fn bare_and_qualified_keys() {
        let table = KeyValueParser
            .parse(
                TEXT,
                &Mappings::parse("port, owner=owner.name, mail=email"),
                &Table::new(),
            )
            .expect("parse");
        assert_eq!(table.value("port", 0), Some("8080"));
        assert_eq!(table.value("owner", 0), Some("Platform team"));
        assert_eq!(table.value("mail", 0), Some("platform@example.org"));
    }

    #[test]
    fn repeated_bare_key_gives_several_rows() {
        let table = KeyValueParser
            .parse(TEXT, &Mappings::parse("name"), &Table::new())
            .expect("parse");
        assert_eq!(
            table.column("name"),
            Some(&["gateway".to_string(), "Platform team".to_string()][..])
        );
    }
}
