//! Free text matched against a regular expression.

use regex::Regex;

use crate::error::ParseError;
use crate::params::Mappings;
use crate::table::{Table, TableBuilder};

use super::Parser;

/// One row per match. Fields name a capture group, by name or by number.
#[derive(Debug, Clone)]
pub struct RegexParser {
    pattern: Regex,
}

impl RegexParser {
    pub fn new(pattern: &str) -> Result<Self, ParseError> {
        let pattern = Regex::new(pattern).map_err(|error| ParseError::InvalidRegex {
            pattern: pattern.to_owned(),
            cause: error.to_string(),
        })?;
        Ok(Self { pattern })
    }
}

impl Parser for RegexParser {
    fn parse(&self, text: &str, rules: &Mappings, initial: &Table) -> Result<Table, ParseError> {
        let matches: Vec<_> = self.pattern.captures_iter(text).collect();

        let mut builder = TableBuilder::with_initial(initial);
        for mapping in rules {
            builder.declare(&mapping.column);
            let group = mapping.external.trim();
            let by_index = group.parse::<usize>().ok();
            let known = match by_index {
                Some(index) => index < self.pattern.captures_len(),
                None => self.pattern.capture_names().flatten().any(|name| name == group),
            };
            if !known {
                continue;
            }

            let values = matches.iter().map(|captures| {
                let found = match by_index {
                    Some(index) => captures.get(index),
                    None => captures.name(group),
                };
                found.map(|m| m.as_str().to_owned()).unwrap_or_default()
            });
            builder.append(&mapping.column, values.collect::<Vec<_>>());
        }
        Ok(builder.finish())
    }
}
