//! JSON payloads addressed with a small path language.
//!
//! Supported forms: `$.a.b`, `$.list[0]`, `$.list[*].name`, `$['odd key']`,
//! `$..name` (recursive), and a bare `name`, which is searched recursively.

use serde_json::Value;

use crate::error::ParseError;
use crate::params::Mappings;
use crate::table::{Table, TableBuilder};

use super::Parser;

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonParser;

impl Parser for JsonParser {
    fn parse(&self, text: &str, rules: &Mappings, initial: &Table) -> Result<Table, ParseError> {
        let document: Value = serde_json::from_str(text.trim_start_matches('\u{feff}'))
            .map_err(|error| ParseError::InvalidJson(error.to_string()))?;

        let mut builder = TableBuilder::with_initial(initial);
        for mapping in rules {
            let steps = compile(&mapping.external)?;
            let values = select(&document, &steps)
                .into_iter()
                .flat_map(flatten)
                .collect::<Vec<_>>();
            builder.declare(&mapping.column);
            builder.append(&mapping.column, values);
        }
        Ok(builder.finish())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    Child(String),
    Descend(String),
    Index(usize),
    Wildcard,
}

fn compile(path: &str) -> Result<Vec<Step>, ParseError> {
    let invalid = |cause: &str| ParseError::InvalidJsonPath {
        path: path.to_owned(),
        cause: cause.to_owned(),
    };

    let path = path.trim();
    let Some(rest) = path.strip_prefix('$') else {
        if path.is_empty() {
            return Err(invalid("empty path"));
        }
        if path.contains(['.', '[']) {
            return compile(&format!("$.{path}"));
        }
        return Ok(vec![Step::Descend(path.to_owned())]);
    };

    let chars: Vec<char> = rest.chars().collect();
    let mut steps = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        match chars[index] {
            '.' => {
                let descend = chars.get(index + 1) == Some(&'.');
                index += if descend { 2 } else { 1 };
                let start = index;
                while index < chars.len() && chars[index] != '.' && chars[index] != '[' {
                    index += 1;
                }
                let name: String = chars[start..index].iter().collect();
                match (descend, name.as_str()) {
                    (_, "") => return Err(invalid("missing member name")),
                    (false, "*") => steps.push(Step::Wildcard),
                    (true, "*") => return Err(invalid("recursive wildcard is not supported")),
                    (false, _) => steps.push(Step::Child(name)),
                    (true, _) => steps.push(Step::Descend(name)),
                }
            }
            '[' => {
                let close = chars[index..]
                    .iter()
                    .position(|ch| *ch == ']')
                    .map(|offset| index + offset)
                    .ok_or_else(|| invalid("unclosed bracket"))?;
                let inner: String = chars[index + 1..close].iter().collect();
                let inner = inner.trim();
                let step = if inner == "*" {
                    Step::Wildcard
                } else if let Ok(position) = inner.parse::<usize>() {
                    Step::Index(position)
                } else if inner.len() >= 2
                    && ((inner.starts_with('\'') && inner.ends_with('\''))
                        || (inner.starts_with('"') && inner.ends_with('"')))
                {
                    Step::Child(inner[1..inner.len() - 1].to_owned())
                } else {
                    return Err(invalid("bracket must hold *, an index or a quoted name"));
                };
                steps.push(step);
                index = close + 1;
            }
            _ => return Err(invalid("expected '.' or '['")),
        }
    }

    Ok(steps)
}

fn select<'a>(root: &'a Value, steps: &[Step]) -> Vec<&'a Value> {
    let mut current = vec![root];
    for step in steps {
        let mut next = Vec::new();
        for value in current {
            match step {
                Step::Child(name) => next.extend(value.get(name.as_str())),
                Step::Index(position) => next.extend(value.get(*position)),
                Step::Wildcard => match value {
                    Value::Array(items) => next.extend(items.iter()),
                    Value::Object(members) => next.extend(members.values()),
                    _ => {}
                },
                Step::Descend(name) => descend(value, name, &mut next),
            }
        }
        current = next;
    }
    current
}

fn descend<'a>(value: &'a Value, name: &str, found: &mut Vec<&'a Value>) {
    match value {
        Value::Object(members) => {
            for (key, member) in members {
                if key == name {
                    found.push(member);
                }
                descend(member, name, found);
            }
        }
        Value::Array(items) => {
            for item in items {
                descend(item, name, found);
            }
        }
        _ => {}
    }
}

/// Scalars become one value; arrays contribute their elements; objects are
/// kept as compact JSON text.
fn flatten(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().map(scalar_text).collect(),
        other => vec![scalar_text(other)],
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "meta": {"title": "Catalog", "count": 3},
        "items": [
            {"name": "bolt", "price": 0.25, "tags": ["m4", "steel"]},
            {"name": "nut", "price": 0.1},
            {"name": "washer", "odd key": true}
        ]
    }"#;

    fn parse(rules: &str) -> Table {
        JsonParser
            .parse(DOC, &Mappings::parse(rules), &Table::new())
            .expect("parse")
    }

    #[test]
    fn dotted_and_wildcard_paths() {
        let table = parse("title=$.meta.title, name=$.items[*].name");
        assert_eq!(table.value("title", 0), Some("Catalog"));
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.value("name", 2), Some("washer"));
        assert_eq!(table.value("title", 1), Some(""));
    }

    #[test]
    fn bare_name_is_searched_recursively() {
        let table = parse("price");
        assert_eq!(
            table.column("price"),
            Some(&["0.25".to_string(), "0.1".to_string()][..])
        );
    }

    #[test]
    fn index_and_quoted_member() {
        let table = parse("second=$.items[1].name, odd=$.items[2]['odd key']");
        assert_eq!(table.value("second", 0), Some("nut"));
        assert_eq!(table.value("odd", 0), Some("true"));
    }

    #[test]
    fn arrays_are_flattened() {
        let table = parse("tag=$..tags");
        assert_eq!(
            table.column("tag"),
            Some(&["m4".to_string(), "steel".to_string()][..])
        );
    }

    #[test]
    fn missing_member_gives_empty_column() {
        let table = parse("nothing=$.meta.absent");
        assert_eq!(table.column("nothing"), Some(&[][..]));
    }

    #[test]
    fn invalid_payload_and_path_are_errors() {
        let rules = Mappings::parse("a=$.a");
        assert!(matches!(
            JsonParser.parse("{", &rules, &Table::new()),
            Err(ParseError::InvalidJson(_))
        ));
        assert!(matches!(
            JsonParser.parse("{}", &Mappings::parse("a=$.items[x]"), &Table::new()),
            Err(ParseError::InvalidJsonPath { .. })
        ));
    }
}
