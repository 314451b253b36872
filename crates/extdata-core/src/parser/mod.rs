//! Payload decoders.
//!
//! Every parser is a pure function of `(payload, rules, initial values)`.
//! Rules map an external field name to a local column; what a field name
//! means (XPath, JSON path, header, capture group) depends on the format.
//! On structurally invalid input a parser fails with a [`ParseError`] and
//! never returns a partial table.

mod delimited;
mod json;
mod key_value;
mod pattern;
mod xml;

use std::fmt::{Display, Formatter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorList, ParseError};
use crate::params::{Mappings, ParamSet};
use crate::table::{Table, TableBuilder};

pub use delimited::DelimitedParser;
pub use json::JsonParser;
pub use key_value::KeyValueParser;
pub use pattern::RegexParser;
pub use xml::XmlParser;

/// Decoder contract shared by all formats.
pub trait Parser: Send + Sync {
    fn parse(&self, text: &str, rules: &Mappings, initial: &Table) -> Result<Table, ParseError>;
}

/// Declared or inferred payload format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum Format {
    Xml,
    Json,
    Delimited { delimiter: u8, header: bool },
    KeyValue,
    Regex { pattern: String },
    Text,
}

impl Format {
    /// Parse a format name. `regex` takes its pattern from `pattern`.
    pub fn from_name(name: &str, pattern: Option<&str>) -> Result<Self, ParseError> {
        let name = name.trim().to_ascii_lowercase();
        let format = match name.as_str() {
            "xml" => Self::Xml,
            "json" => Self::Json,
            "csv" => Self::Delimited {
                delimiter: b',',
                header: false,
            },
            "csv with header" => Self::Delimited {
                delimiter: b',',
                header: true,
            },
            "tsv" => Self::Delimited {
                delimiter: b'\t',
                header: false,
            },
            "tsv with header" => Self::Delimited {
                delimiter: b'\t',
                header: true,
            },
            "ini" | "key value" | "keyvalue" | "properties" => Self::KeyValue,
            "regex" => match pattern {
                Some(pattern) => Self::Regex {
                    pattern: pattern.to_owned(),
                },
                None => return Err(ParseError::UnknownFormat("regex without pattern".into())),
            },
            "text" | "plain" => Self::Text,
            _ => return Err(ParseError::UnknownFormat(name)),
        };
        Ok(format)
    }

    /// Read `format` (and `regex`) from the parameter set. `None` when the
    /// caller did not declare one.
    pub fn from_params(params: &ParamSet, errors: &mut ErrorList) -> Option<Self> {
        let name = params.text("format")?;
        match Self::from_name(name, params.text("regex")) {
            Ok(format) => Some(format),
            Err(error) => {
                errors.push(error.to_record());
                None
            }
        }
    }

    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if mime.contains("json") {
            Some(Self::Json)
        } else if mime.contains("xml") {
            Some(Self::Xml)
        } else if mime == "text/csv" {
            Some(Self::Delimited {
                delimiter: b',',
                header: true,
            })
        } else if mime == "text/tab-separated-values" {
            Some(Self::Delimited {
                delimiter: b'\t',
                header: true,
            })
        } else {
            None
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "xml" | "rss" | "atom" => Some(Self::Xml),
            "json" => Some(Self::Json),
            "csv" => Some(Self::Delimited {
                delimiter: b',',
                header: true,
            }),
            "tsv" | "tab" => Some(Self::Delimited {
                delimiter: b'\t',
                header: true,
            }),
            "ini" | "conf" | "cfg" | "properties" => Some(Self::KeyValue),
            "txt" => Some(Self::Text),
            _ => None,
        }
    }

    /// Guess from the payload itself.
    pub fn sniff(text: &str) -> Self {
        let trimmed = text.trim_start_matches('\u{feff}').trim_start();
        if trimmed.starts_with('<') {
            Self::Xml
        } else if trimmed.starts_with('{') || trimmed.starts_with('[') {
            Self::Json
        } else {
            Self::Text
        }
    }

    /// Declared format, else content type, else payload sniffing.
    pub fn resolve(declared: Option<&Self>, content_type: Option<&str>, text: &str) -> Self {
        declared
            .cloned()
            .or_else(|| content_type.and_then(Self::from_content_type))
            .unwrap_or_else(|| Self::sniff(text))
    }

    pub fn parser(&self) -> Result<Box<dyn Parser>, ParseError> {
        let parser: Box<dyn Parser> = match self {
            Self::Xml => Box::new(XmlParser),
            Self::Json => Box::new(JsonParser),
            Self::Delimited { delimiter, header } => Box::new(DelimitedParser {
                delimiter: *delimiter,
                header: *header,
            }),
            Self::KeyValue => Box::new(KeyValueParser),
            Self::Regex { pattern } => Box::new(RegexParser::new(pattern)?),
            Self::Text => Box::new(TextParser),
        };
        Ok(parser)
    }

    /// Stable name used in cache fingerprints.
    pub fn identity(&self) -> String {
        match self {
            Self::Xml => "xml".into(),
            Self::Json => "json".into(),
            Self::Delimited { delimiter, header } => {
                format!("delimited:{}:{header}", char::from(*delimiter))
            }
            Self::KeyValue => "key_value".into(),
            Self::Regex { pattern } => format!("regex:{pattern}"),
            Self::Text => "text".into(),
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.identity())
    }
}

/// Decode `text` with `format`, converting a decode failure into a record.
pub fn decode(
    format: &Format,
    text: &str,
    rules: &Mappings,
    initial: &Table,
) -> Result<Table, ErrorList> {
    format
        .parser()
        .and_then(|parser| parser.parse(text, rules, initial))
        .map_err(|error| ErrorList::single(error.to_record()))
}

/// Whole payload as one value; every mapped column receives it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextParser;

impl Parser for TextParser {
    fn parse(&self, text: &str, rules: &Mappings, initial: &Table) -> Result<Table, ParseError> {
        let mut builder = TableBuilder::with_initial(initial);
        for mapping in rules {
            builder.push(&mapping.column, text);
        }
        Ok(builder.finish())
    }
}
