//! Field-level normalisation of records returned by row-producing sources
//! (databases, directories) and their projection into a [`Table`].

use std::collections::BTreeMap;

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::params::Mappings;
use crate::table::{Table, TableBuilder};

const TEMPORAL_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// One field as delivered by a source driver, before normalisation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    /// Raw bytes of unknown encoding.
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
    Bool(bool),
    Timestamp(PrimitiveDateTime),
    TimestampTz(OffsetDateTime),
    Date(Date),
}

impl FieldValue {
    /// Canonical text form that enters a [`Table`].
    pub fn normalize(&self) -> String {
        match self {
            Self::Null => String::new(),
            Self::Text(text) => text.clone(),
            Self::Bytes(bytes) => canonical_text(bytes),
            Self::Int(value) => value.to_string(),
            Self::Float(value) => value.to_string(),
            Self::Bool(value) => if *value { "1" } else { "0" }.to_owned(),
            Self::Timestamp(value) => format_temporal(*value),
            Self::TimestampTz(value) => {
                let utc = value.to_offset(UtcOffset::UTC);
                format_temporal(PrimitiveDateTime::new(utc.date(), utc.time()))
            }
            Self::Date(value) => format_temporal(PrimitiveDateTime::new(*value, Time::MIDNIGHT)),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Column name → field value for one fetched row.
pub type Record = BTreeMap<String, FieldValue>;

/// Decode bytes as UTF-8, falling back to ISO-8859-1 for anything that is
/// not valid UTF-8.
pub fn canonical_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => bytes.iter().map(|&byte| char::from(byte)).collect(),
    }
}

/// `YYYY-MM-DD HH:MM:SS`.
pub fn format_temporal(value: PrimitiveDateTime) -> String {
    value
        .format(TEMPORAL_FORMAT)
        .unwrap_or_else(|_| value.to_string())
}

/// Project records onto the mapped columns. A field missing from a record
/// yields an empty value; names are matched exactly first, then
/// case-insensitively.
pub fn process_rows(records: &[Record], mappings: &Mappings) -> Table {
    let mut builder = TableBuilder::new();
    for mapping in mappings {
        builder.declare(&mapping.column);
        let values = records
            .iter()
            .map(|record| {
                lookup_field(record, &mapping.external)
                    .map(FieldValue::normalize)
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>();
        builder.append(&mapping.column, values);
    }
    builder.finish()
}

fn lookup_field<'a>(record: &'a Record, name: &str) -> Option<&'a FieldValue> {
    record.get(name).or_else(|| {
        record
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    })
}
