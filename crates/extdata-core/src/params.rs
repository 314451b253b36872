//! Inbound parameter set and field mappings.
//!
//! The front end hands over a loosely-typed bag of parameters. This module
//! normalises keys, resolves legacy aliases once, and offers typed accessors
//! that the per-variant request validators build on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, ErrorList, ErrorRecord};

/// Legacy parameter names and the key they stand for.
const ALIASES: &[(&str, &str)] = &[("server", "db")];

/// One parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl From<BTreeMap<String, String>> for ParamValue {
    fn from(value: BTreeMap<String, String>) -> Self {
        Self::Map(value)
    }
}

/// Normalised parameter bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSet {
    values: BTreeMap<String, ParamValue>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: impl Into<ParamValue>) {
        self.values.insert(normalize_key(key), value.into());
    }

    /// Parse `key=value` arguments. An argument without `=` is an error.
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, ErrorList>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::new();
        let mut errors = ErrorList::new();
        for pair in pairs {
            let pair = pair.as_ref();
            match pair.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => set.insert(key, value.trim()),
                _ => errors.add(ErrorCode::InvalidParam, [pair]),
            }
        }
        errors.into_result(set)
    }

    /// Resolve legacy aliases. The canonical key wins when both are present.
    pub fn normalized(mut self) -> Self {
        for (alias, canonical) in ALIASES {
            if let Some(value) = self.values.remove(*alias) {
                self.values.entry((*canonical).to_owned()).or_insert(value);
            }
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(&normalize_key(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Non-empty text value.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            ParamValue::Text(value) if !value.trim().is_empty() => Some(value.trim()),
            _ => None,
        }
    }

    /// List value; text is split on top-level commas.
    pub fn list(&self, key: &str) -> Option<Vec<String>> {
        match self.get(key)? {
            ParamValue::List(values) => Some(values.clone()),
            ParamValue::Text(value) if value.trim().is_empty() => Some(Vec::new()),
            ParamValue::Text(value) => Some(
                split_top_level(value, ',')
                    .into_iter()
                    .map(|item| item.trim().to_owned())
                    .collect(),
            ),
            ParamValue::Map(_) => None,
        }
    }

    /// Map value; text is parsed as `key=value` pairs separated by commas.
    pub fn map(&self, key: &str) -> Option<BTreeMap<String, String>> {
        match self.get(key)? {
            ParamValue::Map(values) => Some(values.clone()),
            ParamValue::Text(value) => Some(
                parse_pairs(value)
                    .into_iter()
                    .map(|(key, value)| (key.to_owned(), value.to_owned()))
                    .collect(),
            ),
            ParamValue::List(_) => None,
        }
    }

    /// Boolean flag: `yes`, `true`, `1`, `on`, or present without value.
    pub fn flag(&self, key: &str) -> bool {
        match self.get(key) {
            Some(ParamValue::Text(value)) => matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "" | "1" | "yes" | "true" | "on"
            ),
            Some(_) => true,
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Required text value; records `param.missing` when absent.
    pub fn require(&self, key: &str, errors: &mut ErrorList) -> Option<String> {
        let value = self.text(key).map(str::to_owned);
        if value.is_none() {
            errors.add(ErrorCode::NoParamSpecified, [key]);
        }
        value
    }
}

/// Keys are case-insensitive and ignore `_`, `-` and spaces, so
/// `requestData`, `request data` and `request_data` are one key.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|ch| !(*ch == '_' || *ch == '-' || ch.is_whitespace()))
        .flat_map(char::to_lowercase)
        .collect()
}

/// One external field → local column pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mapping {
    pub external: String,
    pub column: String,
}

/// Ordered, de-duplicated extraction rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mappings(Vec<Mapping>);

impl Mappings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule unless an identical one exists already.
    pub fn add(&mut self, external: impl Into<String>, column: impl Into<String>) {
        let mapping = Mapping {
            external: external.into(),
            column: column.into(),
        };
        if !self.0.contains(&mapping) {
            self.0.push(mapping);
        }
    }

    /// Parse `column=external, column2=external2`; a bare name maps to itself.
    pub fn parse(rules: &str) -> Self {
        let mut mappings = Self::new();
        for item in split_top_level(rules, ',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            match item.split_once('=') {
                Some((column, external)) => mappings.add(external.trim(), column.trim()),
                None => mappings.add(item, item),
            }
        }
        mappings
    }

    /// Read the `data` parameter. Records `param.missing` when it is absent or empty.
    pub fn from_params(params: &ParamSet, errors: &mut ErrorList) -> Self {
        let mappings = match params.get("data") {
            Some(ParamValue::Text(rules)) => Self::parse(rules),
            Some(ParamValue::Map(map)) => {
                let mut mappings = Self::new();
                for (column, external) in map {
                    mappings.add(external.as_str(), column.as_str());
                }
                mappings
            }
            Some(ParamValue::List(items)) => Self::parse(&items.join(",")),
            None => Self::new(),
        };
        if mappings.is_empty() {
            errors.push(ErrorRecord::new(ErrorCode::NoParamSpecified, ["data"]));
        }
        mappings
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Mapping> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Distinct external names in rule order.
    pub fn externals(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for mapping in &self.0 {
            if !seen.contains(&mapping.external.as_str()) {
                seen.push(mapping.external.as_str());
            }
        }
        seen
    }
}

impl<'a> IntoIterator for &'a Mappings {
    type Item = &'a Mapping;
    type IntoIter = std::slice::Iter<'a, Mapping>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Parse `a=b, c=d` (split on the first `=` of each item).
fn parse_pairs(text: &str) -> Vec<(&str, &str)> {
    split_top_level(text, ',')
        .into_iter()
        .filter_map(|item| item.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Split on `separator` outside quotes, brackets and parentheses, so that
/// path expressions such as `//a[@k='x,y']` stay intact.
pub(crate) fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (index, ch) in text.char_indices() {
        match (quote, ch) {
            (Some(open), _) if ch == open => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, '[' | '(' | '{') => depth += 1,
            (None, ']' | ')' | '}') => depth -= 1,
            (None, _) if ch == separator && depth <= 0 => {
                parts.push(&text[start..index]);
                start = index + ch.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}
