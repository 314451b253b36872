//! Structured, accumulating failure records.
//!
//! Nothing in the connector/parser pipeline panics or bubbles raw errors to
//! the caller. Every failure ends up as an [`ErrorRecord`]: a symbolic code
//! plus ordered substitution parameters that a front end renders into
//! localized text. Independent failures accumulate in one [`ErrorList`].

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Symbolic error codes emitted by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Parameter validation.
    NoParamSpecified,
    InvalidParam,
    UnknownSource,
    DbIncompleteInformation,
    DbUnknownType,
    DbNoSuchPrepared,
    DbPreparedNotSpecified,
    DbNoSuchDatabase,
    DbParamCountMismatch,
    NoSuchProgram,
    NoSuchDirectory,
    NoSuchFile,
    NoSuchLdapServer,
    PathNotAllowed,
    HostNotAllowed,
    // Connection.
    DbCouldNotConnect,
    LdapCouldNotConnect,
    ProgramCouldNotStart,
    // Execution.
    DbInvalidQuery,
    DbExecutionFailed,
    DbNoRows,
    LdapSearchFailed,
    ProgramFailed,
    ProgramTimedOut,
    // Transport.
    UrlNotFetched,
    UrlFetchFailed,
    HttpStatus,
    FileNotReadable,
    // Decode.
    InvalidXml,
    InvalidXpath,
    InvalidJson,
    InvalidJsonPath,
    InvalidCsv,
    InvalidRegex,
    UnknownFormat,
    // Cache and teardown (absorbed, surfaced as warnings).
    CacheUnavailable,
    StaleCacheUsed,
    DisconnectFailed,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoParamSpecified => "param.missing",
            Self::InvalidParam => "param.invalid",
            Self::UnknownSource => "param.unknown_source",
            Self::DbIncompleteInformation => "db.incomplete_information",
            Self::DbUnknownType => "db.unknown_type",
            Self::DbNoSuchPrepared => "db.no_such_prepared",
            Self::DbPreparedNotSpecified => "db.prepared_not_specified",
            Self::DbNoSuchDatabase => "db.no_such_database",
            Self::DbParamCountMismatch => "db.param_count_mismatch",
            Self::NoSuchProgram => "program.no_such_program",
            Self::NoSuchDirectory => "file.no_such_directory",
            Self::NoSuchFile => "file.no_such_file",
            Self::NoSuchLdapServer => "ldap.no_such_server",
            Self::PathNotAllowed => "file.path_not_allowed",
            Self::HostNotAllowed => "url.host_not_allowed",
            Self::DbCouldNotConnect => "db.could_not_connect",
            Self::LdapCouldNotConnect => "ldap.could_not_connect",
            Self::ProgramCouldNotStart => "program.could_not_start",
            Self::DbInvalidQuery => "db.invalid_query",
            Self::DbExecutionFailed => "db.execution_failed",
            Self::DbNoRows => "db.no_rows",
            Self::LdapSearchFailed => "ldap.search_failed",
            Self::ProgramFailed => "program.failed",
            Self::ProgramTimedOut => "program.timed_out",
            Self::UrlNotFetched => "url.not_fetched",
            Self::UrlFetchFailed => "url.fetch_failed",
            Self::HttpStatus => "url.http_status",
            Self::FileNotReadable => "file.not_readable",
            Self::InvalidXml => "decode.invalid_xml",
            Self::InvalidXpath => "decode.invalid_xpath",
            Self::InvalidJson => "decode.invalid_json",
            Self::InvalidJsonPath => "decode.invalid_json_path",
            Self::InvalidCsv => "decode.invalid_csv",
            Self::InvalidRegex => "decode.invalid_regex",
            Self::UnknownFormat => "decode.unknown_format",
            Self::CacheUnavailable => "cache.unavailable",
            Self::StaleCacheUsed => "cache.stale_used",
            Self::DisconnectFailed => "connector.disconnect_failed",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failure: symbolic code plus substitution parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub code: String,
    #[serde(default)]
    pub params: Vec<String>,
}

impl ErrorRecord {
    pub fn new<I, S>(code: ErrorCode, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            code: code.as_str().to_owned(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn bare(code: ErrorCode) -> Self {
        Self {
            code: code.as_str().to_owned(),
            params: Vec::new(),
        }
    }

    /// A record whose code came from somewhere else (e.g. a transport that
    /// already speaks symbolic codes).
    pub fn passthrough<I, S>(code: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            code: code.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is(&self, code: ErrorCode) -> bool {
        self.code == code.as_str()
    }
}

impl Display for ErrorRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.params.is_empty() {
            f.write_str(&self.code)
        } else {
            write!(f, "{} [{}]", self.code, self.params.join(", "))
        }
    }
}

/// Ordered accumulator of failures. Never truncated; any entry marks the
/// operation as failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorList(Vec<ErrorRecord>);

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(record: ErrorRecord) -> Self {
        Self(vec![record])
    }

    pub fn push(&mut self, record: ErrorRecord) {
        self.0.push(record);
    }

    /// Shorthand for `push(ErrorRecord::new(code, params))`.
    pub fn add<I, S>(&mut self, code: ErrorCode, params: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.push(ErrorRecord::new(code, params));
    }

    pub fn merge(&mut self, other: ErrorList) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ErrorRecord> {
        self.0.iter()
    }

    pub fn contains(&self, code: ErrorCode) -> bool {
        self.0.iter().any(|record| record.is(code))
    }

    pub fn count(&self, code: ErrorCode) -> usize {
        self.0.iter().filter(|record| record.is(code)).count()
    }

    /// `Ok(value)` when empty, otherwise `Err(self)`.
    pub fn into_result<T>(self, value: T) -> Result<T, ErrorList> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }

    pub fn into_vec(self) -> Vec<ErrorRecord> {
        self.0
    }
}

impl From<ErrorRecord> for ErrorList {
    fn from(record: ErrorRecord) -> Self {
        Self::single(record)
    }
}

impl Extend<ErrorRecord> for ErrorList {
    fn extend<T: IntoIterator<Item = ErrorRecord>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl IntoIterator for ErrorList {
    type Item = ErrorRecord;
    type IntoIter = std::vec::IntoIter<ErrorRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ErrorList {
    type Item = &'a ErrorRecord;
    type IntoIter = std::slice::Iter<'a, ErrorRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Decode failure raised by a parser. Carries the underlying cause.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid XML: {0}")]
    InvalidXml(String),
    #[error("invalid XPath '{path}': {cause}")]
    InvalidXpath { path: String, cause: String },
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    #[error("invalid JSON path '{path}': {cause}")]
    InvalidJsonPath { path: String, cause: String },
    #[error("invalid delimited text: {0}")]
    InvalidCsv(String),
    #[error("invalid pattern '{pattern}': {cause}")]
    InvalidRegex { pattern: String, cause: String },
    #[error("unknown format '{0}'")]
    UnknownFormat(String),
}

impl ParseError {
    pub fn to_record(&self) -> ErrorRecord {
        match self {
            Self::InvalidXml(cause) => ErrorRecord::new(ErrorCode::InvalidXml, [cause.as_str()]),
            Self::InvalidXpath { path, cause } => {
                ErrorRecord::new(ErrorCode::InvalidXpath, [path.as_str(), cause.as_str()])
            }
            Self::InvalidJson(cause) => ErrorRecord::new(ErrorCode::InvalidJson, [cause.as_str()]),
            Self::InvalidJsonPath { path, cause } => {
                ErrorRecord::new(ErrorCode::InvalidJsonPath, [path.as_str(), cause.as_str()])
            }
            Self::InvalidCsv(cause) => ErrorRecord::new(ErrorCode::InvalidCsv, [cause.as_str()]),
            Self::InvalidRegex { pattern, cause } => {
                ErrorRecord::new(ErrorCode::InvalidRegex, [pattern.as_str(), cause.as_str()])
            }
            Self::UnknownFormat(format) => {
                ErrorRecord::new(ErrorCode::UnknownFormat, [format.as_str()])
            }
        }
    }
}

impl From<ParseError> for ErrorRecord {
    fn from(error: ParseError) -> Self {
        error.to_record()
    }
}

/// Failure while loading host settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}
