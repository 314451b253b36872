//! # extdata Core
//!
//! Retrieve data from external sources and reshape it into named columns.
//!
//! ## Overview
//!
//! Every request names a source kind, a set of parameters and mapping
//! rules (`column=external`). The crate provides:
//!
//! - **Connectors** for web pages, SOAP services, local files, LDAP
//!   directories, PostgreSQL and DuckDB databases, and external programs
//! - **Parsers** for XML (XPath), JSON (path expressions), CSV/TSV,
//!   INI-style key/value text, regular expressions and plain text
//! - **Tables** of equal-length string columns with a row view
//! - **A fingerprinted TTL cache**, in memory or durable, with an opt-in
//!   stale fallback
//! - **Symbolic errors** as `{code, params}` records, accumulated rather
//!   than raised
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Fingerprints, cache entries, memory and durable caches |
//! | [`config`] | Settings document: databases, directories, programs, web, cache |
//! | [`connector`] | Connector template and per-source drivers |
//! | [`context`] | Per-batch call context (umbrella error dedup) |
//! | [`error`] | Error codes, records and lists |
//! | [`factory`] | Connector construction and the public entry points |
//! | [`http_client`] | HTTP client abstraction |
//! | [`params`] | Request parameters and mapping rules |
//! | [`parser`] | Payload formats and decoders |
//! | [`record`] | Typed fields from row sources and their normalisation |
//! | [`retry`] | Retry policy and backoff |
//! | [`source`] | Source kinds |
//! | [`table`] | Result tables and row views |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use extdata_core::{ExternalData, ParamSet, Settings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let data = ExternalData::from_settings(Settings::from_env()?)?;
//!     let params = ParamSet::new()
//!         .with("url", "https://example.org/feed.xml")
//!         .with("data", "title=/rss/channel/item/title");
//!
//!     let outcome = data.get_web_data(params, &data.context()).await;
//!     for row in &outcome.rows.rows {
//!         println!("{}", row["title"]);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  CLI / caller   │
//! └────────┬────────┘
//!          │ ParamSet
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ ConnectorFactory│────▶│ Settings         │
//! └────────┬────────┘     └──────────────────┘
//!          │ Connector
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Connector       │────▶│ TableCache       │
//! │ (template)      │     │ (memory/DuckDB)  │
//! └────────┬────────┘     └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ SourceDriver    │────▶│ Parser           │
//! └─────────────────┘     └──────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Validation and retrieval never panic or short-circuit on the first
//! problem. Every failure is appended to the request's [`ErrorList`]; a
//! non-empty list means the request produced no values.
//!
//! ```rust
//! use extdata_core::{ErrorCode, ErrorList};
//!
//! let mut errors = ErrorList::new();
//! errors.add(ErrorCode::NoParamSpecified, ["url"]);
//! assert_eq!(errors.iter().next().map(|record| record.code.as_str()), Some("param.missing"));
//! ```

use std::future::Future;
use std::pin::Pin;

pub mod cache;
pub mod config;
pub mod connector;
pub mod context;
pub mod error;
pub mod factory;
pub mod http_client;
pub mod params;
pub mod parser;
pub mod record;
pub mod retry;
pub mod source;
pub mod table;

/// Boxed future returned by the object-safe async traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// Caching
pub use cache::{
    CacheEntry, CacheError, CacheLookup, CachePolicy, Fingerprint, FingerprintBuilder,
    MemoryCache, PersistentCache, TableCache,
};

// Configuration
pub use config::{
    CacheSettings, DatabaseSettings, LdapSettings, PreparedStatements, ProgramSettings, Settings,
    UmbrellaScope, WebSettings, CONFIG_ENV,
};

// Connectors
pub use connector::{Connector, ConnectorState, Extraction, Outcome, Payload, SourceDriver};

pub use context::CallContext;

// Error types
pub use error::{ConfigError, ErrorCode, ErrorList, ErrorRecord, ParseError};

// Entry points
pub use factory::{infer_kind, ConnectorFactory, ExternalData};

// HTTP client types
pub use http_client::{
    HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
};

pub use params::{Mapping, Mappings, ParamSet, ParamValue};

pub use parser::Format;

pub use record::{FieldValue, Record};

pub use retry::{Backoff, RetryPolicy};

pub use source::SourceKind;

pub use table::{RowView, Table, TableBuilder};
