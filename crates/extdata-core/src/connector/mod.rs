//! Connector template and the source-specific drivers it runs.
//!
//! A [`Connector`] owns one validated [`SourceDriver`] and drives it through
//! one fixed sequence: cache lookup, connect, fetch, process, disconnect,
//! cache store. Drivers only implement the source-specific steps; decoding,
//! normalisation, caching and the stale fallback live here.
//!
//! ```text
//! Constructed ──errors──▶ Invalid
//!      │
//!      ├─cache hit────────────────────────────────────▶ Disconnected
//!      ▼
//!  Connected ──▶ Fetched ──▶ Processed ──▶ Disconnected
//!      │            │            │
//!      └────────────┴────────────┴──failure──▶ Invalid
//! ```

pub mod database;
pub mod file;
pub mod ldap;
pub mod program;
pub mod soap;
pub mod web;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{
    unix_now, CacheEntry, CacheLookup, CachePolicy, Fingerprint, FingerprintBuilder, TableCache,
};
use crate::context::CallContext;
use crate::error::{ErrorCode, ErrorList, ErrorRecord};
use crate::params::Mappings;
use crate::parser::{self, Format};
use crate::record::{canonical_text, process_rows, Record};
use crate::source::SourceKind;
use crate::table::{RowView, Table};
use crate::BoxFuture;

/// Raw result of a driver's fetch step.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Bytes to be decoded by a parser.
    Text {
        body: Vec<u8>,
        content_type: Option<String>,
        /// Format the source itself suggests (file extension, program setting).
        format_hint: Option<Format>,
    },
    /// Already structured rows.
    Records(Vec<Record>),
}

/// Source-specific steps of a fetch.
pub trait SourceDriver: Send {
    fn kind(&self) -> SourceKind;

    /// Feed everything that identifies the fetched data into the fingerprint.
    fn fingerprint(&self, builder: &mut FingerprintBuilder);

    fn connect<'a>(&'a mut self, ctx: &'a CallContext) -> BoxFuture<'a, Result<(), ErrorList>>;

    fn fetch<'a>(&'a mut self, ctx: &'a CallContext) -> BoxFuture<'a, Result<Payload, ErrorList>>;

    /// Release whatever `connect` acquired. Must be safe to call when
    /// `connect` failed or was never called.
    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), ErrorList>>;

    /// Error to report when the fetch yields no records. `None` means an
    /// empty result is a successful empty table.
    fn empty_result_error(&self) -> Option<ErrorRecord> {
        None
    }
}

/// How the fetched payload becomes a table.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub rules: Mappings,
    /// Declared by the caller; wins over anything inferred.
    pub format: Option<Format>,
    pub initial: Table,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorState {
    Constructed,
    Invalid,
    Connected,
    Fetched,
    Processed,
    Disconnected,
}

/// Outbound result: a table with no errors, or no table and a non-empty
/// error list. Warnings never fail a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub kind: SourceKind,
    pub values: Option<Table>,
    pub rows: RowView,
    pub errors: ErrorList,
    pub warnings: ErrorList,
    pub cache_hit: bool,
    pub stale: bool,
}

impl Outcome {
    pub fn failed(kind: SourceKind, errors: ErrorList) -> Self {
        Self {
            kind,
            values: None,
            rows: RowView::default(),
            errors,
            warnings: ErrorList::new(),
            cache_hit: false,
            stale: false,
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// One request's connector. Discarded once the request completes.
pub struct Connector {
    kind: SourceKind,
    driver: Option<Box<dyn SourceDriver>>,
    extraction: Extraction,
    cache: Option<Arc<dyn TableCache>>,
    policy: CachePolicy,
    state: ConnectorState,
    errors: ErrorList,
    warnings: ErrorList,
    table: Option<Table>,
    cache_hit: bool,
    stale: bool,
}

impl Connector {
    pub fn new(
        driver: Box<dyn SourceDriver>,
        extraction: Extraction,
        cache: Option<Arc<dyn TableCache>>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            kind: driver.kind(),
            driver: Some(driver),
            extraction,
            cache,
            policy,
            state: ConnectorState::Constructed,
            errors: ErrorList::new(),
            warnings: ErrorList::new(),
            table: None,
            cache_hit: false,
            stale: false,
        }
    }

    /// A connector whose parameters did not validate. It never runs.
    pub fn invalid(kind: SourceKind, errors: ErrorList) -> Self {
        Self {
            kind,
            driver: None,
            extraction: Extraction::default(),
            cache: None,
            policy: CachePolicy::disabled(),
            state: ConnectorState::Invalid,
            errors,
            warnings: ErrorList::new(),
            table: None,
            cache_hit: false,
            stale: false,
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn state(&self) -> ConnectorState {
        self.state
    }

    pub fn errors(&self) -> &ErrorList {
        &self.errors
    }

    pub fn warnings(&self) -> &ErrorList {
        &self.warnings
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.driver.is_some()
    }

    pub fn table(&self) -> Option<&Table> {
        self.table.as_ref()
    }

    /// Cache key for this request, `None` when caching does not apply.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        let driver = self.driver.as_ref()?;
        if self.cache.is_none() || !self.policy.enabled() {
            return None;
        }

        let mut builder = FingerprintBuilder::new(self.kind);
        driver.fingerprint(&mut builder);
        builder.fields(
            "rule",
            self.extraction
                .rules
                .iter()
                .map(|rule| format!("{}\u{1f}{}", rule.external, rule.column))
                .collect::<Vec<_>>()
                .iter()
                .map(String::as_str),
        );
        let format = self
            .extraction
            .format
            .as_ref()
            .map(Format::identity)
            .unwrap_or_default();
        builder.field("format", &format);
        Some(builder.finish())
    }

    /// Drive the fetch sequence once. Only a freshly constructed, valid
    /// connector does anything; every other state is left untouched.
    pub async fn run(&mut self, ctx: &CallContext) {
        if self.state != ConnectorState::Constructed || !self.is_valid() {
            warn!(kind = %self.kind, state = ?self.state, "connector is not runnable");
            return;
        }

        let fingerprint = self.fingerprint();
        let mut stale_entry = None;

        if let (Some(cache), Some(key)) = (self.cache.clone(), fingerprint.as_ref()) {
            match cache.lookup(key, unix_now()).await {
                Ok(CacheLookup::Fresh(entry)) => {
                    debug!(kind = %self.kind, fingerprint = %key, "cache hit");
                    self.table = Some(entry.table);
                    self.cache_hit = true;
                    self.state = ConnectorState::Disconnected;
                    return;
                }
                Ok(CacheLookup::Stale(entry)) => {
                    debug!(kind = %self.kind, fingerprint = %key, "cache entry expired");
                    if self.policy.stale_on_failure {
                        stale_entry = Some(entry);
                    }
                }
                Ok(CacheLookup::Miss) => {
                    debug!(kind = %self.kind, fingerprint = %key, "cache miss");
                }
                Err(error) => {
                    warn!(kind = %self.kind, error = %error, "cache lookup failed");
                    self.warnings
                        .add(ErrorCode::CacheUnavailable, [error.to_string()]);
                }
            }
        }

        match self.run_live(ctx).await {
            Ok(table) => {
                if let (Some(cache), Some(key)) = (self.cache.clone(), fingerprint.as_ref()) {
                    let entry = CacheEntry {
                        table: table.clone(),
                        retrieved_at: unix_now(),
                        ttl_secs: self.policy.ttl_secs,
                    };
                    if let Err(error) = cache.store(key, self.kind, entry).await {
                        warn!(kind = %self.kind, error = %error, "cache store failed");
                        self.warnings
                            .add(ErrorCode::CacheUnavailable, [error.to_string()]);
                    }
                }
                info!(kind = %self.kind, rows = table.row_count(), "fetch completed");
                self.table = Some(table);
            }
            Err(errors) => match (stale_entry, fingerprint) {
                (Some(entry), Some(key)) => {
                    warn!(
                        kind = %self.kind,
                        fingerprint = %key,
                        failures = errors.len(),
                        "live fetch failed, serving stale cache entry"
                    );
                    self.warnings.merge(errors);
                    self.warnings
                        .add(ErrorCode::StaleCacheUsed, [key.as_str().to_owned()]);
                    self.table = Some(entry.table);
                    self.stale = true;
                    self.state = ConnectorState::Disconnected;
                }
                _ => {
                    info!(kind = %self.kind, failures = errors.len(), "fetch failed");
                    self.errors.merge(errors);
                    self.state = ConnectorState::Invalid;
                }
            },
        }
    }

    async fn run_live(&mut self, ctx: &CallContext) -> Result<Table, ErrorList> {
        let Self {
            driver,
            extraction,
            state,
            warnings,
            kind,
            ..
        } = self;
        let Some(driver) = driver.as_mut() else {
            return Err(ErrorList::new());
        };

        driver.connect(ctx).await?;
        *state = ConnectorState::Connected;
        debug!(kind = %kind, "connected");

        let result = match driver.fetch(ctx).await {
            Ok(payload) => {
                *state = ConnectorState::Fetched;
                process(payload, extraction, driver.empty_result_error())
            }
            Err(errors) => Err(errors),
        };
        if result.is_ok() {
            *state = ConnectorState::Processed;
        }

        if let Err(errors) = driver.disconnect().await {
            warn!(kind = %kind, "disconnect failed");
            warnings.merge(errors);
        }
        if result.is_ok() {
            *state = ConnectorState::Disconnected;
        }
        result
    }

    pub fn into_outcome(self) -> Outcome {
        let values = if self.errors.is_empty() {
            self.table
        } else {
            None
        };
        Outcome {
            kind: self.kind,
            rows: values.as_ref().map(Table::rows).unwrap_or_default(),
            values,
            errors: self.errors,
            warnings: self.warnings,
            cache_hit: self.cache_hit,
            stale: self.stale,
        }
    }
}

fn process(
    payload: Payload,
    extraction: &Extraction,
    empty_error: Option<ErrorRecord>,
) -> Result<Table, ErrorList> {
    match payload {
        Payload::Records(records) => {
            if records.is_empty() {
                if let Some(record) = empty_error {
                    return Err(ErrorList::single(record));
                }
            }
            Ok(process_rows(&records, &extraction.rules))
        }
        Payload::Text {
            body,
            content_type,
            format_hint,
        } => {
            let text = canonical_text(&body);
            let declared = extraction.format.as_ref().or(format_hint.as_ref());
            let format = Format::resolve(declared, content_type.as_deref(), &text);
            debug!(format = %format, bytes = body.len(), "decoding payload");
            parser::decode(&format, &text, &extraction.rules, &extraction.initial)
        }
    }
}
