//! Host-side settings: named databases, directories, programs, file aliases,
//! web options and cache behaviour.
//!
//! Settings are loaded from a JSON file. Values here describe the
//! installation and always take precedence over what a caller passes for the
//! same concern (credentials, dialect, prepared statements).

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::retry::{Backoff, RetryPolicy};

/// Environment variable naming the settings file.
pub const CONFIG_ENV: &str = "EXTDATA_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub databases: BTreeMap<String, DatabaseSettings>,
    pub ldap: BTreeMap<String, LdapSettings>,
    pub programs: BTreeMap<String, ProgramSettings>,
    /// Alias → file path.
    pub files: BTreeMap<String, PathBuf>,
    /// Alias → directory root.
    pub directories: BTreeMap<String, PathBuf>,
    pub web: WebSettings,
    pub cache: CacheSettings,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load from `EXTDATA_CONFIG` when set, otherwise defaults. When
    /// `EXTDATA_HOME` is set the durable cache lives under it unless the
    /// settings name a store path themselves.
    pub fn from_env() -> Result<Self, ConfigError> {
        let settings = match env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path))?,
            None => Self::default(),
        };
        let home = env::var_os(extdata_store::HOME_ENV).map(PathBuf::from);
        Ok(settings.with_home(home.as_deref()))
    }

    /// Default the durable store to `<home>/cache/extdata.duckdb`.
    pub fn with_home(mut self, home: Option<&Path>) -> Self {
        if let (None, Some(home)) = (&self.cache.store_path, home) {
            self.cache.store_path = Some(extdata_store::store_path_in(home));
        }
        self
    }

    pub fn database(&self, id: &str) -> Option<&DatabaseSettings> {
        self.databases.get(id)
    }
}

/// One named database connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    #[serde(rename = "type")]
    pub db_type: Option<String>,
    #[serde(alias = "server")]
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub prepared: Option<PreparedStatements>,
    /// Per-parameter type string for the prepared statement(s), e.g. `sid`.
    pub types: Option<String>,
}

/// A single statement template or a set of named ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PreparedStatements {
    Single(String),
    Named(BTreeMap<String, String>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LdapSettings {
    pub url: String,
    pub base_dn: String,
    pub bind_dn: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramSettings {
    /// Program and arguments; tokens may contain `$name$` placeholders.
    pub command: Vec<String>,
    /// Values used for placeholders the caller leaves out.
    pub defaults: BTreeMap<String, String>,
    pub format: Option<String>,
    pub timeout_ms: Option<u64>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    pub timeout_ms: u64,
    pub attempts: u32,
    pub retry_delay_ms: u64,
    pub user_agent: String,
    pub headers: BTreeMap<String, String>,
    /// Hosts that may be fetched. Empty allows any host.
    pub allowed_hosts: Vec<String>,
    pub umbrella_scope: UmbrellaScope,
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            attempts: 3,
            retry_delay_ms: 200,
            user_agent: format!("extdata/{}", env!("CARGO_PKG_VERSION")),
            headers: BTreeMap::new(),
            allowed_hosts: Vec::new(),
            umbrella_scope: UmbrellaScope::default(),
        }
    }
}

impl WebSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.attempts.max(1),
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.retry_delay_ms),
                factor: 2.0,
                max: Duration::from_secs(3),
                jitter: true,
            },
            ..RetryPolicy::default()
        }
    }

    pub fn host_allowed(&self, host: &str) -> bool {
        self.allowed_hosts.is_empty()
            || self.allowed_hosts.iter().any(|allowed| {
                let allowed = allowed.trim_start_matches("*.");
                host.eq_ignore_ascii_case(allowed)
                    || host
                        .to_ascii_lowercase()
                        .ends_with(&format!(".{}", allowed.to_ascii_lowercase()))
            })
    }
}

/// Scope over which the umbrella "not fetched" error is emitted only once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UmbrellaScope {
    #[default]
    PerBatch,
    PerProcess,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// TTL applied when a request does not override it. 0 disables caching.
    pub default_ttl_secs: u64,
    /// Serve an expired entry when the live fetch fails.
    pub stale_on_failure: bool,
    /// Durable store; `None` keeps entries in memory only.
    pub store_path: Option<PathBuf>,
    pub max_entries: Option<usize>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            stale_on_failure: false,
            store_path: None,
            max_entries: Some(1_024),
        }
    }
}
