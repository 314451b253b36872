//! Per-request connector construction and the public entry points.

use std::sync::Arc;

use extdata_store::{CacheStore, StoreConfig};
use tracing::{info, instrument};

use crate::cache::{unix_now, CacheError, CachePolicy, MemoryCache, PersistentCache, TableCache};
use crate::config::Settings;
use crate::connector::database::{self, DbRequest};
use crate::connector::file::{FileDriver, FileRequest};
use crate::connector::ldap::{DirectoryRequest, LdapDriver};
use crate::connector::program::{ProgramDriver, ProgramRequest};
use crate::connector::soap::{SoapDriver, SoapRequest};
use crate::connector::web::{WebDriver, WebRequest};
use crate::connector::{Connector, Extraction, Outcome, SourceDriver};
use crate::context::CallContext;
use crate::error::{ErrorCode, ErrorList, ErrorRecord};
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::params::{Mappings, ParamSet};
use crate::parser::Format;
use crate::source::SourceKind;
use crate::table::Table;

/// Builds one fresh [`Connector`] per request from shared settings, cache
/// and HTTP client.
#[derive(Clone)]
pub struct ConnectorFactory {
    settings: Arc<Settings>,
    cache: Option<Arc<dyn TableCache>>,
    http: Arc<dyn HttpClient>,
}

impl ConnectorFactory {
    pub fn new(
        settings: Arc<Settings>,
        cache: Option<Arc<dyn TableCache>>,
        http: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            settings,
            cache,
            http,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Validate `params` for `kind` and return a runnable connector, or an
    /// invalid one carrying every problem found.
    pub fn build(&self, kind: SourceKind, params: ParamSet) -> Connector {
        let params = params.normalized();
        let mut errors = ErrorList::new();

        let rules = Mappings::from_params(&params, &mut errors);
        let format = Format::from_params(&params, &mut errors);
        let policy = self.policy(&params, &mut errors);

        match self.driver(kind, &params, &rules) {
            Ok(driver) if errors.is_empty() => {
                let extraction = Extraction {
                    rules,
                    format,
                    initial: Table::default(),
                };
                Connector::new(driver, extraction, self.cache.clone(), policy)
            }
            Ok(_) => Connector::invalid(kind, errors),
            Err(driver_errors) => {
                errors.merge(driver_errors);
                Connector::invalid(kind, errors)
            }
        }
    }

    fn driver(
        &self,
        kind: SourceKind,
        params: &ParamSet,
        rules: &Mappings,
    ) -> Result<Box<dyn SourceDriver>, ErrorList> {
        let settings = self.settings.as_ref();
        let driver: Box<dyn SourceDriver> = match kind {
            SourceKind::Web => Box::new(WebDriver::new(
                WebRequest::from_params(params, &settings.web)?,
                self.http.clone(),
                settings.web.clone(),
            )),
            SourceKind::Soap => Box::new(SoapDriver::new(
                SoapRequest::from_params(params, &settings.web)?,
                self.http.clone(),
                settings.web.clone(),
            )),
            SourceKind::File => Box::new(FileDriver::new(FileRequest::from_params(params, settings)?)),
            SourceKind::Ldap => Box::new(LdapDriver::new(DirectoryRequest::from_params(
                params, settings, rules,
            )?)),
            SourceKind::Db => database::driver(DbRequest::from_params(params, settings, rules)?),
            SourceKind::Program => {
                Box::new(ProgramDriver::new(ProgramRequest::from_params(params, settings)?))
            }
        };
        Ok(driver)
    }

    /// `cache seconds` overrides the configured TTL for this request;
    /// `stale` opts into the stale fallback.
    fn policy(&self, params: &ParamSet, errors: &mut ErrorList) -> CachePolicy {
        let cache = &self.settings.cache;
        let ttl_secs = match params.text("cache seconds") {
            Some(text) => text.parse().unwrap_or_else(|_| {
                errors.add(ErrorCode::InvalidParam, ["cache seconds", text]);
                0
            }),
            None => cache.default_ttl_secs,
        };
        CachePolicy {
            ttl_secs,
            stale_on_failure: cache.stale_on_failure || params.flag("stale"),
        }
    }
}

/// Facade over a [`ConnectorFactory`]: one method per source kind plus a
/// dispatcher that infers the kind from the parameters.
#[derive(Clone)]
pub struct ExternalData {
    factory: ConnectorFactory,
    cache: Option<Arc<dyn TableCache>>,
}

impl ExternalData {
    pub fn new(factory: ConnectorFactory) -> Self {
        Self {
            cache: factory.cache.clone(),
            factory,
        }
    }

    /// Wire the durable cache when a store path is configured, otherwise a
    /// bounded in-memory cache.
    pub fn from_settings(settings: Settings) -> Result<Self, CacheError> {
        let cache: Arc<dyn TableCache> = match &settings.cache.store_path {
            Some(path) => {
                let store = CacheStore::open(StoreConfig {
                    db_path: path.clone(),
                    ..StoreConfig::default()
                })?;
                Arc::new(PersistentCache::new(store))
            }
            None => match settings.cache.max_entries {
                Some(max) => Arc::new(MemoryCache::bounded(max)),
                None => Arc::new(MemoryCache::new()),
            },
        };
        let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new(&settings.web.user_agent));
        let factory = ConnectorFactory::new(Arc::new(settings), Some(cache), http);
        Ok(Self::new(factory))
    }

    pub fn factory(&self) -> &ConnectorFactory {
        &self.factory
    }

    /// Fresh context honouring the configured umbrella scope.
    pub fn context(&self) -> CallContext {
        CallContext::new(self.factory.settings().web.umbrella_scope)
    }

    #[instrument(skip(self, params, ctx), fields(batch = %ctx.batch_id()))]
    pub async fn fetch(&self, kind: SourceKind, params: ParamSet, ctx: &CallContext) -> Outcome {
        let mut connector = self.factory.build(kind, params);
        connector.run(ctx).await;
        let outcome = connector.into_outcome();
        info!(
            kind = %kind,
            success = outcome.is_success(),
            errors = outcome.errors.len(),
            cache_hit = outcome.cache_hit,
            "request finished"
        );
        outcome
    }

    pub async fn get_web_data(&self, params: ParamSet, ctx: &CallContext) -> Outcome {
        self.fetch(SourceKind::Web, params, ctx).await
    }

    pub async fn get_file_data(&self, params: ParamSet, ctx: &CallContext) -> Outcome {
        self.fetch(SourceKind::File, params, ctx).await
    }

    pub async fn get_soap_data(&self, params: ParamSet, ctx: &CallContext) -> Outcome {
        self.fetch(SourceKind::Soap, params, ctx).await
    }

    pub async fn get_ldap_data(&self, params: ParamSet, ctx: &CallContext) -> Outcome {
        self.fetch(SourceKind::Ldap, params, ctx).await
    }

    pub async fn get_db_data(&self, params: ParamSet, ctx: &CallContext) -> Outcome {
        self.fetch(SourceKind::Db, params, ctx).await
    }

    pub async fn get_program_data(&self, params: ParamSet, ctx: &CallContext) -> Outcome {
        self.fetch(SourceKind::Program, params, ctx).await
    }

    /// Dispatch on `source`, or infer the kind from the keys present.
    pub async fn get_external_data(&self, params: ParamSet, ctx: &CallContext) -> Outcome {
        match infer_kind(&params) {
            Ok(kind) => self.fetch(kind, params, ctx).await,
            // No kind could be determined; the outcome is labelled as web.
            Err(record) => Outcome::failed(SourceKind::Web, ErrorList::single(record)),
        }
    }

    pub async fn purge_cache(&self) -> Result<usize, CacheError> {
        match &self.cache {
            Some(cache) => cache.purge_expired(unix_now()).await,
            None => Ok(0),
        }
    }

    pub async fn clear_cache(&self) -> Result<usize, CacheError> {
        match &self.cache {
            Some(cache) => cache.clear().await,
            None => Ok(0),
        }
    }
}

pub fn infer_kind(params: &ParamSet) -> Result<SourceKind, ErrorRecord> {
    if let Some(source) = params.text("source") {
        return source.parse();
    }
    let params = params.clone().normalized();
    let kind = if params.contains("url") {
        if params.contains("request") {
            SourceKind::Soap
        } else {
            SourceKind::Web
        }
    } else if params.contains("file") || params.contains("directory") {
        SourceKind::File
    } else if params.contains("db") {
        SourceKind::Db
    } else if params.contains("domain") {
        SourceKind::Ldap
    } else if params.contains("program") {
        SourceKind::Program
    } else {
        return Err(ErrorRecord::new(ErrorCode::NoParamSpecified, ["source"]));
    };
    Ok(kind)
}
