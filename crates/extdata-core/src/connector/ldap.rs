//! Directory (LDAP) searches against configured servers.

use std::time::Duration;

use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use tracing::{debug, warn};

use crate::cache::FingerprintBuilder;
use crate::config::{LdapSettings, Settings};
use crate::context::CallContext;
use crate::error::{ErrorCode, ErrorList, ErrorRecord};
use crate::params::{Mappings, ParamSet};
use crate::record::{canonical_text, FieldValue, Record};
use crate::source::SourceKind;
use crate::BoxFuture;

use super::{Payload, SourceDriver};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRequest {
    pub domain: String,
    pub server: LdapSettings,
    pub filter: String,
    pub attributes: Vec<String>,
}

impl DirectoryRequest {
    pub fn from_params(
        params: &ParamSet,
        settings: &Settings,
        rules: &Mappings,
    ) -> Result<Self, ErrorList> {
        let mut errors = ErrorList::new();
        let domain = params.require("domain", &mut errors);
        let filter = params.require("filter", &mut errors);

        let server = domain.as_deref().and_then(|domain| {
            let server = settings.ldap.get(domain).cloned();
            if server.is_none() {
                errors.add(ErrorCode::NoSuchLdapServer, [domain]);
            }
            server
        });

        match (domain, server, filter) {
            (Some(domain), Some(server), Some(filter)) if errors.is_empty() => Ok(Self {
                domain,
                server,
                filter,
                attributes: rules.externals().into_iter().map(str::to_owned).collect(),
            }),
            _ => Err(errors),
        }
    }
}

pub struct LdapDriver {
    request: DirectoryRequest,
    ldap: Option<Ldap>,
}

impl LdapDriver {
    pub fn new(request: DirectoryRequest) -> Self {
        Self {
            request,
            ldap: None,
        }
    }

    /// Bound on connecting and on each operation after it.
    fn timeout(&self) -> Duration {
        self.request
            .server
            .timeout_ms
            .map_or(DEFAULT_TIMEOUT, Duration::from_millis)
    }

    fn failure(&self, code: ErrorCode, error: impl ToString) -> ErrorList {
        ErrorList::single(ErrorRecord::new(
            code,
            [self.request.domain.clone(), error.to_string()],
        ))
    }
}

impl SourceDriver for LdapDriver {
    fn kind(&self) -> SourceKind {
        SourceKind::Ldap
    }

    fn fingerprint(&self, builder: &mut FingerprintBuilder) {
        builder
            .field("url", &self.request.server.url)
            .field("base", &self.request.server.base_dn)
            .field("filter", &self.request.filter)
            .fields(
                "attribute",
                self.request.attributes.iter().map(String::as_str),
            );
    }

    fn connect<'a>(&'a mut self, _ctx: &'a CallContext) -> BoxFuture<'a, Result<(), ErrorList>> {
        Box::pin(async move {
            let timeout = self.timeout();
            let settings = LdapConnSettings::new().set_conn_timeout(timeout);
            let (connection, mut ldap) =
                LdapConnAsync::with_settings(settings, &self.request.server.url)
                    .await
                    .map_err(|error| self.failure(ErrorCode::LdapCouldNotConnect, error))?;
            ldap3::drive!(connection);

            if let Some(bind_dn) = &self.request.server.bind_dn {
                let password = self.request.server.password.as_deref().unwrap_or_default();
                ldap.with_timeout(timeout)
                    .simple_bind(bind_dn, password)
                    .await
                    .and_then(|result| result.success())
                    .map_err(|error| self.failure(ErrorCode::LdapCouldNotConnect, error))?;
            }

            debug!(domain = %self.request.domain, "directory bound");
            self.ldap = Some(ldap);
            Ok(())
        })
    }

    fn fetch<'a>(&'a mut self, _ctx: &'a CallContext) -> BoxFuture<'a, Result<Payload, ErrorList>> {
        Box::pin(async move {
            let timeout = self.timeout();
            let Some(ldap) = self.ldap.as_mut() else {
                return Err(self.failure(ErrorCode::LdapCouldNotConnect, "not connected"));
            };

            let searched = ldap
                .with_timeout(timeout)
                .search(
                    &self.request.server.base_dn,
                    Scope::Subtree,
                    &self.request.filter,
                    self.request.attributes.clone(),
                )
                .await
                .and_then(|result| result.success());
            let (entries, _) = match searched {
                Ok(found) => found,
                Err(error) => return Err(self.failure(ErrorCode::LdapSearchFailed, error)),
            };

            let records = entries
                .into_iter()
                .map(|entry| to_record(SearchEntry::construct(entry)))
                .collect();
            Ok(Payload::Records(records))
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), ErrorList>> {
        Box::pin(async move {
            let Some(mut ldap) = self.ldap.take() else {
                return Ok(());
            };
            if let Err(error) = ldap.unbind().await {
                warn!(domain = %self.request.domain, error = %error, "unbind failed");
                return Err(self.failure(ErrorCode::DisconnectFailed, error));
            }
            Ok(())
        })
    }
}

/// Multi-valued attributes are joined with `", "`; binary values are
/// decoded to text.
fn to_record(entry: SearchEntry) -> Record {
    let mut record = Record::new();
    record.insert("dn".to_owned(), FieldValue::Text(entry.dn));
    for (name, values) in entry.attrs {
        record.insert(name, FieldValue::Text(values.join(", ")));
    }
    for (name, values) in entry.bin_attrs {
        let joined = values
            .iter()
            .map(|value| canonical_text(value))
            .collect::<Vec<_>>()
            .join(", ");
        record.insert(name, FieldValue::Text(joined));
    }
    record
}
