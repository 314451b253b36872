use std::time::Duration;

use time::{Date, OffsetDateTime, PrimitiveDateTime};
use tokio::task::JoinHandle;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};
use tracing::{debug, warn};

use crate::cache::FingerprintBuilder;
use crate::connector::{Payload, SourceDriver};
use crate::context::CallContext;
use crate::error::{ErrorCode, ErrorList, ErrorRecord};
use crate::record::{FieldValue, Record};
use crate::source::SourceKind;
use crate::BoxFuture;

use super::{BoundValue, DbRequest, DbTarget};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) fn connection_config(target: &DbTarget) -> Config {
    let mut config = Config::new();
    config
        .dbname(&target.name)
        .application_name("extdata")
        .connect_timeout(CONNECT_TIMEOUT);
    if let Some(host) = &target.host {
        config.host(host);
    }
    if let Some(port) = target.port {
        config.port(port);
    }
    if let Some(user) = &target.user {
        config.user(user);
    }
    if let Some(password) = &target.password {
        config.password(password);
    }
    config
}

impl BoundValue {
    fn pg_type(&self) -> Type {
        match self {
            Self::Text(_) => Type::TEXT,
            Self::Int(_) => Type::INT8,
            Self::Double(_) => Type::FLOAT8,
            Self::Bytes(_) => Type::BYTEA,
        }
    }

    fn as_pg(&self) -> &(dyn ToSql + Sync) {
        match self {
            Self::Text(value) => value,
            Self::Int(value) => value,
            Self::Double(value) => value,
            Self::Bytes(value) => value,
        }
    }
}

struct Session {
    client: Client,
    connection: JoinHandle<()>,
}

pub struct PostgresDriver {
    request: DbRequest,
    session: Option<Session>,
}

impl PostgresDriver {
    pub fn new(request: DbRequest) -> Self {
        Self {
            request,
            session: None,
        }
    }
}

impl SourceDriver for PostgresDriver {
    fn kind(&self) -> SourceKind {
        SourceKind::Db
    }

    fn fingerprint(&self, builder: &mut FingerprintBuilder) {
        self.request.fingerprint(builder);
    }

    fn connect<'a>(&'a mut self, _ctx: &'a CallContext) -> BoxFuture<'a, Result<(), ErrorList>> {
        Box::pin(async move {
            let config = connection_config(&self.request.target);
            let (client, connection) = config
                .connect(NoTls)
                .await
                .map_err(|error| self.request.failure(ErrorCode::DbCouldNotConnect, error))?;

            let id = self.request.target.id.clone();
            let connection = tokio::spawn(async move {
                if let Err(error) = connection.await {
                    warn!(db = %id, error = %error, "postgres connection closed with error");
                }
            });
            debug!(db = %self.request.target.id, "postgres connected");
            self.session = Some(Session { client, connection });
            Ok(())
        })
    }

    fn fetch<'a>(&'a mut self, _ctx: &'a CallContext) -> BoxFuture<'a, Result<Payload, ErrorList>> {
        Box::pin(async move {
            let Some(session) = self.session.as_ref() else {
                return Err(self.request.failure(ErrorCode::DbCouldNotConnect, "not connected"));
            };

            let types: Vec<Type> = self.request.values.iter().map(BoundValue::pg_type).collect();
            let statement = session
                .client
                .prepare_typed(&self.request.sql, &types)
                .await
                .map_err(|error| self.request.failure(ErrorCode::DbInvalidQuery, error))?;

            let values: Vec<&(dyn ToSql + Sync)> =
                self.request.values.iter().map(BoundValue::as_pg).collect();
            let rows = session
                .client
                .query(&statement, &values)
                .await
                .map_err(|error| self.request.failure(ErrorCode::DbExecutionFailed, error))?;

            debug!(db = %self.request.target.id, rows = rows.len(), "postgres query returned");
            Ok(Payload::Records(rows.iter().map(to_record).collect()))
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), ErrorList>> {
        Box::pin(async move {
            let Some(Session { client, connection }) = self.session.take() else {
                return Ok(());
            };
            drop(client);
            connection
                .await
                .map_err(|error| self.request.failure(ErrorCode::DisconnectFailed, error))
        })
    }

    fn empty_result_error(&self) -> Option<ErrorRecord> {
        Some(self.request.no_rows())
    }
}

fn to_record(row: &Row) -> Record {
    row.columns()
        .iter()
        .enumerate()
        .map(|(index, column)| (column.name().to_owned(), field_value(row, index, column.type_())))
        .collect()
}

fn field_value(row: &Row, index: usize, column_type: &Type) -> FieldValue {
    fn get<'a, T: tokio_postgres::types::FromSql<'a>>(row: &'a Row, index: usize) -> Option<T> {
        row.try_get::<_, Option<T>>(index).ok().flatten()
    }

    let value = match *column_type {
        Type::BOOL => get::<bool>(row, index).map(FieldValue::Bool),
        Type::INT2 => get::<i16>(row, index).map(|value| FieldValue::Int(value.into())),
        Type::INT4 => get::<i32>(row, index).map(|value| FieldValue::Int(value.into())),
        Type::INT8 => get::<i64>(row, index).map(FieldValue::Int),
        Type::FLOAT4 => get::<f32>(row, index).map(|value| FieldValue::Float(value.into())),
        Type::FLOAT8 => get::<f64>(row, index).map(FieldValue::Float),
        Type::BYTEA => get::<Vec<u8>>(row, index).map(FieldValue::Bytes),
        Type::TIMESTAMP => get::<PrimitiveDateTime>(row, index).map(FieldValue::Timestamp),
        Type::TIMESTAMPTZ => get::<OffsetDateTime>(row, index).map(FieldValue::TimestampTz),
        Type::DATE => get::<Date>(row, index).map(FieldValue::Date),
        _ => get::<String>(row, index).map(FieldValue::Text),
    };
    value.unwrap_or(FieldValue::Null)
}
