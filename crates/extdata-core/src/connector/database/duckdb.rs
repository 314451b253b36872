use ::duckdb::types::{TimeUnit, Value as DuckValue};
use ::duckdb::{params_from_iter, AccessMode, Config, Connection};
use time::{Date, OffsetDateTime, PrimitiveDateTime};
use tracing::debug;

use crate::cache::FingerprintBuilder;
use crate::connector::{Payload, SourceDriver};
use crate::context::CallContext;
use crate::error::{ErrorCode, ErrorList, ErrorRecord};
use crate::record::{FieldValue, Record};
use crate::source::SourceKind;
use crate::BoxFuture;

use super::{BoundValue, DbRequest};

const MEMORY: &str = ":memory:";
/// Julian day number of 1970-01-01.
const UNIX_EPOCH_JULIAN_DAY: i32 = 2_440_588;

impl BoundValue {
    fn to_duck(&self) -> DuckValue {
        match self {
            Self::Text(value) => DuckValue::Text(value.clone()),
            Self::Int(value) => DuckValue::BigInt(*value),
            Self::Double(value) => DuckValue::Double(*value),
            Self::Bytes(value) => DuckValue::Blob(value.clone()),
        }
    }
}

/// Read-only DuckDB database file named by the target's `name`.
pub struct DuckDbDriver {
    request: DbRequest,
    connection: Option<Connection>,
}

impl DuckDbDriver {
    pub fn new(request: DbRequest) -> Self {
        Self {
            request,
            connection: None,
        }
    }
}

fn open(path: &str) -> Result<Connection, ::duckdb::Error> {
    if path == MEMORY {
        return Connection::open_in_memory();
    }
    let config = Config::default().access_mode(AccessMode::ReadOnly)?;
    Connection::open_with_flags(path, config)
}

impl SourceDriver for DuckDbDriver {
    fn kind(&self) -> SourceKind {
        SourceKind::Db
    }

    fn fingerprint(&self, builder: &mut FingerprintBuilder) {
        self.request.fingerprint(builder);
    }

    fn connect<'a>(&'a mut self, _ctx: &'a CallContext) -> BoxFuture<'a, Result<(), ErrorList>> {
        Box::pin(async move {
            let path = self.request.target.name.clone();
            let opened = tokio::task::spawn_blocking(move || open(&path))
                .await
                .map_err(|error| self.request.failure(ErrorCode::DbCouldNotConnect, error))?;
            let connection =
                opened.map_err(|error| self.request.failure(ErrorCode::DbCouldNotConnect, error))?;
            debug!(db = %self.request.target.id, "duckdb opened");
            self.connection = Some(connection);
            Ok(())
        })
    }

    fn fetch<'a>(&'a mut self, _ctx: &'a CallContext) -> BoxFuture<'a, Result<Payload, ErrorList>> {
        Box::pin(async move {
            let Some(connection) = self.connection.take() else {
                return Err(self.request.failure(ErrorCode::DbCouldNotConnect, "not connected"));
            };

            let sql = self.request.sql.clone();
            let values: Vec<DuckValue> = self.request.values.iter().map(BoundValue::to_duck).collect();
            let (connection, result) = tokio::task::spawn_blocking(move || {
                let result = execute_select(&connection, &sql, values);
                (connection, result)
            })
            .await
            .map_err(|error| self.request.failure(ErrorCode::DbExecutionFailed, error))?;
            self.connection = Some(connection);

            let records = result.map_err(|failure| match failure {
                QueryFailure::Prepare(error) => self.request.failure(ErrorCode::DbInvalidQuery, error),
                QueryFailure::Execute(error) => {
                    self.request.failure(ErrorCode::DbExecutionFailed, error)
                }
            })?;
            debug!(db = %self.request.target.id, rows = records.len(), "duckdb query returned");
            Ok(Payload::Records(records))
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), ErrorList>> {
        Box::pin(async move {
            let Some(connection) = self.connection.take() else {
                return Ok(());
            };
            connection
                .close()
                .map_err(|(_, error)| self.request.failure(ErrorCode::DisconnectFailed, error))
        })
    }

    fn empty_result_error(&self) -> Option<ErrorRecord> {
        Some(self.request.no_rows())
    }
}

enum QueryFailure {
    Prepare(::duckdb::Error),
    Execute(::duckdb::Error),
}

/// Prepare and run once; column names come from the executed statement.
fn execute_select(
    connection: &Connection,
    sql: &str,
    values: Vec<DuckValue>,
) -> Result<Vec<Record>, QueryFailure> {
    let mut statement = connection.prepare(sql).map_err(QueryFailure::Prepare)?;
    let mut rows = statement
        .query(params_from_iter(values.iter()))
        .map_err(QueryFailure::Execute)?;
    let columns = rows
        .as_ref()
        .map(|executed| executed.column_names())
        .unwrap_or_default();

    let mut records = Vec::new();
    while let Some(row) = rows.next().map_err(QueryFailure::Execute)? {
        let mut record = Record::new();
        for (index, name) in columns.iter().enumerate() {
            let value: DuckValue = row.get(index).map_err(QueryFailure::Execute)?;
            record.insert(name.clone(), field_value(value));
        }
        records.push(record);
    }
    Ok(records)
}

fn field_value(value: DuckValue) -> FieldValue {
    match value {
        DuckValue::Null => FieldValue::Null,
        DuckValue::Boolean(value) => FieldValue::Bool(value),
        DuckValue::TinyInt(value) => FieldValue::Int(value.into()),
        DuckValue::SmallInt(value) => FieldValue::Int(value.into()),
        DuckValue::Int(value) => FieldValue::Int(value.into()),
        DuckValue::BigInt(value) => FieldValue::Int(value),
        DuckValue::UTinyInt(value) => FieldValue::Int(value.into()),
        DuckValue::USmallInt(value) => FieldValue::Int(value.into()),
        DuckValue::UInt(value) => FieldValue::Int(value.into()),
        DuckValue::UBigInt(value) => match i64::try_from(value) {
            Ok(value) => FieldValue::Int(value),
            Err(_) => FieldValue::Text(value.to_string()),
        },
        DuckValue::HugeInt(value) => FieldValue::Text(value.to_string()),
        DuckValue::Float(value) => FieldValue::Float(value.into()),
        DuckValue::Double(value) => FieldValue::Float(value),
        DuckValue::Text(value) => FieldValue::Text(value),
        DuckValue::Blob(value) => FieldValue::Bytes(value),
        DuckValue::Timestamp(unit, value) => timestamp(unit, value)
            .map(|at| FieldValue::Timestamp(PrimitiveDateTime::new(at.date(), at.time())))
            .unwrap_or(FieldValue::Null),
        DuckValue::Date32(days) => Date::from_julian_day(UNIX_EPOCH_JULIAN_DAY + days)
            .map(FieldValue::Date)
            .unwrap_or(FieldValue::Null),
        other => FieldValue::Text(format!("{other:?}")),
    }
}

fn timestamp(unit: TimeUnit, value: i64) -> Option<OffsetDateTime> {
    let nanos = match unit {
        TimeUnit::Second => i128::from(value) * 1_000_000_000,
        TimeUnit::Millisecond => i128::from(value) * 1_000_000,
        TimeUnit::Microsecond => i128::from(value) * 1_000,
        TimeUnit::Nanosecond => i128::from(value),
    };
    OffsetDateTime::from_unix_timestamp_nanos(nanos).ok()
}
