//! Relational sources: configured database targets queried either through
//! a generated `SELECT` or through a prepared statement.
//!
//! Targets are resolved by id against [`Settings::databases`]; caller
//! parameters only fill fields the configuration leaves out. Two dialects
//! are supported, PostgreSQL over the network and DuckDB files opened
//! read-only.

pub mod duckdb;
pub mod postgres;

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use crate::cache::FingerprintBuilder;
use crate::config::{DatabaseSettings, PreparedStatements, Settings};
use crate::error::{ErrorCode, ErrorList, ErrorRecord};
use crate::params::{Mappings, ParamSet, ParamValue};

use super::SourceDriver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    DuckDb,
}

impl Dialect {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::DuckDb => "duckdb",
        }
    }
}

impl Display for Dialect {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = ErrorRecord;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pgsql" => Ok(Self::Postgres),
            "duckdb" => Ok(Self::DuckDb),
            other => Err(ErrorRecord::new(ErrorCode::DbUnknownType, [other])),
        }
    }
}

/// Resolved connection details for one database id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbTarget {
    pub id: String,
    pub dialect: Dialect,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Database name, or the file path for DuckDB.
    pub name: String,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl DbTarget {
    /// Merge the configured entry for `id` with caller parameters. The
    /// configured value wins for every field both provide.
    fn resolve(
        id: &str,
        configured: Option<&DatabaseSettings>,
        params: &ParamSet,
        errors: &mut ErrorList,
    ) -> Option<Self> {
        let caller = |key: &str| params.text(key).map(str::to_owned);
        let pick = |configured: Option<&String>, key: &str| configured.cloned().or_else(|| caller(key));

        let db_type = pick(configured.and_then(|db| db.db_type.as_ref()), "type");
        if configured.is_none() && db_type.is_none() {
            errors.add(ErrorCode::DbNoSuchDatabase, [id]);
            return None;
        }

        let host = pick(configured.and_then(|db| db.host.as_ref()), "host");
        let name = pick(configured.and_then(|db| db.name.as_ref()), "name");
        let user = pick(configured.and_then(|db| db.user.as_ref()), "user");
        let password = pick(configured.and_then(|db| db.password.as_ref()), "password");
        let port = match configured.and_then(|db| db.port) {
            Some(port) => Some(port),
            None => match params.text("port").map(str::parse::<u16>) {
                Some(Ok(port)) => Some(port),
                Some(Err(_)) => {
                    errors.add(ErrorCode::InvalidParam, ["port", params.text("port").unwrap_or_default()]);
                    None
                }
                None => None,
            },
        };

        let mut incomplete = |field: &str| errors.add(ErrorCode::DbIncompleteInformation, [id, field]);
        if db_type.is_none() {
            incomplete("type");
        }
        if name.is_none() {
            incomplete("name");
        }

        let dialect = match db_type.as_deref().map(str::parse::<Dialect>) {
            Some(Ok(dialect)) => Some(dialect),
            Some(Err(record)) => {
                errors.push(record);
                None
            }
            None => None,
        };

        if dialect == Some(Dialect::Postgres) {
            if host.is_none() {
                errors.add(ErrorCode::DbIncompleteInformation, [id, "host"]);
            }
            if user.is_none() {
                errors.add(ErrorCode::DbIncompleteInformation, [id, "user"]);
            }
        }

        Some(Self {
            id: id.to_owned(),
            dialect: dialect?,
            host,
            port,
            name: name?,
            user,
            password,
        })
    }
}

/// Prepared-statement parameter after type conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Text(String),
    Int(i64),
    Double(f64),
    Bytes(Vec<u8>),
}

impl BoundValue {
    /// Convert `value` per its one-letter type: `s` text, `i` integer,
    /// `d` double, `b` bytes.
    fn parse(kind: char, value: &str) -> Result<Self, ErrorRecord> {
        let invalid = || ErrorRecord::new(ErrorCode::InvalidParam, ["parameters", value]);
        match kind {
            's' => Ok(Self::Text(value.to_owned())),
            'i' => value.trim().parse().map(Self::Int).map_err(|_| invalid()),
            'd' => value.trim().parse().map(Self::Double).map_err(|_| invalid()),
            'b' => Ok(Self::Bytes(value.as_bytes().to_vec())),
            _ => Err(ErrorRecord::new(ErrorCode::InvalidParam, ["types".to_owned(), kind.to_string()])),
        }
    }

    fn fingerprint_text(&self) -> String {
        match self {
            Self::Text(value) => format!("s:{value}"),
            Self::Int(value) => format!("i:{value}"),
            Self::Double(value) => format!("d:{value}"),
            Self::Bytes(value) => format!("b:{}", hex::encode(value)),
        }
    }
}

/// Clauses of a generated `SELECT`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenericQuery {
    pub tables: Vec<String>,
    pub join_on: Vec<String>,
    pub filter: Option<String>,
    pub group_by: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<u64>,
}

impl GenericQuery {
    fn from_params(params: &ParamSet, errors: &mut ErrorList) -> Self {
        let tables: Vec<String> = params
            .list("from")
            .unwrap_or_default()
            .into_iter()
            .filter(|table| !table.is_empty())
            .collect();
        if tables.is_empty() {
            errors.add(ErrorCode::NoParamSpecified, ["from"]);
        }

        let join_on = params.list("join on").unwrap_or_default();
        if tables.len() > 1 && join_on.len() != tables.len() - 1 {
            errors.add(
                ErrorCode::InvalidParam,
                [
                    "join on".to_owned(),
                    format!("{} tables need {} join conditions", tables.len(), tables.len() - 1),
                ],
            );
        }

        let limit = params.text("limit").and_then(|limit| match limit.parse() {
            Ok(limit) => Some(limit),
            Err(_) => {
                errors.add(ErrorCode::InvalidParam, ["limit", limit]);
                None
            }
        });

        Self {
            tables,
            join_on,
            filter: params.text("where").map(str::to_owned),
            group_by: params.text("group by").map(str::to_owned),
            order_by: params.text("order by").map(str::to_owned),
            limit,
        }
    }

    /// Each mapped external becomes a select expression aliased to itself,
    /// so result columns carry the external names.
    pub fn sql(&self, rules: &Mappings) -> String {
        let columns = rules
            .externals()
            .into_iter()
            .map(|external| format!("{external} AS {}", quote_identifier(external)))
            .collect::<Vec<_>>()
            .join(", ");

        let mut sql = format!("SELECT {columns} FROM ");
        let mut tables = self.tables.iter();
        if let Some(first) = tables.next() {
            sql.push_str(first);
        }
        for (table, condition) in tables.zip(&self.join_on) {
            sql.push_str(&format!(" JOIN {table} ON {condition}"));
        }
        if let Some(filter) = &self.filter {
            sql.push_str(&format!(" WHERE {filter}"));
        }
        if let Some(group_by) = &self.group_by {
            sql.push_str(&format!(" GROUP BY {group_by}"));
        }
        if let Some(order_by) = &self.order_by {
            sql.push_str(&format!(" ORDER BY {order_by}"));
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        sql
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Parameters that only make sense for a generated `SELECT`.
const GENERIC_CLAUSES: [&str; 6] = ["from", "join on", "where", "group by", "order by", "limit"];

/// A validated database request: where to connect and what to run.
#[derive(Debug, Clone, PartialEq)]
pub struct DbRequest {
    pub target: DbTarget,
    pub sql: String,
    pub values: Vec<BoundValue>,
    pub prepared: bool,
}

impl DbRequest {
    pub fn from_params(
        params: &ParamSet,
        settings: &Settings,
        rules: &Mappings,
    ) -> Result<Self, ErrorList> {
        let mut errors = ErrorList::new();
        let Some(id) = params.require("db", &mut errors) else {
            return Err(errors);
        };
        let configured = settings.database(&id);
        let target = DbTarget::resolve(&id, configured, params, &mut errors);

        // A database configured with statements runs nothing else.
        let configured_prepared = configured.and_then(|db| db.prepared.as_ref());
        if configured_prepared.is_some() {
            for key in GENERIC_CLAUSES.iter().filter(|key| params.contains(key)) {
                errors.add(
                    ErrorCode::InvalidParam,
                    [key.to_string(), format!("{id} only runs prepared statements")],
                );
            }
        }
        let wants_prepared = configured_prepared.is_some()
            || (!params.contains("from") && (params.contains("query") || params.contains("prepared")));

        let (sql, values) = if wants_prepared {
            let sql = resolve_prepared(&id, configured_prepared, params, &mut errors);
            let types = params
                .text("types")
                .map(str::to_owned)
                .or_else(|| configured.and_then(|db| db.types.clone()));
            let values = bind_parameters(&id, params, types.as_deref(), &mut errors);
            (sql, values)
        } else {
            let query = GenericQuery::from_params(params, &mut errors);
            (Some(query.sql(rules)), Vec::new())
        };

        match (target, sql) {
            (Some(target), Some(sql)) if errors.is_empty() => Ok(Self {
                target,
                sql,
                values,
                prepared: wants_prepared,
            }),
            _ => Err(errors),
        }
    }

    pub(crate) fn fingerprint(&self, builder: &mut FingerprintBuilder) {
        let target = &self.target;
        builder
            .field("dialect", target.dialect.as_str())
            .field("db", &target.id)
            .field("host", target.host.as_deref().unwrap_or_default())
            .field("port", &target.port.map(|port| port.to_string()).unwrap_or_default())
            .field("name", &target.name)
            .field("user", target.user.as_deref().unwrap_or_default())
            .field("sql", &self.sql);
        let values = self.values.iter().map(BoundValue::fingerprint_text).collect::<Vec<_>>();
        builder.fields("param", values.iter().map(String::as_str));
    }

    pub(crate) fn no_rows(&self) -> ErrorRecord {
        ErrorRecord::new(ErrorCode::DbNoRows, [self.target.id.as_str()])
    }

    pub(crate) fn failure(&self, code: ErrorCode, cause: impl ToString) -> ErrorList {
        let subject = match code {
            ErrorCode::DbInvalidQuery | ErrorCode::DbExecutionFailed => self.sql.clone(),
            _ => self.target.id.clone(),
        };
        ErrorList::single(ErrorRecord::new(code, [subject, cause.to_string()]))
    }
}

/// Pick the statement to prepare. Configured statements win over a
/// caller-supplied `prepared`; a named set is indexed by `query`.
fn resolve_prepared(
    id: &str,
    configured: Option<&PreparedStatements>,
    params: &ParamSet,
    errors: &mut ErrorList,
) -> Option<String> {
    let caller = match params.get("prepared") {
        Some(ParamValue::Text(sql)) if !sql.trim().is_empty() => {
            Some(PreparedStatements::Single(sql.trim().to_owned()))
        }
        Some(ParamValue::Map(named)) => Some(PreparedStatements::Named(named.clone())),
        Some(ParamValue::List(_)) => {
            errors.add(ErrorCode::InvalidParam, ["prepared", "expected a statement"]);
            None
        }
        _ => None,
    };

    let Some(statements) = configured.cloned().or(caller) else {
        errors.add(ErrorCode::DbIncompleteInformation, [id, "prepared"]);
        return None;
    };

    match statements {
        PreparedStatements::Single(sql) => Some(sql),
        PreparedStatements::Named(named) => match params.text("query") {
            Some(name) => match named.get(name) {
                Some(sql) => Some(sql.clone()),
                None => {
                    errors.add(ErrorCode::DbNoSuchPrepared, [id, name]);
                    None
                }
            },
            // A lone named statement needs no `query` to pick it.
            None if named.len() == 1 => named.into_values().next(),
            None => {
                errors.add(ErrorCode::DbPreparedNotSpecified, [id]);
                None
            }
        },
    }
}

/// Convert `parameters` according to `types` (one letter per value,
/// default all text).
fn bind_parameters(
    id: &str,
    params: &ParamSet,
    types: Option<&str>,
    errors: &mut ErrorList,
) -> Vec<BoundValue> {
    let values = params.list("parameters").unwrap_or_default();
    let kinds: Vec<char> = match types {
        Some(types) => types.trim().chars().collect(),
        None => vec!['s'; values.len()],
    };

    if kinds.len() != values.len() {
        errors.add(
            ErrorCode::DbParamCountMismatch,
            [id.to_owned(), kinds.len().to_string(), values.len().to_string()],
        );
        return Vec::new();
    }

    let mut bound = Vec::with_capacity(values.len());
    for (kind, value) in kinds.into_iter().zip(&values) {
        match BoundValue::parse(kind, value) {
            Ok(value) => bound.push(value),
            Err(record) => errors.push(record),
        }
    }
    bound
}

/// Driver for the request's dialect.
pub fn driver(request: DbRequest) -> Box<dyn SourceDriver> {
    match request.target.dialect {
        Dialect::Postgres => Box::new(postgres::PostgresDriver::new(request)),
        Dialect::DuckDb => Box::new(duckdb::DuckDbDriver::new(request)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.databases.insert(
            "sales".into(),
            DatabaseSettings {
                db_type: Some("postgres".into()),
                host: Some("db.internal".into()),
                name: Some("sales".into()),
                user: Some("reader".into()),
                password: Some("secret".into()),
                ..DatabaseSettings::default()
            },
        );
        settings.databases.insert(
            "reports".into(),
            DatabaseSettings {
                db_type: Some("duckdb".into()),
                name: Some("/srv/reports.duckdb".into()),
                prepared: Some(PreparedStatements::Named(BTreeMap::from([
                    ("by_region".to_string(), "SELECT * FROM t WHERE region = $1".to_string()),
                    ("by_id".to_string(), "SELECT * FROM t WHERE id = $1".to_string()),
                ]))),
                types: Some("s".into()),
                ..DatabaseSettings::default()
            },
        );
        settings
    }

    #[test]
    fn generic_select_aliases_externals_and_joins() {
        let params = ParamSet::new()
            .with("db", "sales")
            .with("from", "orders o, customers c")
            .with("join on", "o.customer = c.id")
            .with("where", "o.total > 10")
            .with("order by", "o.total DESC")
            .with("limit", "5");
        let rules = Mappings::parse("total=o.total, name=c.name");
        let request = DbRequest::from_params(&params, &settings(), &rules).expect("valid");

        assert!(!request.prepared);
        assert_eq!(
            request.sql,
            "SELECT o.total AS \"o.total\", c.name AS \"c.name\" FROM orders o \
             JOIN customers c ON o.customer = c.id WHERE o.total > 10 \
             ORDER BY o.total DESC LIMIT 5"
        );
    }

    #[test]
    fn join_conditions_must_match_table_count() {
        let params = ParamSet::new()
            .with("db", "sales")
            .with("from", "a, b, c")
            .with("join on", "a.id = b.id");
        let errors =
            DbRequest::from_params(&params, &settings(), &Mappings::parse("x")).expect_err("invalid");
        assert!(errors.contains(ErrorCode::InvalidParam));
    }

    #[test]
    fn unknown_database_without_type_is_rejected() {
        let params = ParamSet::new().with("db", "nowhere").with("from", "t");
        let errors =
            DbRequest::from_params(&params, &settings(), &Mappings::parse("x")).expect_err("invalid");
        assert!(errors.contains(ErrorCode::DbNoSuchDatabase));
    }

    #[test]
    fn caller_supplied_target_reports_each_missing_field() {
        let params = ParamSet::new()
            .with("db", "adhoc")
            .with("type", "postgres")
            .with("from", "t");
        let errors =
            DbRequest::from_params(&params, &settings(), &Mappings::parse("x")).expect_err("invalid");
        assert_eq!(errors.count(ErrorCode::DbIncompleteInformation), 3);
    }

    #[test]
    fn configuration_wins_over_caller() {
        let params = ParamSet::new()
            .with("db", "sales")
            .with("host", "attacker.example")
            .with("from", "t");
        let request =
            DbRequest::from_params(&params, &settings(), &Mappings::parse("x")).expect("valid");
        assert_eq!(request.target.host.as_deref(), Some("db.internal"));
    }

    #[test]
    fn unknown_type_is_reported() {
        let params = ParamSet::new()
            .with("db", "adhoc")
            .with("type", "oracle")
            .with("name", "x")
            .with("from", "t");
        let errors =
            DbRequest::from_params(&params, &settings(), &Mappings::parse("x")).expect_err("invalid");
        assert!(errors.contains(ErrorCode::DbUnknownType));
    }

    #[test]
    fn named_prepared_statement_is_selected_and_bound() {
        let params = ParamSet::new()
            .with("db", "reports")
            .with("query", "by_region")
            .with("parameters", "north");
        let request =
            DbRequest::from_params(&params, &settings(), &Mappings::parse("x")).expect("valid");
        assert!(request.prepared);
        assert_eq!(request.sql, "SELECT * FROM t WHERE region = $1");
        assert_eq!(request.values, vec![BoundValue::Text("north".into())]);
    }

    #[test]
    fn prepared_selection_errors() {
        let unknown = ParamSet::new()
            .with("db", "reports")
            .with("query", "missing")
            .with("parameters", "x");
        let errors =
            DbRequest::from_params(&unknown, &settings(), &Mappings::parse("x")).expect_err("invalid");
        assert!(errors.contains(ErrorCode::DbNoSuchPrepared));

        let unnamed = ParamSet::new().with("db", "reports").with("parameters", "x");
        let errors =
            DbRequest::from_params(&unnamed, &settings(), &Mappings::parse("x")).expect_err("invalid");
        assert!(errors.contains(ErrorCode::DbPreparedNotSpecified));
    }

    #[test]
    fn databases_with_configured_statements_reject_generated_queries() {
        // Given: A database restricted to its configured statements
        let params = ParamSet::new()
            .with("db", "reports")
            .with("from", "secrets")
            .with("where", "1 = 1");

        // When: The caller describes a query of their own
        let errors =
            DbRequest::from_params(&params, &settings(), &Mappings::parse("x")).expect_err("invalid");

        // Then: Each generated clause is refused
        let refused: Vec<&str> = errors
            .iter()
            .filter(|record| record.is(ErrorCode::InvalidParam))
            .map(|record| record.params[0].as_str())
            .collect();
        assert_eq!(refused, vec!["from", "where"]);
    }

    #[test]
    fn a_single_named_statement_is_used_without_a_query() {
        let mut settings = settings();
        settings.databases.insert(
            "audit".into(),
            DatabaseSettings {
                db_type: Some("duckdb".into()),
                name: Some("/srv/audit.duckdb".into()),
                prepared: Some(PreparedStatements::Named(BTreeMap::from([(
                    "recent".to_string(),
                    "SELECT * FROM log ORDER BY at DESC".to_string(),
                )]))),
                ..DatabaseSettings::default()
            },
        );

        let params = ParamSet::new().with("db", "audit");
        let request = DbRequest::from_params(&params, &settings, &Mappings::parse("x")).expect("valid");

        assert!(request.prepared);
        assert_eq!(request.sql, "SELECT * FROM log ORDER BY at DESC");
    }

    #[test]
    fn parameter_types_are_checked() {
        let base = ParamSet::new()
            .with("db", "sales")
            .with("prepared", "SELECT * FROM t WHERE a = $1 AND b = $2");

        let mismatch = base.clone().with("parameters", "1, 2").with("types", "i");
        let errors =
            DbRequest::from_params(&mismatch, &settings(), &Mappings::parse("x")).expect_err("invalid");
        assert!(errors.contains(ErrorCode::DbParamCountMismatch));

        let bad_int = base.clone().with("parameters", "one, 2").with("types", "id");
        let errors =
            DbRequest::from_params(&bad_int, &settings(), &Mappings::parse("x")).expect_err("invalid");
        assert!(errors.contains(ErrorCode::InvalidParam));

        let typed = base.with("parameters", "7, 2.5").with("types", "id");
        let request =
            DbRequest::from_params(&typed, &settings(), &Mappings::parse("x")).expect("valid");
        assert_eq!(request.values, vec![BoundValue::Int(7), BoundValue::Double(2.5)]);
    }

    #[test]
    fn fingerprint_ignores_password() {
        let params = ParamSet::new().with("db", "sales").with("from", "t");
        let request =
            DbRequest::from_params(&params, &settings(), &Mappings::parse("x")).expect("valid");
        let mut changed = request.clone();
        changed.target.password = Some("rotated".into());

        let key = |request: &DbRequest| {
            let mut builder = FingerprintBuilder::new(crate::source::SourceKind::Db);
            request.fingerprint(&mut builder);
            builder.finish()
        };
        assert_eq!(key(&request), key(&changed));
    }
}
