//! Behavior-driven tests for database sources
//!
//! Each test seeds a DuckDB file in a temporary directory, registers it as a
//! configured database and queries it through the public entry points.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use duckdb::Connection;
use extdata_core::{
    BoxFuture, ConnectorFactory, DatabaseSettings, ErrorCode, ExternalData, HttpClient, HttpError,
    HttpRequest, HttpResponse, ParamSet, PreparedStatements, Settings,
};
use tempfile::{tempdir, TempDir};

struct Offline;

impl HttpClient for Offline {
    fn execute<'a>(&'a self, _request: HttpRequest) -> BoxFuture<'a, Result<HttpResponse, HttpError>> {
        Box::pin(async { Err(HttpError::non_retryable("offline")) })
    }
}

fn seed(path: &Path) {
    let connection = Connection::open(path).expect("create database");
    connection
        .execute_batch(
            "CREATE TABLE parts (id INTEGER, name VARCHAR, qty INTEGER);
             CREATE TABLE stock (part_id INTEGER, site VARCHAR);
             INSERT INTO parts VALUES (1, 'bolt', 4), (2, 'nut', 10), (3, 'washer', 25);
             INSERT INTO stock VALUES (1, 'north'), (2, 'south'), (3, 'north');",
        )
        .expect("seed");
}

/// A facade with an `inventory` database backed by a fresh DuckDB file.
fn inventory() -> (TempDir, ExternalData) {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("inventory.duckdb");
    seed(&path);

    let statements = BTreeMap::from([
        (
            "by_name".to_owned(),
            "SELECT qty FROM parts WHERE name = ?".to_owned(),
        ),
        (
            "heavier".to_owned(),
            "SELECT name, qty FROM parts WHERE qty > ? ORDER BY id".to_owned(),
        ),
    ]);
    let mut settings = Settings::default();
    settings.databases.insert(
        "inventory".into(),
        DatabaseSettings {
            db_type: Some("duckdb".into()),
            name: Some(path.to_string_lossy().into_owned()),
            prepared: Some(PreparedStatements::Named(statements)),
            ..DatabaseSettings::default()
        },
    );

    let data = ExternalData::new(ConnectorFactory::new(
        Arc::new(settings),
        None,
        Arc::new(Offline),
    ));
    (dir, data)
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| (*value).to_owned()).collect()
}

// =============================================================================
// Generated queries
// =============================================================================

#[tokio::test]
async fn when_selecting_from_a_table_the_mapped_columns_are_returned() {
    // Given: A seeded inventory database
    let (_dir, data) = inventory();

    // When: The caller asks for two columns in id order
    let params = ParamSet::new()
        .with("db", "inventory")
        .with("from", "parts")
        .with("data", "part=name, count=qty")
        .with("order by", "id");
    let outcome = data.get_db_data(params, &data.context()).await;

    // Then: Values come back as text under the local column names
    assert!(outcome.is_success(), "{:?}", outcome.errors);
    let values = outcome.values.expect("values");
    assert_eq!(values.column("part"), Some(strings(&["bolt", "nut", "washer"]).as_slice()));
    assert_eq!(values.column("count"), Some(strings(&["4", "10", "25"]).as_slice()));
    assert_eq!(outcome.rows.len(), 3);
}

#[tokio::test]
async fn when_joining_tables_filters_and_limits_apply() {
    let (_dir, data) = inventory();

    let params = ParamSet::new()
        .with("db", "inventory")
        .with("from", "parts, stock")
        .with("join on", "parts.id = stock.part_id")
        .with("where", "stock.site = 'north'")
        .with("order by", "parts.id DESC")
        .with("limit", "1")
        .with("data", "part=parts.name");
    let outcome = data.get_db_data(params, &data.context()).await;

    assert!(outcome.is_success(), "{:?}", outcome.errors);
    assert_eq!(outcome.rows.common_value("part"), Some("washer"));
}

#[tokio::test]
async fn when_join_conditions_do_not_match_the_tables_nothing_runs() {
    let (_dir, data) = inventory();

    let params = ParamSet::new()
        .with("db", "inventory")
        .with("from", "parts, stock")
        .with("data", "name");
    let outcome = data.get_db_data(params, &data.context()).await;

    assert!(outcome.errors.contains(ErrorCode::InvalidParam));
    assert!(outcome.values.is_none());
}

#[tokio::test]
async fn when_the_generated_sql_is_rejected_the_statement_is_reported() {
    let (_dir, data) = inventory();

    let params = ParamSet::new()
        .with("db", "inventory")
        .with("from", "no_such_table")
        .with("data", "name");
    let outcome = data.get_db_data(params, &data.context()).await;

    let failure = outcome
        .errors
        .iter()
        .find(|record| record.is(ErrorCode::DbInvalidQuery))
        .expect("invalid query");
    assert!(failure.params[0].contains("no_such_table"));
}

// =============================================================================
// Prepared statements
// =============================================================================

#[tokio::test]
async fn when_a_named_statement_is_chosen_its_parameters_are_bound_by_type() {
    // Given: The `heavier` statement taking one integer
    let (_dir, data) = inventory();

    // When: It is called with a typed parameter
    let params = ParamSet::new()
        .with("db", "inventory")
        .with("query", "heavier")
        .with("parameters", "5")
        .with("types", "i")
        .with("data", "name, qty");
    let outcome = data.get_db_data(params, &data.context()).await;

    // Then: Only the matching rows come back
    assert!(outcome.is_success(), "{:?}", outcome.errors);
    let values = outcome.values.expect("values");
    assert_eq!(values.column("name"), Some(strings(&["nut", "washer"]).as_slice()));
    assert_eq!(values.column("qty"), Some(strings(&["10", "25"]).as_slice()));
}

#[tokio::test]
async fn when_a_statement_name_is_unknown_only_that_is_reported() {
    let (_dir, data) = inventory();

    let params = ParamSet::new()
        .with("db", "inventory")
        .with("query", "nope")
        .with("data", "x");
    let outcome = data.get_db_data(params, &data.context()).await;

    assert_eq!(outcome.errors.len(), 1, "{:?}", outcome.errors);
    let record = outcome.errors.iter().next().expect("error");
    assert!(record.is(ErrorCode::DbNoSuchPrepared));
    assert_eq!(record.params, vec!["inventory", "nope"]);
}

#[tokio::test]
async fn when_several_statements_exist_one_must_be_named() {
    let (_dir, data) = inventory();

    let params = ParamSet::new()
        .with("db", "inventory")
        .with("prepared", "")
        .with("data", "x");
    let outcome = data.get_db_data(params, &data.context()).await;

    assert!(outcome.errors.contains(ErrorCode::DbPreparedNotSpecified));
}

#[tokio::test]
async fn when_statements_are_configured_generated_queries_are_refused() {
    // Given: An inventory database that only exposes named statements
    let (_dir, data) = inventory();

    // When: The caller asks for a table directly
    let params = ParamSet::new()
        .with("db", "inventory")
        .with("from", "parts")
        .with("data", "name");
    let outcome = data.get_db_data(params, &data.context()).await;

    // Then: Nothing is read from the table
    let refused = outcome
        .errors
        .iter()
        .find(|record| record.is(ErrorCode::InvalidParam))
        .expect("refused");
    assert_eq!(refused.params[0], "from");
    assert!(outcome.values.is_none());
    assert!(outcome.rows.is_empty());
}

#[tokio::test]
async fn when_parameter_and_type_counts_differ_nothing_runs() {
    let (_dir, data) = inventory();

    let params = ParamSet::new()
        .with("db", "inventory")
        .with("query", "by_name")
        .with("parameters", "bolt, nut")
        .with("types", "s")
        .with("data", "qty");
    let outcome = data.get_db_data(params, &data.context()).await;

    let record = outcome
        .errors
        .iter()
        .find(|record| record.is(ErrorCode::DbParamCountMismatch))
        .expect("count mismatch");
    assert_eq!(record.params, vec!["inventory", "1", "2"]);
}

#[tokio::test]
async fn when_a_statement_returns_no_rows_the_request_fails() {
    let (_dir, data) = inventory();

    let params = ParamSet::new()
        .with("db", "inventory")
        .with("query", "by_name")
        .with("parameters", "sprocket")
        .with("data", "qty");
    let outcome = data.get_db_data(params, &data.context()).await;

    assert!(outcome.errors.contains(ErrorCode::DbNoRows));
    assert!(outcome.values.is_none());
}

// =============================================================================
// Targets
// =============================================================================

#[tokio::test]
async fn when_the_caller_describes_an_unconfigured_database_it_is_used() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("adhoc.duckdb");
    seed(&path);
    let data = ExternalData::new(ConnectorFactory::new(
        Arc::new(Settings::default()),
        None,
        Arc::new(Offline),
    ));

    let params = ParamSet::new()
        .with("db", "adhoc")
        .with("type", "duckdb")
        .with("name", path.to_string_lossy().into_owned())
        .with("prepared", "SELECT count(*) AS n FROM parts")
        .with("data", "n");
    let outcome = data.get_db_data(params, &data.context()).await;

    assert!(outcome.is_success(), "{:?}", outcome.errors);
    assert_eq!(outcome.rows.common_value("n"), Some("3"));
}

#[tokio::test]
async fn when_a_database_is_neither_configured_nor_described_it_is_unknown() {
    let (_dir, data) = inventory();

    let params = ParamSet::new().with("db", "warehouse").with("from", "parts").with("data", "x");
    let outcome = data.get_db_data(params, &data.context()).await;

    assert!(outcome.errors.contains(ErrorCode::DbNoSuchDatabase));
}

#[tokio::test]
async fn when_the_type_is_unsupported_it_is_reported() {
    let (_dir, data) = inventory();

    let params = ParamSet::new()
        .with("db", "legacy")
        .with("type", "oracle")
        .with("name", "orcl")
        .with("from", "parts")
        .with("data", "x");
    let outcome = data.get_db_data(params, &data.context()).await;

    assert!(outcome.errors.contains(ErrorCode::DbUnknownType));
}

#[tokio::test]
async fn when_the_database_file_is_missing_the_connection_fails() {
    let dir = tempdir().expect("tempdir");
    let missing = dir.path().join("gone.duckdb");
    let data = ExternalData::new(ConnectorFactory::new(
        Arc::new(Settings::default()),
        None,
        Arc::new(Offline),
    ));

    let params = ParamSet::new()
        .with("db", "gone")
        .with("type", "duckdb")
        .with("name", missing.to_string_lossy().into_owned())
        .with("from", "parts")
        .with("data", "x");
    let outcome = data.get_db_data(params, &data.context()).await;

    assert!(outcome.errors.contains(ErrorCode::DbCouldNotConnect));
}
