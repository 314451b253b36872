use ::duckdb::Connection;

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_table_cache",
        sql: r#"
CREATE TABLE IF NOT EXISTS table_cache (
    fingerprint TEXT PRIMARY KEY,
    source_kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    retrieved_at BIGINT NOT NULL,
    ttl_secs BIGINT NOT NULL
);
"#,
    },
    Migration {
        version: "0002_table_cache_expiry_index",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_table_cache_retrieved_at ON table_cache(retrieved_at);
"#,
    },
];

/// Creates the cache schema if it does not exist yet.
pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            [migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                [migration.version],
            )?;
        }
    }

    Ok(())
}
