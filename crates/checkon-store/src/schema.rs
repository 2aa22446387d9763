use rusqlite::{Connection, OptionalExtension, Transaction, params};

use checkon_core::CoreError;

pub const CURRENT_SCHEMA_VERSION: u32 = 1;

pub(crate) fn bootstrap(conn: &mut Connection) -> Result<(), CoreError> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(|err| CoreError::Persistence(err.to_string()))?;

    let current = current_schema_version(conn)?;
    if current > CURRENT_SCHEMA_VERSION {
        return Err(CoreError::UnsupportedSchemaVersion {
            supported: CURRENT_SCHEMA_VERSION,
            found: current,
        });
    }

    apply_pending_migrations(conn, current)
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, CoreError> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
        params![name],
        |_| Ok(()),
    )
    .optional()
    .map(|opt| opt.is_some())
    .map_err(|err| CoreError::Persistence(err.to_string()))
}

pub(crate) fn current_schema_version(conn: &Connection) -> Result<u32, CoreError> {
    if !table_exists(conn, "schema_migrations")? {
        return Ok(0);
    }

    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|err| CoreError::Persistence(err.to_string()))
}

fn apply_pending_migrations(conn: &mut Connection, current: u32) -> Result<(), CoreError> {
    for version in (current + 1)..=CURRENT_SCHEMA_VERSION {
        let tx = conn
            .transaction()
            .map_err(|err| CoreError::Persistence(err.to_string()))?;
        apply_migration(&tx, version)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))",
            params![version],
        )
        .map_err(|err| CoreError::Persistence(err.to_string()))?;
        tx.commit()
            .map_err(|err| CoreError::Persistence(err.to_string()))?;
        tracing::debug!(version, "applied result store migration");
    }

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: u32) -> Result<(), CoreError> {
    match version {
        1 => tx
            .execute_batch(
                "
                CREATE TABLE schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );

                CREATE TABLE tox_run (
                    tox_run_id INTEGER PRIMARY KEY,
                    provider TEXT NOT NULL,
                    revision TEXT NOT NULL DEFAULT '',
                    application TEXT NOT NULL,
                    recorded_at TEXT NOT NULL,
                    UNIQUE(provider, revision, application)
                );

                CREATE TABLE toxenv_run (
                    toxenv_run_id INTEGER PRIMARY KEY,
                    tox_run_id INTEGER NOT NULL,
                    envname TEXT NOT NULL,
                    setup_succeeded INTEGER NULL,
                    exit_code INTEGER NULL,
                    UNIQUE(tox_run_id, envname),
                    FOREIGN KEY(tox_run_id) REFERENCES tox_run(tox_run_id) ON DELETE CASCADE
                );

                CREATE TABLE test_suite_run (
                    test_suite_run_id INTEGER PRIMARY KEY,
                    toxenv_run_id INTEGER NOT NULL,
                    name TEXT NULL,
                    tests INTEGER NOT NULL,
                    failures INTEGER NOT NULL,
                    errors INTEGER NOT NULL,
                    skipped INTEGER NOT NULL,
                    FOREIGN KEY(toxenv_run_id) REFERENCES toxenv_run(toxenv_run_id) ON DELETE CASCADE
                );

                CREATE TABLE test_case (
                    test_case_id INTEGER PRIMARY KEY,
                    classname TEXT NULL,
                    name TEXT NOT NULL,
                    file TEXT NULL,
                    line INTEGER NULL
                );

                CREATE TABLE failure_output (
                    failure_output_id INTEGER PRIMARY KEY,
                    message TEXT NULL,
                    text TEXT NULL
                );

                CREATE TABLE test_failure (
                    test_failure_id INTEGER PRIMARY KEY,
                    kind TEXT NOT NULL,
                    failure_type TEXT NULL,
                    failure_output_id INTEGER NOT NULL,
                    FOREIGN KEY(failure_output_id) REFERENCES failure_output(failure_output_id)
                );

                CREATE TABLE test_case_run (
                    test_case_run_id INTEGER PRIMARY KEY,
                    test_suite_run_id INTEGER NOT NULL,
                    test_case_id INTEGER NOT NULL,
                    test_failure_id INTEGER NULL,
                    outcome TEXT NOT NULL,
                    duration_secs REAL NULL,
                    FOREIGN KEY(test_suite_run_id) REFERENCES test_suite_run(test_suite_run_id) ON DELETE CASCADE,
                    FOREIGN KEY(test_case_id) REFERENCES test_case(test_case_id),
                    FOREIGN KEY(test_failure_id) REFERENCES test_failure(test_failure_id)
                );

                CREATE INDEX idx_test_case_identity ON test_case(name, classname, line);
                CREATE INDEX idx_toxenv_run_tox_run ON toxenv_run(tox_run_id);
                CREATE INDEX idx_test_suite_run_toxenv_run ON test_suite_run(toxenv_run_id);
                CREATE INDEX idx_test_case_run_suite ON test_case_run(test_suite_run_id);
                ",
            )
            .map_err(|err| CoreError::Persistence(err.to_string())),
        other => Err(CoreError::Persistence(format!(
            "no migration defined for result store schema version {other}"
        ))),
    }
}
