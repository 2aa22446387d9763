use std::path::Path;

use checkon_core::{AppSuiteRun, CoreError, EnvironmentRun, TestCaseRun, TestOutcome, TestSuiteRun};
use rusqlite::{Connection, OptionalExtension, Transaction, params};

use crate::query::{ComparisonRecord, RowFilter, comparison_records};
use crate::schema;

/// Accumulates results from many (project, artifact) runs in one database.
pub struct SqliteResultStore {
    conn: Connection,
}

impl SqliteResultStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let mut conn =
            Connection::open(path).map_err(|err| CoreError::Persistence(err.to_string()))?;
        schema::bootstrap(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self, CoreError> {
        let mut conn =
            Connection::open_in_memory().map_err(|err| CoreError::Persistence(err.to_string()))?;
        schema::bootstrap(&mut conn)?;
        Ok(Self { conn })
    }

    pub fn schema_version(&self) -> Result<u32, CoreError> {
        schema::current_schema_version(&self.conn)
    }

    /// Writes one run's full hierarchy in a single transaction.
    ///
    /// A run already stored under the same (provider, revision, application) key is
    /// replaced. Returns the new `tox_run_id`.
    pub fn insert_result(&mut self, run: &AppSuiteRun) -> Result<i64, CoreError> {
        let provider = run.dependent_result.url.as_str();
        let revision = run
            .dependent_result
            .revision
            .as_ref()
            .map(|revision| revision.as_str())
            .unwrap_or_default();
        let application = run.injected.install_spec();

        let tx = self
            .conn
            .transaction()
            .map_err(|err| CoreError::Persistence(err.to_string()))?;

        let replaced = Self::delete_existing_tx(&tx, provider, revision, application)?;

        tx.execute(
            "
            INSERT INTO tox_run (provider, revision, application, recorded_at)
            VALUES (?1, ?2, ?3, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            ",
            params![provider, revision, application],
        )
        .map_err(|err| CoreError::Persistence(err.to_string()))?;
        let tox_run_id = tx.last_insert_rowid();

        for environment in &run.dependent_result.environments {
            Self::insert_environment_tx(&tx, tox_run_id, environment)?;
        }

        tx.commit()
            .map_err(|err| CoreError::Persistence(err.to_string()))?;

        tracing::info!(
            project_url = %provider,
            artifact = %application,
            tox_run_id,
            replaced,
            test_cases = run.dependent_result.test_case_count(),
            "stored run"
        );
        Ok(tox_run_id)
    }

    pub fn comparison_records(
        &self,
        filter: RowFilter,
    ) -> Result<Vec<ComparisonRecord>, CoreError> {
        comparison_records(&self.conn, filter)
    }

    pub fn count_runs(&self) -> Result<usize, CoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tox_run", [], |row| row.get(0))
            .map_err(|err| CoreError::Persistence(err.to_string()))?;
        usize::try_from(count).map_err(|_| {
            CoreError::Persistence(format!("run count '{count}' cannot be represented as usize"))
        })
    }

    fn delete_existing_tx(
        tx: &Transaction<'_>,
        provider: &str,
        revision: &str,
        application: &str,
    ) -> Result<bool, CoreError> {
        let existing: Option<i64> = tx
            .query_row(
                "SELECT tox_run_id FROM tox_run WHERE provider = ?1 AND revision = ?2 AND application = ?3",
                params![provider, revision, application],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| CoreError::Persistence(err.to_string()))?;
        let Some(tox_run_id) = existing else {
            return Ok(false);
        };

        let mut stmt = tx
            .prepare(
                "
                SELECT tf.test_failure_id, tf.failure_output_id
                FROM test_case_run tcr
                JOIN test_failure tf ON tf.test_failure_id = tcr.test_failure_id
                JOIN test_suite_run tsr ON tsr.test_suite_run_id = tcr.test_suite_run_id
                JOIN toxenv_run ter ON ter.toxenv_run_id = tsr.toxenv_run_id
                WHERE ter.tox_run_id = ?1
                ",
            )
            .map_err(|err| CoreError::Persistence(err.to_string()))?;
        let failures = stmt
            .query_map(params![tox_run_id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|err| CoreError::Persistence(err.to_string()))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| CoreError::Persistence(err.to_string()))?;
        drop(stmt);

        // Cascades through toxenv_run, test_suite_run and test_case_run.
        tx.execute("DELETE FROM tox_run WHERE tox_run_id = ?1", params![tox_run_id])
            .map_err(|err| CoreError::Persistence(err.to_string()))?;

        for (test_failure_id, failure_output_id) in failures {
            tx.execute(
                "DELETE FROM test_failure WHERE test_failure_id = ?1",
                params![test_failure_id],
            )
            .map_err(|err| CoreError::Persistence(err.to_string()))?;
            tx.execute(
                "DELETE FROM failure_output WHERE failure_output_id = ?1",
                params![failure_output_id],
            )
            .map_err(|err| CoreError::Persistence(err.to_string()))?;
        }

        Ok(true)
    }

    fn insert_environment_tx(
        tx: &Transaction<'_>,
        tox_run_id: i64,
        environment: &EnvironmentRun,
    ) -> Result<(), CoreError> {
        let setup_succeeded = environment.summary.map(|summary| summary.setup_succeeded);
        let exit_code = environment
            .summary
            .and_then(|summary| summary.test_exit_code);
        tx.execute(
            "
            INSERT INTO toxenv_run (tox_run_id, envname, setup_succeeded, exit_code)
            VALUES (?1, ?2, ?3, ?4)
            ",
            params![
                tox_run_id,
                environment.envname.as_str(),
                setup_succeeded,
                exit_code
            ],
        )
        .map_err(|err| CoreError::Persistence(err.to_string()))?;
        let toxenv_run_id = tx.last_insert_rowid();

        for suite in &environment.suites {
            Self::insert_suite_tx(tx, toxenv_run_id, suite)?;
        }
        Ok(())
    }

    fn insert_suite_tx(
        tx: &Transaction<'_>,
        toxenv_run_id: i64,
        suite: &TestSuiteRun,
    ) -> Result<(), CoreError> {
        tx.execute(
            "
            INSERT INTO test_suite_run (toxenv_run_id, name, tests, failures, errors, skipped)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                toxenv_run_id,
                suite.name,
                count_param(suite.test_cases.len())?,
                count_param(suite.count(TestOutcome::Failed))?,
                count_param(suite.count(TestOutcome::Errored))?,
                count_param(suite.count(TestOutcome::Skipped))?,
            ],
        )
        .map_err(|err| CoreError::Persistence(err.to_string()))?;
        let test_suite_run_id = tx.last_insert_rowid();

        for case in &suite.test_cases {
            Self::insert_case_tx(tx, test_suite_run_id, case)?;
        }
        Ok(())
    }

    fn insert_case_tx(
        tx: &Transaction<'_>,
        test_suite_run_id: i64,
        case: &TestCaseRun,
    ) -> Result<(), CoreError> {
        let test_case_id = Self::test_case_id_tx(tx, case)?;

        let test_failure_id = match &case.failure {
            Some(failure) => {
                tx.execute(
                    "INSERT INTO failure_output (message, text) VALUES (?1, ?2)",
                    params![failure.message, failure.text],
                )
                .map_err(|err| CoreError::Persistence(err.to_string()))?;
                let failure_output_id = tx.last_insert_rowid();
                tx.execute(
                    "INSERT INTO test_failure (kind, failure_type, failure_output_id) VALUES (?1, ?2, ?3)",
                    params![failure.kind.as_key(), failure.failure_type, failure_output_id],
                )
                .map_err(|err| CoreError::Persistence(err.to_string()))?;
                Some(tx.last_insert_rowid())
            }
            None => None,
        };

        tx.execute(
            "
            INSERT INTO test_case_run (test_suite_run_id, test_case_id, test_failure_id, outcome, duration_secs)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![
                test_suite_run_id,
                test_case_id,
                test_failure_id,
                case.outcome.as_key(),
                case.duration_secs
            ],
        )
        .map_err(|err| CoreError::Persistence(err.to_string()))?;
        Ok(())
    }

    /// Test case identities are shared across runs so cases line up between artifacts.
    fn test_case_id_tx(tx: &Transaction<'_>, case: &TestCaseRun) -> Result<i64, CoreError> {
        let existing: Option<i64> = tx
            .query_row(
                "
                SELECT test_case_id FROM test_case
                WHERE name = ?1 AND classname IS ?2 AND file IS ?3 AND line IS ?4
                ",
                params![case.name, case.classname, case.file, case.line],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| CoreError::Persistence(err.to_string()))?;
        if let Some(id) = existing {
            return Ok(id);
        }

        tx.execute(
            "INSERT INTO test_case (classname, name, file, line) VALUES (?1, ?2, ?3, ?4)",
            params![case.classname, case.name, case.file, case.line],
        )
        .map_err(|err| CoreError::Persistence(err.to_string()))?;
        Ok(tx.last_insert_rowid())
    }
}

fn count_param(count: usize) -> Result<i64, CoreError> {
    i64::try_from(count).map_err(|_| {
        CoreError::Persistence(format!("count '{count}' exceeds SQLite integer range"))
    })
}
