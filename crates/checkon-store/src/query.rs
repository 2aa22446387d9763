use checkon_core::{CoreError, TestOutcome};
use rusqlite::{Connection, params};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowFilter {
    #[default]
    All,
    /// Only case runs that recorded a failure or error.
    ///
    /// A failure stored without text is still included, so a `<failure>` element
    /// carrying only a message is not hidden along with the passing cases.
    FailuresOnly,
}

/// One test case run joined with its environment, run and failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRecord {
    pub envname: String,
    pub injected_artifact: String,
    pub classname: Option<String>,
    pub case_name: String,
    pub line: Option<i64>,
    pub provider: String,
    pub failure_message: Option<String>,
    pub failure_text: Option<String>,
    pub outcome: TestOutcome,
}

const COMPARISON_SQL: &str = "
    SELECT
        ter.envname,
        tr.application,
        tc.classname,
        tc.name,
        tc.line,
        tr.provider,
        fo.message,
        fo.text,
        tcr.outcome
    FROM test_case_run tcr
    JOIN test_suite_run tsr ON tsr.test_suite_run_id = tcr.test_suite_run_id
    JOIN toxenv_run ter ON ter.toxenv_run_id = tsr.toxenv_run_id
    JOIN tox_run tr ON tr.tox_run_id = ter.tox_run_id
    JOIN test_case tc ON tc.test_case_id = tcr.test_case_id
    LEFT JOIN test_failure tf ON tf.test_failure_id = tcr.test_failure_id
    LEFT JOIN failure_output fo ON fo.failure_output_id = tf.failure_output_id
    WHERE (?1 = 0 OR tcr.test_failure_id IS NOT NULL)
    ORDER BY
        ter.envname,
        tr.application,
        tc.classname,
        tc.line,
        tc.name,
        tr.provider,
        tcr.test_case_run_id
";

pub(crate) fn comparison_records(
    conn: &Connection,
    filter: RowFilter,
) -> Result<Vec<ComparisonRecord>, CoreError> {
    let failures_only = matches!(filter, RowFilter::FailuresOnly);
    let mut stmt = conn
        .prepare(COMPARISON_SQL)
        .map_err(|err| CoreError::Persistence(err.to_string()))?;

    let rows = stmt
        .query_map(params![failures_only], |row| {
            let outcome: String = row.get(8)?;
            Ok((
                ComparisonRecord {
                    envname: row.get(0)?,
                    injected_artifact: row.get(1)?,
                    classname: row.get(2)?,
                    case_name: row.get(3)?,
                    line: row.get(4)?,
                    provider: row.get(5)?,
                    failure_message: row.get(6)?,
                    failure_text: row.get(7)?,
                    outcome: TestOutcome::Passed,
                },
                outcome,
            ))
        })
        .map_err(|err| CoreError::Persistence(err.to_string()))?;

    let mut records = Vec::new();
    for row in rows {
        let (mut record, outcome) = row.map_err(|err| CoreError::Persistence(err.to_string()))?;
        record.outcome = TestOutcome::from_key(&outcome).ok_or_else(|| {
            CoreError::Persistence(format!("unknown test outcome '{outcome}' in result store"))
        })?;
        records.push(record);
    }

    tracing::debug!(rows = records.len(), ?filter, "comparison query");
    Ok(records)
}
