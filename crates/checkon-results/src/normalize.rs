use std::fs;
use std::io;
use std::path::Path;

use checkon_core::{
    CoreError, DependentResult, EnvName, EnvironmentRun, EnvironmentSummary, ProjectUrl,
    RevisionHash, TestSuiteRun,
};
use checkon_matrix::{MatrixReport, junit_report_path, summary_report_path};

use crate::junit::parse_junit;
use crate::summary::parse_tox_summary;

fn read_report(path: &Path, envname: &EnvName) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(contents) => Some(contents),
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(envname = %envname, path = %path.display(), "report not written");
            None
        }
        Err(error) => {
            tracing::warn!(
                envname = %envname,
                path = %path.display(),
                error = %error,
                "failed to read report"
            );
            None
        }
    }
}

fn suites_from(path: &Path, envname: &EnvName) -> Vec<TestSuiteRun> {
    let Some(xml) = read_report(path, envname) else {
        return Vec::new();
    };
    parse_junit(&xml).unwrap_or_else(|error| {
        tracing::warn!(
            envname = %envname,
            path = %path.display(),
            error = %error,
            "ignoring unparseable JUnit report"
        );
        Vec::new()
    })
}

fn summary_from(path: &Path, envname: &EnvName) -> Option<EnvironmentSummary> {
    let json = read_report(path, envname)?;
    parse_tox_summary(&json, envname).unwrap_or_else(|error| {
        tracing::warn!(
            envname = %envname,
            path = %path.display(),
            error = %error,
            "ignoring unparseable tox result JSON"
        );
        None
    })
}

/// Reads one environment's report pair. Missing or malformed files yield an empty run.
pub fn normalize_environment(
    envname: &EnvName,
    junit_xml: &Path,
    summary_json: &Path,
) -> EnvironmentRun {
    EnvironmentRun {
        envname: envname.clone(),
        summary: summary_from(summary_json, envname),
        suites: suites_from(junit_xml, envname),
    }
}

/// Normalizes every environment the matrix attempted, in execution order.
pub fn normalize_report(
    url: &ProjectUrl,
    revision: Option<RevisionHash>,
    report: &MatrixReport,
) -> DependentResult {
    let environments = report
        .environments
        .iter()
        .map(|execution| {
            normalize_environment(
                &execution.envname,
                &execution.junit_xml,
                &execution.summary_json,
            )
        })
        .collect();

    let result = DependentResult {
        url: url.clone(),
        revision,
        environments,
    };
    tracing::info!(
        project_url = %url,
        environments = result.environments.len(),
        test_cases = result.test_case_count(),
        "normalized results"
    );
    result
}

/// Re-reads a saved results directory: each subdirectory is one environment.
///
/// Subdirectories are visited in name order. Only an unreadable `dir` is an error.
pub fn normalize_dir(
    dir: &Path,
    url: &ProjectUrl,
    revision: Option<RevisionHash>,
) -> Result<DependentResult, CoreError> {
    let entries = fs::read_dir(dir).map_err(|error| {
        CoreError::Report(format!(
            "failed to read results directory '{}': {error}",
            dir.display()
        ))
    })?;

    let mut envnames: Vec<EnvName> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_ok_and(|kind| kind.is_dir()))
        .filter_map(|entry| entry.file_name().to_str().map(EnvName::from))
        .collect();
    envnames.sort();

    let environments = envnames
        .iter()
        .map(|envname| {
            normalize_environment(
                envname,
                &junit_report_path(dir, envname),
                &summary_report_path(dir, envname),
            )
        })
        .collect();

    Ok(DependentResult {
        url: url.clone(),
        revision,
        environments,
    })
}
