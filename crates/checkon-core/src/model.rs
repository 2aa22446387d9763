use serde::{Deserialize, Serialize};

use crate::identifiers::{EnvName, InjectedArtifact, ProjectUrl, RevisionHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Passed,
    Failed,
    Errored,
    Skipped,
}

impl TestOutcome {
    pub const fn as_key(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Errored => "errored",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "passed" => Some(Self::Passed),
            "failed" => Some(Self::Failed),
            "errored" => Some(Self::Errored),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An assertion failure (`<failure>`).
    Failure,
    /// An unexpected exception (`<error>`).
    Error,
}

impl FailureKind {
    pub const fn as_key(self) -> &'static str {
        match self {
            Self::Failure => "failure",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub failure_type: Option<String>,
    pub message: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseRun {
    pub classname: Option<String>,
    pub name: String,
    pub file: Option<String>,
    pub line: Option<i64>,
    pub duration_secs: Option<f64>,
    pub outcome: TestOutcome,
    pub failure: Option<Failure>,
}

impl TestCaseRun {
    pub fn passed(classname: Option<&str>, name: &str, line: Option<i64>) -> Self {
        Self {
            classname: classname.map(ToOwned::to_owned),
            name: name.to_owned(),
            file: None,
            line,
            duration_secs: None,
            outcome: TestOutcome::Passed,
            failure: None,
        }
    }

    pub fn with_failure(mut self, failure: Failure) -> Self {
        self.outcome = match failure.kind {
            FailureKind::Failure => TestOutcome::Failed,
            FailureKind::Error => TestOutcome::Errored,
        };
        self.failure = Some(failure);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuiteRun {
    pub name: Option<String>,
    pub test_cases: Vec<TestCaseRun>,
}

impl TestSuiteRun {
    pub fn count(&self, outcome: TestOutcome) -> usize {
        self.test_cases
            .iter()
            .filter(|case| case.outcome == outcome)
            .count()
    }
}

/// Setup and test exit status for one environment, taken from the tox result JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnvironmentSummary {
    pub setup_succeeded: bool,
    pub test_exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentRun {
    pub envname: EnvName,
    pub summary: Option<EnvironmentSummary>,
    pub suites: Vec<TestSuiteRun>,
}

impl EnvironmentRun {
    pub fn test_cases(&self) -> impl Iterator<Item = &TestCaseRun> {
        self.suites.iter().flat_map(|suite| suite.test_cases.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependentResult {
    pub url: ProjectUrl,
    pub revision: Option<RevisionHash>,
    pub environments: Vec<EnvironmentRun>,
}

impl DependentResult {
    pub fn test_case_count(&self) -> usize {
        self.environments
            .iter()
            .map(|environment| environment.test_cases().count())
            .sum()
    }
}

/// One dependent's normalized results under one injected artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppSuiteRun {
    pub injected: InjectedArtifact,
    pub dependent_result: DependentResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_keys_roundtrip() {
        for outcome in [
            TestOutcome::Passed,
            TestOutcome::Failed,
            TestOutcome::Errored,
            TestOutcome::Skipped,
        ] {
            assert_eq!(TestOutcome::from_key(outcome.as_key()), Some(outcome));
        }
        assert_eq!(TestOutcome::from_key("xfail"), None);
    }

    #[test]
    fn attaching_an_error_marks_the_case_errored() {
        let case = TestCaseRun::passed(Some("tests.test_api"), "test_boot", Some(3)).with_failure(
            Failure {
                kind: FailureKind::Error,
                failure_type: Some("ImportError".to_owned()),
                message: Some("no module named libx".to_owned()),
                text: None,
            },
        );
        assert_eq!(case.outcome, TestOutcome::Errored);
    }

    #[test]
    fn dependent_result_counts_cases_across_environments() {
        let suite = TestSuiteRun {
            name: Some("pytest".to_owned()),
            test_cases: vec![
                TestCaseRun::passed(None, "test_a", None),
                TestCaseRun::passed(None, "test_b", None),
            ],
        };
        let result = DependentResult {
            url: ProjectUrl::new("https://example.com/dep"),
            revision: None,
            environments: vec![
                EnvironmentRun {
                    envname: EnvName::new("py311"),
                    summary: None,
                    suites: vec![suite.clone()],
                },
                EnvironmentRun {
                    envname: EnvName::new("py312"),
                    summary: None,
                    suites: vec![suite],
                },
            ],
        };
        assert_eq!(result.test_case_count(), 4);
    }
}
