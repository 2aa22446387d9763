pub mod command;
pub mod diagnostics;
pub mod error;
pub mod identifiers;
pub mod model;
pub mod test_support;
pub mod tox;

pub use command::{
    command_failed, failure_detail, run_checked, spawn_error, validate_command_binary_path,
    CommandRunner, CommandSpec, ProcessCommandRunner, StepOutcome,
};
pub use diagnostics::{CrashContext, DiagnosticsRunner};
pub use error::CoreError;
pub use identifiers::{EnvName, InjectedArtifact, ProjectUrl, RevisionHash};
pub use model::{
    AppSuiteRun, DependentResult, EnvironmentRun, EnvironmentSummary, Failure, FailureKind,
    TestCaseRun, TestOutcome, TestSuiteRun,
};
pub use tox::ToxCommand;
