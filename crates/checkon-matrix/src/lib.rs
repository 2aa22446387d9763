//! Runs a dependent's declared tox matrix against one injected artifact.

mod config;
mod executor;
mod filter;

pub use config::MatrixConfig;
pub use executor::{
    EnvironmentExecution, ExecutionStatus, MatrixExecutor, MatrixReport, junit_report_path,
    summary_report_path,
};
pub use filter::{filter_environments, parse_environment_listing};
