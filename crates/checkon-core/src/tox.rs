//! Builders for the tox invocations the pipeline issues.
//!
//! Every spec removes [`ENV_TOXENV`]: an inherited selection would otherwise narrow
//! installation and listing to whatever environments the caller's shell selected.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::command::CommandSpec;

pub const ENV_TOXENV: &str = "TOXENV";
pub const ENV_TOX_TESTENV_PASSENV: &str = "TOX_TESTENV_PASSENV";
pub const ENV_PYTEST_ADDOPTS: &str = "PYTEST_ADDOPTS";
pub const ENV_JUNITXML_PATH: &str = "JUNITXML_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToxCommand {
    python: PathBuf,
}

impl ToxCommand {
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
        }
    }

    pub fn python(&self) -> &Path {
        &self.python
    }

    fn base(&self, project_dir: &Path) -> CommandSpec {
        CommandSpec::new(self.python.to_string_lossy())
            .args(["-m", "tox"])
            .current_dir(project_dir)
            .env_remove(ENV_TOXENV)
    }

    /// Creates every declared environment and installs its dependencies without running tests.
    pub fn setup(&self, project_dir: &Path, result_json: &Path) -> CommandSpec {
        self.base(project_dir)
            .arg("--notest")
            .arg("-c")
            .arg(project_dir.as_os_str())
            .arg("--result-json")
            .arg(result_json.as_os_str())
    }

    /// Runs a shell command inside every declared environment.
    pub fn run_command(&self, project_dir: &Path, command: &str) -> CommandSpec {
        self.base(project_dir).arg("--run-command").arg(command)
    }

    pub fn list_environments(&self, project_dir: &Path) -> CommandSpec {
        self.base(project_dir).arg("-l")
    }

    /// Runs one environment's test suite with structured report capture.
    pub fn run_environment(
        &self,
        project_dir: &Path,
        envname: &str,
        summary_json: &Path,
        junit_xml: &Path,
        pytest_addopts: &str,
    ) -> CommandSpec {
        let mut addopts = OsString::new();
        let trimmed = pytest_addopts.trim();
        if !trimmed.is_empty() {
            addopts.push(trimmed);
            addopts.push(" ");
        }
        addopts.push("--junitxml=");
        addopts.push(junit_xml.as_os_str());

        self.base(project_dir)
            .arg("--result-json")
            .arg(summary_json.as_os_str())
            .arg("-e")
            .arg(envname)
            .env(ENV_TOX_TESTENV_PASSENV, ENV_PYTEST_ADDOPTS)
            .env(ENV_PYTEST_ADDOPTS, addopts)
            .env(ENV_JUNITXML_PATH, junit_xml.as_os_str())
    }
}
