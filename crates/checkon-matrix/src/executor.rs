use std::fs;
use std::path::{Path, PathBuf};

use checkon_core::{
    CommandRunner, CoreError, EnvName, InjectedArtifact, StepOutcome, ToxCommand, failure_detail,
    run_checked, spawn_error, validate_command_binary_path,
};
use serde::Serialize;

use crate::config::MatrixConfig;
use crate::filter::{filter_environments, parse_environment_listing};

pub fn junit_report_path(results_dir: &Path, envname: &EnvName) -> PathBuf {
    results_dir
        .join(envname.as_str())
        .join(format!("test_{envname}.xml"))
}

pub fn summary_report_path(results_dir: &Path, envname: &EnvName) -> PathBuf {
    results_dir
        .join(envname.as_str())
        .join(format!("tox_{envname}.json"))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// tox exited zero.
    Completed,
    Failed {
        exit_code: Option<i32>,
        detail: String,
    },
    SpawnFailed {
        detail: String,
    },
}

impl ExecutionStatus {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentExecution {
    pub envname: EnvName,
    pub junit_xml: PathBuf,
    pub summary_json: PathBuf,
    pub status: ExecutionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatrixReport {
    pub results_dir: PathBuf,
    pub shim: StepOutcome,
    pub injection: StepOutcome,
    pub environments: Vec<EnvironmentExecution>,
}

impl MatrixReport {
    pub fn failed_environments(&self) -> impl Iterator<Item = &EnvironmentExecution> {
        self.environments
            .iter()
            .filter(|execution| !execution.status.is_completed())
    }
}

pub struct MatrixExecutor<R: CommandRunner> {
    runner: R,
    config: MatrixConfig,
    tox: ToxCommand,
}

impl<R: CommandRunner> MatrixExecutor<R> {
    pub fn new(
        runner: R,
        config: MatrixConfig,
        allow_unsafe_command_paths: bool,
    ) -> Result<Self, CoreError> {
        validate_command_binary_path(&config.python, "tox.python", allow_unsafe_command_paths)?;
        if config.install_shim && config.shim_package.trim().is_empty() {
            return Err(CoreError::Configuration(
                "tox.shim_package is empty while tox.install_shim is enabled.".to_owned(),
            ));
        }
        let tox = ToxCommand::new(&config.python);
        Ok(Self {
            runner,
            config,
            tox,
        })
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn config(&self) -> &MatrixConfig {
        &self.config
    }

    /// The in-environment command that installs the result-capturing shim, if enabled.
    pub fn shim_command(&self) -> Option<String> {
        self.config
            .install_shim
            .then(|| format!("python -m pip install {}", self.config.shim_package.trim()))
    }

    /// The in-environment command that installs `artifact` over the project's own pins.
    pub fn injection_command(&self, artifact: &InjectedArtifact) -> Result<String, CoreError> {
        let quoted = shlex::try_quote(artifact.install_spec()).map_err(|error| {
            CoreError::ArtifactResolution(format!(
                "'{}' cannot be passed to pip: {error}",
                artifact.install_spec().escape_debug()
            ))
        })?;
        let force = if self.config.force_reinstall {
            " --force-reinstall"
        } else {
            ""
        };
        Ok(format!("python -m pip install{force} {quoted}"))
    }

    /// Runs the whole matrix for one (workspace, artifact) pair.
    ///
    /// Only a failure to list the declared environments is returned as an error;
    /// shim, injection and per-environment failures are recorded in the report.
    pub fn run(
        &self,
        workspace: &Path,
        artifact: &InjectedArtifact,
        results_dir: &Path,
    ) -> Result<MatrixReport, CoreError> {
        let injection_command = self.injection_command(artifact)?;

        let shim = match self.shim_command() {
            Some(command) => {
                let outcome =
                    StepOutcome::run(&self.runner, &self.tox.run_command(workspace, &command));
                if let StepOutcome::Failed { exit_code, detail } = &outcome {
                    tracing::warn!(
                        workspace = %workspace.display(),
                        exit_code = ?exit_code,
                        detail = %detail,
                        "shim install failed; structured capture may be missing"
                    );
                }
                outcome
            }
            None => StepOutcome::Skipped,
        };

        let injection = StepOutcome::run(
            &self.runner,
            &self.tox.run_command(workspace, &injection_command),
        );
        if let StepOutcome::Failed { exit_code, detail } = &injection {
            tracing::warn!(
                workspace = %workspace.display(),
                artifact = %artifact,
                exit_code = ?exit_code,
                detail = %detail,
                "artifact injection failed"
            );
        }

        let listing = run_checked(&self.runner, &self.tox.list_environments(workspace))?;
        let declared = parse_environment_listing(&String::from_utf8_lossy(&listing.stdout));
        let kept = filter_environments(&declared, &self.config.selected_environments);
        tracing::info!(
            workspace = %workspace.display(),
            declared = declared.len(),
            kept = kept.len(),
            "running environments"
        );

        let environments = kept
            .into_iter()
            .map(|envname| self.run_environment(workspace, results_dir, envname))
            .collect();

        Ok(MatrixReport {
            results_dir: results_dir.to_path_buf(),
            shim,
            injection,
            environments,
        })
    }

    fn run_environment(
        &self,
        workspace: &Path,
        results_dir: &Path,
        envname: EnvName,
    ) -> EnvironmentExecution {
        let junit_xml = junit_report_path(results_dir, &envname);
        let summary_json = summary_report_path(results_dir, &envname);
        let status = self.execute(workspace, results_dir, &envname, &junit_xml, &summary_json);

        match &status {
            ExecutionStatus::Completed => {
                tracing::info!(envname = %envname, "environment completed");
            }
            ExecutionStatus::Failed { exit_code, detail } => {
                tracing::warn!(
                    envname = %envname,
                    exit_code = ?exit_code,
                    detail = %detail,
                    "environment run failed"
                );
            }
            ExecutionStatus::SpawnFailed { detail } => {
                tracing::warn!(
                    envname = %envname,
                    detail = %detail,
                    "environment run could not start"
                );
            }
        }

        EnvironmentExecution {
            envname,
            junit_xml,
            summary_json,
            status,
        }
    }

    fn execute(
        &self,
        workspace: &Path,
        results_dir: &Path,
        envname: &EnvName,
        junit_xml: &Path,
        summary_json: &Path,
    ) -> ExecutionStatus {
        let env_dir = results_dir.join(envname.as_str());
        if let Err(error) = fs::create_dir_all(&env_dir) {
            return ExecutionStatus::SpawnFailed {
                detail: format!(
                    "failed to create report directory '{}': {error}",
                    env_dir.display()
                ),
            };
        }

        let spec = self.tox.run_environment(
            workspace,
            envname.as_str(),
            summary_json,
            junit_xml,
            &self.config.pytest_addopts,
        );
        match self.runner.run(&spec) {
            Ok(output) if output.status.success() => ExecutionStatus::Completed,
            Ok(output) => ExecutionStatus::Failed {
                exit_code: output.status.code(),
                detail: failure_detail(&output),
            },
            Err(error) => ExecutionStatus::SpawnFailed {
                detail: spawn_error(&spec, &error).to_string(),
            },
        }
    }
}
