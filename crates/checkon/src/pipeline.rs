use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use checkon_core::{AppSuiteRun, CommandRunner, CoreError, InjectedArtifact, ProjectUrl};
use checkon_matrix::{MatrixConfig, MatrixExecutor, MatrixReport};
use checkon_results::normalize_report;
use checkon_store::{ComparisonRecord, RowFilter, SqliteResultStore};
use checkon_workspace::{PreparedWorkspace, RevisionCache, WorkspaceManager};
use serde::Serialize;

use crate::inject::resolve_inject;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub git_binary: PathBuf,
    /// Parent of the per-run report directories.
    pub results_root: PathBuf,
    pub matrix: MatrixConfig,
    pub allow_unsafe_command_paths: bool,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub prepared: PreparedWorkspace,
    pub matrix: MatrixReport,
    pub run: AppSuiteRun,
}

#[derive(Debug)]
pub struct PairFailure {
    pub project_url: ProjectUrl,
    pub artifact: InjectedArtifact,
    pub error: CoreError,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub completed: Vec<RunOutcome>,
    pub failed: Vec<PairFailure>,
}

#[derive(Debug, Default, Serialize)]
pub struct Comparison {
    pub records: Vec<ComparisonRecord>,
    #[serde(skip)]
    pub failures: Vec<PairFailure>,
}

/// Drives (project, artifact) pairs through checkout, matrix execution and normalization.
pub struct Pipeline<R: CommandRunner, C: RevisionCache> {
    workspaces: WorkspaceManager<Arc<R>, C>,
    matrix: MatrixExecutor<Arc<R>>,
    results_root: PathBuf,
}

impl<R: CommandRunner, C: RevisionCache> Pipeline<R, C> {
    pub fn new(runner: Arc<R>, cache: C, settings: PipelineSettings) -> Result<Self, CoreError> {
        let workspaces = WorkspaceManager::new(
            Arc::clone(&runner),
            cache,
            settings.git_binary,
            settings.matrix.python.clone(),
            settings.allow_unsafe_command_paths,
        )?;
        let matrix = MatrixExecutor::new(
            runner,
            settings.matrix,
            settings.allow_unsafe_command_paths,
        )?;

        Ok(Self {
            workspaces,
            matrix,
            results_root: settings.results_root,
        })
    }

    pub fn workspaces(&self) -> &WorkspaceManager<Arc<R>, C> {
        &self.workspaces
    }

    /// Runs one project against one already-resolved artifact.
    pub fn run_one(
        &self,
        project_url: &ProjectUrl,
        artifact: &InjectedArtifact,
    ) -> Result<RunOutcome, CoreError> {
        let results_dir = self.allocate_results_dir()?;
        tracing::info!(
            project_url = %project_url,
            artifact = %artifact,
            results_dir = %results_dir.display(),
            "starting run"
        );

        let prepared = self.workspaces.prepare(project_url, &results_dir)?;
        let matrix = self.matrix.run(&prepared.path, artifact, &results_dir)?;
        let dependent_result =
            normalize_report(project_url, Some(prepared.revision.clone()), &matrix);

        Ok(RunOutcome {
            prepared,
            matrix,
            run: AppSuiteRun {
                injected: artifact.clone(),
                dependent_result,
            },
        })
    }

    /// Runs every project against one artifact, collecting per-project failures.
    ///
    /// Errors that make the whole run meaningless are returned instead.
    pub fn run_many(
        &self,
        project_urls: &[ProjectUrl],
        artifact: &InjectedArtifact,
    ) -> Result<RunSummary, CoreError> {
        let mut summary = RunSummary::default();
        for project_url in project_urls {
            match self.run_one(project_url, artifact) {
                Ok(outcome) => summary.completed.push(outcome),
                Err(error) if error.is_run_fatal() => return Err(error),
                Err(error) => {
                    tracing::warn!(
                        project_url = %project_url,
                        artifact = %artifact,
                        error = %error,
                        "project skipped"
                    );
                    summary.failed.push(PairFailure {
                        project_url: project_url.clone(),
                        artifact: artifact.clone(),
                        error,
                    });
                }
            }
        }
        Ok(summary)
    }

    /// Runs every (artifact, project) pair, stores each result as soon as it is
    /// collected and returns the comparison rows.
    ///
    /// All specifiers are resolved before any project is touched. A fatal error
    /// stops the comparison but leaves the runs stored so far in place.
    pub fn compare(
        &self,
        project_urls: &[ProjectUrl],
        inject_specs: &[String],
        store: &mut SqliteResultStore,
        filter: RowFilter,
    ) -> Result<Comparison, CoreError> {
        let artifacts = inject_specs
            .iter()
            .map(|spec| resolve_inject(spec))
            .collect::<Result<Vec<_>, _>>()?;

        let mut failures = Vec::new();
        for artifact in &artifacts {
            for project_url in project_urls {
                match self.run_one(project_url, artifact) {
                    Ok(outcome) => {
                        let run_id = store.insert_result(&outcome.run)?;
                        tracing::debug!(
                            run_id,
                            project_url = %project_url,
                            artifact = %artifact,
                            "stored run"
                        );
                    }
                    Err(error) if error.is_run_fatal() => return Err(error),
                    Err(error) => {
                        tracing::warn!(
                            project_url = %project_url,
                            artifact = %artifact,
                            error = %error,
                            "project skipped"
                        );
                        failures.push(PairFailure {
                            project_url: project_url.clone(),
                            artifact: artifact.clone(),
                            error,
                        });
                    }
                }
            }
        }

        let records = store.comparison_records(filter)?;
        Ok(Comparison { records, failures })
    }

    fn allocate_results_dir(&self) -> Result<PathBuf, CoreError> {
        fs::create_dir_all(&self.results_root)
            .map_err(|error| results_root_error(&self.results_root, &error))?;
        let dir = tempfile::Builder::new()
            .prefix("run-")
            .tempdir_in(&self.results_root)
            .map_err(|error| results_root_error(&self.results_root, &error))?;
        Ok(dir.keep())
    }
}

fn results_root_error(root: &Path, error: &std::io::Error) -> CoreError {
    CoreError::Configuration(format!(
        "results_root '{}' is not writable: {error}",
        root.display()
    ))
}
