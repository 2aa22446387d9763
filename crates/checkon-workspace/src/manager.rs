use std::ffi::OsString;
use std::path::{Path, PathBuf};

use checkon_core::{
    CommandRunner, CommandSpec, CoreError, ProjectUrl, RevisionHash, StepOutcome, ToxCommand,
    run_checked, validate_command_binary_path,
};

use crate::cache::{PromoteOutcome, RevisionCache};

pub const SETUP_RESULT_FILE: &str = "tox_install.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// The revision directory already existed; setup was skipped.
    Hit,
    Miss,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedWorkspace {
    pub project_url: ProjectUrl,
    pub revision: RevisionHash,
    pub path: PathBuf,
    pub cache_status: CacheStatus,
    pub setup: StepOutcome,
}

pub struct WorkspaceManager<R: CommandRunner, C: RevisionCache> {
    runner: R,
    cache: C,
    git_binary: PathBuf,
    tox: ToxCommand,
}

impl<R: CommandRunner, C: RevisionCache> WorkspaceManager<R, C> {
    pub fn new(
        runner: R,
        cache: C,
        git_binary: impl Into<PathBuf>,
        python: impl Into<PathBuf>,
        allow_unsafe_command_paths: bool,
    ) -> Result<Self, CoreError> {
        let git_binary = git_binary.into();
        let python = python.into();
        validate_command_binary_path(&git_binary, "git.binary", allow_unsafe_command_paths)?;
        validate_command_binary_path(&python, "tox.python", allow_unsafe_command_paths)?;

        Ok(Self {
            runner,
            cache,
            git_binary,
            tox: ToxCommand::new(python),
        })
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Produces a ready-to-test checkout of `project_url`.
    ///
    /// Only a clone failure is returned as an error for the project. A failed
    /// environment setup is recorded in [`PreparedWorkspace::setup`].
    pub fn prepare(
        &self,
        project_url: &ProjectUrl,
        results_dir: &Path,
    ) -> Result<PreparedWorkspace, CoreError> {
        let scratch = self.cache.allocate_scratch()?;
        let revision = match self.clone_revision(project_url, &scratch) {
            Ok(revision) => revision,
            Err(error) => {
                self.cache.discard_scratch(&scratch);
                tracing::warn!(
                    project_url = %project_url,
                    error = %error,
                    "clone failed; skipping project"
                );
                return Err(error);
            }
        };

        let _lock = match self.cache.lock() {
            Ok(lock) => lock,
            Err(error) => {
                self.cache.discard_scratch(&scratch);
                return Err(error);
            }
        };

        let prepared = match self.cache.is_prepared(&revision) {
            Ok(prepared) => prepared,
            Err(error) => {
                self.cache.discard_scratch(&scratch);
                return Err(error);
            }
        };
        if prepared {
            self.cache.discard_scratch(&scratch);
            tracing::info!(
                project_url = %project_url,
                revision = %revision,
                "workspace cache hit; reusing prepared checkout"
            );
            return Ok(self.hit(project_url, revision));
        }

        let path = match self.cache.promote(&scratch, &revision) {
            Ok(PromoteOutcome::Promoted(path)) => path,
            Ok(PromoteOutcome::AlreadyPresent(_)) => {
                tracing::info!(
                    project_url = %project_url,
                    revision = %revision,
                    "revision was prepared concurrently; reusing it"
                );
                return Ok(self.hit(project_url, revision));
            }
            Err(error) => {
                self.cache.discard_scratch(&scratch);
                return Err(error);
            }
        };
        tracing::info!(
            project_url = %project_url,
            revision = %revision,
            path = %path.display(),
            "workspace cache miss; running environment setup"
        );

        let setup = self.run_setup(&path, results_dir);
        if let StepOutcome::Failed { exit_code, detail } = &setup {
            tracing::warn!(
                project_url = %project_url,
                revision = %revision,
                exit_code = ?exit_code,
                detail = %detail,
                "environment setup failed; continuing with partial environments"
            );
        }

        Ok(PreparedWorkspace {
            project_url: project_url.clone(),
            revision,
            path,
            cache_status: CacheStatus::Miss,
            setup,
        })
    }

    fn hit(&self, project_url: &ProjectUrl, revision: RevisionHash) -> PreparedWorkspace {
        PreparedWorkspace {
            project_url: project_url.clone(),
            path: self.cache.revision_path(&revision),
            revision,
            cache_status: CacheStatus::Hit,
            setup: StepOutcome::Skipped,
        }
    }

    fn git(&self, args: Vec<OsString>) -> CommandSpec {
        CommandSpec::new(self.git_binary.to_string_lossy()).args(args)
    }

    fn clone_args(project_url: &ProjectUrl, destination: &Path) -> Vec<OsString> {
        vec![
            "clone".into(),
            project_url.as_str().into(),
            destination.as_os_str().to_owned(),
        ]
    }

    fn rev_parse_args(checkout: &Path) -> Vec<OsString> {
        vec![
            "-C".into(),
            checkout.as_os_str().to_owned(),
            "rev-parse".into(),
            "HEAD".into(),
        ]
    }

    fn clone_revision(
        &self,
        project_url: &ProjectUrl,
        scratch: &Path,
    ) -> Result<RevisionHash, CoreError> {
        let clone_failed = |detail: String| CoreError::CloneFailed {
            url: project_url.to_string(),
            detail,
        };

        tracing::debug!(project_url = %project_url, scratch = %scratch.display(), "cloning");
        run_checked(&self.runner, &self.git(Self::clone_args(project_url, scratch)))
            .map_err(|error| clone_failed(error.to_string()))?;

        let output = run_checked(&self.runner, &self.git(Self::rev_parse_args(scratch)))
            .map_err(|error| clone_failed(error.to_string()))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        RevisionHash::parse(stdout.trim()).ok_or_else(|| {
            clone_failed(format!(
                "`git rev-parse HEAD` returned an unexpected revision: '{}'",
                stdout.trim()
            ))
        })
    }

    fn run_setup(&self, workspace: &Path, results_dir: &Path) -> StepOutcome {
        let spec = self
            .tox
            .setup(workspace, &results_dir.join(SETUP_RESULT_FILE));
        StepOutcome::run(&self.runner, &spec)
    }
}
