use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Output};
use std::sync::Arc;

use serde::Serialize;

use crate::error::CoreError;

pub const ENV_ALLOW_UNSAFE_COMMAND_PATHS: &str = "CHECKON_ALLOW_UNSAFE_COMMAND_PATHS";

/// A fully described external process invocation.
///
/// Variables in `env_remove` are stripped from the inherited environment before
/// `env_set` is applied, so a spec never silently inherits a variable it names.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env_set: Vec<(String, OsString)>,
    pub env_remove: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env_set.push((key.into(), value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    pub fn env_value(&self, key: &str) -> Option<&OsStr> {
        self.env_set
            .iter()
            .rev()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_os_str())
    }

    pub fn removes_env(&self, key: &str) -> bool {
        self.env_remove.iter().any(|name| name == key)
    }

    pub fn rendered(&self) -> String {
        let mut rendered = self.program.clone();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(&arg.to_string_lossy());
        }
        rendered
    }
}

pub trait CommandRunner: Send + Sync {
    fn run(&self, spec: &CommandSpec) -> io::Result<Output>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<Output> {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        for key in &spec.env_remove {
            command.env_remove(key);
        }
        for (key, value) in &spec.env_set {
            command.env(key, value);
        }

        command.output()
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, spec: &CommandSpec) -> io::Result<Output> {
        (**self).run(spec)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for Arc<R> {
    fn run(&self, spec: &CommandSpec) -> io::Result<Output> {
        (**self).run(spec)
    }
}

/// Maps a spawn error onto the error taxonomy, naming the binary that was missing.
pub fn spawn_error(spec: &CommandSpec, error: &io::Error) -> CoreError {
    match error.kind() {
        io::ErrorKind::NotFound => CoreError::DependencyUnavailable(format!(
            "`{}` was not found. Install it or point the configuration at a valid binary.",
            spec.program
        )),
        _ => CoreError::DependencyUnavailable(format!(
            "Failed to execute `{}`: {error}",
            spec.program
        )),
    }
}

/// Best human-readable reason for a non-zero exit: stderr, then stdout, then the status.
pub fn failure_detail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    if !stderr.is_empty() {
        stderr
    } else if !stdout.is_empty() {
        stdout
    } else {
        format!("exit status {}", output.status)
    }
}

pub fn command_failed(spec: &CommandSpec, output: &Output) -> CoreError {
    CoreError::DependencyUnavailable(format!(
        "Command failed (`{}`): {}",
        spec.rendered(),
        failure_detail(output)
    ))
}

/// Runs `spec` and requires a zero exit status.
pub fn run_checked<R: CommandRunner + ?Sized>(
    runner: &R,
    spec: &CommandSpec,
) -> Result<Output, CoreError> {
    let output = runner.run(spec).map_err(|error| spawn_error(spec, &error))?;
    if output.status.success() {
        return Ok(output);
    }
    Err(command_failed(spec, &output))
}

/// Result of a best-effort step whose failure is recorded rather than raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    Failed {
        exit_code: Option<i32>,
        detail: String,
    },
    Skipped,
}

impl StepOutcome {
    /// Runs `spec` and folds every kind of failure into [`StepOutcome::Failed`].
    pub fn run<R: CommandRunner + ?Sized>(runner: &R, spec: &CommandSpec) -> Self {
        match runner.run(spec) {
            Ok(output) if output.status.success() => Self::Completed,
            Ok(output) => Self::Failed {
                exit_code: output.status.code(),
                detail: failure_detail(&output),
            },
            Err(error) => Self::Failed {
                exit_code: None,
                detail: spawn_error(spec, &error).to_string(),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

fn is_bare_command_name(path: &Path) -> bool {
    let mut components = path.components();
    matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
}

pub fn validate_command_binary_path(
    binary: &Path,
    setting_name: &str,
    allow_unsafe_command_paths: bool,
) -> Result<(), CoreError> {
    if binary.as_os_str().is_empty() {
        return Err(CoreError::Configuration(format!(
            "{setting_name} is set but empty. Provide a valid binary name."
        )));
    }
    if allow_unsafe_command_paths || is_bare_command_name(binary) {
        return Ok(());
    }

    Err(CoreError::Configuration(format!(
        "{setting_name} resolves to '{}' which is treated as an unsafe command path by default. Use a bare command name or set {ENV_ALLOW_UNSAFE_COMMAND_PATHS}=true to allow explicit paths.",
        binary.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{StubRunner, output_with_status};

    #[test]
    fn builder_collects_arguments_and_environment() {
        let spec = CommandSpec::new("python3")
            .args(["-m", "tox"])
            .arg("-l")
            .current_dir("/work/project")
            .env("PYTEST_ADDOPTS", "--tb=long")
            .env_remove("TOXENV");

        assert_eq!(spec.rendered(), "python3 -m tox -l");
        assert_eq!(spec.cwd.as_deref(), Some(Path::new("/work/project")));
        assert_eq!(
            spec.env_value("PYTEST_ADDOPTS"),
            Some(OsStr::new("--tb=long"))
        );
        assert!(spec.removes_env("TOXENV"));
        assert!(!spec.removes_env("PATH"));
    }

    #[test]
    fn run_checked_prefers_stderr_in_failure_detail() {
        let runner = StubRunner::with_results(vec![Ok(output_with_status(
            1,
            b"",
            b"fatal: repository not found\n",
        ))]);
        let error = run_checked(&runner, &CommandSpec::new("git").arg("clone"))
            .expect_err("non-zero exit");
        assert_eq!(
            error.to_string(),
            "dependency unavailable: Command failed (`git clone`): fatal: repository not found"
        );
    }

    #[test]
    fn run_checked_maps_missing_binary_to_dependency_unavailable() {
        let runner = StubRunner::with_results(vec![Err(io::Error::new(
            io::ErrorKind::NotFound,
            "no such file",
        ))]);
        let error =
            run_checked(&runner, &CommandSpec::new("tox")).expect_err("missing binary");
        assert!(matches!(error, CoreError::DependencyUnavailable(_)));
        assert!(error.to_string().contains("`tox` was not found"));
    }

    #[test]
    fn binary_path_guard_accepts_bare_names_only_by_default() {
        assert!(validate_command_binary_path(Path::new("git"), "git.binary", false).is_ok());
        assert!(
            validate_command_binary_path(Path::new("/usr/bin/git"), "git.binary", false).is_err()
        );
        assert!(
            validate_command_binary_path(Path::new("/usr/bin/git"), "git.binary", true).is_ok()
        );
        assert!(validate_command_binary_path(Path::new(""), "git.binary", true).is_err());
    }

    #[test]
    fn step_outcome_records_exit_code_and_detail() {
        let runner = StubRunner::with_results(vec![
            Ok(output_with_status(0, b"", b"")),
            Ok(output_with_status(3, b"pip exploded", b"")),
            Err(io::Error::new(io::ErrorKind::NotFound, "gone")),
        ]);
        let spec = CommandSpec::new("python3");

        assert_eq!(StepOutcome::run(&runner, &spec), StepOutcome::Completed);
        assert_eq!(
            StepOutcome::run(&runner, &spec),
            StepOutcome::Failed {
                exit_code: Some(3),
                detail: "pip exploded".to_owned(),
            }
        );
        match StepOutcome::run(&runner, &spec) {
            StepOutcome::Failed { exit_code, detail } => {
                assert_eq!(exit_code, None);
                assert!(detail.contains("`python3` was not found"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
