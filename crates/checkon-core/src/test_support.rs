//! Shared doubles for tests across the workspace.

use std::cell::Cell;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::io;
use std::process::Output;
use std::sync::{Mutex, MutexGuard, OnceLock};

use crate::command::{CommandRunner, CommandSpec};

static ENV_VAR_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
thread_local! {
    static ENV_VAR_LOCK_DEPTH: Cell<u32> = const { Cell::new(0) };
}

struct EnvVarScope {
    _guard: Option<MutexGuard<'static, ()>>,
}

impl EnvVarScope {
    fn enter() -> Self {
        let depth_before = ENV_VAR_LOCK_DEPTH.with(|depth| {
            let current = depth.get();
            depth.set(current.saturating_add(1));
            current
        });

        if depth_before > 0 {
            return Self { _guard: None };
        }

        let lock = ENV_VAR_LOCK.get_or_init(|| Mutex::new(()));
        let guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Self {
            _guard: Some(guard),
        }
    }
}

impl Drop for EnvVarScope {
    fn drop(&mut self) {
        ENV_VAR_LOCK_DEPTH.with(|depth| {
            let current = depth.get();
            depth.set(current.saturating_sub(1));
        });
    }
}

struct EnvVarRestore {
    key: String,
    original: Option<OsString>,
}

impl EnvVarRestore {
    fn new(key: &str, value: Option<&str>) -> Self {
        let original = std::env::var_os(key);
        match value {
            Some(value) => unsafe {
                std::env::set_var(key, value);
            },
            None => unsafe {
                std::env::remove_var(key);
            },
        }

        Self {
            key: key.to_owned(),
            original,
        }
    }
}

impl Drop for EnvVarRestore {
    fn drop(&mut self) {
        match self.original.take() {
            Some(original) => unsafe {
                std::env::set_var(&self.key, original);
            },
            None => unsafe {
                std::env::remove_var(&self.key);
            },
        }
    }
}

pub fn with_env_var<R>(key: &str, value: Option<&str>, run: impl FnOnce() -> R) -> R {
    with_env_vars(&[(key, value)], run)
}

pub fn with_env_vars<R>(vars: &[(&str, Option<&str>)], run: impl FnOnce() -> R) -> R {
    let _scope = EnvVarScope::enter();
    let _restores: Vec<_> = vars
        .iter()
        .map(|(key, value)| EnvVarRestore::new(key, *value))
        .collect();
    run()
}

/// Builds an `Output` whose `status.code()` is `code`.
pub fn output_with_status(code: i32, stdout: &[u8], stderr: &[u8]) -> Output {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        Output {
            status: std::process::ExitStatus::from_raw(code << 8),
            stdout: stdout.to_vec(),
            stderr: stderr.to_vec(),
        }
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::ExitStatusExt;
        Output {
            status: std::process::ExitStatus::from_raw(code as u32),
            stdout: stdout.to_vec(),
            stderr: stderr.to_vec(),
        }
    }
}

pub fn success_output(stdout: &[u8]) -> Output {
    output_with_status(0, stdout, &[])
}

/// Replays queued results in order and records every spec it was asked to run.
pub struct StubRunner {
    calls: Mutex<Vec<CommandSpec>>,
    results: Mutex<VecDeque<io::Result<Output>>>,
}

impl StubRunner {
    pub fn with_results(results: Vec<io::Result<Output>>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            results: Mutex::new(VecDeque::from(results)),
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl CommandRunner for StubRunner {
    fn run(&self, spec: &CommandSpec) -> io::Result<Output> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(spec.clone());

        self.results
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "missing stubbed command output",
                ))
            })
    }
}

/// Answers each spec through a closure, for tests whose command order depends on input.
pub struct FnRunner<F>
where
    F: Fn(&CommandSpec) -> io::Result<Output> + Send + Sync,
{
    respond: F,
    calls: Mutex<Vec<CommandSpec>>,
}

impl<F> FnRunner<F>
where
    F: Fn(&CommandSpec) -> io::Result<Output> + Send + Sync,
{
    pub fn new(respond: F) -> Self {
        Self {
            respond,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl<F> CommandRunner for FnRunner<F>
where
    F: Fn(&CommandSpec) -> io::Result<Output> + Send + Sync,
{
    fn run(&self, spec: &CommandSpec) -> io::Result<Output> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(spec.clone());
        (self.respond)(spec)
    }
}
