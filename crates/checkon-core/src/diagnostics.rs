use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::command::{CommandRunner, CommandSpec};

const STDERR_TAIL_BYTES: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashContext {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
    pub spawn_error: Option<String>,
    pub stderr_tail: String,
    pub recorded_at: String,
}

/// Wraps a runner and writes a JSON crash context for every unsuccessful invocation.
///
/// Opt-in: a runner built with [`DiagnosticsRunner::disabled`] only forwards.
pub struct DiagnosticsRunner<R: CommandRunner> {
    inner: R,
    dir: Option<PathBuf>,
    sequence: AtomicU64,
}

impl<R: CommandRunner> DiagnosticsRunner<R> {
    pub fn new(inner: R, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: Some(dir.into()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn disabled(inner: R) -> Self {
        Self {
            inner,
            dir: None,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn diagnostics_dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    fn record(&self, dir: &Path, context: &CrashContext) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!(
            "crash-{}-{}-{sequence}.json",
            std::process::id(),
            OffsetDateTime::now_utc().unix_timestamp_nanos()
        ));
        let written = fs::create_dir_all(dir)
            .and_then(|()| serde_json::to_vec_pretty(context).map_err(io::Error::other))
            .and_then(|rendered| fs::write(&path, rendered));
        match written {
            Ok(()) => tracing::debug!(
                path = %path.display(),
                program = %context.program,
                "recorded crash context"
            ),
            Err(error) => tracing::warn!(
                error = %error,
                dir = %dir.display(),
                "failed to write crash diagnostics"
            ),
        }
    }
}

impl<R: CommandRunner> CommandRunner for DiagnosticsRunner<R> {
    fn run(&self, spec: &CommandSpec) -> io::Result<Output> {
        let result = self.inner.run(spec);
        let Some(dir) = self.dir.as_deref() else {
            return result;
        };

        match &result {
            Ok(output) if !output.status.success() => {
                self.record(dir, &crash_context(spec, Some(output), None));
            }
            Err(error) => {
                self.record(dir, &crash_context(spec, None, Some(error)));
            }
            Ok(_) => {}
        }
        result
    }
}

pub fn crash_context(
    spec: &CommandSpec,
    output: Option<&Output>,
    spawn_error: Option<&io::Error>,
) -> CrashContext {
    let stderr_tail = output
        .map(|output| {
            let start = output.stderr.len().saturating_sub(STDERR_TAIL_BYTES);
            String::from_utf8_lossy(&output.stderr[start..]).to_string()
        })
        .unwrap_or_default();

    CrashContext {
        program: spec.program.clone(),
        args: spec
            .args
            .iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect(),
        cwd: spec
            .cwd
            .as_ref()
            .map(|cwd| cwd.to_string_lossy().to_string()),
        exit_code: output.and_then(|output| output.status.code()),
        signal: output.and_then(|output| exit_signal(output)),
        spawn_error: spawn_error.map(ToString::to_string),
        stderr_tail,
        recorded_at: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default(),
    }
}

#[cfg(unix)]
fn exit_signal(output: &Output) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    output.status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_output: &Output) -> Option<i32> {
    None
}
