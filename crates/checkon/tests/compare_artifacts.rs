use std::io;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::{Arc, Mutex};

use checkon::{Pipeline, PipelineSettings, render_table};
use checkon_core::test_support::{FnRunner, output_with_status, success_output};
use checkon_core::{CommandSpec, CoreError, ProjectUrl, TestOutcome};
use checkon_matrix::MatrixConfig;
use checkon_store::{RowFilter, SqliteResultStore};
use checkon_workspace::{FsRevisionCache, InMemoryRevisionCache};

const REV: &str = "aaaabbbbccccddddeeeeffff0000111122223333";
const OTHER_REV: &str = "9999888877776666555544443333222211110000";
const PROJECT: &str = "https://github.com/example/dependent";
const FOO_MESSAGE: &str = "AssertionError: expected 1, got 2";

fn passing_report() -> String {
    r#"<?xml version="1.0" encoding="utf-8"?>
<testsuites><testsuite name="pytest" tests="1">
  <testcase classname="tests.test_foo" name="test_foo" line="4" time="0.01"/>
</testsuite></testsuites>"#
        .to_owned()
}

fn failing_report() -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<testsuites><testsuite name="pytest" tests="1" failures="1">
  <testcase classname="tests.test_foo" name="test_foo" line="4" time="0.01">
    <failure message="{FOO_MESSAGE}">def test_foo():
&gt;       assert 2 == 1</failure>
  </testcase>
</testsuite></testsuites>"#
    )
}

/// A stand-in for git and tox. The most recent `pip install` decides whether
/// `test_foo` passes, `py312` always crashes before writing reports, and `lint`
/// is declared but never selected.
struct FakeToolchain {
    installed: Mutex<String>,
}

impl FakeToolchain {
    fn respond(&self, spec: &CommandSpec) -> io::Result<Output> {
        let args: Vec<String> = spec
            .args
            .iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();

        if spec.program == "git" {
            return Ok(match args.first().map(String::as_str) {
                Some("clone") => success_output(b""),
                _ => success_output(format!("{REV}\n").as_bytes()),
            });
        }

        if let Some(position) = args.iter().position(|arg| arg == "--run-command") {
            let command = &args[position + 1];
            if command.contains("libx") {
                *self
                    .installed
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = command.clone();
            }
            return Ok(success_output(b""));
        }

        if args.iter().any(|arg| arg == "-l") {
            return Ok(success_output(b"py311\npy312\nlint\n"));
        }

        if let Some(position) = args.iter().position(|arg| arg == "-e") {
            if args[position + 1] == "py312" {
                return Ok(output_with_status(1, b"", b"InterpreterNotFound: python3.12"));
            }
            let junit = spec
                .env_value("JUNITXML_PATH")
                .map(PathBuf::from)
                .ok_or_else(|| io::Error::other("missing JUNITXML_PATH"))?;
            let installed = self
                .installed
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .clone();
            let report = if installed.contains("libx==2.0") {
                failing_report()
            } else {
                passing_report()
            };
            std::fs::write(junit, report)?;
            return Ok(success_output(b""));
        }

        Ok(success_output(b""))
    }
}

#[test]
fn comparison_exposes_the_regression_between_two_versions() {
    let results = tempfile::tempdir().expect("results root");
    let toolchain = Arc::new(FakeToolchain {
        installed: Mutex::new(String::new()),
    });
    let responder = Arc::clone(&toolchain);
    let runner = Arc::new(FnRunner::new(move |spec: &CommandSpec| responder.respond(spec)));
    let pipeline = Pipeline::new(
        Arc::clone(&runner),
        InMemoryRevisionCache::new("/virtual/workspaces"),
        PipelineSettings {
            git_binary: PathBuf::from("git"),
            results_root: results.path().to_path_buf(),
            matrix: MatrixConfig {
                selected_environments: vec!["py".to_owned()],
                ..MatrixConfig::default()
            },
            allow_unsafe_command_paths: false,
        },
    )
    .expect("pipeline");
    let mut store = SqliteResultStore::in_memory().expect("store");

    let comparison = pipeline
        .compare(
            &[ProjectUrl::from(PROJECT)],
            &["libx==1.0".to_owned(), "libx==2.0".to_owned()],
            &mut store,
            RowFilter::All,
        )
        .expect("compare");

    assert!(comparison.failures.is_empty());
    let rows = &comparison.records;
    assert_eq!(rows.len(), 2, "py312 crashed and lint was filtered out");
    assert!(rows.iter().all(|row| row.envname == "py311"));
    assert!(rows.iter().all(|row| row.case_name == "test_foo"));
    assert!(rows.iter().all(|row| row.provider == PROJECT));

    assert_eq!(rows[0].injected_artifact, "libx==1.0");
    assert_eq!(rows[0].outcome, TestOutcome::Passed);
    assert_eq!(rows[0].failure_message, None);

    assert_eq!(rows[1].injected_artifact, "libx==2.0");
    assert_eq!(rows[1].outcome, TestOutcome::Failed);
    assert_eq!(rows[1].failure_message.as_deref(), Some(FOO_MESSAGE));
    assert!(
        rows[1]
            .failure_text
            .as_deref()
            .is_some_and(|text| text.contains("assert 2 == 1"))
    );

    let setups = runner
        .calls()
        .iter()
        .filter(|spec| spec.args.iter().any(|arg| arg == "--notest"))
        .count();
    assert_eq!(setups, 1, "the second artifact reuses the prepared revision");

    let lint_runs = runner
        .calls()
        .iter()
        .filter(|spec| spec.args.iter().any(|arg| arg == "lint"))
        .count();
    assert_eq!(lint_runs, 0);

    let table = render_table(rows);
    assert!(table.contains(FOO_MESSAGE));

    let failures_only = store
        .comparison_records(RowFilter::FailuresOnly)
        .expect("failures");
    assert_eq!(failures_only.len(), 1);
    assert_eq!(failures_only[0].injected_artifact, "libx==2.0");
}

#[test]
fn clone_failure_for_one_project_keeps_the_others() {
    let results = tempfile::tempdir().expect("results root");
    let runner = Arc::new(FnRunner::new(|spec: &CommandSpec| {
        let args: Vec<String> = spec
            .args
            .iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();
        if spec.program == "git" && args[0] == "clone" && args[1].contains("gone") {
            return Ok(output_with_status(128, b"", b"fatal: repository not found"));
        }
        if spec.program == "git" && args[0] == "-C" {
            return Ok(success_output(format!("{REV}\n").as_bytes()));
        }
        if args.iter().any(|arg| arg == "-l") {
            return Ok(success_output(b"py311\n"));
        }
        if let Some(junit) = spec.env_value("JUNITXML_PATH") {
            std::fs::write(junit, passing_report())?;
        }
        Ok(success_output(b""))
    }));
    let pipeline = Pipeline::new(
        runner,
        InMemoryRevisionCache::new("/virtual/workspaces"),
        PipelineSettings {
            git_binary: PathBuf::from("git"),
            results_root: results.path().to_path_buf(),
            matrix: MatrixConfig::default(),
            allow_unsafe_command_paths: false,
        },
    )
    .expect("pipeline");
    let mut store = SqliteResultStore::in_memory().expect("store");

    let comparison = pipeline
        .compare(
            &[ProjectUrl::from("https://example.com/gone"), ProjectUrl::from(PROJECT)],
            &["libx".to_owned()],
            &mut store,
            RowFilter::All,
        )
        .expect("compare");

    assert_eq!(comparison.failures.len(), 1);
    assert_eq!(comparison.failures[0].project_url.as_str(), "https://example.com/gone");
    assert_eq!(comparison.records.len(), 1);
    assert_eq!(comparison.records[0].provider, PROJECT);
    assert_eq!(store.count_runs().expect("runs"), 1);
}

fn args_of(spec: &CommandSpec) -> Vec<String> {
    spec.args
        .iter()
        .map(|arg| arg.to_string_lossy().to_string())
        .collect()
}

/// tox side of the fake toolchain: one `py311` environment with a passing case.
fn respond_as_tox(spec: &CommandSpec, args: &[String]) -> io::Result<Output> {
    if args.iter().any(|arg| arg == "-l") {
        return Ok(success_output(b"py311\n"));
    }
    if let Some(junit) = spec.env_value("JUNITXML_PATH") {
        std::fs::write(junit, passing_report())?;
    }
    Ok(success_output(b""))
}

fn default_settings(results_root: &Path) -> PipelineSettings {
    PipelineSettings {
        git_binary: PathBuf::from("git"),
        results_root: results_root.to_path_buf(),
        matrix: MatrixConfig::default(),
        allow_unsafe_command_paths: false,
    }
}

#[test]
fn stray_file_in_the_cache_only_skips_its_own_project() {
    let cache_root = tempfile::tempdir().expect("cache root");
    let results = tempfile::tempdir().expect("results root");
    std::fs::write(cache_root.path().join(OTHER_REV), "left behind").expect("stray file");

    // The fake clone records its URL in the checkout so rev-parse can answer per project.
    let runner = Arc::new(FnRunner::new(|spec: &CommandSpec| {
        let args = args_of(spec);
        if spec.program == "git" && args[0] == "clone" {
            std::fs::write(Path::new(&args[2]).join("ORIGIN"), &args[1])?;
            return Ok(success_output(b""));
        }
        if spec.program == "git" && args[0] == "-C" {
            let origin = std::fs::read_to_string(Path::new(&args[1]).join("ORIGIN"))?;
            let revision = if origin.contains("stale") { OTHER_REV } else { REV };
            return Ok(success_output(format!("{revision}\n").as_bytes()));
        }
        respond_as_tox(spec, &args)
    }));
    let pipeline = Pipeline::new(
        runner,
        FsRevisionCache::new(cache_root.path()).expect("cache"),
        default_settings(results.path()),
    )
    .expect("pipeline");
    let mut store = SqliteResultStore::in_memory().expect("store");

    let comparison = pipeline
        .compare(
            &[ProjectUrl::from(PROJECT), ProjectUrl::from("https://example.com/stale")],
            &["libx".to_owned()],
            &mut store,
            RowFilter::All,
        )
        .expect("a bad cache entry does not abort the comparison");

    assert_eq!(comparison.failures.len(), 1);
    assert_eq!(comparison.failures[0].project_url.as_str(), "https://example.com/stale");
    assert!(matches!(comparison.failures[0].error, CoreError::Workspace(_)));
    assert_eq!(store.count_runs().expect("runs"), 1);
    assert!(cache_root.path().join(REV).is_dir());
    let scratch_left = std::fs::read_dir(cache_root.path().join(".scratch"))
        .expect("scratch root")
        .count();
    assert_eq!(scratch_left, 0, "the rejected clone is discarded");
}

#[test]
fn fatal_error_keeps_the_runs_stored_before_it() {
    let base = tempfile::tempdir().expect("base dir");
    let results_root = base.path().join("results");
    let sabotaged_root = results_root.clone();

    // Cloning the broken project replaces the results root with a plain file, so
    // the next project cannot allocate a report directory.
    let runner = Arc::new(FnRunner::new(move |spec: &CommandSpec| {
        let args = args_of(spec);
        if spec.program == "git" && args[0] == "clone" {
            if args[1].contains("broken") {
                std::fs::remove_dir_all(&sabotaged_root)?;
                std::fs::write(&sabotaged_root, "not a directory")?;
                return Ok(output_with_status(128, b"", b"fatal: repository not found"));
            }
            return Ok(success_output(b""));
        }
        if spec.program == "git" && args[0] == "-C" {
            return Ok(success_output(format!("{REV}\n").as_bytes()));
        }
        respond_as_tox(spec, &args)
    }));
    let pipeline = Pipeline::new(
        runner,
        InMemoryRevisionCache::new("/virtual/workspaces"),
        default_settings(&results_root),
    )
    .expect("pipeline");
    let mut store = SqliteResultStore::in_memory().expect("store");

    let error = pipeline
        .compare(
            &[
                ProjectUrl::from(PROJECT),
                ProjectUrl::from("https://example.com/broken"),
                ProjectUrl::from("https://example.com/never-reached"),
            ],
            &["libx".to_owned()],
            &mut store,
            RowFilter::All,
        )
        .expect_err("results root became unusable");

    assert!(matches!(error, CoreError::Configuration(_)));
    assert_eq!(store.count_runs().expect("runs"), 1);
    let rows = store.comparison_records(RowFilter::All).expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].provider, PROJECT);
}
