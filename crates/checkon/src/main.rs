use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use checkon::dependents::ENV_LIBRARIESIO_API_KEY;
use checkon::{
    DependentsSource, FileDependents, LibrariesIoDependents, LiteralDependents, OutputFormat,
    Pipeline, PipelineSettings, RunSummary, render_records, resolve_inject,
};
use checkon_config::{CheckonConfig, ENV_CHECKON_CONFIG};
use checkon_core::command::ENV_ALLOW_UNSAFE_COMMAND_PATHS;
use checkon_core::{CoreError, DiagnosticsRunner, ProcessCommandRunner, StepOutcome};
use checkon_matrix::{ExecutionStatus, MatrixConfig};
use checkon_store::{RowFilter, SqliteResultStore};
use checkon_workspace::{CacheStatus, FsRevisionCache};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "checkon",
    version,
    about = "Run the test suites of a library's dependents against candidate versions of it"
)]
struct Cli {
    /// Configuration file; defaults to ~/.config/checkon/config.toml.
    #[arg(long, global = true, env = ENV_CHECKON_CONFIG)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the dependents selected by a source, one per line.
    List {
        #[command(subcommand)]
        source: Source,
    },
    /// Run every dependent against one injected artifact and summarize the runs.
    Run {
        #[arg(long)]
        inject: String,
        /// Only run environments whose name contains one of these fragments.
        #[arg(long = "env")]
        envs: Vec<String>,
        #[command(subcommand)]
        source: Source,
    },
    /// Compare test outcomes across several injected artifacts.
    Test {
        #[arg(long, required = true)]
        inject: Vec<String>,
        /// Only print rows that recorded a failure.
        #[arg(long, default_value_t = false)]
        hide_passed: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        output_format: OutputFormat,
        #[arg(long = "env")]
        envs: Vec<String>,
        #[command(subcommand)]
        source: Source,
    },
}

#[derive(Subcommand, Debug)]
enum Source {
    /// Project URLs given on the command line.
    Dependents {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// A newline-delimited file of project URLs.
    DependentsFromFile { file: PathBuf },
    /// Dependents of a PyPI package, looked up on libraries.io.
    DependentsFromLibrariesio {
        name: String,
        #[arg(long, env = ENV_LIBRARIESIO_API_KEY, hide_env_values = true)]
        api_key: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
}

impl Command {
    fn source(&self) -> &Source {
        match self {
            Self::List { source } | Self::Run { source, .. } | Self::Test { source, .. } => source,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => checkon_config::load_from_path(path)?,
        None => checkon_config::load_from_env()?,
    };
    init_logging(&config)?;

    let source = build_source(cli.command.source(), &config)?;
    let urls = source.dependents().await?;
    tracing::info!(dependents = urls.len(), "resolved dependents");

    match cli.command {
        Command::List { .. } => {
            for url in &urls {
                println!("{url}");
            }
        }
        Command::Run { inject, envs, .. } => {
            let artifact = resolve_inject(&inject)?;
            let pipeline = build_pipeline(&config, envs)?;
            let summary = tokio::task::spawn_blocking(move || pipeline.run_many(&urls, &artifact))
                .await??;
            print_run_summary(&summary);
        }
        Command::Test {
            inject,
            hide_passed,
            output_format,
            envs,
            ..
        } => {
            let pipeline = build_pipeline(&config, envs)?;
            let mut store = open_store(&config)?;
            let filter = if hide_passed {
                RowFilter::FailuresOnly
            } else {
                RowFilter::All
            };
            let comparison = tokio::task::spawn_blocking(move || {
                pipeline.compare(&urls, &inject, &mut store, filter)
            })
            .await??;
            for failure in &comparison.failures {
                tracing::warn!(
                    project_url = %failure.project_url,
                    artifact = %failure.artifact,
                    error = %failure.error,
                    "no results for pair"
                );
            }
            print!("{}", render_records(&comparison.records, output_format)?);
        }
    }

    Ok(())
}

fn build_source(source: &Source, config: &CheckonConfig) -> Result<Box<dyn DependentsSource>> {
    Ok(match source {
        Source::Dependents { urls } => Box::new(LiteralDependents::new(urls.iter().cloned())),
        Source::DependentsFromFile { file } => Box::new(FileDependents::new(file)),
        Source::DependentsFromLibrariesio {
            name,
            api_key,
            limit,
        } => {
            let runtime = config.dependents_runtime();
            Box::new(LibrariesIoDependents::new(
                runtime.librariesio_api_url,
                api_key.clone().unwrap_or_default(),
                name.clone(),
                limit.unwrap_or(runtime.limit),
                Duration::from_secs(runtime.request_timeout_secs),
            )?)
        }
    })
}

fn allow_unsafe_command_paths(configured: bool) -> bool {
    let from_env = std::env::var(ENV_ALLOW_UNSAFE_COMMAND_PATHS)
        .map(|raw| matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    configured || from_env
}

fn build_pipeline(
    config: &CheckonConfig,
    env_fragments: Vec<String>,
) -> Result<Pipeline<DiagnosticsRunner<ProcessCommandRunner>, FsRevisionCache>, CoreError> {
    let workspace = config.workspace_runtime();
    let matrix = config.matrix_runtime();
    let runner = match config.diagnostics_dir() {
        Some(dir) => DiagnosticsRunner::new(ProcessCommandRunner, dir),
        None => DiagnosticsRunner::disabled(ProcessCommandRunner),
    };
    let selected_environments = if env_fragments.is_empty() {
        matrix.selected_environments
    } else {
        env_fragments
    };

    Pipeline::new(
        Arc::new(runner),
        FsRevisionCache::new(workspace.workspace_root)?,
        PipelineSettings {
            git_binary: workspace.git_binary,
            results_root: workspace.results_root,
            matrix: MatrixConfig {
                python: matrix.python,
                selected_environments,
                install_shim: matrix.install_shim,
                shim_package: matrix.shim_package,
                force_reinstall: matrix.force_reinstall,
                pytest_addopts: matrix.pytest_addopts,
            },
            allow_unsafe_command_paths: allow_unsafe_command_paths(
                workspace.allow_unsafe_command_paths,
            ),
        },
    )
}

fn open_store(config: &CheckonConfig) -> Result<SqliteResultStore, CoreError> {
    match config.store_location() {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|error| {
                    CoreError::Configuration(format!(
                        "failed to create result store directory '{}': {error}",
                        parent.display()
                    ))
                })?;
            }
            SqliteResultStore::open(path)
        }
        None => SqliteResultStore::in_memory(),
    }
}

fn step_label(outcome: &StepOutcome) -> &'static str {
    match outcome {
        StepOutcome::Completed => "ok",
        StepOutcome::Failed { .. } => "failed",
        StepOutcome::Skipped => "skipped",
    }
}

fn print_run_summary(summary: &RunSummary) {
    for outcome in &summary.completed {
        let prepared = &outcome.prepared;
        let cache = match prepared.cache_status {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
        };
        println!(
            "{} @ {} (cache {cache}, setup {}, injection {})",
            prepared.project_url,
            prepared.revision,
            step_label(&prepared.setup),
            step_label(&outcome.matrix.injection),
        );
        for execution in &outcome.matrix.environments {
            let status = match &execution.status {
                ExecutionStatus::Completed => "passed".to_owned(),
                ExecutionStatus::Failed { exit_code, .. } => match exit_code {
                    Some(code) => format!("failed (exit {code})"),
                    None => "failed (signal)".to_owned(),
                },
                ExecutionStatus::SpawnFailed { .. } => "not started".to_owned(),
            };
            let cases = outcome
                .run
                .dependent_result
                .environments
                .iter()
                .find(|env| env.envname == execution.envname)
                .map_or(0, |env| env.test_cases().count());
            println!("  {:<16} {status}, {cases} test cases", execution.envname.as_str());
        }
    }
    for failure in &summary.failed {
        println!("{}: skipped ({})", failure.project_url, failure.error);
    }
}

fn init_logging(config: &CheckonConfig) -> Result<(), CoreError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let Some(log_path) = config.log_file() else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(());
    };

    if let Some(parent) = log_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|error| {
                CoreError::Configuration(format!(
                    "failed to create checkon log directory '{}': {error}",
                    parent.display()
                ))
            })?;
        }
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|error| {
            CoreError::Configuration(format!(
                "failed to open checkon log file '{}': {error}",
                log_path.display()
            ))
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(log_file))
        .init();

    Ok(())
}
