use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_CHECKON_CONFIG: &str = "CHECKON_CONFIG";

const DEFAULT_GIT_BINARY: &str = "git";
const DEFAULT_PYTHON_BINARY: &str = "python3";
const DEFAULT_INSTALL_SHIM: bool = true;
const DEFAULT_SHIM_PACKAGE: &str = "checkon-trial";
const DEFAULT_FORCE_REINSTALL: bool = true;
const DEFAULT_PYTEST_ADDOPTS: &str = "--tb=long";
const DEFAULT_ALLOW_UNSAFE_COMMAND_PATHS: bool = false;
const DEFAULT_DIAGNOSTICS_ENABLED: bool = false;
const DEFAULT_LIBRARIESIO_API_URL: &str = "https://libraries.io/api";
const DEFAULT_DEPENDENTS_LIMIT: u32 = 5;
const MAX_DEPENDENTS_LIMIT: u32 = 1000;
const DEFAULT_DEPENDENTS_REQUEST_TIMEOUT_SECS: u64 = 20;
const DEFAULT_LOG_LEVEL: &str = "info";
const SUPPORTED_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Message(String),
}

impl ConfigError {
    fn configuration(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckonConfig {
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
    #[serde(default = "default_results_root")]
    pub results_root: String,
    /// Empty keeps the result store in memory for the life of the process.
    #[serde(default)]
    pub store_path: String,
    #[serde(default)]
    pub git: GitConfigToml,
    #[serde(default)]
    pub tox: ToxConfigToml,
    #[serde(default)]
    pub runtime: RuntimeConfigToml,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfigToml,
    #[serde(default)]
    pub dependents: DependentsConfigToml,
    #[serde(default)]
    pub logging: LoggingConfigToml,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRuntimeConfig {
    pub workspace_root: PathBuf,
    pub results_root: PathBuf,
    pub git_binary: PathBuf,
    /// The config-file half of the unsafe path override; the environment can also enable it.
    pub allow_unsafe_command_paths: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixRuntimeConfig {
    pub python: PathBuf,
    pub install_shim: bool,
    pub shim_package: String,
    pub force_reinstall: bool,
    pub selected_environments: Vec<String>,
    pub pytest_addopts: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentsRuntimeConfig {
    pub librariesio_api_url: String,
    pub limit: u32,
    pub request_timeout_secs: u64,
}

impl CheckonConfig {
    pub fn workspace_runtime(&self) -> WorkspaceRuntimeConfig {
        WorkspaceRuntimeConfig {
            workspace_root: PathBuf::from(&self.workspace_root),
            results_root: PathBuf::from(&self.results_root),
            git_binary: PathBuf::from(&self.git.binary),
            allow_unsafe_command_paths: self.runtime.allow_unsafe_command_paths,
        }
    }

    pub fn matrix_runtime(&self) -> MatrixRuntimeConfig {
        MatrixRuntimeConfig {
            python: PathBuf::from(&self.tox.python),
            install_shim: self.tox.install_shim,
            shim_package: self.tox.shim_package.clone(),
            force_reinstall: self.tox.force_reinstall,
            selected_environments: self.tox.selected_environments.clone(),
            pytest_addopts: self.tox.pytest_addopts.clone(),
        }
    }

    pub fn dependents_runtime(&self) -> DependentsRuntimeConfig {
        DependentsRuntimeConfig {
            librariesio_api_url: self.dependents.librariesio_api_url.clone(),
            limit: self.dependents.limit,
            request_timeout_secs: self.dependents.request_timeout_secs,
        }
    }

    /// `None` when crash diagnostics are switched off.
    pub fn diagnostics_dir(&self) -> Option<PathBuf> {
        self.diagnostics
            .enabled
            .then(|| PathBuf::from(&self.diagnostics.dir))
    }

    /// `None` selects an in-memory store.
    pub fn store_location(&self) -> Option<PathBuf> {
        let trimmed = self.store_path.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }

    pub fn log_file(&self) -> Option<PathBuf> {
        let trimmed = self.logging.log_file.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

pub fn load_from_env() -> Result<CheckonConfig, ConfigError> {
    let path = config_path_from_env()?;
    load_from_path(path)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<CheckonConfig, ConfigError> {
    load_or_create_config(path.as_ref())
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    let home = resolve_home_dir().ok_or_else(|| {
        ConfigError::configuration("Unable to resolve home directory from HOME or USERPROFILE")
    })?;

    Ok(home.join(".config").join("checkon").join("config.toml"))
}

fn config_path_from_env() -> Result<PathBuf, ConfigError> {
    match std::env::var(ENV_CHECKON_CONFIG) {
        Ok(raw) => {
            if raw.trim().is_empty() {
                default_config_path()
            } else {
                Ok(raw.into())
            }
        }
        Err(std::env::VarError::NotPresent) => default_config_path(),
        Err(_) => Err(ConfigError::configuration(
            "CHECKON_CONFIG contained invalid UTF-8",
        )),
    }
}

fn default_checkon_data_dir() -> PathBuf {
    resolve_data_local_dir().join("checkon")
}

fn resolve_data_local_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(path) = std::env::var("LOCALAPPDATA") {
            let path = path.trim();
            if !path.is_empty() {
                return absolutize_path(PathBuf::from(path));
            }
        }
        if let Some(home) = resolve_home_dir() {
            return home.join("AppData").join("Local");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = resolve_home_dir() {
            return home.join("Library").join("Application Support");
        }
    }

    #[cfg(all(not(target_os = "windows"), not(target_os = "macos")))]
    {
        if let Ok(path) = std::env::var("XDG_DATA_HOME") {
            let path = path.trim();
            if !path.is_empty() {
                return absolutize_path(PathBuf::from(path));
            }
        }
        if let Some(home) = resolve_home_dir() {
            return home.join(".local").join("share");
        }
    }

    std::env::temp_dir()
}

fn resolve_home_dir() -> Option<PathBuf> {
    std::env::var("HOME")
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("USERPROFILE")
                .ok()
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        })
}

#[cfg(not(target_os = "macos"))]
fn absolutize_path(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }

    if let Ok(current) = std::env::current_dir() {
        return current.join(path);
    }

    std::env::temp_dir().join(path)
}

fn data_dir_entry(name: &str) -> String {
    default_checkon_data_dir()
        .join(name)
        .to_string_lossy()
        .to_string()
}

fn default_workspace_root() -> String {
    data_dir_entry("workspaces")
}

fn default_results_root() -> String {
    data_dir_entry("results")
}

fn default_diagnostics_dir() -> String {
    data_dir_entry("diagnostics")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GitConfigToml {
    #[serde(default = "default_git_binary")]
    pub binary: String,
}

impl Default for GitConfigToml {
    fn default() -> Self {
        Self {
            binary: default_git_binary(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToxConfigToml {
    #[serde(default = "default_python_binary")]
    pub python: String,
    #[serde(default = "default_install_shim")]
    pub install_shim: bool,
    #[serde(default = "default_shim_package")]
    pub shim_package: String,
    #[serde(default = "default_force_reinstall")]
    pub force_reinstall: bool,
    /// Name fragments; an environment is kept when it contains any of them.
    #[serde(default)]
    pub selected_environments: Vec<String>,
    #[serde(default = "default_pytest_addopts")]
    pub pytest_addopts: String,
}

impl Default for ToxConfigToml {
    fn default() -> Self {
        Self {
            python: default_python_binary(),
            install_shim: default_install_shim(),
            shim_package: default_shim_package(),
            force_reinstall: default_force_reinstall(),
            selected_environments: Vec::new(),
            pytest_addopts: default_pytest_addopts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeConfigToml {
    #[serde(default = "default_allow_unsafe_command_paths")]
    pub allow_unsafe_command_paths: bool,
}

impl Default for RuntimeConfigToml {
    fn default() -> Self {
        Self {
            allow_unsafe_command_paths: default_allow_unsafe_command_paths(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticsConfigToml {
    #[serde(default = "default_diagnostics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_diagnostics_dir")]
    pub dir: String,
}

impl Default for DiagnosticsConfigToml {
    fn default() -> Self {
        Self {
            enabled: default_diagnostics_enabled(),
            dir: default_diagnostics_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependentsConfigToml {
    #[serde(default = "default_librariesio_api_url")]
    pub librariesio_api_url: String,
    #[serde(default = "default_dependents_limit")]
    pub limit: u32,
    #[serde(default = "default_dependents_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for DependentsConfigToml {
    fn default() -> Self {
        Self {
            librariesio_api_url: default_librariesio_api_url(),
            limit: default_dependents_limit(),
            request_timeout_secs: default_dependents_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfigToml {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub log_file: String,
}

impl Default for LoggingConfigToml {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_file: String::new(),
        }
    }
}

fn default_git_binary() -> String {
    DEFAULT_GIT_BINARY.to_owned()
}

fn default_python_binary() -> String {
    DEFAULT_PYTHON_BINARY.to_owned()
}

fn default_install_shim() -> bool {
    DEFAULT_INSTALL_SHIM
}

fn default_shim_package() -> String {
    DEFAULT_SHIM_PACKAGE.to_owned()
}

fn default_force_reinstall() -> bool {
    DEFAULT_FORCE_REINSTALL
}

fn default_pytest_addopts() -> String {
    DEFAULT_PYTEST_ADDOPTS.to_owned()
}

fn default_allow_unsafe_command_paths() -> bool {
    DEFAULT_ALLOW_UNSAFE_COMMAND_PATHS
}

fn default_diagnostics_enabled() -> bool {
    DEFAULT_DIAGNOSTICS_ENABLED
}

fn default_librariesio_api_url() -> String {
    DEFAULT_LIBRARIESIO_API_URL.to_owned()
}

fn default_dependents_limit() -> u32 {
    DEFAULT_DEPENDENTS_LIMIT
}

fn default_dependents_request_timeout_secs() -> u64 {
    DEFAULT_DEPENDENTS_REQUEST_TIMEOUT_SECS
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_owned()
}

impl Default for CheckonConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            results_root: default_results_root(),
            store_path: String::new(),
            git: GitConfigToml::default(),
            tox: ToxConfigToml::default(),
            runtime: RuntimeConfigToml::default(),
            diagnostics: DiagnosticsConfigToml::default(),
            dependents: DependentsConfigToml::default(),
            logging: LoggingConfigToml::default(),
        }
    }
}

fn persist_config(path: &Path, config: &CheckonConfig) -> Result<(), ConfigError> {
    let rendered = toml::to_string_pretty(config).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to serialize CHECKON_CONFIG for {}: {err}",
            path.display()
        ))
    })?;

    std::fs::write(path, rendered.as_bytes()).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to write CHECKON_CONFIG to {}: {err}",
            path.display()
        ))
    })
}

fn load_or_create_config(path: &Path) -> Result<CheckonConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        ConfigError::configuration(format!(
                            "Failed to create parent directory {} for CHECKON_CONFIG: {err}",
                            parent.display()
                        ))
                    })?;
                }
            }

            let default_config = CheckonConfig::default();
            persist_config(path, &default_config)?;
            return Ok(default_config);
        }
        Err(err) => {
            return Err(ConfigError::configuration(format!(
                "Failed to read CHECKON_CONFIG from {}: {err}",
                path.display()
            )));
        }
    };

    let mut config: CheckonConfig = toml::from_str(&raw).map_err(|err| {
        ConfigError::configuration(format!(
            "Failed to parse CHECKON_CONFIG from {}: {err}",
            path.display()
        ))
    })?;

    if normalize_config(&mut config) {
        persist_config(path, &config)?;
    }

    Ok(config)
}

/// Returns whether anything changed, so the caller knows to rewrite the file.
pub fn normalize_config(config: &mut CheckonConfig) -> bool {
    let mut changed = false;

    changed |= normalize_non_empty_string(&mut config.workspace_root, default_workspace_root());
    changed |= normalize_non_empty_string(&mut config.results_root, default_results_root());
    let trimmed_store_path = config.store_path.trim();
    if trimmed_store_path != config.store_path {
        config.store_path = trimmed_store_path.to_owned();
        changed = true;
    }

    changed |= normalize_non_empty_string(&mut config.git.binary, default_git_binary());
    changed |= normalize_tox_config(&mut config.tox);
    changed |= normalize_non_empty_string(&mut config.diagnostics.dir, default_diagnostics_dir());
    changed |= normalize_dependents_config(&mut config.dependents);
    changed |= normalize_logging_config(&mut config.logging);

    changed
}

pub fn normalize_tox_config(config: &mut ToxConfigToml) -> bool {
    let mut changed = false;

    changed |= normalize_non_empty_string(&mut config.python, default_python_binary());
    changed |= normalize_non_empty_string(&mut config.shim_package, default_shim_package());
    changed |= normalize_string_vec(&mut config.selected_environments);
    let trimmed_addopts = config.pytest_addopts.trim();
    if trimmed_addopts != config.pytest_addopts {
        config.pytest_addopts = trimmed_addopts.to_owned();
        changed = true;
    }

    changed
}

pub fn normalize_dependents_config(config: &mut DependentsConfigToml) -> bool {
    let mut changed = false;

    changed |= normalize_non_empty_string(
        &mut config.librariesio_api_url,
        default_librariesio_api_url(),
    );
    let trimmed_url = config.librariesio_api_url.trim_end_matches('/');
    if trimmed_url.len() != config.librariesio_api_url.len() && !trimmed_url.is_empty() {
        config.librariesio_api_url = trimmed_url.to_owned();
        changed = true;
    }

    let normalized_limit = if config.limit == 0 {
        default_dependents_limit()
    } else {
        config.limit.clamp(1, MAX_DEPENDENTS_LIMIT)
    };
    if normalized_limit != config.limit {
        config.limit = normalized_limit;
        changed = true;
    }

    let normalized_timeout = if config.request_timeout_secs == 0 {
        default_dependents_request_timeout_secs()
    } else {
        config.request_timeout_secs.clamp(1, 300)
    };
    if normalized_timeout != config.request_timeout_secs {
        config.request_timeout_secs = normalized_timeout;
        changed = true;
    }

    changed
}

pub fn normalize_logging_config(config: &mut LoggingConfigToml) -> bool {
    let mut changed = false;

    let candidate = config.level.trim().to_ascii_lowercase();
    let normalized_level = if SUPPORTED_LOG_LEVELS.contains(&candidate.as_str()) {
        candidate
    } else {
        default_log_level()
    };
    if normalized_level != config.level {
        config.level = normalized_level;
        changed = true;
    }

    let trimmed_log_file = config.log_file.trim();
    if trimmed_log_file != config.log_file {
        config.log_file = trimmed_log_file.to_owned();
        changed = true;
    }

    changed
}

fn normalize_non_empty_string(value: &mut String, default: String) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        if *value != default {
            *value = default;
            return true;
        }
        return false;
    }

    if trimmed != value {
        *value = trimmed.to_owned();
        return true;
    }
    false
}

fn normalize_string_vec(values: &mut Vec<String>) -> bool {
    let normalized = values
        .iter()
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect::<Vec<_>>();
    if *values != normalized {
        *values = normalized;
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkon_core::test_support::with_env_vars;
    use std::path::Path;

    fn write_config_file(path: &Path, raw: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create fixture config parent");
        }
        std::fs::write(path, raw.as_bytes()).expect("write fixture config");
    }

    #[test]
    fn load_from_env_creates_default_config_when_missing() {
        let home = tempfile::tempdir().expect("home dir");
        let expected = home.path().join(".config").join("checkon").join("config.toml");

        with_env_vars(
            &[
                ("HOME", Some(home.path().to_str().expect("home path"))),
                ("USERPROFILE", None),
                (ENV_CHECKON_CONFIG, None),
                ("XDG_DATA_HOME", None),
                ("LOCALAPPDATA", None),
                ("APPDATA", None),
            ],
            || {
                let config = load_from_env().expect("load defaults");
                assert!(expected.exists(), "default config should be persisted");
                assert_eq!(config.git.binary, "git");
                assert_eq!(config.tox.python, "python3");
                assert!(config.tox.install_shim);
                assert!(config.tox.selected_environments.is_empty());
                assert!(config.store_location().is_none());
                assert!(config.diagnostics_dir().is_none());
                assert!(config.workspace_root.ends_with("workspaces"));
            },
        );
    }

    #[test]
    fn load_from_env_honors_explicit_checkon_config_path() {
        let root = tempfile::tempdir().expect("root dir");
        let config_path = root.path().join("custom").join("checkon.toml");
        write_config_file(
            &config_path,
            r#"
workspace_root = "/srv/checkon/workspaces"
store_path = "/srv/checkon/results.db"

[tox]
python = "python3.12"
selected_environments = ["py3", "lint"]
install_shim = false
"#,
        );

        with_env_vars(
            &[(
                ENV_CHECKON_CONFIG,
                Some(config_path.to_str().expect("config path")),
            )],
            || {
                let config = load_from_env().expect("load explicit config");
                assert_eq!(config.workspace_root, "/srv/checkon/workspaces");
                assert_eq!(
                    config.store_location(),
                    Some(PathBuf::from("/srv/checkon/results.db"))
                );
                let matrix = config.matrix_runtime();
                assert_eq!(matrix.python, PathBuf::from("python3.12"));
                assert_eq!(matrix.selected_environments, vec!["py3", "lint"]);
                assert!(!matrix.install_shim);
                assert_eq!(matrix.shim_package, "checkon-trial");
            },
        );
    }

    #[test]
    fn load_from_path_returns_parse_error_for_invalid_toml() {
        let root = tempfile::tempdir().expect("root dir");
        let config_path = root.path().join("config.toml");
        write_config_file(&config_path, "workspace_root = [");

        let error = load_from_path(&config_path).expect_err("invalid toml");
        assert!(error.to_string().contains("Failed to parse CHECKON_CONFIG"));
    }

    #[test]
    fn load_from_path_normalizes_and_persists_supported_bounds() {
        let root = tempfile::tempdir().expect("root dir");
        let config_path = root.path().join("config.toml");
        write_config_file(
            &config_path,
            r#"
workspace_root = "  "

[git]
binary = "  git  "

[tox]
selected_environments = [" py311 ", "", "docs"]

[dependents]
limit = 0
request_timeout_secs = 9000
librariesio_api_url = "https://libraries.example/api/"

[logging]
level = "LOUD"
"#,
        );

        let config = load_from_path(&config_path).expect("load config");
        assert!(config.workspace_root.ends_with("workspaces"));
        assert_eq!(config.git.binary, "git");
        assert_eq!(config.tox.selected_environments, vec!["py311", "docs"]);
        assert_eq!(config.dependents.limit, 5);
        assert_eq!(config.dependents.request_timeout_secs, 300);
        assert_eq!(
            config.dependents.librariesio_api_url,
            "https://libraries.example/api"
        );
        assert_eq!(config.logging.level, "info");

        let persisted = std::fs::read_to_string(&config_path).expect("read persisted config");
        let reparsed: CheckonConfig = toml::from_str(&persisted).expect("reparse");
        assert_eq!(reparsed, config);
    }

    #[test]
    fn typed_slices_expose_expected_fields() {
        let mut config = CheckonConfig::default();
        config.workspace_root = "/w".to_owned();
        config.results_root = "/r".to_owned();
        config.git.binary = "/opt/git/bin/git".to_owned();
        config.runtime.allow_unsafe_command_paths = true;
        config.diagnostics.enabled = true;
        config.diagnostics.dir = "/d".to_owned();

        let workspace = config.workspace_runtime();
        assert_eq!(workspace.workspace_root, PathBuf::from("/w"));
        assert_eq!(workspace.results_root, PathBuf::from("/r"));
        assert_eq!(workspace.git_binary, PathBuf::from("/opt/git/bin/git"));
        assert!(workspace.allow_unsafe_command_paths);
        assert_eq!(config.diagnostics_dir(), Some(PathBuf::from("/d")));
        assert_eq!(config.dependents_runtime().limit, 5);
    }
}
