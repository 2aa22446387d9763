use std::path::PathBuf;

pub const DEFAULT_SHIM_PACKAGE: &str = "checkon-trial";
pub const DEFAULT_PYTEST_ADDOPTS: &str = "--tb=long";

/// Everything the executor needs; nothing is read from the process environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixConfig {
    pub python: PathBuf,
    /// Name fragments; empty keeps every declared environment.
    pub selected_environments: Vec<String>,
    pub install_shim: bool,
    pub shim_package: String,
    pub force_reinstall: bool,
    pub pytest_addopts: String,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            python: PathBuf::from("python3"),
            selected_environments: Vec::new(),
            install_shim: true,
            shim_package: DEFAULT_SHIM_PACKAGE.to_owned(),
            force_reinstall: true,
            pytest_addopts: DEFAULT_PYTEST_ADDOPTS.to_owned(),
        }
    }
}
