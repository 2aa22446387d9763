use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error(
        "unsupported result store schema version {found}; this binary supports up to {supported}. Please upgrade checkon."
    )]
    UnsupportedSchemaVersion { supported: u32, found: u32 },
    #[error("failed to clone {url}: {detail}")]
    CloneFailed { url: String, detail: String },
    /// A revision cache entry could not be inspected, promoted or locked.
    #[error("workspace cache error: {0}")]
    Workspace(String),
    #[error("cannot resolve injected artifact: {0}")]
    ArtifactResolution(String),
    #[error("report error: {0}")]
    Report(String),
}

impl CoreError {
    /// Errors that stop the whole run rather than a single project.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            Self::Persistence(_)
                | Self::UnsupportedSchemaVersion { .. }
                | Self::ArtifactResolution(_)
                | Self::Configuration(_)
        )
    }
}
