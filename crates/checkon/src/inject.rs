use std::path::{Path, PathBuf};

use checkon_core::{CoreError, InjectedArtifact};
use regex::Regex;

const VCS_PATTERN: &str = r"^(git|hg|svn|bzr)\+";
const URL_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9+.-]*://";
/// A PEP 508 distribution name, optionally followed by extras, specifiers or markers.
const REQUIREMENT_PATTERN: &str = r"^[A-Za-z0-9]([A-Za-z0-9._-]*[A-Za-z0-9])?\s*(\[[^\]]*\])?\s*([<>=!~;@(].*)?$";

fn compile(pattern: &str) -> Result<Regex, CoreError> {
    Regex::new(pattern).map_err(|error| {
        CoreError::ArtifactResolution(format!("invalid built-in pattern '{pattern}': {error}"))
    })
}

fn looks_like_path(spec: &str) -> bool {
    spec.contains('/')
        || spec.contains('\\')
        || spec.starts_with('.')
        || spec.starts_with('~')
        || Path::new(spec).exists()
}

fn expand_home(spec: &str) -> Result<PathBuf, CoreError> {
    let Some(rest) = spec.strip_prefix('~') else {
        return Ok(PathBuf::from(spec));
    };
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .ok_or_else(|| {
            CoreError::ArtifactResolution(format!(
                "cannot expand '{spec}': neither HOME nor USERPROFILE is set"
            ))
        })?;
    Ok(PathBuf::from(home).join(rest.trim_start_matches(['/', '\\'])))
}

/// Resolves an injected-artifact specifier into the reference handed to pip.
///
/// VCS and URL references and plain requirement strings pass through unchanged.
/// Anything path-like is made absolute and must exist.
pub fn resolve_inject(spec: &str) -> Result<InjectedArtifact, CoreError> {
    let trimmed = spec.trim();
    let trimmed = trimmed
        .strip_prefix("--editable")
        .or_else(|| trimmed.strip_prefix("-e"))
        .map(str::trim_start)
        .unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(CoreError::ArtifactResolution(format!(
            "'{spec}' is not an installable specifier"
        )));
    }

    if compile(VCS_PATTERN)?.is_match(trimmed) || compile(URL_PATTERN)?.is_match(trimmed) {
        return Ok(InjectedArtifact::Remote(trimmed.to_owned()));
    }

    if looks_like_path(trimmed) {
        let path = expand_home(trimmed)?;
        let resolved = path.canonicalize().map_err(|error| {
            CoreError::ArtifactResolution(format!(
                "local artifact '{}' cannot be resolved: {error}",
                path.display()
            ))
        })?;
        return Ok(InjectedArtifact::LocalPath(
            resolved.to_string_lossy().into_owned(),
        ));
    }

    if compile(REQUIREMENT_PATTERN)?.is_match(trimmed) {
        return Ok(InjectedArtifact::Requirement(trimmed.to_owned()));
    }

    Err(CoreError::ArtifactResolution(format!(
        "'{spec}' is neither a requirement, a VCS reference nor an existing path"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requirements_pass_through_unchanged() {
        for spec in [
            "libx",
            "libx==2.0",
            "libx[extra]>=1.0,<3",
            "libx ; python_version >= '3.8'",
            "libx @ https://example.com/libx-1.0.tar.gz",
        ] {
            assert_eq!(
                resolve_inject(spec).expect(spec),
                InjectedArtifact::Requirement(spec.to_owned())
            );
        }
    }

    #[test]
    fn vcs_and_url_references_pass_through() {
        assert_eq!(
            resolve_inject("git+https://github.com/example/libx@main").expect("vcs"),
            InjectedArtifact::Remote("git+https://github.com/example/libx@main".to_owned())
        );
        assert_eq!(
            resolve_inject("-e git+https://github.com/example/libx").expect("editable vcs"),
            InjectedArtifact::Remote("git+https://github.com/example/libx".to_owned())
        );
        assert_eq!(
            resolve_inject("https://files.example.com/libx-2.0.whl").expect("url"),
            InjectedArtifact::Remote("https://files.example.com/libx-2.0.whl".to_owned())
        );
    }

    #[test]
    fn existing_local_path_becomes_absolute() {
        let dir = tempfile::tempdir().expect("tempdir");
        let project = dir.path().join("libx");
        std::fs::create_dir_all(&project).expect("project dir");

        let resolved = resolve_inject(project.to_str().expect("utf-8 path")).expect("resolve");
        let expected = project.canonicalize().expect("canonical");
        assert_eq!(
            resolved,
            InjectedArtifact::LocalPath(expected.to_string_lossy().into_owned())
        );
    }

    #[test]
    fn missing_local_path_is_a_resolution_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope");
        let error = resolve_inject(missing.to_str().expect("utf-8 path")).expect_err("missing");
        assert!(matches!(error, CoreError::ArtifactResolution(_)));
        assert!(error.is_run_fatal());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(resolve_inject("   ").is_err());
        assert!(resolve_inject("==2.0").is_err());
    }
}
