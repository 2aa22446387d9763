use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(ProjectUrl);
string_id!(RevisionHash);
string_id!(EnvName);

impl RevisionHash {
    /// Accepts the trimmed output of `git rev-parse HEAD` (SHA-1 or SHA-256).
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let valid_length = trimmed.len() == 40 || trimmed.len() == 64;
        if valid_length && trimmed.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            return Some(Self(trimmed.to_ascii_lowercase()));
        }
        None
    }
}

/// The candidate library version under test, already resolved to an installable reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reference", rename_all = "snake_case")]
pub enum InjectedArtifact {
    /// A registry requirement such as `libx==2.0`.
    Requirement(String),
    /// A VCS or URL reference passed through to the installer unchanged.
    Remote(String),
    /// An absolute path to a local source tree or built distribution.
    LocalPath(String),
}

impl InjectedArtifact {
    pub fn install_spec(&self) -> &str {
        match self {
            Self::Requirement(value) | Self::Remote(value) | Self::LocalPath(value) => value,
        }
    }
}

impl std::fmt::Display for InjectedArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.install_spec())
    }
}
