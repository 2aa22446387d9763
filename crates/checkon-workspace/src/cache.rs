use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use checkon_core::{CoreError, RevisionHash};
use fs2::FileExt;

const SCRATCH_DIR_NAME: &str = ".scratch";
const LOCK_FILE_NAME: &str = ".lock";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoteOutcome {
    Promoted(PathBuf),
    /// Another preparation won the race; the scratch checkout was discarded.
    AlreadyPresent(PathBuf),
}

impl PromoteOutcome {
    pub fn path(&self) -> &Path {
        match self {
            Self::Promoted(path) | Self::AlreadyPresent(path) => path,
        }
    }
}

/// Held for the duration of a check-then-promote sequence.
pub struct CacheLock {
    file: Option<File>,
}

impl CacheLock {
    pub fn unguarded() -> Self {
        Self { file: None }
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}

/// Content-addressed store of prepared checkouts, one directory per revision.
pub trait RevisionCache: Send + Sync {
    fn revision_path(&self, revision: &RevisionHash) -> PathBuf;

    fn is_prepared(&self, revision: &RevisionHash) -> Result<bool, CoreError>;

    /// A fresh, empty location for a clone that may later be promoted.
    fn allocate_scratch(&self) -> Result<PathBuf, CoreError>;

    fn discard_scratch(&self, scratch: &Path);

    fn promote(&self, scratch: &Path, revision: &RevisionHash)
    -> Result<PromoteOutcome, CoreError>;

    fn lock(&self) -> Result<CacheLock, CoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsRevisionCache {
    root: PathBuf,
}

impl FsRevisionCache {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|error| {
            CoreError::Configuration(format!(
                "Failed to create workspace cache root '{}': {error}",
                root.display()
            ))
        })?;
        if !root.is_dir() {
            return Err(CoreError::Configuration(format!(
                "Workspace cache root '{}' is not a directory.",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scratch_root(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR_NAME)
    }
}

impl RevisionCache for FsRevisionCache {
    fn revision_path(&self, revision: &RevisionHash) -> PathBuf {
        self.root.join(revision.as_str())
    }

    fn is_prepared(&self, revision: &RevisionHash) -> Result<bool, CoreError> {
        let path = self.revision_path(revision);
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_dir() => Ok(true),
            Ok(_) => Err(CoreError::Workspace(format!(
                "Workspace cache entry '{}' exists but is not a directory.",
                path.display()
            ))),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(error) => Err(CoreError::Workspace(format!(
                "Failed to inspect workspace cache entry '{}': {error}",
                path.display()
            ))),
        }
    }

    fn allocate_scratch(&self) -> Result<PathBuf, CoreError> {
        let scratch_root = self.scratch_root();
        fs::create_dir_all(&scratch_root).map_err(|error| {
            CoreError::Workspace(format!(
                "Failed to create scratch directory '{}': {error}",
                scratch_root.display()
            ))
        })?;

        let scratch = tempfile::Builder::new()
            .prefix("clone-")
            .tempdir_in(&scratch_root)
            .map_err(|error| {
                CoreError::Workspace(format!(
                    "Failed to allocate scratch checkout under '{}': {error}",
                    scratch_root.display()
                ))
            })?;
        Ok(scratch.keep())
    }

    fn discard_scratch(&self, scratch: &Path) {
        if let Err(error) = fs::remove_dir_all(scratch) {
            if error.kind() != io::ErrorKind::NotFound {
                tracing::warn!(
                    error = %error,
                    scratch = %scratch.display(),
                    "failed to remove scratch checkout"
                );
            }
        }
    }

    fn promote(
        &self,
        scratch: &Path,
        revision: &RevisionHash,
    ) -> Result<PromoteOutcome, CoreError> {
        let target = self.revision_path(revision);
        if self.is_prepared(revision)? {
            self.discard_scratch(scratch);
            return Ok(PromoteOutcome::AlreadyPresent(target));
        }

        match fs::rename(scratch, &target) {
            Ok(()) => Ok(PromoteOutcome::Promoted(target)),
            Err(_) if target.is_dir() => {
                self.discard_scratch(scratch);
                Ok(PromoteOutcome::AlreadyPresent(target))
            }
            Err(error) => Err(CoreError::Workspace(format!(
                "Failed to promote '{}' to '{}': {error}",
                scratch.display(),
                target.display()
            ))),
        }
    }

    fn lock(&self) -> Result<CacheLock, CoreError> {
        let lock_path = self.root.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(|error| {
                CoreError::Workspace(format!(
                    "Failed to open workspace cache lock '{}': {error}",
                    lock_path.display()
                ))
            })?;
        file.lock_exclusive().map_err(|error| {
            CoreError::Workspace(format!(
                "Failed to lock workspace cache '{}': {error}",
                lock_path.display()
            ))
        })?;
        Ok(CacheLock { file: Some(file) })
    }
}

/// Cache double that never touches the filesystem.
#[derive(Debug, Default)]
pub struct InMemoryRevisionCache {
    root: PathBuf,
    prepared: Mutex<BTreeSet<RevisionHash>>,
    scratch_counter: AtomicU64,
    promotions: Mutex<Vec<(PathBuf, RevisionHash)>>,
    discarded: Mutex<Vec<PathBuf>>,
}

impl InMemoryRevisionCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn with_prepared(root: impl Into<PathBuf>, revisions: &[RevisionHash]) -> Self {
        let cache = Self::new(root);
        cache
            .prepared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(revisions.iter().cloned());
        cache
    }

    pub fn promotions(&self) -> Vec<(PathBuf, RevisionHash)> {
        self.promotions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn discarded(&self) -> Vec<PathBuf> {
        self.discarded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl RevisionCache for InMemoryRevisionCache {
    fn revision_path(&self, revision: &RevisionHash) -> PathBuf {
        self.root.join(revision.as_str())
    }

    fn is_prepared(&self, revision: &RevisionHash) -> Result<bool, CoreError> {
        Ok(self
            .prepared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(revision))
    }

    fn allocate_scratch(&self) -> Result<PathBuf, CoreError> {
        let index = self.scratch_counter.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .root
            .join(SCRATCH_DIR_NAME)
            .join(format!("clone-{index}")))
    }

    fn discard_scratch(&self, scratch: &Path) {
        self.discarded
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(scratch.to_path_buf());
    }

    fn promote(
        &self,
        scratch: &Path,
        revision: &RevisionHash,
    ) -> Result<PromoteOutcome, CoreError> {
        let target = self.revision_path(revision);
        let inserted = self
            .prepared
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(revision.clone());
        if !inserted {
            self.discard_scratch(scratch);
            return Ok(PromoteOutcome::AlreadyPresent(target));
        }

        self.promotions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((scratch.to_path_buf(), revision.clone()));
        Ok(PromoteOutcome::Promoted(target))
    }

    fn lock(&self) -> Result<CacheLock, CoreError> {
        Ok(CacheLock::unguarded())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn revision(fill: char) -> RevisionHash {
        RevisionHash::parse(&fill.to_string().repeat(40)).expect("valid revision")
    }

    #[test]
    fn fs_cache_allocates_scratch_inside_the_root() {
        let root = tempfile::tempdir().expect("cache root");
        let cache = FsRevisionCache::new(root.path()).expect("cache");

        let scratch = cache.allocate_scratch().expect("scratch");
        assert!(scratch.is_dir());
        assert!(scratch.starts_with(root.path().join(SCRATCH_DIR_NAME)));
    }

    #[test]
    fn fs_cache_promotes_once_and_discards_the_loser() {
        let root = tempfile::tempdir().expect("cache root");
        let cache = FsRevisionCache::new(root.path()).expect("cache");
        let rev = revision('a');

        let first = cache.allocate_scratch().expect("first scratch");
        fs::write(first.join("setup.py"), "first").expect("write marker");
        let outcome = cache.promote(&first, &rev).expect("promote first");
        assert_eq!(outcome, PromoteOutcome::Promoted(cache.revision_path(&rev)));
        assert!(cache.is_prepared(&rev).expect("prepared"));
        assert!(!first.exists());

        let second = cache.allocate_scratch().expect("second scratch");
        fs::write(second.join("setup.py"), "second").expect("write marker");
        let outcome = cache.promote(&second, &rev).expect("promote second");
        assert!(matches!(outcome, PromoteOutcome::AlreadyPresent(_)));
        assert!(!second.exists());
        assert_eq!(
            fs::read_to_string(cache.revision_path(&rev).join("setup.py")).expect("marker"),
            "first"
        );
    }

    #[test]
    fn fs_cache_rejects_a_file_in_place_of_a_revision_directory() {
        let root = tempfile::tempdir().expect("cache root");
        let cache = FsRevisionCache::new(root.path()).expect("cache");
        let rev = revision('b');
        fs::write(cache.revision_path(&rev), "not a dir").expect("write file");

        assert!(matches!(cache.is_prepared(&rev), Err(CoreError::Workspace(_))));
    }

    #[test]
    fn fs_cache_lock_is_reacquirable_after_release() {
        let root = tempfile::tempdir().expect("cache root");
        let cache = FsRevisionCache::new(root.path()).expect("cache");

        drop(cache.lock().expect("first lock"));
        drop(cache.lock().expect("second lock"));
        assert!(root.path().join(LOCK_FILE_NAME).exists());
    }

    #[test]
    fn in_memory_cache_simulates_hits_and_misses() {
        let hit = revision('c');
        let miss = revision('d');
        let cache = InMemoryRevisionCache::with_prepared("/virtual", std::slice::from_ref(&hit));

        assert!(cache.is_prepared(&hit).expect("lookup"));
        assert!(!cache.is_prepared(&miss).expect("lookup"));

        let scratch = cache.allocate_scratch().expect("scratch");
        cache.promote(&scratch, &miss).expect("promote");
        assert!(cache.is_prepared(&miss).expect("lookup"));
        assert_eq!(cache.promotions(), vec![(scratch, miss)]);
    }
}
