//! Revision-keyed checkouts of dependent projects.

mod cache;
mod manager;

pub use cache::{CacheLock, FsRevisionCache, InMemoryRevisionCache, PromoteOutcome, RevisionCache};
pub use manager::{CacheStatus, PreparedWorkspace, SETUP_RESULT_FILE, WorkspaceManager};
