//! Turns per-environment report pairs into the uniform result model.

mod junit;
mod normalize;
mod summary;

pub use junit::parse_junit;
pub use normalize::{normalize_dir, normalize_environment, normalize_report};
pub use summary::parse_tox_summary;
