pub mod dependents;
pub mod inject;
pub mod pipeline;
pub mod render;

pub use dependents::{
    DependentsSource, FileDependents, LibrariesIoDependents, LiteralDependents,
    parse_dependents_page,
};
pub use inject::resolve_inject;
pub use pipeline::{
    Comparison, PairFailure, Pipeline, PipelineSettings, RunOutcome, RunSummary,
};
pub use render::{OutputFormat, render_json, render_records, render_table};
