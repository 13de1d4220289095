pub mod backend;
pub mod collaborators;
pub mod compaction;
pub mod config;
pub mod errors;
pub mod gates;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod retry;
pub mod story;
pub mod ui;

pub use collaborators::Collaborators;
pub use config::PipelineConfig;
pub use errors::{CollaboratorError, PipelineError};
pub use pipeline::{Pipeline, PipelineState, RunOutcome, RunStatus, Stage, run};
