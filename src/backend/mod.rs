//! Concrete collaborator backends.
//!
//! - [`ScriptedBackend`]: deterministic, in-memory; drives tests and dry runs
//! - [`CommandBackend`]: one external process per call, JSON over stdio

mod command;
mod scripted;

pub use command::CommandBackend;
pub use scripted::{CallRecord, ScriptedBackend};
