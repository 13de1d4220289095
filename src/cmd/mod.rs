//! CLI command implementations.
//!
//! | Module   | Commands handled  |
//! |----------|-------------------|
//! | `run`    | `Run`, `Resume`   |
//! | `status` | `Status`          |
//! | `config` | `Config`          |

pub mod config;
pub mod run;
pub mod status;

pub use config::cmd_config;
pub use run::{cmd_resume, cmd_run};
pub use status::cmd_status;
