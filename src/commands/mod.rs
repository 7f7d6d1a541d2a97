//! CLI command handlers.

mod run;
mod status;
mod submit;

pub(crate) use run::run_recovery_command;
pub(crate) use status::{run_list_command, run_status_command};
pub(crate) use submit::run_submit_command;
