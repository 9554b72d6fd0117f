//! Application wiring and lifecycle management.

mod init;
mod scheduler;
mod server;
mod state;

pub use init::{print_status, run_service, run_single_cycle};
pub use state::RelayState;
