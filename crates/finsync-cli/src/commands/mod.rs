//! Command implementations for the finsync CLI
//!
//! Each submodule handles one or more related CLI commands:
//! - `setup`: Configuration loading and collaborator wiring
//! - `sync`: One-user and all-user sync runs
//! - `users`: Listing configured users
//! - `config`: Showing the resolved configuration

pub mod config;
pub mod setup;
pub mod sync;
pub mod users;

pub use config::*;
pub use setup::*;
pub use sync::*;
pub use users::*;
