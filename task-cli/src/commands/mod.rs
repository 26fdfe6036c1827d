//! CLI command implementations.

pub mod list;
pub mod purge;
pub mod show;
pub mod verify;
