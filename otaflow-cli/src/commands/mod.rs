//! CLI command implementations.

pub mod apply;
pub mod config;
pub mod init;
pub mod inspect;
pub mod reset_state;
pub mod status;
