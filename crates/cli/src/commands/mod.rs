//! CLI command implementations

pub mod health;
pub mod history;
pub mod status;
