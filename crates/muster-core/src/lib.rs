pub mod commands;
pub mod config;
pub mod error;
pub mod gateway;
pub mod liveness;
pub mod registry;
pub mod retention;
pub mod snapshot;
pub mod vault;
