// Library root: re-exports all modules so integration tests and the CLI
// binary can access the crate's public API.

pub mod config;
pub mod credentials;
pub mod error;
pub mod flags;
pub mod gateway;
pub mod loading;
pub mod model;
pub mod session;
pub mod storage;
