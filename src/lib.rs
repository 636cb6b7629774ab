// Internal library for the sharekeeper binary and its tests
// Not intended for external use as a library

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod mesh;
pub mod protocol;
pub mod recovery;
pub mod registry;
pub mod server;
pub mod session;
pub mod sharing;
pub mod signaling;
