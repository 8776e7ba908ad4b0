pub mod archive;
pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod exclude;
pub mod executor;
pub mod health;
pub mod inspect;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod supervisor;
pub mod target;
pub mod transfer;
pub mod transport;
pub mod utils;
