//! isle - development orchestrator for file-based route and island web projects

pub mod build;
pub mod collect;
pub mod commands;
pub mod config;
pub mod dev;
pub mod dispatch;
pub mod generate;
pub mod legacy;
pub mod manifest;
pub mod plugin;
pub mod server;
pub mod update;
pub mod version;
