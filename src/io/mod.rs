//! Configuration loading.

pub mod config;

pub use config::{MissionConfig, PatternParams};
