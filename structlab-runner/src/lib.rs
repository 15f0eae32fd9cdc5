//! StructLab Runner: deterministic replay orchestration over the core.
//!
//! This crate builds on `structlab-core` to provide:
//! - TOML replay configuration (instruments, account, embedded or
//!   referenced core config)
//! - Strict CSV bar loading with per-line diagnostics
//! - Parallel per-symbol replay with a BLAKE3 decision-stream fingerprint

pub mod config;
pub mod data_loader;
pub mod runner;

pub use config::{
    AccountConfig, ConfigError, InstrumentConfig, ReplayConfig, ReplaySettings, RunId,
};
pub use data_loader::{load_bars, LoadError};
pub use runner::{run_replay, ReplayResult, RunError, SymbolReplay, SCHEMA_VERSION};
