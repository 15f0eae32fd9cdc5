//! StructLab Core: domain types, detectors, composite gate, exit planning, guards.
//!
//! This crate contains the heart of the structure decision core:
//! - Domain types (bars, structures, decisions, broker/account snapshots)
//! - Six ATR-normalized structure detectors with lifecycle state machines
//! - Structure manager aggregating the cross-detector snapshot
//! - Four-component composite scorer with session-aware gating
//! - Structure exit planner with broker clamping and RR re-validation
//! - Execution guards with bounded stop rescaling
//! - The per-bar decision pipeline tying the chain together
//!
//! The core performs no I/O and reads no clock: every output is a pure
//! function of the bar sequence and the configuration document.

pub mod config;
pub mod detect;
pub mod domain;
pub mod exits;
pub mod guards;
pub mod indicators;
pub mod manager;
pub mod pipeline;
pub mod scorer;
pub mod sizing;
