//! Core library for the labbench instrument-control runtime.
//!
//! Turns a declarative YAML instrument profile plus a bench description
//! into a live, driven, safety-checked set of devices, with simulation,
//! record/replay, and measurement-session orchestration built on top.

pub mod bench;
pub mod cli;
pub mod compliance;
pub mod config;
pub mod error;
pub mod instrument;
pub mod measurement;
pub mod metadata;
pub mod profile;
pub mod safety;
pub mod session;
pub mod sim;
pub mod store;
pub mod transport;
