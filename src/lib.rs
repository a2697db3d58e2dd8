//! `retail-sources` library crate.
//!
//! The binary (`rds`) is a thin wrapper around this library so that:
//!
//! - the apportionment engine is testable without spawning processes
//! - source clients, sinks and the engine stay reusable on their own
//!
//! Data flows source -> domain records -> engine -> sinks; the engine never
//! touches the network or the filesystem.

pub mod app;
pub mod classify;
pub mod cli;
pub mod data;
pub mod domain;
pub mod engine;
pub mod error;
pub mod logging;
pub mod report;
pub mod sink;
