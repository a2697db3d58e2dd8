//! Upstream data sources.
//!
//! Each client reads its API key from the environment (`.env` is loaded first)
//! and converts responses into domain records. Parsing is kept in plain functions
//! so it can be tested without the network.

pub mod census;
pub mod fred;
pub mod weather;
