//! Output sinks.
//!
//! - JSON documents per source (`json`)
//! - MERGE scripts for the warehouse load (`sql`)

use clap::ValueEnum;

pub mod json;
pub mod sql;

/// Layout of the retail sales JSON document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ExportSchema {
    /// Versioned flat record lists.
    #[default]
    Flat,
    /// Month -> state -> category tree.
    Nested,
}
