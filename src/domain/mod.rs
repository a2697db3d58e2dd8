//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - identifiers and reference data (`UnitId`, `CategoryId`, `Period`, `UnitTable`)
//! - engine records (`Weight`, `PeriodTotal`, `Allocation`, `AllocationSet`)
//! - the validation output (`ValidationReport`)
//! - engine constants (`ApportionConfig`)
//! - economic indicators and their classification (`economic`)

pub mod economic;
pub mod reference;
pub mod types;

pub use types::*;
