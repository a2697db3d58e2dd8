//! Apportionment engine.
//!
//! Three pure stages invoked once per run with fully materialized inputs:
//!
//! normalize (raw metrics -> weights) -> apportion (national total -> allocations)
//! -> validate (allocations + weights -> report)
//!
//! `run` drives the stages over every period x category and skips the items
//! that fail, so a bad category never takes the whole run down.

use crate::domain::{ApportionConfig, UnitTable};
use crate::error::EngineError;

pub mod apportion;
pub mod normalize;
pub mod run;
pub mod validate;

pub use run::*;

/// Engine entry point. Holds the constants and the unit reference table.
#[derive(Debug, Clone)]
pub struct Apportioner<'a> {
    config: ApportionConfig,
    units: &'a UnitTable,
}

impl<'a> Apportioner<'a> {
    pub fn new(config: ApportionConfig, units: &'a UnitTable) -> Result<Self, EngineError> {
        config.check()?;
        Ok(Self { config, units })
    }

    pub fn config(&self) -> &ApportionConfig {
        &self.config
    }

    pub fn units(&self) -> &'a UnitTable {
        self.units
    }
}

/// Round half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
