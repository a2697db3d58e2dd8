//! Static reference data: states, excluded territories and retail categories.
//!
//! Loaded once at process start into immutable tables and passed into the
//! engine. Nothing here is mutated at runtime.

use std::collections::BTreeSet;

use crate::domain::{Category, CategoryId, Unit, UnitId, UnitTable};

/// FIPS state code to postal abbreviation (50 states + DC).
pub const STATES: [(&str, &str); 51] = [
    ("01", "AL"),
    ("02", "AK"),
    ("04", "AZ"),
    ("05", "AR"),
    ("06", "CA"),
    ("08", "CO"),
    ("09", "CT"),
    ("10", "DE"),
    ("11", "DC"),
    ("12", "FL"),
    ("13", "GA"),
    ("15", "HI"),
    ("16", "ID"),
    ("17", "IL"),
    ("18", "IN"),
    ("19", "IA"),
    ("20", "KS"),
    ("21", "KY"),
    ("22", "LA"),
    ("23", "ME"),
    ("24", "MD"),
    ("25", "MA"),
    ("26", "MI"),
    ("27", "MN"),
    ("28", "MS"),
    ("29", "MO"),
    ("30", "MT"),
    ("31", "NE"),
    ("32", "NV"),
    ("33", "NH"),
    ("34", "NJ"),
    ("35", "NM"),
    ("36", "NY"),
    ("37", "NC"),
    ("38", "ND"),
    ("39", "OH"),
    ("40", "OK"),
    ("41", "OR"),
    ("42", "PA"),
    ("44", "RI"),
    ("45", "SC"),
    ("46", "SD"),
    ("47", "TN"),
    ("48", "TX"),
    ("49", "UT"),
    ("50", "VT"),
    ("51", "VA"),
    ("53", "WA"),
    ("54", "WV"),
    ("55", "WI"),
    ("56", "WY"),
];

/// American Samoa, Guam, Northern Mariana Islands, Puerto Rico, US Virgin Islands.
pub const EXCLUDED_TERRITORIES: [&str; 5] = ["60", "66", "69", "72", "78"];

/// Retail categories apportioned by default (NAICS codes).
pub const DEFAULT_CATEGORIES: [(&str, &str); 2] = [
    ("445", "Food and Beverage Stores"),
    ("448", "Clothing and Accessories Stores"),
];

pub fn state_table() -> UnitTable {
    UnitTable::new(STATES.iter().map(|(code, abbr)| Unit {
        id: UnitId::from(*code),
        abbreviation: abbr.to_string(),
    }))
}

pub fn excluded_territories() -> BTreeSet<UnitId> {
    EXCLUDED_TERRITORIES.iter().map(|c| UnitId::from(*c)).collect()
}

pub fn default_categories() -> Vec<Category> {
    DEFAULT_CATEGORIES
        .iter()
        .map(|(id, label)| Category {
            id: CategoryId::from(*id),
            label: label.to_string(),
        })
        .collect()
}

/// Label for a category code, if it is one of the defaults.
pub fn category_label(id: &CategoryId) -> Option<&'static str> {
    DEFAULT_CATEGORIES
        .iter()
        .find(|(code, _)| *code == id.as_str())
        .map(|(_, label)| *label)
}
