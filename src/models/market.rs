use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::client::Segment;

/// Buy/sell quote for a foreign currency against the base currency
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateQuote {
    pub currency: String,
    pub buy: Decimal,
    pub sell: Decimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Commission per unit of foreign currency, in base currency
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Commission {
    pub buy: Decimal,
    pub sell: Decimal,
}

/// Discount on commissions for a segment during a validity window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SegmentDiscount {
    pub segment: Segment,
    /// Percentage between 0 and 100
    pub percentage: Decimal,
    pub valid_from: NaiveDate,
    /// Open-ended when `None`
    pub valid_to: Option<NaiveDate>,
    pub active: bool,
}

impl SegmentDiscount {
    pub fn covers(&self, date: NaiveDate) -> bool {
        self.valid_from <= date && self.valid_to.map_or(true, |to| date <= to)
    }

    /// Whether two validity windows share at least one day
    pub fn overlaps(&self, other: &SegmentDiscount) -> bool {
        let starts_before_other_ends = other.valid_to.map_or(true, |to| self.valid_from <= to);
        let other_starts_before_end = self.valid_to.map_or(true, |to| other.valid_from <= to);
        starts_before_other_ends && other_starts_before_end
    }
}
