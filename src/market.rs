//! Read-only market facts consumed by the pricing engine: the active rate
//! board, the commission table and the segment discount schedule.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{DeskError, Result};
use crate::models::{Commission, RateQuote, Segment, SegmentDiscount};

/// Yields the single active quote for a currency
pub trait RateProvider: Send + Sync {
    fn active_quote(&self, currency: &str) -> Option<RateQuote>;
}

/// Keyed commission lookup
pub trait CommissionSource: Send + Sync {
    fn commission(&self, currency: &str) -> Option<Commission>;
}

/// Discount percentage for a segment on a given day
pub trait DiscountResolver: Send + Sync {
    fn active_discount(&self, segment: Segment, as_of: NaiveDate) -> Option<Decimal>;
}

/// In-memory rate board
///
/// Publishing an active quote deactivates the previous active quote for the
/// same currency, so at most one is active at a time.
#[derive(Debug, Default)]
pub struct RateBoard {
    quotes: RwLock<Vec<RateQuote>>,
}

impl RateBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, quote: RateQuote) {
        let mut quotes = self.quotes.write().unwrap_or_else(PoisonError::into_inner);
        if quote.active {
            for existing in quotes
                .iter_mut()
                .filter(|q| q.active && q.currency == quote.currency)
            {
                existing.active = false;
            }
        }
        quotes.push(quote);
    }

    /// Turn off every quote for a currency
    pub fn deactivate(&self, currency: &str) {
        let mut quotes = self.quotes.write().unwrap_or_else(PoisonError::into_inner);
        for quote in quotes.iter_mut().filter(|q| q.currency == currency) {
            quote.active = false;
        }
    }
}

impl RateProvider for RateBoard {
    fn active_quote(&self, currency: &str) -> Option<RateQuote> {
        let quotes = self.quotes.read().unwrap_or_else(PoisonError::into_inner);
        quotes
            .iter()
            .filter(|q| q.active && q.currency == currency)
            .max_by_key(|q| q.created_at)
            .cloned()
    }
}

/// Row of a commission file: `currency,commission_buy,commission_sell`
#[derive(Debug, Deserialize)]
struct CommissionRow {
    currency: String,
    commission_buy: Decimal,
    commission_sell: Decimal,
}

/// Static commission table keyed by currency code
#[derive(Debug, Clone, Default)]
pub struct CommissionTable {
    entries: HashMap<String, Commission>,
}

impl CommissionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commission(mut self, currency: &str, buy: Decimal, sell: Decimal) -> Self {
        self.entries
            .insert(currency.to_string(), Commission { buy, sell });
        self
    }

    /// Load a table from CSV. Malformed rows fail the whole load.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut table = Self::new();
        for row in csv_reader.deserialize() {
            let row: CommissionRow = row?;
            if row.commission_buy.is_sign_negative() || row.commission_sell.is_sign_negative() {
                return Err(DeskError::Config(format!(
                    "negative commission for {}",
                    row.currency
                )));
            }
            table = table.with_commission(&row.currency, row.commission_buy, row.commission_sell);
        }
        Ok(table)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_csv_reader(file)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CommissionSource for CommissionTable {
    fn commission(&self, currency: &str) -> Option<Commission> {
        self.entries.get(currency).copied()
    }
}

/// Segment discounts with non-overlapping active windows per segment
#[derive(Debug, Clone, Default)]
pub struct DiscountSchedule {
    discounts: Vec<SegmentDiscount>,
}

impl DiscountSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a discount, rejecting active windows that overlap an existing
    /// active window for the same segment
    pub fn add(&mut self, discount: SegmentDiscount) -> Result<()> {
        if discount.percentage < Decimal::ZERO || discount.percentage > Decimal::ONE_HUNDRED {
            return Err(DeskError::Config(format!(
                "discount percentage {} outside 0..=100",
                discount.percentage
            )));
        }
        if let Some(to) = discount.valid_to {
            if to < discount.valid_from {
                return Err(DeskError::Config(
                    "discount window ends before it starts".to_string(),
                ));
            }
        }
        if discount.active
            && self
                .discounts
                .iter()
                .any(|d| d.active && d.segment == discount.segment && d.overlaps(&discount))
        {
            return Err(DeskError::OverlappingDiscount(discount.segment.code()));
        }
        self.discounts.push(discount);
        Ok(())
    }
}

impl DiscountResolver for DiscountSchedule {
    fn active_discount(&self, segment: Segment, as_of: NaiveDate) -> Option<Decimal> {
        self.discounts
            .iter()
            .find(|d| d.active && d.segment == segment && d.covers(as_of))
            .map(|d| d.percentage)
    }
}
