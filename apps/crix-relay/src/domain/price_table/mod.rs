//! Price Table
//!
//! Maps each currency code to the last ticker that was emitted for it.
//! The table is owned by the normalizer (single writer, no readers
//! elsewhere), so it carries no lock.
//!
//! # Change Detection
//!
//! The price is the only change-detection key. An event whose price equals
//! the stored price is suppressed and leaves the table untouched, even if
//! volume or change rate moved. A currency with no entry always counts as
//! changed.

use std::collections::HashMap;

use super::ticker::Ticker;

/// Last-emitted ticker per currency code.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    entries: HashMap<String, Ticker>,
}

impl PriceTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the table with a snapshot ticker, overwriting any entry.
    ///
    /// Priming never counts as an emission.
    pub fn prime(&mut self, ticker: Ticker) {
        self.entries.insert(ticker.currency.clone(), ticker);
    }

    /// Record a candidate ticker.
    ///
    /// Returns `true` and stores the ticker when its price differs from the
    /// stored price (or the currency is new). Returns `false` and leaves the
    /// table untouched otherwise.
    #[allow(clippy::float_cmp)]
    pub fn record(&mut self, ticker: &Ticker) -> bool {
        if let Some(previous) = self.entries.get(&ticker.currency)
            && previous.price == ticker.price
        {
            return false;
        }

        self.entries.insert(ticker.currency.clone(), ticker.clone());
        true
    }

    /// Get the last emitted ticker for a currency.
    #[must_use]
    pub fn get(&self, currency: &str) -> Option<&Ticker> {
        self.entries.get(currency)
    }

    /// Get the last emitted price for a currency.
    #[must_use]
    pub fn last_price(&self, currency: &str) -> Option<f64> {
        self.entries.get(currency).map(|ticker| ticker.price)
    }

    /// Number of tracked currencies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no currency has been primed or emitted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
