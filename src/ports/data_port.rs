//! Market data port trait.

use crate::domain::error::PortsimError;
use crate::domain::price::{ExchangeRate, PricePoint};
use chrono::NaiveDate;
use std::collections::HashMap;

/// Source of daily closes and exchange rates.
///
/// A ticker with no data in the range may be absent from the returned map or
/// map to an empty vector; callers treat both the same way.
pub trait MarketDataProvider {
    fn fetch(
        &self,
        tickers: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<HashMap<String, Vec<PricePoint>>, PortsimError>;

    fn fetch_rates(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<ExchangeRate>, PortsimError>;
}
