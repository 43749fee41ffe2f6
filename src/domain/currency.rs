//! Conversion of foreign-currency prices into the base currency.
//!
//! Rates are looked up for the price's own date; when that date has no rate
//! the most recent earlier rate is used. If only the opposite pair is known,
//! its reciprocal is used under the same rule. With no usable rate at all the
//! conversion fails with `MissingExchangeRate`.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

use super::error::PortsimError;
use super::price::{Currency, ExchangeRate, PricePoint};

/// What a run does when a price cannot be converted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingRatePolicy {
    /// The run terminates and its result is marked incomplete.
    #[default]
    Abort,
    /// The point is dropped and recorded as a price gap.
    SkipPoint,
}

#[derive(Debug, Clone, Default)]
pub struct CurrencyNormalizer {
    rates: HashMap<(Currency, Currency), BTreeMap<NaiveDate, f64>>,
}

impl CurrencyNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rates(rates: impl IntoIterator<Item = ExchangeRate>) -> Result<Self, PortsimError> {
        let mut normalizer = Self::new();
        for rate in rates {
            normalizer.add_rate(rate)?;
        }
        Ok(normalizer)
    }

    /// Registers a rate. Non-positive or non-finite rates are rejected.
    pub fn add_rate(&mut self, rate: ExchangeRate) -> Result<(), PortsimError> {
        if !rate.rate.is_finite() || rate.rate <= 0.0 {
            return Err(PortsimError::DataSource {
                reason: format!(
                    "invalid exchange rate {}->{} on {}: {}",
                    rate.from, rate.to, rate.date, rate.rate
                ),
            });
        }
        self.rates
            .entry((rate.from, rate.to))
            .or_default()
            .insert(rate.date, rate.rate);
        Ok(())
    }

    pub fn rate_count(&self) -> usize {
        self.rates.values().map(BTreeMap::len).sum()
    }

    /// Rate for converting `from` into `to` as of `date`.
    pub fn rate(
        &self,
        from: &Currency,
        to: &Currency,
        date: NaiveDate,
    ) -> Result<f64, PortsimError> {
        if from == to {
            return Ok(1.0);
        }

        let direct = self.latest_on_or_before(from, to, date);
        let inverse = self.latest_on_or_before(to, from, date);

        // The more recent quote wins; the direct pair wins a tie.
        let rate = match (direct, inverse) {
            (Some((d_date, d_rate)), Some((i_date, i_rate))) => {
                if i_date > d_date {
                    1.0 / i_rate
                } else {
                    d_rate
                }
            }
            (Some((_, d_rate)), None) => d_rate,
            (None, Some((_, i_rate))) => 1.0 / i_rate,
            (None, None) => {
                return Err(PortsimError::MissingExchangeRate {
                    from: from.clone(),
                    to: to.clone(),
                    date,
                });
            }
        };
        Ok(rate)
    }

    /// Returns `point` expressed in `target`.
    pub fn normalize(
        &self,
        point: &PricePoint,
        target: &Currency,
    ) -> Result<PricePoint, PortsimError> {
        let rate = self.rate(&point.currency, target, point.date)?;
        Ok(PricePoint {
            ticker: point.ticker.clone(),
            date: point.date,
            close: point.close * rate,
            currency: target.clone(),
        })
    }

    fn latest_on_or_before(
        &self,
        from: &Currency,
        to: &Currency,
        date: NaiveDate,
    ) -> Option<(NaiveDate, f64)> {
        self.rates
            .get(&(from.clone(), to.clone()))?
            .range(..=date)
            .next_back()
            .map(|(&d, &r)| (d, r))
    }
}
