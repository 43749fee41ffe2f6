#![allow(dead_code)]

use chrono::{Datelike, NaiveDate, Weekday};
use portsim::domain::backtest::BacktestConfig;
use portsim::domain::currency::MissingRatePolicy;
use portsim::domain::error::PortsimError;
use portsim::domain::price::{Currency, ExchangeRate, PricePoint, PriceSeries};
use portsim::domain::schedule::RebalanceInterval;
use portsim::ports::data_port::MarketDataProvider;
use std::collections::HashMap;
use std::sync::Mutex;

pub struct MockMarketData {
    pub data: HashMap<String, Vec<PricePoint>>,
    pub rates: Vec<ExchangeRate>,
    pub errors: HashMap<String, String>,
    /// Every `(tickers, start, end)` passed to `fetch`.
    pub requests: Mutex<Vec<(Vec<String>, NaiveDate, NaiveDate)>>,
}

impl MockMarketData {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            rates: Vec::new(),
            errors: HashMap::new(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_points(mut self, ticker: &str, points: Vec<PricePoint>) -> Self {
        self.data.insert(ticker.to_string(), points);
        self
    }

    pub fn with_rate(mut self, rate: ExchangeRate) -> Self {
        self.rates.push(rate);
        self
    }

    pub fn with_error(mut self, ticker: &str, reason: &str) -> Self {
        self.errors.insert(ticker.to_string(), reason.to_string());
        self
    }
}

impl MarketDataProvider for MockMarketData {
    fn fetch(
        &self,
        tickers: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<HashMap<String, Vec<PricePoint>>, PortsimError> {
        self.requests
            .lock()
            .unwrap()
            .push((tickers.to_vec(), start_date, end_date));

        let mut out = HashMap::new();
        for ticker in tickers {
            if let Some(reason) = self.errors.get(ticker) {
                return Err(PortsimError::DataSource {
                    reason: reason.clone(),
                });
            }
            let points: Vec<PricePoint> = self
                .data
                .get(ticker)
                .map(|pts| {
                    pts.iter()
                        .filter(|p| p.date >= start_date && p.date <= end_date)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            out.insert(ticker.clone(), points);
        }
        Ok(out)
    }

    fn fetch_rates(
        &self,
        _start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<ExchangeRate>, PortsimError> {
        Ok(self
            .rates
            .iter()
            .filter(|r| r.date <= end_date)
            .cloned()
            .collect())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Weekdays from `start` on, `count` of them.
pub fn weekdays(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    start
        .iter_days()
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .take(count)
        .collect()
}

pub fn make_point(ticker: &str, date: NaiveDate, close: f64, currency: &str) -> PricePoint {
    PricePoint {
        ticker: ticker.to_string(),
        date,
        close,
        currency: Currency::new(currency),
    }
}

pub fn make_points(ticker: &str, dates: &[NaiveDate], closes: &[f64]) -> Vec<PricePoint> {
    dates
        .iter()
        .zip(closes)
        .map(|(&d, &c)| make_point(ticker, d, c, "USD"))
        .collect()
}

pub fn make_series(ticker: &str, dates: &[NaiveDate], closes: &[f64]) -> PriceSeries {
    PriceSeries::new(ticker, make_points(ticker, dates, closes))
}

/// Closes moving linearly from `from` to `to` over `dates`.
pub fn linear_series(ticker: &str, dates: &[NaiveDate], from: f64, to: f64) -> PriceSeries {
    let steps = dates.len().saturating_sub(1).max(1) as f64;
    let closes: Vec<f64> = (0..dates.len())
        .map(|i| from + (to - from) * i as f64 / steps)
        .collect();
    make_series(ticker, dates, &closes)
}

pub fn make_rate(date: NaiveDate, from: &str, to: &str, rate: f64) -> ExchangeRate {
    ExchangeRate {
        date,
        from: Currency::new(from),
        to: Currency::new(to),
        rate,
    }
}

pub fn sample_config(
    tickers: &[&str],
    start_date: NaiveDate,
    end_date: NaiveDate,
    interval: RebalanceInterval,
) -> BacktestConfig {
    BacktestConfig {
        start_date,
        end_date,
        initial_capital: 10_000.0,
        base_currency: Currency::usd(),
        tickers: tickers.iter().map(|t| t.to_string()).collect(),
        interval,
        missing_rate_policy: MissingRatePolicy::Abort,
        liquidate_at_end: false,
        risk_free_rate: 0.0,
    }
}
