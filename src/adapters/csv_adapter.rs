//! CSV file market data adapter.
//!
//! Prices live in `<base_path>/<TICKER>.csv` with a `date,close[,currency]`
//! header; exchange rates in `<base_path>/fx_rates.csv` with
//! `date,from,to,rate`. Columns are matched by header name.

use crate::domain::error::PortsimError;
use crate::domain::price::{Currency, ExchangeRate, PricePoint};
use crate::ports::data_port::MarketDataProvider;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const FX_RATES_FILE: &str = "fx_rates.csv";

pub struct CsvAdapter {
    base_path: PathBuf,
    /// Currency for price files without a `currency` column.
    default_currency: Currency,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf, default_currency: Currency) -> Self {
        Self {
            base_path,
            default_currency,
        }
    }

    fn csv_path(&self, ticker: &str) -> PathBuf {
        self.base_path.join(format!("{ticker}.csv"))
    }

    fn read_prices(
        &self,
        ticker: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<PricePoint>, PortsimError> {
        let path = self.csv_path(ticker);
        let mut rdr = open(&path)?;
        let columns = Columns::from_headers(&mut rdr, &path)?;
        let date_col = columns.require("date")?;
        let close_col = columns.require("close")?;
        let currency_col = columns.find("currency");

        let mut points = Vec::new();
        for (line, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| data_error(&path, format!("CSV parse error: {e}")))?;
            let at = |msg: String| data_error(&path, format!("row {}: {msg}", line + 2));

            let date = parse_date(field(&record, date_col)).map_err(at)?;
            if date < start_date || date > end_date {
                continue;
            }
            let close = parse_price(field(&record, close_col), "close").map_err(at)?;
            let currency = match currency_col.map(|c| field(&record, c)) {
                Some(code) if !code.is_empty() => Currency::new(code),
                _ => self.default_currency.clone(),
            };

            points.push(PricePoint {
                ticker: ticker.to_string(),
                date,
                close,
                currency,
            });
        }

        points.sort_by_key(|p| p.date);
        debug!(ticker, points = points.len(), path = %path.display(), "prices loaded");
        Ok(points)
    }
}

impl MarketDataProvider for CsvAdapter {
    fn fetch(
        &self,
        tickers: &[String],
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<HashMap<String, Vec<PricePoint>>, PortsimError> {
        tickers
            .iter()
            .map(|ticker| {
                let points = self.read_prices(ticker, start_date, end_date)?;
                Ok((ticker.clone(), points))
            })
            .collect()
    }

    /// Rates up to `end_date`. Earlier rates are kept so the most recent
    /// quote before `start_date` can still be used.
    fn fetch_rates(
        &self,
        _start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<ExchangeRate>, PortsimError> {
        let path = self.base_path.join(FX_RATES_FILE);
        if !path.exists() {
            debug!(path = %path.display(), "no exchange rate file");
            return Ok(Vec::new());
        }

        let mut rdr = open(&path)?;
        let columns = Columns::from_headers(&mut rdr, &path)?;
        let date_col = columns.require("date")?;
        let from_col = columns.require("from")?;
        let to_col = columns.require("to")?;
        let rate_col = columns.require("rate")?;

        let mut rates = Vec::new();
        for (line, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| data_error(&path, format!("CSV parse error: {e}")))?;
            let at = |msg: String| data_error(&path, format!("row {}: {msg}", line + 2));

            let date = parse_date(field(&record, date_col)).map_err(at)?;
            if date > end_date {
                continue;
            }
            rates.push(ExchangeRate {
                date,
                from: Currency::new(field(&record, from_col)),
                to: Currency::new(field(&record, to_col)),
                rate: parse_price(field(&record, rate_col), "rate").map_err(at)?,
            });
        }

        debug!(rates = rates.len(), "exchange rates loaded");
        Ok(rates)
    }
}

/// Header positions, matched case-insensitively.
struct Columns {
    path: PathBuf,
    names: Vec<String>,
}

impl Columns {
    fn from_headers(rdr: &mut csv::Reader<std::fs::File>, path: &Path) -> Result<Self, PortsimError> {
        let headers = rdr
            .headers()
            .map_err(|e| data_error(path, format!("failed to read header: {e}")))?;
        Ok(Self {
            path: path.to_path_buf(),
            names: headers.iter().map(|h| h.trim().to_lowercase()).collect(),
        })
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    fn require(&self, name: &str) -> Result<usize, PortsimError> {
        self.find(name)
            .ok_or_else(|| data_error(&self.path, format!("missing {name} column")))
    }
}

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, PortsimError> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| data_error(path, format!("failed to read: {e}")))
}

fn field(record: &csv::StringRecord, idx: usize) -> &str {
    record.get(idx).unwrap_or("")
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{value}': {e}"))
}

fn parse_price(value: &str, name: &str) -> Result<f64, String> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(format!("invalid {name} value '{value}'")),
    }
}

fn data_error(path: &Path, reason: String) -> PortsimError {
    PortsimError::DataSource {
        reason: format!("{}: {reason}", path.display()),
    }
}
