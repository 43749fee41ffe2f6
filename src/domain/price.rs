//! Price points, exchange rates and per-ticker price series.

use chrono::NaiveDate;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::error::PortsimError;

/// ISO currency code, stored upper-case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Self {
        Currency(code.trim().to_uppercase())
    }

    pub fn usd() -> Self {
        Currency("USD".to_string())
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single closing price. The currency is supplied by the data source.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub ticker: String,
    pub date: NaiveDate,
    pub close: f64,
    pub currency: Currency,
}

/// Conversion rate: one unit of `from` buys `rate` units of `to`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeRate {
    pub date: NaiveDate,
    pub from: Currency,
    pub to: Currency,
    pub rate: f64,
}

/// Date-ordered prices for one ticker. Missing dates are simply absent.
#[derive(Debug, Clone, Default)]
pub struct PriceSeries {
    pub ticker: String,
    points: Vec<PricePoint>,
    date_index: HashMap<NaiveDate, usize>,
}

impl PriceSeries {
    /// Builds a series, sorting by date and keeping the first point for a
    /// duplicated date.
    pub fn new(ticker: impl Into<String>, mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.date);
        points.dedup_by_key(|p| p.date);
        let date_index = points
            .iter()
            .enumerate()
            .map(|(i, p)| (p.date, i))
            .collect();
        Self {
            ticker: ticker.into(),
            points,
            date_index,
        }
    }

    pub fn empty(ticker: impl Into<String>) -> Self {
        Self::new(ticker, Vec::new())
    }

    /// Appends a point dated strictly after the current last point.
    pub fn push(&mut self, point: PricePoint) -> Result<(), PortsimError> {
        if let Some(last) = self.points.last()
            && point.date <= last.date
        {
            return Err(PortsimError::DataSource {
                reason: format!(
                    "{}: point dated {} appended after {}",
                    self.ticker, point.date, last.date
                ),
            });
        }
        self.date_index.insert(point.date, self.points.len());
        self.points.push(point);
        Ok(())
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&PricePoint> {
        self.date_index.get(&date).map(|&i| &self.points[i])
    }

    pub fn close_on(&self, date: NaiveDate) -> Option<f64> {
        self.get(date).map(|p| p.close)
    }

    /// All points dated on or before `date`.
    pub fn up_to(&self, date: NaiveDate) -> &[PricePoint] {
        let end = self.points.partition_point(|p| p.date <= date);
        &self.points[..end]
    }

    pub fn last_on_or_before(&self, date: NaiveDate) -> Option<&PricePoint> {
        self.up_to(date).last()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }
}

/// Union of all dates present in any of the series, ascending.
pub fn build_trading_calendar<'a>(
    series: impl IntoIterator<Item = &'a PriceSeries>,
) -> Vec<NaiveDate> {
    let unique_dates: BTreeSet<NaiveDate> = series
        .into_iter()
        .flat_map(|s| s.points.iter().map(|p| p.date))
        .collect();
    unique_dates.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_point(ticker: &str, date: &str, close: f64) -> PricePoint {
        PricePoint {
            ticker: ticker.to_string(),
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            close,
            currency: Currency::usd(),
        }
    }

    fn d(date: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn currency_is_upper_case() {
        assert_eq!(Currency::new(" eur ").code(), "EUR");
        assert_eq!(Currency::new("usd"), Currency::usd());
        assert_eq!(Currency::new("gbp").to_string(), "GBP");
    }

    #[test]
    fn series_sorts_and_indexes() {
        let series = PriceSeries::new(
            "AAA",
            vec![
                make_point("AAA", "2024-01-03", 102.0),
                make_point("AAA", "2024-01-01", 100.0),
                make_point("AAA", "2024-01-02", 101.0),
            ],
        );

        assert_eq!(series.len(), 3);
        assert_eq!(series.first_date(), Some(d("2024-01-01")));
        assert_eq!(series.last_date(), Some(d("2024-01-03")));
        assert_eq!(series.close_on(d("2024-01-02")), Some(101.0));
        assert_eq!(series.close_on(d("2024-01-05")), None);
    }

    #[test]
    fn series_drops_duplicate_dates() {
        let series = PriceSeries::new(
            "AAA",
            vec![
                make_point("AAA", "2024-01-01", 100.0),
                make_point("AAA", "2024-01-01", 999.0),
            ],
        );
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn up_to_is_inclusive() {
        let series = PriceSeries::new(
            "AAA",
            vec![
                make_point("AAA", "2024-01-01", 100.0),
                make_point("AAA", "2024-01-03", 102.0),
                make_point("AAA", "2024-01-05", 104.0),
            ],
        );

        assert_eq!(series.up_to(d("2024-01-03")).len(), 2);
        assert_eq!(series.up_to(d("2024-01-04")).len(), 2);
        assert!(series.up_to(d("2023-12-31")).is_empty());
        assert_eq!(
            series.last_on_or_before(d("2024-01-04")).map(|p| p.close),
            Some(102.0)
        );
    }

    #[test]
    fn push_rejects_out_of_order() {
        let mut series = PriceSeries::empty("AAA");
        series.push(make_point("AAA", "2024-01-02", 100.0)).unwrap();
        assert!(series.push(make_point("AAA", "2024-01-02", 101.0)).is_err());
        assert!(series.push(make_point("AAA", "2024-01-01", 99.0)).is_err());
        series.push(make_point("AAA", "2024-01-03", 102.0)).unwrap();
        assert_eq!(series.close_on(d("2024-01-03")), Some(102.0));
    }

    #[test]
    fn calendar_merges_and_sorts() {
        let aaa = PriceSeries::new(
            "AAA",
            vec![
                make_point("AAA", "2024-01-02", 100.0),
                make_point("AAA", "2024-01-05", 101.0),
            ],
        );
        let bbb = PriceSeries::new(
            "BBB",
            vec![
                make_point("BBB", "2024-01-01", 50.0),
                make_point("BBB", "2024-01-02", 51.0),
            ],
        );

        let calendar = build_trading_calendar(&[aaa, bbb]);
        assert_eq!(
            calendar,
            vec![d("2024-01-01"), d("2024-01-02"), d("2024-01-05")]
        );
    }

    #[test]
    fn calendar_empty() {
        assert!(build_trading_calendar(&[] as &[PriceSeries]).is_empty());
    }
}
