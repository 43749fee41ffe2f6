//! Decision strategies and the date-bounded price history they read.

use chrono::{Days, Months, NaiveDate};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info};

use super::error::LookAheadViolation;
use super::portfolio::Portfolio;
use super::price::{PricePoint, PriceSeries};
use super::signal::{Instruction, Quantity, Signal};

/// Read-only view of normalized prices that refuses to serve anything dated
/// after `as_of`.
#[derive(Debug, Clone, Copy)]
pub struct PriceHistory<'a> {
    series: &'a HashMap<String, PriceSeries>,
    as_of: NaiveDate,
}

impl<'a> PriceHistory<'a> {
    pub fn new(series: &'a HashMap<String, PriceSeries>, as_of: NaiveDate) -> Self {
        Self { series, as_of }
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    fn check(&self, date: NaiveDate) -> Result<(), LookAheadViolation> {
        if date > self.as_of {
            return Err(LookAheadViolation {
                requested: date,
                as_of: self.as_of,
            });
        }
        Ok(())
    }

    /// Points for `ticker` dated on or before `date`.
    pub fn up_to(&self, ticker: &str, date: NaiveDate) -> Result<&'a [PricePoint], LookAheadViolation> {
        self.check(date)?;
        Ok(self.series.get(ticker).map_or(&[][..], |s| s.up_to(date)))
    }

    /// Everything visible for `ticker`.
    pub fn series(&self, ticker: &str) -> &'a [PricePoint] {
        self.series
            .get(ticker)
            .map_or(&[][..], |s| s.up_to(self.as_of))
    }

    pub fn close(&self, ticker: &str, date: NaiveDate) -> Result<Option<f64>, LookAheadViolation> {
        self.check(date)?;
        Ok(self.series.get(ticker).and_then(|s| s.close_on(date)))
    }

    pub fn close_on_or_before(
        &self,
        ticker: &str,
        date: NaiveDate,
    ) -> Result<Option<&'a PricePoint>, LookAheadViolation> {
        Ok(self.up_to(ticker, date)?.last())
    }

    pub fn latest(&self, ticker: &str) -> Option<&'a PricePoint> {
        self.series(ticker).last()
    }
}

/// A decision component invoked on each decision date.
///
/// Implementations may only read `history` up to `date`; the engine always
/// passes a view bounded at `date`.
pub trait Strategy: Send {
    fn name(&self) -> &str;

    fn generate_signal(
        &mut self,
        date: NaiveDate,
        history: &PriceHistory<'_>,
        portfolio: &Portfolio,
    ) -> Result<Signal, LookAheadViolation>;
}

/// Trailing window used by [`Momentum`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookback {
    /// Calendar months; the reference is the last close on or before
    /// `date - n months`.
    Months(u32),
    /// Observations; the reference is the close `n` points before today.
    TradingDays(usize),
}

impl Lookback {
    /// Earliest date whose data the window can reach from `date`.
    pub fn history_start(&self, date: NaiveDate) -> NaiveDate {
        match *self {
            Lookback::Months(n) => date
                .checked_sub_months(Months::new(n))
                .and_then(|d| d.checked_sub_days(Days::new(7)))
                .unwrap_or(NaiveDate::MIN),
            Lookback::TradingDays(n) => {
                // About 252 sessions a year once weekends and holidays are out.
                let calendar_days = (n as u64) * 365 / 252 + 14;
                date.checked_sub_days(Days::new(calendar_days))
                    .unwrap_or(NaiveDate::MIN)
            }
        }
    }
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookback::Months(n) => write!(f, "{n}M"),
            Lookback::TradingDays(n) => write!(f, "{n}D"),
        }
    }
}

/// Invests everything on the first decision date on which all of its tickers
/// are priced, split equally across them, then never trades again.
#[derive(Debug, Clone)]
pub struct BuyAndHold {
    tickers: Vec<String>,
    invested: bool,
}

impl BuyAndHold {
    pub fn new(tickers: Vec<String>) -> Self {
        Self {
            tickers,
            invested: false,
        }
    }
}

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        "Buy and Hold"
    }

    fn generate_signal(
        &mut self,
        date: NaiveDate,
        history: &PriceHistory<'_>,
        _portfolio: &Portfolio,
    ) -> Result<Signal, LookAheadViolation> {
        if self.invested || self.tickers.is_empty() {
            return Ok(Signal::hold());
        }
        for ticker in &self.tickers {
            if history.close(ticker, date)?.is_none() {
                debug!(%date, ticker = ticker.as_str(), "no price yet, allocation deferred");
                return Ok(Signal::hold());
            }
        }
        self.invested = true;

        let weight = 1.0 / self.tickers.len() as f64;
        let weights: BTreeMap<String, f64> =
            self.tickers.iter().map(|t| (t.clone(), weight)).collect();
        info!(%date, tickers = ?self.tickers, "initial buy-and-hold allocation");
        Ok(Signal::TargetAllocation(weights))
    }
}

/// Rotates all equity into the candidate with the best trailing return.
#[derive(Debug, Clone)]
pub struct Momentum {
    name: String,
    candidates: Vec<String>,
    lookback: Lookback,
}

impl Momentum {
    /// Candidates are ranked in lexicographic order; on equal returns the
    /// first one wins.
    pub fn new(mut candidates: Vec<String>, lookback: Lookback) -> Self {
        candidates.sort();
        candidates.dedup();
        Self {
            name: format!("Momentum ({lookback})"),
            candidates,
            lookback,
        }
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    /// `price(date) / price(date - lookback) - 1`, or `None` when the ticker
    /// lacks enough history.
    pub fn trailing_return(
        &self,
        ticker: &str,
        date: NaiveDate,
        history: &PriceHistory<'_>,
    ) -> Result<Option<f64>, LookAheadViolation> {
        let Some(today) = history.close(ticker, date)? else {
            return Ok(None);
        };

        let reference = match self.lookback {
            Lookback::TradingDays(n) => {
                let points = history.up_to(ticker, date)?;
                points
                    .len()
                    .checked_sub(n + 1)
                    .map(|idx| points[idx].close)
            }
            Lookback::Months(n) => match date.checked_sub_months(Months::new(n)) {
                Some(ref_date) => history
                    .close_on_or_before(ticker, ref_date)?
                    .map(|p| p.close),
                None => None,
            },
        };

        Ok(reference
            .filter(|&r| r > 0.0)
            .map(|r| today / r - 1.0)
            .filter(|r| r.is_finite()))
    }
}

impl Strategy for Momentum {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate_signal(
        &mut self,
        date: NaiveDate,
        history: &PriceHistory<'_>,
        _portfolio: &Portfolio,
    ) -> Result<Signal, LookAheadViolation> {
        let mut best: Option<(&str, f64)> = None;
        for ticker in &self.candidates {
            let Some(ret) = self.trailing_return(ticker, date, history)? else {
                debug!(%date, ticker = ticker.as_str(), "excluded from ranking: insufficient history");
                continue;
            };
            if best.is_none_or(|(_, best_ret)| ret > best_ret) {
                best = Some((ticker.as_str(), ret));
            }
        }

        match best {
            Some((winner, ret)) => {
                info!(%date, winner, trailing_return = ret, "momentum winner");
                Ok(Signal::all_in(winner))
            }
            None => {
                info!(%date, "no candidate qualifies, staying in cash");
                Ok(Signal::hold())
            }
        }
    }
}

/// Size of each periodic purchase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Contribution {
    Amount(f64),
    FractionOfCash(f64),
}

/// Buys a fixed amount of one ticker on every decision date. Never sells.
#[derive(Debug, Clone)]
pub struct MonthlyInvestment {
    ticker: String,
    contribution: Contribution,
}

impl MonthlyInvestment {
    pub fn new(ticker: impl Into<String>, contribution: Contribution) -> Self {
        Self {
            ticker: ticker.into(),
            contribution,
        }
    }
}

impl Strategy for MonthlyInvestment {
    fn name(&self) -> &str {
        "Monthly Investment"
    }

    fn generate_signal(
        &mut self,
        _date: NaiveDate,
        _history: &PriceHistory<'_>,
        _portfolio: &Portfolio,
    ) -> Result<Signal, LookAheadViolation> {
        let quantity = match self.contribution {
            Contribution::Amount(amount) => Quantity::Amount(amount),
            Contribution::FractionOfCash(fraction) => Quantity::Fraction(fraction),
        };
        Ok(Signal::Orders(vec![Instruction::buy(
            self.ticker.clone(),
            quantity,
        )]))
    }
}

/// Strategy choice plus parameters. Each run builds a fresh instance.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyConfig {
    BuyAndHold {
        tickers: Vec<String>,
    },
    Momentum {
        candidates: Vec<String>,
        lookback: Lookback,
    },
    MonthlyInvestment {
        ticker: String,
        contribution: Contribution,
    },
}

impl StrategyConfig {
    pub fn build(&self) -> Box<dyn Strategy> {
        match self {
            StrategyConfig::BuyAndHold { tickers } => Box::new(BuyAndHold::new(tickers.clone())),
            StrategyConfig::Momentum {
                candidates,
                lookback,
            } => Box::new(Momentum::new(candidates.clone(), *lookback)),
            StrategyConfig::MonthlyInvestment {
                ticker,
                contribution,
            } => Box::new(MonthlyInvestment::new(ticker.clone(), *contribution)),
        }
    }

    /// Tickers the strategy trades.
    pub fn tickers(&self) -> Vec<String> {
        match self {
            StrategyConfig::BuyAndHold { tickers } => tickers.clone(),
            StrategyConfig::Momentum { candidates, .. } => candidates.clone(),
            StrategyConfig::MonthlyInvestment { ticker, .. } => vec![ticker.clone()],
        }
    }

    /// First date of price history needed for a run starting at `start`.
    pub fn history_start(&self, start: NaiveDate) -> NaiveDate {
        match self {
            StrategyConfig::Momentum { lookback, .. } => lookback.history_start(start),
            _ => start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::price::Currency;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn series(ticker: &str, points: &[(NaiveDate, f64)]) -> PriceSeries {
        PriceSeries::new(
            ticker,
            points
                .iter()
                .map(|&(date, close)| PricePoint {
                    ticker: ticker.to_string(),
                    date,
                    close,
                    currency: Currency::usd(),
                })
                .collect(),
        )
    }

    fn book(all: Vec<PriceSeries>) -> HashMap<String, PriceSeries> {
        all.into_iter().map(|s| (s.ticker.clone(), s)).collect()
    }

    #[test]
    fn history_refuses_future_dates() {
        let data = book(vec![series(
            "AAA",
            &[(d(2024, 1, 1), 100.0), (d(2024, 1, 2), 101.0), (d(2024, 1, 3), 102.0)],
        )]);
        let history = PriceHistory::new(&data, d(2024, 1, 2));

        assert_eq!(history.close("AAA", d(2024, 1, 2)), Ok(Some(101.0)));
        assert_eq!(
            history.close("AAA", d(2024, 1, 3)),
            Err(LookAheadViolation {
                requested: d(2024, 1, 3),
                as_of: d(2024, 1, 2),
            })
        );
        assert_eq!(history.series("AAA").len(), 2);
        assert_eq!(history.latest("AAA").map(|p| p.close), Some(101.0));
        assert!(history.up_to("AAA", d(2024, 2, 1)).is_err());
        assert!(history.series("ZZZ").is_empty());
    }

    #[test]
    fn buy_and_hold_invests_once() {
        let data = book(vec![series("AAA", &[(d(2024, 1, 2), 100.0)])]);
        let history = PriceHistory::new(&data, d(2024, 1, 2));
        let portfolio = Portfolio::new(10_000.0);
        let mut strategy = BuyAndHold::new(vec!["AAA".into()]);

        let first = strategy
            .generate_signal(d(2024, 1, 2), &history, &portfolio)
            .unwrap();
        assert_eq!(first, Signal::all_in("AAA"));

        let second = strategy
            .generate_signal(d(2024, 2, 1), &history, &portfolio)
            .unwrap();
        assert!(second.is_empty());
    }

    #[test]
    fn buy_and_hold_splits_equally() {
        let data = book(vec![
            series("AAA", &[(d(2024, 1, 2), 10.0)]),
            series("BBB", &[(d(2024, 1, 2), 20.0)]),
        ]);
        let history = PriceHistory::new(&data, d(2024, 1, 2));
        let portfolio = Portfolio::new(10_000.0);
        let mut strategy = BuyAndHold::new(vec!["AAA".into(), "BBB".into()]);

        match strategy
            .generate_signal(d(2024, 1, 2), &history, &portfolio)
            .unwrap()
        {
            Signal::TargetAllocation(w) => {
                assert_eq!(w.get("AAA"), Some(&0.5));
                assert_eq!(w.get("BBB"), Some(&0.5));
            }
            other => panic!("unexpected signal {other:?}"),
        }
    }

    #[test]
    fn buy_and_hold_waits_for_every_price() {
        let data = book(vec![
            series("AAA", &[(d(2024, 1, 2), 10.0), (d(2024, 1, 3), 11.0)]),
            series("BBB", &[(d(2024, 1, 3), 20.0)]),
        ]);
        let portfolio = Portfolio::new(10_000.0);
        let mut strategy = BuyAndHold::new(vec!["AAA".into(), "BBB".into()]);

        let first = strategy
            .generate_signal(d(2024, 1, 2), &PriceHistory::new(&data, d(2024, 1, 2)), &portfolio)
            .unwrap();
        assert!(first.is_empty());

        let second = strategy
            .generate_signal(d(2024, 1, 3), &PriceHistory::new(&data, d(2024, 1, 3)), &portfolio)
            .unwrap();
        assert!(matches!(second, Signal::TargetAllocation(_)));
    }

    #[test]
    fn momentum_picks_best_trailing_return() {
        let start = d(2023, 1, 2);
        let today = d(2024, 1, 2);
        let data = book(vec![
            series("X", &[(start, 100.0), (today, 120.0)]),
            series("Y", &[(start, 100.0), (today, 105.0)]),
        ]);
        let history = PriceHistory::new(&data, today);
        let mut strategy = Momentum::new(vec!["Y".into(), "X".into()], Lookback::Months(12));

        let ret = strategy.trailing_return("X", today, &history).unwrap().unwrap();
        assert!((ret - 0.20).abs() < 1e-12);

        let signal = strategy
            .generate_signal(today, &history, &Portfolio::new(1_000.0))
            .unwrap();
        assert_eq!(signal, Signal::all_in("X"));
    }

    #[test]
    fn momentum_ties_go_to_first_ticker() {
        let start = d(2023, 1, 2);
        let today = d(2024, 1, 2);
        let data = book(vec![
            series("BBB", &[(start, 50.0), (today, 55.0)]),
            series("AAA", &[(start, 100.0), (today, 110.0)]),
        ]);
        let history = PriceHistory::new(&data, today);

        for _ in 0..5 {
            let mut strategy =
                Momentum::new(vec!["BBB".into(), "AAA".into()], Lookback::Months(12));
            let signal = strategy
                .generate_signal(today, &history, &Portfolio::new(1_000.0))
                .unwrap();
            assert_eq!(signal, Signal::all_in("AAA"));
        }
    }

    #[test]
    fn momentum_excludes_short_histories() {
        let today = d(2024, 1, 2);
        let data = book(vec![
            series("NEW", &[(d(2023, 6, 1), 10.0), (today, 50.0)]),
            series("OLD", &[(d(2022, 12, 30), 100.0), (today, 101.0)]),
        ]);
        let history = PriceHistory::new(&data, today);
        let mut strategy = Momentum::new(vec!["NEW".into(), "OLD".into()], Lookback::Months(12));

        assert_eq!(strategy.trailing_return("NEW", today, &history), Ok(None));
        let signal = strategy
            .generate_signal(today, &history, &Portfolio::new(1_000.0))
            .unwrap();
        assert_eq!(signal, Signal::all_in("OLD"));
    }

    #[test]
    fn momentum_stays_in_cash_when_nothing_qualifies() {
        let today = d(2024, 1, 2);
        let data = book(vec![series("AAA", &[(today, 100.0)])]);
        let history = PriceHistory::new(&data, today);
        let mut strategy = Momentum::new(vec!["AAA".into()], Lookback::Months(3));

        let signal = strategy
            .generate_signal(today, &history, &Portfolio::new(1_000.0))
            .unwrap();
        assert!(signal.is_empty());
    }

    #[test]
    fn momentum_trading_day_lookback() {
        let today = d(2024, 1, 5);
        let data = book(vec![series(
            "AAA",
            &[
                (d(2024, 1, 1), 100.0),
                (d(2024, 1, 2), 110.0),
                (d(2024, 1, 3), 120.0),
                (d(2024, 1, 4), 130.0),
                (today, 132.0),
            ],
        )]);
        let history = PriceHistory::new(&data, today);

        let strategy = Momentum::new(vec!["AAA".into()], Lookback::TradingDays(2));
        let ret = strategy.trailing_return("AAA", today, &history).unwrap().unwrap();
        assert!((ret - (132.0 / 120.0 - 1.0)).abs() < 1e-12);

        let strategy = Momentum::new(vec!["AAA".into()], Lookback::TradingDays(5));
        assert_eq!(strategy.trailing_return("AAA", today, &history), Ok(None));
    }

    #[test]
    fn momentum_ignores_future_data() {
        let today = d(2024, 1, 2);
        let with_future = |future_close: f64| {
            book(vec![
                series("X", &[(d(2023, 1, 2), 100.0), (today, 110.0), (d(2024, 2, 1), future_close)]),
                series("Y", &[(d(2023, 1, 2), 100.0), (today, 105.0)]),
            ])
        };

        let a = with_future(1.0);
        let b = with_future(10_000.0);
        let mut strategy = Momentum::new(vec!["X".into(), "Y".into()], Lookback::Months(12));
        let portfolio = Portfolio::new(1_000.0);

        let sig_a = strategy
            .generate_signal(today, &PriceHistory::new(&a, today), &portfolio)
            .unwrap();
        let sig_b = strategy
            .generate_signal(today, &PriceHistory::new(&b, today), &portfolio)
            .unwrap();
        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn monthly_investment_never_sells() {
        let data = HashMap::new();
        let history = PriceHistory::new(&data, d(2024, 1, 2));
        let portfolio = Portfolio::new(10_000.0);
        let mut strategy = MonthlyInvestment::new("SPY", Contribution::Amount(500.0));

        for _ in 0..3 {
            let signal = strategy
                .generate_signal(d(2024, 1, 2), &history, &portfolio)
                .unwrap();
            assert_eq!(
                signal,
                Signal::Orders(vec![Instruction::buy("SPY", Quantity::Amount(500.0))])
            );
        }

        let mut strategy = MonthlyInvestment::new("SPY", Contribution::FractionOfCash(0.1));
        let signal = strategy
            .generate_signal(d(2024, 1, 2), &history, &portfolio)
            .unwrap();
        assert_eq!(
            signal,
            Signal::Orders(vec![Instruction::buy("SPY", Quantity::Fraction(0.1))])
        );
    }

    #[test]
    fn trading_day_window_spans_exchange_holidays() {
        use chrono::{Datelike, Weekday};

        let holidays = [
            d(2022, 12, 26),
            d(2023, 1, 2),
            d(2023, 1, 16),
            d(2023, 2, 20),
            d(2023, 4, 7),
            d(2023, 5, 29),
            d(2023, 6, 19),
            d(2023, 7, 4),
            d(2023, 9, 4),
            d(2023, 11, 23),
            d(2023, 12, 25),
        ];
        let start = d(2024, 1, 2);
        let from = Lookback::TradingDays(252).history_start(start);

        let sessions = from
            .iter_days()
            .take_while(|&day| day < start)
            .filter(|day| !matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
            .filter(|day| !holidays.contains(day))
            .count();
        assert!(sessions >= 252, "only {sessions} sessions from {from}");
    }

    #[test]
    fn config_builds_named_strategies() {
        let config = StrategyConfig::Momentum {
            candidates: vec!["A".into(), "B".into()],
            lookback: Lookback::Months(12),
        };
        assert_eq!(config.build().name(), "Momentum (12M)");
        assert_eq!(config.tickers(), vec!["A".to_string(), "B".to_string()]);
        assert!(config.history_start(d(2024, 1, 1)) < d(2023, 1, 1));

        let config = StrategyConfig::BuyAndHold {
            tickers: vec!["A".into()],
        };
        assert_eq!(config.build().name(), "Buy and Hold");
        assert_eq!(config.history_start(d(2024, 1, 1)), d(2024, 1, 1));
    }
}
