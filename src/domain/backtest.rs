//! Backtest engine and day-by-day event loop.
//!
//! Each trading date in `[start_date, end_date]` goes through the same
//! phases: load and normalize prices, ask the scheduler whether to decide,
//! let the strategy decide against history bounded at the date, execute the
//! resulting orders, then snapshot portfolio value. A ticker without a usable
//! price on a date is recorded as a gap and cannot be traded that day; the
//! snapshot is skipped only when a held ticker is the one missing.

use chrono::{Days, NaiveDate};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

use super::currency::{CurrencyNormalizer, MissingRatePolicy};
use super::error::{LookAheadViolation, OrderError};
use super::execution::execute_signal;
use super::metrics::EquityPoint;
use super::portfolio::{Portfolio, Side, Transaction};
use super::price::{Currency, PricePoint, PriceSeries, build_trading_calendar};
use super::schedule::{RebalanceInterval, is_decision_date};
use super::strategy::{PriceHistory, Strategy};

#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub base_currency: Currency,
    /// Tickers loaded and tradable during the run.
    pub tickers: BTreeSet<String>,
    pub interval: RebalanceInterval,
    pub missing_rate_policy: MissingRatePolicy,
    /// Sell every holding on the last processed date.
    pub liquidate_at_end: bool,
    /// Annual rate used for Sharpe and Sortino ratios.
    pub risk_free_rate: f64,
}

/// Portfolio state at the close of one processed date.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySnapshot {
    pub date: NaiveDate,
    pub total_value: f64,
    pub cash: f64,
    /// Market value per held ticker, in the base currency.
    pub positions: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapReason {
    NoPrice,
    NoExchangeRate,
}

/// A (date, ticker) pair with no usable price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceGap {
    pub date: NaiveDate,
    pub ticker: String,
    pub reason: GapReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedOrder {
    pub date: NaiveDate,
    pub ticker: String,
    pub side: Side,
    pub shares: u64,
    pub error: OrderError,
}

/// Why a run stopped before `end_date`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FatalCause {
    #[error("no exchange rate {from}->{to} for {ticker}")]
    MissingExchangeRate {
        ticker: String,
        from: Currency,
        to: Currency,
    },

    #[error(transparent)]
    LookAhead(#[from] LookAheadViolation),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    Completed,
    Aborted { date: NaiveDate, cause: FatalCause },
}

#[derive(Debug, Clone)]
pub struct BacktestResult {
    pub strategy_name: String,
    pub interval: RebalanceInterval,
    pub base_currency: Currency,
    pub risk_free_rate: f64,
    pub snapshots: Vec<DailySnapshot>,
    /// Final state; its ledger is the full transaction log of the run.
    pub portfolio: Portfolio,
    pub decision_dates: Vec<NaiveDate>,
    pub gaps: Vec<PriceGap>,
    pub rejected_orders: Vec<RejectedOrder>,
    pub status: RunStatus,
}

impl BacktestResult {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Completed
    }

    pub fn initial_capital(&self) -> f64 {
        self.portfolio.initial_capital()
    }

    pub fn transactions(&self) -> &[Transaction] {
        self.portfolio.transactions()
    }

    /// Value on the last snapshot, or the initial capital if none was taken.
    pub fn final_value(&self) -> f64 {
        self.snapshots
            .last()
            .map_or(self.initial_capital(), |s| s.total_value)
    }

    pub fn equity_curve(&self) -> Vec<EquityPoint> {
        self.snapshots
            .iter()
            .map(|s| EquityPoint {
                date: s.date,
                equity: s.total_value,
            })
            .collect()
    }
}

/// Runs `strategy` over `series` as configured.
///
/// Points dated before `start_date` are normalized into the history the
/// strategy can read but are never traded on. The strategy must be fresh;
/// every run owns its own portfolio, so runs sharing the same inputs are
/// independent.
pub fn run_backtest(
    series: &[PriceSeries],
    normalizer: &CurrencyNormalizer,
    strategy: &mut dyn Strategy,
    config: &BacktestConfig,
) -> BacktestResult {
    let mut run = Run::new(series, normalizer, config);

    info!(
        strategy = strategy.name(),
        interval = %config.interval,
        start = %config.start_date,
        end = %config.end_date,
        tickers = config.tickers.len(),
        "backtest started"
    );

    let status = match run.execute(strategy) {
        Ok(()) => RunStatus::Completed,
        Err((date, cause)) => {
            warn!(strategy = strategy.name(), %date, %cause, "backtest aborted");
            RunStatus::Aborted { date, cause }
        }
    };

    let result = BacktestResult {
        strategy_name: strategy.name().to_string(),
        interval: config.interval,
        base_currency: config.base_currency.clone(),
        risk_free_rate: config.risk_free_rate,
        snapshots: run.snapshots,
        portfolio: run.portfolio,
        decision_dates: run.decision_dates,
        gaps: run.gaps,
        rejected_orders: run.rejected_orders,
        status,
    };

    info!(
        strategy = result.strategy_name.as_str(),
        interval = %result.interval,
        days = result.snapshots.len(),
        trades = result.transactions().len(),
        gaps = result.gaps.len(),
        rejected = result.rejected_orders.len(),
        final_value = result.final_value(),
        "backtest finished"
    );
    result
}

type Abort = (NaiveDate, FatalCause);

/// Mutable state of a single run.
struct Run<'a> {
    raw: HashMap<&'a str, &'a PriceSeries>,
    normalizer: &'a CurrencyNormalizer,
    config: &'a BacktestConfig,
    /// Normalized points loaded so far, including warmup.
    history: HashMap<String, PriceSeries>,
    /// Trading dates processed so far.
    loaded: Vec<NaiveDate>,
    portfolio: Portfolio,
    snapshots: Vec<DailySnapshot>,
    decision_dates: Vec<NaiveDate>,
    gaps: Vec<PriceGap>,
    rejected_orders: Vec<RejectedOrder>,
}

impl<'a> Run<'a> {
    fn new(
        series: &'a [PriceSeries],
        normalizer: &'a CurrencyNormalizer,
        config: &'a BacktestConfig,
    ) -> Self {
        let raw = series
            .iter()
            .filter(|s| config.tickers.contains(&s.ticker))
            .map(|s| (s.ticker.as_str(), s))
            .collect();
        let history = config
            .tickers
            .iter()
            .map(|t| (t.clone(), PriceSeries::empty(t.clone())))
            .collect();

        Run {
            raw,
            normalizer,
            config,
            history,
            loaded: Vec::new(),
            portfolio: Portfolio::new(config.initial_capital),
            snapshots: Vec::new(),
            decision_dates: Vec::new(),
            gaps: Vec::new(),
            rejected_orders: Vec::new(),
        }
    }

    fn execute(&mut self, strategy: &mut dyn Strategy) -> Result<(), Abort> {
        self.warmup();

        let start = self.config.start_date;
        let end = self.config.end_date;
        let calendar: Vec<NaiveDate> = build_trading_calendar(self.raw.values().copied())
            .into_iter()
            .filter(|d| (start..=end).contains(d))
            .collect();
        debug!(dates = calendar.len(), "trading calendar built");

        let mut last_prices = None;
        for date in calendar {
            let prices = self.load(date)?;
            self.loaded.push(date);

            if is_decision_date(date, self.config.interval, &self.loaded) {
                self.decide(strategy, date, &prices)?;
            }

            self.snapshot(date, &prices);
            last_prices = Some((date, prices));
        }

        if self.config.liquidate_at_end
            && let Some((date, prices)) = last_prices
        {
            self.liquidate(date, &prices);
        }
        Ok(())
    }

    /// Normalizes every point dated before the start into history. Points
    /// that cannot be converted are left out; they are never traded on.
    fn warmup(&mut self) {
        let Some(before_start) = self.config.start_date.checked_sub_days(Days::new(1)) else {
            return;
        };
        let points: Vec<&'a PricePoint> = self
            .raw
            .values()
            .copied()
            .flat_map(|s| s.up_to(before_start))
            .collect();

        let mut warmed = 0usize;
        for point in points {
            match self.normalizer.normalize(point, &self.config.base_currency) {
                Ok(normalized) => {
                    if self.append(normalized) {
                        warmed += 1;
                    }
                }
                Err(err) => debug!(
                    ticker = point.ticker.as_str(),
                    date = %point.date,
                    %err,
                    "warmup point dropped"
                ),
            }
        }
        debug!(points = warmed, "warmup history loaded");
    }

    /// Loads normalized closes for `date`. Tickers without a usable price
    /// are recorded as gaps and left out of the map.
    fn load(&mut self, date: NaiveDate) -> Result<HashMap<String, f64>, Abort> {
        let mut prices = HashMap::with_capacity(self.config.tickers.len());

        let config = self.config;
        for ticker in &config.tickers {
            let point = self.raw.get(ticker.as_str()).copied().and_then(|s| s.get(date));
            let Some(point) = point else {
                self.record_gap(date, ticker, GapReason::NoPrice);
                continue;
            };
            if !self.normalize_into_history(point)? {
                continue;
            }
            if let Some(close) = self.history.get(ticker).and_then(|s| s.close_on(date)) {
                prices.insert(ticker.clone(), close);
            }
        }

        if prices.len() < config.tickers.len() {
            debug!(%date, priced = prices.len(), "partial prices");
        }
        Ok(prices)
    }

    /// Converts `point` into the base currency and appends it to history.
    /// Returns `false` when the point was dropped under the skip policy.
    fn normalize_into_history(&mut self, point: &PricePoint) -> Result<bool, Abort> {
        match self.normalizer.normalize(point, &self.config.base_currency) {
            Ok(normalized) => Ok(self.append(normalized)),
            Err(err) => match self.config.missing_rate_policy {
                MissingRatePolicy::Abort => Err((
                    point.date,
                    FatalCause::MissingExchangeRate {
                        ticker: point.ticker.clone(),
                        from: point.currency.clone(),
                        to: self.config.base_currency.clone(),
                    },
                )),
                MissingRatePolicy::SkipPoint => {
                    warn!(ticker = point.ticker.as_str(), date = %point.date, %err, "point skipped");
                    self.record_gap(point.date, &point.ticker, GapReason::NoExchangeRate);
                    Ok(false)
                }
            },
        }
    }

    fn append(&mut self, point: PricePoint) -> bool {
        let Some(series) = self.history.get_mut(&point.ticker) else {
            return false;
        };
        let (ticker, date) = (point.ticker.clone(), point.date);
        match series.push(point) {
            Ok(()) => true,
            Err(err) => {
                warn!(ticker = ticker.as_str(), %date, %err, "point dropped");
                false
            }
        }
    }

    fn decide(
        &mut self,
        strategy: &mut dyn Strategy,
        date: NaiveDate,
        prices: &HashMap<String, f64>,
    ) -> Result<(), Abort> {
        self.decision_dates.push(date);

        let history = PriceHistory::new(&self.history, date);
        let signal = strategy
            .generate_signal(date, &history, &self.portfolio)
            .map_err(|violation| (date, FatalCause::from(violation)))?;
        debug!(%date, ?signal, "signal generated");

        for outcome in execute_signal(&mut self.portfolio, &signal, prices, date) {
            if let Err(error) = outcome.result {
                self.rejected_orders.push(RejectedOrder {
                    date,
                    ticker: outcome.ticker,
                    side: outcome.side,
                    shares: outcome.shares,
                    error,
                });
            }
        }
        Ok(())
    }

    fn snapshot(&mut self, date: NaiveDate, prices: &HashMap<String, f64>) {
        match self.portfolio.market_values(date, prices) {
            Ok(positions) => {
                let cash = self.portfolio.cash();
                self.snapshots.push(DailySnapshot {
                    date,
                    total_value: cash + positions.values().sum::<f64>(),
                    cash,
                    positions,
                });
            }
            Err(err) => debug!(%date, %err, "snapshot skipped: held ticker unpriced"),
        }
    }

    /// Sells everything at the last processed prices and restates that
    /// date's snapshot.
    fn liquidate(&mut self, date: NaiveDate, prices: &HashMap<String, f64>) {
        match self.portfolio.liquidate_all(date, prices) {
            Ok(sold) => {
                info!(%date, positions = sold.len(), "portfolio liquidated");
                if self.snapshots.last().is_some_and(|s| s.date == date) {
                    self.snapshots.pop();
                }
                self.snapshot(date, prices);
            }
            Err(err) => warn!(%date, %err, "liquidation failed"),
        }
    }

    fn record_gap(&mut self, date: NaiveDate, ticker: &str, reason: GapReason) {
        self.gaps.push(PriceGap {
            date,
            ticker: ticker.to_string(),
            reason,
        });
    }
}
