//! Configuration validation.
//!
//! Every field is checked and converted to its typed form before a run
//! starts. The resulting [`RunConfig`] is immutable and hands out one
//! [`BacktestConfig`] per rebalance interval.

use crate::domain::backtest::BacktestConfig;
use crate::domain::currency::MissingRatePolicy;
use crate::domain::error::PortsimError;
use crate::domain::price::Currency;
use crate::domain::schedule::RebalanceInterval;
use crate::domain::strategy::{Contribution, Lookback, StrategyConfig};
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::path::PathBuf;

pub const DEFAULT_INITIAL_CAPITAL: f64 = 10_000.0;
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_OUTPUT_DIR: &str = "reports";

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub base_currency: Currency,
    pub tickers: BTreeSet<String>,
    pub benchmark: String,
    pub intervals: Vec<RebalanceInterval>,
    pub missing_rate_policy: MissingRatePolicy,
    pub liquidate_at_end: bool,
    pub risk_free_rate: f64,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub strategy: StrategyConfig,
}

impl RunConfig {
    /// Configured tickers plus any the strategy trades.
    pub fn all_tickers(&self) -> BTreeSet<String> {
        let mut tickers = self.tickers.clone();
        tickers.extend(self.strategy.tickers());
        tickers
    }

    /// Earliest date the strategy needs history from.
    pub fn history_start(&self) -> NaiveDate {
        self.strategy.history_start(self.start_date)
    }

    pub fn backtest_config(&self, interval: RebalanceInterval) -> BacktestConfig {
        BacktestConfig {
            start_date: self.start_date,
            end_date: self.end_date,
            initial_capital: self.initial_capital,
            base_currency: self.base_currency.clone(),
            tickers: self.all_tickers(),
            interval,
            missing_rate_policy: self.missing_rate_policy,
            liquidate_at_end: self.liquidate_at_end,
            risk_free_rate: self.risk_free_rate,
        }
    }

    pub fn backtest_configs(&self) -> Vec<BacktestConfig> {
        self.intervals
            .iter()
            .map(|&interval| self.backtest_config(interval))
            .collect()
    }
}

pub fn validate_backtest_config(config: &dyn ConfigPort) -> Result<(), PortsimError> {
    parse_backtest_section(config).map(|_| ())
}

pub fn validate_strategy_config(config: &dyn ConfigPort) -> Result<(), PortsimError> {
    let tickers = parse_tickers(config, "backtest", "tickers")?;
    parse_strategy_section(config, &tickers).map(|_| ())
}

/// Validates the whole file and builds the run configuration.
pub fn parse_run_config(config: &dyn ConfigPort) -> Result<RunConfig, PortsimError> {
    let backtest = parse_backtest_section(config)?;
    let strategy = parse_strategy_section(config, &backtest.tickers)?;
    let output_dir = config
        .get_string("report", "output_dir")
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string());

    Ok(RunConfig {
        start_date: backtest.start_date,
        end_date: backtest.end_date,
        initial_capital: backtest.initial_capital,
        base_currency: backtest.base_currency,
        tickers: backtest.tickers,
        benchmark: backtest.benchmark,
        intervals: backtest.intervals,
        missing_rate_policy: backtest.missing_rate_policy,
        liquidate_at_end: backtest.liquidate_at_end,
        risk_free_rate: backtest.risk_free_rate,
        data_dir: backtest.data_dir,
        output_dir: PathBuf::from(output_dir.trim()),
        strategy,
    })
}

struct BacktestSection {
    start_date: NaiveDate,
    end_date: NaiveDate,
    initial_capital: f64,
    base_currency: Currency,
    tickers: BTreeSet<String>,
    benchmark: String,
    intervals: Vec<RebalanceInterval>,
    missing_rate_policy: MissingRatePolicy,
    liquidate_at_end: bool,
    risk_free_rate: f64,
    data_dir: PathBuf,
}

fn parse_backtest_section(config: &dyn ConfigPort) -> Result<BacktestSection, PortsimError> {
    let initial_capital = parse_number(config, "backtest", "initial_capital")?
        .unwrap_or(DEFAULT_INITIAL_CAPITAL);
    if initial_capital <= 0.0 {
        return Err(invalid("backtest", "initial_capital", "initial_capital must be positive"));
    }

    let risk_free_rate = parse_number(config, "backtest", "risk_free_rate")?.unwrap_or(0.0);
    if !(0.0..1.0).contains(&risk_free_rate) {
        return Err(invalid(
            "backtest",
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }

    let (start_date, end_date) = parse_dates(config)?;

    let base_currency = match config.get_string("backtest", "base_currency") {
        Some(code) if !code.trim().is_empty() => {
            if code.trim().len() != 3 || !code.trim().chars().all(|c| c.is_ascii_alphabetic()) {
                return Err(invalid(
                    "backtest",
                    "base_currency",
                    "base_currency must be a three-letter code",
                ));
            }
            Currency::new(&code)
        }
        _ => Currency::usd(),
    };

    let tickers = parse_tickers(config, "backtest", "tickers")?;
    if tickers.is_empty() {
        return Err(missing("backtest", "tickers"));
    }

    let benchmark = match config.get_string("backtest", "benchmark") {
        Some(s) if !s.trim().is_empty() => s.trim().to_uppercase(),
        _ => return Err(missing("backtest", "benchmark")),
    };

    let intervals = match config.get_string("backtest", "intervals") {
        Some(s) if !s.trim().is_empty() => parse_intervals(&s)?,
        _ => vec![RebalanceInterval::Monthly],
    };

    let missing_rate_policy = match config.get_string("backtest", "missing_rate_policy") {
        None => MissingRatePolicy::default(),
        Some(s) => match s.trim().to_lowercase().as_str() {
            "" | "abort" => MissingRatePolicy::Abort,
            "skip" => MissingRatePolicy::SkipPoint,
            other => {
                return Err(invalid(
                    "backtest",
                    "missing_rate_policy",
                    &format!("unknown policy '{other}' (expected abort or skip)"),
                ));
            }
        },
    };

    let data_dir = config
        .get_string("backtest", "data_dir")
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());

    Ok(BacktestSection {
        start_date,
        end_date,
        initial_capital,
        base_currency,
        tickers,
        benchmark,
        intervals,
        missing_rate_policy,
        liquidate_at_end: config.get_bool("backtest", "liquidate_at_end", false),
        risk_free_rate,
        data_dir: PathBuf::from(data_dir.trim()),
    })
}

fn parse_strategy_section(
    config: &dyn ConfigPort,
    backtest_tickers: &BTreeSet<String>,
) -> Result<StrategyConfig, PortsimError> {
    let kind = match config.get_string("strategy", "type") {
        Some(s) if !s.trim().is_empty() => s.trim().to_lowercase(),
        _ => return Err(missing("strategy", "type")),
    };

    let tickers_or_default = |key: &str| -> Result<Vec<String>, PortsimError> {
        let listed = parse_tickers(config, "strategy", key)?;
        let chosen = if listed.is_empty() {
            backtest_tickers.clone()
        } else {
            listed
        };
        if chosen.is_empty() {
            return Err(missing("strategy", key));
        }
        Ok(chosen.into_iter().collect())
    };

    match kind.as_str() {
        "buy_and_hold" => Ok(StrategyConfig::BuyAndHold {
            tickers: tickers_or_default("tickers")?,
        }),
        "momentum" => Ok(StrategyConfig::Momentum {
            candidates: tickers_or_default("candidates")?,
            lookback: parse_lookback(config)?,
        }),
        "monthly_investment" => {
            let ticker = match config.get_string("strategy", "ticker") {
                Some(s) if !s.trim().is_empty() => s.trim().to_uppercase(),
                _ => return Err(missing("strategy", "ticker")),
            };
            Ok(StrategyConfig::MonthlyInvestment {
                ticker,
                contribution: parse_contribution(config)?,
            })
        }
        other => Err(invalid(
            "strategy",
            "type",
            &format!(
                "unknown strategy '{other}' (expected buy_and_hold, momentum or monthly_investment)"
            ),
        )),
    }
}

fn parse_lookback(config: &dyn ConfigPort) -> Result<Lookback, PortsimError> {
    let months = parse_count(config, "strategy", "lookback_months")?;
    let days = parse_count(config, "strategy", "lookback_days")?;
    match (months, days) {
        (Some(_), Some(_)) => Err(invalid(
            "strategy",
            "lookback_days",
            "set either lookback_months or lookback_days, not both",
        )),
        (Some(m), None) => Ok(Lookback::Months(m)),
        (None, Some(d)) => Ok(Lookback::TradingDays(d as usize)),
        (None, None) => Err(missing("strategy", "lookback_months")),
    }
}

fn parse_contribution(config: &dyn ConfigPort) -> Result<Contribution, PortsimError> {
    let amount = parse_number(config, "strategy", "amount")?;
    let fraction = parse_number(config, "strategy", "cash_fraction")?;
    match (amount, fraction) {
        (Some(_), Some(_)) => Err(invalid(
            "strategy",
            "cash_fraction",
            "set either amount or cash_fraction, not both",
        )),
        (Some(a), None) if a > 0.0 => Ok(Contribution::Amount(a)),
        (Some(_), None) => Err(invalid("strategy", "amount", "amount must be positive")),
        (None, Some(f)) if f > 0.0 && f <= 1.0 => Ok(Contribution::FractionOfCash(f)),
        (None, Some(_)) => Err(invalid(
            "strategy",
            "cash_fraction",
            "cash_fraction must be in (0, 1]",
        )),
        (None, None) => Err(missing("strategy", "amount")),
    }
}

fn parse_dates(config: &dyn ConfigPort) -> Result<(NaiveDate, NaiveDate), PortsimError> {
    let start_str = config.get_string("backtest", "start_date");
    let end_str = config.get_string("backtest", "end_date");

    let start_date = parse_date(start_str.as_deref(), "start_date")?;
    let end_date = parse_date(end_str.as_deref(), "end_date")?;

    if start_date >= end_date {
        return Err(invalid(
            "backtest",
            "start_date",
            "start_date must be before end_date",
        ));
    }
    Ok((start_date, end_date))
}

fn parse_date(value: Option<&str>, field: &str) -> Result<NaiveDate, PortsimError> {
    match value {
        None => Err(missing("backtest", field)),
        Some(s) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
            invalid(
                "backtest",
                field,
                &format!("invalid {field} format, expected YYYY-MM-DD"),
            )
        }),
    }
}

fn parse_intervals(value: &str) -> Result<Vec<RebalanceInterval>, PortsimError> {
    let mut intervals = Vec::new();
    for item in value.split(',').filter(|s| !s.trim().is_empty()) {
        let interval: RebalanceInterval = item
            .parse()
            .map_err(|reason: String| invalid("backtest", "intervals", &reason))?;
        if !intervals.contains(&interval) {
            intervals.push(interval);
        }
    }
    if intervals.is_empty() {
        return Err(missing("backtest", "intervals"));
    }
    Ok(intervals)
}

/// Comma-separated tickers, upper-cased. Missing key gives an empty set.
fn parse_tickers(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
) -> Result<BTreeSet<String>, PortsimError> {
    let Some(raw) = config.get_string(section, key) else {
        return Ok(BTreeSet::new());
    };
    let mut tickers = BTreeSet::new();
    for ticker in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '^'))
        {
            return Err(invalid(section, key, &format!("invalid ticker '{ticker}'")));
        }
        tickers.insert(ticker.to_uppercase());
    }
    Ok(tickers)
}

fn parse_number(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<f64>, PortsimError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(invalid(section, key, &format!("'{}' is not a number", s.trim()))),
        },
    }
}

fn parse_count(config: &dyn ConfigPort, section: &str, key: &str) -> Result<Option<u32>, PortsimError> {
    match config.get_string(section, key) {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => match s.trim().parse::<u32>() {
            Ok(v) if v > 0 => Ok(Some(v)),
            _ => Err(invalid(section, key, &format!("{key} must be a positive integer"))),
        },
    }
}

fn missing(section: &str, key: &str) -> PortsimError {
    PortsimError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

fn invalid(section: &str, key: &str, reason: &str) -> PortsimError {
    PortsimError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.to_string(),
    }
}
