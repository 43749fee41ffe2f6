//! Translation of strategy signals into sized portfolio orders.
//!
//! Sells always run before buys so that proceeds can fund purchases on the
//! same date. Share counts are whole numbers, rounded down so an order never
//! needs more cash than its budget.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use super::error::OrderError;
use super::portfolio::{Portfolio, Side, Transaction};
use super::signal::{Instruction, Quantity, Signal};

/// Outcome of one order sent to the portfolio.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderOutcome {
    pub date: NaiveDate,
    pub ticker: String,
    pub side: Side,
    pub shares: u64,
    pub result: Result<Transaction, OrderError>,
}

impl OrderOutcome {
    pub fn is_filled(&self) -> bool {
        self.result.is_ok()
    }
}

/// Largest whole share count whose cost does not exceed `budget`.
pub fn whole_shares(budget: f64, price: f64) -> u64 {
    if !budget.is_finite() || !price.is_finite() || budget <= 0.0 || price <= 0.0 {
        return 0;
    }
    let mut shares = (budget / price).floor() as u64;
    while shares > 0 && shares as f64 * price > budget {
        shares -= 1;
    }
    if shares < u64::MAX && (shares + 1) as f64 * price <= budget {
        shares += 1;
    }
    shares
}

/// Executes `signal` against `portfolio` at today's `prices`.
pub fn execute_signal(
    portfolio: &mut Portfolio,
    signal: &Signal,
    prices: &HashMap<String, f64>,
    date: NaiveDate,
) -> Vec<OrderOutcome> {
    match signal {
        Signal::TargetAllocation(weights) => {
            if let Err(reason) = signal.validate() {
                return weights
                    .keys()
                    .map(|ticker| rejected(date, ticker, Side::Buy, 0, reason.clone()))
                    .collect();
            }
            rebalance_to(portfolio, weights, prices, date)
        }
        Signal::Orders(instructions) => execute_instructions(portfolio, instructions, prices, date),
    }
}

fn rebalance_to(
    portfolio: &mut Portfolio,
    weights: &BTreeMap<String, f64>,
    prices: &HashMap<String, f64>,
    date: NaiveDate,
) -> Vec<OrderOutcome> {
    let equity = match portfolio.value_on(date, prices) {
        Ok(v) => v,
        Err(err) => {
            return weights
                .keys()
                .map(|ticker| rejected(date, ticker, Side::Buy, 0, err.to_string()))
                .collect();
        }
    };

    let target_shares = |ticker: &str, price: f64| -> u64 {
        let weight = weights.get(ticker).copied().unwrap_or(0.0);
        whole_shares(equity * weight, price)
    };

    let mut outcomes = Vec::new();

    let sells: Vec<(String, u64, f64)> = portfolio
        .holdings()
        .values()
        .filter_map(|h| {
            let price = *prices.get(&h.ticker)?;
            let target = target_shares(&h.ticker, price);
            (h.shares > target).then(|| (h.ticker.clone(), h.shares - target, price))
        })
        .collect();
    for (ticker, shares, price) in sells {
        outcomes.push(place(portfolio, &ticker, Side::Sell, shares, price, date));
    }

    for (ticker, &weight) in weights {
        if weight <= 0.0 {
            continue;
        }
        let Some(&price) = prices.get(ticker) else {
            outcomes.push(rejected(
                date,
                ticker,
                Side::Buy,
                0,
                format!("no price for {ticker} on {date}"),
            ));
            continue;
        };
        let held = portfolio.shares(ticker);
        let target = target_shares(ticker, price);
        if target <= held {
            continue;
        }
        let shares = (target - held).min(whole_shares(portfolio.cash(), price));
        if shares == 0 {
            debug!(%date, ticker = ticker.as_str(), "allocation below one share, skipped");
            continue;
        }
        outcomes.push(place(portfolio, ticker, Side::Buy, shares, price, date));
    }

    outcomes
}

fn execute_instructions(
    portfolio: &mut Portfolio,
    instructions: &[Instruction],
    prices: &HashMap<String, f64>,
    date: NaiveDate,
) -> Vec<OrderOutcome> {
    let ordered = instructions
        .iter()
        .filter(|i| i.side == Side::Sell)
        .chain(instructions.iter().filter(|i| i.side == Side::Buy));

    let mut outcomes = Vec::with_capacity(instructions.len());
    for instruction in ordered {
        let Some(&price) = prices.get(&instruction.ticker) else {
            outcomes.push(rejected(
                date,
                &instruction.ticker,
                instruction.side,
                0,
                format!("no price for {} on {date}", instruction.ticker),
            ));
            continue;
        };

        let shares = match size(portfolio, instruction, price) {
            Ok(shares) => shares,
            Err(reason) => {
                outcomes.push(rejected(date, &instruction.ticker, instruction.side, 0, reason));
                continue;
            }
        };
        if shares == 0 && !matches!(instruction.quantity, Quantity::Shares(_)) {
            debug!(%date, ticker = instruction.ticker.as_str(), "order below one share, skipped");
            continue;
        }
        outcomes.push(place(
            portfolio,
            &instruction.ticker,
            instruction.side,
            shares,
            price,
            date,
        ));
    }
    outcomes
}

fn size(portfolio: &Portfolio, instruction: &Instruction, price: f64) -> Result<u64, String> {
    match (instruction.quantity, instruction.side) {
        (Quantity::Shares(n), _) => Ok(n),
        (Quantity::Amount(amount), _) if amount.is_finite() && amount >= 0.0 => {
            Ok(whole_shares(amount, price))
        }
        (Quantity::Fraction(f), Side::Buy) if (0.0..=1.0).contains(&f) => {
            Ok(whole_shares(portfolio.cash() * f, price))
        }
        (Quantity::Fraction(f), Side::Sell) if (0.0..=1.0).contains(&f) => {
            Ok((portfolio.shares(&instruction.ticker) as f64 * f).floor() as u64)
        }
        (quantity, _) => Err(format!(
            "invalid quantity {quantity:?} for {}",
            instruction.ticker
        )),
    }
}

fn place(
    portfolio: &mut Portfolio,
    ticker: &str,
    side: Side,
    shares: u64,
    price: f64,
    date: NaiveDate,
) -> OrderOutcome {
    let result = match side {
        Side::Buy => portfolio.buy(ticker, shares, price, date),
        Side::Sell => portfolio.sell(ticker, shares, price, date),
    }
    .cloned();

    if let Err(err) = &result {
        debug!(%date, ticker, %side, shares, %err, "order rejected");
    }

    OrderOutcome {
        date,
        ticker: ticker.to_string(),
        side,
        shares,
        result,
    }
}

fn rejected(date: NaiveDate, ticker: &str, side: Side, shares: u64, reason: String) -> OrderOutcome {
    OrderOutcome {
        date,
        ticker: ticker.to_string(),
        side,
        shares,
        result: Err(OrderError::InvalidOrder { reason }),
    }
}
