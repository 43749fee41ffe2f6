//! Strategy output: a target allocation or explicit instructions.

use std::collections::BTreeMap;

use super::portfolio::Side;

/// Tolerance when checking that allocation weights sum to at most one.
pub const ALLOCATION_EPSILON: f64 = 1e-9;

/// How much of an instrument an instruction trades.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Quantity {
    /// A whole number of shares.
    Shares(u64),
    /// A base-currency amount, rounded down to whole shares.
    Amount(f64),
    /// Buys: fraction of available cash. Sells: fraction of the holding.
    Fraction(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub ticker: String,
    pub side: Side,
    pub quantity: Quantity,
}

impl Instruction {
    pub fn buy(ticker: impl Into<String>, quantity: Quantity) -> Self {
        Instruction {
            ticker: ticker.into(),
            side: Side::Buy,
            quantity,
        }
    }

    pub fn sell(ticker: impl Into<String>, quantity: Quantity) -> Self {
        Instruction {
            ticker: ticker.into(),
            side: Side::Sell,
            quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Ticker -> fraction of total equity. Held tickers that are absent
    /// are sold down to zero.
    TargetAllocation(BTreeMap<String, f64>),
    Orders(Vec<Instruction>),
}

impl Signal {
    /// A signal that changes nothing.
    pub fn hold() -> Self {
        Signal::Orders(Vec::new())
    }

    /// 100% of equity in one ticker.
    pub fn all_in(ticker: impl Into<String>) -> Self {
        Signal::TargetAllocation(BTreeMap::from([(ticker.into(), 1.0)]))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Signal::Orders(orders) if orders.is_empty())
    }

    /// Checks weights are finite, non-negative and sum to at most one.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Signal::TargetAllocation(weights) => {
                if let Some((ticker, w)) = weights
                    .iter()
                    .find(|(_, w)| !w.is_finite() || **w < 0.0)
                {
                    return Err(format!("weight for {ticker} must be non-negative, got {w}"));
                }
                let total: f64 = weights.values().sum();
                if total > 1.0 + ALLOCATION_EPSILON {
                    return Err(format!("allocation weights sum to {total:.6}, above 1"));
                }
                Ok(())
            }
            Signal::Orders(orders) => {
                for order in orders {
                    let ok = match order.quantity {
                        Quantity::Shares(_) => true,
                        Quantity::Amount(a) => a.is_finite() && a >= 0.0,
                        Quantity::Fraction(f) => f.is_finite() && (0.0..=1.0).contains(&f),
                    };
                    if !ok {
                        return Err(format!(
                            "invalid quantity {:?} for {}",
                            order.quantity, order.ticker
                        ));
                    }
                }
                Ok(())
            }
        }
    }
}
