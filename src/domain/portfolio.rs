//! Cash, holdings and the transaction ledger.
//!
//! All state changes go through [`Portfolio::buy`] and [`Portfolio::sell`].
//! Both validate the whole order before touching any field, so cash never
//! goes negative, no holding goes short, and the ledger always replays to
//! the current state.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

use super::error::{OrderError, PortsimError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("BUY"),
            Side::Sell => f.write_str("SELL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub ticker: String,
    pub shares: u64,
}

impl Holding {
    pub fn market_value(&self, price: f64) -> f64 {
        self.shares as f64 * price
    }
}

/// One executed order. Prices are in the base currency.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub date: NaiveDate,
    pub ticker: String,
    pub side: Side,
    pub shares: u64,
    pub price: f64,
    pub resulting_cash: f64,
}

impl Transaction {
    pub fn value(&self) -> f64 {
        self.shares as f64 * self.price
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    initial_capital: f64,
    cash: f64,
    holdings: BTreeMap<String, Holding>,
    transactions: Vec<Transaction>,
}

impl Portfolio {
    pub fn new(initial_capital: f64) -> Self {
        Portfolio {
            initial_capital,
            cash: initial_capital,
            holdings: BTreeMap::new(),
            transactions: Vec::new(),
        }
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn holdings(&self) -> &BTreeMap<String, Holding> {
        &self.holdings
    }

    pub fn shares(&self, ticker: &str) -> u64 {
        self.holdings.get(ticker).map_or(0, |h| h.shares)
    }

    pub fn has_position(&self, ticker: &str) -> bool {
        self.holdings.contains_key(ticker)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn buy(
        &mut self,
        ticker: &str,
        shares: u64,
        price: f64,
        date: NaiveDate,
    ) -> Result<&Transaction, OrderError> {
        validate_order(shares, price)?;

        let cost = shares as f64 * price;
        if cost > self.cash {
            return Err(OrderError::InsufficientCash {
                required: cost,
                available: self.cash,
            });
        }

        self.cash -= cost;
        self.holdings
            .entry(ticker.to_string())
            .or_insert_with(|| Holding {
                ticker: ticker.to_string(),
                shares: 0,
            })
            .shares += shares;

        debug!(%date, ticker, shares, price, cash = self.cash, "buy filled");
        Ok(self.record(date, ticker, Side::Buy, shares, price))
    }

    pub fn sell(
        &mut self,
        ticker: &str,
        shares: u64,
        price: f64,
        date: NaiveDate,
    ) -> Result<&Transaction, OrderError> {
        validate_order(shares, price)?;

        let held = self.shares(ticker);
        if shares > held {
            return Err(OrderError::InsufficientShares {
                ticker: ticker.to_string(),
                requested: shares,
                held,
            });
        }

        self.cash += shares as f64 * price;
        if shares == held {
            self.holdings.remove(ticker);
        } else if let Some(holding) = self.holdings.get_mut(ticker) {
            holding.shares -= shares;
        }

        debug!(%date, ticker, shares, price, cash = self.cash, "sell filled");
        Ok(self.record(date, ticker, Side::Sell, shares, price))
    }

    /// Market value of each holding at `prices`.
    pub fn market_values(
        &self,
        date: NaiveDate,
        prices: &HashMap<String, f64>,
    ) -> Result<BTreeMap<String, f64>, PortsimError> {
        self.holdings
            .values()
            .map(|h| {
                let price = prices
                    .get(&h.ticker)
                    .ok_or_else(|| PortsimError::MissingPrice {
                        ticker: h.ticker.clone(),
                        date,
                    })?;
                Ok((h.ticker.clone(), h.market_value(*price)))
            })
            .collect()
    }

    /// Cash plus the market value of every holding.
    pub fn value_on(
        &self,
        date: NaiveDate,
        prices: &HashMap<String, f64>,
    ) -> Result<f64, PortsimError> {
        let positions: f64 = self.market_values(date, prices)?.values().sum();
        Ok(self.cash + positions)
    }

    /// Sells every holding at `prices`. Nothing is sold unless every held
    /// ticker has a price.
    pub fn liquidate_all(
        &mut self,
        date: NaiveDate,
        prices: &HashMap<String, f64>,
    ) -> Result<Vec<Transaction>, PortsimError> {
        let orders: Vec<(String, u64, f64)> = self
            .holdings
            .values()
            .map(|h| {
                let price = prices
                    .get(&h.ticker)
                    .copied()
                    .ok_or_else(|| PortsimError::MissingPrice {
                        ticker: h.ticker.clone(),
                        date,
                    })?;
                Ok((h.ticker.clone(), h.shares, price))
            })
            .collect::<Result<_, PortsimError>>()?;

        let mut sold = Vec::with_capacity(orders.len());
        for (ticker, shares, price) in orders {
            sold.push(self.sell(&ticker, shares, price, date)?.clone());
        }
        Ok(sold)
    }

    /// Rebuilds a portfolio by applying `transactions` in order to a fresh
    /// one seeded with `initial_capital`.
    pub fn replay(initial_capital: f64, transactions: &[Transaction]) -> Result<Self, OrderError> {
        let mut portfolio = Portfolio::new(initial_capital);
        for tx in transactions {
            match tx.side {
                Side::Buy => portfolio.buy(&tx.ticker, tx.shares, tx.price, tx.date)?,
                Side::Sell => portfolio.sell(&tx.ticker, tx.shares, tx.price, tx.date)?,
            };
        }
        Ok(portfolio)
    }

    /// True when replaying the ledger reproduces this portfolio exactly.
    pub fn reconciles(&self) -> bool {
        match Portfolio::replay(self.initial_capital, &self.transactions) {
            Ok(replayed) => replayed == *self,
            Err(_) => false,
        }
    }

    fn record(
        &mut self,
        date: NaiveDate,
        ticker: &str,
        side: Side,
        shares: u64,
        price: f64,
    ) -> &Transaction {
        self.transactions.push(Transaction {
            date,
            ticker: ticker.to_string(),
            side,
            shares,
            price,
            resulting_cash: self.cash,
        });
        &self.transactions[self.transactions.len() - 1]
    }
}

fn validate_order(shares: u64, price: f64) -> Result<(), OrderError> {
    if shares == 0 {
        return Err(OrderError::InvalidOrder {
            reason: "share count must be positive".into(),
        });
    }
    if !price.is_finite() || price <= 0.0 {
        return Err(OrderError::InvalidOrder {
            reason: format!("price must be positive, got {price}"),
        });
    }
    Ok(())
}
