//! Core domain types and simulation logic.

pub mod price;
pub mod currency;
pub mod portfolio;
pub mod schedule;
pub mod signal;
pub mod strategy;
pub mod execution;
pub mod backtest;
pub mod metrics;
pub mod config_validation;
pub mod error;
