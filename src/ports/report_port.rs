//! Report generation port trait.

use crate::domain::backtest::BacktestResult;
use crate::domain::error::PortsimError;
use crate::domain::price::PriceSeries;
use std::path::PathBuf;

/// Renders a finished run, alongside a benchmark already expressed in the
/// run's base currency, into some artifact.
pub trait ReportExporter {
    fn export(
        &self,
        result: &BacktestResult,
        benchmark: &PriceSeries,
    ) -> Result<PathBuf, PortsimError>;
}
