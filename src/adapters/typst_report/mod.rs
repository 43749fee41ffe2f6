//! Typst report generation.
//!
//! Resolves the `{{PLACEHOLDER}}` markers of a Typst template by calling
//! helpers from `chart_svg` and `tables`, then writes one `.typ` file per
//! run into the output directory.

pub mod chart_svg;
pub mod default_template;
pub mod tables;

use std::fs;
use std::path::PathBuf;

use tracing::info;

use crate::domain::backtest::BacktestResult;
use crate::domain::error::PortsimError;
use crate::domain::metrics::{EquityPoint, Metrics, benchmark_curve};
use crate::domain::price::PriceSeries;
use crate::ports::report_port::ReportExporter;

/// Context for resolving template placeholders.
pub struct ReportContext<'a> {
    pub result: &'a BacktestResult,
    pub metrics: &'a Metrics,
    pub benchmark_curve: &'a [EquityPoint],
}

/// Resolve all `{{PLACEHOLDER}}`s in the given template string and return
/// the final Typst markup ready to be written to a `.typ` file.
pub fn resolve(template: &str, ctx: &ReportContext) -> String {
    let result = ctx.result;
    let currency = result.base_currency.code();
    let equity_curve = result.equity_curve();

    let (start, end) = match (equity_curve.first(), equity_curve.last()) {
        (Some(first), Some(last)) => (first.date.to_string(), last.date.to_string()),
        _ => ("n/a".to_string(), "n/a".to_string()),
    };

    let equity_svg = chart_svg::generate_equity_svg(&equity_curve, ctx.benchmark_curve);
    let equity_typst = if equity_svg.is_empty() {
        "_No equity data._".to_string()
    } else {
        format!(
            "#image.decode(\n\"{}\",\n  width: 100%,\n)",
            equity_svg.replace('\\', "\\\\").replace('"', "\\\"")
        )
    };

    let monthly = tables::compute_monthly_returns(&equity_curve);

    template
        .replace("{{STRATEGY_NAME}}", &tables::escape(&result.strategy_name))
        .replace(
            "{{RUN_SUMMARY}}",
            &tables::format_run_summary(result, &start, &end),
        )
        .replace(
            "{{METRICS_TABLE}}",
            &tables::format_metrics_table(ctx.metrics, currency),
        )
        .replace("{{EQUITY_CURVE_SVG}}", &equity_typst)
        .replace(
            "{{MONTHLY_RETURNS}}",
            &tables::format_returns_heatmap(&monthly),
        )
        .replace(
            "{{TRANSACTIONS}}",
            &tables::format_transactions(result.transactions()),
        )
        .replace("{{PRICE_GAPS}}", &tables::format_gaps(&result.gaps))
        .replace(
            "{{REJECTED_ORDERS}}",
            &tables::format_rejected_orders(&result.rejected_orders),
        )
}

/// Writes `<output_dir>/<strategy>_<interval>.typ`, one file per run.
pub struct TypstReportAdapter {
    output_dir: PathBuf,
    template: Option<String>,
}

impl TypstReportAdapter {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            template: None,
        }
    }

    /// Use a custom template instead of the built-in one.
    pub fn with_template(mut self, template: String) -> Self {
        self.template = Some(template);
        self
    }

    fn file_name(result: &BacktestResult) -> String {
        format!("{}_{}.typ", slug(&result.strategy_name), result.interval)
    }
}

impl ReportExporter for TypstReportAdapter {
    fn export(
        &self,
        result: &BacktestResult,
        benchmark: &PriceSeries,
    ) -> Result<PathBuf, PortsimError> {
        let metrics = Metrics::compute(result);
        let curve = match (result.snapshots.first(), result.snapshots.last()) {
            (Some(first), Some(last)) => benchmark_curve(
                benchmark,
                result.initial_capital(),
                first.date,
                last.date,
            ),
            _ => Vec::new(),
        };

        let ctx = ReportContext {
            result,
            metrics: &metrics,
            benchmark_curve: &curve,
        };
        let template = self
            .template
            .as_deref()
            .unwrap_or(default_template::template());
        let content = resolve(template, &ctx);

        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(Self::file_name(result));
        fs::write(&path, content)?;

        info!(path = %path.display(), strategy = %result.strategy_name, "report written");
        Ok(path)
    }
}

fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}
