//! Typst table markup for reports.
//!
//! Provides:
//! - run summary and metrics tables
//! - monthly returns heatmap
//! - transaction log, price gaps and rejected orders

use crate::domain::backtest::{BacktestResult, GapReason, PriceGap, RejectedOrder, RunStatus};
use crate::domain::metrics::{EquityPoint, Metrics};
use crate::domain::portfolio::{Side, Transaction};
use chrono::Datelike;
use std::collections::BTreeMap;

pub struct MonthlyReturns {
    pub year: i32,
    pub month: u32,
    pub return_pct: f64,
}

/// Month-over-month change of the last value in each month. The first
/// month is measured from the first point of the curve.
pub fn compute_monthly_returns(equity_curve: &[EquityPoint]) -> Vec<MonthlyReturns> {
    let Some(first) = equity_curve.first() else {
        return Vec::new();
    };

    let mut month_end: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    for point in equity_curve {
        month_end.insert((point.date.year(), point.date.month()), point.equity);
    }

    let mut returns = Vec::with_capacity(month_end.len());
    let mut prev = first.equity;
    for ((year, month), end) in month_end {
        let return_pct = if prev > 0.0 { (end - prev) / prev } else { 0.0 };
        returns.push(MonthlyReturns {
            year,
            month,
            return_pct,
        });
        prev = end;
    }
    returns
}

pub fn format_returns_heatmap(returns: &[MonthlyReturns]) -> String {
    if returns.is_empty() {
        return "_Insufficient data for monthly returns._\n".to_string();
    }

    let mut years: BTreeMap<i32, [Option<f64>; 12]> = BTreeMap::new();
    for r in returns {
        let entry = years.entry(r.year).or_insert([None; 12]);
        entry[(r.month - 1) as usize] = Some(r.return_pct);
    }

    let mut output = String::new();
    output.push_str("#table(\n");
    output.push_str("  columns: 14,\n");
    output.push_str("  [*Year*], [*Jan*], [*Feb*], [*Mar*], [*Apr*], [*May*], [*Jun*], ");
    output.push_str("[*Jul*], [*Aug*], [*Sep*], [*Oct*], [*Nov*], [*Dec*], [*YTD*],\n");

    for (year, monthly) in &years {
        output.push_str(&format!("  [{year}],"));

        let mut ytd = 1.0_f64;
        for cell in monthly {
            match cell {
                Some(ret) => {
                    ytd *= 1.0 + ret;
                    output.push_str(&format!(" {},", format_heatmap_cell(*ret)));
                }
                None => output.push_str(" [-],"),
            }
        }
        output.push_str(&format!(" {},\n", format_heatmap_cell(ytd - 1.0)));
    }

    output.push_str(")\n");
    output
}

/// Returns (fill_color, needs_white_text) for a given return value.
fn return_color(ret: f64) -> (&'static str, bool) {
    if ret >= 0.10 {
        ("rgb(\"#006400\")", true)
    } else if ret >= 0.05 {
        ("rgb(\"#228B22\")", true)
    } else if ret >= 0.02 {
        ("rgb(\"#90EE90\")", false)
    } else if ret > 0.0 {
        ("rgb(\"#E0FFE0\")", false)
    } else if ret == 0.0 {
        ("rgb(\"#FFFFFF\")", false)
    } else if ret > -0.02 {
        ("rgb(\"#FFE0E0\")", false)
    } else if ret > -0.05 {
        ("rgb(\"#FF9090\")", false)
    } else if ret > -0.10 {
        ("rgb(\"#FF4444\")", true)
    } else {
        ("rgb(\"#8B0000\")", true)
    }
}

fn format_heatmap_cell(ret: f64) -> String {
    let (color, white_text) = return_color(ret);
    let formatted = format!("{:+.1}%", ret * 100.0);
    if white_text {
        format!("box(fill: {color}, text(fill: white, [{formatted}]))")
    } else {
        format!("box(fill: {color}, [{formatted}])")
    }
}

pub fn format_money(value: f64, currency: &str) -> String {
    if value >= 0.0 {
        format!("{value:.2} {currency}")
    } else {
        format!("-{:.2} {currency}", value.abs())
    }
}

/// Escapes characters with markup meaning inside Typst content blocks.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '[' | ']' | '#' | '*' | '_' | '$' | '@' | '<' | '>' | '\\' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn format_run_summary(result: &BacktestResult, start: &str, end: &str) -> String {
    let currency = result.base_currency.code();
    let status = match &result.status {
        RunStatus::Completed => "Completed".to_string(),
        RunStatus::Aborted { date, cause } => format!("Aborted on {date}: {cause}"),
    };

    let rows = [
        ("Strategy", result.strategy_name.clone()),
        ("Rebalance Interval", result.interval.to_string()),
        ("Period", format!("{start} to {end}")),
        ("Base Currency", currency.to_string()),
        (
            "Initial Capital",
            format_money(result.initial_capital(), currency),
        ),
        ("Decision Dates", result.decision_dates.len().to_string()),
        ("Status", status),
    ];

    let mut out = String::from("#table(\n  columns: 2,\n  align: (left, right),\n");
    for (label, value) in rows {
        out.push_str(&format!("  [*{label}*], [{}],\n", escape(&value)));
    }
    out.push_str(")\n");
    out
}

pub fn format_metrics_table(metrics: &Metrics, currency: &str) -> String {
    let rows = [
        ("Final Value", format_money(metrics.final_value, currency)),
        ("Total Return", format!("{:.2}%", metrics.total_return * 100.0)),
        (
            "Annualized Return",
            format!("{:.2}%", metrics.annualized_return * 100.0),
        ),
        ("Sharpe Ratio", format!("{:.2}", metrics.sharpe_ratio)),
        ("Sortino Ratio", format!("{:.2}", metrics.sortino_ratio)),
        ("Max Drawdown", format!("{:.2}%", metrics.max_drawdown * 100.0)),
        (
            "Max Drawdown Duration",
            format!("{} days", metrics.max_drawdown_duration),
        ),
        ("Transactions", metrics.trade_count.to_string()),
        ("Rejected Orders", metrics.rejected_count.to_string()),
        ("Price Gaps", metrics.gap_count.to_string()),
    ];

    let mut out = String::from("#table(\n  columns: 2,\n  align: (left, right),\n");
    for (label, value) in rows {
        out.push_str(&format!("  [*{label}*], [{}],\n", escape(&value)));
    }
    out.push_str(")\n");
    out
}

pub fn format_transactions(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return "_No transactions._\n".to_string();
    }

    let mut out = String::from(
        "#table(\n  columns: 7,\n  align: (right, left, left, left, right, right, right),\n",
    );
    out.push_str(
        "  [*\\#*], [*Date*], [*Ticker*], [*Side*], [*Shares*], [*Price*], [*Cash After*],\n",
    );
    for (i, tx) in transactions.iter().enumerate() {
        let color = match tx.side {
            Side::Buy => "green",
            Side::Sell => "red",
        };
        out.push_str(&format!(
            "  [{}], [{}], [{}], text(fill: {color}, [{}]), [{}], [{:.2}], [{:.2}],\n",
            i + 1,
            tx.date.format("%Y-%m-%d"),
            escape(&tx.ticker),
            tx.side,
            tx.shares,
            tx.price,
            tx.resulting_cash
        ));
    }
    out.push_str(")\n");
    out
}

pub fn format_gaps(gaps: &[PriceGap]) -> String {
    if gaps.is_empty() {
        return "_No price gaps._\n".to_string();
    }

    let mut out = String::from("#table(\n  columns: 3,\n");
    out.push_str("  [*Date*], [*Ticker*], [*Reason*],\n");
    for gap in gaps {
        let reason = match gap.reason {
            GapReason::NoPrice => "no price",
            GapReason::NoExchangeRate => "no exchange rate",
        };
        out.push_str(&format!(
            "  [{}], [{}], [{reason}],\n",
            gap.date,
            escape(&gap.ticker)
        ));
    }
    out.push_str(")\n");
    out
}

pub fn format_rejected_orders(rejected: &[RejectedOrder]) -> String {
    if rejected.is_empty() {
        return "_No rejected orders._\n".to_string();
    }

    let mut out = String::from("#table(\n  columns: 5,\n");
    out.push_str("  [*Date*], [*Ticker*], [*Side*], [*Shares*], [*Reason*],\n");
    for order in rejected {
        out.push_str(&format!(
            "  [{}], [{}], [{}], [{}], [{}],\n",
            order.date,
            escape(&order.ticker),
            order.side,
            order.shares,
            escape(&order.error.to_string())
        ));
    }
    out.push_str(")\n");
    out
}
