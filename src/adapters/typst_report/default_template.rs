//! Built-in Typst report markup with `{{PLACEHOLDER}}` substitution.

const TEMPLATE: &str = r#"#set page(paper: "a4", margin: (x: 2cm, y: 2cm), numbering: "1")
#set text(size: 10pt)
#set table(stroke: 0.5pt + luma(200), inset: 5pt)

= Backtest Report: {{STRATEGY_NAME}}

== Run Summary

{{RUN_SUMMARY}}

== Performance

{{METRICS_TABLE}}

== Portfolio Value vs Benchmark

{{EQUITY_CURVE_SVG}}

== Monthly Returns

{{MONTHLY_RETURNS}}

== Transactions

{{TRANSACTIONS}}

== Price Gaps

{{PRICE_GAPS}}

== Rejected Orders

{{REJECTED_ORDERS}}
"#;

pub fn template() -> &'static str {
    TEMPLATE
}
