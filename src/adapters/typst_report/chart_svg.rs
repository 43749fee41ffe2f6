//! SVG line chart of portfolio value against the benchmark.

use crate::domain::metrics::EquityPoint;
use chrono::NaiveDate;

const CHART_WIDTH: f64 = 700.0;
const CHART_HEIGHT: f64 = 300.0;
const MARGIN_LEFT: f64 = 70.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 30.0;
const MARGIN_BOTTOM: f64 = 40.0;

const PORTFOLIO_COLOR: &str = "#2563eb";
const BENCHMARK_COLOR: &str = "#6b7280";

/// Both curves on one date axis and one value axis. Empty when the
/// portfolio curve is empty.
pub fn generate_equity_svg(portfolio: &[EquityPoint], benchmark: &[EquityPoint]) -> String {
    let (Some(first), Some(last)) = (portfolio.first(), portfolio.last()) else {
        return String::new();
    };
    let start_date = first.date;
    let end_date = last.date;

    let visible_benchmark: Vec<&EquityPoint> = benchmark
        .iter()
        .filter(|p| (start_date..=end_date).contains(&p.date))
        .collect();

    let values = portfolio
        .iter()
        .chain(visible_benchmark.iter().copied())
        .map(|p| p.equity);
    let min_value = values.clone().fold(f64::INFINITY, f64::min);
    let max_value = values.fold(f64::NEG_INFINITY, f64::max);
    let range = (max_value - min_value).max(1.0);

    let plot_width = CHART_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = CHART_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let span_days = (end_date - start_date).num_days().max(1) as f64;

    let x_scale = |date: NaiveDate| -> f64 {
        MARGIN_LEFT + ((date - start_date).num_days() as f64 / span_days) * plot_width
    };
    let y_scale =
        |v: f64| -> f64 { MARGIN_TOP + plot_height - ((v - min_value) / range) * plot_height };

    let project = |p: &EquityPoint| (x_scale(p.date), y_scale(p.equity));

    let mut svg = String::new();
    svg.push_str(&format!(
        r##"<svg width="{w}" height="{h}" viewBox="0 0 {w} {h}" xmlns="http://www.w3.org/2000/svg">"##,
        w = CHART_WIDTH,
        h = CHART_HEIGHT
    ));
    svg.push_str("\n  <rect width=\"100%\" height=\"100%\" fill=\"white\"/>\n");
    svg.push_str(&format!(
        "  <line x1=\"{x}\" y1=\"{}\" x2=\"{x}\" y2=\"{}\" stroke=\"#ccc\" stroke-width=\"1\"/>\n",
        MARGIN_TOP,
        CHART_HEIGHT - MARGIN_BOTTOM,
        x = MARGIN_LEFT,
    ));
    svg.push_str(&format!(
        "  <line x1=\"{}\" y1=\"{y}\" x2=\"{}\" y2=\"{y}\" stroke=\"#ccc\" stroke-width=\"1\"/>\n",
        MARGIN_LEFT,
        CHART_WIDTH - MARGIN_RIGHT,
        y = CHART_HEIGHT - MARGIN_BOTTOM,
    ));

    for (value, y) in [
        (max_value, MARGIN_TOP + 5.0),
        ((max_value + min_value) / 2.0, MARGIN_TOP + plot_height / 2.0),
        (min_value, CHART_HEIGHT - MARGIN_BOTTOM - 5.0),
    ] {
        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"{}\" text-anchor=\"end\" font-size=\"10\" fill=\"#666\">{:.0}</text>\n",
            MARGIN_LEFT - 5.0,
            y,
            value
        ));
    }
    for (date, x) in [
        (start_date, MARGIN_LEFT),
        (end_date, CHART_WIDTH - MARGIN_RIGHT),
    ] {
        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"{}\" text-anchor=\"middle\" font-size=\"10\" fill=\"#666\">{}</text>\n",
            x, CHART_HEIGHT, date
        ));
    }

    if !visible_benchmark.is_empty() {
        svg.push_str(&format!(
            "  <path d=\"{}\" fill=\"none\" stroke=\"{}\" stroke-width=\"1.5\" stroke-dasharray=\"6 3\"/>\n",
            path_data(visible_benchmark.iter().copied(), &project),
            BENCHMARK_COLOR
        ));
    }
    svg.push_str(&format!(
        "  <path d=\"{}\" fill=\"none\" stroke=\"{}\" stroke-width=\"2\"/>\n",
        path_data(portfolio.iter(), &project),
        PORTFOLIO_COLOR
    ));

    svg.push_str(&format!(
        "  <text x=\"{}\" y=\"15\" font-size=\"11\" fill=\"{}\">Portfolio</text>\n",
        MARGIN_LEFT, PORTFOLIO_COLOR
    ));
    if !visible_benchmark.is_empty() {
        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"15\" font-size=\"11\" fill=\"{}\">Benchmark</text>\n",
            MARGIN_LEFT + 70.0,
            BENCHMARK_COLOR
        ));
    }
    svg.push_str("</svg>");
    svg
}

fn path_data<'a>(
    points: impl Iterator<Item = &'a EquityPoint>,
    project: &dyn Fn(&EquityPoint) -> (f64, f64),
) -> String {
    let mut data = String::new();
    for (i, point) in points.enumerate() {
        let (x, y) = project(point);
        let cmd = if i == 0 { "M" } else { " L" };
        data.push_str(&format!("{cmd} {x:.1} {y:.1}"));
    }
    data
}
