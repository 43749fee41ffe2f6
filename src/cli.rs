//! CLI definition and dispatch.

use clap::{ArgAction, Parser, Subcommand};
use rayon::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{Level, debug, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::typst_report::TypstReportAdapter;
use crate::domain::backtest::{BacktestResult, RunStatus, run_backtest};
use crate::domain::config_validation::{RunConfig, parse_run_config};
use crate::domain::currency::CurrencyNormalizer;
use crate::domain::error::PortsimError;
use crate::domain::metrics::Metrics;
use crate::domain::price::{Currency, PriceSeries};
use crate::domain::schedule::RebalanceInterval;
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::MarketDataProvider;
use crate::ports::report_port::ReportExporter;

/// Exit code when at least one run aborted.
const ABORTED_RUN_EXIT: u8 = 6;

#[derive(Parser, Debug)]
#[command(name = "portsim", about = "Day-by-day portfolio backtester")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a backtest for every configured rebalance interval
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        /// Report directory, overrides `[report] output_dir`
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Rebalance interval(s), overrides `[backtest] intervals`
        #[arg(short, long, value_delimiter = ',')]
        interval: Vec<RebalanceInterval>,
    },
    /// Validate a configuration file without running it
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
}

impl Cli {
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .with_writer(std::io::stderr)
            .finish();

        // A subscriber may already be installed when run from tests.
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            debug!("tracing subscriber already installed");
        }
    }
}

pub fn run(cli: Cli) -> ExitCode {
    cli.init_logging();
    match cli.command {
        Command::Backtest {
            config,
            output,
            interval,
        } => run_backtest_command(&config, output, interval),
        Command::Validate { config } => run_validate(&config),
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

/// Parses the whole configuration, applying command-line overrides.
pub fn build_run_config(
    adapter: &dyn ConfigPort,
    output: Option<PathBuf>,
    intervals: Vec<RebalanceInterval>,
) -> Result<RunConfig, PortsimError> {
    let mut run_config = parse_run_config(adapter)?;
    if let Some(output) = output {
        run_config.output_dir = output;
    }
    if !intervals.is_empty() {
        let mut intervals = intervals;
        intervals.sort();
        intervals.dedup();
        run_config.intervals = intervals;
    }
    Ok(run_config)
}

fn run_backtest_command(
    config_path: &PathBuf,
    output: Option<PathBuf>,
    intervals: Vec<RebalanceInterval>,
) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let run_config = match build_run_config(&adapter, output, intervals) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let mut exporter = TypstReportAdapter::new(run_config.output_dir.clone());
    if let Some(path) = adapter.get_string("report", "template_path") {
        match fs::read_to_string(path.trim()) {
            Ok(template) => exporter = exporter.with_template(template),
            Err(e) => {
                eprintln!("error: failed to read template {path}: {e}");
                return (&PortsimError::Io(e)).into();
            }
        }
    }

    let data = CsvAdapter::new(run_config.data_dir.clone(), run_config.base_currency.clone());
    run_backtest_pipeline(&data, &exporter, &run_config)
}

/// Loads data, runs one backtest per interval in parallel, prints a summary
/// per run and exports a report for each.
pub fn run_backtest_pipeline(
    data: &dyn MarketDataProvider,
    exporter: &dyn ReportExporter,
    run_config: &RunConfig,
) -> ExitCode {
    let market = match load_market(data, run_config) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let configs = run_config.backtest_configs();
    eprintln!(
        "Running {} backtest(s): {}, {} to {}",
        configs.len(),
        run_config.strategy.build().name(),
        run_config.start_date,
        run_config.end_date,
    );

    let results: Vec<BacktestResult> = configs
        .par_iter()
        .map(|config| {
            let mut strategy = run_config.strategy.build();
            run_backtest(&market.series, &market.normalizer, strategy.as_mut(), config)
        })
        .collect();

    let mut aborted = false;
    for result in &results {
        print_summary(result);
        if !result.is_complete() {
            aborted = true;
        }

        match exporter.export(result, &market.benchmark) {
            Ok(path) => println!("{}", path.display()),
            Err(e) => {
                eprintln!("error: failed to write report: {e}");
                return (&e).into();
            }
        }
    }

    if aborted {
        ExitCode::from(ABORTED_RUN_EXIT)
    } else {
        ExitCode::SUCCESS
    }
}

struct Market {
    series: Vec<PriceSeries>,
    normalizer: CurrencyNormalizer,
    benchmark: PriceSeries,
}

fn load_market(data: &dyn MarketDataProvider, run_config: &RunConfig) -> Result<Market, PortsimError> {
    let history_start = run_config.history_start().min(run_config.start_date);
    let mut tickers: Vec<String> = run_config.all_tickers().into_iter().collect();
    if !tickers.contains(&run_config.benchmark) {
        tickers.push(run_config.benchmark.clone());
    }

    let mut fetched = data.fetch(&tickers, history_start, run_config.end_date)?;
    let rates = data.fetch_rates(history_start, run_config.end_date)?;
    let normalizer = CurrencyNormalizer::from_rates(rates)?;
    info!(
        tickers = tickers.len(),
        rates = normalizer.rate_count(),
        from = %history_start,
        to = %run_config.end_date,
        "market data loaded"
    );

    let benchmark_points = fetched
        .get(&run_config.benchmark)
        .cloned()
        .unwrap_or_default();
    let benchmark = normalize_benchmark(
        &run_config.benchmark,
        PriceSeries::new(run_config.benchmark.clone(), benchmark_points),
        &normalizer,
        &run_config.base_currency,
    );

    let series = run_config
        .all_tickers()
        .into_iter()
        .map(|ticker| {
            let points = fetched.remove(&ticker).unwrap_or_default();
            if points.is_empty() {
                warn!(ticker, "no price data");
            }
            PriceSeries::new(ticker, points)
        })
        .collect();

    Ok(Market {
        series,
        normalizer,
        benchmark,
    })
}

/// The benchmark is only compared against, so points that cannot be
/// converted are dropped instead of failing the run.
fn normalize_benchmark(
    ticker: &str,
    raw: PriceSeries,
    normalizer: &CurrencyNormalizer,
    base: &Currency,
) -> PriceSeries {
    let mut dropped = 0usize;
    let points = raw
        .points()
        .iter()
        .filter_map(|p| match normalizer.normalize(p, base) {
            Ok(point) => Some(point),
            Err(e) => {
                debug!(ticker, date = %p.date, error = %e, "benchmark point dropped");
                dropped += 1;
                None
            }
        })
        .collect();
    if dropped > 0 {
        warn!(ticker, dropped, "benchmark points without exchange rate dropped");
    }
    PriceSeries::new(ticker, points)
}

fn print_summary(result: &BacktestResult) {
    let metrics = Metrics::compute(result);
    let currency = result.base_currency.code();

    eprintln!("\n=== {} ({}) ===", result.strategy_name, result.interval);
    if let RunStatus::Aborted { date, cause } = &result.status {
        eprintln!("ABORTED on {date}: {cause}");
    }
    eprintln!(
        "Final Value:      {:.2} {currency}",
        metrics.final_value
    );
    eprintln!("Total Return:     {:.2}%", metrics.total_return * 100.0);
    eprintln!(
        "Annualized:       {:.2}%",
        metrics.annualized_return * 100.0
    );
    eprintln!("Sharpe Ratio:     {:.2}", metrics.sharpe_ratio);
    eprintln!("Sortino Ratio:    {:.2}", metrics.sortino_ratio);
    eprintln!("Max Drawdown:     -{:.1}%", metrics.max_drawdown * 100.0);
    eprintln!("Transactions:     {}", metrics.trade_count);
    if metrics.rejected_count > 0 {
        eprintln!("Rejected Orders:  {}", metrics.rejected_count);
    }
    if metrics.gap_count > 0 {
        eprintln!("Price Gaps:       {}", metrics.gap_count);
    }
}

fn run_validate(config_path: &PathBuf) -> ExitCode {
    eprintln!("Validating config: {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let run_config = match parse_run_config(&adapter) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let intervals: Vec<&str> = run_config.intervals.iter().map(|i| i.as_str()).collect();
    let tickers: Vec<String> = run_config.all_tickers().into_iter().collect();
    eprintln!("\nStrategy:   {}", run_config.strategy.build().name());
    eprintln!("Period:     {} to {}", run_config.start_date, run_config.end_date);
    eprintln!("Tickers:    {}", tickers.join(", "));
    eprintln!("Benchmark:  {}", run_config.benchmark);
    eprintln!("Intervals:  {}", intervals.join(", "));
    eprintln!("History:    from {}", run_config.history_start());

    eprintln!("\nConfiguration is valid.");
    ExitCode::SUCCESS
}
