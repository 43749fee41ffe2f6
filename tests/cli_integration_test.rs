//! CLI integration tests for the backtest command orchestration.
//!
//! Tests cover:
//! - Config parsing with command-line overrides (build_run_config)
//! - Full pipeline with MockMarketData and a real report directory
//! - Exit codes for aborted runs and data errors
//! - Validate and backtest commands with real INI and CSV files on disk

mod common;

use common::*;
use portsim::adapters::file_config_adapter::FileConfigAdapter;
use portsim::adapters::typst_report::TypstReportAdapter;
use portsim::cli::{self, Cli, Command};
use portsim::domain::config_validation::parse_run_config;
use portsim::domain::error::PortsimError;
use portsim::domain::schedule::RebalanceInterval;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

fn write_temp_ini(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn same_code(actual: ExitCode, expected: ExitCode) -> bool {
    format!("{actual:?}") == format!("{expected:?}")
}

const VALID_INI: &str = r#"
[backtest]
start_date = 2024-02-01
end_date = 2024-04-30
initial_capital = 10000
base_currency = USD
tickers = AAA, BBB
benchmark = IDX
intervals = weekly, monthly
risk_free_rate = 0.02

[strategy]
type = momentum
lookback_days = 10
"#;

mod config_loading {
    use super::*;

    #[test]
    fn build_run_config_without_overrides() {
        let adapter = FileConfigAdapter::from_string(VALID_INI).unwrap();
        let config = cli::build_run_config(&adapter, None, Vec::new()).unwrap();

        assert_eq!(config.start_date, date(2024, 2, 1));
        assert_eq!(config.benchmark, "IDX");
        assert_eq!(
            config.intervals,
            vec![RebalanceInterval::Weekly, RebalanceInterval::Monthly]
        );
        assert_eq!(config.output_dir, PathBuf::from("reports"));
        assert!((config.risk_free_rate - 0.02).abs() < f64::EPSILON);
    }

    #[test]
    fn overrides_replace_output_and_intervals() {
        let adapter = FileConfigAdapter::from_string(VALID_INI).unwrap();
        let config = cli::build_run_config(
            &adapter,
            Some(PathBuf::from("/tmp/out")),
            vec![
                RebalanceInterval::Monthly,
                RebalanceInterval::Daily,
                RebalanceInterval::Monthly,
            ],
        )
        .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(
            config.intervals,
            vec![RebalanceInterval::Daily, RebalanceInterval::Monthly]
        );
        assert_eq!(config.backtest_configs().len(), 2);
    }

    #[test]
    fn build_run_config_reports_missing_benchmark() {
        let ini = VALID_INI.replace("benchmark = IDX\n", "");
        let adapter = FileConfigAdapter::from_string(&ini).unwrap();

        let err = cli::build_run_config(&adapter, None, Vec::new()).unwrap_err();
        assert!(matches!(err, PortsimError::ConfigMissing { ref key, .. } if key == "benchmark"));
    }
}

mod pipeline {
    use super::*;

    fn market() -> MockMarketData {
        let dates = weekdays(date(2024, 1, 2), 90);
        let aaa: Vec<f64> = (0..90).map(|i| 50.0 + i as f64 * 0.5).collect();
        let bbb: Vec<f64> = (0..90).map(|i| 80.0 - i as f64 * 0.2).collect();
        let idx: Vec<f64> = (0..90).map(|i| 1000.0 + i as f64).collect();
        MockMarketData::new()
            .with_points("AAA", make_points("AAA", &dates, &aaa))
            .with_points("BBB", make_points("BBB", &dates, &bbb))
            .with_points("IDX", make_points("IDX", &dates, &idx))
    }

    fn run_config(output: &Path) -> portsim::domain::config_validation::RunConfig {
        let adapter = FileConfigAdapter::from_string(VALID_INI).unwrap();
        let mut config = parse_run_config(&adapter).unwrap();
        config.output_dir = output.to_path_buf();
        config
    }

    #[test]
    fn pipeline_generates_report_per_interval() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = run_config(dir.path());
        let exporter = TypstReportAdapter::new(config.output_dir.clone());

        let code = cli::run_backtest_pipeline(&market(), &exporter, &config);

        assert!(same_code(code, ExitCode::SUCCESS));
        let mut written: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        written.sort();
        assert_eq!(
            written,
            vec!["momentum_10d_monthly.typ", "momentum_10d_weekly.typ"]
        );
    }

    #[test]
    fn pipeline_fetches_history_before_start() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = run_config(dir.path());
        let exporter = TypstReportAdapter::new(config.output_dir.clone());
        let data = market();

        cli::run_backtest_pipeline(&data, &exporter, &config);

        let requests = data.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let (tickers, start, end) = &requests[0];
        assert_eq!(tickers, &vec!["AAA".to_string(), "BBB".into(), "IDX".into()]);
        assert!(*start < date(2024, 2, 1));
        assert_eq!(*end, date(2024, 4, 30));
    }

    #[test]
    fn pipeline_report_content_sanity() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = run_config(dir.path());
        let exporter = TypstReportAdapter::new(config.output_dir.clone());

        cli::run_backtest_pipeline(&market(), &exporter, &config);

        let report = fs::read_to_string(dir.path().join("momentum_10d_monthly.typ")).unwrap();
        assert!(report.contains("= Backtest Report: Momentum (10D)"));
        assert!(report.contains("#image.decode("));
        assert!(report.contains("Benchmark"));
        assert!(report.contains("[AAA]"));
        assert!(!report.contains("{{"));
    }

    #[test]
    fn pipeline_aborted_run_exits_with_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = run_config(dir.path());
        let exporter = TypstReportAdapter::new(config.output_dir.clone());
        let dates = weekdays(date(2024, 1, 2), 90);
        let data = market().with_points(
            "BBB",
            dates
                .iter()
                .map(|&d| make_point("BBB", d, 70.0, "EUR"))
                .collect(),
        );

        let code = cli::run_backtest_pipeline(&data, &exporter, &config);

        assert!(same_code(code, ExitCode::from(6)));
        // Partial results are still reported.
        assert!(dir.path().join("momentum_10d_weekly.typ").exists());
    }

    #[test]
    fn pipeline_data_error_exits_with_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = run_config(dir.path());
        let exporter = TypstReportAdapter::new(config.output_dir.clone());
        let data = market().with_error("BBB", "connection refused");

        let code = cli::run_backtest_pipeline(&data, &exporter, &config);

        assert!(same_code(code, ExitCode::from(3)));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

mod commands {
    use super::*;

    fn write_csv_fixture(dir: &Path) {
        let dates = weekdays(date(2024, 1, 2), 60);
        for (ticker, base, step) in [("AAA", 100.0, 1.0), ("IDX", 4000.0, 5.0)] {
            let mut content = String::from("date,close\n");
            for (i, d) in dates.iter().enumerate() {
                content.push_str(&format!("{d},{}\n", base + step * i as f64));
            }
            fs::write(dir.join(format!("{ticker}.csv")), content).unwrap();
        }
    }

    fn ini_for(dir: &Path) -> String {
        format!(
            r#"
[backtest]
start_date = 2024-01-02
end_date = 2024-03-22
initial_capital = 5000
tickers = AAA
benchmark = IDX
data_dir = {data}
liquidate_at_end = true

[strategy]
type = monthly_investment
ticker = AAA
amount = 1000

[report]
output_dir = {out}
"#,
            data = dir.display(),
            out = dir.join("reports").display()
        )
    }

    #[test]
    fn validate_valid_config_succeeds() {
        let file = write_temp_ini(VALID_INI);
        let code = cli::run(Cli {
            verbose: 0,
            command: Command::Validate {
                config: file.path().to_path_buf(),
            },
        });
        assert!(same_code(code, ExitCode::SUCCESS));
    }

    #[test]
    fn validate_missing_file_fails() {
        let code = cli::run(Cli {
            verbose: 0,
            command: Command::Validate {
                config: PathBuf::from("/nonexistent/portsim.ini"),
            },
        });
        assert!(same_code(code, ExitCode::from(2)));
    }

    #[test]
    fn validate_unknown_strategy_fails() {
        let file = write_temp_ini(&VALID_INI.replace("type = momentum", "type = martingale"));
        let code = cli::run(Cli {
            verbose: 0,
            command: Command::Validate {
                config: file.path().to_path_buf(),
            },
        });
        assert!(same_code(code, ExitCode::from(2)));
    }

    #[test]
    fn backtest_from_csv_files() {
        let dir = tempfile::TempDir::new().unwrap();
        write_csv_fixture(dir.path());
        let file = write_temp_ini(&ini_for(dir.path()));

        let code = cli::run(Cli {
            verbose: 0,
            command: Command::Backtest {
                config: file.path().to_path_buf(),
                output: None,
                interval: Vec::new(),
            },
        });

        assert!(same_code(code, ExitCode::SUCCESS));
        let report =
            fs::read_to_string(dir.path().join("reports/monthly_investment_monthly.typ")).unwrap();
        assert!(report.contains("Monthly Investment"));
        assert!(report.contains("SELL"));
    }

    #[test]
    fn backtest_interval_override() {
        let dir = tempfile::TempDir::new().unwrap();
        write_csv_fixture(dir.path());
        let file = write_temp_ini(&ini_for(dir.path()));
        let out = dir.path().join("custom");

        let code = cli::run(Cli {
            verbose: 0,
            command: Command::Backtest {
                config: file.path().to_path_buf(),
                output: Some(out.clone()),
                interval: vec![RebalanceInterval::Weekly],
            },
        });

        assert!(same_code(code, ExitCode::SUCCESS));
        assert!(out.join("monthly_investment_weekly.typ").exists());
        assert!(!dir.path().join("reports").exists());
    }

    #[test]
    fn backtest_missing_price_file_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        write_csv_fixture(dir.path());
        fs::remove_file(dir.path().join("AAA.csv")).unwrap();
        let file = write_temp_ini(&ini_for(dir.path()));

        let code = cli::run(Cli {
            verbose: 0,
            command: Command::Backtest {
                config: file.path().to_path_buf(),
                output: None,
                interval: Vec::new(),
            },
        });

        assert!(same_code(code, ExitCode::from(3)));
    }
}
