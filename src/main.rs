use clap::Parser;
use portsim::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
