use std::error::Error;

use clap::{Parser, Subcommand};
use commands::{
    aggregate::{self, AggregateArgs},
    configs::{self, ConfigsArgs},
    plan::{self, PlanArgs},
    run::{self, RunArgs},
    status::{self, StatusArgs},
    version::{self, VersionArgs},
};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "lmq", about = "Resumable quantization experiment orchestrator")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute the pending tasks of an experiment and aggregate its metrics.
    Run(RunArgs),
    /// Show ledger progress for an experiment.
    Status(StatusArgs),
    /// Union per-task metric files into a new timestamped report.
    Aggregate(AggregateArgs),
    /// Write an experiment plan from command line selections.
    Plan(PlanArgs),
    /// List the built-in model and configuration catalogs.
    Configs(ConfigsArgs),
    /// Print version information.
    Version(VersionArgs),
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match verbose {
        0 if quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    match cli.command {
        Command::Run(args) => run::run(&args),
        Command::Status(args) => status::run(&args),
        Command::Aggregate(args) => aggregate::run(&args),
        Command::Plan(args) => plan::run(&args),
        Command::Configs(args) => configs::run(&args),
        Command::Version(args) => version::run(&args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "lmq",
            "-vv",
            "run",
            "--model",
            "0,1",
            "--algo",
            "hqq",
            "--config",
            "b4g64",
            "--config",
            "b3g64",
            "--task",
            "eval_ppl",
            "--keep-going",
            "--track-memory",
            "--threads",
            "4",
        ])
        .expect("parse");
        assert_eq!(cli.verbose, 2);
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.selection.models, ["0", "1"]);
        assert_eq!(args.selection.configs, ["b4g64", "b3g64"]);
        assert!(args.selection.keep_going);
        assert_eq!(args.selection.threads, Some(4));
    }
}
