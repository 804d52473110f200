use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use lmq_exp::{aggregate, ExperimentLayout, OrchestratorConfig};

#[derive(Args, Debug)]
pub struct AggregateArgs {
    /// Experiment directory name under the result root.
    #[arg(long)]
    pub experiment_name: String,
    /// Root directory for experiment results.
    #[arg(long)]
    pub result_dir: Option<PathBuf>,
}

pub fn run(args: &AggregateArgs) -> Result<(), Box<dyn Error>> {
    let mut config = OrchestratorConfig::new(args.experiment_name.clone());
    if let Some(result_dir) = &args.result_dir {
        config.result_dir = result_dir.clone();
    }
    config.validate()?;
    let layout: ExperimentLayout = config.layout();
    if !layout.dir().is_dir() {
        return Err(format!("no experiment directory at {}", layout.dir().display()).into());
    }
    let report = aggregate(&layout, None)?;
    println!(
        "{} ({} rows, {} columns)",
        report.path.display(),
        report.records.len(),
        report.columns.len()
    );
    Ok(())
}
