use std::error::Error;

use clap::Args;
use lmq_exp::{experiment_status, to_canonical_json_bytes, ConfigCatalog};

use super::selection::SelectionArgs;

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,
    /// List every remaining task instead of the first few.
    #[arg(long)]
    pub all: bool,
    /// Emit the status as canonical JSON.
    #[arg(long)]
    pub json: bool,
}

const PREVIEW: usize = 10;

pub fn run(args: &StatusArgs) -> Result<(), Box<dyn Error>> {
    let catalog = ConfigCatalog::builtin();
    let (config, spec) = if args.selection.selects_grid() {
        let plan = args.selection.build_plan(&catalog)?;
        (plan.orchestrator_config(), Some(plan.resolve(&catalog)?))
    } else {
        (args.selection.orchestrator_config()?, None)
    };
    let status = experiment_status(&config, spec.as_ref())?;

    if args.json {
        let bytes = to_canonical_json_bytes(&status)?;
        println!("{}", String::from_utf8(bytes)?);
        return Ok(());
    }
    println!(
        "{}: {}/{} complete, {} pending, {} metric files{}",
        status.experiment,
        status.counts.complete,
        status.counts.total,
        status.counts.pending,
        status.metric_files,
        if status.locked { " (locked)" } else { "" }
    );
    let shown = if args.all {
        status.remaining.len()
    } else {
        PREVIEW.min(status.remaining.len())
    };
    for key in &status.remaining[..shown] {
        println!("  pending {key}");
    }
    if shown < status.remaining.len() {
        println!("  ... {} more", status.remaining.len() - shown);
    }
    Ok(())
}
