use std::error::Error;
use std::path::PathBuf;

use clap::{Args, ValueEnum};
use lmq_exp::{
    process_collaborators, run_experiment, synthetic_collaborators, to_canonical_json_bytes,
    Collaborators, ConfigCatalog, ProcessProgram, RuntimeLimits,
};
use serde_json::json;
use tracing::info;

use super::selection::SelectionArgs;

/// Where model work is delegated.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Deterministic in-process stand-ins; useful for dry runs.
    #[default]
    Synthetic,
    /// An external program speaking JSON over stdin/stdout.
    Process,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,
    /// Collaborator backend.
    #[arg(long, value_enum, default_value_t = Backend::Synthetic)]
    pub backend: Backend,
    /// Collaborator program for the process backend.
    #[arg(long, required_if_eq("backend", "process"))]
    pub program: Option<PathBuf>,
    /// Argument passed to the program before the action name; repeatable.
    #[arg(long = "program-arg", allow_hyphen_values = true)]
    pub program_args: Vec<String>,
    /// Print the outcome as JSON instead of a summary line.
    #[arg(long)]
    pub json: bool,
}

fn collaborators(args: &RunArgs, limits: RuntimeLimits) -> Result<Collaborators, Box<dyn Error>> {
    match args.backend {
        Backend::Synthetic => Ok(synthetic_collaborators()),
        Backend::Process => {
            let program = args
                .program
                .as_ref()
                .ok_or("--program is required with --backend process")?;
            let program =
                ProcessProgram::new(program, limits).with_args(args.program_args.iter().cloned());
            Ok(process_collaborators(&program))
        }
    }
}

pub fn run(args: &RunArgs) -> Result<(), Box<dyn Error>> {
    let catalog = ConfigCatalog::builtin();
    let plan = args.selection.build_plan(&catalog)?;
    let spec = plan.resolve(&catalog)?;
    let config = plan.orchestrator_config();
    let mut collaborators = collaborators(args, RuntimeLimits::from_config(&config))?;
    info!(
        experiment = %config.experiment_name,
        tasks = spec.task_count(),
        backend = ?args.backend,
        "starting experiment"
    );

    let outcome = run_experiment(&spec, &config, &mut collaborators)?;
    if args.json {
        let bytes = to_canonical_json_bytes(&json!({
            "summary": outcome.summary,
            "report": outcome.report.path,
            "manifest": outcome.report.manifest_path,
            "rows": outcome.report.records.len(),
        }))?;
        println!("{}", String::from_utf8(bytes)?);
    } else {
        println!(
            "{}: executed {}, already complete {}, report {} ({} rows)",
            config.experiment_name,
            outcome.summary.executed,
            outcome.summary.skipped_complete,
            outcome.report.path.display(),
            outcome.report.records.len()
        );
    }
    Ok(())
}
