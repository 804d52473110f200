use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use lmq_exp::{save_plan, ConfigCatalog};
use tracing::info;

use super::selection::SelectionArgs;

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,
    /// Destination YAML file.
    #[arg(long)]
    pub out: PathBuf,
}

pub fn run(args: &PlanArgs) -> Result<(), Box<dyn Error>> {
    let catalog = ConfigCatalog::builtin();
    let mut plan = args.selection.build_plan(&catalog)?;
    let spec = plan.resolve(&catalog)?;
    plan.experiment_name = Some(plan.experiment_name());
    save_plan(&args.out, &plan)?;
    info!(
        path = %args.out.display(),
        tasks = spec.task_count(),
        grid_hash = %spec.grid_hash()?,
        "plan written"
    );
    println!("{}", args.out.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmq_core::{Algorithm, TaskType};
    use lmq_exp::load_plan;

    #[test]
    fn written_plan_reloads_to_the_same_grid() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("plans/nightly.yaml");
        let args = PlanArgs {
            selection: SelectionArgs {
                models: vec!["1".into(), "meta-llama/Llama-2-7b-hf".into()],
                algorithms: vec![Algorithm::Fp16, Algorithm::Awq],
                task: Some(TaskType::EvalLeaderboard),
                threads: Some(3),
                ..SelectionArgs::default()
            },
            out: out.clone(),
        };
        run(&args).expect("plan");
        let catalog = ConfigCatalog::builtin();
        let reloaded = load_plan(&out).expect("reload");
        assert_eq!(reloaded.experiment_name.as_deref(), Some("eval_leaderboard-fp16-awq"));
        assert_eq!(reloaded.orchestrator.thread_limit, Some(3));
        let original = args.selection.build_plan(&catalog).expect("build");
        assert_eq!(
            reloaded.resolve(&catalog).expect("resolve").grid_hash().expect("hash"),
            original.resolve(&catalog).expect("resolve").grid_hash().expect("hash")
        );
    }
}
