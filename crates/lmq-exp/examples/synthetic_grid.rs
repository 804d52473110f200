use std::path::PathBuf;

use lmq_core::{Algorithm, TaskType};
use lmq_exp::{
    run_experiment, synthetic_collaborators, ConfigCatalog, ExperimentPlan, ModelFamily,
};

fn main() {
    let catalog = ConfigCatalog::builtin();
    let configs = vec!["b4g64".to_string(), "b3g64".to_string()];
    let mut plan = ExperimentPlan::from_selection(
        &catalog,
        ModelFamily::Llm,
        vec!["0".into(), "1".into()],
        &[Algorithm::Hqq, Algorithm::Gptq],
        TaskType::EvalPpl,
        Some(configs.as_slice()),
    )
    .expect("plan");
    plan.orchestrator.result_dir = Some(
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("target/lmq-demo"),
    );
    let spec = plan.resolve(&catalog).expect("resolve");
    let config = plan.orchestrator_config();
    let mut collaborators = synthetic_collaborators();
    let outcome = run_experiment(&spec, &config, &mut collaborators).expect("run");
    println!(
        "executed {} / skipped {} -> {}",
        outcome.summary.executed,
        outcome.summary.skipped_complete,
        outcome.report.path.display()
    );
}
