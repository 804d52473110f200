use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use lmq_core::{Algorithm, TaskType};
use lmq_exp::{
    load_plan, ConfigCatalog, ExperimentPlan, FailurePolicy, ModelFamily, OrchestratorConfig,
    OrchestratorOverrides,
};

/// Experiment selection shared by `run`, `status` and `plan`.
///
/// Flags override the plan file, which overrides built-in defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// YAML experiment plan.
    #[arg(long)]
    pub plan: Option<PathBuf>,
    /// Model indices into the family table or full model ids; defaults to the whole table.
    #[arg(long = "model", value_delimiter = ',')]
    pub models: Vec<String>,
    /// Model table that indices refer to (`llm` or `vit`).
    #[arg(long, value_parser = parse_family)]
    pub family: Option<ModelFamily>,
    /// Algorithms to run.
    #[arg(long = "algo", value_delimiter = ',', value_parser = parse_algorithm)]
    pub algorithms: Vec<Algorithm>,
    /// Configuration names; each algorithm keeps the names it knows.
    #[arg(long = "config", value_delimiter = ',')]
    pub configs: Vec<String>,
    /// Task type applied to every selected algorithm.
    #[arg(long, value_parser = parse_task)]
    pub task: Option<TaskType>,
    /// Result sub-directory name; derived from the selection when omitted.
    #[arg(long)]
    pub experiment_name: Option<String>,
    /// Root directory for ledgers, metric files and reports.
    #[arg(long)]
    pub result_dir: Option<PathBuf>,
    /// Directory holding quantized snapshots.
    #[arg(long)]
    pub snapshot_dir: Option<PathBuf>,
    /// Directory holding precomputed per-model metadata tables.
    #[arg(long)]
    pub metadata_dir: Option<PathBuf>,
    /// Dump a memory trace per task next to its metrics.
    #[arg(long)]
    pub track_memory: bool,
    /// Leave failed tasks pending and continue with the rest.
    #[arg(long)]
    pub keep_going: bool,
    /// Thread cap handed to collaborators.
    #[arg(long)]
    pub threads: Option<usize>,
    /// Model hub cache directory handed to collaborators.
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,
}

fn parse_algorithm(raw: &str) -> Result<Algorithm, String> {
    raw.parse().map_err(|err: lmq_core::LmqError| err.to_string())
}

fn parse_task(raw: &str) -> Result<TaskType, String> {
    raw.parse().map_err(|err: lmq_core::LmqError| err.to_string())
}

fn parse_family(raw: &str) -> Result<ModelFamily, String> {
    match raw.trim() {
        "llm" => Ok(ModelFamily::Llm),
        "vit" => Ok(ModelFamily::Vit),
        other => Err(format!("unknown model family `{other}` (expected llm or vit)")),
    }
}

impl SelectionArgs {
    /// Whether the flags alone describe an experiment grid.
    pub fn selects_grid(&self) -> bool {
        self.plan.is_some() || !self.algorithms.is_empty()
    }

    fn overrides(&self) -> OrchestratorOverrides {
        OrchestratorOverrides {
            result_dir: self.result_dir.clone(),
            snapshot_dir: self.snapshot_dir.clone(),
            metadata_dir: self.metadata_dir.clone(),
            track_memory: self.track_memory.then_some(true),
            failure_policy: self.keep_going.then_some(FailurePolicy::Continue),
            thread_limit: self.threads,
            cache_dir: self.cache_dir.clone(),
        }
    }

    /// Merges the plan file (if any) with the flags into one plan.
    pub fn build_plan(&self, catalog: &ConfigCatalog) -> Result<ExperimentPlan, Box<dyn Error>> {
        let configs = (!self.configs.is_empty()).then_some(self.configs.as_slice());
        let mut plan = match &self.plan {
            Some(path) => load_plan(path)?,
            None => {
                if self.algorithms.is_empty() {
                    return Err("--algo is required when no --plan is given".into());
                }
                let task = self.task.ok_or("--task is required when no --plan is given")?;
                let family = self.family.unwrap_or_default();
                ExperimentPlan::from_selection(
                    catalog,
                    family,
                    Vec::new(),
                    &self.algorithms,
                    task,
                    configs,
                )?
            }
        };

        if let Some(family) = self.family {
            plan.family = family;
        }
        if self.plan.is_some() {
            if !self.algorithms.is_empty() {
                let task = self
                    .task
                    .or_else(|| plan.tasks.values().next().map(|tasks| tasks.task_type))
                    .ok_or("--task is required when the plan lists no tasks")?;
                plan.tasks = ExperimentPlan::from_selection(
                    catalog,
                    plan.family,
                    Vec::new(),
                    &self.algorithms,
                    task,
                    configs,
                )?
                .tasks;
            } else {
                if configs.is_some() {
                    let algorithms: Vec<Algorithm> = plan.tasks.keys().copied().collect();
                    let resolved = catalog.resolve_many(&algorithms, configs)?;
                    for (algorithm, entry) in plan.tasks.iter_mut() {
                        if *algorithm == Algorithm::Fp16 {
                            continue;
                        }
                        entry.configs = resolved
                            .get(algorithm)
                            .map(|named| named.iter().map(|config| config.name.clone()).collect());
                    }
                }
                if let Some(task) = self.task {
                    for entry in plan.tasks.values_mut() {
                        entry.task_type = task;
                    }
                }
            }
        }
        if !self.models.is_empty() {
            plan.models = self.models.clone();
        }
        if plan.models.is_empty() {
            plan.models = (0..plan.family.models().len()).map(|idx| idx.to_string()).collect();
        }
        if let Some(name) = &self.experiment_name {
            plan.experiment_name = Some(name.clone());
        }
        plan.orchestrator = self.overrides().layered_over(&plan.orchestrator);
        Ok(plan)
    }

    /// Orchestrator settings for commands that only need to locate an experiment.
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, Box<dyn Error>> {
        if self.selects_grid() {
            return Ok(self.build_plan(&ConfigCatalog::builtin())?.orchestrator_config());
        }
        let name = self
            .experiment_name
            .clone()
            .ok_or("--experiment-name, --plan or --algo is required")?;
        let mut config = OrchestratorConfig::new(name);
        self.overrides().apply(&mut config);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_plan(dir: &std::path::Path) -> PathBuf {
        let path = dir.join("plan.yaml");
        std::fs::write(
            &path,
            "experiment_name: nightly\nmodels: [\"1\"]\ntasks:\n  hqq:\n    type: eval_ppl\n    configs: [b4g64]\norchestrator:\n  thread_limit: 8\n  result_dir: plan-results\n",
        )
        .expect("plan");
        path
    }

    #[test]
    fn flags_alone_build_a_plan() {
        let args = SelectionArgs {
            algorithms: vec![Algorithm::Hqq, Algorithm::Gptq],
            configs: vec!["b4g64".into()],
            task: Some(TaskType::Quant),
            ..SelectionArgs::default()
        };
        let plan = args.build_plan(&ConfigCatalog::builtin()).expect("plan");
        assert_eq!(plan.models, ["0", "1", "2"]);
        assert_eq!(plan.experiment_name(), "quant-hqq-gptq-b4g64");
        let spec = plan.resolve(&ConfigCatalog::builtin()).expect("spec");
        assert_eq!(spec.task_count(), 6);
    }

    #[test]
    fn missing_task_without_plan_is_rejected() {
        let args = SelectionArgs {
            algorithms: vec![Algorithm::Hqq],
            ..SelectionArgs::default()
        };
        assert!(args.build_plan(&ConfigCatalog::builtin()).is_err());
    }

    #[test]
    fn flags_take_precedence_over_plan() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = SelectionArgs {
            plan: Some(write_plan(dir.path())),
            threads: Some(2),
            keep_going: true,
            ..SelectionArgs::default()
        };
        let plan = args.build_plan(&ConfigCatalog::builtin()).expect("plan");
        let config = plan.orchestrator_config();
        assert_eq!(config.experiment_name, "nightly");
        assert_eq!(config.thread_limit, 2);
        assert_eq!(config.result_dir, PathBuf::from("plan-results"));
        assert_eq!(config.failure_policy, FailurePolicy::Continue);
        assert_eq!(plan.models, ["1"]);
    }

    #[test]
    fn config_flag_reselects_plan_algorithms() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = SelectionArgs {
            plan: Some(write_plan(dir.path())),
            configs: vec!["b2g32".into()],
            ..SelectionArgs::default()
        };
        let plan = args.build_plan(&ConfigCatalog::builtin()).expect("plan");
        assert_eq!(
            plan.tasks[&Algorithm::Hqq].configs,
            Some(vec!["b2g32".to_string()])
        );
        assert_eq!(plan.tasks[&Algorithm::Hqq].task_type, TaskType::EvalPpl);
    }

    #[test]
    fn status_needs_a_name_without_grid() {
        assert!(SelectionArgs::default().orchestrator_config().is_err());
        let args = SelectionArgs {
            experiment_name: Some("eval_ppl-hqq".into()),
            result_dir: Some(PathBuf::from("out")),
            ..SelectionArgs::default()
        };
        let config = args.orchestrator_config().expect("config");
        assert_eq!(config.layout().ledger_path(), PathBuf::from("out/eval_ppl-hqq/progress.csv"));
    }
}
