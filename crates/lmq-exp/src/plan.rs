use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use lmq_core::errors::LmqError;
use lmq_core::{Algorithm, TaskType};
use serde::{Deserialize, Serialize};

use crate::catalog::{resolve_models, ConfigCatalog, ModelFamily};
use crate::config::{default_experiment_name, FailurePolicy, OrchestratorConfig};
use crate::fsutil::{atomic_write, io_error};
use crate::grid::{AlgorithmTasks, ExperimentSpec};
use crate::serde::{from_yaml_slice, to_yaml_string};

/// Task type and configuration names requested for one algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTasks {
    /// Task applied to every configuration.
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Catalog names to run; absent selects the whole catalog for the algorithm.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configs: Option<Vec<String>>,
}

/// Orchestrator settings a plan may pin. Unset fields keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OrchestratorOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_memory: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl OrchestratorOverrides {
    /// Writes every set field into `config`.
    pub fn apply(&self, config: &mut OrchestratorConfig) {
        if let Some(dir) = &self.result_dir {
            config.result_dir = dir.clone();
        }
        if let Some(dir) = &self.snapshot_dir {
            config.snapshot_dir = dir.clone();
        }
        if let Some(dir) = &self.metadata_dir {
            config.metadata_dir = dir.clone();
        }
        if let Some(track) = self.track_memory {
            config.track_memory = track;
        }
        if let Some(policy) = self.failure_policy {
            config.failure_policy = policy;
        }
        if let Some(limit) = self.thread_limit {
            config.thread_limit = limit;
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
    }

    /// Fields set here take precedence over `lower`.
    pub fn layered_over(&self, lower: &OrchestratorOverrides) -> OrchestratorOverrides {
        OrchestratorOverrides {
            result_dir: self.result_dir.clone().or_else(|| lower.result_dir.clone()),
            snapshot_dir: self.snapshot_dir.clone().or_else(|| lower.snapshot_dir.clone()),
            metadata_dir: self.metadata_dir.clone().or_else(|| lower.metadata_dir.clone()),
            track_memory: self.track_memory.or(lower.track_memory),
            failure_policy: self.failure_policy.or(lower.failure_policy),
            thread_limit: self.thread_limit.or(lower.thread_limit),
            cache_dir: self.cache_dir.clone().or_else(|| lower.cache_dir.clone()),
        }
    }
}

/// YAML description of an experiment.
///
/// ```yaml
/// experiment_name: eval_ppl-hqq
/// family: llm
/// models: ["0", "meta-llama/Meta-Llama-3-8B"]
/// tasks:
///   hqq: { type: eval_ppl, configs: [b4g64, b3g64] }
///   fp16: { type: eval_ppl }
/// orchestrator:
///   result_dir: results
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentPlan {
    /// Result sub-directory; derived from the selection when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_name: Option<String>,
    /// Catalog that model indices refer to.
    #[serde(default)]
    pub family: ModelFamily,
    /// Model indices or full ids.
    pub models: Vec<String>,
    /// Work per algorithm.
    pub tasks: BTreeMap<Algorithm, PlanTasks>,
    /// Orchestrator settings pinned by the plan.
    #[serde(default)]
    pub orchestrator: OrchestratorOverrides,
}

impl ExperimentPlan {
    /// Plan for one task type applied to several algorithms sharing a config selection.
    ///
    /// Each algorithm keeps the names its catalog knows; names unknown everywhere fail.
    pub fn from_selection(
        catalog: &ConfigCatalog,
        family: ModelFamily,
        models: Vec<String>,
        algorithms: &[Algorithm],
        task_type: TaskType,
        configs: Option<&[String]>,
    ) -> Result<Self, LmqError> {
        let resolved = catalog.resolve_many(algorithms, configs)?;
        let tasks = resolved
            .into_iter()
            .map(|(algorithm, named)| {
                let configs = configs
                    .filter(|_| algorithm != Algorithm::Fp16)
                    .map(|_| named.into_iter().map(|config| config.name).collect());
                (algorithm, PlanTasks { task_type, configs })
            })
            .collect();
        Ok(Self {
            experiment_name: None,
            family,
            models,
            tasks,
            orchestrator: OrchestratorOverrides::default(),
        })
    }

    /// Resolves model selectors and configuration names into an experiment specification.
    pub fn resolve(&self, catalog: &ConfigCatalog) -> Result<ExperimentSpec, LmqError> {
        let models = resolve_models(self.family, &self.models)?;
        let mut tasks = BTreeMap::new();
        for (algorithm, plan) in &self.tasks {
            let configs = catalog.resolve(*algorithm, plan.configs.as_deref())?;
            tasks.insert(
                *algorithm,
                AlgorithmTasks {
                    task_type: plan.task_type,
                    configs,
                },
            );
        }
        let spec = ExperimentSpec { models, tasks };
        spec.validate()?;
        Ok(spec)
    }

    /// Experiment name used when none of length three or more is given.
    pub fn derived_name(&self) -> String {
        let task_types: BTreeSet<&str> = self
            .tasks
            .values()
            .map(|plan| plan.task_type.as_str())
            .collect();
        let algorithms: Vec<String> = self
            .tasks
            .keys()
            .map(|algorithm| algorithm.as_str().to_string())
            .collect();
        let configs: BTreeSet<String> = self
            .tasks
            .values()
            .filter_map(|plan| plan.configs.as_ref())
            .flatten()
            .cloned()
            .collect();
        default_experiment_name(
            &task_types.into_iter().collect::<Vec<_>>().join("-"),
            &algorithms,
            &configs.into_iter().collect::<Vec<_>>(),
        )
    }

    /// The plan's experiment name, falling back to [`ExperimentPlan::derived_name`].
    pub fn experiment_name(&self) -> String {
        match &self.experiment_name {
            Some(name) if name.trim().len() >= 3 => name.trim().to_string(),
            _ => self.derived_name(),
        }
    }

    /// Orchestrator configuration with the plan's overrides applied.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::new(self.experiment_name());
        self.orchestrator.apply(&mut config);
        config
    }
}

/// Loads an experiment plan from YAML.
pub fn load_plan<P: AsRef<Path>>(path: P) -> Result<ExperimentPlan, LmqError> {
    let plan_path = path.as_ref();
    let bytes = fs::read(plan_path).map_err(|err| io_error("plan_read", plan_path, err))?;
    from_yaml_slice(&bytes)
}

/// Writes an experiment plan as YAML.
pub fn save_plan<P: AsRef<Path>>(path: P, plan: &ExperimentPlan) -> Result<(), LmqError> {
    let yaml = to_yaml_string(plan)?;
    atomic_write(path.as_ref(), yaml.as_bytes())
}
