use std::collections::{BTreeMap, BTreeSet};

use lmq_core::errors::{ErrorInfo, LmqError};
use lmq_core::{short_model_id, Algorithm, NamedConfig, TaskKey, TaskRecord, TaskType};
use serde::{Deserialize, Serialize};

use crate::hash::stable_hash_string;

/// Work requested for one algorithm: a task type and its named configurations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmTasks {
    /// Task type applied to every configuration of the algorithm.
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Configurations to run, unique by name.
    pub configs: Vec<NamedConfig>,
}

/// Models crossed with per-algorithm configuration lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    /// Full model identifiers.
    pub models: Vec<String>,
    /// Algorithm to task mapping.
    pub tasks: BTreeMap<Algorithm, AlgorithmTasks>,
}

impl ExperimentSpec {
    /// Rejects specifications whose expansion could not yield unique task keys.
    pub fn validate(&self) -> Result<(), LmqError> {
        if self.models.is_empty() {
            return Err(LmqError::config("empty-models", "experiment selects no models"));
        }
        if self.tasks.is_empty() {
            return Err(LmqError::config(
                "empty-tasks",
                "experiment selects no algorithms",
            ));
        }
        let mut models = BTreeSet::new();
        let mut short_ids = BTreeMap::new();
        for model in &self.models {
            if !models.insert(model.as_str()) {
                return Err(LmqError::Config(
                    ErrorInfo::new("duplicate-model", "model listed twice")
                        .with_context("model", model.clone()),
                ));
            }
            // Metric files are named by the short id.
            if let Some(other) = short_ids.insert(short_model_id(model), model) {
                return Err(LmqError::Config(
                    ErrorInfo::new(
                        "duplicate-short-model",
                        "two models share a short id and would overwrite each other's metrics",
                    )
                    .with_context("model", model.clone())
                    .with_context("other", other.clone())
                    .with_context("short_id", short_model_id(model)),
                ));
            }
        }
        for (algorithm, tasks) in &self.tasks {
            if tasks.configs.is_empty() {
                return Err(LmqError::Config(
                    ErrorInfo::new("no-configs", "no configuration selected for algorithm")
                        .with_context("algorithm", algorithm.as_str()),
                ));
            }
            let mut names = BTreeSet::new();
            for config in &tasks.configs {
                if !names.insert(config.name.as_str()) {
                    return Err(LmqError::Config(
                        ErrorInfo::new("duplicate-config", "config name listed twice")
                            .with_context("algorithm", algorithm.as_str())
                            .with_context("config", config.name.clone()),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Stable hash over the canonical JSON form of the specification.
    pub fn grid_hash(&self) -> Result<String, LmqError> {
        stable_hash_string(self)
    }

    /// Number of task records the specification expands to.
    pub fn task_count(&self) -> usize {
        self.tasks
            .values()
            .map(|tasks| tasks.configs.len() * self.models.len())
            .sum()
    }
}

/// Expands the specification into one task record per `(algorithm, config, model)`.
///
/// No ordering is promised; the diff engine imposes the execution order.
pub fn expand_grid(spec: &ExperimentSpec) -> Vec<TaskRecord> {
    let mut records = Vec::with_capacity(spec.task_count());
    for (algorithm, tasks) in &spec.tasks {
        for config in &tasks.configs {
            for model in &spec.models {
                records.push(TaskRecord {
                    key: TaskKey::new(model.clone(), config.name.clone(), *algorithm, tasks.task_type),
                    config: config.payload.clone(),
                });
            }
        }
    }
    records
}
