use std::path::{Path, PathBuf};

use lmq_core::errors::LmqError;
use lmq_core::TaskKey;
use serde::{Deserialize, Serialize};

/// What the executor does when a task aborts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Stop the batch at the first aborted task.
    #[default]
    Abort,
    /// Leave the aborted task pending and move on to the next one.
    Continue,
}

/// Explicit settings for one orchestration run.
///
/// Everything the surrounding tooling used to read from the process environment
/// (thread caps, cache locations) is carried here and handed to collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Experiment name, used as the result sub-directory.
    pub experiment_name: String,
    /// Root directory for ledgers, metric files and reports.
    #[serde(default = "OrchestratorConfig::default_result_dir")]
    pub result_dir: PathBuf,
    /// Directory where quantized snapshots are stored and looked up.
    #[serde(default = "OrchestratorConfig::default_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    /// Directory holding precomputed per-model metadata tables.
    #[serde(default = "OrchestratorConfig::default_metadata_dir")]
    pub metadata_dir: PathBuf,
    /// Record a full memory trace per task and dump it next to the metrics.
    #[serde(default)]
    pub track_memory: bool,
    /// Behaviour when a task aborts.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Upper bound on collaborator worker threads.
    #[serde(default = "OrchestratorConfig::default_thread_limit")]
    pub thread_limit: usize,
    /// Model hub cache directory handed to collaborators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl OrchestratorConfig {
    /// Configuration with defaults for everything but the experiment name.
    pub fn new(experiment_name: impl Into<String>) -> Self {
        Self {
            experiment_name: experiment_name.into(),
            result_dir: Self::default_result_dir(),
            snapshot_dir: Self::default_snapshot_dir(),
            metadata_dir: Self::default_metadata_dir(),
            track_memory: false,
            failure_policy: FailurePolicy::default(),
            thread_limit: Self::default_thread_limit(),
            cache_dir: None,
        }
    }

    fn default_result_dir() -> PathBuf {
        PathBuf::from("results")
    }

    fn default_snapshot_dir() -> PathBuf {
        PathBuf::from("snapshots")
    }

    fn default_metadata_dir() -> PathBuf {
        PathBuf::from("data")
    }

    fn default_thread_limit() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(8)
    }

    /// Rejects names that cannot be used as a directory component.
    pub fn validate(&self) -> Result<(), LmqError> {
        let name = self.experiment_name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(LmqError::Config(
                lmq_core::ErrorInfo::new("experiment-name", "invalid experiment name")
                    .with_context("experiment", self.experiment_name.clone()),
            ));
        }
        if self.thread_limit == 0 {
            return Err(LmqError::config("thread-limit", "thread limit must be positive"));
        }
        Ok(())
    }

    /// File layout for this experiment.
    pub fn layout(&self) -> ExperimentLayout {
        ExperimentLayout::new(&self.result_dir, &self.experiment_name)
    }
}

/// Paths of every artefact an experiment writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentLayout {
    experiment: String,
    dir: PathBuf,
}

impl ExperimentLayout {
    /// Layout rooted at `<result_dir>/<experiment>`.
    pub fn new(result_dir: &Path, experiment: &str) -> Self {
        Self {
            experiment: experiment.to_string(),
            dir: result_dir.join(experiment),
        }
    }

    /// Experiment name.
    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// Experiment directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Progress ledger path.
    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join("progress.csv")
    }

    /// Per-task metric file for `(algorithm, model, config)`.
    pub fn partial_metric_path(&self, key: &TaskKey) -> PathBuf {
        self.dir.join(format!(
            "partial-{}-{}-{}.csv",
            key.algorithm,
            key.short_model_id(),
            key.config_name
        ))
    }

    /// Glob pattern matching every per-task metric file.
    ///
    /// The directory part is escaped so it is matched literally.
    pub fn partial_metric_pattern(&self) -> String {
        let dir = glob::Pattern::escape(&self.dir.to_string_lossy());
        format!("{}/partial-*.csv", dir.trim_end_matches('/'))
    }

    /// Memory trace side channel for a task.
    pub fn trace_path(&self, key: &TaskKey) -> PathBuf {
        self.dir.join(format!(
            "mem-snapshot-{}-{}-{}.json",
            key.algorithm,
            key.short_model_id(),
            key.config_name
        ))
    }

    /// Combined report path for a timestamp string, without collision handling.
    pub fn report_path(&self, timestamp: &str) -> PathBuf {
        self.dir
            .join(format!("result-{}-{}.csv", self.experiment, timestamp))
    }
}

/// Default experiment name derived from the selection when none is given.
pub fn default_experiment_name(task: &str, algorithms: &[String], configs: &[String]) -> String {
    let mut name = format!("{}-{}", task, algorithms.join("-"));
    if !configs.is_empty() {
        name.push('-');
        name.push_str(&configs.join("-"));
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use lmq_core::{Algorithm, TaskType};

    #[test]
    fn layout_names_files_from_key_fields() {
        let layout = ExperimentLayout::new(Path::new("/tmp/results"), "eval_ppl-hqq");
        let key = TaskKey::new(
            "meta-llama/Llama-2-7b-hf",
            "b4g64",
            Algorithm::Hqq,
            TaskType::EvalPpl,
        );
        assert_eq!(
            layout.partial_metric_path(&key),
            PathBuf::from("/tmp/results/eval_ppl-hqq/partial-hqq-Llama-2-7b-hf-b4g64.csv")
        );
        assert_eq!(
            layout.ledger_path(),
            PathBuf::from("/tmp/results/eval_ppl-hqq/progress.csv")
        );
        assert_eq!(
            layout.report_path("20240501120000"),
            PathBuf::from("/tmp/results/eval_ppl-hqq/result-eval_ppl-hqq-20240501120000.csv")
        );
    }

    #[test]
    fn experiment_names_are_validated() {
        assert!(OrchestratorConfig::new("quant_hqq").validate().is_ok());
        assert!(OrchestratorConfig::new("a/b").validate().is_err());
        assert!(OrchestratorConfig::new("  ").validate().is_err());
    }

    #[test]
    fn default_name_joins_selection() {
        let name = default_experiment_name(
            "eval_ppl",
            &["hqq".into(), "gptq".into()],
            &["b4g64".into()],
        );
        assert_eq!(name, "eval_ppl-hqq-gptq-b4g64");
    }

    #[test]
    fn yaml_defaults_fill_missing_fields() {
        let config: OrchestratorConfig =
            serde_yaml::from_str("experiment_name: quant_awq\ntrack_memory: true\n")
                .expect("yaml");
        assert_eq!(config.result_dir, PathBuf::from("results"));
        assert_eq!(config.failure_policy, FailurePolicy::Abort);
        assert!(config.track_memory);
        assert!(config.thread_limit >= 1);
    }
}
