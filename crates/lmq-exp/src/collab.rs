//! Interfaces of the external systems a task delegates to.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lmq_core::errors::{ErrorInfo, LmqError};
use lmq_core::{Algorithm, QuantConfig, TaskKey};
use serde::{Deserialize, Serialize};

use crate::config::OrchestratorConfig;
use crate::grid::ExperimentSpec;
use crate::metrics::{MemorySample, MetricRecord};

/// Reference to a loaded model owned by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelHandle {
    /// Full model id.
    pub model_id: String,
    /// Where the collaborator keeps the weights.
    pub location: PathBuf,
    /// Whether the weights are quantized.
    pub quantized: bool,
}

/// Reference to the tokenizer or preprocessor paired with a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizerHandle {
    /// Full model id the tokenizer belongs to.
    pub model_id: String,
}

/// Runtime limits passed to collaborators in place of process-wide environment settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeLimits {
    /// Worker thread cap.
    pub thread_limit: usize,
    /// Model hub cache directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
}

impl RuntimeLimits {
    /// Limits taken from the orchestrator configuration.
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            thread_limit: config.thread_limit,
            cache_dir: config.cache_dir.clone(),
        }
    }
}

/// Arguments of [`ModelAdapter::create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    /// Task being executed.
    pub key: TaskKey,
    /// Payload for the task, with any injected metadata paths.
    pub config: QuantConfig,
    /// Snapshot directory to look up or store quantized weights.
    pub snapshot_dir: PathBuf,
    /// Whether the caller wants a quantized model.
    pub need_quantized: bool,
    /// Runtime limits.
    pub limits: RuntimeLimits,
}

/// Result of [`ModelAdapter::create`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Created {
    /// Loaded model.
    pub model: ModelHandle,
    /// Paired tokenizer.
    pub tokenizer: TokenizerHandle,
    /// The snapshot already held quantized weights.
    pub already_quantized: bool,
    /// On-disk size of the loaded weights in GiB.
    #[serde(default)]
    pub artifact_size: f64,
}

/// Arguments of [`ModelAdapter::quantize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizeRequest {
    /// Task being executed.
    pub key: TaskKey,
    /// Payload for the task, with any injected metadata paths.
    pub config: QuantConfig,
    /// Directory the quantized snapshot is written to.
    pub snapshot_dir: PathBuf,
    /// Runtime limits.
    pub limits: RuntimeLimits,
}

/// Result of [`ModelAdapter::quantize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantized {
    /// Quantized model.
    pub model: ModelHandle,
    /// Wall time spent quantizing.
    pub duration_seconds: f64,
    /// Size of the quantized snapshot in GiB.
    pub artifact_size: f64,
}

/// Everything an evaluator needs to know about the task it scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalContext {
    /// Task being executed.
    pub key: TaskKey,
    /// Payload for the task.
    pub config: QuantConfig,
    /// Snapshot directory holding quantized weights.
    pub snapshot_dir: PathBuf,
    /// Experiment directory for evaluator side outputs.
    pub result_dir: PathBuf,
    /// Runtime limits.
    pub limits: RuntimeLimits,
}

/// Creates and quantizes models for one algorithm.
pub trait ModelAdapter {
    /// Whether models of this algorithm go through a quantize step.
    fn has_quantize_step(&self) -> bool;

    /// Loads a model, reusing a stored quantized snapshot when one exists.
    fn create(&mut self, request: &CreateRequest) -> Result<Created, LmqError>;

    /// Quantizes a freshly created model and persists the snapshot.
    fn quantize(
        &mut self,
        model: ModelHandle,
        tokenizer: &TokenizerHandle,
        request: &QuantizeRequest,
    ) -> Result<Quantized, LmqError>;
}

/// Fills evaluation measurements into a metric record.
pub trait Evaluator {
    /// Scores a model already loaded by a [`ModelAdapter`].
    fn evaluate(
        &mut self,
        ctx: &EvalContext,
        model: &ModelHandle,
        tokenizer: &TokenizerHandle,
        record: MetricRecord,
    ) -> Result<MetricRecord, LmqError>;

    /// Scores a task whose evaluator loads the model on its own.
    fn evaluate_detached(
        &mut self,
        ctx: &EvalContext,
        record: MetricRecord,
    ) -> Result<MetricRecord, LmqError>;
}

/// Accelerator memory instrumentation.
pub trait ResourceMonitor {
    /// Clears peak counters before a task.
    fn reset_peak(&mut self) -> Result<(), LmqError>;

    /// Reads peak usage since the last reset.
    fn sample(&mut self) -> Result<MemorySample, LmqError>;

    /// Begins recording a detailed allocation trace.
    fn start_trace(&mut self) -> Result<(), LmqError>;

    /// Writes the recorded trace to `path` and stops recording.
    fn dump_trace(&mut self, path: &Path) -> Result<(), LmqError>;

    /// Frees model memory and caches held for the finished task.
    fn release(&mut self) -> Result<(), LmqError>;
}

/// The collaborator set a run executes against.
pub struct Collaborators {
    pub(crate) adapters: BTreeMap<Algorithm, Box<dyn ModelAdapter>>,
    pub(crate) evaluator: Box<dyn Evaluator>,
    pub(crate) monitor: Box<dyn ResourceMonitor>,
}

impl Collaborators {
    /// Collaborator set without any model adapter.
    pub fn new(evaluator: Box<dyn Evaluator>, monitor: Box<dyn ResourceMonitor>) -> Self {
        Self {
            adapters: BTreeMap::new(),
            evaluator,
            monitor,
        }
    }

    /// Registers the adapter used for `algorithm`, replacing any previous one.
    pub fn with_adapter(mut self, algorithm: Algorithm, adapter: Box<dyn ModelAdapter>) -> Self {
        self.adapters.insert(algorithm, adapter);
        self
    }

    /// Algorithms with a registered adapter.
    pub fn algorithms(&self) -> impl Iterator<Item = Algorithm> + '_ {
        self.adapters.keys().copied()
    }

    /// Fails unless every algorithm that loads a model in `spec` has an adapter.
    ///
    /// Detached task types never call an adapter and are not checked.
    pub fn ensure_covers(&self, spec: &ExperimentSpec) -> Result<(), LmqError> {
        spec.tasks
            .iter()
            .filter(|(_, tasks)| !tasks.task_type.is_detached())
            .find(|(algorithm, _)| !self.adapters.contains_key(*algorithm))
            .map_or(Ok(()), |(algorithm, _)| Err(Self::missing_adapter(*algorithm)))
    }

    pub(crate) fn missing_adapter(algorithm: Algorithm) -> LmqError {
        LmqError::Config(
            ErrorInfo::new("no-adapter", "no model adapter registered for algorithm")
                .with_context("algorithm", algorithm.as_str()),
        )
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("adapters", &self.adapters.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
