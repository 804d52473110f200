use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, LmqError};
use crate::payload::QuantConfig;

/// Quantization algorithm families known to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Unquantized half precision baseline.
    Fp16,
    /// Half-quadratic quantization with a uniform bit width.
    Hqq,
    /// Mixed-precision HQQ driven by a bit budget.
    Mxq,
    /// GPTQ post-training quantization.
    Gptq,
    /// Activation-aware weight quantization.
    Awq,
}

impl Algorithm {
    /// All algorithms in declaration order.
    pub const ALL: [Algorithm; 5] = [
        Algorithm::Fp16,
        Algorithm::Hqq,
        Algorithm::Mxq,
        Algorithm::Gptq,
        Algorithm::Awq,
    ];

    /// Stable lowercase name used in file names and ledger rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Fp16 => "fp16",
            Algorithm::Hqq => "hqq",
            Algorithm::Mxq => "mxq",
            Algorithm::Gptq => "gptq",
            Algorithm::Awq => "awq",
        }
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = LmqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .iter()
            .copied()
            .find(|algo| algo.as_str() == s.trim())
            .ok_or_else(|| {
                LmqError::Config(
                    ErrorInfo::new("unknown-algorithm", "unknown algorithm")
                        .with_context("algorithm", s)
                        .with_hint("expected one of fp16, hqq, mxq, gptq, awq"),
                )
            })
    }
}

/// Kind of work performed for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Quantize and persist a snapshot.
    Quant,
    /// Perplexity evaluation on the quantized model.
    EvalPpl,
    /// Open LLM leaderboard benchmarks.
    EvalLeaderboard,
    /// Storage footprint of the quantized snapshot.
    EvalModelStorage,
    /// Zero-shot image classification for vision towers.
    EvalZeroshotCls,
    /// Linear-probe classification for vision towers.
    EvalLinearProbe,
}

impl TaskType {
    /// All task types in declaration order.
    pub const ALL: [TaskType; 6] = [
        TaskType::Quant,
        TaskType::EvalPpl,
        TaskType::EvalLeaderboard,
        TaskType::EvalModelStorage,
        TaskType::EvalZeroshotCls,
        TaskType::EvalLinearProbe,
    ];

    /// Stable snake_case name used in ledger rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Quant => "quant",
            TaskType::EvalPpl => "eval_ppl",
            TaskType::EvalLeaderboard => "eval_leaderboard",
            TaskType::EvalModelStorage => "eval_model_storage",
            TaskType::EvalZeroshotCls => "eval_zeroshot_cls",
            TaskType::EvalLinearProbe => "eval_linear_probe",
        }
    }

    /// Detached evaluations load the model inside the evaluator, so the executor skips
    /// the create and quantize collaborators.
    pub fn is_detached(&self) -> bool {
        matches!(
            self,
            TaskType::EvalLeaderboard | TaskType::EvalZeroshotCls | TaskType::EvalLinearProbe
        )
    }

    /// Whether the evaluator collaborator runs against an in-process model handle.
    pub fn evaluates_attached(&self) -> bool {
        matches!(self, TaskType::EvalPpl)
    }
}

impl Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = LmqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .iter()
            .copied()
            .find(|task| task.as_str() == s.trim())
            .ok_or_else(|| {
                LmqError::Config(
                    ErrorInfo::new("unknown-task-type", "unknown task type")
                        .with_context("task_type", s),
                )
            })
    }
}

/// Composite identity of a unit of work.
///
/// The derived ordering compares `model_id`, then `config_name`, then algorithm and
/// task type, which is the order the scheduler relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    /// Full model identifier, e.g. `meta-llama/Llama-2-7b-hf`.
    pub model_id: String,
    /// Name of the configuration within its algorithm.
    pub config_name: String,
    /// Algorithm family.
    pub algorithm: Algorithm,
    /// Work performed for the task.
    pub task_type: TaskType,
}

impl TaskKey {
    /// Creates a new key.
    pub fn new(
        model_id: impl Into<String>,
        config_name: impl Into<String>,
        algorithm: Algorithm,
        task_type: TaskType,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            config_name: config_name.into(),
            algorithm,
            task_type,
        }
    }

    /// Model id with any organisation prefix stripped.
    pub fn short_model_id(&self) -> &str {
        short_model_id(&self.model_id)
    }
}

impl Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}:{}",
            self.algorithm, self.config_name, self.model_id, self.task_type
        )
    }
}

/// Returns the portion of a model id after the last `/`.
pub fn short_model_id(model_id: &str) -> &str {
    model_id.rsplit('/').next().unwrap_or(model_id)
}

/// A task key together with its resolved configuration payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Identity of the task.
    pub key: TaskKey,
    /// Algorithm specific payload handed through to collaborators.
    pub config: QuantConfig,
}
