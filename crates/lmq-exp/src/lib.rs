//! Resumable orchestration of quantization experiments.
//!
//! An experiment crosses models with per-algorithm configuration lists. Each run
//! expands that grid, drops the tasks the progress ledger already marks complete,
//! executes the rest in a fixed order against pluggable collaborators, and unions the
//! per-task metric files into a timestamped report.

mod aggregate;
mod catalog;
mod collab;
mod config;
mod diff;
mod executor;
mod fsutil;
mod grid;
mod hash;
mod ledger;
mod metrics;
mod orchestrate;
mod plan;
mod process;
mod serde;
mod synthetic;

pub use aggregate::{
    aggregate, partial_metric_files, read_manifest, ExperimentReport, REPORT_SCHEMA,
    REPORT_TIMESTAMP_FORMAT,
};
pub use catalog::{resolve_models, ConfigCatalog, ModelFamily, LLM_MODELS, VIT_MODELS};
pub use collab::{
    Collaborators, CreateRequest, Created, EvalContext, Evaluator, ModelAdapter, ModelHandle,
    QuantizeRequest, Quantized, ResourceMonitor, RuntimeLimits, TokenizerHandle,
};
pub use config::{default_experiment_name, ExperimentLayout, FailurePolicy, OrchestratorConfig};
pub use diff::{diff, execution_order};
pub use executor::{RunSummary, TaskExecutor, TaskState};
pub use grid::{expand_grid, AlgorithmTasks, ExperimentSpec};
pub use hash::stable_hash_string;
pub use ledger::{
    Ledger, LedgerCounts, LedgerEntry, LedgerLock, LedgerStatus, LEDGER_COLUMNS, TIMESTAMP_FORMAT,
};
pub use metrics::{
    read_partial, union_columns, write_partial, MemorySample, MemoryStage, MetricRecord,
    TEXT_COLUMNS,
};
pub use orchestrate::{experiment_status, run_experiment, ExperimentOutcome, ExperimentStatus};
pub use plan::{load_plan, save_plan, ExperimentPlan, OrchestratorOverrides, PlanTasks};
pub use process::{
    process_collaborators, ProcessAdapter, ProcessEvaluator, ProcessMonitor, ProcessProgram,
};
pub use synthetic::{
    synthetic_collaborators, SyntheticAdapter, SyntheticEvaluator, SyntheticMonitor,
};

pub use serde::{from_json_slice, to_canonical_json_bytes};
