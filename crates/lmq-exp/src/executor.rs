use std::path::PathBuf;

use chrono::Utc;
use lmq_core::errors::{ErrorInfo, LmqError};
use lmq_core::{QuantConfig, TaskKey, TaskRecord};
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn};

use crate::collab::{Collaborators, CreateRequest, EvalContext, QuantizeRequest, RuntimeLimits};
use crate::config::{ExperimentLayout, FailurePolicy, OrchestratorConfig};
use crate::ledger::Ledger;
use crate::metrics::{write_partial, MemoryStage, MetricRecord};

/// Lifecycle of a task within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Not started.
    Pending,
    /// Collaborators are working on it.
    Running,
    /// Metrics written and ledger flushed.
    Complete,
    /// A collaborator failed; the ledger entry stays pending.
    Aborted,
}

/// Outcome of an executor batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Tasks completed in this run.
    pub executed: usize,
    /// Tasks aborted under [`FailurePolicy::Continue`], in execution order.
    pub aborted: Vec<TaskKey>,
    /// Grid tasks the ledger already marked complete.
    pub skipped_complete: usize,
}

/// Runs pending tasks one at a time against a collaborator set.
pub struct TaskExecutor<'a> {
    config: &'a OrchestratorConfig,
    layout: ExperimentLayout,
    collaborators: &'a mut Collaborators,
}

impl<'a> TaskExecutor<'a> {
    /// Executor writing under the layout of `config`.
    pub fn new(config: &'a OrchestratorConfig, collaborators: &'a mut Collaborators) -> Self {
        Self {
            config,
            layout: config.layout(),
            collaborators,
        }
    }

    /// Executes `tasks` in order, recording each completion in `ledger` and flushing it.
    ///
    /// Under [`FailurePolicy::Abort`] the first aborted task ends the batch with its error.
    /// Metric-file and ledger write failures always end the batch.
    pub fn execute(
        &mut self,
        tasks: &[TaskRecord],
        ledger: &mut Ledger,
    ) -> Result<RunSummary, LmqError> {
        let ledger_path = self.layout.ledger_path();
        let mut summary = RunSummary::default();
        for (index, record) in tasks.iter().enumerate() {
            let span = info_span!("task", key = %record.key);
            let _entered = span.enter();
            info!(
                position = index + 1,
                total = tasks.len(),
                state = ?TaskState::Running,
                "task started"
            );
            match self.run_task(record) {
                Ok(metrics) => {
                    write_partial(&self.layout.partial_metric_path(&record.key), &metrics)?;
                    ledger.mark_complete(&record.key, Utc::now());
                    ledger.flush(&ledger_path)?;
                    summary.executed += 1;
                    info!(state = ?TaskState::Complete, "task finished");
                }
                Err(err) => {
                    error!(state = ?TaskState::Aborted, error = %err, "task aborted");
                    match self.config.failure_policy {
                        FailurePolicy::Abort => {
                            return Err(annotate_abort(err, &record.key, summary.executed))
                        }
                        FailurePolicy::Continue => summary.aborted.push(record.key.clone()),
                    }
                }
            }
        }
        Ok(summary)
    }

    /// Runs one task end to end, returning its metrics. Resources are released whatever
    /// the outcome; a failed release fails a task that otherwise succeeded.
    fn run_task(&mut self, record: &TaskRecord) -> Result<MetricRecord, LmqError> {
        let payload = self.resolve_payload(record)?;
        let tracing_memory = self.config.track_memory;
        let result = self.collaborators.monitor.reset_peak().and_then(|()| {
            if tracing_memory {
                self.collaborators.monitor.start_trace()?;
            }
            self.perform(record, payload)
        });
        if tracing_memory {
            let trace = self.layout.trace_path(&record.key);
            if let Err(err) = self.collaborators.monitor.dump_trace(&trace) {
                warn!(path = %trace.display(), error = %err, "memory trace not written");
            }
        }
        let released = self.collaborators.monitor.release();
        match (result, released) {
            (Ok(metrics), Ok(())) => Ok(metrics),
            (Ok(_), Err(err)) => Err(release_error(err)),
            (Err(err), released) => {
                if let Err(release) = released {
                    warn!(error = %release, "releasing task resources failed");
                }
                Err(err)
            }
        }
    }

    /// Clones the payload for this task, attaching precomputed metadata it depends on.
    fn resolve_payload(&self, record: &TaskRecord) -> Result<QuantConfig, LmqError> {
        if !record.config.requires_metadata() {
            return Ok(record.config.clone());
        }
        let path = self.metadata_path(&record.key);
        if !path.is_file() {
            return Err(LmqError::MissingArtifact(
                ErrorInfo::new("metadata-missing", "precomputed model metadata not found")
                    .with_context("path", path.display().to_string())
                    .with_context("model", record.key.model_id.clone())
                    .with_hint("compute the per-layer metric table before running mxq"),
            ));
        }
        Ok(record.config.with_metadata_file(&path))
    }

    fn metadata_path(&self, key: &TaskKey) -> PathBuf {
        self.config
            .metadata_dir
            .join(format!("fnorm-{}.csv", key.short_model_id()))
    }

    fn perform(&mut self, record: &TaskRecord, payload: QuantConfig) -> Result<MetricRecord, LmqError> {
        let key = &record.key;
        let mut metrics = MetricRecord::new(key, &record.config)?;
        let limits = RuntimeLimits::from_config(self.config);
        let ctx = EvalContext {
            key: key.clone(),
            config: payload.clone(),
            snapshot_dir: self.config.snapshot_dir.clone(),
            result_dir: self.layout.dir().to_path_buf(),
            limits: limits.clone(),
        };
        let eval_stage = MemoryStage::for_task(key.task_type);

        if key.task_type.is_detached() {
            metrics = self.collaborators.evaluator.evaluate_detached(&ctx, metrics)?;
            if let Some(stage) = eval_stage {
                metrics.record_memory(stage, self.collaborators.monitor.sample()?);
            }
            return Ok(metrics);
        }

        let adapter = self
            .collaborators
            .adapters
            .get_mut(&key.algorithm)
            .ok_or_else(|| Collaborators::missing_adapter(key.algorithm))?;
        let need_quantized = adapter.has_quantize_step();
        let created = adapter.create(&CreateRequest {
            key: key.clone(),
            config: payload.clone(),
            snapshot_dir: self.config.snapshot_dir.clone(),
            need_quantized,
            limits: limits.clone(),
        })?;
        metrics.artifact_size = created.artifact_size;
        metrics.record_memory(MemoryStage::Load, self.collaborators.monitor.sample()?);

        let tokenizer = created.tokenizer;
        let model = if need_quantized && !created.already_quantized {
            let adapter = self
                .collaborators
                .adapters
                .get_mut(&key.algorithm)
                .ok_or_else(|| Collaborators::missing_adapter(key.algorithm))?;
            let quantized = adapter.quantize(
                created.model,
                &tokenizer,
                &QuantizeRequest {
                    key: key.clone(),
                    config: payload,
                    snapshot_dir: self.config.snapshot_dir.clone(),
                    limits,
                },
            )?;
            metrics.quant_duration = quantized.duration_seconds;
            metrics.artifact_size = quantized.artifact_size;
            quantized.model
        } else {
            created.model
        };

        if key.task_type.evaluates_attached() {
            metrics = self
                .collaborators
                .evaluator
                .evaluate(&ctx, &model, &tokenizer, metrics)?;
            if let Some(stage) = eval_stage {
                metrics.record_memory(stage, self.collaborators.monitor.sample()?);
            }
        }
        Ok(metrics)
    }
}

/// Error for a release that failed after an otherwise successful task.
fn release_error(err: LmqError) -> LmqError {
    let mut info = err.info().clone();
    info.context.insert("cause".to_string(), info.code.clone());
    info.code = "release-failed".to_string();
    LmqError::Collaborator(info.with_hint("the device may still hold the previous model"))
}

fn annotate_abort(err: LmqError, key: &TaskKey, executed: usize) -> LmqError {
    let mut info = err.info().clone();
    info.context.insert("task".to_string(), key.to_string());
    info.context
        .insert("completed_this_run".to_string(), executed.to_string());
    match err {
        LmqError::Config(_) => LmqError::Config(info),
        LmqError::MissingArtifact(_) => LmqError::MissingArtifact(info),
        LmqError::Collaborator(_) => LmqError::Collaborator(info),
        LmqError::Ledger(_) => LmqError::Ledger(info),
        LmqError::Serde(_) => LmqError::Serde(info),
    }
}
