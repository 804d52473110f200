use lmq_core::errors::{ErrorInfo, LmqError};
use lmq_core::TaskKey;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::{aggregate, partial_metric_files, ExperimentReport};
use crate::collab::Collaborators;
use crate::config::OrchestratorConfig;
use crate::diff::diff;
use crate::executor::{RunSummary, TaskExecutor};
use crate::fsutil::ensure_dir;
use crate::grid::{expand_grid, ExperimentSpec};
use crate::ledger::{Ledger, LedgerCounts, LedgerLock};

/// Result of a run that reached aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentOutcome {
    /// Executor tallies.
    pub summary: RunSummary,
    /// Report written after the batch.
    pub report: ExperimentReport,
}

/// Expands the grid, skips completed work, executes the rest and aggregates the metrics.
///
/// The ledger is locked for the whole run. Under the continue policy, aborted tasks are
/// reported as an error after aggregation so the caller still sees a failure.
pub fn run_experiment(
    spec: &ExperimentSpec,
    config: &OrchestratorConfig,
    collaborators: &mut Collaborators,
) -> Result<ExperimentOutcome, LmqError> {
    config.validate()?;
    spec.validate()?;
    collaborators.ensure_covers(spec)?;
    let layout = config.layout();
    ensure_dir(layout.dir())?;
    let ledger_path = layout.ledger_path();
    let _lock = LedgerLock::acquire(&ledger_path)?;

    let mut ledger = Ledger::load(&ledger_path)?;
    let grid = expand_grid(spec);
    let registered = ledger.register_pending(&grid);
    if registered > 0 {
        ledger.flush(&ledger_path)?;
    }
    let pending = diff(&grid, &ledger);
    let skipped_complete = grid.len() - pending.len();
    info!(
        experiment = layout.experiment(),
        total = grid.len(),
        pending = pending.len(),
        skipped = skipped_complete,
        "experiment planned"
    );

    let mut summary = TaskExecutor::new(config, collaborators).execute(&pending, &mut ledger)?;
    summary.skipped_complete = skipped_complete;

    let grid_hash = spec.grid_hash()?;
    let report = aggregate(&layout, Some(&grid_hash))?;
    if !summary.aborted.is_empty() {
        warn!(aborted = summary.aborted.len(), "run finished with aborted tasks");
        return Err(aborted_error(&summary.aborted, &report));
    }
    info!(
        executed = summary.executed,
        skipped = summary.skipped_complete,
        "experiment finished"
    );
    Ok(ExperimentOutcome { summary, report })
}

fn aborted_error(aborted: &[TaskKey], report: &ExperimentReport) -> LmqError {
    let keys = aborted
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    LmqError::Collaborator(
        ErrorInfo::new("tasks-aborted", format!("{} task(s) aborted", aborted.len()))
            .with_context("tasks", keys)
            .with_context("report", report.path.display().to_string())
            .with_hint("rerun the same experiment to retry the aborted tasks"),
    )
}

/// Progress of an experiment as seen from its ledger and metric files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentStatus {
    /// Experiment name.
    pub experiment: String,
    /// Ledger tallies.
    pub counts: LedgerCounts,
    /// Per-task metric files present on disk.
    pub metric_files: usize,
    /// Grid tasks still to run in execution order; empty when no grid was supplied.
    pub remaining: Vec<TaskKey>,
    /// A run currently holds the ledger lock.
    pub locked: bool,
}

/// Reports progress without taking the ledger lock.
pub fn experiment_status(
    config: &OrchestratorConfig,
    spec: Option<&ExperimentSpec>,
) -> Result<ExperimentStatus, LmqError> {
    config.validate()?;
    let layout = config.layout();
    let ledger_path = layout.ledger_path();
    let mut ledger = Ledger::load(&ledger_path)?;
    let remaining = match spec {
        Some(spec) => {
            let grid = expand_grid(spec);
            ledger.register_pending(&grid);
            diff(&grid, &ledger)
                .into_iter()
                .map(|record| record.key)
                .collect()
        }
        None => Vec::new(),
    };
    let metric_files = if layout.dir().exists() {
        partial_metric_files(&layout)?.len()
    } else {
        0
    };
    Ok(ExperimentStatus {
        experiment: layout.experiment().to_string(),
        counts: ledger.counts(),
        metric_files,
        remaining,
        locked: LedgerLock::is_held(&ledger_path),
    })
}
