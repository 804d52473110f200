use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs;
use std::rc::Rc;

use lmq_core::{Algorithm, LmqError, TaskType};
use lmq_exp::{
    run_experiment, synthetic_collaborators, AlgorithmTasks, Collaborators, ConfigCatalog,
    CreateRequest, Created, ExperimentSpec, FailurePolicy, Ledger, ModelAdapter, ModelHandle,
    OrchestratorConfig, QuantizeRequest, Quantized, SyntheticAdapter, SyntheticEvaluator,
    SyntheticMonitor, TokenizerHandle,
};

/// Adapter that fails once `budget` creates have been served.
struct CrashingAdapter {
    inner: SyntheticAdapter,
    budget: Rc<Cell<usize>>,
}

impl ModelAdapter for CrashingAdapter {
    fn has_quantize_step(&self) -> bool {
        self.inner.has_quantize_step()
    }

    fn create(&mut self, request: &CreateRequest) -> Result<Created, LmqError> {
        let left = self.budget.get();
        if left == 0 {
            return Err(LmqError::collaborator("oom", "simulated crash"));
        }
        self.budget.set(left - 1);
        self.inner.create(request)
    }

    fn quantize(
        &mut self,
        model: ModelHandle,
        tokenizer: &TokenizerHandle,
        request: &QuantizeRequest,
    ) -> Result<Quantized, LmqError> {
        self.inner.quantize(model, tokenizer, request)
    }
}

fn crashing_collaborators(budget: usize) -> Collaborators {
    Collaborators::new(
        Box::new(SyntheticEvaluator),
        Box::new(SyntheticMonitor::default()),
    )
    .with_adapter(
        Algorithm::Hqq,
        Box::new(CrashingAdapter {
            inner: SyntheticAdapter::new(Algorithm::Hqq),
            budget: Rc::new(Cell::new(budget)),
        }),
    )
}

fn spec() -> ExperimentSpec {
    let catalog = ConfigCatalog::builtin();
    let configs = catalog
        .resolve(
            Algorithm::Hqq,
            Some(&["b4g64".to_string(), "b3g64".to_string(), "b2g64".to_string()]),
        )
        .expect("configs");
    let mut tasks = BTreeMap::new();
    tasks.insert(
        Algorithm::Hqq,
        AlgorithmTasks {
            task_type: TaskType::EvalPpl,
            configs,
        },
    );
    ExperimentSpec {
        models: vec!["org/a-7b".into(), "org/b-7b".into()],
        tasks,
    }
}

fn config(root: &std::path::Path) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::new("eval_ppl-hqq");
    config.result_dir = root.join("results");
    config.snapshot_dir = root.join("snapshots");
    config.metadata_dir = root.join("data");
    config.thread_limit = 1;
    config
}

fn partial_files(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .expect("list")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("partial-"))
        .collect();
    names.sort();
    names
}

#[test]
fn interrupted_run_resumes_without_repeating_work() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let config = config(temp.path());
    let layout = config.layout();
    let spec = spec();

    let err = run_experiment(&spec, &config, &mut crashing_collaborators(2)).unwrap_err();
    assert!(matches!(err, LmqError::Collaborator(_)));
    assert_eq!(
        err.info().context.get("task").map(String::as_str),
        Some("hqq/b2g64@org/b-7b:eval_ppl")
    );

    let ledger = Ledger::load(&layout.ledger_path()).expect("ledger");
    assert_eq!(ledger.counts().complete, 2);
    assert_eq!(ledger.counts().total, 6);
    assert_eq!(
        partial_files(layout.dir()),
        ["partial-hqq-b-7b-b3g64.csv", "partial-hqq-b-7b-b4g64.csv"]
    );
    assert!(!lmq_exp::LedgerLock::lock_path(&layout.ledger_path()).exists());

    let before = fs::read(layout.dir().join("partial-hqq-b-7b-b4g64.csv")).expect("first metrics");
    let outcome = run_experiment(&spec, &config, &mut synthetic_collaborators()).expect("resume");
    assert_eq!(outcome.summary.executed, 4);
    assert_eq!(outcome.summary.skipped_complete, 2);
    assert!(outcome.summary.aborted.is_empty());
    assert_eq!(outcome.report.records.len(), 6);
    assert_eq!(
        fs::read(layout.dir().join("partial-hqq-b-7b-b4g64.csv")).expect("metrics after"),
        before
    );

    let ledger = Ledger::load(&layout.ledger_path()).expect("ledger");
    assert_eq!(ledger.counts().complete, 6);
    assert_eq!(partial_files(layout.dir()).len(), 6);

    let again = run_experiment(&spec, &config, &mut synthetic_collaborators()).expect("no-op");
    assert_eq!(again.summary.executed, 0);
    assert_eq!(again.summary.skipped_complete, 6);
    assert_ne!(again.report.path, outcome.report.path);
    assert_eq!(again.report.records, outcome.report.records);
}

#[test]
fn continue_policy_keeps_going_and_still_fails() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let mut config = config(temp.path());
    config.failure_policy = FailurePolicy::Continue;
    let layout = config.layout();

    let err = run_experiment(&spec(), &config, &mut crashing_collaborators(2)).unwrap_err();
    assert_eq!(err.info().code, "tasks-aborted");
    let tasks = err.info().context.get("tasks").expect("tasks context");
    assert_eq!(tasks.split("; ").count(), 4);

    let ledger = Ledger::load(&layout.ledger_path()).expect("ledger");
    assert_eq!(ledger.counts().complete, 2);
    assert_eq!(ledger.counts().pending, 4);

    let reports: Vec<_> = fs::read_dir(layout.dir())
        .expect("list")
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.starts_with("result-") && name.ends_with(".csv")
        })
        .collect();
    assert_eq!(reports.len(), 1);
}

#[test]
fn held_lock_refuses_second_writer() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let config = config(temp.path());
    let layout = config.layout();
    let _held = lmq_exp::LedgerLock::acquire(&layout.ledger_path()).expect("lock");
    let err = run_experiment(&spec(), &config, &mut synthetic_collaborators()).unwrap_err();
    assert!(matches!(err, LmqError::Ledger(_)));
    assert_eq!(err.info().code, "ledger_locked");
}

#[cfg(unix)]
#[test]
fn lock_left_by_killed_run_does_not_block_resume() {
    let temp = tempfile::tempdir().expect("tmp dir");
    let config = config(temp.path());
    let layout = config.layout();
    let spec = spec();
    run_experiment(&spec, &config, &mut crashing_collaborators(2)).unwrap_err();

    // A killed run never drops its guard; its lock names a pid that has exited.
    let mut child = std::process::Command::new("true").spawn().expect("spawn");
    let dead = child.id();
    child.wait().expect("wait");
    let lock_path = lmq_exp::LedgerLock::lock_path(&layout.ledger_path());
    fs::write(&lock_path, format!("{dead}\n")).expect("stale lock");

    let outcome = run_experiment(&spec, &config, &mut synthetic_collaborators()).expect("resume");
    assert_eq!(outcome.summary.executed, 4);
    assert_eq!(outcome.summary.skipped_complete, 2);
    assert!(!lock_path.exists());

    // A guard forgotten by a live process still holds.
    std::mem::forget(lmq_exp::LedgerLock::acquire(&layout.ledger_path()).expect("lock"));
    let err = run_experiment(&spec, &config, &mut synthetic_collaborators()).unwrap_err();
    assert_eq!(err.info().code, "ledger_locked");
    assert_eq!(
        err.info().context.get("pid").map(String::as_str),
        Some(std::process::id().to_string().as_str())
    );
}

#[test]
fn synthetic_runs_are_reproducible() {
    let first = tempfile::tempdir().expect("tmp dir");
    let second = tempfile::tempdir().expect("tmp dir");
    let a = run_experiment(&spec(), &config(first.path()), &mut synthetic_collaborators())
        .expect("first run");
    let b = run_experiment(&spec(), &config(second.path()), &mut synthetic_collaborators())
        .expect("second run");
    assert_eq!(a.report.records, b.report.records);
    assert_eq!(a.report.provenance.grid_hash, b.report.provenance.grid_hash);
}
