use std::cmp::Ordering;

use lmq_core::TaskRecord;

use crate::ledger::Ledger;

/// Execution order: `(model_id, config_name)` descending, then algorithm and task type
/// descending.
pub fn execution_order(a: &TaskRecord, b: &TaskRecord) -> Ordering {
    b.key.cmp(&a.key)
}

/// Tasks of `grid` that the ledger does not mark complete, in execution order.
pub fn diff(grid: &[TaskRecord], ledger: &Ledger) -> Vec<TaskRecord> {
    let mut pending: Vec<TaskRecord> = grid
        .iter()
        .filter(|record| !ledger.is_complete(&record.key))
        .cloned()
        .collect();
    pending.sort_by(execution_order);
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lmq_core::{Algorithm, QuantConfig, TaskKey, TaskType};

    fn record(model: &str, config: &str) -> TaskRecord {
        TaskRecord {
            key: TaskKey::new(model, config, Algorithm::Hqq, TaskType::EvalPpl),
            config: QuantConfig::Fp16,
        }
    }

    #[test]
    fn orders_by_model_then_config_descending() {
        let grid = vec![record("A", "cfg1"), record("B", "cfg2"), record("A", "cfg2")];
        let order: Vec<_> = diff(&grid, &Ledger::new())
            .into_iter()
            .map(|r| (r.key.model_id, r.key.config_name))
            .collect();
        assert_eq!(
            order,
            vec![
                ("B".to_string(), "cfg2".to_string()),
                ("A".to_string(), "cfg2".to_string()),
                ("A".to_string(), "cfg1".to_string()),
            ]
        );
    }

    #[test]
    fn ties_break_on_algorithm_and_task_type() {
        let mut hqq = record("A", "cfg");
        hqq.key.algorithm = Algorithm::Hqq;
        let mut awq = record("A", "cfg");
        awq.key.algorithm = Algorithm::Awq;
        let mut quant = record("A", "cfg");
        quant.key.task_type = TaskType::Quant;
        let pending = diff(&[hqq.clone(), quant.clone(), awq.clone()], &Ledger::new());
        assert_eq!(pending, vec![awq, hqq, quant]);
    }

    #[test]
    fn complete_entries_are_removed_and_pending_entries_kept() {
        let grid = vec![record("A", "cfg1"), record("A", "cfg2")];
        let mut ledger = Ledger::new();
        ledger.register_pending(&grid);
        ledger.mark_complete(&grid[0].key, Utc::now());
        let pending = diff(&grid, &ledger);
        assert_eq!(pending, vec![grid[1].clone()]);
    }
}
