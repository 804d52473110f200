use std::collections::BTreeSet;

use chrono::Utc;
use lmq_core::{Algorithm, QuantConfig, TaskKey, TaskRecord, TaskType};
use lmq_exp::{diff, execution_order, Ledger};
use proptest::prelude::*;

fn grid_strategy() -> impl Strategy<Value = Vec<TaskRecord>> {
    let key = (
        0usize..4,
        0usize..5,
        prop::sample::select(Algorithm::ALL.to_vec()),
        prop::sample::select(TaskType::ALL.to_vec()),
    );
    prop::collection::btree_set(key, 0..40).prop_map(|keys| {
        keys.into_iter()
            .map(|(model, config, algorithm, task_type)| TaskRecord {
                key: TaskKey::new(
                    format!("org/model-{model}"),
                    format!("cfg{config}"),
                    algorithm,
                    task_type,
                ),
                config: QuantConfig::Fp16,
            })
            .collect()
    })
}

fn keys(records: &[TaskRecord]) -> Vec<TaskKey> {
    records.iter().map(|record| record.key.clone()).collect()
}

proptest! {
    #[test]
    fn diff_is_idempotent(grid in grid_strategy(), complete in prop::collection::vec(any::<bool>(), 40)) {
        let mut ledger = Ledger::new();
        for (record, done) in grid.iter().zip(&complete) {
            if *done {
                ledger.mark_complete(&record.key, Utc::now());
            }
        }
        let first = diff(&grid, &ledger);
        let second = diff(&grid, &ledger);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(diff(&first, &ledger), first);
    }

    #[test]
    fn diff_partitions_the_grid(grid in grid_strategy(), complete in prop::collection::vec(any::<bool>(), 40)) {
        let mut ledger = Ledger::new();
        ledger.register_pending(&grid);
        for (record, done) in grid.iter().zip(&complete) {
            if *done {
                ledger.mark_complete(&record.key, Utc::now());
            }
        }
        let pending: BTreeSet<TaskKey> = keys(&diff(&grid, &ledger)).into_iter().collect();
        for record in &grid {
            prop_assert!(ledger.is_complete(&record.key) ^ pending.contains(&record.key));
        }
    }

    #[test]
    fn completing_a_task_shrinks_the_diff_by_one(grid in grid_strategy(), pick in any::<prop::sample::Index>()) {
        prop_assume!(!grid.is_empty());
        let mut ledger = Ledger::new();
        let before = diff(&grid, &ledger);
        let chosen = &before[pick.index(before.len())];
        ledger.mark_complete(&chosen.key, Utc::now());
        let after = diff(&grid, &ledger);
        prop_assert_eq!(after.len() + 1, before.len());
        prop_assert!(!after.contains(chosen));
        let expected: Vec<_> = before.iter().filter(|record| *record != chosen).cloned().collect();
        prop_assert_eq!(after, expected);
    }

    #[test]
    fn diff_output_is_strictly_ordered(grid in grid_strategy()) {
        let pending = diff(&grid, &Ledger::new());
        for pair in pending.windows(2) {
            prop_assert_eq!(execution_order(&pair[0], &pair[1]), std::cmp::Ordering::Less);
            let a = (&pair[0].key.model_id, &pair[0].key.config_name);
            let b = (&pair[1].key.model_id, &pair[1].key.config_name);
            prop_assert!(a >= b);
        }
    }
}

#[test]
fn documented_ordering_example() {
    let record = |model: &str, config: &str| TaskRecord {
        key: TaskKey::new(model, config, Algorithm::Hqq, TaskType::EvalPpl),
        config: QuantConfig::Fp16,
    };
    let grid = vec![record("A", "cfg1"), record("B", "cfg2"), record("A", "cfg2")];
    let order: Vec<(String, String)> = diff(&grid, &Ledger::new())
        .into_iter()
        .map(|r| (r.key.model_id, r.key.config_name))
        .collect();
    assert_eq!(
        order,
        [("B", "cfg2"), ("A", "cfg2"), ("A", "cfg1")]
            .iter()
            .map(|(m, c)| (m.to_string(), c.to_string()))
            .collect::<Vec<_>>()
    );
}
