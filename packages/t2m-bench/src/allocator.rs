//! Divides a generation plan's sample budget across (scenario × operation)
//! cells and into batches (spec.md §4.1, grounded on
//! `original_source/bench/generate/src/plan_loader.py::TaskAllocator`, which
//! branches small-sample vs. proportional allocation the same way).

use std::collections::HashMap;

/// A generation plan: total sample budget plus the proportions it should be
/// spread across. Reading this from a YAML/JSON plan file is out of scope
/// (spec.md §1); only the in-memory shape lives here.
#[derive(Debug, Clone)]
pub struct GenerationPlan {
    pub total_samples: usize,
    /// scenario name -> proportion of `total_samples`, summing to 1 ± 0.01.
    pub scenario_proportions: Vec<(String, f64)>,
    /// operation name -> proportion of `total_samples`, summing to 1 ± 0.01.
    pub operation_proportions: Vec<(String, f64)>,
    /// fraction of each batch's samples that should be labelled `workflow`
    /// structure rather than `single`.
    pub workflow_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureLabel {
    Single,
    Workflow,
}

#[derive(Debug, Clone)]
pub struct TaskBatch {
    pub batch_id: usize,
    pub scenario: String,
    pub operation: String,
    pub count: usize,
    pub structures: Vec<StructureLabel>,
}

pub struct TaskAllocator;

impl TaskAllocator {
    /// Pure, deterministic: identical `plan`/`batch_size` yield identical
    /// output (spec.md §4.1 "Determinism").
    pub fn allocate(plan: &GenerationPlan, batch_size: usize) -> Vec<TaskBatch> {
        let cells = if plan.total_samples <= 2 * plan.operation_proportions.len() {
            Self::allocate_small_sample(plan)
        } else {
            Self::allocate_proportional(plan)
        };
        Self::partition_into_batches(cells, plan.workflow_pct, batch_size)
    }

    /// Small-sample mode: guarantee every operation appears at least once,
    /// assigning operations in descending-proportion order and scenarios
    /// round-robin.
    fn allocate_small_sample(plan: &GenerationPlan) -> Vec<(String, String, usize)> {
        let mut ops_sorted: Vec<(String, f64)> = plan.operation_proportions.clone();
        ops_sorted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut remaining = plan.total_samples;
        let mut cell_counts: HashMap<(String, String), usize> = HashMap::new();
        let mut scenario_idx = 0usize;
        let scenarios: Vec<&String> = plan.scenario_proportions.iter().map(|(s, _)| s).collect();
        if scenarios.is_empty() {
            return Vec::new();
        }

        for (op, _) in ops_sorted.iter() {
            if remaining == 0 {
                break;
            }
            let scenario = scenarios[scenario_idx % scenarios.len()].clone();
            scenario_idx += 1;
            *cell_counts.entry((scenario, op.clone())).or_insert(0) += 1;
            remaining -= 1;
        }

        // Spread any leftover budget proportionally over existing cells by
        // round-robining scenario x operation pairs, descending by weight.
        if remaining > 0 {
            let mut weighted: Vec<((String, String), f64)> = Vec::new();
            for (s, sp) in &plan.scenario_proportions {
                for (o, op) in &plan.operation_proportions {
                    weighted.push(((s.clone(), o.clone()), sp * op));
                }
            }
            weighted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            if !weighted.is_empty() {
                let mut i = 0;
                while remaining > 0 {
                    let (key, _) = &weighted[i % weighted.len()];
                    *cell_counts.entry(key.clone()).or_insert(0) += 1;
                    remaining -= 1;
                    i += 1;
                }
            }
        }

        let mut cells: Vec<(String, String, usize)> =
            cell_counts.into_iter().map(|((s, o), c)| (s, o, c)).collect();
        cells.sort_by(|a, b| (a.0.clone(), a.1.clone()).cmp(&(b.0.clone(), b.1.clone())));
        cells
    }

    /// Normal mode: floor each theoretical cell, then hand out the leftover
    /// remainder to the cells with the largest fractional part, descending.
    fn allocate_proportional(plan: &GenerationPlan) -> Vec<(String, String, usize)> {
        let total = plan.total_samples as f64;
        let mut theoretical: Vec<((String, String), f64)> = Vec::new();
        for (s, sp) in &plan.scenario_proportions {
            for (o, op) in &plan.operation_proportions {
                theoretical.push(((s.clone(), o.clone()), total * sp * op));
            }
        }

        let mut floored: Vec<((String, String), usize, f64)> = theoretical
            .iter()
            .map(|(key, v)| (key.clone(), v.floor() as usize, v.fract()))
            .collect();

        let floor_sum: usize = floored.iter().map(|(_, c, _)| *c).sum();
        let mut remainder = plan.total_samples.saturating_sub(floor_sum);

        let mut order: Vec<usize> = (0..floored.len()).collect();
        order.sort_by(|&a, &b| {
            floored[b]
                .2
                .partial_cmp(&floored[a].2)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut idx = 0;
        while remainder > 0 && !order.is_empty() {
            let i = order[idx % order.len()];
            floored[i].1 += 1;
            remainder -= 1;
            idx += 1;
            if idx >= order.len() * plan.total_samples.max(1) {
                break;
            }
        }

        // Over-allocation is impossible when proportions sum to ~1, but
        // guard against floating point drift by trimming the largest cells.
        let mut total_assigned: usize = floored.iter().map(|(_, c, _)| *c).sum();
        let mut trim_idx = 0;
        while total_assigned > plan.total_samples && !floored.is_empty() {
            let i = order[trim_idx % order.len()];
            if floored[i].1 > 0 {
                floored[i].1 -= 1;
                total_assigned -= 1;
            }
            trim_idx += 1;
            if trim_idx > order.len() * 4 {
                break;
            }
        }

        let mut cells: Vec<(String, String, usize)> = floored
            .into_iter()
            .filter(|(_, c, _)| *c > 0)
            .map(|((s, o), c, _)| (s, o, c))
            .collect();
        cells.sort_by(|a, b| (a.0.clone(), a.1.clone()).cmp(&(b.0.clone(), b.1.clone())));
        cells
    }

    fn partition_into_batches(
        cells: Vec<(String, String, usize)>,
        workflow_pct: f64,
        batch_size: usize,
    ) -> Vec<TaskBatch> {
        let batch_size = batch_size.max(1);
        let mut batches = Vec::new();
        let mut batch_id = 0usize;
        for (scenario, operation, count) in cells {
            let mut remaining = count;
            while remaining > 0 {
                let take = remaining.min(batch_size);
                let workflow_count = (take as f64 * workflow_pct).round() as usize;
                let workflow_count = workflow_count.min(take);
                let mut structures = vec![StructureLabel::Workflow; workflow_count];
                structures.extend(vec![StructureLabel::Single; take - workflow_count]);
                batches.push(TaskBatch {
                    batch_id,
                    scenario: scenario.clone(),
                    operation: operation.clone(),
                    count: take,
                    structures,
                });
                batch_id += 1;
                remaining -= take;
            }
        }
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(total: usize) -> GenerationPlan {
        GenerationPlan {
            total_samples: total,
            scenario_proportions: vec![("work".to_string(), 0.6), ("personal".to_string(), 0.4)],
            operation_proportions: vec![
                ("encode".to_string(), 0.5),
                ("retrieve".to_string(), 0.3),
                ("delete".to_string(), 0.2),
            ],
            workflow_pct: 0.15,
        }
    }

    #[test]
    fn proportional_mode_allocates_exactly_total_samples() {
        let p = plan(200);
        let batches = TaskAllocator::allocate(&p, 10);
        let total: usize = batches.iter().map(|b| b.count).sum();
        assert_eq!(total, 200);
    }

    #[test]
    fn small_sample_mode_covers_every_operation_at_least_once() {
        let p = plan(4);
        let batches = TaskAllocator::allocate(&p, 10);
        let total: usize = batches.iter().map(|b| b.count).sum();
        assert_eq!(total, 4);
        for (op, _) in &p.operation_proportions {
            assert!(batches.iter().any(|b| &b.operation == op));
        }
    }

    #[test]
    fn batches_are_capped_at_batch_size() {
        let p = plan(100);
        let batches = TaskAllocator::allocate(&p, 7);
        assert!(batches.iter().all(|b| b.count <= 7));
    }

    #[test]
    fn allocation_is_deterministic() {
        let p = plan(137);
        let a = TaskAllocator::allocate(&p, 10);
        let b = TaskAllocator::allocate(&p, 10);
        let summarize = |batches: &[TaskBatch]| -> Vec<(String, String, usize)> {
            batches
                .iter()
                .map(|b| (b.scenario.clone(), b.operation.clone(), b.count))
                .collect()
        };
        assert_eq!(summarize(&a), summarize(&b));
    }

    #[test]
    fn structures_respect_workflow_percentage() {
        let p = plan(100);
        let batches = TaskAllocator::allocate(&p, 20);
        for batch in &batches {
            let workflow_count = batch
                .structures
                .iter()
                .filter(|s| **s == StructureLabel::Workflow)
                .count();
            let expected = (batch.count as f64 * p.workflow_pct).round() as usize;
            assert_eq!(workflow_count, expected.min(batch.count));
        }
    }
}
