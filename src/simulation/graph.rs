//! Step ordering within a flow

use std::collections::{HashMap, VecDeque};

use ghostrun_core::ExecutionFlow;

/// Simulation order of a flow's steps, as positions into `flow.steps`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOrder {
    /// Topologically ordered steps
    pub placed: Vec<usize>,
    /// Cycle members and the steps they depend on, in declaration order
    pub unplaced: Vec<usize>,
}

impl ExecutionOrder {
    /// Placed then unplaced positions
    pub fn positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.placed.iter().chain(self.unplaced.iter()).copied()
    }

    pub fn is_unplaced(&self, position: usize) -> bool {
        self.unplaced.contains(&position)
    }

    /// Step ids in simulation order
    pub fn step_ids(&self, flow: &ExecutionFlow) -> Vec<String> {
        self.positions()
            .map(|i| flow.steps[i].step_id.clone())
            .collect()
    }
}

/// Kahn's algorithm over dependents
///
/// A step's in-degree counts the steps that list it in `depends_on`. The
/// queue starts with steps nothing depends on, in declaration order, and
/// each popped step releases its own dependencies. The result is reversed
/// so dependencies come first. Ties keep queue insertion order, which makes
/// the order deterministic for a given flow.
///
/// Dependencies on ids outside the flow are ignored here.
pub fn execution_order(flow: &ExecutionFlow) -> ExecutionOrder {
    let mut position: HashMap<&str, usize> = HashMap::new();
    for (i, step) in flow.steps.iter().enumerate() {
        position.entry(step.step_id.as_str()).or_insert(i);
    }

    let resolve = |dep: &String| position.get(dep.as_str()).copied();

    let mut in_degree = vec![0usize; flow.steps.len()];
    for step in &flow.steps {
        for dep in step.depends_on.iter().filter_map(resolve) {
            in_degree[dep] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..flow.steps.len())
        .filter(|&i| in_degree[i] == 0)
        .collect();
    let mut placed = Vec::with_capacity(flow.steps.len());

    while let Some(node) = queue.pop_front() {
        placed.push(node);
        for dep in flow.steps[node].depends_on.iter().filter_map(resolve) {
            in_degree[dep] -= 1;
            if in_degree[dep] == 0 {
                queue.push_back(dep);
            }
        }
    }
    placed.reverse();

    let mut is_placed = vec![false; flow.steps.len()];
    for &i in &placed {
        is_placed[i] = true;
    }
    let unplaced = (0..flow.steps.len()).filter(|&i| !is_placed[i]).collect();

    ExecutionOrder { placed, unplaced }
}
