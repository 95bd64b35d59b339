use crate::error::EngineError;
use crate::types::{ExecutionPlan, StepId};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Dependency-graph view of an execution plan, used to validate it before
/// any step runs.
pub struct PlanDag {
    graph: DiGraph<StepId, ()>,
    nodes: HashMap<StepId, NodeIndex>,
}

impl PlanDag {
    /// Build the graph with dependency -> dependent edges and validate it:
    /// every dependency must name a known step, and the graph must be
    /// acyclic.
    pub fn build(plan: &ExecutionPlan) -> Result<Self, EngineError> {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();

        for step in &plan.steps {
            nodes.insert(step.step_id, graph.add_node(step.step_id));
        }

        for step in &plan.steps {
            let step_node = nodes[&step.step_id];
            for dependency in &step.dependencies {
                let dependency_node = nodes.get(dependency).ok_or_else(|| {
                    EngineError::InvalidPlan(format!(
                        "step {} depends on unknown step {}",
                        step.step_id, dependency
                    ))
                })?;
                graph.add_edge(*dependency_node, step_node, ());
            }
        }

        if petgraph::algo::is_cyclic_directed(&graph) {
            return Err(EngineError::CyclicPlan);
        }

        Ok(Self { graph, nodes })
    }

    /// Steps with no dependencies; the first wave.
    pub fn entry_steps(&self) -> Vec<StepId> {
        let mut entries: Vec<StepId> = self
            .graph
            .node_indices()
            .filter(|&node| {
                self.graph
                    .neighbors_directed(node, petgraph::Direction::Incoming)
                    .count()
                    == 0
            })
            .map(|node| self.graph[node])
            .collect();
        entries.sort();
        entries
    }

    /// Steps that directly depend on the given step.
    pub fn dependents(&self, id: StepId) -> Vec<StepId> {
        let Some(node) = self.nodes.get(&id) else {
            return Vec::new();
        };
        let mut dependents: Vec<StepId> = self
            .graph
            .neighbors_directed(*node, petgraph::Direction::Outgoing)
            .map(|n| self.graph[n])
            .collect();
        dependents.sort();
        dependents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskStep;

    fn plan(steps: Vec<TaskStep>) -> ExecutionPlan {
        let mut plan = ExecutionPlan::new("test", steps);
        plan.init_dag().unwrap();
        plan
    }

    #[test]
    fn test_linear_plan_accepted() {
        let plan = plan(vec![
            TaskStep::new(1, "A", "a"),
            TaskStep::new(2, "B", "b").with_dependencies([1]),
            TaskStep::new(3, "C", "c").with_dependencies([2]),
        ]);

        let dag = PlanDag::build(&plan).unwrap();
        assert_eq!(dag.entry_steps(), vec![StepId(1)]);
        assert_eq!(dag.dependents(StepId(1)), vec![StepId(2)]);
    }

    #[test]
    fn test_diamond_entry_steps() {
        let plan = plan(vec![
            TaskStep::new(1, "A", "a"),
            TaskStep::new(2, "B", "b"),
            TaskStep::new(3, "C", "c").with_dependencies([1, 2]),
        ]);

        let dag = PlanDag::build(&plan).unwrap();
        assert_eq!(dag.entry_steps(), vec![StepId(1), StepId(2)]);
        assert_eq!(dag.dependents(StepId(2)), vec![StepId(3)]);
    }

    #[test]
    fn test_cycle_rejected() {
        let plan = plan(vec![
            TaskStep::new(1, "A", "a").with_dependencies([2]),
            TaskStep::new(2, "B", "b").with_dependencies([1]),
        ]);

        match PlanDag::build(&plan) {
            Err(EngineError::CyclicPlan) => {}
            other => panic!("expected CyclicPlan, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_self_dependency_rejected() {
        let plan = plan(vec![TaskStep::new(1, "A", "a").with_dependencies([1])]);
        assert!(matches!(
            PlanDag::build(&plan),
            Err(EngineError::CyclicPlan)
        ));
    }

    #[test]
    fn test_missing_dependency_rejected() {
        let plan = plan(vec![TaskStep::new(1, "A", "a").with_dependencies([9])]);
        match PlanDag::build(&plan) {
            Err(EngineError::InvalidPlan(message)) => {
                assert!(message.contains("unknown step 9"));
            }
            other => panic!("expected InvalidPlan, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_empty_plan_accepted() {
        let plan = plan(vec![]);
        let dag = PlanDag::build(&plan).unwrap();
        assert!(dag.entry_steps().is_empty());
    }
}
