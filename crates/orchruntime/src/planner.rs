use chrono::Utc;
use orchcore::{ActionNode, ExecutionGroup, ExecutionMode, ExecutionPlan, GroupId, PlanError};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Turns a flat list of action nodes into grouped execution plans
#[derive(Debug, Clone, Default)]
pub struct ExecutionPlanner {
    priority_grouping: bool,
}

impl ExecutionPlanner {
    pub fn new(priority_grouping: bool) -> Self {
        Self { priority_grouping }
    }

    pub fn create_plan(
        &self,
        container_id: &str,
        actions: Vec<ActionNode>,
    ) -> Result<ExecutionPlan, PlanError> {
        if actions.is_empty() {
            return Err(PlanError::EmptyActionSet);
        }

        let mut seen = HashSet::new();
        for action in &actions {
            if action.container_id != container_id {
                return Err(PlanError::ContainerMismatch {
                    action_id: action.id.clone(),
                    expected: container_id.to_string(),
                    found: action.container_id.clone(),
                });
            }
            if !seen.insert(action.id.as_str()) {
                return Err(PlanError::DuplicateAction(action.id.clone()));
            }
        }

        let ordered = self.order_actions(actions);
        let groups = partition_into_groups(&ordered);
        let graph = GroupGraph::build(&groups)?;
        let total = graph.critical_path_ms(&groups);

        tracing::debug!(
            container_id,
            actions = ordered.len(),
            groups = groups.len(),
            total_estimated_duration_ms = total,
            "created execution plan"
        );

        Ok(ExecutionPlan {
            id: Uuid::new_v4(),
            container_id: container_id.to_string(),
            actions: ordered,
            groups,
            total_estimated_duration_ms: total,
            created_at: Utc::now(),
        })
    }

    // Both sorts are stable, so equal keys keep submission order.
    fn order_actions(&self, mut actions: Vec<ActionNode>) -> Vec<ActionNode> {
        if self.priority_grouping {
            actions.sort_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.execution_order.cmp(&b.execution_order))
            });
        } else {
            actions.sort_by_key(|a| a.execution_order);
        }
        actions
    }
}

/// Split ordered actions into maximal runs of one execution mode, each
/// depending on the run before it.
fn partition_into_groups(actions: &[ActionNode]) -> Vec<ExecutionGroup> {
    let mut groups: Vec<ExecutionGroup> = Vec::new();

    for action in actions {
        if let Some(group) = groups
            .last_mut()
            .filter(|g| g.execution_mode == action.execution_mode)
        {
            group.actions.push(action.clone());
            continue;
        }

        let depends_on = groups.last().map(|g| vec![g.id.clone()]).unwrap_or_default();
        groups.push(ExecutionGroup {
            id: format!("group-{}", groups.len() + 1),
            execution_mode: action.execution_mode,
            actions: vec![action.clone()],
            depends_on,
            estimated_duration_ms: 0,
            priority: action.priority,
        });
    }

    for group in &mut groups {
        group.estimated_duration_ms = group_duration(group.execution_mode, &group.actions);
        group.priority = group.actions.iter().map(|a| a.priority).max().unwrap_or(0);
    }

    groups
}

pub fn group_duration(mode: ExecutionMode, actions: &[ActionNode]) -> u64 {
    let durations = actions.iter().map(|a| a.estimated_duration_ms);
    match mode {
        ExecutionMode::Parallel => durations.max().unwrap_or(0),
        ExecutionMode::Sequential | ExecutionMode::Conditional => durations.sum(),
    }
}

/// Dependency graph between execution groups
pub struct GroupGraph {
    graph: DiGraph<GroupId, ()>,
    index: HashMap<GroupId, NodeIndex>,
    order: Vec<GroupId>,
}

impl GroupGraph {
    pub fn build(groups: &[ExecutionGroup]) -> Result<Self, PlanError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for group in groups {
            let idx = graph.add_node(group.id.clone());
            index.insert(group.id.clone(), idx);
        }

        // Edge from dependency to dependent
        for group in groups {
            let to = index[&group.id];
            for dep in &group.depends_on {
                let from = index
                    .get(dep)
                    .ok_or_else(|| PlanError::UnknownGroup(dep.clone()))?;
                graph.add_edge(*from, to, ());
            }
        }

        let sorted = toposort(&graph, None).map_err(|_| PlanError::CyclicDependency)?;
        let order = sorted.into_iter().map(|idx| graph[idx].clone()).collect();

        Ok(Self {
            graph,
            index,
            order,
        })
    }

    /// Group ids in an order where every group follows its dependencies.
    pub fn execution_order(&self) -> &[GroupId] {
        &self.order
    }

    pub fn dependencies(&self, group_id: &str) -> Vec<GroupId> {
        self.index
            .get(group_id)
            .map(|idx| {
                self.graph
                    .neighbors_directed(*idx, Direction::Incoming)
                    .map(|dep| self.graph[dep].clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Longest path through the graph weighted by group duration. For the
    /// planner's linear chain this is the plain sum.
    pub fn critical_path_ms(&self, groups: &[ExecutionGroup]) -> u64 {
        let durations: HashMap<&str, u64> = groups
            .iter()
            .map(|g| (g.id.as_str(), g.estimated_duration_ms))
            .collect();
        let mut finish: HashMap<&str, u64> = HashMap::new();

        for id in &self.order {
            let start = self
                .dependencies(id)
                .iter()
                .filter_map(|dep| finish.get(dep.as_str()).copied())
                .max()
                .unwrap_or(0);
            let own = durations.get(id.as_str()).copied().unwrap_or(0);
            finish.insert(id.as_str(), start + own);
        }

        finish.values().copied().max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: &str, deps: &[&str], duration: u64) -> ExecutionGroup {
        ExecutionGroup {
            id: id.to_string(),
            execution_mode: ExecutionMode::Sequential,
            actions: vec![],
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            estimated_duration_ms: duration,
            priority: 0,
        }
    }

    #[test]
    fn critical_path_handles_fan_out_and_fan_in() {
        let groups = vec![
            group("a", &[], 10),
            group("b", &["a"], 50),
            group("c", &["a"], 20),
            group("d", &["b", "c"], 5),
        ];
        let graph = GroupGraph::build(&groups).unwrap();
        assert_eq!(graph.critical_path_ms(&groups), 65);
        assert_eq!(graph.execution_order().first().map(String::as_str), Some("a"));
        assert_eq!(graph.execution_order().last().map(String::as_str), Some("d"));
        let mut deps = graph.dependencies("d");
        deps.sort();
        assert_eq!(deps, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn rejects_cycles_and_unknown_groups() {
        let cyclic = vec![group("a", &["b"], 1), group("b", &["a"], 1)];
        assert_eq!(GroupGraph::build(&cyclic).err(), Some(PlanError::CyclicDependency));

        let dangling = vec![group("a", &["ghost"], 1)];
        assert_eq!(
            GroupGraph::build(&dangling).err(),
            Some(PlanError::UnknownGroup("ghost".to_string()))
        );
    }

    #[test]
    fn parallel_duration_is_max() {
        let actions = vec![
            ActionNode::new("a", "c", ExecutionMode::Parallel).with_duration_ms(30),
            ActionNode::new("b", "c", ExecutionMode::Parallel).with_duration_ms(45),
        ];
        assert_eq!(group_duration(ExecutionMode::Parallel, &actions), 45);
        assert_eq!(group_duration(ExecutionMode::Sequential, &actions), 75);
    }
}
