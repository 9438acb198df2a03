//! Dependency graph
//!
//! Nodes are stored in a vector sorted by resource ID and addressed by
//! index; edges are adjacency lists of indices. An edge `from -> to` means
//! `from` depends on `to`, so `to` must be realized first. Because the node
//! vector is sorted, index order is lexicographic ID order, which makes
//! every ordering produced here deterministic.

use crate::error::{GraphError, Result};
use crate::implicit::ImplicitRules;
use infraflow_state::{ResourceState, ResourceStatus};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use tracing::{debug, info, warn};

/// A node of the graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub resource_type: String,
    pub name: String,
    pub status: ResourceStatus,
}

/// A declared dependency whose target is not in the resource set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DanglingEdge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Unvisited,
    InProgress,
    Done,
}

/// Configures how a graph is built from resources
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    implicit: Option<ImplicitRules>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also derive edges from reference-bearing properties
    pub fn implicit_rules(mut self, rules: ImplicitRules) -> Self {
        self.implicit = Some(rules);
        self
    }

    #[tracing::instrument(skip_all)]
    pub fn build<'a, I>(&self, resources: I) -> DependencyGraph
    where
        I: IntoIterator<Item = &'a ResourceState>,
    {
        let mut resources: Vec<&ResourceState> = resources.into_iter().collect();
        resources.sort_by(|a, b| a.id.cmp(&b.id));
        resources.dedup_by(|later, earlier| {
            let dup = later.id == earlier.id;
            if dup {
                warn!(resource_id = %later.id, "Duplicate resource in graph input, keeping first");
            }
            dup
        });

        let nodes: Vec<GraphNode> = resources
            .iter()
            .map(|r| GraphNode {
                id: r.id.clone(),
                resource_type: r.resource_type.clone(),
                name: r.name.clone(),
                status: r.status,
            })
            .collect();
        let index: HashMap<String, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();

        let mut deps = vec![Vec::new(); nodes.len()];
        let mut dangling = Vec::new();
        let mut implicit_edges = 0;

        for (from, resource) in resources.iter().enumerate() {
            for dep in &resource.dependencies {
                match index.get(dep) {
                    Some(&to) => deps[from].push(to),
                    None => {
                        warn!(
                            resource_id = %resource.id,
                            dependency_id = %dep,
                            "Dependency not found in graph, recording dangling edge"
                        );
                        dangling.push(DanglingEdge {
                            from: resource.id.clone(),
                            to: dep.clone(),
                        });
                    }
                }
            }

            if let Some(rules) = &self.implicit {
                for reference in rules.references(resource) {
                    if let Some(&to) = index.get(&reference)
                        && to != from
                        && !deps[from].contains(&to)
                    {
                        deps[from].push(to);
                        implicit_edges += 1;
                    }
                }
            }
        }

        let mut dependents = vec![Vec::new(); nodes.len()];
        for (from, targets) in deps.iter_mut().enumerate() {
            targets.sort_unstable();
            targets.dedup();
            for &to in targets.iter() {
                dependents[to].push(from);
            }
        }

        let graph = DependencyGraph {
            nodes,
            index,
            deps,
            dependents,
            dangling,
            implicit_edges,
        };
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            implicit_edges,
            dangling = graph.dangling.len(),
            "Dependency graph built"
        );
        graph
    }
}

/// Directed "must exist before" graph, rebuilt for every reconciliation cycle
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
    /// from -> to (dependencies), sorted
    deps: Vec<Vec<usize>>,
    /// to -> from (dependents), sorted
    dependents: Vec<Vec<usize>>,
    dangling: Vec<DanglingEdge>,
    implicit_edges: usize,
}

impl DependencyGraph {
    /// Build from declared dependencies only
    pub fn build<'a, I>(resources: I) -> Self
    where
        I: IntoIterator<Item = &'a ResourceState>,
    {
        GraphBuilder::new().build(resources)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.deps.iter().map(Vec::len).sum()
    }

    pub fn implicit_edge_count(&self) -> usize {
        self.implicit_edges
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in ID order
    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Declared edges whose target was absent from the resource set
    pub fn dangling_edges(&self) -> &[DanglingEdge] {
        &self.dangling
    }

    /// Every edge as `(from, to)` in ID order
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.deps.iter().enumerate().flat_map(move |(from, tos)| {
            tos.iter()
                .map(move |&to| (self.nodes[from].id.as_str(), self.nodes[to].id.as_str()))
        })
    }

    fn idx(&self, id: &str) -> Result<usize> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| GraphError::UnknownNode(id.to_string()))
    }

    fn ids(&self, indices: impl IntoIterator<Item = usize>) -> Vec<String> {
        indices
            .into_iter()
            .map(|i| self.nodes[i].id.clone())
            .collect()
    }

    /// Direct dependencies of `id`, sorted
    pub fn get_dependencies(&self, id: &str) -> Result<Vec<String>> {
        let i = self.idx(id)?;
        Ok(self.ids(self.deps[i].iter().copied()))
    }

    /// Direct dependents of `id`, sorted
    pub fn get_dependents(&self, id: &str) -> Result<Vec<String>> {
        let i = self.idx(id)?;
        Ok(self.ids(self.dependents[i].iter().copied()))
    }

    pub(crate) fn in_degree(&self, i: usize) -> usize {
        self.dependents[i].len()
    }

    pub(crate) fn out_degree(&self, i: usize) -> usize {
        self.deps[i].len()
    }

    /// Three-color depth-first search. Every back edge yields one cycle,
    /// reported as the node sequence from the back edge's target around to
    /// its source. Runs in O(V + E) plus the size of the output.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let n = self.nodes.len();
        let mut color = vec![Color::Unvisited; n];
        let mut position = vec![0usize; n];
        let mut cycles = Vec::new();

        for start in 0..n {
            if color[start] != Color::Unvisited {
                continue;
            }

            // (node, next dependency to visit)
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            color[start] = Color::InProgress;
            position[start] = 0;

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                match self.deps[node].get(frame.1) {
                    Some(&dep) => {
                        frame.1 += 1;
                        match color[dep] {
                            Color::Unvisited => {
                                color[dep] = Color::InProgress;
                                position[dep] = stack.len();
                                stack.push((dep, 0));
                            }
                            Color::InProgress => {
                                let cycle = stack[position[dep]..].iter().map(|&(i, _)| i);
                                cycles.push(self.ids(cycle));
                            }
                            Color::Done => {}
                        }
                    }
                    None => {
                        color[node] = Color::Done;
                        stack.pop();
                    }
                }
            }
        }

        if !cycles.is_empty() {
            debug!(cycles = cycles.len(), "Detected dependency cycles");
        }
        cycles
    }

    fn cycle_error(&self, within: Option<&[bool]>) -> GraphError {
        let cycles = self.detect_cycles();
        let cycle = cycles
            .iter()
            .find(|c| match within {
                Some(mask) => c.iter().all(|id| self.index.get(id).is_some_and(|&i| mask[i])),
                None => true,
            })
            .or(cycles.first())
            .cloned()
            .unwrap_or_default();
        GraphError::CyclicGraph { cycle }
    }

    /// Kahn's algorithm over the nodes selected by `mask` (all when `None`).
    /// Simultaneously eligible nodes are taken in lexicographic ID order.
    fn kahn(&self, mask: Option<&[bool]>) -> Result<Vec<usize>> {
        let included = |i: usize| mask.is_none_or(|m| m[i]);
        let mut remaining: Vec<usize> = (0..self.nodes.len())
            .map(|i| self.deps[i].iter().filter(|&&d| included(d)).count())
            .collect();

        let mut ready: BinaryHeap<Reverse<usize>> = (0..self.nodes.len())
            .filter(|&i| included(i) && remaining[i] == 0)
            .map(Reverse)
            .collect();
        let total = (0..self.nodes.len()).filter(|&i| included(i)).count();
        let mut order = Vec::with_capacity(total);

        while let Some(Reverse(i)) = ready.pop() {
            order.push(i);
            for &dependent in &self.dependents[i] {
                if !included(dependent) {
                    continue;
                }
                remaining[dependent] -= 1;
                if remaining[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        if order.len() < total {
            return Err(self.cycle_error(mask));
        }
        Ok(order)
    }

    /// Every node, dependencies before dependents. Never partial: a cycle
    /// yields `CyclicGraph` with the offending path.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let order = self.kahn(None)?;
        debug!(nodes = order.len(), "Deployment order calculated");
        Ok(self.ids(order))
    }

    /// Order for deploying `targets` and everything they transitively
    /// depend on. An empty target list means the whole graph.
    pub fn deployment_order<S: AsRef<str>>(&self, targets: &[S]) -> Result<Vec<String>> {
        if targets.is_empty() {
            return self.topological_order();
        }

        let mut mask = vec![false; self.nodes.len()];
        let mut queue = VecDeque::new();
        for target in targets {
            let i = self.idx(target.as_ref())?;
            if !mask[i] {
                mask[i] = true;
                queue.push_back(i);
            }
        }
        while let Some(i) = queue.pop_front() {
            for &dep in &self.deps[i] {
                if !mask[dep] {
                    mask[dep] = true;
                    queue.push_back(dep);
                }
            }
        }

        Ok(self.ids(self.kahn(Some(&mask))?))
    }

    /// Reverse of the deployment order: dependents are removed first
    pub fn deletion_order(&self) -> Result<Vec<String>> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }

    /// Group nodes into levels; level k holds every node whose dependencies
    /// all sit in levels 0..k. Nodes within a level are independent.
    pub fn deployment_levels(&self) -> Result<Vec<Vec<String>>> {
        let mut remaining: Vec<usize> = self.deps.iter().map(Vec::len).collect();
        let mut frontier: Vec<usize> = (0..self.nodes.len())
            .filter(|&i| remaining[i] == 0)
            .collect();
        let mut levels = Vec::new();
        let mut placed = 0;

        while !frontier.is_empty() {
            placed += frontier.len();
            let mut next = Vec::new();
            for &i in &frontier {
                for &dependent in &self.dependents[i] {
                    remaining[dependent] -= 1;
                    if remaining[dependent] == 0 {
                        next.push(dependent);
                    }
                }
            }
            next.sort_unstable();
            levels.push(self.ids(std::mem::replace(&mut frontier, next)));
        }

        if placed < self.nodes.len() {
            return Err(self.cycle_error(None));
        }
        debug!(levels = levels.len(), "Deployment levels calculated");
        Ok(levels)
    }

    /// Whether `to` can be reached from `from` along dependency edges,
    /// i.e. whether `from` (transitively) depends on `to`.
    pub fn is_reachable(&self, from: &str, to: &str) -> Result<bool> {
        let start = self.idx(from)?;
        let goal = self.idx(to)?;
        if start == goal {
            return Ok(true);
        }
        Ok(self.walk(start, &self.deps).contains(&goal))
    }

    /// Everything that transitively depends on `id` (excluding `id`), sorted
    pub fn transitive_dependents(&self, id: &str) -> Result<Vec<String>> {
        let i = self.idx(id)?;
        let mut found = self.walk(i, &self.dependents);
        found.sort_unstable();
        Ok(self.ids(found))
    }

    /// Everything `id` transitively depends on (excluding `id`), sorted
    pub fn transitive_dependencies(&self, id: &str) -> Result<Vec<String>> {
        let i = self.idx(id)?;
        let mut found = self.walk(i, &self.deps);
        found.sort_unstable();
        Ok(self.ids(found))
    }

    /// Breadth-first walk from `start`, excluding `start` itself
    fn walk(&self, start: usize, adjacency: &[Vec<usize>]) -> Vec<usize> {
        let mut seen = vec![false; self.nodes.len()];
        seen[start] = true;
        let mut queue = VecDeque::from([start]);
        let mut found = Vec::new();
        while let Some(i) = queue.pop_front() {
            for &next in &adjacency[i] {
                if !seen[next] {
                    seen[next] = true;
                    found.push(next);
                    queue.push_back(next);
                }
            }
        }
        found
    }

    /// Longest dependency chain ending at `id`, root first
    pub fn critical_path(&self, id: &str) -> Result<Vec<String>> {
        let target = self.idx(id)?;
        let order = self.deployment_order(&[id])?;

        let mut depth: HashMap<usize, usize> = HashMap::new();
        let mut parent: HashMap<usize, usize> = HashMap::new();
        for node_id in &order {
            let i = self.index[node_id];
            let best = self.deps[i]
                .iter()
                .map(|&d| (depth.get(&d).copied().unwrap_or(0), Reverse(d)))
                .max();
            match best {
                Some((d, Reverse(p))) => {
                    depth.insert(i, d + 1);
                    parent.insert(i, p);
                }
                None => {
                    depth.insert(i, 0);
                }
            }
        }

        let mut path = vec![target];
        let mut current = target;
        while let Some(&p) = parent.get(&current) {
            path.push(p);
            current = p;
        }
        path.reverse();
        Ok(self.ids(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::implicit::ImplicitRules;
    use serde_json::json;

    fn res(id: &str, deps: &[&str]) -> ResourceState {
        deps.iter()
            .fold(ResourceState::new(id, "vpc"), |r, d| r.with_dependency(*d))
    }

    fn graph(resources: &[ResourceState]) -> DependencyGraph {
        DependencyGraph::build(resources)
    }

    fn assert_respects_dependencies(g: &DependencyGraph, order: &[String]) {
        let pos: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        for (from, to) in g.edges() {
            assert!(pos[to] < pos[from], "{} must come before {}", to, from);
        }
    }

    #[test]
    fn test_linear_chain() {
        let g = graph(&[res("C", &["B"]), res("A", &[]), res("B", &["A"])]);
        assert_eq!(g.topological_order().unwrap(), vec!["A", "B", "C"]);
        assert_eq!(
            g.deployment_levels().unwrap(),
            vec![vec!["A"], vec!["B"], vec!["C"]]
        );
        assert_eq!(g.deletion_order().unwrap(), vec!["C", "B", "A"]);
    }

    #[test]
    fn test_mutual_dependency_is_a_cycle() {
        let g = graph(&[res("A", &["B"]), res("B", &["A"])]);
        assert_eq!(g.detect_cycles(), vec![vec!["A".to_string(), "B".to_string()]]);

        match g.topological_order() {
            Err(GraphError::CyclicGraph { cycle }) => assert_eq!(cycle, vec!["A", "B"]),
            other => panic!("expected cycle error, got {:?}", other),
        }
        assert!(matches!(
            g.deployment_levels(),
            Err(GraphError::CyclicGraph { .. })
        ));
    }

    #[test]
    fn test_independent_cycles_are_each_reported() {
        let g = graph(&[
            res("a", &["b"]),
            res("b", &["c"]),
            res("c", &["a"]),
            res("x", &["y"]),
            res("y", &["x"]),
            res("z", &["a"]),
        ]);
        let cycles = g.detect_cycles();
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0], vec!["a", "b", "c"]);
        assert_eq!(cycles[1], vec!["x", "y"]);
        for cycle in &cycles {
            for from in cycle {
                for to in cycle {
                    assert!(g.is_reachable(from, to).unwrap());
                }
            }
        }
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let mut r = ResourceState::new("solo", "vpc");
        r.dependencies.push("solo".into());
        let g = graph(&[r]);
        assert_eq!(g.detect_cycles(), vec![vec!["solo".to_string()]]);
    }

    #[test]
    fn test_lexicographic_tie_break() {
        let g = graph(&[
            res("web", &["vpc"]),
            res("db", &["vpc"]),
            res("vpc", &[]),
            res("cache", &[]),
        ]);
        assert_eq!(
            g.topological_order().unwrap(),
            vec!["cache", "vpc", "db", "web"]
        );
        assert_eq!(
            g.deployment_levels().unwrap(),
            vec![vec!["cache", "vpc"], vec!["db", "web"]]
        );
    }

    #[test]
    fn test_diamond_levels_respect_longest_path() {
        let g = graph(&[
            res("vpc", &[]),
            res("subnet", &["vpc"]),
            res("sg", &["vpc"]),
            res("instance", &["subnet", "sg", "vpc"]),
            res("alarm", &["instance"]),
        ]);
        let order = g.topological_order().unwrap();
        assert_respects_dependencies(&g, &order);

        let levels = g.deployment_levels().unwrap();
        assert_eq!(
            levels,
            vec![
                vec!["vpc".to_string()],
                vec!["sg".to_string(), "subnet".to_string()],
                vec!["instance".to_string()],
                vec!["alarm".to_string()],
            ]
        );
        let flattened: Vec<String> = levels.into_iter().flatten().collect();
        assert_respects_dependencies(&g, &flattened);
    }

    #[test]
    fn test_empty_graph_is_valid() {
        let g = graph(&[]);
        assert!(g.topological_order().unwrap().is_empty());
        assert!(g.deployment_levels().unwrap().is_empty());
        assert!(g.detect_cycles().is_empty());
    }

    #[test]
    fn test_dangling_edges_are_reported_not_fatal() {
        let g = graph(&[res("subnet", &["vpc-gone"]), res("sg", &[])]);
        assert_eq!(
            g.dangling_edges(),
            &[DanglingEdge {
                from: "subnet".into(),
                to: "vpc-gone".into()
            }]
        );
        assert_eq!(g.edge_count(), 0);
        assert_eq!(g.topological_order().unwrap(), vec!["sg", "subnet"]);
    }

    #[test]
    fn test_deployment_order_for_targets() {
        let g = graph(&[
            res("vpc", &[]),
            res("subnet", &["vpc"]),
            res("instance", &["subnet"]),
            res("bucket", &[]),
        ]);
        assert_eq!(
            g.deployment_order(&["instance"]).unwrap(),
            vec!["vpc", "subnet", "instance"]
        );
        assert_eq!(g.deployment_order::<&str>(&[]).unwrap().len(), 4);
        assert_eq!(
            g.deployment_order(&["nope"]),
            Err(GraphError::UnknownNode("nope".into()))
        );
    }

    #[test]
    fn test_targets_outside_a_cycle_still_order() {
        let g = graph(&[
            res("a", &["b"]),
            res("b", &["a"]),
            res("vpc", &[]),
            res("subnet", &["vpc"]),
        ]);
        assert_eq!(g.deployment_order(&["subnet"]).unwrap(), vec!["vpc", "subnet"]);
        assert!(matches!(
            g.deployment_order(&["a"]),
            Err(GraphError::CyclicGraph { .. })
        ));
    }

    #[test]
    fn test_reachability() {
        let g = graph(&[res("vpc", &[]), res("subnet", &["vpc"]), res("instance", &["subnet"])]);
        assert!(g.is_reachable("instance", "vpc").unwrap());
        assert!(!g.is_reachable("vpc", "instance").unwrap());
        assert!(g.is_reachable("vpc", "vpc").unwrap());
        assert!(matches!(
            g.is_reachable("vpc", "ghost"),
            Err(GraphError::UnknownNode(_))
        ));
        assert_eq!(g.transitive_dependents("vpc").unwrap(), vec!["instance", "subnet"]);
        assert_eq!(g.transitive_dependencies("instance").unwrap(), vec!["subnet", "vpc"]);
        assert_eq!(g.get_dependents("vpc").unwrap(), vec!["subnet"]);
        assert_eq!(g.get_dependencies("instance").unwrap(), vec!["subnet"]);
    }

    #[test]
    fn test_critical_path_follows_longest_chain() {
        let g = graph(&[
            res("vpc", &[]),
            res("subnet", &["vpc"]),
            res("instance", &["subnet", "vpc"]),
        ]);
        assert_eq!(
            g.critical_path("instance").unwrap(),
            vec!["vpc", "subnet", "instance"]
        );
        assert_eq!(g.critical_path("vpc").unwrap(), vec!["vpc"]);
    }

    #[test]
    fn test_implicit_edges_from_properties() {
        let resources = vec![
            ResourceState::new("vpc-1", "vpc"),
            ResourceState::new("subnet-1", "subnet").with_property("vpc_id", json!("vpc-1")),
            ResourceState::new("i-1", "ec2-instance")
                .with_property("subnet_id", json!("subnet-1"))
                .with_property("security_groups", json!("sg-missing")),
        ];
        let g = GraphBuilder::new()
            .implicit_rules(ImplicitRules::aws_defaults())
            .build(&resources);

        assert_eq!(g.implicit_edge_count(), 2);
        assert!(g.dangling_edges().is_empty());
        assert_eq!(
            g.topological_order().unwrap(),
            vec!["vpc-1", "subnet-1", "i-1"]
        );
    }

    #[test]
    fn test_large_chain_terminates() {
        let resources: Vec<ResourceState> = (0..5000)
            .map(|i| {
                let r = ResourceState::new(format!("n{:05}", i), "vpc");
                if i == 0 {
                    r
                } else {
                    r.with_dependency(format!("n{:05}", i - 1))
                }
            })
            .collect();
        let g = graph(&resources);
        assert!(g.detect_cycles().is_empty());
        assert_eq!(g.topological_order().unwrap().len(), 5000);
        assert_eq!(g.deployment_levels().unwrap().len(), 5000);
    }
}
