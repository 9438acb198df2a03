//! Graph analysis and rendering

use crate::graph::DependencyGraph;
use infraflow_state::normalize_type;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

/// Dependent count at which a node is reported as a bottleneck
pub const DEFAULT_BOTTLENECK_THRESHOLD: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphComplexity {
    pub total_nodes: usize,
    pub total_edges: usize,
    pub max_dependencies: usize,
    pub max_dependents: usize,
    /// Edges over the maximum possible `n * (n - 1)`
    pub density: f64,
    pub cycle_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ImpactLevel {
    pub fn from_dependent_count(count: usize) -> Self {
        match count {
            c if c >= 10 => ImpactLevel::Critical,
            c if c >= 5 => ImpactLevel::High,
            c if c >= 3 => ImpactLevel::Medium,
            _ => ImpactLevel::Low,
        }
    }
}

impl std::fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImpactLevel::Low => write!(f, "low"),
            ImpactLevel::Medium => write!(f, "medium"),
            ImpactLevel::High => write!(f, "high"),
            ImpactLevel::Critical => write!(f, "critical"),
        }
    }
}

/// A node many others directly depend on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bottleneck {
    pub resource_id: String,
    pub resource_type: String,
    pub dependent_count: usize,
    pub dependents: Vec<String>,
    pub impact: ImpactLevel,
}

impl DependencyGraph {
    pub fn complexity(&self) -> GraphComplexity {
        let n = self.node_count();
        let total_edges = self.edge_count();
        let max_possible = n.saturating_mul(n.saturating_sub(1));
        let density = if max_possible > 0 {
            total_edges as f64 / max_possible as f64
        } else {
            0.0
        };

        GraphComplexity {
            total_nodes: n,
            total_edges,
            max_dependencies: (0..n).map(|i| self.out_degree(i)).max().unwrap_or(0),
            max_dependents: (0..n).map(|i| self.in_degree(i)).max().unwrap_or(0),
            density,
            cycle_count: self.detect_cycles().len(),
        }
    }

    /// Nodes with at least `threshold` direct dependents, most depended-on first
    pub fn bottlenecks(&self, threshold: usize) -> Vec<Bottleneck> {
        let mut found: Vec<Bottleneck> = self
            .nodes()
            .iter()
            .enumerate()
            .filter(|(i, _)| self.in_degree(*i) >= threshold.max(1))
            .map(|(i, node)| Bottleneck {
                resource_id: node.id.clone(),
                resource_type: node.resource_type.clone(),
                dependent_count: self.in_degree(i),
                dependents: self.get_dependents(&node.id).unwrap_or_default(),
                impact: ImpactLevel::from_dependent_count(self.in_degree(i)),
            })
            .collect();
        found.sort_by(|a, b| {
            b.dependent_count
                .cmp(&a.dependent_count)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        found
    }

    /// Human-readable listing grouped by resource type
    pub fn render_text(&self) -> String {
        let mut by_type: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for node in self.nodes() {
            by_type
                .entry(node.resource_type.as_str())
                .or_default()
                .push(node.id.as_str());
        }

        let mut out = String::new();
        let _ = writeln!(out, "Infrastructure Dependency Graph");
        let _ = writeln!(out, "Total resources: {}", self.node_count());
        let _ = writeln!(out, "Total dependencies: {}", self.edge_count());

        for (resource_type, ids) in by_type {
            let _ = writeln!(out);
            let _ = writeln!(out, "{} ({}):", resource_type, ids.len());
            for id in ids {
                let _ = writeln!(out, "  - {}", id);
                let deps = self.get_dependencies(id).unwrap_or_default();
                if !deps.is_empty() {
                    let _ = writeln!(out, "    depends on: {}", deps.join(", "));
                }
                let dependents = self.get_dependents(id).unwrap_or_default();
                if !dependents.is_empty() {
                    let _ = writeln!(out, "    required by: {}", dependents.join(", "));
                }
            }
        }

        if !self.dangling_edges().is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "Dangling dependencies:");
            for edge in self.dangling_edges() {
                let _ = writeln!(out, "  - {} -> {} (missing)", edge.from, edge.to);
            }
        }
        out
    }

    /// Mermaid flowchart, one arrow per dependency edge
    pub fn render_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");
        for node in self.nodes() {
            let label = if node.name.is_empty() || node.name == node.id {
                node.id.clone()
            } else {
                format!("{}<br/>({})", node.name, node.id)
            };
            let _ = writeln!(
                out,
                "    {}[\"{}\"]{}",
                mermaid_id(&node.id),
                label.replace('"', "'"),
                mermaid_class(&node.resource_type)
            );
        }

        let mut edges = self.edges().peekable();
        if edges.peek().is_some() {
            out.push('\n');
        }
        for (from, to) in edges {
            let _ = writeln!(out, "    {} --> {}", mermaid_id(from), mermaid_id(to));
        }

        out.push('\n');
        for (class, fill) in [
            ("network", "#e1f5fe"),
            ("compute", "#fff3e0"),
            ("security", "#f3e5f5"),
            ("balancer", "#e8f5e8"),
            ("database", "#fce4ec"),
        ] {
            let _ = writeln!(out, "    classDef {} fill:{}", class, fill);
        }
        out
    }
}

fn mermaid_id(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn mermaid_class(resource_type: &str) -> &'static str {
    match normalize_type(resource_type).as_str() {
        "vpc" | "subnet" | "route-table" | "internet-gateway" | "nat-gateway" => ":::network",
        "ec2-instance" | "auto-scaling-group" | "launch-template" => ":::compute",
        "security-group" | "network-acl" => ":::security",
        "load-balancer" | "target-group" => ":::balancer",
        "db-instance" | "db-subnet-group" => ":::database",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infraflow_state::ResourceState;

    fn hub_and_spokes(spokes: usize) -> DependencyGraph {
        let mut resources = vec![ResourceState::new("vpc-main", "vpc")];
        for i in 0..spokes {
            resources.push(
                ResourceState::new(format!("subnet-{}", i), "subnet").with_dependency("vpc-main"),
            );
        }
        DependencyGraph::build(&resources)
    }

    #[test]
    fn test_impact_thresholds() {
        assert_eq!(ImpactLevel::from_dependent_count(2), ImpactLevel::Low);
        assert_eq!(ImpactLevel::from_dependent_count(3), ImpactLevel::Medium);
        assert_eq!(ImpactLevel::from_dependent_count(5), ImpactLevel::High);
        assert_eq!(ImpactLevel::from_dependent_count(10), ImpactLevel::Critical);
    }

    #[test]
    fn test_bottlenecks() {
        let g = hub_and_spokes(5);
        let found = g.bottlenecks(DEFAULT_BOTTLENECK_THRESHOLD);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].resource_id, "vpc-main");
        assert_eq!(found[0].dependent_count, 5);
        assert_eq!(found[0].impact, ImpactLevel::High);

        assert!(hub_and_spokes(2).bottlenecks(DEFAULT_BOTTLENECK_THRESHOLD).is_empty());
    }

    #[test]
    fn test_complexity() {
        let c = hub_and_spokes(3).complexity();
        assert_eq!(c.total_nodes, 4);
        assert_eq!(c.total_edges, 3);
        assert_eq!(c.max_dependents, 3);
        assert_eq!(c.max_dependencies, 1);
        assert!((c.density - 0.25).abs() < f64::EPSILON);
        assert_eq!(c.cycle_count, 0);

        let empty = DependencyGraph::default().complexity();
        assert_eq!(empty.density, 0.0);
    }

    #[test]
    fn test_render_text() {
        let text = hub_and_spokes(1).render_text();
        assert!(text.contains("Total resources: 2"));
        assert!(text.contains("subnet (1):"));
        assert!(text.contains("    depends on: vpc-main"));
        assert!(text.contains("    required by: subnet-0"));
    }

    #[test]
    fn test_render_mermaid() {
        let resources = vec![
            ResourceState::new("vpc-1", "vpc").with_name("main"),
            ResourceState::new("arn:aws:sg/1", "security_group").with_dependency("vpc-1"),
        ];
        let mermaid = DependencyGraph::build(&resources).render_mermaid();
        assert!(mermaid.starts_with("graph TD\n"));
        assert!(mermaid.contains("    vpc_1[\"main<br/>(vpc-1)\"]:::network"));
        assert!(mermaid.contains("    arn_aws_sg_1[\"arn:aws:sg/1\"]:::security"));
        assert!(mermaid.contains("    arn_aws_sg_1 --> vpc_1"));
    }
}
