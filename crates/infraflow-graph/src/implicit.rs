//! Implicit dependency rules
//!
//! Some dependencies are never declared but are implied by reference-bearing
//! properties, e.g. an instance's `subnet_id`. Rules are keyed by resource
//! type and list the property names holding references.

use infraflow_state::{ResourceState, normalize_type};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ImplicitRules {
    rules: HashMap<String, Vec<String>>,
}

impl ImplicitRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule<I, S>(mut self, resource_type: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules
            .entry(normalize_type(resource_type))
            .or_default()
            .extend(keys.into_iter().map(Into::into));
        self
    }

    /// Reference properties of the common AWS resource kinds
    pub fn aws_defaults() -> Self {
        Self::new()
            .with_rule(
                "ec2-instance",
                ["vpc_id", "subnet_id", "security_groups", "security_group_ids"],
            )
            .with_rule("security-group", ["vpc_id"])
            .with_rule("subnet", ["vpc_id"])
            .with_rule("internet-gateway", ["vpc_id"])
            .with_rule("route-table", ["vpc_id"])
            .with_rule("nat-gateway", ["subnet_id"])
            .with_rule("load-balancer", ["vpc_id", "subnets", "security_groups"])
            .with_rule("target-group", ["vpc_id"])
            .with_rule(
                "auto-scaling-group",
                ["launch_template_id", "vpc_zone_identifier", "target_group_arns"],
            )
            .with_rule("db-subnet-group", ["subnet_ids"])
            .with_rule(
                "db-instance",
                ["db_subnet_group", "db_subnet_group_name", "vpc_security_group_ids"],
            )
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// IDs referenced by the resource's rule properties, in rule order
    pub fn references(&self, resource: &ResourceState) -> Vec<String> {
        let Some(keys) = self.rules.get(&normalize_type(&resource.resource_type)) else {
            return Vec::new();
        };

        let mut refs = Vec::new();
        for key in keys {
            if let Some(value) = resource.properties.get(key) {
                for id in reference_values(value) {
                    if !refs.contains(&id) {
                        refs.push(id);
                    }
                }
            }
        }
        refs
    }
}

/// Strings, comma-separated strings and arrays of strings
fn reference_values(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        Value::Array(items) => items.iter().flat_map(reference_values).collect(),
        _ => Vec::new(),
    }
}
