//! Network rule model and the rule-overlap policy
//!
//! Two kinds of overlap are reported by the default policy:
//!
//! - address space: two networks of the same type in the same scope (a VPC's
//!   region, a subnet's VPC) whose CIDR blocks intersect
//! - rule precedence: rules from two different resources in the same VPC
//!   whose protocol, port range and CIDR all intersect while one allows and
//!   the other denies
//!
//! The policy is a trait so deployments can swap in stricter or looser
//! predicates.

use infraflow_state::{ResourceState, normalize_type};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;

/// An IPv4 or IPv6 CIDR block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cidr {
    network: u128,
    prefix: u8,
    v6: bool,
}

impl Cidr {
    fn width(&self) -> u8 {
        if self.v6 { 128 } else { 32 }
    }

    fn mask(width: u8, prefix: u8) -> u128 {
        if prefix == 0 {
            0
        } else {
            let all = if width == 128 { u128::MAX } else { u128::from(u32::MAX) };
            (all << (width - prefix)) & all
        }
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Whether the two blocks share at least one address
    pub fn overlaps(&self, other: &Cidr) -> bool {
        if self.v6 != other.v6 {
            return false;
        }
        let mask = Self::mask(self.width(), self.prefix.min(other.prefix));
        self.network & mask == other.network & mask
    }
}

impl FromStr for Cidr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, prefix) = match s.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s.trim(), None),
        };
        let ip: IpAddr = addr
            .parse()
            .map_err(|_| format!("Invalid CIDR address: {}", s))?;
        let (bits, v6, width) = match ip {
            IpAddr::V4(v4) => (u128::from(u32::from(v4)), false, 32u8),
            IpAddr::V6(v6) => (u128::from(v6), true, 128u8),
        };
        let prefix = match prefix {
            Some(p) => p
                .parse::<u8>()
                .ok()
                .filter(|p| *p <= width)
                .ok_or_else(|| format!("Invalid CIDR prefix: {}", s))?,
            None => width,
        };
        Ok(Cidr {
            network: bits & Self::mask(width, prefix),
            prefix,
            v6,
        })
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.v6 {
            write!(f, "{}/{}", std::net::Ipv6Addr::from(self.network), self.prefix)
        } else {
            write!(
                f,
                "{}/{}",
                std::net::Ipv4Addr::from(self.network as u32),
                self.prefix
            )
        }
    }
}

/// Inclusive port range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub const ALL: PortRange = PortRange { from: 0, to: u16::MAX };

    pub fn overlaps(&self, other: &PortRange) -> bool {
        self.from <= other.to && other.from <= self.to
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
}

/// One network rule extracted from a resource's properties
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkRule {
    pub direction: Direction,
    pub action: RuleAction,
    /// `None` means every protocol
    pub protocol: Option<String>,
    pub ports: PortRange,
    pub cidr: Cidr,
}

impl NetworkRule {
    pub fn overlaps(&self, other: &NetworkRule) -> bool {
        self.direction == other.direction
            && match (&self.protocol, &other.protocol) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
            && self.ports.overlaps(&other.ports)
            && self.cidr.overlaps(&other.cidr)
    }
}

fn as_u16(value: &Value) -> Option<u16> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn ports_of(rule: &serde_json::Map<String, Value>) -> PortRange {
    if let (Some(from), Some(to)) = (
        rule.get("from_port").and_then(as_u16),
        rule.get("to_port").and_then(as_u16),
    ) {
        return PortRange {
            from: from.min(to),
            to: from.max(to),
        };
    }
    if let Some(port) = rule.get("port").and_then(as_u16) {
        return PortRange { from: port, to: port };
    }
    if let Some((from, to)) = rule
        .get("ports")
        .and_then(Value::as_str)
        .and_then(|s| s.split_once('-'))
        && let (Ok(from), Ok(to)) = (from.trim().parse::<u16>(), to.trim().parse::<u16>())
    {
        return PortRange {
            from: from.min(to),
            to: from.max(to),
        };
    }
    PortRange::ALL
}

fn protocol_of(rule: &serde_json::Map<String, Value>) -> Option<String> {
    let raw = rule
        .get("protocol")
        .or_else(|| rule.get("ip_protocol"))
        .map(|v| match v {
            Value::String(s) => s.trim().to_ascii_lowercase(),
            other => other.to_string(),
        })?;
    match raw.as_str() {
        "-1" | "all" | "*" | "any" | "" => None,
        "6" => Some("tcp".into()),
        "17" => Some("udp".into()),
        "1" => Some("icmp".into()),
        _ => Some(raw),
    }
}

fn action_of(rule: &serde_json::Map<String, Value>) -> RuleAction {
    let raw = rule
        .get("action")
        .or_else(|| rule.get("rule_action"))
        .and_then(Value::as_str)
        .unwrap_or("allow");
    if raw.eq_ignore_ascii_case("deny") {
        RuleAction::Deny
    } else {
        RuleAction::Allow
    }
}

fn cidrs_of(rule: &serde_json::Map<String, Value>) -> Vec<Cidr> {
    let mut raw = Vec::new();
    for key in ["cidr_block", "cidr", "cidr_ipv4", "cidr_ipv6", "ipv6_cidr_block"] {
        if let Some(s) = rule.get(key).and_then(Value::as_str) {
            raw.push(s);
        }
    }
    if let Some(items) = rule.get("cidr_blocks").and_then(Value::as_array) {
        raw.extend(items.iter().filter_map(Value::as_str));
    }
    raw.into_iter().filter_map(|s| s.parse().ok()).collect()
}

fn push_rules(value: &Value, default_direction: Direction, out: &mut Vec<NetworkRule>) {
    let Some(items) = value.as_array() else {
        return;
    };
    for item in items {
        let Some(rule) = item.as_object() else {
            continue;
        };
        let direction = match (
            rule.get("egress").and_then(Value::as_bool),
            rule.get("direction").and_then(Value::as_str),
        ) {
            (Some(true), _) => Direction::Egress,
            (_, Some(d)) if d.eq_ignore_ascii_case("egress") || d.eq_ignore_ascii_case("outbound") => {
                Direction::Egress
            }
            (_, Some(d)) if d.eq_ignore_ascii_case("ingress") || d.eq_ignore_ascii_case("inbound") => {
                Direction::Ingress
            }
            _ => default_direction,
        };
        let action = action_of(rule);
        let protocol = protocol_of(rule);
        let ports = ports_of(rule);
        for cidr in cidrs_of(rule) {
            out.push(NetworkRule {
                direction,
                action,
                protocol: protocol.clone(),
                ports,
                cidr,
            });
        }
    }
}

/// Rules carried in `ingress`, `egress`, `rules` or `entries` properties.
/// Rules without a CIDR (e.g. referencing another group) are skipped.
pub fn extract_rules(resource: &ResourceState) -> Vec<NetworkRule> {
    let mut rules = Vec::new();
    if let Some(v) = resource.properties.get("ingress") {
        push_rules(v, Direction::Ingress, &mut rules);
    }
    if let Some(v) = resource.properties.get("egress") {
        push_rules(v, Direction::Egress, &mut rules);
    }
    for key in ["rules", "entries"] {
        if let Some(v) = resource.properties.get(key) {
            push_rules(v, Direction::Ingress, &mut rules);
        }
    }
    rules
}

/// Evidence of one overlap between two resources
#[derive(Debug, Clone, PartialEq)]
pub struct Overlap {
    pub details: String,
    pub evidence: BTreeMap<String, Value>,
}

/// Decides whether two resources overlap in a way that makes precedence
/// ambiguous.
pub trait OverlapPolicy: Send + Sync {
    fn overlap(&self, a: &ResourceState, b: &ResourceState) -> Option<Overlap>;
}

impl<F> OverlapPolicy for F
where
    F: Fn(&ResourceState, &ResourceState) -> Option<Overlap> + Send + Sync,
{
    fn overlap(&self, a: &ResourceState, b: &ResourceState) -> Option<Overlap> {
        self(a, b)
    }
}

/// Address-space and allow/deny overlap, as described in the module docs
#[derive(Debug, Clone, Default)]
pub struct CidrOverlapPolicy;

impl CidrOverlapPolicy {
    /// Scope a network's address space must be unique within
    fn network_scope(resource: &ResourceState) -> Option<(String, String)> {
        resource.property_str("cidr_block")?;
        let parent = resource
            .property_str("vpc_id")
            .or_else(|| resource.property_str("region"))
            .unwrap_or_default();
        Some((normalize_type(&resource.resource_type), parent.to_string()))
    }

    fn address_overlap(a: &ResourceState, b: &ResourceState) -> Option<Overlap> {
        let scope = Self::network_scope(a)?;
        if Self::network_scope(b)? != scope {
            return None;
        }
        let block_a: Cidr = a.property_str("cidr_block")?.parse().ok()?;
        let block_b: Cidr = b.property_str("cidr_block")?.parse().ok()?;
        if !block_a.overlaps(&block_b) {
            return None;
        }

        let mut evidence = BTreeMap::new();
        evidence.insert("kind".to_string(), json!("address-space"));
        evidence.insert("cidr_a".to_string(), json!(block_a.to_string()));
        evidence.insert("cidr_b".to_string(), json!(block_b.to_string()));
        if !scope.1.is_empty() {
            evidence.insert("scope".to_string(), json!(scope.1));
        }
        Some(Overlap {
            details: format!(
                "{} {} ({}) overlaps {} ({})",
                scope.0, a.id, block_a, b.id, block_b
            ),
            evidence,
        })
    }

    fn precedence_overlap(a: &ResourceState, b: &ResourceState) -> Option<Overlap> {
        let vpc = a.property_str("vpc_id").filter(|v| !v.is_empty())?;
        if b.property_str("vpc_id") != Some(vpc) {
            return None;
        }
        let rules_a = extract_rules(a);
        let rules_b = extract_rules(b);
        for ra in &rules_a {
            for rb in &rules_b {
                if ra.action != rb.action && ra.overlaps(rb) {
                    let (allow, deny) = if ra.action == RuleAction::Allow {
                        (&a.id, &b.id)
                    } else {
                        (&b.id, &a.id)
                    };
                    let mut evidence = BTreeMap::new();
                    evidence.insert("kind".to_string(), json!("rule-precedence"));
                    evidence.insert("vpc_id".to_string(), json!(vpc));
                    evidence.insert("cidr_a".to_string(), json!(ra.cidr.to_string()));
                    evidence.insert("cidr_b".to_string(), json!(rb.cidr.to_string()));
                    evidence.insert(
                        "ports".to_string(),
                        json!(format!(
                            "{}-{}",
                            ra.ports.from.max(rb.ports.from),
                            ra.ports.to.min(rb.ports.to)
                        )),
                    );
                    return Some(Overlap {
                        details: format!(
                            "{} allows traffic that {} denies ({} vs {})",
                            allow, deny, ra.cidr, rb.cidr
                        ),
                        evidence,
                    });
                }
            }
        }
        None
    }
}

impl OverlapPolicy for CidrOverlapPolicy {
    fn overlap(&self, a: &ResourceState, b: &ResourceState) -> Option<Overlap> {
        Self::address_overlap(a, b).or_else(|| Self::precedence_overlap(a, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cidr(s: &str) -> Cidr {
        s.parse().unwrap()
    }

    #[test]
    fn test_cidr_parse_and_normalize() {
        assert_eq!(cidr("10.0.1.7/16").to_string(), "10.0.0.0/16");
        assert_eq!(cidr("10.0.0.1").prefix(), 32);
        assert_eq!(cidr("2001:db8::1/32").to_string(), "2001:db8::/32");
        assert!("10.0.0.0/33".parse::<Cidr>().is_err());
        assert!("vpc-1".parse::<Cidr>().is_err());
    }

    #[test]
    fn test_cidr_overlap() {
        assert!(cidr("10.0.0.0/16").overlaps(&cidr("10.0.5.0/24")));
        assert!(cidr("0.0.0.0/0").overlaps(&cidr("192.168.1.1/32")));
        assert!(!cidr("10.0.0.0/16").overlaps(&cidr("10.1.0.0/16")));
        assert!(!cidr("10.0.0.0/8").overlaps(&cidr("::/0")));
        assert!(cidr("fd00::/8").overlaps(&cidr("fd12:3456::/32")));
    }

    #[test]
    fn test_port_overlap() {
        let http = PortRange { from: 80, to: 80 };
        let range = PortRange { from: 0, to: 1024 };
        assert!(http.overlaps(&range));
        assert!(!http.overlaps(&PortRange { from: 443, to: 443 }));
    }

    #[test]
    fn test_extract_rules_shapes() {
        let sg = ResourceState::new("sg-1", "security-group")
            .with_property(
                "ingress",
                json!([
                    {"protocol": "tcp", "from_port": 443, "to_port": 443, "cidr_blocks": ["0.0.0.0/0", "::/0"]},
                    {"protocol": "tcp", "port": 22, "source_security_group": "sg-bastion"}
                ]),
            )
            .with_property("egress", json!([{"protocol": "-1", "cidr_block": "0.0.0.0/0"}]));
        let rules = extract_rules(&sg);
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].ports, PortRange { from: 443, to: 443 });
        assert_eq!(rules[2].direction, Direction::Egress);
        assert_eq!(rules[2].protocol, None);
        assert_eq!(rules[2].ports, PortRange::ALL);
    }

    #[test]
    fn test_sibling_subnets_overlap() {
        let a = ResourceState::new("subnet-a", "subnet")
            .with_property("cidr_block", json!("10.0.0.0/24"))
            .with_property("vpc_id", json!("vpc-1"));
        let b = ResourceState::new("subnet-b", "subnet")
            .with_property("cidr_block", json!("10.0.0.128/25"))
            .with_property("vpc_id", json!("vpc-1"));
        let other_vpc = ResourceState::new("subnet-c", "subnet")
            .with_property("cidr_block", json!("10.0.0.0/24"))
            .with_property("vpc_id", json!("vpc-2"));

        let policy = CidrOverlapPolicy;
        let overlap = policy.overlap(&a, &b).unwrap();
        assert_eq!(overlap.evidence["kind"], json!("address-space"));
        assert!(policy.overlap(&a, &other_vpc).is_none());
    }

    #[test]
    fn test_vpc_inside_its_subnet_range_is_fine() {
        let vpc = ResourceState::new("vpc-1", "vpc").with_property("cidr_block", json!("10.0.0.0/16"));
        let subnet = ResourceState::new("subnet-a", "subnet")
            .with_property("cidr_block", json!("10.0.0.0/24"))
            .with_property("vpc_id", json!("vpc-1"));
        assert!(CidrOverlapPolicy.overlap(&vpc, &subnet).is_none());
    }

    #[test]
    fn test_allow_deny_precedence_overlap() {
        let sg = ResourceState::new("sg-web", "security-group")
            .with_property("vpc_id", json!("vpc-1"))
            .with_property(
                "ingress",
                json!([{"protocol": "tcp", "from_port": 80, "to_port": 443, "cidr_block": "0.0.0.0/0"}]),
            );
        let nacl = ResourceState::new("acl-1", "network-acl")
            .with_property("vpc_id", json!("vpc-1"))
            .with_property(
                "entries",
                json!([{"protocol": "6", "port": 443, "cidr_block": "203.0.113.0/24", "rule_action": "deny"}]),
            );
        let overlap = CidrOverlapPolicy.overlap(&sg, &nacl).unwrap();
        assert_eq!(overlap.evidence["kind"], json!("rule-precedence"));
        assert_eq!(overlap.evidence["ports"], json!("443-443"));
        assert!(overlap.details.starts_with("sg-web allows"));
    }

    #[test]
    fn test_two_allow_only_groups_never_conflict() {
        let rule = json!([{"protocol": "tcp", "port": 443, "cidr_block": "0.0.0.0/0"}]);
        let a = ResourceState::new("sg-a", "security-group")
            .with_property("vpc_id", json!("vpc-1"))
            .with_property("ingress", rule.clone());
        let b = ResourceState::new("sg-b", "security-group")
            .with_property("vpc_id", json!("vpc-1"))
            .with_property("ingress", rule);
        assert!(CidrOverlapPolicy.overlap(&a, &b).is_none());
    }
}
