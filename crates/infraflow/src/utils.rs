use anyhow::Context as _;
use colored::{ColoredString, Colorize};
use infraflow_state::{Properties, ResourceStatus, Severity};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

fn split_pair(raw: &str) -> anyhow::Result<(&str, &str)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Expected KEY=VALUE, got '{}'", raw))?;
    let key = key.trim();
    anyhow::ensure!(!key.is_empty(), "Empty key in '{}'", raw);
    Ok((key, value))
}

/// `KEY=VALUE` where VALUE is JSON when it parses as JSON, else a string
pub fn parse_properties(raw: &[String]) -> anyhow::Result<Properties> {
    raw.iter()
        .map(|pair| {
            let (key, value) = split_pair(pair)?;
            let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
            Ok((key.to_string(), value))
        })
        .collect()
}

pub fn parse_tags(raw: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    raw.iter()
        .map(|pair| {
            let (key, value) = split_pair(pair)?;
            Ok((key.to_string(), value.to_string()))
        })
        .collect()
}

pub fn parse_status(raw: &str) -> anyhow::Result<ResourceStatus> {
    raw.parse()
        .map_err(|_| anyhow::anyhow!("Unknown status '{}' (created, updating, deleting, error, unknown)", raw))
}

/// Observed properties: a JSON object, or `{"properties": {...}}`
pub fn read_properties(path: &Path) -> anyhow::Result<Properties> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    let object = match value {
        Value::Object(mut map) => match map.remove("properties") {
            Some(Value::Object(inner)) if map.is_empty() => inner,
            Some(other) => {
                map.insert("properties".to_string(), other);
                map
            }
            None => map,
        },
        _ => anyhow::bail!("{} must hold a JSON object", path.display()),
    };
    Ok(object.into_iter().collect())
}

pub fn status_colored(status: ResourceStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        ResourceStatus::Created => text.green(),
        ResourceStatus::Updating => text.yellow(),
        ResourceStatus::Deleting => text.magenta(),
        ResourceStatus::Error => text.red(),
        ResourceStatus::Unknown => text.dimmed(),
    }
}

pub fn severity_colored(severity: Severity) -> ColoredString {
    let text = severity.to_string();
    match severity {
        Severity::Low => text.normal(),
        Severity::Medium => text.yellow(),
        Severity::High => text.red().bold(),
    }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn value_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
