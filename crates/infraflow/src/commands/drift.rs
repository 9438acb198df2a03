use crate::context::Context;
use crate::utils;
use colored::Colorize;
use infraflow_state::{ChangeDetection, ChangeKind};
use std::path::Path;

pub fn print_detection(detection: &ChangeDetection) {
    println!(
        "{} {} ({}), severity {}",
        "Drift in".bold(),
        detection.resource_id.cyan(),
        detection.resource_type,
        utils::severity_colored(detection.severity)
    );
    for (field, change) in &detection.diff {
        let old = change.old.as_ref().map(utils::value_display);
        let new = change.new.as_ref().map(utils::value_display);
        let line = match change.kind {
            ChangeKind::Added => format!("+ {} = {}", field, new.unwrap_or_default()).green(),
            ChangeKind::Removed => format!("- {} = {}", field, old.unwrap_or_default()).red(),
            ChangeKind::Modified => format!(
                "~ {}: {} -> {}",
                field,
                old.unwrap_or_default(),
                new.unwrap_or_default()
            )
            .yellow(),
        };
        println!("    {} [{}]", line, change.severity);
    }
}

pub fn handle(ctx: &Context, id: &str, actual: &Path) -> anyhow::Result<()> {
    let observed = utils::read_properties(actual)?;
    match ctx.store.detect_drift(&observed, id)? {
        Some(detection) => print_detection(&detection),
        None => println!("{} {} matches its recorded state", "✓".green(), id.cyan()),
    }
    Ok(())
}
