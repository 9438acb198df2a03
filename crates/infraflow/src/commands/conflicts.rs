use super::plan::managed_graph;
use crate::context::Context;
use crate::utils;
use colored::Colorize;
use infraflow_conflict::{Conflict, ConflictImpact, ConflictType, RiskLevel};
use infraflow_engine::setup;

fn print_conflict(conflict: &Conflict) {
    println!(
        "{} {} {}",
        format!("[{}]", conflict.conflict_type).yellow(),
        conflict.resource_id.cyan(),
        conflict.details
    );
    match &conflict.resolution {
        Some(resolution) => println!(
            "    {} {} (confidence {:.2}{})",
            "→".green(),
            resolution.action,
            resolution.confidence,
            if resolution.redeploy { ", redeploy" } else { "" }
        ),
        None => println!("    {}", "needs manual resolution".dimmed()),
    }
}

pub async fn handle(ctx: &Context, auto_resolve: bool, apply: bool, json: bool) -> anyhow::Result<()> {
    let resolver = setup::conflict_resolver(&ctx.config.conflict);
    let graph = managed_graph(ctx);
    let resources = ctx.store.snapshot();
    let mut conflicts = resolver.detect_conflicts_in(&resources, &graph);

    let failures = if auto_resolve {
        resolver.auto_resolve_conflicts(&mut conflicts)
    } else {
        Vec::new()
    };

    if json {
        utils::print_json(&conflicts)?;
    } else if conflicts.is_empty() {
        println!("{}", "✓ No conflicts".green());
    } else {
        println!("{}", format!("{} conflict(s):", conflicts.len()).bold());
        for conflict in &conflicts {
            print_conflict(conflict);
        }
        for failure in &failures {
            println!("{} {}", "⚠".yellow(), failure);
        }
    }

    if apply {
        let summary = ctx.offline_reconciler().apply_resolutions(&conflicts).await?;
        if !json {
            println!();
            println!(
                "{} {} resource(s) updated, {} conflict(s) left for manual resolution",
                "✓".green(),
                summary.applied.len(),
                summary.unresolved
            );
        }
    }
    Ok(())
}

fn print_impact(impact: &ConflictImpact) {
    let level = match impact.risk_level {
        RiskLevel::Low => impact.risk_level.to_string().green(),
        RiskLevel::Medium => impact.risk_level.to_string().yellow(),
        RiskLevel::High => impact.risk_level.to_string().red(),
        RiskLevel::Critical => impact.risk_level.to_string().red().bold(),
    };
    println!("  risk:     {} ({}/100)", level, impact.risk_score);
    if impact.affected.is_empty() {
        println!("  affected: {}", "none".dimmed());
    } else {
        println!("  affected: {}", impact.affected.join(", "));
    }
    if !impact.stateful.is_empty() {
        println!("  stateful: {}", impact.stateful.join(", ").yellow());
    }
    for recommendation in &impact.recommendations {
        println!("  - {}", recommendation);
    }
}

/// Impact of every conflict involving `id`, or of changing `id` when it is
/// not in conflict
pub fn impact(ctx: &Context, id: &str) -> anyhow::Result<()> {
    ctx.store.get_resource(id)?;
    let resolver = setup::conflict_resolver(&ctx.config.conflict);
    let graph = managed_graph(ctx);
    let resources = ctx.store.snapshot();

    let involved: Vec<Conflict> = resolver
        .detect_conflicts_in(&resources, &graph)
        .into_iter()
        .filter(|c| c.involved_ids().any(|i| i == id))
        .collect();

    if involved.is_empty() {
        let change = Conflict::new(id, ConflictType::Other, format!("change to {}", id));
        println!("{} {}", "Impact of changing".bold(), id.cyan());
        print_impact(&resolver.analyze_impact(&change, &graph));
        return Ok(());
    }

    for conflict in &involved {
        print_conflict(conflict);
        print_impact(&resolver.analyze_impact(conflict, &graph));
    }
    Ok(())
}
