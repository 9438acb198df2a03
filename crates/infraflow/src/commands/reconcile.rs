use super::drift::print_detection;
use crate::context::Context;
use crate::utils;
use colored::Colorize;
use infraflow_engine::ReconcileReport;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Cancel on Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    cancel
}

fn print_report(report: &ReconcileReport) {
    let correlation = &report.correlation;
    println!(
        "{} {} managed, {} live",
        "Reconciliation:".bold(),
        report.managed,
        report.discovered
    );
    for failure in &report.scan_failures {
        println!(
            "{} listing {} failed: {}",
            "⚠".yellow(),
            failure.resource_type.as_deref().unwrap_or("all types"),
            failure.error
        );
    }

    println!();
    println!("{}", "Correlation".bold());
    for (pairing, live) in correlation.matched() {
        println!(
            "  {} {} <- {} [{}, {:.2}]",
            "=".green(),
            pairing.managed_id.cyan(),
            live.id,
            pairing.basis,
            pairing.confidence
        );
    }
    for id in &correlation.ambiguous {
        let candidates = correlation
            .get(id)
            .map(|c| c.candidates.join(", "))
            .unwrap_or_default();
        println!("  {} {} ambiguous: {}", "?".yellow(), id.cyan(), candidates);
    }
    for id in &correlation.missing {
        println!("  {} {} missing from the live environment", "-".red(), id.cyan());
    }
    for id in &report.unverified {
        println!("  {} {} unverified, its listing failed", "?".yellow(), id.cyan());
    }
    for live in &correlation.unmanaged {
        println!(
            "  {} {} ({}) unmanaged",
            "+".blue(),
            live.id,
            live.resource_type
        );
    }

    println!();
    println!("{}", "Deployment".bold());
    if report.plan.is_deployable() {
        for (i, level) in report.plan.levels.iter().enumerate() {
            println!("  level {}: {}", i, level.join(", "));
        }
    } else {
        for cycle in &report.plan.cycles {
            println!("  {} cycle: {}", "✗".red(), cycle.join(" -> "));
        }
    }

    if !report.drift.is_empty() {
        println!();
        for detection in &report.drift {
            print_detection(detection);
        }
    }

    if !report.conflicts.is_empty() {
        println!();
        println!("{}", "Conflicts".bold());
        for conflict in &report.conflicts {
            let resolution = conflict
                .resolution
                .as_ref()
                .map(|r| format!(" -> {}", r.action))
                .unwrap_or_default();
            println!(
                "  [{}] {}{}",
                conflict.conflict_type,
                conflict.details,
                resolution.green()
            );
        }
    }

    println!();
    if report.is_clean() {
        println!("{}", "✓ In sync".green().bold());
    } else {
        println!("{}", "Attention needed".yellow().bold());
    }
}

pub async fn handle(ctx: &Context, live: &Path, json: bool) -> anyhow::Result<()> {
    let reconciler = ctx.reconciler(live)?;
    let report = reconciler.run(&cancel_on_interrupt()).await?;
    if json {
        utils::print_json(&report)
    } else {
        print_report(&report);
        Ok(())
    }
}

pub async fn adopt(ctx: &Context, live: &Path, ids: &[String]) -> anyhow::Result<()> {
    let reconciler = ctx.reconciler(live)?;
    let adopted = reconciler.adopt(ids, &cancel_on_interrupt()).await?;
    for resource in &adopted {
        println!(
            "{} {} ({})",
            "✓ Adopted".green(),
            resource.id.cyan(),
            resource.resource_type
        );
    }
    Ok(())
}
