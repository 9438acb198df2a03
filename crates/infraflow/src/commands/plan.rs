use crate::GraphFormat;
use crate::context::Context;
use colored::Colorize;
use infraflow_graph::{DEFAULT_BOTTLENECK_THRESHOLD, DependencyGraph};

/// Graph over the managed resources, honouring `engine.implicit_dependencies`
pub fn managed_graph(ctx: &Context) -> DependencyGraph {
    ctx.offline_reconciler().managed_graph()
}

fn warn_dangling(graph: &DependencyGraph) {
    for edge in graph.dangling_edges() {
        eprintln!(
            "{} {} depends on {}, which is not managed",
            "⚠".yellow(),
            edge.from,
            edge.to.yellow()
        );
    }
}

pub fn order(ctx: &Context, targets: &[String], reverse: bool) -> anyhow::Result<()> {
    let graph = managed_graph(ctx);
    warn_dangling(&graph);

    let mut order = graph.deployment_order(targets)?;
    if reverse {
        order.reverse();
    }
    if order.is_empty() {
        println!("{}", "No resources".dimmed());
        return Ok(());
    }
    for (i, id) in order.iter().enumerate() {
        let resource_type = graph
            .node(id)
            .map(|n| n.resource_type.as_str())
            .unwrap_or_default();
        println!("{:>3}. {} {}", i + 1, id.cyan(), format!("({})", resource_type).dimmed());
    }
    Ok(())
}

pub fn levels(ctx: &Context) -> anyhow::Result<()> {
    let graph = managed_graph(ctx);
    warn_dangling(&graph);

    for (i, level) in graph.deployment_levels()?.iter().enumerate() {
        println!("{} {}", format!("Level {}:", i).bold(), level.join(", "));
    }
    Ok(())
}

pub fn cycles(ctx: &Context) {
    let cycles = managed_graph(ctx).detect_cycles();
    if cycles.is_empty() {
        println!("{}", "✓ No dependency cycles".green());
        return;
    }
    println!("{}", format!("{} cycle(s) found:", cycles.len()).red().bold());
    for cycle in &cycles {
        let mut path = cycle.clone();
        if let Some(first) = cycle.first() {
            path.push(first.clone());
        }
        println!("  {}", path.join(" -> "));
    }
}

pub fn graph(ctx: &Context, format: GraphFormat) {
    let graph = managed_graph(ctx);
    match format {
        GraphFormat::Text => print!("{}", graph.render_text()),
        GraphFormat::Mermaid => print!("{}", graph.render_mermaid()),
        GraphFormat::Stats => {
            let stats = graph.complexity();
            println!("{}", "Graph statistics".bold());
            println!("  nodes:            {}", stats.total_nodes);
            println!("  edges:            {}", stats.total_edges);
            println!("  implicit edges:   {}", graph.implicit_edge_count());
            println!("  max dependencies: {}", stats.max_dependencies);
            println!("  max dependents:   {}", stats.max_dependents);
            println!("  density:          {:.3}", stats.density);
            println!("  cycles:           {}", stats.cycle_count);

            let bottlenecks = graph.bottlenecks(DEFAULT_BOTTLENECK_THRESHOLD);
            if !bottlenecks.is_empty() {
                println!();
                println!("{}", "Bottlenecks".bold());
                for b in bottlenecks {
                    println!(
                        "  {} ({}) {} dependents, impact {}",
                        b.resource_id.cyan(),
                        b.resource_type,
                        b.dependent_count,
                        b.impact
                    );
                }
            }
        }
    }
}
