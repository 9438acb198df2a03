use crate::context::Context;
use crate::utils;
use colored::Colorize;
use infraflow_state::{ResourceState, ResourceUpdate};

pub struct NewResource {
    pub id: String,
    pub resource_type: String,
    pub name: Option<String>,
    pub properties: Vec<String>,
    pub tags: Vec<String>,
    pub depends_on: Vec<String>,
    pub status: Option<String>,
}

pub async fn add(ctx: &Context, new: NewResource) -> anyhow::Result<()> {
    let mut resource = ResourceState::new(&new.id, &new.resource_type);
    if let Some(name) = new.name {
        resource = resource.with_name(name);
    }
    if let Some(status) = new.status.as_deref() {
        resource = resource.with_status(utils::parse_status(status)?);
    }
    resource.properties = utils::parse_properties(&new.properties)?;
    resource.tags = utils::parse_tags(&new.tags)?;
    for dependency in &new.depends_on {
        anyhow::ensure!(
            ctx.store.contains(dependency),
            "Dependency '{}' is not a managed resource",
            dependency
        );
        resource = resource.with_dependency(dependency.clone());
    }

    ctx.store.add_resource(resource)?;
    ctx.save().await?;

    println!(
        "{} {} ({})",
        "✓ Added".green(),
        new.id.cyan(),
        new.resource_type
    );
    Ok(())
}

pub async fn update(
    ctx: &Context,
    id: &str,
    name: Option<String>,
    description: Option<String>,
    properties: &[String],
    tags: &[String],
    status: Option<&str>,
) -> anyhow::Result<()> {
    let mut update = ResourceUpdate::new().properties(utils::parse_properties(properties)?);
    if let Some(name) = name {
        update = update.name(name);
    }
    if let Some(description) = description {
        update = update.description(description);
    }
    for (key, value) in utils::parse_tags(tags)? {
        update = update.tag(key, value);
    }
    if let Some(status) = status {
        update = update.status(utils::parse_status(status)?);
    }
    anyhow::ensure!(!update.is_empty(), "Nothing to update");

    let updated = ctx.store.update_resource(id, update)?;
    ctx.save().await?;

    println!(
        "{} {} ({})",
        "✓ Updated".green(),
        updated.id.cyan(),
        utils::status_colored(updated.status)
    );
    Ok(())
}

pub async fn remove(ctx: &Context, id: &str) -> anyhow::Result<()> {
    let dependents = ctx.store.get_dependents(id);
    let removed = ctx.store.remove_resource(id)?;
    ctx.save().await?;

    println!("{} {}", "✓ Removed".green(), removed.id.cyan());
    if !dependents.is_empty() {
        println!(
            "{} still depended on by: {}",
            "⚠".yellow(),
            dependents.join(", ").yellow()
        );
    }
    Ok(())
}

pub fn show(ctx: &Context, id: &str, json: bool) -> anyhow::Result<()> {
    let resource = ctx.store.get_resource(id)?;
    if json {
        return utils::print_json(&resource);
    }

    println!("{}", resource.id.cyan().bold());
    println!("  type:    {}", resource.resource_type);
    if !resource.name.is_empty() {
        println!("  name:    {}", resource.name);
    }
    if !resource.description.is_empty() {
        println!("  about:   {}", resource.description);
    }
    println!("  status:  {}", utils::status_colored(resource.status));
    println!("  updated: {}", resource.updated_at.to_rfc3339().dimmed());
    if !resource.dependencies.is_empty() {
        println!("  depends on: {}", resource.dependencies.join(", "));
    }
    let dependents = ctx.store.get_dependents(id);
    if !dependents.is_empty() {
        println!("  needed by:  {}", dependents.join(", "));
    }
    if !resource.properties.is_empty() {
        println!("  properties:");
        for (key, value) in &resource.properties {
            println!("    {} = {}", key, utils::value_display(value));
        }
    }
    if !resource.tags.is_empty() {
        println!("  tags:");
        for (key, value) in &resource.tags {
            println!("    {} = {}", key, value);
        }
    }
    Ok(())
}

pub fn list(ctx: &Context, resource_type: Option<&str>, json: bool) -> anyhow::Result<()> {
    let resources = match resource_type {
        Some(t) => ctx.store.list_resources(t),
        None => ctx.store.snapshot(),
    };
    if json {
        return utils::print_json(&resources);
    }

    if resources.is_empty() {
        println!("{}", "No resources".dimmed());
        return Ok(());
    }
    println!(
        "{}",
        format!("{:<24} {:<20} {:<24} {:<10}", "ID", "TYPE", "NAME", "STATUS").bold()
    );
    println!("{}", "─".repeat(80).dimmed());
    for resource in &resources {
        println!(
            "{:<24} {:<20} {:<24} {}",
            resource.id.cyan(),
            resource.resource_type,
            resource.name,
            utils::status_colored(resource.status)
        );
    }
    println!();
    println!("{} resource(s)", resources.len());
    Ok(())
}

pub async fn depend(ctx: &Context, id: &str, depends_on: &str, remove: bool) -> anyhow::Result<()> {
    if remove {
        if !ctx.store.remove_dependency(id, depends_on)? {
            println!("{}", format!("{} does not depend on {}", id, depends_on).dimmed());
            return Ok(());
        }
        ctx.save().await?;
        println!("{} {} -/-> {}", "✓".green(), id.cyan(), depends_on.cyan());
    } else {
        ctx.store.add_dependency(id, depends_on)?;
        ctx.save().await?;
        println!("{} {} --> {}", "✓".green(), id.cyan(), depends_on.cyan());
    }
    Ok(())
}
