mod commands;
mod context;
mod logging;
mod utils;

use clap::{Parser, Subcommand, ValueEnum};
use context::Context;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "infraflow")]
#[command(about = "Know what you run. Deploy it in order.", long_about = None)]
struct Cli {
    /// Configuration file (default: discovered from the current directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// State file, overriding the configuration
    #[arg(long, global = true)]
    state: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage resource records
    #[command(subcommand)]
    Resource(ResourceCommands),
    /// Print the deployment order
    Order {
        /// Only these resources and what they depend on
        targets: Vec<String>,
        /// Deletion order instead
        #[arg(short, long)]
        reverse: bool,
    },
    /// Print resources grouped into parallel deployment levels
    Levels,
    /// List dependency cycles
    Cycles,
    /// Show the dependency graph
    Graph {
        #[arg(short, long, value_enum, default_value_t = GraphFormat::Text)]
        format: GraphFormat,
    },
    /// Detect conflicts among managed resources
    Conflicts {
        /// Compute remedies where one is safe
        #[arg(long)]
        auto_resolve: bool,
        /// Write computed remedies back to the state (implies --auto-resolve)
        #[arg(long)]
        apply: bool,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Estimate the blast radius of changing a resource
    Impact {
        /// Resource ID
        id: String,
    },
    /// Compare a resource against observed properties
    Drift {
        /// Resource ID
        id: String,
        /// JSON file holding the observed properties object
        #[arg(short, long)]
        actual: PathBuf,
    },
    /// Run one reconciliation cycle against a live snapshot
    Reconcile {
        /// JSON snapshot of live resources
        #[arg(short, long)]
        live: PathBuf,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Import unmanaged live resources into the state
    Adopt {
        /// JSON snapshot of live resources
        #[arg(short, long)]
        live: PathBuf,
        /// Live resource IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ResourceCommands {
    /// Add a resource
    Add {
        /// Resource ID
        id: String,
        /// Resource type (e.g. vpc, subnet, ec2-instance)
        #[arg(short = 't', long = "type")]
        resource_type: String,
        #[arg(short, long)]
        name: Option<String>,
        /// Property as KEY=VALUE; VALUE is parsed as JSON when possible
        #[arg(short, long = "property", value_name = "KEY=VALUE")]
        properties: Vec<String>,
        /// Tag as KEY=VALUE
        #[arg(long = "tag", value_name = "KEY=VALUE")]
        tags: Vec<String>,
        /// ID of a resource this one depends on
        #[arg(short, long = "depends-on", value_name = "ID")]
        depends_on: Vec<String>,
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Update a resource
    Update {
        /// Resource ID
        id: String,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Property as KEY=VALUE; VALUE is parsed as JSON when possible
        #[arg(short, long = "property", value_name = "KEY=VALUE")]
        properties: Vec<String>,
        /// Tag as KEY=VALUE
        #[arg(long = "tag", value_name = "KEY=VALUE")]
        tags: Vec<String>,
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Remove a resource
    Remove {
        /// Resource ID
        id: String,
    },
    /// Show one resource
    Show {
        /// Resource ID
        id: String,
        #[arg(long)]
        json: bool,
    },
    /// List resources
    List {
        /// Only this type
        #[arg(short = 't', long = "type")]
        resource_type: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Add or remove a dependency edge
    Depend {
        /// Dependent resource ID
        id: String,
        /// Dependency resource ID
        depends_on: String,
        #[arg(short, long)]
        remove: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum GraphFormat {
    Text,
    Mermaid,
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Version needs no configuration
    if matches!(cli.command, Commands::Version) {
        println!("infraflow {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = context::load_config(cli.config.as_deref(), cli.state)?;
    logging::init(&config.logging)?;

    let ctx = Context::open(config).await?;

    match cli.command {
        Commands::Resource(cmd) => match cmd {
            ResourceCommands::Add {
                id,
                resource_type,
                name,
                properties,
                tags,
                depends_on,
                status,
            } => {
                commands::resource::add(
                    &ctx,
                    commands::resource::NewResource {
                        id,
                        resource_type,
                        name,
                        properties,
                        tags,
                        depends_on,
                        status,
                    },
                )
                .await?;
            }
            ResourceCommands::Update {
                id,
                name,
                description,
                properties,
                tags,
                status,
            } => {
                commands::resource::update(
                    &ctx,
                    &id,
                    name,
                    description,
                    &properties,
                    &tags,
                    status.as_deref(),
                )
                .await?;
            }
            ResourceCommands::Remove { id } => {
                commands::resource::remove(&ctx, &id).await?;
            }
            ResourceCommands::Show { id, json } => {
                commands::resource::show(&ctx, &id, json)?;
            }
            ResourceCommands::List {
                resource_type,
                json,
            } => {
                commands::resource::list(&ctx, resource_type.as_deref(), json)?;
            }
            ResourceCommands::Depend {
                id,
                depends_on,
                remove,
            } => {
                commands::resource::depend(&ctx, &id, &depends_on, remove).await?;
            }
        },
        Commands::Order { targets, reverse } => {
            commands::plan::order(&ctx, &targets, reverse)?;
        }
        Commands::Levels => {
            commands::plan::levels(&ctx)?;
        }
        Commands::Cycles => {
            commands::plan::cycles(&ctx);
        }
        Commands::Graph { format } => {
            commands::plan::graph(&ctx, format);
        }
        Commands::Conflicts {
            auto_resolve,
            apply,
            json,
        } => {
            commands::conflicts::handle(&ctx, auto_resolve || apply, apply, json).await?;
        }
        Commands::Impact { id } => {
            commands::conflicts::impact(&ctx, &id)?;
        }
        Commands::Drift { id, actual } => {
            commands::drift::handle(&ctx, &id, &actual)?;
        }
        Commands::Reconcile { live, json } => {
            commands::reconcile::handle(&ctx, &live, json).await?;
        }
        Commands::Adopt { live, ids } => {
            commands::reconcile::adopt(&ctx, &live, &ids).await?;
        }
        Commands::Version => {
            unreachable!("Version is handled before config loading");
        }
    }

    Ok(())
}
