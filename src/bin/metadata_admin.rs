//! Metadata admin CLI
//!
//! Runs the admin handlers against a store snapshot on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use broker_metadata::admin::schemas::PostSchemaPayload;
use broker_metadata::admin::RestResult;
use broker_metadata::store::StoreSnapshot;
use broker_metadata::{
    AllowAll, ClusterData, FailureDomain, MemoryStore, MetadataConfig, MetadataResources,
    RequestContext, TopicName,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "metadata-admin")]
#[command(about = "Administer clusters and schemas in a metadata store snapshot")]
struct Cli {
    /// Configuration file layered over the default locations
    #[arg(short, long)]
    config: Option<String>,

    /// Snapshot file (defaults to store.snapshot_path)
    #[arg(short, long)]
    store: Option<PathBuf>,

    /// Principal recorded on writes
    #[arg(short, long)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage clusters
    Cluster {
        #[command(subcommand)]
        command: ClusterCommand,
    },

    /// Manage failure domains of a cluster
    Domain {
        #[command(subcommand)]
        command: DomainCommand,
    },

    /// Manage topic schemas
    Schema {
        #[command(subcommand)]
        command: SchemaCommand,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
enum ClusterCommand {
    List,
    Get {
        name: String,
    },
    Create {
        name: String,
        #[arg(long)]
        service_url: Option<String>,
        #[arg(long)]
        broker_service_url: Option<String>,
    },
    Update {
        name: String,
        #[arg(long)]
        service_url: Option<String>,
        #[arg(long)]
        broker_service_url: Option<String>,
    },
    Delete {
        name: String,
    },
    /// Whether any namespace is assigned to the cluster
    Used {
        name: String,
    },
}

#[derive(Subcommand)]
enum DomainCommand {
    List {
        cluster: String,
    },
    Get {
        cluster: String,
        domain: String,
    },
    Set {
        cluster: String,
        domain: String,
        /// Broker in the domain (repeatable)
        #[arg(short, long = "broker")]
        brokers: Vec<String>,
    },
    Delete {
        cluster: String,
        domain: String,
    },
}

#[derive(Subcommand)]
enum SchemaCommand {
    /// Latest schema, or one version
    Get {
        topic: String,
        #[arg(short, long)]
        version: Option<String>,
    },
    /// All versions, trailing deletions trimmed
    History {
        topic: String,
    },
    /// Register a schema from a `{type, schema, properties}` JSON file
    Upload {
        topic: String,
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Check a schema file against the topic's history
    Compatibility {
        topic: String,
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Version of an identical registered schema, or -1
    Version {
        topic: String,
        #[arg(short, long)]
        file: PathBuf,
    },
    Delete {
        topic: String,
        #[arg(long)]
        force: bool,
    },
    /// Every schema id with at least one version
    Ids,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn print<T: Serialize>(result: RestResult<T>) -> anyhow::Result<()> {
    match result {
        Ok(response) => {
            if response.status != 204 {
                println!("{}", serde_json::to_string_pretty(&response.body)?);
            }
            Ok(())
        }
        Err(e) => anyhow::bail!("{} {}", e.status, e.message),
    }
}

fn read_payload(file: &Path) -> anyhow::Result<PostSchemaPayload> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", file.display()))
}

fn open_store(path: &Path) -> anyhow::Result<MemoryStore> {
    if path.exists() {
        let snapshot = StoreSnapshot::load(path)
            .with_context(|| format!("loading snapshot {}", path.display()))?;
        Ok(MemoryStore::restore(snapshot))
    } else {
        Ok(MemoryStore::new())
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = MetadataConfig::load_from(cli.config.as_deref())?;
    let snapshot_path = cli.store.unwrap_or_else(|| config.store.snapshot_path.clone());

    if let Commands::Config = cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let store = Arc::new(open_store(&snapshot_path)?);
    let resources = MetadataResources::new(config, store.clone())?;
    let ctx = cli
        .user
        .map(RequestContext::as_principal)
        .unwrap_or_default();
    let clusters = resources.clusters_admin(Arc::new(AllowAll));
    let schemas = resources.schemas_admin(Arc::new(AllowAll));

    match cli.command {
        Commands::Cluster { command } => match command {
            ClusterCommand::List => print(clusters.list_clusters(&ctx).await)?,
            ClusterCommand::Get { name } => print(clusters.get_cluster(&ctx, &name).await)?,
            ClusterCommand::Create {
                name,
                service_url,
                broker_service_url,
            } => {
                let data = ClusterData {
                    service_url,
                    broker_service_url,
                    ..ClusterData::default()
                };
                print(clusters.create_cluster(&ctx, &name, &data).await)?;
                println!("✅ Cluster {name} created");
            }
            ClusterCommand::Update {
                name,
                service_url,
                broker_service_url,
            } => {
                let mut data = clusters
                    .get_cluster(&ctx, &name)
                    .await
                    .map_err(|e| anyhow::anyhow!("{} {}", e.status, e.message))?
                    .body;
                if service_url.is_some() {
                    data.service_url = service_url;
                }
                if broker_service_url.is_some() {
                    data.broker_service_url = broker_service_url;
                }
                print(clusters.update_cluster(&ctx, &name, &data).await)?;
                println!("✅ Cluster {name} updated");
            }
            ClusterCommand::Delete { name } => {
                print(clusters.delete_cluster(&ctx, &name).await)?;
                println!("🗑️  Cluster {name} deleted");
            }
            ClusterCommand::Used { name } => {
                let used = resources.clusters().is_cluster_used_async(&name).await?;
                println!("{used}");
            }
        },

        Commands::Domain { command } => match command {
            DomainCommand::List { cluster } => print(clusters.get_failure_domains(&ctx, &cluster).await)?,
            DomainCommand::Get { cluster, domain } => {
                print(clusters.get_failure_domain(&ctx, &cluster, &domain).await)?
            }
            DomainCommand::Set {
                cluster,
                domain,
                brokers,
            } => {
                let data = FailureDomain::new(brokers);
                print(clusters.set_failure_domain(&ctx, &cluster, &domain, &data).await)?;
                println!("✅ Failure domain {domain} stored");
            }
            DomainCommand::Delete { cluster, domain } => {
                print(clusters.delete_failure_domain(&ctx, &cluster, &domain).await)?
            }
        },

        Commands::Schema { command } => match command {
            SchemaCommand::Get { topic, version } => {
                let topic = TopicName::parse(&topic)?;
                match version {
                    Some(version) => print(schemas.get_schema_version(&ctx, &topic, &version).await)?,
                    None => print(schemas.get_schema(&ctx, &topic).await)?,
                }
            }
            SchemaCommand::History { topic } => {
                let topic = TopicName::parse(&topic)?;
                print(schemas.get_all_schemas(&ctx, &topic).await)?
            }
            SchemaCommand::Upload { topic, file } => {
                let topic = TopicName::parse(&topic)?;
                let payload = read_payload(&file)?;
                print(schemas.post_schema(&ctx, &topic, &payload).await)?
            }
            SchemaCommand::Compatibility { topic, file } => {
                let topic = TopicName::parse(&topic)?;
                let payload = read_payload(&file)?;
                print(schemas.test_compatibility(&ctx, &topic, &payload).await)?
            }
            SchemaCommand::Version { topic, file } => {
                let topic = TopicName::parse(&topic)?;
                let payload = read_payload(&file)?;
                print(schemas.get_version_by_schema(&ctx, &topic, &payload).await)?
            }
            SchemaCommand::Delete { topic, force } => {
                let topic = TopicName::parse(&topic)?;
                print(schemas.delete_schema(&ctx, &topic, force).await)?
            }
            SchemaCommand::Ids => {
                for id in resources.schemas().list_schema_ids_async().await? {
                    println!("{id}");
                }
            }
        },

        Commands::Config => {}
    }

    store
        .snapshot()
        .save(&snapshot_path)
        .with_context(|| format!("saving snapshot {}", snapshot_path.display()))?;
    Ok(())
}
