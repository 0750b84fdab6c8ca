//! rr-cluster - inspect and query a sharded key-value cluster
//!
//! Discovers the cluster topology from seed nodes and routes commands to
//! the node owning their keys.

use std::path::PathBuf;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use resp::{Command, KeyLayout, RespValue};
use rr_cluster::{ClusterClient, ClusterClientConfig, SeedConfig};
use rr_core::Endpoint;

/// Cluster client command line
#[derive(Parser, Debug)]
#[command(name = "rr-cluster")]
#[command(about = "Cluster-aware client for Redis-compatible clusters")]
struct Args {
    /// Seed node address (host:port), repeatable
    #[arg(short, long = "seed")]
    seeds: Vec<String>,

    /// Password for seeds that do not set one
    #[arg(short, long)]
    password: Option<String>,

    /// Configuration file path (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    /// Enable periodic topology refresh with this period (seconds)
    #[arg(long)]
    refresh_secs: Option<u64>,

    #[command(subcommand)]
    command: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Print the discovered cluster nodes and their slots
    Nodes,
    /// Route one command through the cluster and print the reply
    Exec {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration from file if specified, otherwise use defaults
    let mut config = match &args.config {
        Some(path) => ClusterClientConfig::from_file(path)
            .with_context(|| format!("loading configuration from {:?}", path))?,
        None => ClusterClientConfig::default(),
    };

    // Override config with command line arguments
    if !args.seeds.is_empty() {
        config.seeds = args
            .seeds
            .iter()
            .map(|s| -> anyhow::Result<SeedConfig> {
                let endpoint: Endpoint = s.parse()?;
                Ok(SeedConfig::new(endpoint.host, endpoint.port))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
    }
    if let Some(password) = &args.password {
        for seed in config.seeds.iter_mut().filter(|s| s.password.is_none()) {
            seed.password = Some(password.clone());
        }
    }
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    if let Some(secs) = args.refresh_secs {
        config.topology.refresh_cluster_view = true;
        config.topology.refresh_period_secs = secs;
    }

    // Initialize logging
    let level = match config.log.level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if config.seeds.is_empty() {
        bail!("no seed nodes given, use --seed host:port or a config file");
    }
    let seeds: Vec<String> = config
        .seeds
        .iter()
        .map(|s| format!("{}:{}", s.host, s.port))
        .collect();
    info!("Seeds: {}", seeds.join(", "));

    let client = ClusterClient::with_tcp(config)?;
    let result = run(&client, args.command).await;
    client.shutdown().await;
    result
}

async fn run(client: &ClusterClient, action: Action) -> anyhow::Result<()> {
    match action {
        Action::Nodes => {
            let table = client.get_partitions().await?;
            for node in table.ordered_nodes() {
                let slots = node
                    .slots
                    .iter()
                    .map(|r| r.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                println!(
                    "{} {} {} {} {}",
                    node.node_id,
                    node.endpoint,
                    node.flags_string(),
                    node.master_id.as_deref().unwrap_or("-"),
                    slots
                );
            }
            if !table.is_complete() {
                println!("# {} slots unassigned", table.unassigned_slot_count());
            }
        }
        Action::Exec { args } => {
            let command = Command::from_args(args.into_iter().map(Bytes::from).collect())?;
            let connection = client.connect().await?;
            if command.key_layout() == KeyLayout::Keyless {
                for (node_id, reply) in connection.on_masters(command).await? {
                    match reply {
                        Ok(reply) => println!("{}: {}", node_id, format_reply(&reply, 0)),
                        Err(e) => println!("{}: (failed) {}", node_id, e),
                    }
                }
            } else {
                let reply = connection.connect_and_route(command).await?;
                println!("{}", format_reply(&reply, 0));
            }
            connection.close().await;
        }
    }
    Ok(())
}

/// redis-cli style rendering
fn format_reply(reply: &RespValue, indent: usize) -> String {
    match reply {
        RespValue::SimpleString(s) => String::from_utf8_lossy(s).into_owned(),
        RespValue::Error(e) => format!("(error) {}", String::from_utf8_lossy(e)),
        RespValue::Integer(n) => format!("(integer) {}", n),
        RespValue::BulkString(Some(s)) => format!("\"{}\"", String::from_utf8_lossy(s)),
        RespValue::BulkString(None) | RespValue::Null => "(nil)".to_string(),
        RespValue::Array(items) if items.is_empty() => "(empty array)".to_string(),
        RespValue::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                format!(
                    "{}{}) {}",
                    " ".repeat(indent),
                    i + 1,
                    format_reply(item, indent + 3)
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
