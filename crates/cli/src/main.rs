use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use kapis_api::{stream_events, InProcApi, ResourceApi, StreamEnd};
use kapis_core::{GroupVersionKind, GroupVersionResource, Registry, ResourceObject};
use kapis_kubehub::{KubeStore, MemoryStore, ObjectStore};
use kapis_search::Query;
use serde::Deserialize;
use serde_json::Value;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "kapisctl", version, about = "kapis resource CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace (default: all namespaces / cluster scope)
    #[arg(long = "ns", global = true, default_value = "")]
    namespace: String,

    /// Serve from an in-memory store instead of the cluster
    #[arg(long = "memory", global = true, action = ArgAction::SetTrue)]
    memory: bool,

    /// YAML/JSON objects to load into the in-memory store (implies --memory)
    #[arg(long = "seed", global = true)]
    seed: Option<PathBuf>,

    /// Cluster label reported in logs
    #[arg(long = "cluster", global = true, env = "KAPIS_DEFAULT_CLUSTER", default_value = "local")]
    cluster: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the resource registry
    Resources,
    /// List objects of a resource with filters, ordering and paging
    Ls {
        /// Short name (`pods`) or `group/version/resource`
        resource: String,
        /// Filter as key=value (name, names, uid, namespace, ownerReference, ownerKind, label, annotation, fieldSelector)
        #[arg(short = 'f', long = "filter")]
        filters: Vec<String>,
        /// Label selector passed to the store
        #[arg(short = 'l', long = "selector")]
        selector: Option<String>,
        #[arg(long = "page")]
        page: Option<usize>,
        #[arg(long = "limit")]
        limit: Option<usize>,
        #[arg(long = "asc", action = ArgAction::SetTrue)]
        ascending: bool,
        /// name | createTime
        #[arg(long = "order-by")]
        order_by: Option<String>,
        /// Raw query string (`name=web&limit=10`); overrides the flags above
        #[arg(long = "query")]
        query: Option<String>,
    },
    /// Print one object
    Get { resource: String, name: String },
    /// Delete one object
    Delete { resource: String, name: String },
    /// Stream change events as `data:` frames until Ctrl-C
    Watch {
        resource: String,
        #[arg(short = 'l', long = "selector")]
        selector: Option<String>,
    },
}

fn init_tracing() {
    let env = std::env::var("KAPIS_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // Logs go to stderr; stdout carries command output and watch frames.
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KAPIS_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid KAPIS_METRICS_ADDR; expected host:port");
        }
    }
}

/// `pods` via the registry, or an explicit `v1/pods` / `apps/v1/deployments`.
fn parse_resource(api: &dyn ResourceApi, key: &str) -> Result<GroupVersionResource> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [name] => Ok(api.resource(name)?),
        [version, resource] => Ok(GroupVersionResource::new("", *version, *resource)),
        [group, version, resource] => Ok(GroupVersionResource::new(*group, *version, *resource)),
        _ => bail!("invalid resource {:?}; expected name or group/version/resource", key),
    }
}

fn build_query(
    filters: &[String],
    selector: Option<String>,
    page: Option<usize>,
    limit: Option<usize>,
    ascending: bool,
    order_by: Option<String>,
) -> Result<Query> {
    let mut pairs: Vec<(String, String)> = Vec::new();
    for f in filters {
        let (k, v) = f.split_once('=').ok_or_else(|| anyhow!("filter {:?} is not key=value", f))?;
        pairs.push((k.to_string(), v.to_string()));
    }
    if let Some(limit) = limit {
        pairs.push(("limit".into(), limit.to_string()));
        pairs.push(("page".into(), page.unwrap_or(1).to_string()));
    }
    if ascending {
        pairs.push(("ascending".into(), "true".into()));
    }
    if let Some(o) = order_by {
        pairs.push(("orderBy".into(), o));
    }
    if let Some(s) = selector {
        pairs.push(("labelSelector".into(), s));
    }
    Ok(Query::from_pairs(pairs))
}

/// Load every document in `path` into the façade. Sequences are flattened.
async fn seed(api: &dyn ResourceApi, registry: &Registry, path: &Path, namespace: &str) -> Result<usize> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading seed file {}", path.display()))?;
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(&text) {
        match Value::deserialize(doc)? {
            Value::Null => {}
            Value::Array(items) => docs.extend(items),
            other => docs.push(other),
        }
    }
    let mut loaded = 0;
    for doc in docs {
        let api_version = doc.get("apiVersion").and_then(Value::as_str).unwrap_or("");
        let kind = doc.get("kind").and_then(Value::as_str).unwrap_or("");
        let gvk = GroupVersionKind::from_api_version(api_version, kind);
        let Some(entry) = registry.entries().find(|e| e.kind.as_ref() == Some(&gvk)) else {
            warn!(gvk = %gvk, "seed: no registered resource for kind; skipping");
            continue;
        };
        let ns = doc
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .unwrap_or(namespace)
            .to_string();
        api.create(&entry.gvr, &ns, doc).await.with_context(|| format!("seeding {}", gvk))?;
        loaded += 1;
    }
    Ok(loaded)
}

fn render_age(obj: &ResourceObject) -> String {
    let Some(created) = obj.meta().creation_timestamp.as_ref() else { return "-".to_string() };
    let mut secs = (Utc::now() - created.0).num_seconds().max(0) as u64;
    let days = secs / 86_400; secs %= 86_400;
    let hours = secs / 3600; secs %= 3600;
    let mins = secs / 60; secs %= 60;
    if days > 0 { format!("{}d{}h", days, hours) }
    else if hours > 0 { format!("{}h{}m", hours, mins) }
    else if mins > 0 { format!("{}m", mins) }
    else { format!("{}s", secs) }
}

fn print_rows(items: &[ResourceObject]) {
    println!("{:<20} {:<40} AGE", "NAMESPACE", "NAME");
    for obj in items {
        let ns = if obj.namespace().is_empty() { "-" } else { obj.namespace() };
        println!("{:<20} {:<40} {}", ns, obj.name(), render_age(obj));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let registry = Arc::new(Registry::builtin());
    let in_memory = cli.memory || cli.seed.is_some();
    let store: Arc<dyn ObjectStore> = if in_memory {
        Arc::new(MemoryStore::new(&registry))
    } else {
        Arc::new(KubeStore::try_default(&registry).await?)
    };
    let api = InProcApi::new(store, registry.clone());
    info!(cluster = %cli.cluster, in_memory, "kapisctl ready");

    if let Some(path) = cli.seed.as_deref() {
        let loaded = seed(&api, &registry, path, &cli.namespace).await?;
        info!(loaded, path = %path.display(), "seeded in-memory store");
    }

    let ns = cli.namespace.as_str();
    match cli.command {
        Commands::Resources => match cli.output {
            Output::Human => {
                println!("{:<34} {:<48} KIND", "NAME", "GROUP/VERSION/RESOURCE");
                for e in registry.entries() {
                    let kind = e.kind.as_ref().map(|k| k.kind.as_str()).unwrap_or("-");
                    println!("{:<34} {:<48} {}", e.name, e.gvr.to_string(), kind);
                }
            }
            Output::Json => {
                let rows: Vec<_> = registry
                    .entries()
                    .map(|e| {
                        serde_json::json!({
                            "name": e.name,
                            "group": e.gvr.group,
                            "version": e.gvr.version,
                            "resource": e.gvr.resource,
                            "kind": e.kind.as_ref().map(|k| k.kind.clone()),
                            "typed": e.constructor.is_some(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
        },
        Commands::Ls { resource, filters, selector, page, limit, ascending, order_by, query } => {
            let gvr = parse_resource(&api, &resource)?;
            let query = match query {
                Some(qs) => Query::from_query_str(&qs),
                None => build_query(&filters, selector, page, limit, ascending, order_by)?,
            };
            info!(gvr = %gvr, ns = %ns, "ls invoked");
            let page = api.list(&gvr, ns, &query).await?;
            match cli.output {
                Output::Human => {
                    print_rows(&page.items);
                    eprintln!("total: {}", page.total_items);
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&page)?),
            }
        }
        Commands::Get { resource, name } => {
            let gvr = parse_resource(&api, &resource)?;
            let obj = api.get(&gvr, ns, &name).await?;
            match cli.output {
                Output::Human => print!("{}", serde_yaml::to_string(&obj)?),
                Output::Json => println!("{}", serde_json::to_string_pretty(&obj)?),
            }
        }
        Commands::Delete { resource, name } => {
            let gvr = parse_resource(&api, &resource)?;
            api.delete(&gvr, ns, &name).await?;
            println!("deleted {} {}", gvr.resource, name);
        }
        Commands::Watch { resource, selector } => {
            let gvr = parse_resource(&api, &resource)?;
            info!(gvr = %gvr, ns = %ns, "watch invoked");
            let handle = api.watch(&gvr, ns, selector).await?;
            let token = CancellationToken::new();
            let on_signal = token.clone();
            tokio::spawn(async move {
                if signal::ctrl_c().await.is_ok() {
                    info!("Ctrl-C received; stopping watch");
                }
                on_signal.cancel();
            });
            let end = stream_events(handle, tokio::io::stdout(), token).await;
            if end != StreamEnd::Cancelled {
                warn!(end = end.as_str(), "watch ended before Ctrl-C");
            }
        }
    }

    Ok(())
}
