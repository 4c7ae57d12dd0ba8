use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use sift_api::{InProcApi, SiftApi, TriggerStatus};
use sift_core::{FieldValue, Hit};
use sift_manager::{EngineConfig, IndexManager, ReindexReport, SearchRequest};
use sift_persist::{Record, RecordStore, SqliteStore, SqliteTypeConfig, TypeSchema};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "siftctl", version, about = "Sift index engine CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// SQLite database holding the records (default: ~/.sift/sift.db)
    #[arg(long = "db", env = "SIFT_DB_PATH", global = true)]
    db: Option<String>,

    /// Type schema file, JSON or YAML
    #[arg(long = "schema", env = "SIFT_SCHEMA", global = true)]
    schema: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store records (JSON or YAML array) for a type
    Load {
        type_name: String,
        file: PathBuf,
    },
    /// Rebuild one type, or every type when omitted
    Reindex {
        type_name: Option<String>,
        /// Reindex token
        #[arg(long = "token", env = "SIFT_REINDEX_TOKEN")]
        token: Option<String>,
    },
    /// Reindex a type and run a query against it
    Search {
        type_name: String,
        /// Free text; `field:value` tokens filter on indexed fields
        query: Option<String>,
        #[arg(long = "locale")]
        locale: Option<String>,
        #[arg(long = "offset", default_value_t = 0)]
        offset: usize,
        #[arg(long = "limit", default_value_t = 20)]
        limit: usize,
        /// Equality filter, `field=value`; repeatable
        #[arg(long = "filter")]
        filters: Vec<String>,
        /// Sort by a field, `field` or `field:desc`
        #[arg(long = "sort")]
        sort: Option<String>,
        /// Print candidate counts per stage
        #[arg(long = "explain", action = ArgAction::SetTrue)]
        explain: bool,
        /// Reindex token
        #[arg(long = "token", env = "SIFT_REINDEX_TOKEN")]
        token: Option<String>,
    },
    /// Reindex every type and print per-type stats
    Stats {
        /// Reindex token
        #[arg(long = "token", env = "SIFT_REINDEX_TOKEN")]
        token: Option<String>,
    },
}

/// Schema files list the types either at the top level or under `types`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SchemaFile {
    Wrapped { types: Vec<TypeSchema> },
    List(Vec<TypeSchema>),
}

fn init_tracing() {
    let env = std::env::var("SIFT_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SIFT_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid SIFT_METRICS_ADDR; expected host:port");
        }
    }
}

fn is_yaml(path: &Path) -> bool { matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml")) }

fn parse_doc<T: serde::de::DeserializeOwned>(path: &Path, text: &str) -> Result<T> {
    if is_yaml(path) {
        serde_yaml::from_str(text).with_context(|| format!("parsing YAML {}", path.display()))
    } else {
        serde_json::from_str(text).with_context(|| format!("parsing JSON {}", path.display()))
    }
}

fn read_doc<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_doc(path, &text)
}

fn load_schemas(path: Option<&Path>) -> Result<Vec<TypeSchema>> {
    let path = path.ok_or_else(|| anyhow!("no schema file; pass --schema or set SIFT_SCHEMA"))?;
    Ok(match read_doc::<SchemaFile>(path)? {
        SchemaFile::Wrapped { types } | SchemaFile::List(types) => types,
    })
}

fn open_store(db: Option<&str>) -> Result<Arc<SqliteStore>> {
    let store = match db {
        Some(path) => SqliteStore::open(path)?,
        None => SqliteStore::open_default()?,
    };
    Ok(Arc::new(store))
}

/// Manager with every schema type registered against the store.
fn build_engine(schemas: Vec<TypeSchema>, store: &Arc<SqliteStore>) -> Result<InProcApi> {
    let manager = Arc::new(IndexManager::new(EngineConfig::from_env()));
    for schema in schemas {
        manager.register(Arc::new(SqliteTypeConfig::new(schema, Arc::clone(store))))?;
    }
    Ok(InProcApi::from_env(manager))
}

/// `field=value`, where the value is typed by the field's kind.
fn parse_filter(schema: &TypeSchema, raw: &str) -> Result<(String, FieldValue)> {
    let (name, value) = raw.split_once('=').ok_or_else(|| anyhow!("filter {:?} is not field=value", raw))?;
    let field = schema.fields.iter().find(|f| f.name == name).ok_or_else(|| anyhow!("unknown field {} in type {}", name, schema.name))?;
    let value = FieldValue::from_json(field.value_kind, &serde_json::Value::String(value.to_string()))
        .ok_or_else(|| anyhow!("{:?} is not a valid {:?} value for {}", value, field.value_kind, name))?;
    Ok((name.to_string(), value))
}

fn parse_sort(raw: &str) -> (String, bool) {
    match raw.rsplit_once(':') {
        Some((field, "desc")) => (field.to_string(), true),
        Some((field, "asc")) => (field.to_string(), false),
        _ => (raw.to_string(), false),
    }
}

/// Rebuild one type through the token-checked API before reading it.
async fn refresh_type(api: &InProcApi, type_name: &str, token: Option<&str>) -> Result<ReindexReport> {
    api.reindex(type_name, token).await.with_context(|| format!("reindexing {}", type_name))
}

fn render_hit(hit: &Hit) -> String {
    let fields: Vec<String> = hit.fields.iter().map(|(n, v)| format!("{}={}", n, v.render())).collect();
    let locale = hit.locale.as_deref().unwrap_or("-");
    format!("{:>8.3}  {:<10}  {:<5}  {}", hit.score, hit.id.to_string(), locale, fields.join(" "))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let store = open_store(cli.db.as_deref())?;

    match cli.command {
        Commands::Load { type_name, file } => {
            let t0 = Instant::now();
            let records: Vec<Record> = read_doc(&file)?;
            for r in records.iter() {
                store.put(&type_name, r)?;
            }
            let total = store.count(&type_name)?;
            info!(index_type = %type_name, loaded = records.len(), total, took_ms = %t0.elapsed().as_millis(), "records loaded");
            match cli.output {
                Output::Human => println!("loaded {} records into {} ({} total)", records.len(), type_name, total),
                Output::Json => println!("{}", serde_json::json!({ "type": type_name, "loaded": records.len(), "total": total })),
            }
        }
        Commands::Reindex { type_name, token } => {
            let api = build_engine(load_schemas(cli.schema.as_deref())?, &store)?;
            let names = match type_name {
                Some(t) => vec![t],
                None => api.types().await?,
            };
            let mut failed = false;
            for name in names {
                let res = api.reindex(&name, token.as_deref()).await;
                let status = TriggerStatus::from(&res);
                match (&res, cli.output) {
                    (Ok(report), Output::Human) => println!(
                        "{} • {} elements • {} pages • epoch {} • {}ms",
                        name, report.elements, report.pages, report.epoch, report.elapsed_ms
                    ),
                    (Ok(report), Output::Json) => println!("{}", serde_json::to_string(report)?),
                    (Err(e), _) => {
                        failed = true;
                        warn!(index_type = %name, status = status.http_status(), error = %e, "reindex failed");
                        eprintln!("{}: {} ({})", name, e, status.http_status());
                    }
                }
            }
            if failed {
                bail!("one or more reindex runs failed");
            }
        }
        Commands::Search { type_name, query, locale, offset, limit, filters, sort, explain, token } => {
            let schemas = load_schemas(cli.schema.as_deref())?;
            let schema = schemas
                .iter()
                .find(|s| s.name == type_name)
                .cloned()
                .ok_or_else(|| anyhow!("type {} is not in the schema file", type_name))?;
            let api = build_engine(schemas, &store)?;
            refresh_type(&api, &type_name, token.as_deref()).await?;

            let mut req = SearchRequest { query, locale, ..SearchRequest::new() }.page(offset, limit);
            for f in filters.iter() {
                let (name, value) = parse_filter(&schema, f)?;
                req = req.with_filter(name, value);
            }
            if let Some(s) = sort.as_deref() {
                let (field, desc) = parse_sort(s);
                req = req.sorted_by(field, desc);
            }
            let resp = api.search(&type_name, req).await?;
            match cli.output {
                Output::Human => {
                    println!("{} of {} hits", resp.hits.len(), resp.total_hits);
                    for h in resp.hits.iter() {
                        println!("{}", render_hit(h));
                    }
                    if explain {
                        let d = &resp.debug;
                        println!("explain: total={} after_locale={} after_filters={} matched={}", d.total, d.after_locale, d.after_filters, d.matched);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&resp)?),
            }
        }
        Commands::Stats { token } => {
            let api = build_engine(load_schemas(cli.schema.as_deref())?, &store)?;
            for name in api.types().await? {
                if let Err(e) = refresh_type(&api, &name, token.as_deref()).await {
                    warn!(index_type = %name, error = %format!("{:#}", e), "reindex failed");
                }
            }
            let stats = api.stats().await?;
            match cli.output {
                Output::Human => {
                    println!("page_size={} page_delay_ms={}", stats.page_size, stats.page_delay_ms);
                    for t in stats.types.iter() {
                        let last = t.last_reindex.as_ref().map(|r| format!("{}ms", r.elapsed_ms)).unwrap_or_else(|| "-".into());
                        println!("{:<16} docs={:<8} epoch={:<4} last_reindex={}", t.name, t.docs, t.epoch, last);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
            }
        }
    }

    Ok(())
}
