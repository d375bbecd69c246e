//! catalogd
//!
//! Host process for the catalog engine: wires the configured store adapters,
//! optionally seeds the catalog, runs the index repair worker and serves
//! health and metrics endpoints.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            catalogd                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │ Record Store │◀───│CatalogEngine │───▶│ Search Index │       │
//! │  │ (memory/pg)  │    │              │    │ (memory/es)  │       │
//! │  └──────────────┘    └──────┬───────┘    └──────────────┘       │
//! │                             ▼                                    │
//! │                      ┌──────────────┐                            │
//! │                      │    Cache     │                            │
//! │                      │(memory/redis)│                            │
//! │                      └──────────────┘                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use catalogd::adapters::{
    ElasticsearchConfig, ElasticsearchIndex, InMemoryCacheStore, InMemoryRecordStore,
    InMemorySearchIndex, LoggingEventPublisher,
};
use catalogd::domain::ports::{CacheStore, RecordStore, SearchIndex};
use catalogd::{CatalogEngine, CatalogStores, EngineConfig, Error, ProductDraft, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RecordBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum CacheBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SearchBackend {
    Memory,
    Elasticsearch,
}

/// catalogd - product catalog cache-aside engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[cfg_attr(not(all(feature = "postgres", feature = "redis")), allow(dead_code))]
struct Args {
    /// System of record
    #[arg(long, env = "CATALOG_RECORD_BACKEND", value_enum, default_value = "memory")]
    record_backend: RecordBackend,

    /// Cache store
    #[arg(long, env = "CATALOG_CACHE_BACKEND", value_enum, default_value = "memory")]
    cache_backend: CacheBackend,

    /// Search index
    #[arg(long, env = "CATALOG_SEARCH_BACKEND", value_enum, default_value = "memory")]
    search_backend: SearchBackend,

    /// PostgreSQL host
    #[arg(long, env = "CATALOG_PG_HOST", default_value = "localhost")]
    pg_host: String,

    /// PostgreSQL port
    #[arg(long, env = "CATALOG_PG_PORT", default_value = "5432")]
    pg_port: u16,

    /// PostgreSQL database
    #[arg(long, env = "CATALOG_PG_DBNAME", default_value = "catalog")]
    pg_dbname: String,

    /// PostgreSQL user
    #[arg(long, env = "CATALOG_PG_USER", default_value = "postgres")]
    pg_user: String,

    /// PostgreSQL password
    #[arg(long, env = "CATALOG_PG_PASSWORD", default_value = "", hide_env_values = true)]
    pg_password: String,

    /// PostgreSQL pool size
    #[arg(long, env = "CATALOG_PG_POOL_SIZE", default_value = "16")]
    pg_pool_size: usize,

    /// Redis URL
    #[arg(long, env = "CATALOG_REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Redis command timeout in milliseconds
    #[arg(long, env = "CATALOG_REDIS_TIMEOUT_MS", default_value = "250")]
    redis_timeout_ms: u64,

    /// Elasticsearch URL
    #[arg(long, env = "CATALOG_ES_URL", default_value = "http://localhost:9200")]
    es_url: String,

    /// Elasticsearch index name
    #[arg(long, env = "CATALOG_ES_INDEX", default_value = "products")]
    es_index: String,

    /// How long a full cache refill answers listing requests, in seconds
    #[arg(long, env = "CATALOG_LISTING_TTL_SECONDS", default_value = "60")]
    listing_ttl_seconds: u64,

    /// How long a write waits for the search index, in milliseconds
    #[arg(long, env = "CATALOG_INDEX_TIMEOUT_MS", default_value = "2000")]
    index_timeout_ms: u64,

    /// Keep ranking entries and search documents of deleted products
    #[arg(long, env = "CATALOG_KEEP_DERIVED_ON_DELETE")]
    keep_derived_on_delete: bool,

    /// Default size of the popular-products list
    #[arg(long, env = "CATALOG_POPULAR_COUNT", default_value = "5")]
    popular_count: usize,

    /// Interval between index repair passes, in seconds
    #[arg(long, env = "CATALOG_REPAIR_INTERVAL_SECONDS", default_value = "30")]
    repair_interval_seconds: u64,

    /// YAML file of products to create at startup
    #[arg(long, env = "CATALOG_SEED_FILE")]
    seed_file: Option<PathBuf>,

    /// Metrics server bind address
    #[arg(long, env = "CATALOG_METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, env = "CATALOG_HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CATALOG_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "CATALOG_LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    info!("Starting catalogd");
    info!("  Record store: {:?}", args.record_backend);
    info!("  Cache: {:?}", args.cache_backend);
    info!("  Search index: {:?}", args.search_backend);
    info!("  Listing TTL: {}s", args.listing_ttl_seconds);
    info!("  Index timeout: {}ms", args.index_timeout_ms);
    info!("  Purge derived state on delete: {}", !args.keep_derived_on_delete);

    let stores = CatalogStores {
        records: build_record_store(&args).await?,
        cache: build_cache_store(&args)?,
        search: build_search_index(&args)?,
    };

    let config = EngineConfig {
        listing_ttl: Duration::from_secs(args.listing_ttl_seconds),
        index_timeout: Duration::from_millis(args.index_timeout_ms),
        purge_derived_on_delete: !args.keep_derived_on_delete,
        default_popular_count: args.popular_count,
    };

    let engine = CatalogEngine::new(config, stores, Arc::new(LoggingEventPublisher::info_level()))?;

    let health = engine.health().await;
    if !health.records {
        error!("Record store health check failed");
        error!("Continuing anyway - requests will fail until it recovers");
    }
    if !health.cache {
        warn!("Cache unreachable - serving from the record store");
    }
    if !health.search {
        warn!("Search index unreachable - writes will be queued for repair");
    }

    if let Some(path) = &args.seed_file {
        seed_catalog(&engine, path).await?;
    }

    // Index repair worker
    let shutdown = CancellationToken::new();
    let repair = tokio::spawn(engine.clone().run_index_repair(
        Duration::from_secs(args.repair_interval_seconds.max(1)),
        shutdown.clone(),
    ));

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_engine = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_engine).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_engine = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_engine).await {
            error!("Metrics server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    shutdown.cancel();
    if let Err(e) = repair.await {
        error!("Index repair worker ended abnormally: {}", e);
    }

    info!("catalogd shutdown complete");
    Ok(())
}

// =============================================================================
// Store Wiring
// =============================================================================

async fn build_record_store(args: &Args) -> Result<Arc<dyn RecordStore>> {
    match args.record_backend {
        RecordBackend::Memory => Ok(Arc::new(InMemoryRecordStore::new())),
        #[cfg(feature = "postgres")]
        RecordBackend::Postgres => {
            use catalogd::adapters::{PostgresConfig, PostgresRecordStore};

            let store = PostgresRecordStore::from_config(&PostgresConfig {
                host: args.pg_host.clone(),
                port: args.pg_port,
                dbname: args.pg_dbname.clone(),
                user: args.pg_user.clone(),
                password: args.pg_password.clone(),
                max_size: args.pg_pool_size,
                ..Default::default()
            })?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        RecordBackend::Postgres => Err(Error::Config(
            "postgres record store requires the `postgres` feature".to_string(),
        )),
    }
}

fn build_cache_store(args: &Args) -> Result<Arc<dyn CacheStore>> {
    match args.cache_backend {
        CacheBackend::Memory => Ok(Arc::new(InMemoryCacheStore::new())),
        #[cfg(feature = "redis")]
        CacheBackend::Redis => {
            use catalogd::adapters::{RedisCacheConfig, RedisCacheStore};

            let store = RedisCacheStore::new(RedisCacheConfig {
                url: args.redis_url.clone(),
                op_timeout: Duration::from_millis(args.redis_timeout_ms),
                ..Default::default()
            })?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "redis"))]
        CacheBackend::Redis => Err(Error::Config(
            "redis cache requires the `redis` feature".to_string(),
        )),
    }
}

fn build_search_index(args: &Args) -> Result<Arc<dyn SearchIndex>> {
    match args.search_backend {
        SearchBackend::Memory => Ok(Arc::new(InMemorySearchIndex::new())),
        SearchBackend::Elasticsearch => {
            let index = ElasticsearchIndex::new(ElasticsearchConfig {
                url: args.es_url.clone(),
                index: args.es_index.clone(),
                ..Default::default()
            })?;
            Ok(Arc::new(index))
        }
    }
}

/// Create every product listed in a YAML seed file.
async fn seed_catalog(engine: &CatalogEngine, path: &Path) -> Result<()> {
    let raw = tokio::fs::read_to_string(path).await?;
    let drafts: Vec<ProductDraft> = serde_yaml::from_str(&raw)
        .map_err(|e| Error::Config(format!("invalid seed file {}: {}", path.display(), e)))?;

    let total = drafts.len();
    for draft in drafts {
        let name = draft.name.clone();
        let outcome = engine.create(draft).await?;
        if outcome.index.is_failed() {
            warn!("Seeded {} without indexing it", name);
        }
    }

    info!("Seeded {} products from {}", total, path.display());
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let directive = |d: &str| -> Result<tracing_subscriber::filter::Directive> {
        d.parse()
            .map_err(|e| Error::Config(format!("invalid log directive {}: {}", d, e)))
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive(directive("hyper=warn")?)
        .add_directive(directive("reqwest=warn")?)
        .add_directive(directive("tokio_postgres=info")?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }

    Ok(())
}

// =============================================================================
// Health & Metrics Servers
// =============================================================================

fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

async fn bind(addr: &str, name: &str) -> Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {} server address: {}", name, e)))?;

    let listener = TcpListener::bind(addr).await?;
    info!("{} server listening on {}", name, addr);
    Ok(listener)
}

async fn run_health_server(addr: &str, engine: Arc<CatalogEngine>) -> Result<()> {
    let listener = bind(addr, "Health").await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let engine = engine.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let engine = engine.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => respond(StatusCode::OK, "text/plain", "ok"),
                        "/readyz" => {
                            let health = engine.health().await;
                            let status = if health.is_ready() {
                                StatusCode::OK
                            } else {
                                StatusCode::SERVICE_UNAVAILABLE
                            };
                            let body = serde_json::to_vec(&health).unwrap_or_default();
                            respond(status, "application/json", body)
                        }
                        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

async fn run_metrics_server(addr: &str, engine: Arc<CatalogEngine>) -> Result<()> {
    let listener = bind(addr, "Metrics").await?;

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let engine = engine.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let engine = engine.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match engine.metrics().gather_text() {
                            Ok(text) => respond(
                                StatusCode::OK,
                                "text/plain; version=0.0.4",
                                text,
                            ),
                            Err(e) => respond(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                "text/plain",
                                e.to_string(),
                            ),
                        },
                        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
                    };
                    Ok::<_, Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
