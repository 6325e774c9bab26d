//! OpenMemory server binary
//!
//! Serves the REST surface (with `/mcp` HTTP framing) by default, or the
//! line-framed stdio MCP transport with `--stdio`. Exit code 0 on orderly
//! shutdown, non-zero on fatal init error.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use openmemory_core::{
    Config, EmbedderHandle, HsgEngine, InProcVectorStore, MetadataBackend, MetadataStore,
    PostgresStore, QdrantVectorStore, SqliteStore, Supervisor, VectorBackend, VectorStore,
};
use openmemory_server::http;
use openmemory_server::mcp::server::McpServer;
use openmemory_server::mcp::stdio::StdioTransport;
use openmemory_server::AppState;

/// Shutdown grace period for background workers.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "openmemory", version, about = "Hierarchical semantic-graph memory server")]
struct Cli {
    /// Path to a JSON config file (environment variables still override)
    #[arg(long)]
    config: Option<PathBuf>,

    /// HTTP port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Override the embedded database path
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Serve MCP over line-framed stdio instead of HTTP
    #[arg(long)]
    stdio: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr: stdout belongs to JSON-RPC in stdio mode
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    if let Err(e) = run(cli).await {
        error!("fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(db_path) = cli.db_path {
        config.db_path = Some(db_path);
    }
    let config = Arc::new(config);

    info!(
        tier = ?config.tier,
        vec_dim = config.vec_dim,
        "OpenMemory v{} starting", openmemory_core::VERSION
    );

    let store: Arc<dyn MetadataStore> = match config.metadata_backend {
        MetadataBackend::Sqlite => {
            let path = config.resolved_db_path();
            info!(path = %path.display(), "using embedded metadata store");
            Arc::new(SqliteStore::open(path).context("opening metadata database")?)
        }
        MetadataBackend::Postgres => {
            let dsn = config
                .postgres_dsn
                .as_deref()
                .context("postgres backend requires postgres_dsn")?;
            info!("using postgres metadata store");
            Arc::new(
                PostgresStore::connect(dsn)
                    .await
                    .context("connecting to postgres")?,
            )
        }
    };

    let vectors: Arc<dyn VectorStore> = match config.vector_backend {
        VectorBackend::Inproc => {
            info!("using in-process vector store");
            Arc::new(InProcVectorStore::new(
                config.vec_dim,
                config.collection_prefix.clone(),
            ))
        }
        VectorBackend::External => {
            let url = config
                .qdrant_url
                .clone()
                .context("external vector backend requires qdrant_url")?;
            info!(url = %url, "using external vector store");
            Arc::new(QdrantVectorStore::new(
                url,
                config.qdrant_api_key.clone(),
                config.collection_prefix.clone(),
                config.vec_dim,
            ))
        }
    };

    let embedder = Arc::new(EmbedderHandle::from_config(&config));
    info!(
        provider = embedder.provider_name(),
        "embedding provider ready"
    );

    let engine = Arc::new(HsgEngine::new(
        Arc::clone(&config),
        store,
        vectors,
        embedder,
    ));
    let supervisor = Supervisor::start(Arc::clone(&engine), Arc::clone(&config));

    let state = AppState::new(engine);
    let mcp = McpServer::new(state.clone());

    if cli.stdio {
        info!("serving MCP on stdio");
        StdioTransport::new()
            .run(mcp)
            .await
            .context("stdio transport failed")?;
    } else {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
        let app = http::router(state, mcp);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("binding {}", addr))?;
        info!(%addr, "serving HTTP");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("http server failed")?;
    }

    info!("draining background workers");
    supervisor.shutdown(SHUTDOWN_GRACE).await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
