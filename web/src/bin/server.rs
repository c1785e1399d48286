//! Standalone session-hosting server binary.
//!
//! Usage: cargo run -p classroom_web --bin classroom-web-server

use std::sync::Arc;

use classroom_web::{AppContext, InMemoryStateStore, PgStorageAdapter, ServerConfig, StateStore, StorageAdapter, WebServer};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "classroom-web-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host address to bind to.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port number to bind to.
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Secret used to verify HELLO bearer tokens.
    #[arg(long, env = "JWT_SECRET")]
    jwt_secret: String,

    /// Postgres connection string for the Storage Adapter (question banks,
    /// rosters, attempts, strength events).
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Redis connection string for the State Store. When omitted, session
    /// runtime state is kept in an in-process map that does not survive a
    /// restart — fine for local development, not for production.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    classroom_web::init_logging();

    let args = Args::parse();

    let storage: Arc<dyn StorageAdapter> = Arc::new(PgStorageAdapter::connect(&args.database_url).await?);

    let state_store: Arc<dyn StateStore> = match &args.redis_url {
        Some(url) => Arc::new(classroom_web::RedisStateStore::connect(url).await?),
        None => {
            tracing::warn!("REDIS_URL not set; session state will not survive a restart");
            Arc::new(InMemoryStateStore::new())
        }
    };

    let config = ServerConfig::new(args.host.clone(), args.port);
    let context = AppContext::new(config, storage, state_store, &args.jwt_secret);
    context.spawn_background_sweeps();

    tracing::info!(host = %args.host, port = args.port, "starting classroom session server");

    let server = WebServer::from_context(context);
    let handle = server.start().await?;

    tracing::info!(address = %handle.address(), "server listening");
    println!("server listening on http://{}", handle.address());
    println!("press ctrl+c to stop");

    tokio::signal::ctrl_c().await?;

    tracing::info!("shutting down");
    handle.shutdown().await?;
    tracing::info!("server stopped cleanly");

    Ok(())
}
