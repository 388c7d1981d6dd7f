mod front_client;
mod grpc;
mod recipient_client;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use grpc::proto::orchestrator_server::OrchestratorServer;
use grpc::OrchestratorService;
use tonic::transport::Server;
use tracing_subscriber::EnvFilter;
use xbus_core::orchestrator::Orchestrator;
use xbus_core::store::memory::{MemoryMetadataStore, MemoryStateLog, MemoryTokenStore};
use xbus_core::store::{MetadataStore, StateLog, TokenStore};
use xbus_core::Timeouts;

/// Command-line / environment configuration for the orchestrator server.
#[derive(Parser, Debug)]
#[command(name = "xbus-server")]
struct Config {
    /// Address this server listens on.
    #[arg(long, env = "XBUS_LISTEN_ADDR", default_value = "0.0.0.0:50051")]
    listen_addr: String,

    /// Postgres connection string for the metadata store and state log.
    /// Falls back to in-memory stores when unset.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Redis connection string for the session/token store. Falls back to
    /// an in-memory token store when unset.
    #[arg(long, env = "XBUS_REDIS_URL")]
    redis_url: Option<String>,

    /// URI the front should use to reach this backend, passed to
    /// `register_on_front` at startup.
    #[arg(long, env = "XBUS_SELF_URI")]
    self_uri: Option<String>,

    /// The front's back-registration endpoint.
    #[arg(long, env = "XBUS_FRONT_URI")]
    front_uri: Option<String>,

    #[arg(long, env = "XBUS_START_EVENT_TIMEOUT_SECS", default_value_t = 30)]
    start_event_timeout_secs: u64,
    #[arg(long, env = "XBUS_SEND_ITEM_TIMEOUT_SECS", default_value_t = 30)]
    send_item_timeout_secs: u64,
    #[arg(long, env = "XBUS_END_EVENT_TIMEOUT_SECS", default_value_t = 30)]
    end_event_timeout_secs: u64,
    #[arg(long, env = "XBUS_END_ENVELOPE_TIMEOUT_SECS", default_value_t = 30)]
    end_envelope_timeout_secs: u64,
}

impl Config {
    fn timeouts(&self) -> Timeouts {
        Timeouts {
            start_event: Duration::from_secs(self.start_event_timeout_secs),
            send_item: Duration::from_secs(self.send_item_timeout_secs),
            end_event: Duration::from_secs(self.end_event_timeout_secs),
            end_envelope: Duration::from_secs(self.end_envelope_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::parse();
    let addr = config.listen_addr.parse()?;

    let (metadata, state_log): (Arc<dyn MetadataStore>, Arc<dyn StateLog>) = match &config.database_url {
        #[cfg(feature = "postgres")]
        Some(url) => {
            tracing::info!("connecting to PostgreSQL");
            let pool = sqlx::PgPool::connect(url).await?;
            let store = Arc::new(xbus_core::store::postgres::PostgresStore::new(pool));
            store.migrate().await?;
            tracing::info!("using PostgresStore (migrations applied)");
            (store.clone(), store)
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => {
            tracing::warn!("--database-url set but postgres feature not enabled, using in-memory stores");
            (Arc::new(MemoryMetadataStore::new()), Arc::new(MemoryStateLog::new()))
        }
        None => {
            tracing::info!("using in-memory metadata store and state log");
            (Arc::new(MemoryMetadataStore::new()), Arc::new(MemoryStateLog::new()))
        }
    };

    let token_store: Arc<dyn TokenStore> = match &config.redis_url {
        #[cfg(feature = "redis-store")]
        Some(url) => {
            tracing::info!("connecting to Redis");
            let cfg = deadpool_redis::Config::from_url(url);
            let pool = cfg.create_pool(Some(deadpool_redis::Runtime::Tokio1))?;
            Arc::new(xbus_core::store::redis_store::RedisTokenStore::new(pool))
        }
        #[cfg(not(feature = "redis-store"))]
        Some(_) => {
            tracing::warn!("--redis-url set but redis-store feature not enabled, using in-memory token store");
            Arc::new(MemoryTokenStore::new())
        }
        None => {
            tracing::info!("using in-memory token store");
            Arc::new(MemoryTokenStore::new())
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(token_store, metadata, state_log, config.timeouts()));

    if let (Some(front_uri), Some(self_uri)) = (&config.front_uri, &config.self_uri) {
        front_client::register_on_front(front_uri, self_uri).await?;
        tracing::info!(%self_uri, "registered with front");
    } else {
        tracing::info!("no front configured, skipping register_on_front");
    }

    tracing::info!(%addr, "xbus orchestrator listening");

    let service = OrchestratorService { orchestrator };

    Server::builder()
        .add_service(OrchestratorServer::new(service))
        .serve(addr)
        .await?;

    Ok(())
}
