use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use anyhow::{anyhow, bail};
use clap::Parser;
use tracing::{info, warn};

use keymaster::server::{self, AppState};
use keymaster::store::{
    KeyStore, MemoryKeyStore, RedisConfig, RedisKeyStore, StoreBackend, StoreCredentials,
};
use keymaster::util;

/// API key issuance and validation service.
#[derive(Parser, Debug)]
#[command(name = "keymaster", version, about)]
struct Config {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8088")]
    bind_addr: String,

    /// Store backend: "redis" or "memory" (memory is for local development).
    #[arg(long, env = "KEYMASTER_STORE", default_value = "redis")]
    store: String,

    #[arg(long, env = "REDIS_HOST", default_value = "localhost")]
    redis_host: String,

    #[arg(long, env = "REDIS_PORT", default_value_t = 6379)]
    redis_port: u16,

    #[arg(long, env = "REDIS_DB", default_value_t = 0)]
    redis_db: i64,

    #[arg(long, env = "REDIS_VALIDATOR_USERNAME", default_value = "validator")]
    validator_username: String,

    #[arg(long, env = "REDIS_VALIDATOR_PASSWORD")]
    validator_password: Option<String>,

    #[arg(long, env = "REDIS_MANAGER_USERNAME", default_value = "manager")]
    manager_username: String,

    #[arg(long, env = "REDIS_MANAGER_PASSWORD")]
    manager_password: Option<String>,

    /// Bearer secret for admin endpoints; leaving it unset disables them.
    #[arg(long, env = "ADMIN_SECRET")]
    admin_secret: Option<String>,

    /// Per-key validation rate limit (requests per minute).
    #[arg(long, env = "KEYMASTER_RATE_LIMIT", default_value_t = 100)]
    rate_limit: u64,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    util::init_tracing();
    let config = Config::parse();

    let backend = StoreBackend::from_spec(&config.store)
        .ok_or_else(|| anyhow!("unknown store backend {:?}", config.store))?;

    let (validator, manager): (Arc<dyn KeyStore>, Arc<dyn KeyStore>) = match backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory store: no durability, single process only");
            let store = MemoryKeyStore::shared();
            (store.clone(), store)
        }
        StoreBackend::Redis => {
            let redis = RedisConfig {
                host: config.redis_host.clone(),
                port: config.redis_port,
                db: config.redis_db,
            };
            let validator = RedisKeyStore::connect(
                &redis,
                &StoreCredentials {
                    username: config.validator_username.clone(),
                    password: config.validator_password.clone(),
                },
            )?;
            let manager = RedisKeyStore::connect(
                &redis,
                &StoreCredentials {
                    username: config.manager_username.clone(),
                    password: config.manager_password.clone(),
                },
            )?;
            (Arc::new(validator), Arc::new(manager))
        }
    };

    // Fail fast if either principal cannot reach the store.
    if !validator.ping() {
        bail!("store ping failed with validator credentials");
    }
    if !manager.ping() {
        bail!("store ping failed with manager credentials");
    }
    info!("Connected to store with both validator and manager credentials");

    if config.admin_secret.is_none() {
        warn!("ADMIN_SECRET not set - admin endpoints will be disabled");
    }

    let state = web::Data::new(
        AppState::new(validator, manager, config.admin_secret.clone())
            .with_rate_limit(config.rate_limit),
    );

    info!("Starting KeyMaster on {}", config.bind_addr);
    HttpServer::new(move || {
        App::new()
            .wrap(util::cors_config_from_env())
            .app_data(state.clone())
            .configure(server::configure)
    })
    .bind(config.bind_addr.as_str())?
    .run()
    .await?;

    Ok(())
}
