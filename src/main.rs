use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cargo_tariff_api::auth::KeyPair;
use cargo_tariff_api::config::{AppConfig, ConfigError};
use cargo_tariff_api::database::DatabaseManager;
use cargo_tariff_api::handlers;
use cargo_tariff_api::state::AppState;

#[derive(Parser)]
#[command(name = "cargo-tariff-api")]
#[command(about = "Cargo insurance tariff API")]
#[command(version)]
struct Args {
    #[arg(long, help = "Address to bind (overrides APP_HOST)")]
    host: Option<String>,

    #[arg(long, env = "APP_PORT", help = "Port to listen on")]
    port: Option<u16>,

    #[arg(long, help = "Apply pending migrations before serving")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, JWK, etc.
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut config = AppConfig::from_env()?;
    init_tracing(&config);
    tracing::info!("Starting cargo-tariff-api in {:?} mode", config.environment);

    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }

    let jwk = config.security.jwk.as_ref().ok_or(ConfigError::Missing("JWK"))?;
    let keys = KeyPair::from_jwk(jwk)?;

    let pool = DatabaseManager::connect(&config.database).await?;
    if args.migrate {
        DatabaseManager::migrate(&pool).await?;
    }

    let bind_addr = format!("{}:{}", config.api.host, config.api.port);
    let state = AppState::new(pool, config, keys)?;
    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;
    tracing::info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Human-readable output in development, JSON lines elsewhere.
fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.is_development() {
        builder.init();
    } else {
        builder.json().init();
    }
}
