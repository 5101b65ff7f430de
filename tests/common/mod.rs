#![allow(dead_code)]

use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use cargo_tariff_api::auth::hash_password;

pub const JWK: &str = include_str!("../fixtures/jwk.json");

static SERVER: OnceLock<TestServer> = OnceLock::new();

pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    child: Child,
}

/// Integration tests that need Postgres skip themselves when this is unset.
pub fn database_url() -> Option<String> {
    std::env::var("DATABASE_URL").ok().filter(|url| !url.is_empty())
}

impl TestServer {
    fn spawn(database_url: &str) -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let mut cmd = Command::new(env!("CARGO_BIN_EXE_cargo-tariff-api"));
        cmd.arg("--migrate")
            .env("APP_ENV", "development")
            .env("APP_HOST", "127.0.0.1")
            .env("APP_PORT", port.to_string())
            .env("DATABASE_URL", database_url)
            .env("JWK", JWK)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().context("failed to spawn server binary")?;

        Ok(Self { port, base_url, child })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            let url = format!("{}/health", self.base_url);
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Starts the shared server once per test binary; `None` without a database.
pub async fn ensure_server() -> Result<Option<&'static TestServer>> {
    let Some(database_url) = database_url() else {
        eprintln!("DATABASE_URL not set, skipping");
        return Ok(None);
    };
    let server = SERVER.get_or_init(|| TestServer::spawn(&database_url).expect("failed to spawn server binary"));
    server.wait_ready(Duration::from_secs(20)).await?;
    Ok(Some(server))
}

pub async fn pool() -> Result<PgPool> {
    let url = database_url().context("DATABASE_URL not set")?;
    Ok(PgPoolOptions::new().max_connections(2).connect(&url).await?)
}

pub struct SeedUser {
    pub active: bool,
    pub superuser: bool,
    pub allow_basic_login: bool,
}

impl Default for SeedUser {
    fn default() -> Self {
        Self { active: true, superuser: true, allow_basic_login: true }
    }
}

/// Inserts a user with a unique email; returns `(id, email)`.
pub async fn seed_user(password: &str, seed: SeedUser) -> Result<(Uuid, String)> {
    let pool = pool().await?;
    let email = format!("user-{}@example.com", Uuid::new_v4().simple());
    let hashed = hash_password(password).await?;
    let id: Uuid = sqlx::query_scalar(
        "INSERT INTO \"user\" (first_name, last_name, full_name, email, hashed_password, is_active, \
         is_superuser, allow_basic_login) VALUES ('Test', 'User', 'Test User', $1, $2, $3, $4, $5) RETURNING id",
    )
    .bind(&email)
    .bind(&hashed)
    .bind(seed.active)
    .bind(seed.superuser)
    .bind(seed.allow_basic_login)
    .fetch_one(&pool)
    .await?;
    Ok((id, email))
}

pub async fn login(server: &TestServer, email: &str, password: &str) -> Result<reqwest::Response> {
    Ok(reqwest::Client::new()
        .post(server.url("/api/v1/auth/basic"))
        .form(&[("username", email), ("password", password)])
        .send()
        .await?)
}

/// Logs in a fresh superuser and returns its access token.
pub async fn access_token(server: &TestServer) -> Result<String> {
    let (_, email) = seed_user("secret", SeedUser::default()).await?;
    let body: Value = login(server, &email, "secret").await?.json().await?;
    body["data"]["access_token"]
        .as_str()
        .map(str::to_string)
        .context("login returned no access token")
}
