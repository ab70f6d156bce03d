use anyhow::Context;
use tracing::{info, warn};

use carsharing_agent::cantamen::CantamenClient;
use carsharing_agent::config::AppConfig;
use carsharing_agent::logging::init_logging;
use carsharing_agent::web::{AppState, create_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the variables may come from the shell
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;
    init_logging(&config.logging).with_context(|| {
        format!("failed to open error log {}", config.logging.error_log.display())
    })?;

    for var in config.missing_secrets() {
        warn!(var, "not set; upstream calls will fail");
    }

    let client =
        CantamenClient::new(config.upstream.clone()).context("failed to create casirest client")?;
    let state = AppState::new(client, config.account, &config.cache, config.defaults);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(
        addr = %config.bind_addr,
        base_url = %config.upstream.base_url,
        "carsharing agent listening"
    );
    info!("agent endpoints under /gpt-carsharing-agent, health check at /health");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
