use std::net::SocketAddr;

use userreg::{app, config::AppConfig, state::AppState, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing("userreg=debug,axum=info,tower_http=info,sqlx=warn");

    let config = AppConfig::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!(env = %config.env, "starting userreg");

    // Startup: open the pool and create tables.
    let app_state = AppState::init(config).await?;
    let db = app_state.db.clone();

    let result = app::serve(app::build_app(app_state), addr, app::shutdown_signal()).await;

    // Shutdown: dispose the pool whether or not serving failed.
    db.close().await;
    result
}
