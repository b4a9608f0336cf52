use userreg::{config::AppConfig, seed, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing("userreg=info,sqlx=warn");

    let count = std::env::var("SEED_COUNT")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(seed::DEFAULT_SEED_COUNT);

    let config = AppConfig::from_env()?;
    let created = seed::run(config, count).await?;
    tracing::info!(created, "seed completed");
    Ok(())
}
