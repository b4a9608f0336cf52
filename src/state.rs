use crate::config::AppConfig;
use crate::db::Database;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Opens the database named by `config` and makes sure the schema exists.
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let config = Arc::new(config);
        let db = Database::open_with(
            config.active_database_url(),
            config.database.echo,
            config.database.max_connections,
        )
        .await?;
        db.create_schema().await?;
        Ok(Self { db, config })
    }

    /// Fresh in-memory database per call.
    pub async fn for_tests() -> anyhow::Result<Self> {
        Self::init(AppConfig::for_tests()).await
    }
}
