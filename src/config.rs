use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Deployment environment tag, read from `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Production => "production",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "production" | "prod" => Ok(Environment::Production),
            other => anyhow::bail!("unknown APP_ENV value: {other}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub test_url: Option<String>,
    pub echo: bool,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub env: Environment,
    pub database: DatabaseConfig,
    pub host: String,
    pub port: u16,
}

pub const DEFAULT_DATABASE_URL: &str = "sqlite://./userreg.db";
pub const TEST_DATABASE_URL: &str = "sqlite::memory:";

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let env = std::env::var("APP_ENV")
            .ok()
            .map(|v| v.parse::<Environment>())
            .transpose()?
            .unwrap_or(Environment::Development);

        let database = DatabaseConfig {
            url: std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.into()),
            test_url: std::env::var("TEST_DATABASE_URL").ok(),
            echo: std::env::var("DATABASE_ECHO")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(10),
        };

        let port = std::env::var("APP_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(8080);

        Ok(Self {
            env,
            database,
            host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
        })
    }

    /// Config for tests: in-memory database, no env lookups.
    pub fn for_tests() -> Self {
        Self {
            env: Environment::Test,
            database: DatabaseConfig {
                url: TEST_DATABASE_URL.into(),
                test_url: Some(TEST_DATABASE_URL.into()),
                echo: false,
                max_connections: 1,
            },
            host: "127.0.0.1".into(),
            port: 0,
        }
    }

    /// URL of the database the current environment should talk to.
    pub fn active_database_url(&self) -> &str {
        match (self.env, self.database.test_url.as_deref()) {
            (Environment::Test, Some(url)) => url,
            (Environment::Test, None) => TEST_DATABASE_URL,
            _ => &self.database.url,
        }
    }
}
