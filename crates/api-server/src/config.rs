use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    // AKTools base URL; price and sector refresh are disabled without it
    pub market_data_url: Option<String>,
    pub market_data_timeout: Duration,

    pub holidays_file: Option<PathBuf>,

    // None allows any origin
    pub cors_allowed_origins: Option<Vec<String>>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let port: u16 = get("PORT")
            .unwrap_or_else(|| "5000".to_string())
            .parse()
            .context("PORT must be a number between 0 and 65535")?;

        let timeout_secs: u64 = get("MARKET_DATA_TIMEOUT_SECS")
            .unwrap_or_else(|| "30".to_string())
            .parse()
            .context("MARKET_DATA_TIMEOUT_SECS must be a whole number of seconds")?;
        if timeout_secs == 0 {
            bail!("MARKET_DATA_TIMEOUT_SECS must be greater than 0");
        }

        let cors_allowed_origins = get("CORS_ALLOWED_ORIGINS").map(|v| {
            v.split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect::<Vec<_>>()
        });

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| "sqlite:trade_journal.db".to_string()),
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            market_data_url: get("MARKET_DATA_URL"),
            market_data_timeout: Duration::from_secs(timeout_secs),
            holidays_file: get("HOLIDAYS_FILE").map(PathBuf::from),
            cors_allowed_origins,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
