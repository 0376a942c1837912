use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::LevelFilter;

use crate::batch::DEFAULT_DEBOUNCE;
use crate::finalizer::DEFAULT_SEND_DELAY;

/// Process configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub api_id: i32,
    pub api_hash: String,
    pub bot_token: String,
    pub mongo_uri: String,
    pub database_name: String,
    pub admin_id: Option<i64>,
    pub base_url: String,
    pub listen_addr: SocketAddr,
    pub session_file: String,
    pub batch_debounce: Duration,
    pub send_delay: Duration,
    pub omdb_api_key: Option<String>,
    pub log_level: LevelFilter,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env::vars().collect())
    }

    fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());
        let required = |key: &str| {
            get(key)
                .map(str::to_string)
                .with_context(|| format!("{} env is not set", key))
        };
        fn parsed<T>(key: &str, value: Option<&str>) -> Result<Option<T>>
        where
            T: FromStr,
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            value
                .map(|v| v.parse::<T>().with_context(|| format!("{} env is invalid", key)))
                .transpose()
        }

        let api_id = parsed("API_ID", Some(required("API_ID")?.as_str()))?.unwrap_or_default();
        let vps_ip = get("VPS_IP").unwrap_or("0.0.0.0").to_string();
        let port: u16 = match parsed("VPS_PORT", get("VPS_PORT"))? {
            Some(port) => port,
            None => parsed("PORT", get("PORT"))?.unwrap_or(8080),
        };
        let listen_addr = format!("{}:{}", vps_ip, port)
            .parse::<SocketAddr>()
            .context("VPS_IP/VPS_PORT do not form a socket address")?;
        let base_url = get("BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| format!("http://{}:{}", vps_ip, port));

        Ok(Self {
            api_id,
            api_hash: required("API_HASH")?,
            bot_token: required("BOT_TOKEN")?,
            mongo_uri: required("MONGO_URI")?,
            database_name: get("DATABASE_NAME").unwrap_or("file_store_bot").to_string(),
            admin_id: parsed("ADMIN_ID", get("ADMIN_ID"))?,
            base_url,
            listen_addr,
            session_file: get("SESSION_FILE").unwrap_or("session.bin").to_string(),
            batch_debounce: parsed("BATCH_DEBOUNCE_SECS", get("BATCH_DEBOUNCE_SECS"))?
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_DEBOUNCE),
            send_delay: parsed("SEND_DELAY_MS", get("SEND_DELAY_MS"))?
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_SEND_DELAY),
            omdb_api_key: get("OMDB_API_KEY").map(str::to_string),
            log_level: match get("LOG_LEVEL") {
                Some(level) => level
                    .parse()
                    .map_err(|_| anyhow!("LOG_LEVEL env is invalid: {}", level))?,
                None => LevelFilter::Info,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("API_ID", "12345"),
            ("API_HASH", "abc"),
            ("BOT_TOKEN", "1:tok"),
            ("MONGO_URI", "mongodb://localhost"),
        ]
    }

    #[test]
    fn fills_defaults() {
        let config = Config::from_vars(vars(&required())).unwrap();
        assert_eq!(config.api_id, 12345);
        assert_eq!(config.database_name, "file_store_bot");
        assert_eq!(config.base_url, "http://0.0.0.0:8080");
        assert_eq!(config.listen_addr.port(), 8080);
        assert_eq!(config.batch_debounce, Duration::from_secs(7));
        assert_eq!(config.send_delay, Duration::from_millis(1500));
        assert_eq!(config.admin_id, None);
        assert_eq!(config.omdb_api_key, None);
        assert_eq!(config.log_level, LevelFilter::Info);
    }

    #[test]
    fn reads_overrides() {
        let mut pairs = required();
        pairs.extend([
            ("ADMIN_ID", "99"),
            ("VPS_IP", "127.0.0.1"),
            ("PORT", "9000"),
            ("BASE_URL", "https://files.example/"),
            ("BATCH_DEBOUNCE_SECS", "3"),
            ("LOG_LEVEL", "debug"),
        ]);
        let config = Config::from_vars(vars(&pairs)).unwrap();
        assert_eq!(config.admin_id, Some(99));
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.base_url, "https://files.example");
        assert_eq!(config.batch_debounce, Duration::from_secs(3));
        assert_eq!(config.log_level, LevelFilter::Debug);
    }

    #[test]
    fn missing_required_var_is_named() {
        let err = Config::from_vars(vars(&[("API_ID", "1")])).unwrap_err();
        assert!(err.to_string().contains("API_HASH"));
    }

    #[test]
    fn rejects_bad_numbers() {
        let mut pairs = required();
        pairs.push(("ADMIN_ID", "me"));
        assert!(Config::from_vars(vars(&pairs)).is_err());
    }
}
