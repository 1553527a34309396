// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : storefront_cart — storefront cart, shipping and checkout client in Rust
Module  : config.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Persists a shopper cart locally, prices shipping from the store
          config, turns the cart into an order through the payment gateway
          or a direct method, follows the order status, exposes Prometheus
          metrics, and records JSONL events.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
use std::{env, path::PathBuf, time::Duration};

use dotenvy::dotenv;
use thiserror::Error;
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:3000";
pub const DEFAULT_DATA_DIR: &str = ".storefront";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} is not a valid URL: {source}")]
    Url {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("{key}={value:?} is not a valid number")]
    Number { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Settings {
    // backend
    pub api_url: Url,
    pub store_id: Option<i64>,
    pub http_timeout: Duration,

    // local state
    pub data_dir: PathBuf,

    // behaviour
    pub order_poll_every: Duration,
    pub shipping_config_ttl: Duration,

    // files/metrics
    pub record_file: Option<PathBuf>,
    pub metrics_port: Option<u16>,
}

impl Settings {
    /// Read `.env` (when present) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        // ===== Backend =====
        let api_url = get("STOREFRONT_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = Url::parse(&api_url).map_err(|source| ConfigError::Url {
            key: "STOREFRONT_API_URL",
            source,
        })?;
        let store_id = parse_opt(&get, "STORE_ID")?;
        let http_timeout = Duration::from_secs(parse_opt(&get, "HTTP_TIMEOUT_SECS")?.unwrap_or(15));

        // ===== Local state =====
        let data_dir = get("STOREFRONT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        // ===== Polling / caching =====
        let order_poll_every =
            Duration::from_millis(parse_opt(&get, "ORDER_POLL_INTERVAL_MS")?.unwrap_or(4_000));
        let shipping_config_ttl =
            Duration::from_secs(parse_opt(&get, "SHIPPING_CONFIG_TTL_SECS")?.unwrap_or(300));

        // ===== Files / metrics =====
        let record_file = get("RECORD_FILE").map(PathBuf::from);
        let metrics_port = parse_opt(&get, "METRICS_PORT")?;

        Ok(Settings {
            api_url,
            store_id,
            http_timeout,
            data_dir,
            order_poll_every,
            shipping_config_ttl,
            record_file,
            metrics_port,
        })
    }
}

fn parse_opt<T, G>(get: &G, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Number { key, value }),
    }
}
