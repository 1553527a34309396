// ===============================
// src/shipping.rs
// ===============================
//
// Shipping rule: free at or above the store threshold, flat cost below it.
// The per-store config comes from the backend; lookups never fail and fall
// back to the built-in defaults.
//
use std::time::{Duration, Instant};

use ahash::AHashMap as HashMap;
use tracing::{debug, warn};

use crate::api::SharedApi;
use crate::domain::{Money, ShippingConfig, ShippingConfigResponse};
use crate::metrics::SHIPPING_CONFIG_LOOKUPS;

pub const DEFAULT_FREE_SHIPPING_THRESHOLD: Money = 50_000;
pub const DEFAULT_SHIPPING_COST: Money = 8_000;

impl Default for ShippingConfig {
    fn default() -> Self {
        Self {
            free_shipping_threshold: DEFAULT_FREE_SHIPPING_THRESHOLD,
            shipping_cost: DEFAULT_SHIPPING_COST,
        }
    }
}

impl From<ShippingConfigResponse> for ShippingConfig {
    /// Null fields fall back one by one.
    fn from(rsp: ShippingConfigResponse) -> Self {
        Self {
            free_shipping_threshold: rsp
                .free_shipping_threshold
                .unwrap_or(DEFAULT_FREE_SHIPPING_THRESHOLD),
            shipping_cost: rsp.shipping_cost.unwrap_or(DEFAULT_SHIPPING_COST),
        }
    }
}

pub fn evaluate(subtotal: Money, config: &ShippingConfig) -> Money {
    if subtotal >= config.free_shipping_threshold {
        0
    } else {
        config.shipping_cost
    }
}

/// Totals block of the cart view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShippingQuote {
    pub subtotal: Money,
    pub shipping: Money,
    pub total: Money,
    pub remaining_for_free_shipping: Money,
    pub progress_percent: f64,
}

impl ShippingQuote {
    pub fn new(subtotal: Money, config: &ShippingConfig) -> Self {
        let shipping = evaluate(subtotal, config);
        let threshold = config.free_shipping_threshold;
        let progress_percent = if threshold <= 0 {
            100.0
        } else {
            (subtotal as f64 / threshold as f64 * 100.0).clamp(0.0, 100.0)
        };
        Self {
            subtotal,
            shipping,
            total: subtotal.saturating_add(shipping),
            remaining_for_free_shipping: threshold.saturating_sub(subtotal).max(0),
            progress_percent,
        }
    }

    pub fn is_free(&self) -> bool {
        self.shipping == 0
    }
}

/// Fetches and caches per-store shipping configs for `ttl`.
/// Only successful fetches are cached.
pub struct ShippingConfigProvider {
    api: SharedApi,
    ttl: Duration,
    cache: HashMap<i64, (Instant, ShippingConfig)>,
}

impl ShippingConfigProvider {
    pub fn new(api: SharedApi, ttl: Duration) -> Self {
        Self {
            api,
            ttl,
            cache: HashMap::new(),
        }
    }

    pub async fn config_for(&mut self, store_id: Option<i64>) -> ShippingConfig {
        let Some(store_id) = store_id else {
            SHIPPING_CONFIG_LOOKUPS.with_label_values(&["fallback"]).inc();
            debug!("shipping: no store id, using defaults");
            return ShippingConfig::default();
        };

        if let Some((fetched_at, config)) = self.cache.get(&store_id) {
            if fetched_at.elapsed() < self.ttl {
                SHIPPING_CONFIG_LOOKUPS.with_label_values(&["cached"]).inc();
                return *config;
            }
        }

        match self.api.shipping_config(store_id).await {
            Ok(rsp) => {
                let config = ShippingConfig::from(rsp);
                self.cache.insert(store_id, (Instant::now(), config));
                SHIPPING_CONFIG_LOOKUPS.with_label_values(&["remote"]).inc();
                config
            }
            Err(e) => {
                SHIPPING_CONFIG_LOOKUPS.with_label_values(&["fallback"]).inc();
                warn!(store_id, %e, "shipping: config fetch failed, using defaults");
                ShippingConfig::default()
            }
        }
    }
}
