// ===============================
// src/api.rs
// ===============================
//
// Commerce backend client (REST, JSON). The backend is the sole authority
// for catalog, pricing, stock and the order lifecycle; this module only
// shapes requests and maps responses and failures.
//
use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use mockall::automock;
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::domain::{
    DeliveryAddress, DirectCheckoutRequest, DirectCheckoutResponse, GatewayCheckoutRequest,
    GatewayCheckoutResponse, LoginRequest, LoginResponse, NewDeliveryAddress, OrderDetail, OrderId,
    OrderSummary, Product, RetryPaymentRequest, RetryPaymentResponse, ShippingConfigResponse,
};
use crate::metrics::{API_LATENCY_MS, API_REQUESTS};

pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered {status}: {}", .message.as_deref().unwrap_or("no message"))]
    Server { status: u16, message: Option<String> },
    #[error("bad endpoint url: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    /// What the shopper sees: the server's own message when it sent one.
    pub fn user_message(&self) -> &str {
        match self {
            ApiError::Server {
                message: Some(m), ..
            } => m,
            _ => GENERIC_FAILURE,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Server { status, .. } => Some(*status),
            ApiError::Http(e) => e.status().map(|s| s.as_u16()),
            ApiError::Url(_) => None,
        }
    }
}

#[automock]
#[async_trait]
pub trait CommerceApi: Send + Sync {
    /// `GET /store/shipping-config?storeId=`
    async fn shipping_config(&self, store_id: i64) -> Result<ShippingConfigResponse, ApiError>;

    /// `POST /clients/login`
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError>;

    /// `GET /store/products?storeId=`
    async fn products(&self, store_id: Option<i64>) -> Result<Vec<Product>, ApiError>;

    /// `GET /store/products/:slug?storeId=`
    async fn product(&self, slug: &str, store_id: Option<i64>) -> Result<Product, ApiError>;

    /// `GET /store/addresses`
    async fn addresses(&self, token: &str) -> Result<Vec<DeliveryAddress>, ApiError>;

    /// `POST /store/addresses`
    async fn create_address(
        &self,
        token: &str,
        address: &NewDeliveryAddress,
    ) -> Result<DeliveryAddress, ApiError>;

    /// `POST /payments/checkout`: creates the order and a hosted payment page.
    async fn gateway_checkout(
        &self,
        token: &str,
        request: &GatewayCheckoutRequest,
    ) -> Result<GatewayCheckoutResponse, ApiError>;

    /// `POST /store/checkout`: creates an order paid outside the gateway.
    async fn direct_checkout(
        &self,
        token: &str,
        request: &DirectCheckoutRequest,
    ) -> Result<DirectCheckoutResponse, ApiError>;

    /// `POST /payments/checkout/retry`: fresh redirect for an existing order.
    async fn retry_payment(
        &self,
        token: &str,
        order_id: OrderId,
    ) -> Result<RetryPaymentResponse, ApiError>;

    /// `GET /store/orders`
    async fn orders(&self, token: &str) -> Result<Vec<OrderSummary>, ApiError>;

    /// `GET /store/orders/:id`
    async fn order(&self, token: &str, order_id: OrderId) -> Result<OrderDetail, ApiError>;
}

pub type SharedApi = Arc<dyn CommerceApi>;

#[derive(Debug, Clone)]
pub struct HttpCommerceApi {
    base: Url,
    http: Client,
}

impl HttpCommerceApi {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { base, http })
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.base.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}{path}"))?)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        let started = std::time::Instant::now();
        let result = request.send().await;
        API_LATENCY_MS
            .with_label_values(&[endpoint])
            .observe(started.elapsed().as_secs_f64() * 1000.0);

        let rsp = match result {
            Ok(rsp) => rsp,
            Err(e) => {
                API_REQUESTS.with_label_values(&[endpoint, "transport"]).inc();
                warn!(endpoint, ?e, "api: request failed");
                return Err(e.into());
            }
        };

        let status = rsp.status();
        API_REQUESTS
            .with_label_values(&[endpoint, status.as_str()])
            .inc();
        if !status.is_success() {
            let message = server_message(rsp).await;
            warn!(endpoint, %status, message = ?message, "api: request rejected");
            return Err(ApiError::Server {
                status: status.as_u16(),
                message,
            });
        }
        debug!(endpoint, %status, "api: ok");
        Ok(rsp.json::<T>().await?)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        path: &str,
        token: Option<&str>,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let mut req = self.http.get(self.url(path)?).query(query);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        self.send(endpoint, req).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        path: &str,
        token: Option<&str>,
        body: &B,
    ) -> Result<T, ApiError> {
        let mut req = self.http.post(self.url(path)?).json(body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        self.send(endpoint, req).await
    }
}

fn store_query(store_id: Option<i64>) -> Vec<(&'static str, String)> {
    store_id
        .map(|id| ("storeId", id.to_string()))
        .into_iter()
        .collect()
}

/// `{"message": "..."}` or `{"message": ["...", "..."]}` when the backend sends one.
async fn server_message(rsp: Response) -> Option<String> {
    let body = rsp.text().await.unwrap_or_default();
    extract_message(&body)
}

fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("message")? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Array(items) => {
            let parts: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        _ => None,
    }
}

#[async_trait]
impl CommerceApi for HttpCommerceApi {
    async fn shipping_config(&self, store_id: i64) -> Result<ShippingConfigResponse, ApiError> {
        self.get(
            "shipping_config",
            "/store/shipping-config",
            None,
            &[("storeId", store_id.to_string())],
        )
        .await
    }

    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        self.post("login", "/clients/login", None, request).await
    }

    async fn products(&self, store_id: Option<i64>) -> Result<Vec<Product>, ApiError> {
        self.get("products", "/store/products", None, &store_query(store_id))
            .await
    }

    async fn product(&self, slug: &str, store_id: Option<i64>) -> Result<Product, ApiError> {
        let path = format!("/store/products/{}", urlencoding::encode(slug));
        self.get("product", &path, None, &store_query(store_id))
            .await
    }

    async fn addresses(&self, token: &str) -> Result<Vec<DeliveryAddress>, ApiError> {
        self.get("addresses", "/store/addresses", Some(token), &[])
            .await
    }

    async fn create_address(
        &self,
        token: &str,
        address: &NewDeliveryAddress,
    ) -> Result<DeliveryAddress, ApiError> {
        self.post("create_address", "/store/addresses", Some(token), address)
            .await
    }

    async fn gateway_checkout(
        &self,
        token: &str,
        request: &GatewayCheckoutRequest,
    ) -> Result<GatewayCheckoutResponse, ApiError> {
        self.post("gateway_checkout", "/payments/checkout", Some(token), request)
            .await
    }

    async fn direct_checkout(
        &self,
        token: &str,
        request: &DirectCheckoutRequest,
    ) -> Result<DirectCheckoutResponse, ApiError> {
        self.post("direct_checkout", "/store/checkout", Some(token), request)
            .await
    }

    async fn retry_payment(
        &self,
        token: &str,
        order_id: OrderId,
    ) -> Result<RetryPaymentResponse, ApiError> {
        self.post(
            "retry_payment",
            "/payments/checkout/retry",
            Some(token),
            &RetryPaymentRequest { order_id },
        )
        .await
    }

    async fn orders(&self, token: &str) -> Result<Vec<OrderSummary>, ApiError> {
        self.get("orders", "/store/orders", Some(token), &[]).await
    }

    async fn order(&self, token: &str, order_id: OrderId) -> Result<OrderDetail, ApiError> {
        let path = format!("/store/orders/{order_id}");
        self.get("order", &path, Some(token), &[]).await
    }
}
