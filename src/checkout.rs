// ===============================
// src/checkout.rs
// ===============================
//
// Turns the local cart into a server-side order.
//
// Preconditions are checked before any order is created and never touch
// the cart. On success the cart is cleared as soon as the order exists,
// before the gateway confirms payment; an abandoned payment is recovered
// through `retry_payment` on the same order.
//
use thiserror::Error;
use tracing::{info, warn};

use crate::api::{ApiError, SharedApi, GENERIC_FAILURE};
use crate::auth::Credentials;
use crate::cart::CartStore;
use crate::domain::{
    CartLine, CheckoutItem, DirectCheckoutRequest, Event, GatewayCheckoutRequest, OrderId,
    PaymentMethod,
};
use crate::journal::Journal;
use crate::metrics::CHECKOUTS;
use crate::storage::{CartRepository, StorageError};

/// Where the shopper is sent next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    SignIn,
    Orders,
    OrderDetail(OrderId),
}

/// Navigation side effects of the checkout flow.
pub trait Navigator {
    /// Open a page outside the storefront (the hosted payment page).
    fn open_external(&mut self, url: &str);
    fn navigate(&mut self, route: Route);
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("not authenticated")]
    NotAuthenticated,
    #[error("cart is empty")]
    EmptyCart,
    #[error("no delivery address available")]
    NoDeliveryAddress,
    #[error("store could not be determined")]
    UnknownStore,
    #[error("payment gateway returned no redirect for order {0}")]
    MissingRedirect(OrderId),
    #[error("payment retry for order {requested} was answered for order {answered}")]
    RetryMismatch { requested: OrderId, answered: OrderId },
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CheckoutError {
    pub fn user_message(&self) -> String {
        match self {
            CheckoutError::Api(e) => e.user_message().to_string(),
            CheckoutError::MissingRedirect(_) | CheckoutError::RetryMismatch { .. } => {
                GENERIC_FAILURE.to_string()
            }
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaceOrder {
    pub payment_method: PaymentMethod,
    /// `None` picks the shopper's default address when one is needed.
    pub delivery_address_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    /// Order created; payment continues on the hosted page.
    Redirected {
        order_id: OrderId,
        order_code: Option<String>,
        redirect_url: String,
    },
    /// Order created without a gateway step.
    Placed { order_id: Option<OrderId> },
}

pub struct CheckoutOrchestrator {
    api: SharedApi,
    default_store_id: Option<i64>,
    journal: Journal,
}

impl CheckoutOrchestrator {
    pub fn new(api: SharedApi, default_store_id: Option<i64>, journal: Journal) -> Self {
        Self {
            api,
            default_store_id,
            journal,
        }
    }

    pub async fn submit<R: CartRepository, N: Navigator>(
        &self,
        credentials: Option<&Credentials>,
        cart: &mut CartStore<R>,
        navigator: &mut N,
        order: PlaceOrder,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        let flow = if order.payment_method.uses_gateway() {
            "gateway"
        } else {
            "direct"
        };
        let result = self.place(credentials, cart, navigator, order).await;
        let outcome = match &result {
            Ok(_) => "created",
            Err(CheckoutError::NotAuthenticated) => "unauthenticated",
            Err(CheckoutError::Api(_) | CheckoutError::MissingRedirect(_)) => "server_error",
            Err(_) => "precondition",
        };
        CHECKOUTS.with_label_values(&[flow, outcome]).inc();
        if let Err(e) = &result {
            warn!(flow, %e, "checkout: not completed");
        }
        result
    }

    async fn place<R: CartRepository, N: Navigator>(
        &self,
        credentials: Option<&Credentials>,
        cart: &mut CartStore<R>,
        navigator: &mut N,
        order: PlaceOrder,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        let Some(credentials) = credentials else {
            navigator.navigate(Route::SignIn);
            return Err(CheckoutError::NotAuthenticated);
        };
        if cart.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        let items: Vec<CheckoutItem> = cart
            .lines()
            .iter()
            .map(|l| CheckoutItem {
                variant_id: l.variant_id,
                quantity: l.quantity,
            })
            .collect();

        if order.payment_method.uses_gateway() {
            let store_id = self
                .resolve_store(credentials, cart)
                .ok_or(CheckoutError::UnknownStore)?;
            let delivery_address_id = self.resolve_address(credentials, order).await?;
            let request = GatewayCheckoutRequest {
                store_id,
                cart: items,
                client_id: credentials.claims.client_id,
                delivery_address_id,
            };
            self.gateway_flow(credentials, cart, navigator, request).await
        } else {
            let delivery_address_id = self.resolve_address(credentials, order).await?;
            let request = DirectCheckoutRequest {
                items,
                payment_method: order.payment_method,
                delivery_address_id,
            };
            self.direct_flow(credentials, cart, navigator, request).await
        }
    }

    async fn gateway_flow<R: CartRepository, N: Navigator>(
        &self,
        credentials: &Credentials,
        cart: &mut CartStore<R>,
        navigator: &mut N,
        request: GatewayCheckoutRequest,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        let rsp = self
            .api
            .gateway_checkout(&credentials.token, &request)
            .await?;
        let Some(redirect_url) = rsp.init_point.filter(|u| !u.trim().is_empty()) else {
            return Err(CheckoutError::MissingRedirect(rsp.order_id));
        };

        info!(order_id = rsp.order_id, order_code = ?rsp.order_code, "checkout: order created, opening payment page");
        self.journal.record(Event::OrderCreated {
            order_id: Some(rsp.order_id),
            payment_method: PaymentMethod::MercadoPago,
        });
        navigator.open_external(&redirect_url);
        cart.clear()?;
        navigator.navigate(Route::OrderDetail(rsp.order_id));

        Ok(CheckoutOutcome::Redirected {
            order_id: rsp.order_id,
            order_code: rsp.order_code,
            redirect_url,
        })
    }

    async fn direct_flow<R: CartRepository, N: Navigator>(
        &self,
        credentials: &Credentials,
        cart: &mut CartStore<R>,
        navigator: &mut N,
        request: DirectCheckoutRequest,
    ) -> Result<CheckoutOutcome, CheckoutError> {
        let rsp = self
            .api
            .direct_checkout(&credentials.token, &request)
            .await?;

        info!(order_id = ?rsp.id, method = request.payment_method.as_str(), "checkout: order placed");
        self.journal.record(Event::OrderCreated {
            order_id: rsp.id,
            payment_method: request.payment_method,
        });
        cart.clear()?;
        navigator.navigate(Route::Orders);

        Ok(CheckoutOutcome::Placed { order_id: rsp.id })
    }

    /// Ask for a fresh payment page for an order left `PENDING`. No order is
    /// created and the cart is not touched. A page issued for any other
    /// order is never opened.
    pub async fn retry_payment<N: Navigator>(
        &self,
        credentials: Option<&Credentials>,
        navigator: &mut N,
        order_id: OrderId,
    ) -> Result<String, CheckoutError> {
        let Some(credentials) = credentials else {
            navigator.navigate(Route::SignIn);
            return Err(CheckoutError::NotAuthenticated);
        };
        let rsp = self
            .api
            .retry_payment(&credentials.token, order_id)
            .await?;
        if rsp.order_id != order_id {
            warn!(order_id, answered = rsp.order_id, "checkout: retry answered for another order");
            return Err(CheckoutError::RetryMismatch {
                requested: order_id,
                answered: rsp.order_id,
            });
        }
        let Some(redirect_url) = rsp.init_point.filter(|u| !u.trim().is_empty()) else {
            return Err(CheckoutError::MissingRedirect(order_id));
        };

        info!(order_id, "checkout: payment retry, opening payment page");
        self.journal.record(Event::PaymentRetried { order_id });
        navigator.open_external(&redirect_url);
        Ok(redirect_url)
    }

    fn resolve_store<R: CartRepository>(
        &self,
        credentials: &Credentials,
        cart: &CartStore<R>,
    ) -> Option<i64> {
        resolve_store_id(Some(credentials), cart.lines(), self.default_store_id)
    }

    async fn resolve_address(
        &self,
        credentials: &Credentials,
        order: PlaceOrder,
    ) -> Result<Option<i64>, CheckoutError> {
        if !order.payment_method.requires_delivery_address() {
            return Ok(order.delivery_address_id);
        }
        if let Some(id) = order.delivery_address_id {
            return Ok(Some(id));
        }
        let addresses = self.api.addresses(&credentials.token).await?;
        addresses
            .iter()
            .find(|a| a.is_default)
            .or_else(|| addresses.first())
            .map(|a| Some(a.id))
            .ok_or(CheckoutError::NoDeliveryAddress)
    }
}

/// Token claim first, then the store recorded on the cart lines, then
/// the configured store. Zero counts as missing at every step.
pub fn resolve_store_id(
    credentials: Option<&Credentials>,
    lines: &[CartLine],
    fallback: Option<i64>,
) -> Option<i64> {
    credentials
        .map(|c| c.claims.store_id)
        .into_iter()
        .chain(lines.iter().filter_map(|l| l.store_id))
        .chain(fallback)
        .find(|id| *id > 0)
}
