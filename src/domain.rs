// ===============================
// src/domain.rs
// ===============================
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

/// Whole units of the store currency (COP has no minor unit in use).
pub type Money = i64;
pub type VariantId = i64;
pub type OrderId = i64;

/// Amounts arrive as integers, whole-valued floats (`48000.0`) or decimal
/// strings (`"48000.00"`). Fractional amounts are rejected.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawAmount {
    Int(i64),
    Float(f64),
    Text(String),
}

impl RawAmount {
    fn whole(self) -> Option<Money> {
        match self {
            RawAmount::Int(v) => Some(v),
            RawAmount::Float(v) => {
                (v.is_finite() && v.fract() == 0.0 && v.abs() < 9.0e15).then_some(v as Money)
            }
            RawAmount::Text(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|v| RawAmount::Float(v).whole()),
        }
    }
}

fn de_money<'de, D: Deserializer<'de>>(d: D) -> Result<Money, D::Error> {
    RawAmount::deserialize(d)?
        .whole()
        .ok_or_else(|| de::Error::custom("amount is not a whole number"))
}

fn de_opt_money<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Money>, D::Error> {
    match Option::<RawAmount>::deserialize(d)? {
        None => Ok(None),
        Some(raw) => raw
            .whole()
            .map(Some)
            .ok_or_else(|| de::Error::custom("amount is not a whole number")),
    }
}

// ---- Cart ----

/// One product variant held in the cart, with its display snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub variant_id: VariantId,
    pub product_id: i64,
    pub product_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_size: Option<String>,
    #[serde(alias = "price", deserialize_with = "de_money")]
    pub unit_price: Money,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "de_opt_money"
    )]
    pub original_unit_price: Option<Money>,
    pub quantity: u32,
    #[serde(default)]
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<i64>,
}

impl CartLine {
    pub fn line_total(&self) -> Money {
        self.unit_price.saturating_mul(Money::from(self.quantity))
    }
}

/// A cart line before it has a quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCartLine {
    pub variant_id: VariantId,
    pub product_id: i64,
    pub product_name: String,
    pub variant_size: Option<String>,
    pub unit_price: Money,
    pub original_unit_price: Option<Money>,
    pub image_url: String,
    pub store_id: Option<i64>,
}

impl NewCartLine {
    pub fn with_quantity(self, quantity: u32) -> CartLine {
        CartLine {
            variant_id: self.variant_id,
            product_id: self.product_id,
            product_name: self.product_name,
            variant_size: self.variant_size,
            unit_price: self.unit_price,
            original_unit_price: self.original_unit_price,
            quantity,
            image_url: self.image_url,
            store_id: self.store_id,
        }
    }
}

// ---- Shipping ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingConfig {
    pub free_shipping_threshold: Money,
    pub shipping_cost: Money,
}

/// Wire shape of `GET /store/shipping-config`; either field may be null.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShippingConfigResponse {
    #[serde(default, deserialize_with = "de_opt_money")]
    pub free_shipping_threshold: Option<Money>,
    #[serde(default, deserialize_with = "de_opt_money")]
    pub shipping_cost: Option<Money>,
}

// ---- Catalog ----

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub store_id: Option<i64>,
    #[serde(default)]
    pub variants: Vec<ProductVariant>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariant {
    pub id: VariantId,
    pub size: String,
    #[serde(deserialize_with = "de_money")]
    pub price: Money,
    #[serde(default)]
    pub stock: u32,
    #[serde(default)]
    pub image_url: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl Product {
    pub fn variant(&self, id: VariantId) -> Option<&ProductVariant> {
        self.variants.iter().find(|v| v.id == id)
    }

    pub fn variant_by_size(&self, size: &str) -> Option<&ProductVariant> {
        self.variants
            .iter()
            .find(|v| v.size.eq_ignore_ascii_case(size.trim()))
    }

    /// Snapshot of `variant` as a cart line; the variant image wins over the product image.
    pub fn cart_line(&self, variant: &ProductVariant) -> NewCartLine {
        let image_url = if variant.image_url.is_empty() {
            self.image.clone()
        } else {
            variant.image_url.clone()
        };
        NewCartLine {
            variant_id: variant.id,
            product_id: self.id,
            product_name: self.name.clone(),
            variant_size: Some(variant.size.clone()).filter(|s| !s.is_empty()),
            unit_price: variant.price,
            original_unit_price: None,
            image_url,
            store_id: self.store_id,
        }
    }
}

// ---- Account ----

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryAddress {
    pub id: i64,
    pub label: String,
    pub address_line: String,
    pub city: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

/// Body of `POST /store/addresses`. Blank optional fields are left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDeliveryAddress {
    pub label: String,
    pub address_line: String,
    pub city: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub is_default: bool,
}

impl NewDeliveryAddress {
    /// Trim every field; returns the first required field left empty.
    pub fn normalized(self) -> Result<Self, &'static str> {
        let opt = |v: Option<String>| {
            v.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };
        let out = Self {
            label: self.label.trim().to_string(),
            address_line: self.address_line.trim().to_string(),
            city: self.city.trim().to_string(),
            department: opt(self.department),
            phone: opt(self.phone),
            is_default: self.is_default,
        };
        if out.label.is_empty() {
            return Err("label");
        }
        if out.address_line.is_empty() {
            return Err("address line");
        }
        if out.city.is_empty() {
            return Err("city");
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "accessToken", alias = "access_token")]
    pub token: String,
}

// ---- Orders ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Cancelled,
    /// Any status this client does not know; treated as settled.
    #[serde(other)]
    Other,
}

impl OrderStatus {
    /// Anything but `PENDING` ends client-side polling.
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "MERCADOPAGO")]
    MercadoPago,
    #[serde(rename = "BANK_TRANSFER")]
    BankTransfer,
    #[serde(rename = "STORE_PICKUP")]
    StorePickup,
}

impl PaymentMethod {
    /// Hosted-page flow: the server answers with a redirect target.
    pub fn uses_gateway(self) -> bool {
        matches!(self, PaymentMethod::MercadoPago)
    }

    pub fn requires_delivery_address(self) -> bool {
        !matches!(self, PaymentMethod::StorePickup)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::MercadoPago => "MERCADOPAGO",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::StorePickup => "STORE_PICKUP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Failed,
    Refunded,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: i64,
    #[serde(deserialize_with = "de_money")]
    pub amount: Money,
    pub method: String,
    pub status: PaymentStatus,
    #[serde(default)]
    pub status_label: String,
    #[serde(default)]
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    pub quantity: u32,
    #[serde(deserialize_with = "de_money")]
    pub price: Money,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineStep {
    pub status: String,
    pub label: String,
    #[serde(default)]
    pub date: Option<String>,
    pub completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAddress {
    pub address_line: String,
    pub city: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Server-authoritative order as returned by `GET /store/orders/:id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetail {
    pub id: OrderId,
    pub code: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub status_label: String,
    #[serde(deserialize_with = "de_money")]
    pub total: Money,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    #[serde(default)]
    pub payments: Vec<Payment>,
    #[serde(default)]
    pub timeline: Vec<TimelineStep>,
    #[serde(default)]
    pub delivery_address: Option<OrderAddress>,
}

impl OrderDetail {
    /// A pending order whose gateway attempt failed or never completed.
    pub fn can_retry_payment(&self) -> bool {
        self.status == OrderStatus::Pending
            && self.payments.iter().any(|p| {
                p.method == PaymentMethod::MercadoPago.as_str()
                    && matches!(p.status, PaymentStatus::Failed | PaymentStatus::Pending)
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSummary {
    pub id: OrderId,
    pub code: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub status_label: String,
    #[serde(deserialize_with = "de_money")]
    pub total: Money,
    pub created_at: DateTime<Utc>,
}

// ---- Checkout wire types ----

/// Price is never part of a checkout line: the server prices the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItem {
    pub variant_id: VariantId,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCheckoutRequest {
    pub store_id: i64,
    pub cart: Vec<CheckoutItem>,
    pub client_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_address_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayCheckoutResponse {
    #[serde(rename = "init_point", default)]
    pub init_point: Option<String>,
    pub order_id: OrderId,
    #[serde(default)]
    pub order_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectCheckoutRequest {
    pub items: Vec<CheckoutItem>,
    pub payment_method: PaymentMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_address_id: Option<i64>,
}

/// Echo of the created order; only the id is read.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectCheckoutResponse {
    #[serde(default)]
    pub id: Option<OrderId>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPaymentRequest {
    pub order_id: OrderId,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPaymentResponse {
    #[serde(rename = "init_point", default)]
    pub init_point: Option<String>,
    pub order_id: OrderId,
}

// ---- Journal ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    LineAdded { variant_id: VariantId, quantity: u32 },
    QuantityChanged { variant_id: VariantId, quantity: u32 },
    LineRemoved { variant_id: VariantId },
    CartCleared,
    OrderCreated { order_id: Option<OrderId>, payment_method: PaymentMethod },
    PaymentRetried { order_id: OrderId },
    OrderStatus { order_id: OrderId, status: OrderStatus },
    Note { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

// ---- Display ----

/// `$ 1.234.567` style, as the storefront shows COP amounts.
pub fn format_money(amount: Money) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }
    if amount < 0 {
        format!("-$ {grouped}")
    } else {
        format!("$ {grouped}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment(method: &str, status: PaymentStatus) -> Payment {
        Payment {
            id: 1,
            amount: 10_000,
            method: method.to_string(),
            status,
            status_label: String::new(),
            reference: None,
            created_at: Utc::now(),
        }
    }

    fn order(status: OrderStatus, payments: Vec<Payment>) -> OrderDetail {
        OrderDetail {
            id: 42,
            code: "ORD-42".to_string(),
            status,
            status_label: String::new(),
            total: 10_000,
            created_at: Utc::now(),
            items: vec![],
            payments,
            timeline: vec![],
            delivery_address: None,
        }
    }

    #[test]
    fn only_pending_keeps_polling() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Paid.is_terminal());
        assert!(OrderStatus::Shipped.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn retry_offered_for_failed_or_pending_gateway_payment() {
        let failed = order(
            OrderStatus::Pending,
            vec![payment("MERCADOPAGO", PaymentStatus::Failed)],
        );
        assert!(failed.can_retry_payment());

        let pending = order(
            OrderStatus::Pending,
            vec![payment("MERCADOPAGO", PaymentStatus::Pending)],
        );
        assert!(pending.can_retry_payment());
    }

    #[test]
    fn retry_not_offered_once_paid_or_for_other_methods() {
        let paid = order(
            OrderStatus::Paid,
            vec![payment("MERCADOPAGO", PaymentStatus::Failed)],
        );
        assert!(!paid.can_retry_payment());

        let transfer = order(
            OrderStatus::Pending,
            vec![payment("BANK_TRANSFER", PaymentStatus::Pending)],
        );
        assert!(!transfer.can_retry_payment());

        assert!(!order(OrderStatus::Pending, vec![]).can_retry_payment());
    }

    #[test]
    fn order_detail_parses_backend_payload() {
        let raw = r#"{
            "id": 7, "code": "A-7", "status": "PENDING", "statusLabel": "Pendiente",
            "total": 48000, "createdAt": "2025-03-01T10:00:00.000Z", "source": "WEB",
            "items": [{"id": 1, "name": "Serum", "quantity": 2, "price": 20000}],
            "payments": [{"id": 3, "amount": 48000, "method": "MERCADOPAGO",
                          "status": "IN_PROCESS", "statusLabel": "En proceso",
                          "createdAt": "2025-03-01T10:00:01.000Z"}],
            "timeline": [{"status": "pending", "label": "Recibida", "date": "2025-03-01", "completed": true}]
        }"#;
        let order: OrderDetail = serde_json::from_str(raw).expect("order payload");
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.items.len(), 1);
        assert_eq!(order.payments[0].status, PaymentStatus::Unknown);
        assert!(!order.can_retry_payment());
    }

    #[test]
    fn unknown_order_status_decodes_as_settled() {
        let raw = r#"{"id": 8, "code": "A-8", "status": "PROCESSING",
                      "total": 10000, "createdAt": "2025-03-01T10:00:00.000Z"}"#;
        let order: OrderDetail = serde_json::from_str(raw).expect("order payload");
        assert_eq!(order.status, OrderStatus::Other);
        assert!(order.status.is_terminal());
        assert!(!order.can_retry_payment());
    }

    #[test]
    fn amounts_accept_whole_floats_and_decimal_strings() {
        let raw = r#"{"id": 9, "code": "A-9", "status": "PAID",
                      "total": 48000.0, "createdAt": "2025-03-01T10:00:00.000Z"}"#;
        let order: OrderSummary = serde_json::from_str(raw).expect("summary");
        assert_eq!(order.total, 48_000);

        let cfg: ShippingConfigResponse =
            serde_json::from_str(r#"{"freeShippingThreshold": "150000.00", "shippingCost": null}"#)
                .expect("config");
        assert_eq!(cfg.free_shipping_threshold, Some(150_000));
        assert_eq!(cfg.shipping_cost, None);

        let cents = r#"{"id": 9, "code": "A-9", "status": "PAID",
                        "total": 48000.5, "createdAt": "2025-03-01T10:00:00.000Z"}"#;
        assert!(serde_json::from_str::<OrderSummary>(cents).is_err());
    }

    #[test]
    fn new_address_is_trimmed_and_validated() {
        let draft = NewDeliveryAddress {
            label: " Casa ".to_string(),
            address_line: "Calle 10 # 5-20".to_string(),
            city: "Medellín ".to_string(),
            department: Some("  ".to_string()),
            phone: Some(" 3001234567".to_string()),
            is_default: true,
        };
        let ok = draft.clone().normalized().expect("valid address");
        assert_eq!(ok.label, "Casa");
        assert_eq!(ok.department, None);
        assert_eq!(
            serde_json::to_value(&ok).expect("json"),
            serde_json::json!({
                "label": "Casa",
                "addressLine": "Calle 10 # 5-20",
                "city": "Medellín",
                "phone": "3001234567",
                "isDefault": true
            })
        );

        let missing_city = NewDeliveryAddress {
            city: " ".to_string(),
            ..draft
        };
        assert_eq!(missing_city.normalized(), Err("city"));
    }

    #[test]
    fn persisted_line_accepts_legacy_price_key() {
        let raw = r#"{"variantId": 7, "productId": 1, "productName": "Kit",
                      "variantSize": "250 ml", "price": 22500, "quantity": 2,
                      "imageUrl": "/p.jpeg"}"#;
        let line: CartLine = serde_json::from_str(raw).expect("line");
        assert_eq!(line.unit_price, 22_500);
        assert_eq!(line.line_total(), 45_000);
        assert_eq!(line.store_id, None);
    }

    #[test]
    fn gateway_request_never_carries_price() {
        let req = GatewayCheckoutRequest {
            store_id: 3,
            cart: vec![CheckoutItem { variant_id: 7, quantity: 2 }],
            client_id: 11,
            delivery_address_id: None,
        };
        let v = serde_json::to_value(&req).expect("json");
        assert_eq!(
            v,
            serde_json::json!({
                "storeId": 3,
                "cart": [{"variantId": 7, "quantity": 2}],
                "clientId": 11
            })
        );
    }

    #[test]
    fn money_uses_dot_grouping() {
        assert_eq!(format_money(0), "$ 0");
        assert_eq!(format_money(8_000), "$ 8.000");
        assert_eq!(format_money(1_234_567), "$ 1.234.567");
        assert_eq!(format_money(-50_000), "-$ 50.000");
    }

    #[test]
    fn product_builds_line_from_variant() {
        let product = Product {
            id: 5,
            name: "Champú".to_string(),
            slug: "champu".to_string(),
            image: "/product.jpeg".to_string(),
            store_id: Some(2),
            variants: vec![ProductVariant {
                id: 50,
                size: "250 ml".to_string(),
                price: 18_000,
                stock: 4,
                image_url: String::new(),
                is_active: true,
            }],
        };
        let variant = product.variant_by_size("250 ML").expect("variant");
        let line = product.cart_line(variant);
        assert_eq!(line.variant_id, 50);
        assert_eq!(line.image_url, "/product.jpeg");
        assert_eq!(line.variant_size.as_deref(), Some("250 ml"));
        assert_eq!(line.store_id, Some(2));
    }
}
