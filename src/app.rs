// ===============================
// src/app.rs
// ===============================
//
// Application root: owns the cart store, the auth session and the backend
// client for one CLI invocation, and runs a single command against them.
//
use thiserror::Error;
use tracing::{debug, info};

use crate::api::{ApiError, SharedApi};
use crate::auth::AuthSession;
use crate::cart::CartStore;
use crate::checkout::{
    resolve_store_id, CheckoutError, CheckoutOrchestrator, CheckoutOutcome, Navigator, PlaceOrder,
    Route,
};
use crate::cli::{
    AddArgs, AddressCommand, AddressesArgs, CartCommand, CheckoutArgs, Command, LoginArgs,
    NewAddressArgs, OrderCommand,
};
use crate::config::Settings;
use crate::domain::{
    format_money, DeliveryAddress, Event, LoginRequest, NewDeliveryAddress, OrderDetail, OrderId,
    Product, ProductVariant,
};
use crate::journal::Journal;
use crate::poller::OrderWatch;
use crate::shipping::{ShippingConfigProvider, ShippingQuote};
use crate::storage::{FileCartRepository, FileTokenRepository, StorageError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("{}", .0.user_message())]
    Api(#[from] ApiError),
    #[error("{}", .0.user_message())]
    Checkout(#[from] CheckoutError),
    #[error("sign in first: storefront login --email <email> --password <password>")]
    SignInRequired,
    #[error("the backend returned a token that cannot be used")]
    UnusableToken,
    #[error("the address {0} cannot be empty")]
    InvalidAddress(&'static str),
    #[error("password is required with --email")]
    MissingPassword,
    #[error("product {slug} has no variant matching the selection")]
    UnknownVariant { slug: String },
    #[error("{name} ({size}) is not available")]
    Unavailable { name: String, size: String },
    #[error("only {stock} units of {name} ({size}) in stock, {in_cart} already in the cart")]
    StockExhausted {
        name: String,
        size: String,
        stock: u32,
        in_cart: u32,
    },
}

/// Prints navigation side effects for the shopper.
#[derive(Debug, Default)]
pub struct TerminalNavigator {
    pub last_route: Option<Route>,
}

impl Navigator for TerminalNavigator {
    fn open_external(&mut self, url: &str) {
        println!("Complete the payment at:\n  {url}");
    }

    fn navigate(&mut self, route: Route) {
        match &route {
            Route::SignIn => println!("Sign in to continue: storefront login"),
            Route::Orders => println!("Order placed. See: storefront orders"),
            Route::OrderDetail(id) => println!("Order #{id}: storefront order show {id}"),
        }
        self.last_route = Some(route);
    }
}

pub struct App {
    settings: Settings,
    api: SharedApi,
    cart: CartStore<FileCartRepository>,
    auth: AuthSession<FileTokenRepository>,
    shipping: ShippingConfigProvider,
    checkout: CheckoutOrchestrator,
    journal: Journal,
}

impl App {
    pub fn open(settings: Settings, api: SharedApi, journal: Journal) -> Result<Self, AppError> {
        let cart = CartStore::open(
            FileCartRepository::in_dir(&settings.data_dir),
            journal.clone(),
        )?;
        let auth = AuthSession::rehydrate(FileTokenRepository::in_dir(&settings.data_dir))?;
        let shipping = ShippingConfigProvider::new(api.clone(), settings.shipping_config_ttl);
        let checkout = CheckoutOrchestrator::new(api.clone(), settings.store_id, journal.clone());
        debug!(data_dir = %settings.data_dir.display(), lines = cart.lines().len(), signed_in = auth.is_authenticated(), "app: state loaded");
        Ok(Self {
            settings,
            api,
            cart,
            auth,
            shipping,
            checkout,
            journal,
        })
    }

    pub async fn run(&mut self, command: Command) -> Result<(), AppError> {
        match command {
            Command::Cart(cmd) => self.cart_command(cmd).await,
            Command::Shipping => {
                self.print_totals().await;
                Ok(())
            }
            Command::Login(args) => self.login(args).await,
            Command::Logout => {
                self.auth.logout()?;
                self.journal.record(Event::Note {
                    message: "signed out".to_string(),
                });
                println!("Signed out.");
                Ok(())
            }
            Command::Whoami => {
                match self.auth.credentials() {
                    Some(c) => println!(
                        "{} <{}> client #{} store #{}",
                        c.claims.name, c.claims.email, c.claims.client_id, c.claims.store_id
                    ),
                    None => println!("Not signed in."),
                }
                Ok(())
            }
            Command::Products => self.products().await,
            Command::Addresses(AddressesArgs { command: None }) => self.addresses().await,
            Command::Addresses(AddressesArgs {
                command: Some(AddressCommand::Add(args)),
            }) => self.add_address(args).await,
            Command::Checkout(args) => self.place_order(args).await,
            Command::Orders => self.orders().await,
            Command::Order(cmd) => self.order_command(cmd).await,
        }
    }

    // ---- Cart ----

    async fn cart_command(&mut self, cmd: CartCommand) -> Result<(), AppError> {
        match cmd {
            CartCommand::Show => {}
            CartCommand::Add(args) => self.add_from_catalog(args).await?,
            CartCommand::Update {
                variant_id,
                quantity,
            } => self.cart.update_quantity(variant_id, quantity)?,
            CartCommand::Remove { variant_id } => self.cart.remove_item(variant_id)?,
            CartCommand::Clear => self.cart.clear()?,
        }
        self.print_cart();
        self.print_totals().await;
        Ok(())
    }

    async fn add_from_catalog(&mut self, args: AddArgs) -> Result<(), AppError> {
        let product = self
            .api
            .product(&args.slug, self.settings.store_id)
            .await?;
        let variant = choose_variant(&product, args.variant, args.size.as_deref())?;
        let in_cart = self.cart.line(variant.id).map_or(0, |l| l.quantity);
        let requested = args.quantity.unwrap_or(1);
        let quantity = capped_quantity(&product, variant, requested, in_cart)?;
        if quantity < requested {
            println!(
                "Only {quantity} more of {} ({}) can be added.",
                product.name, variant.size
            );
        }
        info!(slug = %args.slug, variant_id = variant.id, quantity, "cart: adding from catalog");
        let line = product.cart_line(variant);
        match args.quantity {
            None => self.cart.add(line)?,
            Some(_) => self.cart.add_item(line, quantity)?,
        }
        Ok(())
    }

    async fn products(&self) -> Result<(), AppError> {
        let products = self.api.products(self.settings.store_id).await?;
        if products.is_empty() {
            println!("No products.");
        }
        for p in &products {
            println!("{}  [{}]", p.name, p.slug);
            for v in &p.variants {
                let state = match (v.is_active, v.stock) {
                    (false, _) => "unavailable".to_string(),
                    (true, 0) => "out of stock".to_string(),
                    (true, n) => format!("{n} in stock"),
                };
                println!(
                    "  {:>6}  {:<10} {:>12}  {state}",
                    v.id,
                    v.size,
                    format_money(v.price)
                );
            }
        }
        Ok(())
    }

    fn print_cart(&self) {
        if self.cart.is_empty() {
            println!("Your cart is empty.");
            return;
        }
        for line in self.cart.lines() {
            let size = line.variant_size.as_deref().unwrap_or("-");
            println!(
                "{:>6}  {:<32} {:<10} {:>3} x {:>12} = {:>12}",
                line.variant_id,
                line.product_name,
                size,
                line.quantity,
                format_money(line.unit_price),
                format_money(line.line_total()),
            );
        }
        println!("{} items", self.cart.item_count());
    }

    async fn print_totals(&mut self) {
        let store_id = resolve_store_id(
            self.auth.credentials(),
            self.cart.lines(),
            self.settings.store_id,
        );
        let config = self.shipping.config_for(store_id).await;
        let quote = ShippingQuote::new(self.cart.subtotal(), &config);

        println!("Subtotal: {}", format_money(quote.subtotal));
        if quote.is_free() {
            println!("Shipping: free");
        } else {
            println!(
                "Shipping: {} ({} more for free shipping, {:.0}%)",
                format_money(quote.shipping),
                format_money(quote.remaining_for_free_shipping),
                quote.progress_percent
            );
        }
        println!("Total:    {}", format_money(quote.total));
    }

    // ---- Account ----

    async fn login(&mut self, args: LoginArgs) -> Result<(), AppError> {
        let token = match (args.token, args.email) {
            (Some(token), _) => token,
            (None, Some(email)) => {
                let password = args.password.ok_or(AppError::MissingPassword)?;
                let request = LoginRequest {
                    email,
                    password,
                    store_id: self.settings.store_id,
                };
                self.api.login(&request).await?.token
            }
            (None, None) => return Err(AppError::MissingPassword),
        };
        if !self.auth.login(&token)? {
            return Err(AppError::UnusableToken);
        }
        self.journal.record(Event::Note {
            message: "signed in".to_string(),
        });
        if let Some(c) = self.auth.credentials() {
            println!("Signed in as {} <{}>.", c.claims.name, c.claims.email);
        }
        Ok(())
    }

    async fn addresses(&self) -> Result<(), AppError> {
        let token = self.token()?;
        let addresses = self.api.addresses(&token).await?;
        if addresses.is_empty() {
            println!("No delivery addresses.");
        }
        for a in addresses {
            let marker = if a.is_default { "*" } else { " " };
            println!("{marker} {:>5}  {}", a.id, address_row(&a));
        }
        Ok(())
    }

    async fn add_address(&self, args: NewAddressArgs) -> Result<(), AppError> {
        let token = self.token()?;
        let draft = NewDeliveryAddress {
            label: args.label,
            address_line: args.line,
            city: args.city,
            department: args.department,
            phone: args.phone,
            is_default: args.default,
        }
        .normalized()
        .map_err(AppError::InvalidAddress)?;
        let saved = self.api.create_address(&token, &draft).await?;
        info!(address_id = saved.id, is_default = saved.is_default, "addresses: saved");
        println!("Saved address #{}: {}", saved.id, address_row(&saved));
        Ok(())
    }

    fn token(&self) -> Result<String, AppError> {
        self.auth
            .credentials()
            .map(|c| c.token.clone())
            .ok_or(AppError::SignInRequired)
    }

    // ---- Checkout & orders ----

    async fn place_order(&mut self, args: CheckoutArgs) -> Result<(), AppError> {
        let mut nav = TerminalNavigator::default();
        let order = PlaceOrder {
            payment_method: args.method.into(),
            delivery_address_id: args.address,
        };
        let outcome = self
            .checkout
            .submit(self.auth.credentials(), &mut self.cart, &mut nav, order)
            .await?;

        match order_to_watch(&outcome, args.no_watch) {
            Some(id) => self.watch(id).await,
            None => Ok(()),
        }
    }

    async fn orders(&self) -> Result<(), AppError> {
        let token = self.token()?;
        let orders = self.api.orders(&token).await?;
        if orders.is_empty() {
            println!("No orders yet.");
        }
        for o in orders {
            println!(
                "{:>6}  {:<14} {:<10} {:>12}  {}",
                o.id,
                o.code,
                o.status.as_str(),
                format_money(o.total),
                o.created_at.format("%Y-%m-%d %H:%M")
            );
        }
        Ok(())
    }

    async fn order_command(&mut self, cmd: OrderCommand) -> Result<(), AppError> {
        match cmd {
            OrderCommand::Show { order_id } => {
                let token = self.token()?;
                let detail = self.api.order(&token, order_id).await?;
                print_order(&detail);
                Ok(())
            }
            OrderCommand::Watch { order_id } => self.watch(order_id).await,
            OrderCommand::Retry { order_id } => {
                let mut nav = TerminalNavigator::default();
                self.checkout
                    .retry_payment(self.auth.credentials(), &mut nav, order_id)
                    .await?;
                Ok(())
            }
        }
    }

    /// Follow the order until it leaves PENDING or the shopper hits Ctrl-C.
    async fn watch(&self, order_id: OrderId) -> Result<(), AppError> {
        let token = self.token()?;
        let mut watch = OrderWatch::spawn(
            self.api.clone(),
            token,
            order_id,
            self.settings.order_poll_every,
            self.journal.clone(),
        );
        let mut rx = watch.subscribe();
        println!("Watching order #{order_id} (Ctrl-C to stop)...");

        loop {
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        watch.settled().await;
                        break;
                    }
                    if let Some(detail) = rx.borrow_and_update().as_ref() {
                        print_order(detail);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!(order_id, "poller: cancelled by user");
                    break;
                }
            }
        }
        if let Some(detail) = watch.latest() {
            info!(order_id, status = detail.status.as_str(), "poller: watch ended");
        }
        drop(watch);
        Ok(())
    }
}

/// A gateway redirect leaves the order PENDING until payment lands, so it
/// is followed unless the shopper opted out. Direct orders are not.
fn order_to_watch(outcome: &CheckoutOutcome, no_watch: bool) -> Option<OrderId> {
    match outcome {
        CheckoutOutcome::Redirected { order_id, .. } if !no_watch => Some(*order_id),
        _ => None,
    }
}

fn address_row(a: &DeliveryAddress) -> String {
    let mut row = format!("{:<12} {}, {}", a.label, a.address_line, a.city);
    if let Some(department) = &a.department {
        row.push_str(&format!(", {department}"));
    }
    row
}

fn print_order(detail: &OrderDetail) {
    let label = if detail.status_label.is_empty() {
        detail.status.as_str()
    } else {
        detail.status_label.as_str()
    };
    println!(
        "Order {} (#{}): {}  total {}",
        detail.code,
        detail.id,
        label,
        format_money(detail.total)
    );
    for item in &detail.items {
        println!(
            "  {:>3} x {:<32} {:>12}",
            item.quantity,
            item.name,
            format_money(item.price)
        );
    }
    if detail.can_retry_payment() {
        println!("  Payment not completed: storefront order retry {}", detail.id);
    }
}

/// Explicit variant id, else size label, else the first purchasable variant.
fn choose_variant<'a>(
    product: &'a Product,
    variant: Option<i64>,
    size: Option<&str>,
) -> Result<&'a ProductVariant, AppError> {
    let chosen = match (variant, size) {
        (Some(id), _) => product.variant(id),
        (None, Some(size)) => product.variant_by_size(size),
        (None, None) => product
            .variants
            .iter()
            .find(|v| v.is_active && v.stock > 0)
            .or_else(|| product.variants.first()),
    };
    chosen.ok_or_else(|| AppError::UnknownVariant {
        slug: product.slug.clone(),
    })
}

/// Cap `requested` to what stock allows on top of `in_cart`.
fn capped_quantity(
    product: &Product,
    variant: &ProductVariant,
    requested: u32,
    in_cart: u32,
) -> Result<u32, AppError> {
    if !variant.is_active || variant.stock == 0 {
        return Err(AppError::Unavailable {
            name: product.name.clone(),
            size: variant.size.clone(),
        });
    }
    let room = variant.stock.saturating_sub(in_cart);
    if room == 0 {
        return Err(AppError::StockExhausted {
            name: product.name.clone(),
            size: variant.size.clone(),
            stock: variant.stock,
            in_cart,
        });
    }
    Ok(requested.min(room))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use testresult::TestResult;

    use super::*;
    use crate::api::MockCommerceApi;
    use crate::auth::test_token;
    use crate::storage::TokenRepository;

    /// App over a scratch data dir; signed in when `signed_in` is set.
    fn app_with(
        api: MockCommerceApi,
        dir: &tempfile::TempDir,
        signed_in: bool,
    ) -> TestResult<App> {
        let data_dir = dir.path().to_string_lossy().into_owned();
        let settings = Settings::from_lookup(|key| match key {
            "STOREFRONT_DATA_DIR" => Some(data_dir.clone()),
            "STORE_ID" => Some("3".to_string()),
            _ => None,
        })?;
        if signed_in {
            let token = test_token(11, 3, None);
            FileTokenRepository::in_dir(dir.path()).save(Some(token.as_str()))?;
        }
        Ok(App::open(settings, Arc::new(api), Journal::disabled())?)
    }

    fn draft(city: &str) -> NewAddressArgs {
        NewAddressArgs {
            label: " Casa ".to_string(),
            line: "Calle 1 # 2-3".to_string(),
            city: city.to_string(),
            department: Some("Valle".to_string()),
            phone: None,
            default: true,
        }
    }

    fn add_address(args: NewAddressArgs) -> Command {
        Command::Addresses(AddressesArgs {
            command: Some(AddressCommand::Add(args)),
        })
    }

    fn variant(id: i64, size: &str, stock: u32, is_active: bool) -> ProductVariant {
        ProductVariant {
            id,
            size: size.to_string(),
            price: 45_000,
            stock,
            image_url: String::new(),
            is_active,
        }
    }

    fn product() -> Product {
        Product {
            id: 1,
            name: "Sérum facial".to_string(),
            slug: "serum-facial".to_string(),
            image: "/serum.jpeg".to_string(),
            store_id: Some(3),
            variants: vec![
                variant(10, "30 ml", 0, true),
                variant(11, "50 ml", 4, true),
                variant(12, "100 ml", 9, false),
            ],
        }
    }

    #[test]
    fn default_variant_is_first_purchasable() {
        let p = product();
        assert_eq!(choose_variant(&p, None, None).map(|v| v.id).ok(), Some(11));
        assert_eq!(choose_variant(&p, None, Some("100 ML")).map(|v| v.id).ok(), Some(12));
        assert_eq!(choose_variant(&p, Some(10), None).map(|v| v.id).ok(), Some(10));
        assert!(matches!(
            choose_variant(&p, Some(99), None),
            Err(AppError::UnknownVariant { .. })
        ));
    }

    #[test]
    fn quantity_is_capped_to_remaining_stock() {
        let p = product();
        let v = &p.variants[1];
        assert_eq!(capped_quantity(&p, v, 2, 0).ok(), Some(2));
        assert_eq!(capped_quantity(&p, v, 10, 1).ok(), Some(3));
        assert!(matches!(
            capped_quantity(&p, v, 1, 4),
            Err(AppError::StockExhausted { stock: 4, in_cart: 4, .. })
        ));
    }

    #[test]
    fn out_of_stock_and_inactive_variants_are_refused() {
        let p = product();
        assert!(matches!(
            capped_quantity(&p, &p.variants[0], 1, 0),
            Err(AppError::Unavailable { .. })
        ));
        assert!(matches!(
            capped_quantity(&p, &p.variants[2], 1, 0),
            Err(AppError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn products_are_listed_for_the_configured_store() -> TestResult {
        let dir = tempfile::tempdir()?;
        let mut api = MockCommerceApi::new();
        api.expect_products()
            .withf(|store_id| *store_id == Some(3))
            .times(1)
            .returning(|_| Ok(vec![product()]));

        let mut app = app_with(api, &dir, false)?;
        app.run(Command::Products).await?;
        Ok(())
    }

    #[tokio::test]
    async fn new_address_is_trimmed_and_sent_with_the_token() -> TestResult {
        let dir = tempfile::tempdir()?;
        let token = test_token(11, 3, None);
        let mut api = MockCommerceApi::new();
        api.expect_create_address()
            .withf(move |t, a| {
                t == token.as_str()
                    && a.label == "Casa"
                    && a.city == "Cali"
                    && a.department.as_deref() == Some("Valle")
                    && a.is_default
            })
            .times(1)
            .returning(|_, a| {
                Ok(DeliveryAddress {
                    id: 21,
                    label: a.label.clone(),
                    address_line: a.address_line.clone(),
                    city: a.city.clone(),
                    department: a.department.clone(),
                    phone: a.phone.clone(),
                    is_default: a.is_default,
                })
            });

        let mut app = app_with(api, &dir, true)?;
        app.run(add_address(draft(" Cali "))).await?;
        Ok(())
    }

    #[tokio::test]
    async fn blank_city_is_refused_before_any_call() -> TestResult {
        let dir = tempfile::tempdir()?;
        let mut api = MockCommerceApi::new();
        api.expect_create_address().never();

        let mut app = app_with(api, &dir, true)?;
        let result = app.run(add_address(draft("  "))).await;

        assert!(matches!(result, Err(AppError::InvalidAddress("city"))), "got {result:?}");
        Ok(())
    }

    #[tokio::test]
    async fn adding_an_address_needs_sign_in() -> TestResult {
        let dir = tempfile::tempdir()?;
        let mut api = MockCommerceApi::new();
        api.expect_create_address().never();

        let mut app = app_with(api, &dir, false)?;
        let result = app.run(add_address(draft("Cali"))).await;

        assert!(matches!(result, Err(AppError::SignInRequired)), "got {result:?}");
        Ok(())
    }

    #[test]
    fn only_gateway_orders_are_watched_by_default() {
        let redirected = CheckoutOutcome::Redirected {
            order_id: 42,
            order_code: Some("ORD-42".to_string()),
            redirect_url: "https://pay.example/x".to_string(),
        };
        assert_eq!(order_to_watch(&redirected, false), Some(42));
        assert_eq!(order_to_watch(&redirected, true), None);
        assert_eq!(order_to_watch(&CheckoutOutcome::Placed { order_id: Some(7) }, false), None);
    }

    #[test]
    fn navigator_remembers_last_route() {
        let mut nav = TerminalNavigator::default();
        nav.navigate(Route::OrderDetail(5));
        assert_eq!(nav.last_route, Some(Route::OrderDetail(5)));
    }
}
