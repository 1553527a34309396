// ===============================
// src/cli.rs
// ===============================
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::domain::{OrderId, PaymentMethod, VariantId};

/// Storefront client: cart, shipping quote, checkout and order tracking.
#[derive(Debug, Parser)]
#[command(name = "storefront")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Inspect or change the local cart
    #[command(subcommand)]
    Cart(CartCommand),

    /// Subtotal, shipping and total for the current cart
    Shipping,

    /// Sign in with email and password, or store an existing token
    Login(LoginArgs),

    /// Forget the stored token
    Logout,

    /// Show the signed-in client
    Whoami,

    /// List the store catalog with variant ids and prices
    Products,

    /// List delivery addresses, or add one
    Addresses(AddressesArgs),

    /// Turn the cart into an order
    Checkout(CheckoutArgs),

    /// List orders
    Orders,

    /// Inspect one order
    #[command(subcommand)]
    Order(OrderCommand),
}

#[derive(Debug, Subcommand)]
pub enum CartCommand {
    /// Print the cart lines and totals
    Show,

    /// Add a product variant by product slug
    Add(AddArgs),

    /// Set a line quantity; below 1 removes the line
    Update {
        variant_id: VariantId,
        #[arg(allow_negative_numbers = true)]
        quantity: i64,
    },

    /// Remove a line
    Remove { variant_id: VariantId },

    /// Empty the cart
    Clear,
}

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Product slug as it appears in the storefront URL
    pub slug: String,

    /// Variant id; defaults to the first active variant in stock
    #[arg(long, conflicts_with = "size")]
    pub variant: Option<VariantId>,

    /// Variant size label, e.g. "250 ml"
    #[arg(long)]
    pub size: Option<String>,

    /// Units to add; one when omitted
    #[arg(short, long)]
    pub quantity: Option<u32>,
}

#[derive(Debug, Args)]
pub struct LoginArgs {
    #[arg(long, required_unless_present = "token")]
    pub email: Option<String>,

    #[arg(long, requires = "email")]
    pub password: Option<String>,

    /// Use a token obtained elsewhere instead of email/password
    #[arg(long, conflicts_with_all = ["email", "password"])]
    pub token: Option<String>,
}

#[derive(Debug, Args)]
pub struct AddressesArgs {
    #[command(subcommand)]
    pub command: Option<AddressCommand>,
}

#[derive(Debug, Subcommand)]
pub enum AddressCommand {
    /// Save a new delivery address
    Add(NewAddressArgs),
}

#[derive(Debug, Args)]
pub struct NewAddressArgs {
    /// Short name, e.g. "Casa"
    #[arg(long)]
    pub label: String,

    /// Street address
    #[arg(long)]
    pub line: String,

    #[arg(long)]
    pub city: String,

    #[arg(long)]
    pub department: Option<String>,

    #[arg(long)]
    pub phone: Option<String>,

    /// Make it the default delivery address
    #[arg(long)]
    pub default: bool,
}

#[derive(Debug, Args)]
pub struct CheckoutArgs {
    #[arg(long, value_enum, default_value_t = MethodArg::Mercadopago)]
    pub method: MethodArg,

    /// Delivery address id; defaults to the default address
    #[arg(long)]
    pub address: Option<i64>,

    /// Do not follow the order status after a gateway redirect
    #[arg(long)]
    pub no_watch: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    Mercadopago,
    BankTransfer,
    StorePickup,
}

impl From<MethodArg> for PaymentMethod {
    fn from(m: MethodArg) -> Self {
        match m {
            MethodArg::Mercadopago => PaymentMethod::MercadoPago,
            MethodArg::BankTransfer => PaymentMethod::BankTransfer,
            MethodArg::StorePickup => PaymentMethod::StorePickup,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum OrderCommand {
    /// Print the order detail once
    Show { order_id: OrderId },

    /// Print status changes until the order leaves PENDING
    Watch { order_id: OrderId },

    /// Open a fresh payment page for a pending order
    Retry { order_id: OrderId },
}
