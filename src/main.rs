// ===============================
// src/main.rs
// ===============================
/*
 cd /home/kukuhtw/rust/storefront_cart

 # lihat katalog, isi cart, cek ongkir
 storefront products
 storefront cart add serum-facial --size "50 ml" -q 2
 storefront shipping

 # login, tambah alamat, checkout via gateway (status order otomatis dipantau;
 # pakai --no-watch untuk langsung selesai)
 storefront login --email cliente@example.com --password ******
 storefront addresses add --label Casa --line "Calle 10 # 5-20" --city Cali --default
 storefront checkout --method mercadopago

 # jika METRICS_PORT=9898 di-set
curl -s localhost:9898/metrics | egrep '^(cart_|checkouts_total|order_polls_total)'

*/
/*
=============================================================================
Project : storefront_cart — storefront cart, shipping and checkout client in Rust
Module  : main.rs
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
mod api;
mod app;
mod auth;
mod cart;
mod checkout;
mod cli;
mod config;
mod domain;
mod journal;
mod metrics;
mod poller;
mod shipping;
mod storage;

use std::{process::ExitCode, sync::Arc};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::HttpCommerceApi;
use crate::app::App;
use crate::journal::Journal;

#[tokio::main]
async fn main() -> ExitCode {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = cli::Cli::parse();

    // ---- Load config ----
    let settings = match config::Settings::load() {
        Ok(s) => s,
        Err(e) => {
            error!(%e, "config");
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        api = %settings.api_url,
        store_id = ?settings.store_id,
        data_dir = %settings.data_dir.display(),
        "startup config"
    );

    // ---- Metrics (optional) ----
    metrics::init();
    if let Some(port) = settings.metrics_port {
        tokio::spawn(metrics::serve_metrics(port));
    }

    // ---- Journal (optional) ----
    let (journal, journal_task) = match settings.record_file.clone() {
        Some(path) => {
            let (journal, task) = journal::spawn(path);
            (journal, Some(task))
        }
        None => (Journal::disabled(), None),
    };

    // ---- Backend client ----
    let api = match HttpCommerceApi::new(settings.api_url.clone(), settings.http_timeout) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            error!(%e, "http client");
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let code = match App::open(settings, api, journal) {
        Ok(mut app) => match app.run(cli.command).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!(%e, "cannot open local state");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    };

    // Every Journal clone is gone with the app; the writer flushes and ends.
    if let Some(task) = journal_task {
        let _ = task.await;
    }
    code
}
