// ===============================
// src/poller.rs
// ===============================
//
// Order status watch:
// - Ambil order langsung, lalu tiap `every` selama status masih PENDING.
// - Berhenti di status pertama yang bukan PENDING (termasuk status yang
//   tidak dikenal client ini).
// - Fetch gagal hanya diulang jika status terakhir PENDING; tanpa status
//   yang diketahui, watch selesai.
// - Drop `OrderWatch` membatalkan task; tidak ada publish setelahnya.
//
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{sleep, Duration},
};
use tracing::{debug, info, warn};

use crate::api::SharedApi;
use crate::domain::{Event, OrderDetail, OrderId, OrderStatus};
use crate::journal::Journal;
use crate::metrics::ORDER_POLLS;

pub struct OrderWatch {
    rx: watch::Receiver<Option<OrderDetail>>,
    task: Option<JoinHandle<()>>,
}

impl OrderWatch {
    pub fn spawn(
        api: SharedApi,
        token: String,
        order_id: OrderId,
        every: Duration,
        journal: Journal,
    ) -> Self {
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(run(api, token, order_id, every, tx, journal));
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Receiver that sees every published detail; closes when polling ends.
    pub fn subscribe(&self) -> watch::Receiver<Option<OrderDetail>> {
        self.rx.clone()
    }

    pub fn latest(&self) -> Option<OrderDetail> {
        self.rx.borrow().clone()
    }

    /// Wait until polling has stopped on its own.
    pub async fn settled(&mut self) {
        if let Some(task) = self.task.as_mut() {
            if let Err(e) = task.await {
                debug!(?e, "poller: task ended abnormally");
            }
            self.task = None;
        }
    }
}

impl Drop for OrderWatch {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    api: SharedApi,
    token: String,
    order_id: OrderId,
    every: Duration,
    tx: watch::Sender<Option<OrderDetail>>,
    journal: Journal,
) {
    let mut last: Option<OrderStatus> = None;

    loop {
        match api.order(&token, order_id).await {
            Ok(detail) => {
                ORDER_POLLS.with_label_values(&["ok"]).inc();
                let status = detail.status;
                if last != Some(status) {
                    info!(order_id, status = status.as_str(), "poller: status");
                    journal.record(Event::OrderStatus { order_id, status });
                }
                last = Some(status);
                tx.send_replace(Some(detail));
                if status.is_terminal() {
                    break;
                }
            }
            Err(e) => {
                ORDER_POLLS.with_label_values(&["error"]).inc();
                if last != Some(OrderStatus::Pending) {
                    warn!(order_id, %e, "poller: fetch failed, no pending status to follow");
                    break;
                }
                warn!(order_id, %e, http_status = ?e.status(), "poller: fetch failed, retrying");
            }
        }
        sleep(every).await;
    }
    debug!(order_id, "poller: stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::api::{ApiError, MockCommerceApi};

    const EVERY: Duration = Duration::from_millis(4_000);

    fn detail(id: OrderId, status: OrderStatus) -> OrderDetail {
        OrderDetail {
            id,
            code: format!("ORD-{id}"),
            status,
            status_label: String::new(),
            total: 58_000,
            created_at: Utc.timestamp_opt(1_800_000_000, 0).single().expect("ts"),
            items: vec![],
            payments: vec![],
            timeline: vec![],
            delivery_address: None,
        }
    }

    fn server_down() -> ApiError {
        ApiError::Server {
            status: 503,
            message: None,
        }
    }

    /// Mock that answers the scripted results in order, then repeats the last.
    fn scripted(script: Vec<Result<OrderStatus, ()>>, calls: Arc<AtomicUsize>) -> SharedApi {
        let mut api = MockCommerceApi::new();
        api.expect_order().returning(move |_, id| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            match script[n.min(script.len() - 1)] {
                Ok(status) => Ok(detail(id, status)),
                Err(()) => Err(server_down()),
            }
        });
        Arc::new(api)
    }

    #[tokio::test(start_paused = true)]
    async fn stops_after_first_settled_status() {
        let calls = Arc::new(AtomicUsize::new(0));
        let api = scripted(
            vec![
                Ok(OrderStatus::Pending),
                Ok(OrderStatus::Pending),
                Ok(OrderStatus::Paid),
            ],
            calls.clone(),
        );
        let mut watch = OrderWatch::spawn(api, "t".into(), 42, EVERY, Journal::disabled());

        watch.settled().await;
        sleep(EVERY * 5).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(watch.latest().map(|d| d.status), Some(OrderStatus::Paid));
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_updates_until_the_channel_closes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let api = scripted(
            vec![Ok(OrderStatus::Pending), Ok(OrderStatus::Cancelled)],
            calls,
        );
        let watch = OrderWatch::spawn(api, "t".into(), 7, EVERY, Journal::disabled());
        let mut rx = watch.subscribe();

        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            if let Some(d) = rx.borrow_and_update().as_ref() {
                seen.push(d.status);
            }
        }

        assert_eq!(seen.last(), Some(&OrderStatus::Cancelled));
        assert!(seen.iter().all(|s| matches!(s, OrderStatus::Pending | OrderStatus::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_watch_cancels_polling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let api = scripted(vec![Ok(OrderStatus::Pending)], calls.clone());
        let watch = OrderWatch::spawn(api, "t".into(), 42, EVERY, Journal::disabled());
        let rx = watch.subscribe();

        sleep(EVERY * 2 + Duration::from_millis(10)).await;
        let before = calls.load(Ordering::SeqCst);
        assert!(before >= 2, "expected a few polls, got {before}");

        drop(watch);
        sleep(EVERY * 10).await;

        assert_eq!(calls.load(Ordering::SeqCst), before);
        assert!(rx.has_changed().is_err(), "sender should be gone after cancel");
    }

    #[tokio::test(start_paused = true)]
    async fn first_fetch_failure_ends_the_watch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let api = scripted(vec![Err(())], calls.clone());
        let mut watch = OrderWatch::spawn(api, "t".into(), 42, EVERY, Journal::disabled());

        watch.settled().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(watch.latest().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_while_pending_keep_polling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let api = scripted(
            vec![
                Ok(OrderStatus::Pending),
                Err(()),
                Err(()),
                Ok(OrderStatus::Shipped),
            ],
            calls.clone(),
        );
        let mut watch = OrderWatch::spawn(api, "t".into(), 42, EVERY, Journal::disabled());

        watch.settled().await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(watch.latest().map(|d| d.status), Some(OrderStatus::Shipped));
    }

    #[tokio::test(start_paused = true)]
    async fn unrecognised_backend_status_ends_the_watch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut api = MockCommerceApi::new();
        api.expect_order().returning(move |_, id| {
            let status = match counter.fetch_add(1, Ordering::SeqCst) {
                0 => "PENDING",
                _ => "PROCESSING",
            };
            let raw = serde_json::json!({
                "id": id, "code": format!("ORD-{id}"), "status": status,
                "total": 58000, "createdAt": "2025-03-01T10:00:00.000Z"
            });
            Ok(serde_json::from_value(raw).expect("order payload"))
        });
        let mut watch = OrderWatch::spawn(Arc::new(api), "t".into(), 42, EVERY, Journal::disabled());

        watch.settled().await;
        sleep(EVERY * 10).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(watch.latest().map(|d| d.status), Some(OrderStatus::Other));
    }
}
