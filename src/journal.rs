// ===============================
// src/journal.rs
// ===============================
//
// JSONL journal untuk event cart, checkout dan order:
// - Tulis setiap Event sebagai satu baris, dengan timestamp wall clock.
// - Bufer dengan BufWriter; flush tiap 1s dan tiap 100 event.
// - Otomatis membuat parent directory jika belum ada.
// - Jika tulis gagal, reopen file sekali; kalau masih gagal event dibuang.
//
// ENV: set `RECORD_FILE=/path/to/events.jsonl` agar aktif (lihat config.rs).
//
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::{
    fs::{self, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::mpsc,
    task::JoinHandle,
    time::{interval, Duration, MissedTickBehavior},
};
use tracing::{debug, error, info};

use crate::domain::{Event, JournalEntry};

const CHANNEL_CAPACITY: usize = 1024;
const FLUSH_EVERY_N_EVENTS: u32 = 100;

/// Cheap handle used by the cart, checkout and poller to emit events.
/// A disabled journal swallows everything.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    tx: Option<mpsc::Sender<JournalEntry>>,
}

impl Journal {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn record(&self, event: Event) {
        let Some(tx) = &self.tx else { return };
        let entry = JournalEntry {
            ts: Utc::now(),
            event,
        };
        if let Err(e) = tx.try_send(entry) {
            debug!(?e, "journal: event dropped");
        }
    }
}

/// Start the writer task. It ends (after a final flush) once every
/// `Journal` clone has been dropped.
pub fn spawn(path: PathBuf) -> (Journal, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let handle = tokio::spawn(run(rx, path));
    (Journal { tx: Some(tx) }, handle)
}

async fn open_writer(path: &Path) -> std::io::Result<BufWriter<fs::File>> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    Ok(BufWriter::new(file))
}

async fn write_line(writer: &mut BufWriter<fs::File>, line: &[u8]) -> std::io::Result<()> {
    writer.write_all(line).await?;
    writer.write_all(b"\n").await
}

async fn run(mut rx: mpsc::Receiver<JournalEntry>, path: PathBuf) {
    let mut writer = match open_writer(&path).await {
        Ok(w) => w,
        Err(e) => {
            error!(?e, path = %path.display(), "journal: open failed, journal disabled");
            return;
        }
    };
    info!(path = %path.display(), "journal: started");

    let mut tick = interval(Duration::from_secs(1));
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut since_last_flush: u32 = 0;

    loop {
        tokio::select! {
            maybe_entry = rx.recv() => {
                let Some(entry) = maybe_entry else {
                    let _ = writer.flush().await;
                    info!("journal: channel closed, stopped");
                    break;
                };

                let line = match serde_json::to_vec(&entry) {
                    Ok(l) => l,
                    Err(e) => {
                        error!(?e, "journal: serialize error, skip event");
                        continue;
                    }
                };

                if let Err(e) = write_line(&mut writer, &line).await {
                    error!(?e, "journal: write failed, attempting reopen");
                    writer = match open_writer(&path).await {
                        Ok(w) => w,
                        Err(e2) => {
                            error!(?e2, "journal: reopen failed, stopped");
                            break;
                        }
                    };
                    if let Err(e2) = write_line(&mut writer, &line).await {
                        error!(?e2, "journal: write failed again after reopen, drop event");
                        continue;
                    }
                }

                since_last_flush += 1;
                if since_last_flush >= FLUSH_EVERY_N_EVENTS {
                    let _ = writer.flush().await;
                    since_last_flush = 0;
                }
            }

            _ = tick.tick() => {
                let _ = writer.flush().await;
                since_last_flush = 0;
            }
        }
    }
}
