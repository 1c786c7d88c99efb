//! Background lexicon refresh on a fixed interval.
//!
//! The refresher thread opens its own store connection (connections are
//! not shared across threads) and republishes the snapshot every
//! interval. A failed refresh leaves the current snapshot serving.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::LexiconMatcher;
use crate::db::SqliteStore;

/// Sleep granularity for shutdown responsiveness.
const SLEEP_GRANULARITY: Duration = Duration::from_millis(500);

/// Handle for the refresher thread.
///
/// Supports graceful shutdown via `shutdown()` or automatic cleanup on `Drop`.
pub struct LexiconRefresher {
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl LexiconRefresher {
    pub fn start(matcher: Arc<LexiconMatcher>, db_path: PathBuf, interval: Duration) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();

        let handle = std::thread::spawn(move || {
            tracing::info!(interval_secs = interval.as_secs(), "Lexicon refresher started");
            refresh_loop(&matcher, &db_path, interval, &flag);
            tracing::info!("Lexicon refresher shutting down");
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for LexiconRefresher {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Sleep for `total` in small steps. Returns false if shutdown was requested.
pub(crate) fn sleep_unless_shutdown(total: Duration, shutdown: &AtomicBool) -> bool {
    let mut slept = Duration::ZERO;
    while slept < total {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let step = SLEEP_GRANULARITY.min(total - slept);
        std::thread::sleep(step);
        slept += step;
    }
    !shutdown.load(Ordering::Relaxed)
}

fn refresh_loop(matcher: &LexiconMatcher, db_path: &Path, interval: Duration, shutdown: &AtomicBool) {
    let mut store: Option<SqliteStore> = None;

    while sleep_unless_shutdown(interval, shutdown) {
        if store.is_none() {
            match SqliteStore::open(db_path) {
                Ok(opened) => store = Some(opened),
                Err(e) => {
                    tracing::warn!(error = %e, "Lexicon refresher cannot open store");
                    continue;
                }
            }
        }
        let Some(source) = store.as_ref() else {
            continue;
        };
        if let Err(e) = matcher.refresh(source) {
            tracing::warn!(error = %e, "Lexicon refresh failed, keeping previous snapshot");
        }
    }
}
