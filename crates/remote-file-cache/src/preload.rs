//! Bounded-concurrency cache preloading
//!
//! Drains a URL list through a `CacheManager` with a fixed pool of workers
//! sharing one FIFO queue. One URL's failure never stops a worker or the
//! batch; failures are collected into the returned report instead of being
//! discarded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::index::CacheIndex;
use crate::manager::CacheManager;
use crate::options::CacheOptions;
use crate::store::FileStore;

/// A URL the preloader failed to cache and the error that stopped it
#[derive(Debug)]
pub struct PreloadFailure {
    pub url: String,
    pub error: CacheError,
}

/// Outcome of a preload batch
#[derive(Debug, Default)]
pub struct PreloadReport {
    /// URLs cached successfully
    pub completed: usize,
    /// URLs that failed, in no particular order
    pub failures: Vec<PreloadFailure>,
}

/// Download and cache a list of URLs through `manager`
///
/// Spawns `min(concurrency, urls.len())` workers, or one worker per URL when
/// `concurrency` is zero. Duplicates in `urls` are preserved; URLs are
/// dequeued in input order, completion order is unspecified.
pub async fn preload_urls<I, S>(
    urls: &[String],
    manager: &CacheManager<I, S>,
    concurrency: usize,
) -> PreloadReport
where
    I: CacheIndex,
    S: FileStore,
{
    preload_urls_with_cancel(urls, manager, concurrency, &CancellationToken::new()).await
}

/// Like [`preload_urls`], but stops early when `cancel` fires: the in-flight
/// fetches are abandoned and queued URLs are never dequeued
pub async fn preload_urls_with_cancel<I, S>(
    urls: &[String],
    manager: &CacheManager<I, S>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> PreloadReport
where
    I: CacheIndex,
    S: FileStore,
{
    let workers = if concurrency == 0 {
        urls.len()
    } else {
        concurrency.min(urls.len())
    };
    let queue: Mutex<VecDeque<String>> = Mutex::new(urls.iter().cloned().collect());
    let completed = AtomicUsize::new(0);
    let failures: Mutex<Vec<PreloadFailure>> = Mutex::new(Vec::new());

    join_all((0..workers).map(|worker| {
        let queue = &queue;
        let completed = &completed;
        let failures = &failures;
        async move {
            loop {
                if cancel.is_cancelled() {
                    debug!(worker, "preload cancelled, abandoning queue");
                    break;
                }
                let next = { queue.lock().await.pop_front() };
                let Some(url) = next else { break };

                let options = CacheOptions::default();
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(worker, url = %url, "preload fetch abandoned on cancellation");
                        break;
                    }
                    result = manager.download_and_cache_url(&url, &options) => {
                        match result {
                            Ok(_) => {
                                completed.fetch_add(1, Ordering::SeqCst);
                            }
                            Err(error) => {
                                warn!(url = %url, error = %error, "preload failed");
                                failures.lock().await.push(PreloadFailure { url, error });
                            }
                        }
                    }
                }
            }
        }
    }))
    .await;

    PreloadReport {
        completed: completed.load(Ordering::SeqCst),
        failures: failures.into_inner(),
    }
}
