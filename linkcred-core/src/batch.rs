//! Fixed-size batching with optional randomized pacing.
//!
//! Remote service calls are chunked and issued together; client-side redirect
//! chases are chunked and run one chunk at a time with a short random pause in
//! between so a burst of page links does not look like a scraper to the
//! hosts being chased.

use futures::future::{BoxFuture, FutureExt, join_all};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::DEFAULT_BATCH_SIZE;

/// Waits for the given duration. Injected so tests can skip real sleeps.
pub type DelayFn = Arc<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

pub fn tokio_sleep() -> DelayFn {
    Arc::new(|duration: Duration| tokio::time::sleep(duration).boxed())
}

pub fn no_delay() -> DelayFn {
    Arc::new(|_: Duration| futures::future::ready(()).boxed())
}

#[derive(Clone)]
pub struct BatchScheduler {
    batch_size: usize,
    min_pause_ms: u64,
    max_pause_ms: u64,
    delay: DelayFn,
}

impl Default for BatchScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl BatchScheduler {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            min_pause_ms: 10,
            max_pause_ms: 70,
            delay: tokio_sleep(),
        }
    }

    pub fn with_pacing(mut self, (min_ms, max_ms): (u64, u64)) -> Self {
        self.min_pause_ms = min_ms.min(max_ms);
        self.max_pause_ms = max_ms;
        self
    }

    pub fn with_delay(mut self, delay: DelayFn) -> Self {
        self.delay = delay;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Contiguous chunks in input order; only the last may be short.
    pub fn chunks<'a, T>(&self, items: &'a [T]) -> std::slice::Chunks<'a, T> {
        items.chunks(self.batch_size)
    }

    pub fn next_pause(&self) -> Duration {
        let ms = rand::rng().random_range(self.min_pause_ms..=self.max_pause_ms);
        Duration::from_millis(ms)
    }

    /// Runs `run` once per chunk, strictly one chunk after another, pausing
    /// between chunks but not before the first or after the last.
    pub async fn run_paced<'a, T, R, F, Fut>(&self, items: &'a [T], mut run: F) -> Vec<R>
    where
        F: FnMut(&'a [T]) -> Fut,
        Fut: Future<Output = R>,
    {
        let mut results = Vec::new();
        for (index, chunk) in self.chunks(items).enumerate() {
            if index > 0 {
                let pause = self.next_pause();
                debug!("Pausing {:?} before batch {}", pause, index + 1);
                (self.delay)(pause).await;
            }
            results.push(run(chunk).await);
        }
        results
    }

    /// Issues `run` for every chunk at once and settles them all. Results keep
    /// chunk order.
    pub async fn run_concurrent<'a, T, R, F, Fut>(&self, items: &'a [T], run: F) -> Vec<R>
    where
        F: Fn(&'a [T]) -> Fut,
        Fut: Future<Output = R>,
    {
        join_all(self.chunks(items).map(run)).await
    }
}
