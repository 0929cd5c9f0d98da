// Deferred crawl triggers: sleep on a spawned task, then hand the request to
// the worker loop over a channel. Fire-and-forget by design; if the worker is
// gone the request is dropped with a warning and the periodic chain for that
// exchange stalls until re-triggered externally.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

use crate::store::{CrawlRequest, Scheduler};

#[derive(Clone)]
pub struct DelayedCrawlScheduler {
    tx: mpsc::Sender<CrawlRequest>,
}

impl DelayedCrawlScheduler {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<CrawlRequest>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

impl Scheduler for DelayedCrawlScheduler {
    fn schedule_delayed(&self, delay: Duration, request: CrawlRequest) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(request.clone()).await.is_err() {
                warn!(exchange = %request.exchange, "crawl worker gone, dropping scheduled crawl");
            }
        });
    }
}
