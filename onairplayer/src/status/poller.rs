//! Fixed-interval status polling
//!
//! Polling runs whatever the playback phase is. Every tick spawns its own
//! request, so a stalled request never delays the next one, and results are
//! applied in completion order. A failed or unrecognised poll applies
//! nothing: the last good snapshot stays in place.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use super::client::StatusClient;
use super::shapes::StatusShape;
use crate::error::{Error, Result};
use crate::models::NowPlayingSnapshot;

/// Default delay between two polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Polls one status URL
#[derive(Debug, Clone)]
pub struct StatusPoller {
    client: StatusClient,
    url: String,
    interval: Duration,
}

impl StatusPoller {
    /// A zero interval falls back to [`DEFAULT_POLL_INTERVAL`].
    pub fn new(client: StatusClient, url: impl Into<String>, interval: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            interval: if interval.is_zero() {
                DEFAULT_POLL_INTERVAL
            } else {
                interval
            },
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Fetch and normalize once.
    ///
    /// `Ok(None)` means the document matched no known shape.
    pub async fn poll_once(&self) -> Result<Option<NowPlayingSnapshot>> {
        let document = self.client.fetch(&self.url).await?;
        Ok(StatusShape::detect(&document).map(StatusShape::into_snapshot))
    }

    /// Poll now, then on every interval tick, handing each new snapshot to
    /// `apply`. Polling stops when the returned handle is dropped.
    pub fn spawn<F>(self, apply: F) -> Result<PollerHandle>
    where
        F: Fn(NowPlayingSnapshot) + Send + Sync + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| Error::NoRuntime(e.to_string()))?;
        let alive = Arc::new(AtomicBool::new(true));

        debug!(url = %self.url, interval_ms = self.interval.as_millis() as u64, "Starting status poller");

        let poller = Arc::new(self);
        let apply = Arc::new(apply);
        let task = {
            let alive = alive.clone();
            let runtime_for_ticks = runtime.clone();
            runtime.spawn(async move {
                let mut ticker = tokio::time::interval(poller.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    ticker.tick().await;
                    if !alive.load(Ordering::SeqCst) {
                        break;
                    }
                    runtime_for_ticks.spawn(run_tick(poller.clone(), apply.clone(), alive.clone()));
                }
            })
        };

        Ok(PollerHandle {
            alive,
            task: Some(task),
        })
    }
}

async fn run_tick<F>(poller: Arc<StatusPoller>, apply: Arc<F>, alive: Arc<AtomicBool>)
where
    F: Fn(NowPlayingSnapshot) + Send + Sync + 'static,
{
    match poller.poll_once().await {
        Ok(Some(snapshot)) => {
            if alive.load(Ordering::SeqCst) {
                trace!(url = %poller.url, "Applying status snapshot");
                apply(snapshot);
            } else {
                trace!(url = %poller.url, "Discarding status from a stopped poller");
            }
        }
        Ok(None) => {
            debug!(url = %poller.url, "Status document has no known shape, keeping previous snapshot");
        }
        Err(e) => {
            warn!(url = %poller.url, error = %e, "Status poll failed, keeping previous snapshot");
        }
    }
}

/// Keeps a poller running. Dropping it stops the ticks and discards
/// responses still in flight.
#[derive(Debug)]
pub struct PollerHandle {
    alive: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
