//! Segmented (HLS) engine
//!
//! Fetches the manifest, picks a variant under the bandwidth cap, then pulls
//! segments into the attached element's output. Live playlists are reloaded
//! every target duration. A missing `#EXT-X-ENDLIST` means the stream never
//! ends on its own.
//!
//! `CanPlay` and `Playing` follow the first segment handed to the output.
//! Failures are reported as `EngineError` events. Manifest failures and
//! [`MAX_CONSECUTIVE_FAILURES`] segment or playlist failures in a row are
//! fatal; anything less is recoverable and makes the engine step down one
//! variant. Segments downloading slower than real time also step down, and a
//! run of fast ones steps back up, never above the bandwidth cap. A session
//! that panics is reported as a fatal error too.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::FutureExt;
use reqwest::Client;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use super::playlist::{MediaPlaylist, Playlist, Variant};
use crate::error::{Error, Result};
use crate::transport::media::{
    EventSender, MediaElement, MediaEventKind, MediaOutput, MediaSource, SegmentedEngine,
};

/// Failures in a row before the engine gives up
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Segments kept behind the live edge when joining a live playlist
const LIVE_EDGE_SEGMENTS: usize = 3;

/// Fast segment downloads before trying the next variant up
const STEP_UP_AFTER: u32 = 8;

const PAUSE_POLL: Duration = Duration::from_millis(100);

pub struct HlsEngine {
    client: Client,
    runtime: Handle,
    events: EventSender,
    max_bandwidth: u64,
    url: Option<String>,
    output: Option<Arc<MediaOutput>>,
    task: Option<JoinHandle<()>>,
}

impl HlsEngine {
    pub fn new(client: Client, runtime: Handle, events: EventSender, max_bandwidth: u64) -> Self {
        Self {
            client,
            runtime,
            events,
            max_bandwidth,
            url: None,
            output: None,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Feed `output` directly, without going through an element.
    pub(crate) fn attach_output(&mut self, output: Arc<MediaOutput>) {
        self.output = Some(output);
        self.spawn_if_ready();
    }

    fn spawn_if_ready(&mut self) {
        if self.task.is_some() {
            return;
        }
        let (Some(url), Some(output)) = (self.url.clone(), self.output.clone()) else {
            return;
        };

        let events = self.events.clone();
        let session = Session {
            client: self.client.clone(),
            events: self.events.clone(),
            output,
            max_bandwidth: self.max_bandwidth,
        };
        self.task = Some(self.runtime.spawn(supervised(session.run(url), events)));
    }
}

impl SegmentedEngine for HlsEngine {
    fn load_source(&mut self, url: &str) {
        debug!(url, "Loading segmented manifest");
        self.url = Some(url.to_string());
        self.spawn_if_ready();
    }

    fn attach_media(&mut self, element: &mut dyn MediaElement) {
        element.set_source(MediaSource::Engine);
        self.attach_output(element.output());
    }

    fn destroy(&mut self) {
        if let Some(task) = self.task.take() {
            trace!("Stopping segmented engine");
            task.abort();
        }
        self.output = None;
    }
}

impl Drop for HlsEngine {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Run a session, turning a panic into a fatal engine error.
async fn supervised(session: impl Future<Output = ()>, events: EventSender) {
    if AssertUnwindSafe(session).catch_unwind().await.is_err() {
        warn!("Segmented session panicked");
        events.emit(MediaEventKind::EngineError {
            fatal: true,
            details: "segmented session ended unexpectedly".to_string(),
        });
    }
}

/// Pick the highest variant under the cap, or the lowest if none fits.
fn select_variant(variants: &[Variant], max_bandwidth: u64) -> usize {
    if max_bandwidth == 0 {
        return variants.len().saturating_sub(1);
    }
    variants
        .iter()
        .rposition(|v| v.bandwidth <= max_bandwidth)
        .unwrap_or(0)
}

/// State of one playback run, owned by the background task
struct Session {
    client: Client,
    events: EventSender,
    output: Arc<MediaOutput>,
    max_bandwidth: u64,
}

impl Session {
    async fn run(self, url: String) {
        let manifest_url = match Url::parse(&url) {
            Ok(url) => url,
            Err(e) => {
                self.fatal(format!("manifestLoadError: {}", e));
                return;
            }
        };

        let manifest = match self.fetch_playlist(&manifest_url).await {
            Ok(playlist) => playlist,
            Err(e) => {
                self.fatal(format!("manifestLoadError: {}", e));
                return;
            }
        };

        let (variants, first_media) = match manifest {
            Playlist::Master(variants) => (variants, None),
            Playlist::Media(media) => (
                vec![Variant {
                    uri: manifest_url,
                    bandwidth: 0,
                }],
                Some(media),
            ),
        };

        info!(url = %url, variants = variants.len(), "Segmented manifest parsed");
        self.events.emit(MediaEventKind::ManifestParsed {
            variants: variants.len(),
        });

        self.pull_segments(variants, first_media).await;
    }

    async fn pull_segments(&self, variants: Vec<Variant>, mut prefetched: Option<MediaPlaylist>) {
        let mut level = select_variant(&variants, self.max_bandwidth);
        let mut next_sequence: Option<u64> = None;
        let mut failures = 0u32;
        let mut successes = 0u32;
        let mut delivered = false;

        loop {
            let media = match prefetched.take() {
                Some(media) => media,
                None => match self.fetch_media(&variants[level].uri).await {
                    Ok(media) => media,
                    Err(e) => {
                        failures += 1;
                        if !self.recoverable(failures, format!("levelLoadError: {}", e)) {
                            return;
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                },
            };

            let start = next_sequence.unwrap_or_else(|| {
                let skip = if media.ended {
                    0
                } else {
                    media.segments.len().saturating_sub(LIVE_EDGE_SEGMENTS)
                };
                media.media_sequence + skip as u64
            });

            let mut switched = false;
            for segment in media.segments.iter().filter(|s| s.sequence >= start) {
                self.wait_while_paused().await;

                let started = Instant::now();
                match self.fetch_bytes(&segment.uri).await {
                    Ok(bytes) => {
                        let elapsed = started.elapsed();
                        next_sequence = Some(segment.sequence + 1);
                        failures = 0;
                        if self.output.write(&bytes) && !delivered {
                            delivered = true;
                            self.events.emit(MediaEventKind::CanPlay);
                            self.events.emit(MediaEventKind::Playing);
                        }
                        trace!(sequence = segment.sequence, bytes = bytes.len(), ?elapsed, "Segment played");

                        if elapsed > segment.duration && level > 0 {
                            debug!(?elapsed, "Segment slower than real time, stepping down one variant");
                            level -= 1;
                            successes = 0;
                            switched = true;
                            break;
                        }
                        if elapsed * 2 < segment.duration {
                            successes += 1;
                        }

                        if successes >= STEP_UP_AFTER && level + 1 < variants.len() {
                            let next = &variants[level + 1];
                            if self.max_bandwidth == 0 || next.bandwidth <= self.max_bandwidth {
                                debug!(bandwidth = next.bandwidth, "Stepping up one variant");
                                level += 1;
                                successes = 0;
                                switched = true;
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        successes = 0;
                        if !self.recoverable(failures, format!("fragLoadError: {}", e)) {
                            return;
                        }
                        if level > 0 {
                            debug!("Stepping down one variant");
                            level -= 1;
                        }
                        switched = true;
                        break;
                    }
                }
            }

            if media.ended && !switched {
                info!("Segmented stream ended");
                self.events.emit(MediaEventKind::Ended);
                return;
            }

            if !switched {
                tokio::time::sleep(media.target_duration).await;
            }
        }
    }

    /// Report a failure. Returns false once it became fatal.
    fn recoverable(&self, failures: u32, details: String) -> bool {
        if failures >= MAX_CONSECUTIVE_FAILURES {
            self.fatal(format!("{} ({} failures in a row)", details, failures));
            false
        } else {
            warn!(details = %details, failures, "Segmented stream hiccup");
            self.events.emit(MediaEventKind::EngineError {
                fatal: false,
                details,
            });
            true
        }
    }

    fn fatal(&self, details: String) {
        warn!(details = %details, "Segmented stream failed");
        self.events.emit(MediaEventKind::EngineError {
            fatal: true,
            details,
        });
    }

    async fn wait_while_paused(&self) {
        while self.output.is_paused() {
            tokio::time::sleep(PAUSE_POLL).await;
        }
    }

    async fn fetch_media(&self, url: &Url) -> Result<MediaPlaylist> {
        match self.fetch_playlist(url).await? {
            Playlist::Media(media) => Ok(media),
            Playlist::Master(_) => Err(Error::playlist("variant points at another master playlist")),
        }
    }

    async fn fetch_playlist(&self, url: &Url) -> Result<Playlist> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::api_error(format!("{} returned {}", url, status)));
        }
        let text = response.text().await?;
        Playlist::parse(&text, url)
    }

    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes> {
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::api_error(format!("{} returned {}", url, status)));
        }
        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variants(bandwidths: &[u64]) -> Vec<Variant> {
        bandwidths
            .iter()
            .map(|b| Variant {
                uri: Url::parse(&format!("https://radio.example/{}.m3u8", b)).unwrap(),
                bandwidth: *b,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_panicking_session_is_fatal() {
        let (tx, mut rx) = crate::transport::media::event_channel();
        supervised(async { panic!("segment arithmetic overflow") }, EventSender::new(3, tx)).await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.generation, 3);
        assert!(matches!(event.kind, MediaEventKind::EngineError { fatal: true, .. }));
    }

    #[tokio::test]
    async fn test_finished_session_reports_nothing_more() {
        let (tx, mut rx) = crate::transport::media::event_channel();
        supervised(async {}, EventSender::new(1, tx)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_select_variant_without_cap() {
        assert_eq!(select_variant(&variants(&[64_000, 128_000, 320_000]), 0), 2);
    }

    #[test]
    fn test_select_variant_under_cap() {
        let list = variants(&[64_000, 128_000, 320_000]);
        assert_eq!(select_variant(&list, 200_000), 1);
        assert_eq!(select_variant(&list, 128_000), 1);
        assert_eq!(select_variant(&list, 32_000), 0);
    }
}
