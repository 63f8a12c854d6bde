//! HTTP media backend
//!
//! Plays progressive streams by pulling the response body with `reqwest` and
//! segmented streams with [`HlsEngine`]. Audio bytes go to an [`AudioSink`];
//! decoding and device output belong to whoever provides the sink.
//!
//! Work runs on the tokio runtime captured when the backend is built, so
//! element and engine methods stay synchronous and never block.

pub mod hls;
pub mod playlist;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::format::{StreamFormat, SEGMENTED_MIME_TYPE};
use super::media::{
    AudioSink, EventSender, MediaBackend, MediaElement, MediaEventKind, MediaOutput, MediaSource,
    NullSink, SegmentedEngine,
};
use crate::error::{Error, Result, MEDIA_ERR_NETWORK, MEDIA_ERR_SRC_NOT_SUPPORTED};

pub use hls::HlsEngine;

/// Default connect timeout for stream requests
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default User-Agent for stream requests
pub const DEFAULT_USER_AGENT: &str = concat!("OnAir/", env!("CARGO_PKG_VERSION"), " (onairplayer)");

const PROGRESSIVE_ACCEPT: &str = "audio/*, application/ogg;q=0.9, */*;q=0.1";

/// Backend creating [`HttpMediaElement`]s and [`HlsEngine`]s
pub struct HttpBackend {
    client: Client,
    runtime: Handle,
    sink: Arc<dyn AudioSink>,
    native_segmented: bool,
    max_bandwidth: u64,
}

impl HttpBackend {
    /// Backend with default settings writing into `sink`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(sink: Arc<dyn AudioSink>) -> Result<Self> {
        Self::builder().sink(sink).build()
    }

    pub fn builder() -> HttpBackendBuilder {
        HttpBackendBuilder::default()
    }

    pub fn http_client(&self) -> &Client {
        &self.client
    }
}

impl MediaBackend for HttpBackend {
    fn create_element(&self, events: EventSender) -> Box<dyn MediaElement> {
        Box::new(HttpMediaElement {
            client: self.client.clone(),
            runtime: self.runtime.clone(),
            events,
            output: Arc::new(MediaOutput::new(self.sink.clone())),
            source: None,
            task: None,
            native_engine: None,
            native_segmented: self.native_segmented,
            max_bandwidth: self.max_bandwidth,
        })
    }

    fn segmented_engine_supported(&self) -> bool {
        true
    }

    fn create_segmented_engine(&self, events: EventSender) -> Box<dyn SegmentedEngine> {
        Box::new(HlsEngine::new(
            self.client.clone(),
            self.runtime.clone(),
            events,
            self.max_bandwidth,
        ))
    }
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("native_segmented", &self.native_segmented)
            .field("max_bandwidth", &self.max_bandwidth)
            .finish()
    }
}

/// Builder for [`HttpBackend`]
pub struct HttpBackendBuilder {
    client: Option<Client>,
    sink: Arc<dyn AudioSink>,
    connect_timeout: Duration,
    user_agent: String,
    native_segmented: bool,
    max_bandwidth: u64,
}

impl Default for HttpBackendBuilder {
    fn default() -> Self {
        Self {
            client: None,
            sink: Arc::new(NullSink),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            native_segmented: false,
            max_bandwidth: 0,
        }
    }
}

impl HttpBackendBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom HTTP client
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn AudioSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Connect timeout. Live bodies never finish, so there is no overall timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Let elements play segmented manifests themselves
    pub fn native_segmented(mut self, enabled: bool) -> Self {
        self.native_segmented = enabled;
        self
    }

    /// Highest variant bandwidth to pick, in bits per second. 0 means no cap.
    pub fn max_bandwidth(mut self, bits_per_second: u64) -> Self {
        self.max_bandwidth = bits_per_second;
        self
    }

    pub fn build(self) -> Result<HttpBackend> {
        let runtime = Handle::try_current().map_err(|e| Error::NoRuntime(e.to_string()))?;

        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(&self.user_agent)
                .connect_timeout(self.connect_timeout)
                .build()?,
        };

        Ok(HttpBackend {
            client,
            runtime,
            sink: self.sink,
            native_segmented: self.native_segmented,
            max_bandwidth: self.max_bandwidth,
        })
    }
}

// ============================================================================
// Element
// ============================================================================

/// One HTTP audio resource
pub struct HttpMediaElement {
    client: Client,
    runtime: Handle,
    events: EventSender,
    output: Arc<MediaOutput>,
    source: Option<MediaSource>,
    task: Option<JoinHandle<()>>,
    native_engine: Option<HlsEngine>,
    native_segmented: bool,
    max_bandwidth: u64,
}

impl HttpMediaElement {
    fn stop_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn task_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Unpause. Playing is reported here only when audio already flowed;
    /// otherwise the fetch task reports it with its first delivered bytes.
    fn resume_output(&self) {
        self.output.set_paused(false);
        if self.output.bytes_written() > 0 {
            self.events.emit(MediaEventKind::Playing);
        }
    }

    fn play_url(&mut self, url: String) {
        if self.native_segmented && StreamFormat::detect(&url).is_segmented() {
            let engine = self.native_engine.get_or_insert_with(|| {
                HlsEngine::new(
                    self.client.clone(),
                    self.runtime.clone(),
                    self.events.clone(),
                    self.max_bandwidth,
                )
            });
            if !engine.is_running() {
                engine.attach_output(self.output.clone());
                engine.load_source(&url);
            }
            self.resume_output();
            return;
        }

        self.output.set_paused(false);
        if self.task_running() {
            // Still connecting: the task reports Playing once audio flows
            return;
        }

        debug!(url = %url, "Connecting to progressive stream");
        self.task = Some(self.runtime.spawn(stream_progressive(
            self.client.clone(),
            url,
            self.events.clone(),
            self.output.clone(),
        )));
    }
}

impl MediaElement for HttpMediaElement {
    fn set_source(&mut self, source: MediaSource) {
        self.stop_task();
        if let Some(mut engine) = self.native_engine.take() {
            engine.destroy();
        }
        self.output.set_paused(true);
        self.source = Some(source);
        self.events.emit(MediaEventKind::LoadStart);
    }

    fn has_source(&self) -> bool {
        self.source.is_some()
    }

    fn play(&mut self) {
        match self.source.clone() {
            Some(MediaSource::Url(url)) => self.play_url(url),
            Some(MediaSource::Engine) => self.resume_output(),
            None => debug!("play() without a source"),
        }
    }

    fn pause(&mut self) {
        self.output.set_paused(true);
        // A live progressive body cannot be held open while paused
        self.stop_task();
        self.events.emit(MediaEventKind::Pause);
    }

    fn set_volume(&mut self, volume: f32) {
        self.output.set_volume(volume);
    }

    fn supports_native_segmented(&self) -> bool {
        self.native_segmented
    }

    fn output(&self) -> Arc<MediaOutput> {
        self.output.clone()
    }

    fn release(&mut self) {
        self.stop_task();
        if let Some(mut engine) = self.native_engine.take() {
            engine.destroy();
        }
        self.output.set_paused(true);
        self.source = None;
    }
}

impl Drop for HttpMediaElement {
    fn drop(&mut self) {
        self.release();
    }
}

fn is_playable_content_type(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    mime.starts_with("audio/")
        || mime == "application/ogg"
        || mime == "application/octet-stream"
        || mime == SEGMENTED_MIME_TYPE
}

async fn stream_progressive(
    client: Client,
    url: String,
    events: EventSender,
    output: Arc<MediaOutput>,
) {
    let response = match client.get(&url).header(ACCEPT, PROGRESSIVE_ACCEPT).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(url = %url, error = %e, "Stream connection failed");
            events.emit(MediaEventKind::Error(MEDIA_ERR_NETWORK));
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        warn!(url = %url, %status, "Stream request rejected");
        events.emit(MediaEventKind::Error(MEDIA_ERR_NETWORK));
        return;
    }

    if let Some(content_type) = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        if !is_playable_content_type(content_type) {
            warn!(url = %url, content_type, "Stream is not audio");
            events.emit(MediaEventKind::Error(MEDIA_ERR_SRC_NOT_SUPPORTED));
            return;
        }
    }

    events.emit(MediaEventKind::CanPlay);

    let mut playing = false;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                if output.write(&bytes) && !bytes.is_empty() && !playing {
                    playing = true;
                    events.emit(MediaEventKind::Playing);
                }
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Stream interrupted");
                events.emit(MediaEventKind::Error(MEDIA_ERR_NETWORK));
                return;
            }
        }
    }

    debug!(url = %url, bytes = output.bytes_written(), "Stream body finished");
    events.emit(MediaEventKind::Ended);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playable_content_types() {
        assert!(is_playable_content_type("audio/mpeg"));
        assert!(is_playable_content_type("audio/aac; charset=binary"));
        assert!(is_playable_content_type("Application/Ogg"));
        assert!(is_playable_content_type("application/octet-stream"));
        assert!(!is_playable_content_type("text/html; charset=utf-8"));
        assert!(!is_playable_content_type("application/json"));
    }

    #[test]
    fn test_build_requires_runtime() {
        let result = HttpBackend::builder().build();
        assert!(matches!(result, Err(Error::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_builder_settings() {
        let backend = HttpBackend::builder()
            .native_segmented(true)
            .max_bandwidth(128_000)
            .build()
            .unwrap();
        assert!(backend.segmented_engine_supported());

        let (tx, _rx) = crate::transport::media::event_channel();
        let element = backend.create_element(EventSender::new(1, tx));
        assert!(element.supports_native_segmented());
        assert!(!element.has_source());
        assert!(element.output().is_paused());
    }
}
