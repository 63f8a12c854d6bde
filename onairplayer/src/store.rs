//! Player state store
//!
//! [`PlayerStore`] is built once at the application root and owns the stream
//! transport, the status poller and the task that pumps media events into
//! the transport. Every surface gets a [`PlayerHandle`], a cheap clone that
//! reads the merged [`PlayerView`] and issues controls.
//!
//! The store is an ordinary value: nothing global, several independent
//! stores can live side by side.
//!
//! ```no_run
//! use std::sync::Arc;
//! use onairplayer::{HttpBackend, NullSink, PlayerStore, StreamEndpoint};
//!
//! # async fn demo() -> onairplayer::Result<()> {
//! let store = PlayerStore::builder()
//!     .endpoint(StreamEndpoint::new(
//!         "https://radio.example/live.mp3",
//!         "https://radio.example/api/nowplaying",
//!     ))
//!     .backend(Arc::new(HttpBackend::new(Arc::new(NullSink))?))
//!     .build()?;
//!
//! let player = store.handle();
//! player.toggle_play();
//! println!("{:?}", player.view().title());
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::error::{Error, Result};
use crate::models::{
    NowPlayingSnapshot, Phase, PlayerView, StreamEndpoint, UiFlags, DEFAULT_VOLUME,
};
use crate::status::{PollerHandle, StatusClient, StatusPoller, DEFAULT_POLL_INTERVAL};
use crate::transport::http::HttpBackend;
use crate::transport::{event_channel, MediaBackend, MediaEvent, StreamTransport};

/// Volume change applied by `volume_up` / `volume_down`
pub const VOLUME_STEP: i32 = 10;

struct Inner {
    endpoint: StreamEndpoint,
    transport: StreamTransport,
    now_playing: Option<NowPlayingSnapshot>,
    /// Bumped on every endpoint switch; snapshots from older pollers are dropped
    status_generation: u64,
    ui: UiFlags,
}

impl Inner {
    fn view(&self) -> PlayerView {
        PlayerView::compose(
            self.transport.state().clone(),
            self.now_playing.clone(),
            self.ui,
        )
    }
}

struct Shared {
    inner: Mutex<Inner>,
    view_tx: watch::Sender<PlayerView>,
    closed: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn publish(&self, inner: &Inner) {
        let view = inner.view();
        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }

    fn handle_media_event(&self, event: MediaEvent) {
        let mut inner = self.lock();
        if inner.transport.handle_event(event) {
            debug!(phase = ?inner.transport.phase(), "Playback state changed");
            self.publish(&inner);
        }
    }

    fn apply_snapshot(&self, generation: u64, snapshot: NowPlayingSnapshot) {
        if self.is_closed() {
            return;
        }
        let mut inner = self.lock();
        if inner.status_generation != generation {
            trace!(generation, current = inner.status_generation, "Discarding snapshot from a replaced poller");
            return;
        }
        trace!(title = ?snapshot.song.title, "Now playing updated");
        inner.now_playing = Some(snapshot);
        self.publish(&inner);
    }

    /// Run `f` on the state unless the store is closed, then publish.
    fn control(&self, f: impl FnOnce(&mut Inner)) {
        if self.is_closed() {
            debug!("Ignoring control on a closed player store");
            return;
        }
        let mut inner = self.lock();
        f(&mut inner);
        self.publish(&inner);
    }
}

/// Read and control access to a [`PlayerStore`], handed to every surface
#[derive(Clone)]
pub struct PlayerHandle {
    shared: Arc<Shared>,
}

impl PlayerHandle {
    /// Current merged view
    pub fn view(&self) -> PlayerView {
        self.shared.view_tx.borrow().clone()
    }

    /// Watch the merged view. Receivers see every change after subscription.
    pub fn subscribe(&self) -> watch::Receiver<PlayerView> {
        self.shared.view_tx.subscribe()
    }

    /// Start or pause. Does nothing while a load is in progress.
    pub fn toggle_play(&self) {
        self.shared.control(|inner| match inner.transport.phase() {
            Phase::Loading => debug!("Stream still loading, ignoring toggle"),
            Phase::Playing => inner.transport.stop(),
            _ => {
                inner.transport.start();
            }
        });
    }

    pub fn volume_up(&self) {
        self.step_volume(VOLUME_STEP);
    }

    pub fn volume_down(&self) {
        self.step_volume(-VOLUME_STEP);
    }

    fn step_volume(&self, delta: i32) {
        self.shared.control(|inner| {
            let target = i32::from(inner.transport.state().volume) + delta;
            let volume = inner.transport.set_volume(target);
            debug!(volume, "Volume changed");
        });
    }

    /// Set the volume directly, clamped to 0..=100
    pub fn set_volume(&self, volume: i32) {
        self.shared.control(|inner| {
            inner.transport.set_volume(volume);
        });
    }

    pub fn set_minimized(&self, minimized: bool) {
        self.shared.control(|inner| inner.ui.minimized = minimized);
    }

    pub fn set_visible(&self, visible: bool) {
        self.shared.control(|inner| inner.ui.visible = visible);
    }

    pub fn endpoint(&self) -> StreamEndpoint {
        self.shared.lock().endpoint.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl std::fmt::Debug for PlayerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Owner of the player for one application session
pub struct PlayerStore {
    handle: PlayerHandle,
    backend: Arc<dyn MediaBackend>,
    events_tx: mpsc::UnboundedSender<MediaEvent>,
    status_client: StatusClient,
    poll_interval: Duration,
    poller: Mutex<Option<PollerHandle>>,
    pump: Option<JoinHandle<()>>,
}

impl PlayerStore {
    pub fn builder() -> PlayerStoreBuilder {
        PlayerStoreBuilder::default()
    }

    /// A new handle for a surface
    pub fn handle(&self) -> PlayerHandle {
        self.handle.clone()
    }

    pub fn view(&self) -> PlayerView {
        self.handle.view()
    }

    /// Switch to another station. The transport and the poller are rebuilt;
    /// playback carries on if it was active.
    pub fn set_endpoint(&self, endpoint: StreamEndpoint) -> Result<()> {
        let shared = &self.handle.shared;
        if shared.is_closed() {
            return Err(Error::other("player store is closed"));
        }

        let mut poller = self.poller.lock().unwrap_or_else(|e| e.into_inner());
        let status_generation = {
            let mut inner = shared.lock();
            if inner.endpoint == endpoint {
                return Ok(());
            }
            // The old poller must not apply anything once the snapshot is cleared
            if let Some(mut old) = poller.take() {
                old.stop();
            }
            info!(
                stream = %endpoint.stream_url,
                status = %endpoint.status_url,
                "Switching endpoint"
            );

            let was_active = matches!(
                inner.transport.phase(),
                Phase::Loading | Phase::Ready | Phase::Playing
            );
            let volume = inner.transport.state().volume;

            inner.transport.teardown();
            // Generations keep counting so late events of the old transport stay stale
            let generation = inner.transport.generation();
            inner.transport = StreamTransport::new(
                endpoint.stream_url.clone(),
                self.backend.clone(),
                self.events_tx.clone(),
                i32::from(volume),
            )
            .starting_at_generation(generation);
            inner.now_playing = None;
            inner.status_generation += 1;
            inner.endpoint = endpoint.clone();
            if was_active {
                inner.transport.start();
            }
            shared.publish(&inner);
            inner.status_generation
        };

        *poller = spawn_poller(
            shared,
            self.status_client.clone(),
            &endpoint.status_url,
            self.poll_interval,
            status_generation,
        )?;
        Ok(())
    }

    /// Release everything. Further controls are ignored. Idempotent.
    pub fn shutdown(&mut self) {
        let shared = &self.handle.shared;
        if shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down player store");

        if let Some(mut poller) = self
            .poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            poller.stop();
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        let mut inner = shared.lock();
        inner.transport.teardown();
        shared.publish(&inner);
    }
}

impl Drop for PlayerStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for PlayerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerStore")
            .field("endpoint", &self.handle.endpoint())
            .field("poll_interval", &self.poll_interval)
            .field("closed", &self.handle.is_closed())
            .finish()
    }
}

fn spawn_poller(
    shared: &Arc<Shared>,
    client: StatusClient,
    status_url: &str,
    interval: Duration,
    generation: u64,
) -> Result<Option<PollerHandle>> {
    if status_url.trim().is_empty() {
        debug!("No status URL configured, now-playing polling disabled");
        return Ok(None);
    }

    let shared = shared.clone();
    StatusPoller::new(client, status_url, interval)
        .spawn(move |snapshot| shared.apply_snapshot(generation, snapshot))
        .map(Some)
}

/// Builder for [`PlayerStore`]
pub struct PlayerStoreBuilder {
    endpoint: Option<StreamEndpoint>,
    backend: Option<Arc<dyn MediaBackend>>,
    default_volume: i32,
    autoplay: bool,
    poll_interval: Duration,
    status_client: Option<StatusClient>,
}

impl Default for PlayerStoreBuilder {
    fn default() -> Self {
        Self {
            endpoint: None,
            backend: None,
            default_volume: i32::from(DEFAULT_VOLUME),
            autoplay: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            status_client: None,
        }
    }
}

impl PlayerStoreBuilder {
    pub fn endpoint(mut self, endpoint: StreamEndpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Media backend. Defaults to an [`HttpBackend`] discarding audio.
    pub fn backend(mut self, backend: Arc<dyn MediaBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Initial volume, clamped to 0..=100
    pub fn default_volume(mut self, volume: i32) -> Self {
        self.default_volume = volume;
        self
    }

    pub fn autoplay(mut self, autoplay: bool) -> Self {
        self.autoplay = autoplay;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn status_client(mut self, client: StatusClient) -> Self {
        self.status_client = Some(client);
        self
    }

    /// Build the store and start polling. Must run inside a tokio runtime.
    pub fn build(self) -> Result<PlayerStore> {
        let runtime = Handle::try_current().map_err(|e| Error::NoRuntime(e.to_string()))?;
        let endpoint = self
            .endpoint
            .ok_or_else(|| Error::other("a stream endpoint is required"))?;
        let backend: Arc<dyn MediaBackend> = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpBackend::builder().build()?),
        };
        let status_client = match self.status_client {
            Some(client) => client,
            None => StatusClient::new()?,
        };

        let (events_tx, mut events_rx) = event_channel();
        let transport = StreamTransport::new(
            endpoint.stream_url.clone(),
            backend.clone(),
            events_tx.clone(),
            self.default_volume,
        );

        let inner = Inner {
            endpoint: endpoint.clone(),
            transport,
            now_playing: None,
            status_generation: 0,
            ui: UiFlags::default(),
        };
        let (view_tx, _) = watch::channel(inner.view());
        let shared = Arc::new(Shared {
            inner: Mutex::new(inner),
            view_tx,
            closed: AtomicBool::new(false),
        });

        let pump = {
            let shared = shared.clone();
            runtime.spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    shared.handle_media_event(event);
                }
            })
        };

        let poller = spawn_poller(&shared, status_client.clone(), &endpoint.status_url, self.poll_interval, 0)?;

        info!(
            stream = %endpoint.stream_url,
            status = %endpoint.status_url,
            autoplay = self.autoplay,
            "Player store ready"
        );

        let store = PlayerStore {
            handle: PlayerHandle { shared },
            backend,
            events_tx,
            status_client,
            poll_interval: self.poll_interval,
            poller: Mutex::new(poller),
            pump: Some(pump),
        };

        if self.autoplay {
            store.handle.toggle_play();
        }

        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, MEDIA_ERR_DECODE};
    use crate::transport::testing::{Call, MockBackend};
    use crate::transport::MediaEventKind;

    const HLS_URL: &str = "https://radio.example/live/stream.m3u8";
    const MP3_URL: &str = "https://radio.example/live.mp3";

    fn store(url: &str, backend: &Arc<MockBackend>) -> PlayerStore {
        PlayerStore::builder()
            .endpoint(StreamEndpoint::new(url, ""))
            .backend(backend.clone())
            .default_volume(50)
            .build()
            .unwrap()
    }

    /// Let the pump task drain pending media events
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_toggle_is_noop_while_loading() {
        let backend = MockBackend::without_engine();
        let store = store(MP3_URL, &backend);
        let player = store.handle();

        player.toggle_play();
        assert_eq!(player.view().phase(), Phase::Loading);
        player.toggle_play();
        assert_eq!(player.view().phase(), Phase::Loading);

        assert_eq!(backend.recorder.elements_created(), 1);
        assert_eq!(backend.recorder.count(|c| matches!(c, Call::Play)), 1);
        assert_eq!(backend.recorder.count(|c| matches!(c, Call::Pause)), 0);
    }

    #[tokio::test]
    async fn test_toggle_pause_resume_keeps_engine() {
        let backend = MockBackend::with_engine();
        let store = store(HLS_URL, &backend);
        let player = store.handle();

        player.toggle_play();
        backend
            .recorder
            .emit(MediaEventKind::ManifestParsed { variants: 1 });
        backend.recorder.emit(MediaEventKind::CanPlay);
        backend.recorder.emit(MediaEventKind::Playing);
        settle().await;
        assert!(player.view().is_playing());

        for _ in 0..3 {
            player.toggle_play();
            assert_eq!(player.view().phase(), Phase::Paused);
            player.toggle_play();
            backend.recorder.emit(MediaEventKind::Playing);
            settle().await;
            assert!(player.view().is_playing());
        }

        assert_eq!(backend.recorder.engines_created(), 1);
        assert_eq!(backend.recorder.count(|c| matches!(c, Call::Destroy)), 0);
    }

    #[tokio::test]
    async fn test_volume_steps_and_clamps() {
        let backend = MockBackend::without_engine();
        let store = store(MP3_URL, &backend);
        let player = store.handle();

        player.volume_up();
        assert_eq!(player.view().volume(), 60);
        for _ in 0..10 {
            player.volume_up();
        }
        assert_eq!(player.view().volume(), 100);
        for _ in 0..12 {
            player.volume_down();
        }
        assert_eq!(player.view().volume(), 0);

        player.set_volume(35);
        player.volume_down();
        assert_eq!(player.view().volume(), 25);
    }

    #[tokio::test]
    async fn test_ui_flags_do_not_touch_transport() {
        let backend = MockBackend::without_engine();
        let store = store(MP3_URL, &backend);
        let player = store.handle();

        player.set_minimized(true);
        player.set_visible(false);
        let view = player.view();
        assert!(view.minimized);
        assert!(!view.visible);
        assert_eq!(view.phase(), Phase::Idle);
        assert!(backend.recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn test_playback_error_reaches_view() {
        let backend = MockBackend::without_engine();
        let store = store(MP3_URL, &backend);
        let player = store.handle();
        let mut rx = player.subscribe();

        player.toggle_play();
        backend.recorder.emit(MediaEventKind::Error(MEDIA_ERR_DECODE));
        settle().await;

        let view = rx.borrow_and_update().clone();
        assert_eq!(view.phase(), Phase::Errored);
        assert_eq!(
            view.playback.last_error.as_ref().map(|e| e.kind),
            Some(ErrorKind::DecodeError)
        );
        assert!(view.error_message().is_some());

        // Controls stay usable: a retry reloads
        player.toggle_play();
        assert_eq!(player.view().phase(), Phase::Loading);
        assert_eq!(backend.recorder.elements_created(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_replaced_wholesale() {
        let backend = MockBackend::without_engine();
        let store = store(MP3_URL, &backend);
        let shared = &store.handle.shared;

        shared.apply_snapshot(0, NowPlayingSnapshot {
            station_name: Some("Station".into()),
            listener_count: Some(5),
            ..Default::default()
        });
        shared.apply_snapshot(0, NowPlayingSnapshot {
            listener_count: Some(9),
            ..Default::default()
        });

        let view = store.view();
        let now_playing = view.now_playing.expect("snapshot applied");
        assert_eq!(now_playing.listener_count, Some(9));
        assert_eq!(now_playing.station_name, None);
    }

    #[tokio::test]
    async fn test_autoplay_starts_once() {
        let backend = MockBackend::without_engine();
        let store = PlayerStore::builder()
            .endpoint(StreamEndpoint::new(MP3_URL, ""))
            .backend(backend.clone())
            .autoplay(true)
            .build()
            .unwrap();

        assert_eq!(store.view().phase(), Phase::Loading);
        assert_eq!(backend.recorder.elements_created(), 1);
    }

    #[tokio::test]
    async fn test_set_endpoint_rebuilds_transport() {
        let backend = MockBackend::without_engine();
        let store = store(MP3_URL, &backend);
        let player = store.handle();

        player.toggle_play();
        backend.recorder.emit(MediaEventKind::Playing);
        settle().await;
        store.handle.shared.apply_snapshot(0, NowPlayingSnapshot::default());
        assert!(player.view().now_playing.is_some());

        let other = StreamEndpoint::new("https://other.example/stream.aac", "");
        store.set_endpoint(other.clone()).unwrap();

        assert_eq!(player.endpoint(), other);
        assert!(player.view().now_playing.is_none());
        assert_eq!(player.view().phase(), Phase::Loading);
        assert_eq!(backend.recorder.elements_created(), 2);
        assert_eq!(backend.recorder.count(|c| matches!(c, Call::Release)), 1);

        let stale = MediaEvent {
            generation: 1,
            kind: MediaEventKind::Error(MEDIA_ERR_DECODE),
        };
        store.handle.shared.handle_media_event(stale);
        assert_eq!(player.view().phase(), Phase::Loading);

        // A response of the replaced poller landing late is dropped
        let late = NowPlayingSnapshot {
            station_name: Some("Old station".into()),
            ..Default::default()
        };
        store.handle.shared.apply_snapshot(0, late.clone());
        assert!(player.view().now_playing.is_none());
        store.handle.shared.apply_snapshot(1, late);
        assert!(player.view().now_playing.is_some());

        // Same endpoint: nothing is rebuilt
        let calls_before = backend.recorder.calls().len();
        store.set_endpoint(other).unwrap();
        assert_eq!(backend.recorder.calls().len(), calls_before);
    }

    #[tokio::test]
    async fn test_shutdown_releases_and_closes() {
        let backend = MockBackend::with_engine();
        let mut store = store(HLS_URL, &backend);
        let player = store.handle();

        player.toggle_play();
        store.shutdown();

        assert!(player.is_closed());
        assert_eq!(backend.recorder.count(|c| matches!(c, Call::Destroy)), 1);
        assert_eq!(backend.recorder.count(|c| matches!(c, Call::Release)), 1);

        player.toggle_play();
        player.volume_up();
        assert_eq!(backend.recorder.elements_created(), 1);
        assert_eq!(player.view().phase(), Phase::Idle);
        assert!(store.set_endpoint(StreamEndpoint::new(MP3_URL, "")).is_err());

        drop(store);
        assert_eq!(backend.recorder.count(|c| matches!(c, Call::Destroy)), 1);
    }

    #[tokio::test]
    async fn test_independent_stores() {
        let first = MockBackend::without_engine();
        let second = MockBackend::without_engine();
        let a = store(MP3_URL, &first);
        let b = store(MP3_URL, &second);

        a.handle().toggle_play();
        assert_eq!(a.view().phase(), Phase::Loading);
        assert_eq!(b.view().phase(), Phase::Idle);
        assert_eq!(second.recorder.elements_created(), 0);
    }

    #[test]
    fn test_build_requires_endpoint() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        let result = PlayerStore::builder()
            .backend(MockBackend::without_engine())
            .build();
        assert!(matches!(result, Err(Error::Other(_))));
    }
}
