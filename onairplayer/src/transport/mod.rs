//! Stream transport: turns a stream URL into audible playback
//!
//! [`StreamTransport`] owns at most one [`MediaElement`] and, for segmented
//! streams, one [`SegmentedEngine`] attached to it. It is driven from two
//! directions:
//!
//! - commands (`start`, `stop`, `set_volume`, `teardown`) issued by the store,
//! - [`MediaEvent`]s coming back from the resources, fed to `handle_event`.
//!
//! ## State machine
//!
//! ```text
//! Idle --start--> Loading --can play--> Ready --playing--> Playing
//! Playing --stop--> Paused --start (resume, no reload)--> Playing
//! any --fatal error--> Errored --start (full reload)--> Loading
//! ```
//!
//! A `start()` that finds a live element with a source takes the resume
//! path: the element is told to play again and the engine is left alone.

pub mod format;
pub mod http;
pub mod media;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::error::TransportError;
use crate::models::{clamp_volume, Phase, PlaybackState, MAX_VOLUME};

pub use format::{PlaybackStrategy, StreamFormat};
pub use media::{
    event_channel, AudioSink, EventReceiver, EventSender, MediaBackend, MediaElement, MediaEvent,
    MediaEventKind, MediaOutput, MediaSource, NullSink, SegmentedEngine,
};

/// Which path a `start()` call took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPath {
    /// Existing element resumed in place
    Resumed,
    /// Fresh resources built with the given strategy
    Loaded(PlaybackStrategy),
}

/// Owner of the audio resource for one stream URL
pub struct StreamTransport {
    stream_url: String,
    backend: Arc<dyn MediaBackend>,
    events: mpsc::UnboundedSender<MediaEvent>,
    generation: u64,
    element: Option<Box<dyn MediaElement>>,
    engine: Option<Box<dyn SegmentedEngine>>,
    state: PlaybackState,
}

impl StreamTransport {
    pub fn new(
        stream_url: impl Into<String>,
        backend: Arc<dyn MediaBackend>,
        events: mpsc::UnboundedSender<MediaEvent>,
        volume: i32,
    ) -> Self {
        Self {
            stream_url: stream_url.into(),
            backend,
            events,
            generation: 0,
            element: None,
            engine: None,
            state: PlaybackState::new(volume),
        }
    }

    /// Continue generation numbering from a previous transport sharing the same channel.
    pub fn starting_at_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    /// Generation of the current resources. Events from older ones are ignored.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    fn can_resume(&self) -> bool {
        let live_phase = !matches!(self.state.phase, Phase::Idle | Phase::Errored);
        live_phase
            && self
                .element
                .as_ref()
                .is_some_and(|element| element.has_source())
    }

    /// Start or resume playback.
    pub fn start(&mut self) -> StartPath {
        if self.can_resume() {
            debug!(url = %self.stream_url, "Resuming stream without reload");
            if let Some(element) = self.element.as_mut() {
                element.play();
            }
            return StartPath::Resumed;
        }

        self.release_resources();
        self.generation += 1;
        let events = EventSender::new(self.generation, self.events.clone());

        let mut element = self.backend.create_element(events.clone());
        element.set_volume(volume_to_unit(self.state.volume));

        self.state.phase = Phase::Loading;
        self.state.connected = false;
        self.state.last_error = None;

        let format = StreamFormat::detect(&self.stream_url);
        let strategy = PlaybackStrategy::select(
            format,
            self.backend.segmented_engine_supported(),
            element.supports_native_segmented(),
        );

        info!(
            url = %self.stream_url,
            ?format,
            ?strategy,
            generation = self.generation,
            "Loading stream"
        );

        match strategy {
            PlaybackStrategy::SegmentedEngine => {
                let mut engine = self.backend.create_segmented_engine(events);
                engine.load_source(&self.stream_url);
                engine.attach_media(element.as_mut());
                self.engine = Some(engine);
            }
            PlaybackStrategy::NativeSegmented | PlaybackStrategy::Progressive => {
                element.set_source(MediaSource::Url(self.stream_url.clone()));
                element.play();
            }
        }

        self.element = Some(element);
        StartPath::Loaded(strategy)
    }

    /// Pause without destroying the engine, so that `start()` can resume.
    pub fn stop(&mut self) {
        let Some(element) = self.element.as_mut() else {
            return;
        };
        element.pause();

        if matches!(
            self.state.phase,
            Phase::Loading | Phase::Ready | Phase::Playing | Phase::Paused
        ) {
            debug!(url = %self.stream_url, "Stream paused");
            self.state.phase = Phase::Paused;
        }
    }

    /// Clamp to 0..=100 and apply immediately. Returns the stored volume.
    pub fn set_volume(&mut self, volume: i32) -> u8 {
        let volume = clamp_volume(volume);
        self.state.volume = volume;
        if let Some(element) = self.element.as_mut() {
            element.set_volume(volume_to_unit(volume));
        }
        volume
    }

    /// Release every resource. Events already in flight become stale.
    pub fn teardown(&mut self) {
        if self.element.is_some() || self.engine.is_some() {
            debug!(url = %self.stream_url, "Tearing down stream transport");
        }
        self.release_resources();
        self.generation += 1;
        self.state.phase = Phase::Idle;
        self.state.connected = false;
        self.state.last_error = None;
    }

    fn release_resources(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.destroy();
        }
        if let Some(mut element) = self.element.take() {
            element.release();
        }
    }

    fn fail(&mut self, error: TransportError) {
        warn!(url = %self.stream_url, error = %error, "Playback failed");
        self.state.phase = Phase::Errored;
        self.state.connected = false;
        self.state.last_error = Some(error);
    }

    /// Apply one resource event. Returns true when the state changed.
    pub fn handle_event(&mut self, event: MediaEvent) -> bool {
        if event.generation != self.generation || self.element.is_none() {
            trace!(
                event_generation = event.generation,
                current = self.generation,
                "Ignoring stale media event"
            );
            return false;
        }

        let before = self.state.clone();

        match event.kind {
            MediaEventKind::LoadStart => {
                if self.state.phase == Phase::Idle {
                    self.state.phase = Phase::Loading;
                }
            }
            MediaEventKind::CanPlay => {
                if self.state.phase != Phase::Errored {
                    self.state.connected = true;
                    if self.state.phase == Phase::Loading {
                        self.state.phase = Phase::Ready;
                    }
                }
            }
            MediaEventKind::Playing => {
                self.state.phase = Phase::Playing;
                self.state.connected = true;
                self.state.last_error = None;
            }
            MediaEventKind::Pause => {
                if matches!(
                    self.state.phase,
                    Phase::Loading | Phase::Ready | Phase::Playing
                ) {
                    self.state.phase = Phase::Paused;
                }
            }
            MediaEventKind::Waiting => {
                debug!(url = %self.stream_url, "Stream buffering");
            }
            MediaEventKind::Ended => {
                info!(url = %self.stream_url, "Stream ended");
                if self.state.phase != Phase::Errored {
                    self.state.phase = Phase::Idle;
                    self.state.connected = false;
                }
            }
            MediaEventKind::Error(code) => {
                self.fail(TransportError::from_media_code(code));
            }
            MediaEventKind::ManifestParsed { variants } => {
                debug!(url = %self.stream_url, variants, "Manifest parsed");
                if matches!(self.state.phase, Phase::Loading | Phase::Ready) {
                    if let Some(element) = self.element.as_mut() {
                        element.play();
                    }
                }
            }
            MediaEventKind::EngineError { fatal: true, details } => {
                self.fail(TransportError::segmented_fatal(&details));
            }
            MediaEventKind::EngineError {
                fatal: false,
                details,
            } => {
                warn!(url = %self.stream_url, details = %details, "Recoverable segmented stream error");
            }
        }

        self.state != before
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.release_resources();
    }
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("stream_url", &self.stream_url)
            .field("generation", &self.generation)
            .field("has_element", &self.element.is_some())
            .field("has_engine", &self.engine.is_some())
            .field("state", &self.state)
            .finish()
    }
}

fn volume_to_unit(volume: u8) -> f32 {
    f32::from(volume) / f32::from(MAX_VOLUME)
}
