//! Seams between the transport and the audio runtime
//!
//! The transport never touches sockets or decoders directly. It drives a
//! [`MediaElement`] (one audio resource) and, for segmented streams, a
//! [`SegmentedEngine`] attached to that element. Both are created by a
//! [`MediaBackend`], which is what gets injected into the player store.
//!
//! Outcomes are never returned from `play()`/`pause()`: they come back later
//! as [`MediaEvent`]s on the channel handed out at creation time.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

/// Kind of lifecycle event reported by an element or an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEventKind {
    /// A source was assigned and loading began
    LoadStart,
    /// Enough data is buffered to start
    CanPlay,
    /// Audio is flowing
    Playing,
    /// The element paused
    Pause,
    /// Playback stalled waiting for data
    Waiting,
    /// The source ran out
    Ended,
    /// The element failed with a media error code
    Error(u16),
    /// The engine parsed the manifest
    ManifestParsed { variants: usize },
    /// The engine reported an error
    EngineError { fatal: bool, details: String },
}

/// Event tagged with the generation of the resource that emitted it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEvent {
    pub generation: u64,
    pub kind: MediaEventKind,
}

/// Sending half given to elements and engines
///
/// Every resource built by the transport gets its own generation, so events
/// emitted by a released resource can be told apart and ignored.
#[derive(Debug, Clone)]
pub struct EventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<MediaEvent>,
}

impl EventSender {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<MediaEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Emit an event. Returns false when nobody listens anymore.
    pub fn emit(&self, kind: MediaEventKind) -> bool {
        self.tx
            .send(MediaEvent {
                generation: self.generation,
                kind,
            })
            .is_ok()
    }
}

/// Receiving half drained by the store
pub type EventReceiver = mpsc::UnboundedReceiver<MediaEvent>;

/// Create an event channel
pub fn event_channel() -> (mpsc::UnboundedSender<MediaEvent>, EventReceiver) {
    mpsc::unbounded_channel()
}

// ============================================================================
// Output
// ============================================================================

/// Destination of the audio bytes
pub trait AudioSink: Send + Sync {
    /// Consume one chunk of encoded audio. `volume` is in 0.0..=1.0.
    fn write(&self, chunk: &[u8], volume: f32);
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn write(&self, _chunk: &[u8], _volume: f32) {}
}

/// Output shared between an element and the engine attached to it
pub struct MediaOutput {
    paused: AtomicBool,
    volume_bits: AtomicU32,
    bytes_written: AtomicU64,
    sink: Arc<dyn AudioSink>,
}

impl MediaOutput {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            paused: AtomicBool::new(true),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            bytes_written: AtomicU64::new(0),
            sink,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    /// Forward a chunk to the sink unless paused. Returns false when dropped.
    pub fn write(&self, chunk: &[u8]) -> bool {
        if self.is_paused() {
            return false;
        }
        self.sink.write(chunk, self.volume());
        self.bytes_written
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        true
    }
}

impl std::fmt::Debug for MediaOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaOutput")
            .field("paused", &self.is_paused())
            .field("volume", &self.volume())
            .field("bytes_written", &self.bytes_written())
            .finish()
    }
}

// ============================================================================
// Runtime seams
// ============================================================================

/// What an element is currently playing from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// A URL the element fetches itself
    Url(String),
    /// Data pushed by an attached segmented engine
    Engine,
}

/// One underlying audio resource
pub trait MediaElement: Send {
    /// Assign a source. Emits `LoadStart`.
    fn set_source(&mut self, source: MediaSource);

    fn has_source(&self) -> bool;

    /// Start or resume. Fire-and-forget: outcome arrives as events.
    fn play(&mut self);

    /// Pause, keeping the source assigned.
    fn pause(&mut self);

    /// Volume in 0.0..=1.0
    fn set_volume(&mut self, volume: f32);

    /// Whether the element can play segmented manifests on its own
    fn supports_native_segmented(&self) -> bool;

    /// Output an attached engine writes into
    fn output(&self) -> Arc<MediaOutput>;

    /// Stop everything and forget the source. Must be idempotent.
    fn release(&mut self);
}

/// Adaptive segmented-streaming engine
pub trait SegmentedEngine: Send {
    /// Start fetching the manifest. `ManifestParsed` follows on success.
    fn load_source(&mut self, url: &str);

    /// Bind the engine to the element it feeds.
    fn attach_media(&mut self, element: &mut dyn MediaElement);

    /// Stop all background work. Must be idempotent.
    fn destroy(&mut self);
}

/// Factory for audio resources, injected into the store
pub trait MediaBackend: Send + Sync {
    fn create_element(&self, events: EventSender) -> Box<dyn MediaElement>;

    /// Whether a segmented engine can run in this runtime
    fn segmented_engine_supported(&self) -> bool;

    fn create_segmented_engine(&self, events: EventSender) -> Box<dyn SegmentedEngine>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSink(AtomicU64);

    impl AudioSink for CountingSink {
        fn write(&self, chunk: &[u8], _volume: f32) {
            self.0.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_output_drops_while_paused() {
        let sink = Arc::new(CountingSink(AtomicU64::new(0)));
        let output = MediaOutput::new(sink.clone());

        assert!(output.is_paused());
        assert!(!output.write(b"abcd"));
        assert_eq!(sink.0.load(Ordering::Relaxed), 0);

        output.set_paused(false);
        assert!(output.write(b"abcd"));
        assert_eq!(output.bytes_written(), 4);
        assert_eq!(sink.0.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn test_output_volume_is_clamped() {
        let output = MediaOutput::new(Arc::new(NullSink));
        output.set_volume(1.7);
        assert_eq!(output.volume(), 1.0);
        output.set_volume(0.25);
        assert_eq!(output.volume(), 0.25);
    }

    #[test]
    fn test_event_sender_tags_generation() {
        let (tx, mut rx) = event_channel();
        let sender = EventSender::new(7, tx);
        assert!(sender.emit(MediaEventKind::CanPlay));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.generation, 7);
        assert_eq!(event.kind, MediaEventKind::CanPlay);

        drop(rx);
        assert!(!sender.emit(MediaEventKind::Playing));
    }
}
