//! Recording media backend used by the unit tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::media::{
    EventSender, MediaBackend, MediaElement, MediaEventKind, MediaOutput, MediaSource, NullSink,
    SegmentedEngine,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    SetSource(MediaSource),
    Play,
    Pause,
    SetVolume(f32),
    Release,
    LoadSource(String),
    AttachMedia,
    Destroy,
}

#[derive(Default)]
pub(crate) struct Recorder {
    calls: Mutex<Vec<Call>>,
    elements: AtomicUsize,
    engines: AtomicUsize,
    senders: Mutex<Vec<EventSender>>,
}

impl Recorder {
    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub(crate) fn elements_created(&self) -> usize {
        self.elements.load(Ordering::SeqCst)
    }

    pub(crate) fn engines_created(&self) -> usize {
        self.engines.load(Ordering::SeqCst)
    }

    /// Emit an event as the most recently created resource
    pub(crate) fn emit(&self, kind: MediaEventKind) {
        let sender = self
            .senders
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no resource created yet");
        sender.emit(kind);
    }
}

pub(crate) struct MockBackend {
    pub(crate) recorder: Arc<Recorder>,
    engine_supported: bool,
    native_segmented: bool,
}

impl MockBackend {
    fn build(engine_supported: bool, native_segmented: bool) -> Arc<Self> {
        Arc::new(Self {
            recorder: Arc::new(Recorder::default()),
            engine_supported,
            native_segmented,
        })
    }

    pub(crate) fn with_engine() -> Arc<Self> {
        Self::build(true, false)
    }

    pub(crate) fn without_engine() -> Arc<Self> {
        Self::build(false, false)
    }

    pub(crate) fn native_only() -> Arc<Self> {
        Self::build(false, true)
    }
}

impl MediaBackend for MockBackend {
    fn create_element(&self, events: EventSender) -> Box<dyn MediaElement> {
        self.recorder.elements.fetch_add(1, Ordering::SeqCst);
        self.recorder.senders.lock().unwrap().push(events);
        Box::new(MockElement {
            recorder: self.recorder.clone(),
            source: None,
            native_segmented: self.native_segmented,
            output: Arc::new(MediaOutput::new(Arc::new(NullSink))),
        })
    }

    fn segmented_engine_supported(&self) -> bool {
        self.engine_supported
    }

    fn create_segmented_engine(&self, _events: EventSender) -> Box<dyn SegmentedEngine> {
        self.recorder.engines.fetch_add(1, Ordering::SeqCst);
        Box::new(MockEngine {
            recorder: self.recorder.clone(),
            destroyed: false,
        })
    }
}

struct MockElement {
    recorder: Arc<Recorder>,
    source: Option<MediaSource>,
    native_segmented: bool,
    output: Arc<MediaOutput>,
}

impl MediaElement for MockElement {
    fn set_source(&mut self, source: MediaSource) {
        self.recorder.record(Call::SetSource(source.clone()));
        self.source = Some(source);
    }

    fn has_source(&self) -> bool {
        self.source.is_some()
    }

    fn play(&mut self) {
        self.recorder.record(Call::Play);
    }

    fn pause(&mut self) {
        self.recorder.record(Call::Pause);
    }

    fn set_volume(&mut self, volume: f32) {
        self.recorder.record(Call::SetVolume(volume));
    }

    fn supports_native_segmented(&self) -> bool {
        self.native_segmented
    }

    fn output(&self) -> Arc<MediaOutput> {
        self.output.clone()
    }

    fn release(&mut self) {
        if self.source.take().is_some() {
            self.recorder.record(Call::Release);
        }
    }
}

struct MockEngine {
    recorder: Arc<Recorder>,
    destroyed: bool,
}

impl SegmentedEngine for MockEngine {
    fn load_source(&mut self, url: &str) {
        self.recorder.record(Call::LoadSource(url.to_string()));
    }

    fn attach_media(&mut self, element: &mut dyn MediaElement) {
        self.recorder.record(Call::AttachMedia);
        element.set_source(MediaSource::Engine);
    }

    fn destroy(&mut self) {
        if !self.destroyed {
            self.destroyed = true;
            self.recorder.record(Call::Destroy);
        }
    }
}
