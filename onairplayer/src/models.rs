//! Data models shared by the transport, the status poller and the store
//!
//! Everything here is a plain value. The transport owns the live
//! [`PlaybackState`], the poller owns the [`NowPlayingSnapshot`], and the
//! store publishes their merge as a [`PlayerView`].

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Default volume when nothing is configured
pub const DEFAULT_VOLUME: u8 = 80;

/// Maximum volume
pub const MAX_VOLUME: u8 = 100;

// ============================================================================
// Endpoint
// ============================================================================

/// Where the audio and the status document live
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEndpoint {
    /// Audio stream URL (progressive audio or segmented manifest)
    pub stream_url: String,
    /// Now-playing JSON status URL
    pub status_url: String,
}

impl StreamEndpoint {
    pub fn new(stream_url: impl Into<String>, status_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
            status_url: status_url.into(),
        }
    }
}

// ============================================================================
// Playback
// ============================================================================

/// Discrete playback lifecycle state of the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Loading,
    Ready,
    Playing,
    Paused,
    Errored,
}

/// Playback state mirrored from the transport
///
/// Invariants: `Playing` implies `connected`, `Errored` implies `!connected`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub phase: Phase,
    /// Volume in 0..=100
    pub volume: u8,
    /// True once the resource has buffered at least once
    pub connected: bool,
    pub last_error: Option<TransportError>,
}

impl PlaybackState {
    pub fn new(volume: i32) -> Self {
        Self {
            phase: Phase::Idle,
            volume: clamp_volume(volume),
            connected: false,
            last_error: None,
        }
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::new(DEFAULT_VOLUME as i32)
    }
}

/// Clamp any integer into the 0..=100 volume range
pub fn clamp_volume(volume: i32) -> u8 {
    volume.clamp(0, MAX_VOLUME as i32) as u8
}

// ============================================================================
// Now playing
// ============================================================================

/// Song metadata. Missing fields stay `None`; surfaces pick display defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub art_url: Option<String>,
    pub genre: Option<String>,
}

impl Song {
    /// "Artist - Title" when both are known, whichever exists otherwise
    pub fn display_line(&self) -> Option<String> {
        match (self.artist.as_deref(), self.title.as_deref()) {
            (Some(artist), Some(title)) => Some(format!("{} - {}", artist, title)),
            (Some(only), None) | (None, Some(only)) => Some(only.to_string()),
            (None, None) => None,
        }
    }
}

/// Next song preview
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpcomingSong {
    pub song: Song,
    /// Scheduled start, Unix epoch seconds
    pub scheduled_start: Option<i64>,
}

/// Previously played song
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayedSong {
    pub song: Song,
    /// Unix epoch seconds
    pub played_at: Option<i64>,
}

/// Current view of what is airing, replaced wholesale on every successful poll
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NowPlayingSnapshot {
    pub station_name: Option<String>,
    pub song: Song,
    pub elapsed_seconds: Option<f64>,
    pub duration_seconds: Option<f64>,
    pub upcoming: Option<UpcomingSong>,
    /// Newest first, as returned upstream
    pub history: Vec<PlayedSong>,
    pub listener_count: Option<u64>,
    pub is_live_dj: bool,
    pub live_dj_name: Option<String>,
    pub station_online: bool,
}

impl NowPlayingSnapshot {
    /// Progress in 0.0..=1.0 when both elapsed and duration are known
    pub fn progress(&self) -> Option<f64> {
        match (self.elapsed_seconds, self.duration_seconds) {
            (Some(elapsed), Some(duration)) if duration > 0.0 => {
                Some((elapsed / duration).clamp(0.0, 1.0))
            }
            _ => None,
        }
    }
}

// ============================================================================
// View
// ============================================================================

/// UI flags owned by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiFlags {
    pub minimized: bool,
    pub visible: bool,
}

impl Default for UiFlags {
    fn default() -> Self {
        Self {
            minimized: false,
            visible: true,
        }
    }
}

/// Read model consumed by every player surface
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub playback: PlaybackState,
    /// `None` until the first successful poll
    pub now_playing: Option<NowPlayingSnapshot>,
    pub minimized: bool,
    pub visible: bool,
}

impl PlayerView {
    pub fn compose(
        playback: PlaybackState,
        now_playing: Option<NowPlayingSnapshot>,
        ui: UiFlags,
    ) -> Self {
        Self {
            playback,
            now_playing,
            minimized: ui.minimized,
            visible: ui.visible,
        }
    }

    pub fn phase(&self) -> Phase {
        self.playback.phase
    }

    pub fn is_playing(&self) -> bool {
        self.playback.phase == Phase::Playing
    }

    pub fn is_loading(&self) -> bool {
        self.playback.phase == Phase::Loading
    }

    pub fn volume(&self) -> u8 {
        self.playback.volume
    }

    pub fn error_message(&self) -> Option<&str> {
        self.playback.last_error.as_ref().map(|e| e.message.as_str())
    }

    pub fn song(&self) -> Option<&Song> {
        self.now_playing.as_ref().map(|np| &np.song)
    }

    pub fn title(&self) -> Option<&str> {
        self.song().and_then(|s| s.title.as_deref())
    }

    pub fn artist(&self) -> Option<&str> {
        self.song().and_then(|s| s.artist.as_deref())
    }

    pub fn listener_count(&self) -> Option<u64> {
        self.now_playing.as_ref().and_then(|np| np.listener_count)
    }

    pub fn is_live_dj(&self) -> bool {
        self.now_playing.as_ref().is_some_and(|np| np.is_live_dj)
    }

    pub fn live_dj_name(&self) -> Option<&str> {
        self.now_playing
            .as_ref()
            .and_then(|np| np.live_dj_name.as_deref())
    }
}
