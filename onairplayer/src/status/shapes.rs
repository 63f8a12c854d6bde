//! Upstream status document shapes
//!
//! Status endpoints come in several flavours. Each flavour has its own typed
//! model and one pure mapping into [`NowPlayingSnapshot`]. Detection tries the
//! shapes in a fixed order and the first match wins:
//!
//! 1. array whose first element has `now_playing` and `station`
//! 2. object with `now_playing` and `station`
//! 3. array of legacy mount records with `now_playing.song` and `listeners`
//! 4. object with `icestats.source` (object, or array: first element)
//! 5. object with `title` or `artist`
//!
//! Anything else is not a status document.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{trace, warn};

use crate::models::{NowPlayingSnapshot, PlayedSong, Song, UpcomingSong};

/// Which detection rule matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    StationStatusList,
    StationStatus,
    LegacyMounts,
    Icecast,
    Flat,
}

impl ShapeKind {
    /// Run the ordered predicates. Pure, no decoding.
    pub fn detect(value: &Value) -> Option<Self> {
        let first = value.as_array().and_then(|items| items.first());

        if first.is_some_and(|item| has_keys(item, &["now_playing", "station"])) {
            return Some(ShapeKind::StationStatusList);
        }
        if has_keys(value, &["now_playing", "station"]) {
            return Some(ShapeKind::StationStatus);
        }
        if first.is_some_and(|item| {
            item.pointer("/now_playing/song").is_some() && item.get("listeners").is_some()
        }) {
            return Some(ShapeKind::LegacyMounts);
        }
        if value.pointer("/icestats/source").is_some() {
            return Some(ShapeKind::Icecast);
        }
        if value.is_object() && (value.get("title").is_some() || value.get("artist").is_some()) {
            return Some(ShapeKind::Flat);
        }
        None
    }
}

fn has_keys(value: &Value, keys: &[&str]) -> bool {
    value.is_object() && keys.iter().all(|key| value.get(*key).is_some())
}

/// A recognised and decoded status document
#[derive(Debug, Clone, PartialEq)]
pub enum StatusShape {
    /// Shapes 1 and 2
    StationStatus(StationStatus),
    /// Shape 3, first mount only
    LegacyMount(LegacyMount),
    /// Shape 4
    Icecast(IcecastSource),
    /// Shape 5
    Flat(FlatStatus),
}

impl StatusShape {
    /// Detect and decode. `None` when the document matches no shape or the
    /// matched shape does not decode.
    pub fn detect(value: &Value) -> Option<Self> {
        let kind = ShapeKind::detect(value)?;
        trace!(?kind, "Status shape detected");

        let decoded = match kind {
            ShapeKind::StationStatusList => {
                first_element(value).and_then(|v| decode(v).map(StatusShape::StationStatus))
            }
            ShapeKind::StationStatus => decode(value).map(StatusShape::StationStatus),
            ShapeKind::LegacyMounts => {
                first_element(value).and_then(|v| decode(v).map(StatusShape::LegacyMount))
            }
            ShapeKind::Icecast => value
                .pointer("/icestats/source")
                .and_then(|source| match source {
                    Value::Array(items) => items.first(),
                    other => Some(other),
                })
                .and_then(|v| decode(v).map(StatusShape::Icecast)),
            ShapeKind::Flat => decode(value).map(StatusShape::Flat),
        };

        if decoded.is_none() {
            warn!(?kind, "Status document matched a shape but did not decode");
        }
        decoded
    }

    /// Build a brand new snapshot. Nothing is carried over from earlier polls.
    pub fn into_snapshot(self) -> NowPlayingSnapshot {
        match self {
            StatusShape::StationStatus(status) => status.into_snapshot(),
            StatusShape::LegacyMount(mount) => mount.into_snapshot(),
            StatusShape::Icecast(source) => source.into_snapshot(),
            StatusShape::Flat(flat) => flat.into_snapshot(),
        }
    }
}

fn first_element(value: &Value) -> Option<&Value> {
    value.as_array().and_then(|items| items.first())
}

fn decode<T: for<'de> Deserialize<'de>>(value: &Value) -> Option<T> {
    match T::deserialize(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(error = %e, "Status document decoding failed");
            None
        }
    }
}

// ============================================================================
// Shared pieces
// ============================================================================

/// Song as most station-status endpoints publish it
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RemoteSong {
    pub text: Option<String>,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    #[serde(alias = "art_url", alias = "artwork")]
    pub art: Option<String>,
}

impl RemoteSong {
    fn into_song(self) -> Song {
        let mut title = non_empty(self.title);
        let mut artist = non_empty(self.artist);

        if title.is_none() && artist.is_none() {
            if let Some(text) = non_empty(self.text) {
                (artist, title) = split_stream_title(&text);
            }
        }

        Song {
            title,
            artist,
            album: non_empty(self.album),
            art_url: non_empty(self.art),
            genre: non_empty(self.genre),
        }
    }
}

/// Listener count: a bare number or a `{current, total, unique}` breakdown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Listeners(pub Option<u64>);

impl<'de> Deserialize<'de> for Listeners {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let count = match &value {
            Value::Object(map) => ["current", "total", "unique"]
                .iter()
                .find_map(|key| map.get(*key).and_then(value_to_u64)),
            other => value_to_u64(other),
        };
        Ok(Listeners(count))
    }
}

fn value_to_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Number that may arrive as a JSON number or a numeric string
fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(value_to_f64))
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?
        .as_ref()
        .and_then(value_to_f64)
        .map(|f| f as i64))
}

/// Boolean that may arrive as `true`, `1` or `"true"`
fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<bool>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => n.as_i64().map(|i| i != 0),
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Split an `"Artist - Title"` stream title
fn split_stream_title(text: &str) -> (Option<String>, Option<String>) {
    match text.split_once(" - ") {
        Some((artist, title)) => (
            non_empty(Some(artist.to_string())),
            non_empty(Some(title.to_string())),
        ),
        None => (None, non_empty(Some(text.to_string()))),
    }
}

// ============================================================================
// Shapes 1 and 2: station status
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StationStatus {
    pub station: StationInfo,
    pub now_playing: NowPlayingEntry,
    pub listeners: Listeners,
    pub live: LiveInfo,
    pub playing_next: Option<NextEntry>,
    pub song_history: Vec<HistoryEntry>,
    #[serde(deserialize_with = "lenient_bool")]
    pub is_online: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StationInfo {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NowPlayingEntry {
    pub song: RemoteSong,
    #[serde(deserialize_with = "lenient_f64")]
    pub elapsed: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LiveInfo {
    #[serde(deserialize_with = "lenient_bool")]
    pub is_live: Option<bool>,
    pub streamer_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct NextEntry {
    pub song: RemoteSong,
    #[serde(deserialize_with = "lenient_i64")]
    pub played_at: Option<i64>,
    #[serde(deserialize_with = "lenient_i64")]
    pub cued_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HistoryEntry {
    pub song: RemoteSong,
    #[serde(deserialize_with = "lenient_i64")]
    pub played_at: Option<i64>,
}

impl HistoryEntry {
    fn into_played(self) -> PlayedSong {
        PlayedSong {
            song: self.song.into_song(),
            played_at: self.played_at,
        }
    }
}

impl StationStatus {
    pub fn into_snapshot(self) -> NowPlayingSnapshot {
        let is_live_dj = self.live.is_live.unwrap_or(false);
        NowPlayingSnapshot {
            station_name: non_empty(self.station.name),
            song: self.now_playing.song.into_song(),
            elapsed_seconds: self.now_playing.elapsed,
            duration_seconds: self.now_playing.duration,
            upcoming: self.playing_next.map(|next| UpcomingSong {
                song: next.song.into_song(),
                scheduled_start: next.played_at.or(next.cued_at),
            }),
            history: self
                .song_history
                .into_iter()
                .map(HistoryEntry::into_played)
                .collect(),
            listener_count: self.listeners.0,
            is_live_dj,
            live_dj_name: if is_live_dj {
                non_empty(self.live.streamer_name)
            } else {
                None
            },
            station_online: self.is_online.unwrap_or(true),
        }
    }
}

// ============================================================================
// Shape 3: legacy mount records
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LegacyMount {
    #[serde(alias = "station_name")]
    pub name: Option<String>,
    pub now_playing: NowPlayingEntry,
    pub listeners: Listeners,
    pub song_history: Vec<HistoryEntry>,
    #[serde(deserialize_with = "lenient_bool")]
    pub is_online: Option<bool>,
}

impl LegacyMount {
    pub fn into_snapshot(self) -> NowPlayingSnapshot {
        NowPlayingSnapshot {
            station_name: non_empty(self.name),
            song: self.now_playing.song.into_song(),
            elapsed_seconds: self.now_playing.elapsed,
            duration_seconds: self.now_playing.duration,
            upcoming: None,
            history: self
                .song_history
                .into_iter()
                .map(HistoryEntry::into_played)
                .collect(),
            listener_count: self.listeners.0,
            is_live_dj: false,
            live_dj_name: None,
            station_online: self.is_online.unwrap_or(true),
        }
    }
}

// ============================================================================
// Shape 4: Icecast
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct IcecastSource {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub server_name: Option<String>,
    pub genre: Option<String>,
    pub listeners: Listeners,
}

impl IcecastSource {
    pub fn into_snapshot(self) -> NowPlayingSnapshot {
        let (artist, title) = match (non_empty(self.artist), non_empty(self.title)) {
            (None, Some(title)) => split_stream_title(&title),
            (artist, title) => (artist, title),
        };

        NowPlayingSnapshot {
            station_name: non_empty(self.server_name),
            song: Song {
                title,
                artist,
                genre: non_empty(self.genre),
                ..Default::default()
            },
            listener_count: self.listeners.0,
            station_online: true,
            ..Default::default()
        }
    }
}

// ============================================================================
// Shape 5: flat
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FlatStatus {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    #[serde(alias = "art_url", alias = "artwork", alias = "cover")]
    pub art: Option<String>,
    #[serde(alias = "station", alias = "station_name")]
    pub name: Option<String>,
    pub listeners: Listeners,
    #[serde(deserialize_with = "lenient_f64")]
    pub elapsed: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    pub duration: Option<f64>,
    #[serde(alias = "live", deserialize_with = "lenient_bool")]
    pub is_live: Option<bool>,
    #[serde(alias = "streamer_name", alias = "dj_name")]
    pub dj: Option<String>,
    #[serde(alias = "online", deserialize_with = "lenient_bool")]
    pub is_online: Option<bool>,
}

impl FlatStatus {
    pub fn into_snapshot(self) -> NowPlayingSnapshot {
        let is_live_dj = self.is_live.unwrap_or(false);
        NowPlayingSnapshot {
            station_name: non_empty(self.name),
            song: Song {
                title: non_empty(self.title),
                artist: non_empty(self.artist),
                album: non_empty(self.album),
                art_url: non_empty(self.art),
                genre: non_empty(self.genre),
            },
            elapsed_seconds: self.elapsed,
            duration_seconds: self.duration,
            listener_count: self.listeners.0,
            is_live_dj,
            live_dj_name: if is_live_dj { non_empty(self.dj) } else { None },
            station_online: self.is_online.unwrap_or(true),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(value: Value) -> NowPlayingSnapshot {
        StatusShape::detect(&value)
            .expect("recognised shape")
            .into_snapshot()
    }

    fn station_status() -> Value {
        json!({
            "station": { "name": "Test FM" },
            "listeners": { "total": 50, "unique": 30, "current": 42 },
            "live": { "is_live": false, "streamer_name": "" },
            "now_playing": {
                "elapsed": 61,
                "duration": 240,
                "song": {
                    "text": "Artist A - Track A",
                    "artist": "Artist A",
                    "title": "Track A",
                    "album": "Album A",
                    "genre": "Jazz",
                    "art": "https://radio.example/art/a.jpg"
                }
            },
            "playing_next": {
                "cued_at": 1700000100,
                "song": { "artist": "Artist B", "title": "Track B" }
            },
            "song_history": [
                { "played_at": 1700000000, "song": { "artist": "Artist Z", "title": "Track Z" } },
                { "played_at": 1699999700, "song": { "artist": "Artist Y", "title": "Track Y" } }
            ],
            "is_online": true
        })
    }

    #[test]
    fn test_detection_order() {
        assert_eq!(
            ShapeKind::detect(&json!([{ "now_playing": {}, "station": {} }])),
            Some(ShapeKind::StationStatusList)
        );
        assert_eq!(
            ShapeKind::detect(&json!({ "now_playing": {}, "station": {} })),
            Some(ShapeKind::StationStatus)
        );
        assert_eq!(
            ShapeKind::detect(&json!([{ "now_playing": { "song": {} }, "listeners": 3 }])),
            Some(ShapeKind::LegacyMounts)
        );
        assert_eq!(
            ShapeKind::detect(&json!({ "icestats": { "source": [] } })),
            Some(ShapeKind::Icecast)
        );
        assert_eq!(
            ShapeKind::detect(&json!({ "artist": "Someone" })),
            Some(ShapeKind::Flat)
        );
    }

    #[test]
    fn test_first_match_wins() {
        // Carries station-status keys and a flat title: rule 2 wins over rule 5
        let value = json!({ "now_playing": {}, "station": {}, "title": "Flat" });
        assert_eq!(ShapeKind::detect(&value), Some(ShapeKind::StationStatus));

        // Carries mounts keys and station: rule 1 wins over rule 3
        let value = json!([{ "now_playing": { "song": {} }, "listeners": 1, "station": {} }]);
        assert_eq!(ShapeKind::detect(&value), Some(ShapeKind::StationStatusList));
    }

    #[test]
    fn test_unrecognised_documents() {
        for value in [
            json!(null),
            json!([]),
            json!({}),
            json!({ "status": "ok" }),
            json!([{ "listeners": 3 }]),
            json!("title"),
        ] {
            assert!(StatusShape::detect(&value).is_none(), "{}", value);
        }
    }

    #[test]
    fn test_station_status_mapping() {
        let snap = snapshot(station_status());
        assert_eq!(snap.station_name.as_deref(), Some("Test FM"));
        assert_eq!(snap.song.title.as_deref(), Some("Track A"));
        assert_eq!(snap.song.artist.as_deref(), Some("Artist A"));
        assert_eq!(snap.song.album.as_deref(), Some("Album A"));
        assert_eq!(snap.song.genre.as_deref(), Some("Jazz"));
        assert_eq!(
            snap.song.art_url.as_deref(),
            Some("https://radio.example/art/a.jpg")
        );
        assert_eq!(snap.elapsed_seconds, Some(61.0));
        assert_eq!(snap.duration_seconds, Some(240.0));
        assert_eq!(snap.listener_count, Some(42));
        assert!(!snap.is_live_dj);
        assert_eq!(snap.live_dj_name, None);
        assert!(snap.station_online);

        let next = snap.upcoming.expect("upcoming song");
        assert_eq!(next.song.title.as_deref(), Some("Track B"));
        assert_eq!(next.scheduled_start, Some(1700000100));

        assert_eq!(snap.history.len(), 2);
        assert_eq!(snap.history[0].song.title.as_deref(), Some("Track Z"));
        assert_eq!(snap.history[0].played_at, Some(1700000000));
    }

    #[test]
    fn test_wrapped_station_status() {
        let wrapped = Value::Array(vec![station_status(), json!({ "station": {} })]);
        assert_eq!(snapshot(wrapped), snapshot(station_status()));
    }

    #[test]
    fn test_live_dj_scenario() {
        let snap = snapshot(json!({
            "now_playing": { "song": { "title": "Track A", "artist": "Artist A" } },
            "station": { "name": "Test" },
            "listeners": { "current": 42 },
            "live": { "is_live": true, "streamer_name": "DJ X" }
        }));
        assert_eq!(snap.song.title.as_deref(), Some("Track A"));
        assert_eq!(snap.song.artist.as_deref(), Some("Artist A"));
        assert_eq!(snap.listener_count, Some(42));
        assert!(snap.is_live_dj);
        assert_eq!(snap.live_dj_name.as_deref(), Some("DJ X"));
    }

    #[test]
    fn test_legacy_mount_replaces_everything() {
        let first = snapshot(station_status());
        let second = snapshot(json!([
            { "now_playing": { "song": { "text": "Legacy Artist - Legacy Song" } }, "listeners": 7 },
            { "now_playing": { "song": { "title": "Other mount" } }, "listeners": 1 }
        ]));

        assert_ne!(first, second);
        assert_eq!(second.song.title.as_deref(), Some("Legacy Song"));
        assert_eq!(second.song.artist.as_deref(), Some("Legacy Artist"));
        assert_eq!(second.listener_count, Some(7));
        // Nothing from the station-status snapshot survives
        assert_eq!(second.station_name, None);
        assert_eq!(second.song.album, None);
        assert_eq!(second.upcoming, None);
        assert!(second.history.is_empty());
        assert_eq!(second.elapsed_seconds, None);
    }

    #[test]
    fn test_icecast_single_source() {
        let snap = snapshot(json!({
            "icestats": {
                "source": {
                    "server_name": "Icy Radio",
                    "title": "Boards of Canada - Roygbiv",
                    "genre": "Electronic",
                    "listeners": 12
                }
            }
        }));
        assert_eq!(snap.station_name.as_deref(), Some("Icy Radio"));
        assert_eq!(snap.song.artist.as_deref(), Some("Boards of Canada"));
        assert_eq!(snap.song.title.as_deref(), Some("Roygbiv"));
        assert_eq!(snap.listener_count, Some(12));
        assert!(snap.station_online);
    }

    #[test]
    fn test_icecast_source_list_takes_first() {
        let snap = snapshot(json!({
            "icestats": {
                "source": [
                    { "title": "First", "artist": "Main", "listeners": "5" },
                    { "title": "Second", "listeners": 99 }
                ]
            }
        }));
        assert_eq!(snap.song.title.as_deref(), Some("First"));
        assert_eq!(snap.song.artist.as_deref(), Some("Main"));
        assert_eq!(snap.listener_count, Some(5));
    }

    #[test]
    fn test_icecast_empty_source_list() {
        assert!(StatusShape::detect(&json!({ "icestats": { "source": [] } })).is_none());
    }

    #[test]
    fn test_flat_shape() {
        let snap = snapshot(json!({
            "title": "Night Drive",
            "artist": "Synth Crew",
            "listeners": { "total": 8 },
            "live": "true",
            "dj": "Nova",
            "online": false
        }));
        assert_eq!(snap.song.title.as_deref(), Some("Night Drive"));
        assert_eq!(snap.song.artist.as_deref(), Some("Synth Crew"));
        assert_eq!(snap.listener_count, Some(8));
        assert!(snap.is_live_dj);
        assert_eq!(snap.live_dj_name.as_deref(), Some("Nova"));
        assert!(!snap.station_online);
    }

    #[test]
    fn test_listeners_preference() {
        let parse = |v: Value| serde_json::from_value::<Listeners>(v).unwrap().0;
        assert_eq!(parse(json!(17)), Some(17));
        assert_eq!(parse(json!({ "current": 3, "total": 9, "unique": 5 })), Some(3));
        assert_eq!(parse(json!({ "total": 9, "unique": 5 })), Some(9));
        assert_eq!(parse(json!({ "unique": 5 })), Some(5));
        assert_eq!(parse(json!({})), None);
        assert_eq!(parse(json!(null)), None);
    }

    #[test]
    fn test_empty_strings_become_missing() {
        let snap = snapshot(json!({ "title": "  ", "artist": "Solo" }));
        assert_eq!(snap.song.title, None);
        assert_eq!(snap.song.artist.as_deref(), Some("Solo"));
    }
}
