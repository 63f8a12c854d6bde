//! HLS playlist reading on top of `hls_m3u8`
//!
//! Parsing is delegated to the crate; this module resolves URIs against the
//! playlist location and keeps only what a live audio player needs: variant
//! streams with their bandwidth, and segments, media sequence, target
//! duration and end marker.

use std::borrow::Cow;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};

const EXTM3U: &str = "#EXTM3U";
const STREAM_INF: &str = "#EXT-X-STREAM-INF:";
const TARGET_DURATION: &str = "#EXT-X-TARGETDURATION:";
const EXTINF: &str = "#EXTINF:";

/// Fallback when a media playlist omits its target duration and lists no segment
const DEFAULT_TARGET_DURATION: Duration = Duration::from_secs(6);

/// One rendition listed in a master playlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variant {
    pub uri: Url,
    /// Peak bits per second
    pub bandwidth: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: Url,
    pub duration: Duration,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub target_duration: Duration,
    pub media_sequence: u64,
    pub segments: Vec<Segment>,
    pub ended: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Playlist {
    /// Variants sorted by ascending bandwidth
    Master(Vec<Variant>),
    Media(MediaPlaylist),
}

impl Playlist {
    /// Parse a playlist fetched from `base`. Relative URIs are resolved against it.
    pub fn parse(text: &str, base: &Url) -> Result<Self> {
        let text = text.trim_start();
        if !text.starts_with(EXTM3U) {
            return Err(Error::playlist("missing #EXTM3U header"));
        }

        if text.lines().any(|l| l.trim_start().starts_with(STREAM_INF)) {
            Self::parse_master(text, base).map(Playlist::Master)
        } else {
            Self::parse_media(text, base).map(Playlist::Media)
        }
    }

    fn parse_master(text: &str, base: &Url) -> Result<Vec<Variant>> {
        let master = hls_m3u8::MasterPlaylist::try_from(text)
            .map_err(|e| Error::playlist(format!("master playlist: {}", e)))?;

        let mut variants = master
            .variant_streams
            .iter()
            .filter_map(|stream| match stream {
                hls_m3u8::tags::VariantStream::ExtXStreamInf { uri, .. } => {
                    Some((uri, stream.bandwidth()))
                }
                // I-frame renditions carry no audio
                hls_m3u8::tags::VariantStream::ExtXIFrame { .. } => None,
            })
            .map(|(uri, bandwidth)| {
                Ok(Variant {
                    uri: base.join(uri)?,
                    bandwidth,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if variants.is_empty() {
            return Err(Error::playlist("master playlist lists no variant"));
        }
        variants.sort_by_key(|v| v.bandwidth);
        Ok(variants)
    }

    fn parse_media(text: &str, base: &Url) -> Result<MediaPlaylist> {
        let longest = longest_segment(text)?;

        // `hls_m3u8` requires a target duration
        let text: Cow<'_, str> = if text.contains(TARGET_DURATION) {
            Cow::Borrowed(text)
        } else {
            let target = longest
                .map(|d| d.as_secs_f64().ceil().max(1.0) as u64)
                .unwrap_or(DEFAULT_TARGET_DURATION.as_secs());
            let (header, rest) = text.split_once('\n').unwrap_or((text, ""));
            Cow::Owned(format!("{}\n{}{}\n{}", header.trim_end(), TARGET_DURATION, target, rest))
        };

        let media = hls_m3u8::MediaPlaylist::try_from(text.as_ref())
            .map_err(|e| Error::playlist(format!("media playlist: {}", e)))?;

        let media_sequence = media.media_sequence as u64;
        let segments = media
            .segments
            .values()
            .enumerate()
            .map(|(index, segment)| {
                Ok(Segment {
                    uri: base.join(segment.uri())?,
                    duration: segment.duration.duration(),
                    sequence: media_sequence + index as u64,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(MediaPlaylist {
            target_duration: media.target_duration.max(Duration::from_secs(1)),
            media_sequence,
            segments,
            ended: media.has_end_list,
        })
    }
}

/// Validate every `#EXTINF` duration and return the longest one.
///
/// Values that do not fit a `Duration` (negative, infinite, NaN or
/// overflowing) are rejected here; unparsable ones are left to `hls_m3u8`.
fn longest_segment(text: &str) -> Result<Option<Duration>> {
    let mut longest: Option<Duration> = None;

    for line in text.lines() {
        let Some(value) = line.trim().strip_prefix(EXTINF) else {
            continue;
        };
        let raw = value.split(',').next().unwrap_or_default().trim();
        let Ok(secs) = raw.parse::<f64>() else {
            continue;
        };
        let duration = Duration::try_from_secs_f64(secs)
            .map_err(|_| Error::playlist(format!("bad segment duration: {}", raw)))?;
        longest = Some(longest.map_or(duration, |l| l.max(duration)));
    }

    Ok(longest)
}
