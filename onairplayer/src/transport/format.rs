//! Stream format sniffing and playback strategy selection

use serde::{Deserialize, Serialize};
use url::Url;

/// File extensions that announce a segmented manifest
const SEGMENTED_EXTENSIONS: &[&str] = &["m3u8"];

/// MIME type of segmented manifests
pub const SEGMENTED_MIME_TYPE: &str = "application/vnd.apple.mpegurl";

/// Declared format of a stream URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    /// Manifest describing successive chunks (HLS)
    Segmented,
    /// A single continuous audio resource (MP3, AAC, ...)
    Progressive,
}

impl StreamFormat {
    /// Detect the format from the URL path extension.
    ///
    /// Query string and fragment are ignored, matching is case-insensitive.
    /// Strings that are not absolute URLs are inspected as raw paths.
    pub fn detect(stream_url: &str) -> Self {
        let path = match Url::parse(stream_url) {
            Ok(url) => url.path().to_string(),
            Err(_) => stream_url
                .split(['?', '#'])
                .next()
                .unwrap_or_default()
                .to_string(),
        };

        let extension = path
            .rsplit('/')
            .next()
            .and_then(|file| file.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase());

        match extension {
            Some(ext) if SEGMENTED_EXTENSIONS.contains(&ext.as_str()) => StreamFormat::Segmented,
            _ => StreamFormat::Progressive,
        }
    }

    pub fn is_segmented(&self) -> bool {
        matches!(self, StreamFormat::Segmented)
    }
}

/// How the transport will get audio out of a URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStrategy {
    /// Run a segmented engine and attach it to the element
    SegmentedEngine,
    /// Hand the manifest URL straight to the element
    NativeSegmented,
    /// Hand the URL straight to the element as plain audio
    Progressive,
}

impl PlaybackStrategy {
    /// Pick a strategy. A segmented engine wins over native support.
    pub fn select(format: StreamFormat, engine_supported: bool, native_segmented: bool) -> Self {
        match format {
            StreamFormat::Segmented if engine_supported => PlaybackStrategy::SegmentedEngine,
            StreamFormat::Segmented if native_segmented => PlaybackStrategy::NativeSegmented,
            _ => PlaybackStrategy::Progressive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_segmented() {
        assert_eq!(
            StreamFormat::detect("https://radio.example/live/stream.m3u8"),
            StreamFormat::Segmented
        );
        assert_eq!(
            StreamFormat::detect("https://radio.example/hls/LIVE.M3U8?token=abc"),
            StreamFormat::Segmented
        );
        assert_eq!(
            StreamFormat::detect("/hls/live.m3u8#start"),
            StreamFormat::Segmented
        );
    }

    #[test]
    fn test_detect_progressive() {
        assert_eq!(
            StreamFormat::detect("https://radio.example/radio.mp3"),
            StreamFormat::Progressive
        );
        assert_eq!(
            StreamFormat::detect("https://radio.example/listen?format=m3u8"),
            StreamFormat::Progressive
        );
        assert_eq!(
            StreamFormat::detect("https://radio.example/m3u8/stream"),
            StreamFormat::Progressive
        );
        assert_eq!(StreamFormat::detect(""), StreamFormat::Progressive);
    }

    #[test]
    fn test_strategy_selection() {
        use PlaybackStrategy::*;
        use StreamFormat::Segmented;

        assert_eq!(PlaybackStrategy::select(Segmented, true, true), SegmentedEngine);
        assert_eq!(PlaybackStrategy::select(Segmented, false, true), NativeSegmented);
        assert_eq!(PlaybackStrategy::select(Segmented, false, false), Progressive);
        assert_eq!(PlaybackStrategy::select(StreamFormat::Progressive, true, true), Progressive);
    }
}
