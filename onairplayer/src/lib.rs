//! # onairplayer - Live radio player core
//!
//! This crate keeps one live radio stream playing and tells every surface
//! what is on air.
//!
//! ## Pieces
//!
//! - [`StreamTransport`]: owns the audio resource for the stream URL. Picks a
//!   segmented (HLS) engine or plain progressive playback from the URL,
//!   classifies failures, and resumes a paused stream without reconnecting.
//! - [`StatusPoller`]: polls the now-playing status endpoint on a fixed
//!   interval and normalizes the five known document shapes into one
//!   [`NowPlayingSnapshot`]. Failed polls keep the previous snapshot.
//! - [`PlayerStore`]: built once at the application root, merges both into a
//!   [`PlayerView`] and exposes the controls through [`PlayerHandle`]s.
//! - [`HttpBackend`]: the concrete media runtime, streaming audio bytes with
//!   `reqwest` into an [`AudioSink`].
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use onairplayer::{HttpBackend, NullSink, PlayerStore, StreamEndpoint};
//!
//! #[tokio::main]
//! async fn main() -> onairplayer::Result<()> {
//!     let store = PlayerStore::builder()
//!         .endpoint(StreamEndpoint::new(
//!             "https://radio.example/hls/live.m3u8",
//!             "https://radio.example/api/nowplaying/1",
//!         ))
//!         .backend(Arc::new(HttpBackend::new(Arc::new(NullSink))?))
//!         .default_volume(70)
//!         .build()?;
//!
//!     let player = store.handle();
//!     player.toggle_play();
//!
//!     let mut views = player.subscribe();
//!     while views.changed().await.is_ok() {
//!         let view = views.borrow_and_update().clone();
//!         println!("{:?} - {:?} ({:?})", view.artist(), view.title(), view.phase());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! With the `onairconfig` feature (on by default), [`PlayerConfigExt`] reads
//! the `player` section of the OnAir configuration.

pub mod error;
pub mod models;
pub mod status;
pub mod store;
pub mod transport;

#[cfg(feature = "onairconfig")]
pub mod config_ext;

// Re-exports
pub use error::{Error, ErrorKind, Result, TransportError};
pub use models::{
    NowPlayingSnapshot, Phase, PlaybackState, PlayedSong, PlayerView, Song, StreamEndpoint,
    UiFlags, UpcomingSong, DEFAULT_VOLUME, MAX_VOLUME,
};
pub use status::{PollerHandle, StatusClient, StatusPoller, StatusShape};
pub use store::{PlayerHandle, PlayerStore, PlayerStoreBuilder, VOLUME_STEP};
pub use transport::http::{HttpBackend, HttpBackendBuilder};
pub use transport::{
    AudioSink, MediaBackend, MediaElement, MediaEvent, MediaEventKind, NullSink, PlaybackStrategy,
    SegmentedEngine, StartPath, StreamFormat, StreamTransport,
};

#[cfg(feature = "onairconfig")]
pub use config_ext::PlayerConfigExt;
