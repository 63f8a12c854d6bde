//! Player settings on top of `onairconfig`
//!
//! [`PlayerConfigExt`] adds the `player` section to [`onairconfig::Config`].
//! Getters write their default back when the key is missing or invalid, so a
//! fresh `config.yaml` documents every setting after the first run.
//!
//! ```no_run
//! use onairconfig::get_config;
//! use onairplayer::PlayerConfigExt;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = get_config();
//! let endpoint = config.get_player_endpoint()?;
//! println!("streaming {}", endpoint.stream_url);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use anyhow::Result;
use onairconfig::Config;
use serde_yaml::Value;

use crate::models::{clamp_volume, StreamEndpoint, DEFAULT_VOLUME, MAX_VOLUME};

/// Default status poll interval, in milliseconds
pub const DEFAULT_STATUS_POLL_INTERVAL_MS: u64 = 2000;
/// Shortest accepted status poll interval, in milliseconds
pub const MIN_STATUS_POLL_INTERVAL_MS: u64 = 1000;
/// Longest accepted status poll interval, in milliseconds
pub const MAX_STATUS_POLL_INTERVAL_MS: u64 = 3000;

const PLAYER: &str = "player";
const SEGMENTED: &str = "segmented";

pub trait PlayerConfigExt {
    /// Stream URL (empty when not configured)
    fn get_player_stream_url(&self) -> Result<String>;
    fn set_player_stream_url(&self, url: &str) -> Result<()>;

    /// Status URL (empty disables polling)
    fn get_player_status_url(&self) -> Result<String>;
    fn set_player_status_url(&self, url: &str) -> Result<()>;

    /// Both URLs as an endpoint
    fn get_player_endpoint(&self) -> Result<StreamEndpoint>;

    /// Initial volume, clamped to 0..=100 (default 80)
    fn get_player_default_volume(&self) -> Result<u8>;
    fn set_player_default_volume(&self, volume: i32) -> Result<()>;

    /// Start playing as soon as the store is built (default false)
    fn get_player_autoplay(&self) -> Result<bool>;
    fn set_player_autoplay(&self, autoplay: bool) -> Result<()>;

    /// Delay between status polls, clamped to 1..=3 seconds (default 2 s)
    fn get_player_status_poll_interval(&self) -> Result<Duration>;
    fn set_player_status_poll_interval_ms(&self, millis: u64) -> Result<()>;

    /// Bandwidth cap for segmented variants in bits per second, 0 for none
    fn get_player_segmented_max_bandwidth(&self) -> Result<u64>;
    fn set_player_segmented_max_bandwidth(&self, bits_per_second: u64) -> Result<()>;

    /// Let elements play segmented manifests themselves (default false)
    fn get_player_segmented_native_support(&self) -> Result<bool>;
    fn set_player_segmented_native_support(&self, enabled: bool) -> Result<()>;
}

impl PlayerConfigExt for Config {
    fn get_player_stream_url(&self) -> Result<String> {
        match self.get_value(&[PLAYER, "stream_url"]) {
            Ok(Value::String(url)) => Ok(url),
            _ => {
                self.set_player_stream_url("")?;
                Ok(String::new())
            }
        }
    }

    fn set_player_stream_url(&self, url: &str) -> Result<()> {
        self.set_value(&[PLAYER, "stream_url"], Value::String(url.to_string()))
    }

    fn get_player_status_url(&self) -> Result<String> {
        match self.get_value(&[PLAYER, "status_url"]) {
            Ok(Value::String(url)) => Ok(url),
            _ => {
                self.set_player_status_url("")?;
                Ok(String::new())
            }
        }
    }

    fn set_player_status_url(&self, url: &str) -> Result<()> {
        self.set_value(&[PLAYER, "status_url"], Value::String(url.to_string()))
    }

    fn get_player_endpoint(&self) -> Result<StreamEndpoint> {
        Ok(StreamEndpoint::new(
            self.get_player_stream_url()?,
            self.get_player_status_url()?,
        ))
    }

    fn get_player_default_volume(&self) -> Result<u8> {
        let stored = self
            .get_value(&[PLAYER, "default_volume"])
            .ok()
            .and_then(|v| v.as_i64());

        match stored {
            Some(volume) => Ok(clamp_volume(volume.clamp(0, i64::from(MAX_VOLUME)) as i32)),
            None => {
                self.set_player_default_volume(i32::from(DEFAULT_VOLUME))?;
                Ok(DEFAULT_VOLUME)
            }
        }
    }

    fn set_player_default_volume(&self, volume: i32) -> Result<()> {
        self.set_value(
            &[PLAYER, "default_volume"],
            Value::Number(clamp_volume(volume).into()),
        )
    }

    fn get_player_autoplay(&self) -> Result<bool> {
        match self.get_value(&[PLAYER, "autoplay"]) {
            Ok(Value::Bool(b)) => Ok(b),
            _ => {
                self.set_player_autoplay(false)?;
                Ok(false)
            }
        }
    }

    fn set_player_autoplay(&self, autoplay: bool) -> Result<()> {
        self.set_value(&[PLAYER, "autoplay"], Value::Bool(autoplay))
    }

    fn get_player_status_poll_interval(&self) -> Result<Duration> {
        let stored = self
            .get_value(&[PLAYER, "status_poll_interval_ms"])
            .ok()
            .and_then(|v| v.as_u64());

        let millis = match stored {
            Some(millis) => millis,
            None => {
                self.set_player_status_poll_interval_ms(DEFAULT_STATUS_POLL_INTERVAL_MS)?;
                DEFAULT_STATUS_POLL_INTERVAL_MS
            }
        };
        Ok(Duration::from_millis(millis.clamp(
            MIN_STATUS_POLL_INTERVAL_MS,
            MAX_STATUS_POLL_INTERVAL_MS,
        )))
    }

    fn set_player_status_poll_interval_ms(&self, millis: u64) -> Result<()> {
        self.set_value(
            &[PLAYER, "status_poll_interval_ms"],
            Value::Number(millis.into()),
        )
    }

    fn get_player_segmented_max_bandwidth(&self) -> Result<u64> {
        let stored = self
            .get_value(&[PLAYER, SEGMENTED, "max_bandwidth"])
            .ok()
            .and_then(|v| v.as_u64());

        match stored {
            Some(bits_per_second) => Ok(bits_per_second),
            None => {
                self.set_player_segmented_max_bandwidth(0)?;
                Ok(0)
            }
        }
    }

    fn set_player_segmented_max_bandwidth(&self, bits_per_second: u64) -> Result<()> {
        self.set_value(
            &[PLAYER, SEGMENTED, "max_bandwidth"],
            Value::Number(bits_per_second.into()),
        )
    }

    fn get_player_segmented_native_support(&self) -> Result<bool> {
        match self.get_value(&[PLAYER, SEGMENTED, "native_support"]) {
            Ok(Value::Bool(b)) => Ok(b),
            _ => {
                self.set_player_segmented_native_support(false)?;
                Ok(false)
            }
        }
    }

    fn set_player_segmented_native_support(&self, enabled: bool) -> Result<()> {
        self.set_value(&[PLAYER, SEGMENTED, "native_support"], Value::Bool(enabled))
    }
}
