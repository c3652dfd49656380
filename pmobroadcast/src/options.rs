//! Runtime options of a broadcast station

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::pacer::PacerOptions;
use crate::playlist::PlaybackMode;

pub const DEFAULT_NAME: &str = "PMORadio";
pub const DEFAULT_MOUNT: &str = "/stream";
pub const DEFAULT_CONTENT_TYPE: &str = "audio/mpeg";
pub const DEFAULT_TICK_MS: u64 = 250;
pub const DEFAULT_CHUNK_SIZE: usize = 4096;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_ICY_PORT: u16 = 42002;
/// Upper bound on `chunk_size`: each read allocates one chunk
pub const MAX_CHUNK_SIZE: usize = 1 << 20;

/// Everything a [`Station`](crate::Station) needs to know
///
/// `tick` and `chunk_size` together set the outgoing bitrate; the defaults
/// (4096 bytes every 250 ms) give about 131 kbps, enough for 128 kbps MP3.
#[derive(Debug, Clone)]
pub struct BroadcastOptions {
    pub name: String,
    pub playlist: Option<PathBuf>,
    pub mount: String,
    pub content_type: String,
    pub playback: PlaybackMode,
    pub reload_playlist: bool,
    pub tick: Duration,
    pub chunk_size: usize,
    pub queue_capacity: usize,
    pub icy_enabled: bool,
    pub icy_port: u16,
    pub strict_probe: bool,
}

impl Default for BroadcastOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            playlist: None,
            mount: DEFAULT_MOUNT.to_string(),
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            playback: PlaybackMode::Loop,
            reload_playlist: true,
            tick: Duration::from_millis(DEFAULT_TICK_MS),
            chunk_size: DEFAULT_CHUNK_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            icy_enabled: false,
            icy_port: DEFAULT_ICY_PORT,
            strict_probe: false,
        }
    }
}

impl BroadcastOptions {
    pub fn validate(&self) -> Result<()> {
        if self.tick.is_zero() {
            return Err(Error::invalid_option("tick must be greater than zero"));
        }
        if self.chunk_size == 0 {
            return Err(Error::invalid_option("chunk_size must be greater than zero"));
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::invalid_option(format!(
                "chunk_size {} exceeds {} bytes",
                self.chunk_size, MAX_CHUNK_SIZE
            )));
        }
        if self.queue_capacity == 0 {
            return Err(Error::invalid_option(
                "queue_capacity must be greater than zero",
            ));
        }
        if !self.mount.starts_with('/') || self.mount.len() < 2 {
            return Err(Error::invalid_option(format!(
                "mount '{}' must be a path like /stream",
                self.mount
            )));
        }
        if self.mount == "/status" {
            return Err(Error::invalid_option("mount cannot be /status"));
        }
        if self.content_type.trim().is_empty() {
            return Err(Error::invalid_option("content_type cannot be empty"));
        }
        // Both end up verbatim in ICY and HTTP response headers
        for (field, value) in [("name", &self.name), ("content_type", &self.content_type)] {
            if value.chars().any(char::is_control) {
                return Err(Error::invalid_option(format!(
                    "{} cannot contain control characters",
                    field
                )));
            }
        }
        Ok(())
    }

    /// Outgoing bitrate implied by `chunk_size` and `tick`, in kbps
    pub fn bitrate_kbps(&self) -> f64 {
        let secs = self.tick.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        (self.chunk_size as f64 * 8.0) / secs / 1000.0
    }

    pub fn pacer_options(&self) -> PacerOptions {
        PacerOptions {
            tick: self.tick,
            reload_playlist: self.reload_playlist,
        }
    }
}
