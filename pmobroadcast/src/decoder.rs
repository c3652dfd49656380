//! Decoder collaborator
//!
//! A [`Decoder`] turns an opened file into a byte stream plus format
//! metadata. The pacer only ever sees bytes, so any codec can sit behind this
//! trait without touching the pacing or fan-out logic.
//!
//! The default [`PassthroughDecoder`] streams the file as-is (the broadcast
//! carries the file's own container, e.g. MP3 frames) and probes format and
//! tags with `lofty`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use lofty::{config::ParseOptions, prelude::*, probe::Probe};
use serde::Serialize;
use tokio::fs::File;
use tokio::io::AsyncRead;
use tracing::debug;

use crate::error::TrackError;

/// Technical properties of a track, all optional
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormatInfo {
    /// Sample rate in Hz (e.g., 44100, 48000)
    pub sample_rate: Option<u32>,
    /// Number of audio channels (1 = mono, 2 = stereo, etc.)
    pub channels: Option<u8>,
    /// Audio bitrate in kbps
    pub bitrate_kbps: Option<u32>,
    /// Duration in seconds
    pub duration_secs: Option<u64>,
}

/// Artistic tags used for "now playing"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
}

/// Output of a decoder: a byte stream and what is known about it
pub struct DecodedTrack {
    pub format: Option<FormatInfo>,
    pub tags: TrackTags,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl std::fmt::Debug for DecodedTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedTrack")
            .field("format", &self.format)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Turns an opened file into a byte-producing stream
#[async_trait]
pub trait Decoder: Send + Sync {
    /// Prepares `file` (opened from `path`) for streaming
    ///
    /// A failure here is a per-track error: the pacer skips the entry.
    async fn open(&self, path: &Path, file: File) -> Result<DecodedTrack, TrackError>;
}

/// Streams files unchanged and probes their metadata with lofty
#[derive(Debug, Clone, Default)]
pub struct PassthroughDecoder {
    strict: bool,
}

impl PassthroughDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// When strict, a file lofty cannot parse is rejected as `DecodeFailed`
    pub fn strict(strict: bool) -> Self {
        Self { strict }
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }
}

#[async_trait]
impl Decoder for PassthroughDecoder {
    async fn open(&self, path: &Path, file: File) -> Result<DecodedTrack, TrackError> {
        let owned: PathBuf = path.to_path_buf();
        let probed = tokio::task::spawn_blocking(move || probe(&owned))
            .await
            .map_err(|e| TrackError::decode_failed(path, format!("probe task failed: {e}")))?;

        let (format, tags) = match probed {
            Ok((format, tags)) => (Some(format), tags),
            Err(e) if self.strict => {
                return Err(TrackError::decode_failed(path, e.to_string()));
            }
            Err(e) => {
                debug!(path = %path.display(), "Format probe failed, streaming anyway: {}", e);
                (None, TrackTags::default())
            }
        };

        Ok(DecodedTrack {
            format,
            tags,
            reader: Box::new(file),
        })
    }
}

fn probe(path: &Path) -> Result<(FormatInfo, TrackTags), lofty::error::LoftyError> {
    let tagged_file = Probe::open(path)?.options(ParseOptions::new()).read()?;
    let properties = tagged_file.properties();

    let format = FormatInfo {
        sample_rate: properties.sample_rate(),
        channels: properties.channels(),
        bitrate_kbps: properties.audio_bitrate(),
        duration_secs: Some(properties.duration().as_secs()),
    };

    // Primary tag first, then whatever tag the file carries
    let tags = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag())
        .map(|tag| TrackTags {
            title: tag.title().map(|s| s.to_string()),
            artist: tag.artist().map(|s| s.to_string()),
            album: tag.album().map(|s| s.to_string()),
        })
        .unwrap_or_default();

    Ok((format, tags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    /// Minimal PCM WAV file: mono, 16 bits
    fn wav_bytes(sample_rate: u32, samples: usize) -> Vec<u8> {
        let data_len = (samples * 2) as u32;
        let mut out = Vec::with_capacity(44 + data_len as usize);
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes()); // PCM
        out.extend_from_slice(&1u16.to_le_bytes()); // mono
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        out.extend(std::iter::repeat(0u8).take(data_len as usize));
        out
    }

    #[tokio::test]
    async fn test_lenient_decoder_streams_unparseable_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"not really a wav file").unwrap();

        let file = File::open(&path).await.unwrap();
        let mut track = PassthroughDecoder::new().open(&path, file).await.unwrap();
        assert!(track.format.is_none());

        let mut content = Vec::new();
        track.reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"not really a wav file");
    }

    #[tokio::test]
    async fn test_strict_decoder_rejects_unparseable_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"not really a wav file").unwrap();

        let file = File::open(&path).await.unwrap();
        let err = PassthroughDecoder::strict(true)
            .open(&path, file)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackError::DecodeFailed { .. }));
    }

    #[tokio::test]
    async fn test_probe_reads_wav_properties() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        std::fs::write(&path, wav_bytes(8000, 8000)).unwrap();

        let file = File::open(&path).await.unwrap();
        let track = PassthroughDecoder::strict(true)
            .open(&path, file)
            .await
            .unwrap();
        let format = track.format.unwrap();
        assert_eq!(format.sample_rate, Some(8000));
        assert_eq!(format.channels, Some(1));
        assert_eq!(format.duration_secs, Some(1));
    }
}
