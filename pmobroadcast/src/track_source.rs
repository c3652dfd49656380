//! Track Source: one playlist entry exposed as a finite chunk producer

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::decoder::{Decoder, FormatInfo, TrackTags};
use crate::error::TrackError;

/// Result of a successful [`TrackSource::read`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Up to `chunk_size` bytes; only the last chunk of a track may be shorter
    Chunk(Bytes),
    /// The track is exhausted; reported exactly once
    EndOfTrack,
}

/// A finite byte-producing stream bound to one playlist entry
///
/// After `EndOfTrack`, an error, or `close()`, every further read fails with
/// [`TrackError::Closed`]. Retry and skip policy belong to the caller.
#[async_trait]
pub trait TrackSource: Send {
    fn path(&self) -> &Path;

    fn format(&self) -> Option<&FormatInfo>;

    fn tags(&self) -> &TrackTags;

    async fn read(&mut self) -> Result<ReadOutcome, TrackError>;

    /// Releases the underlying resources; idempotent
    fn close(&mut self);
}

/// Opens playlist entries as [`TrackSource`]s
#[async_trait]
pub trait TrackOpener: Send + Sync {
    async fn open(&self, path: &Path) -> Result<Box<dyn TrackSource>, TrackError>;
}

/// File-backed track source
pub struct FileTrackSource {
    path: PathBuf,
    chunk_size: usize,
    format: Option<FormatInfo>,
    tags: TrackTags,
    reader: Option<Box<dyn AsyncRead + Send + Unpin>>,
    at_eof: bool,
}

impl FileTrackSource {
    /// Opens `path` and hands the file to `decoder`
    pub async fn open(
        path: &Path,
        chunk_size: usize,
        decoder: &dyn Decoder,
    ) -> Result<Self, TrackError> {
        let file = File::open(path)
            .await
            .map_err(|e| TrackError::from_io(path, e))?;
        let decoded = decoder.open(path, file).await?;

        Ok(Self {
            path: path.to_path_buf(),
            chunk_size: chunk_size.max(1),
            format: decoded.format,
            tags: decoded.tags,
            reader: Some(decoded.reader),
            at_eof: false,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none()
    }
}

#[async_trait]
impl TrackSource for FileTrackSource {
    fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> Option<&FormatInfo> {
        self.format.as_ref()
    }

    fn tags(&self) -> &TrackTags {
        &self.tags
    }

    async fn read(&mut self) -> Result<ReadOutcome, TrackError> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(TrackError::Closed(self.path.clone()));
        };

        if self.at_eof {
            self.close();
            return Ok(ReadOutcome::EndOfTrack);
        }

        // Short reads are accumulated so that every chunk but the last is full
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < self.chunk_size {
            match reader.read(&mut buf[filled..]).await {
                Ok(0) => {
                    self.at_eof = true;
                    break;
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(source) => {
                    self.close();
                    return Err(TrackError::Io {
                        path: self.path.clone(),
                        source,
                    });
                }
            }
        }

        if filled == 0 {
            self.close();
            return Ok(ReadOutcome::EndOfTrack);
        }

        buf.truncate(filled);
        Ok(ReadOutcome::Chunk(Bytes::from(buf)))
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

/// Production opener: files on disk, fixed chunk size, shared decoder
#[derive(Clone)]
pub struct FileTrackOpener {
    chunk_size: usize,
    decoder: Arc<dyn Decoder>,
}

impl FileTrackOpener {
    pub fn new(chunk_size: usize, decoder: Arc<dyn Decoder>) -> Self {
        Self {
            chunk_size,
            decoder,
        }
    }
}

#[async_trait]
impl TrackOpener for FileTrackOpener {
    async fn open(&self, path: &Path) -> Result<Box<dyn TrackSource>, TrackError> {
        let source = FileTrackSource::open(path, self.chunk_size, self.decoder.as_ref()).await?;
        Ok(Box::new(source))
    }
}
