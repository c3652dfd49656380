//! Chunk: the unit of audio data broadcast on every tick

use bytes::Bytes;

/// Immutable slice of audio bytes produced by the pacer for one tick
///
/// Cloning shares the payload, so one delivery costs a reference-count
/// increment per subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    sequence: u64,
    track: u64,
    data: Bytes,
}

impl Chunk {
    pub fn new(sequence: u64, track: u64, data: Bytes) -> Self {
        Self {
            sequence,
            track,
            data,
        }
    }

    /// Position in the broadcast, strictly increasing
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Ordinal of the track play that produced this chunk
    pub fn track(&self) -> u64 {
        self.track
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}
