//! Pacer: walks the playlist and emits one chunk per tick
//!
//! The pacer is the only producer of the broadcast. On every tick it reads
//! one chunk from the current track and hands it to the [`Distributor`].
//! Track transitions, missing files and decode or read errors never deliver
//! a chunk: the pacer logs, moves to the next entry and carries on. It runs
//! until its shutdown token is cancelled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunk::Chunk;
use crate::decoder::FormatInfo;
use crate::distributor::{DeliveryReport, Distributor};
use crate::playlist::{Advance, Playlist, PlaylistCursor};
use crate::track_source::{ReadOutcome, TrackOpener, TrackSource};

#[derive(Debug, Clone)]
pub struct PacerOptions {
    /// Wall-clock interval between two chunks
    pub tick: Duration,
    /// Re-read the playlist file each time it wraps around
    pub reload_playlist: bool,
}

impl Default for PacerOptions {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(250),
            reload_playlist: true,
        }
    }
}

/// Track currently on air
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NowPlaying {
    pub path: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub format: Option<FormatInfo>,
    /// Ordinal of this play since startup, starting at 1
    pub track: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Counters {
    tracks_started: AtomicU64,
    tracks_skipped: AtomicU64,
    chunks_produced: AtomicU64,
    playlist_cycles: AtomicU64,
    playlist_reloads: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PacerStats {
    pub tracks_started: u64,
    pub tracks_skipped: u64,
    pub chunks_produced: u64,
    pub playlist_cycles: u64,
    pub playlist_reloads: u64,
}

/// Read-only view on the pacer counters, usable after the pacer is spawned
#[derive(Debug, Clone, Default)]
pub struct PacerStatsHandle {
    counters: Arc<Counters>,
}

impl PacerStatsHandle {
    pub fn snapshot(&self) -> PacerStats {
        let c = &self.counters;
        PacerStats {
            tracks_started: c.tracks_started.load(Ordering::Relaxed),
            tracks_skipped: c.tracks_skipped.load(Ordering::Relaxed),
            chunks_produced: c.chunks_produced.load(Ordering::Relaxed),
            playlist_cycles: c.playlist_cycles.load(Ordering::Relaxed),
            playlist_reloads: c.playlist_reloads.load(Ordering::Relaxed),
        }
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// A chunk went to the distributor
    Delivered { sequence: u64, report: DeliveryReport },
    /// A track was opened (possibly right after the previous one ended)
    Opened,
    /// The current entry failed and was skipped
    Skipped,
    /// Nothing left to play (`Once` mode)
    Idle,
}

pub struct Pacer {
    cursor: PlaylistCursor,
    opener: Arc<dyn TrackOpener>,
    distributor: Distributor,
    options: PacerOptions,
    source: Option<Box<dyn TrackSource>>,
    now_playing: watch::Sender<Option<NowPlaying>>,
    counters: Arc<Counters>,
    next_sequence: u64,
    track_ordinal: u64,
    consecutive_failures: usize,
    idle: bool,
}

impl Pacer {
    pub fn new(
        cursor: PlaylistCursor,
        opener: Arc<dyn TrackOpener>,
        distributor: Distributor,
        options: PacerOptions,
    ) -> Self {
        let (now_playing, _) = watch::channel(None);
        Self {
            cursor,
            opener,
            distributor,
            options,
            source: None,
            now_playing,
            counters: Arc::default(),
            next_sequence: 0,
            track_ordinal: 0,
            consecutive_failures: 0,
            idle: false,
        }
    }

    pub fn now_playing(&self) -> watch::Receiver<Option<NowPlaying>> {
        self.now_playing.subscribe()
    }

    pub fn stats_handle(&self) -> PacerStatsHandle {
        PacerStatsHandle {
            counters: self.counters.clone(),
        }
    }

    pub fn cursor(&self) -> &PlaylistCursor {
        &self.cursor
    }

    /// Ticks until `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.options.tick);
        // Après un retard, on reprend la cadence au lieu de rattraper en rafale
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            tick_ms = self.options.tick.as_millis() as u64,
            entries = self.cursor.playlist().len(),
            mode = %self.cursor.mode(),
            "📻 Pacer started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }

        self.close_source();
        info!("Pacer stopped");
    }

    /// Runs one tick
    pub async fn tick(&mut self) -> TickOutcome {
        if self.idle {
            return TickOutcome::Idle;
        }

        let Some(source) = self.source.as_mut() else {
            return self.open_current().await;
        };

        match source.read().await {
            Ok(ReadOutcome::Chunk(data)) => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                self.counters.chunks_produced.fetch_add(1, Ordering::Relaxed);
                let report = self
                    .distributor
                    .deliver(Chunk::new(sequence, self.track_ordinal, data));
                TickOutcome::Delivered { sequence, report }
            }
            Ok(ReadOutcome::EndOfTrack) => {
                debug!(path = %source.path().display(), "End of track");
                self.close_source();
                self.advance().await;
                if self.idle {
                    return TickOutcome::Idle;
                }
                self.open_current().await
            }
            Err(e) => {
                warn!("⚠️ Read error, skipping to next track: {}", e);
                self.counters.tracks_skipped.fetch_add(1, Ordering::Relaxed);
                self.close_source();
                self.advance().await;
                if self.idle {
                    TickOutcome::Idle
                } else {
                    TickOutcome::Skipped
                }
            }
        }
    }

    async fn open_current(&mut self) -> TickOutcome {
        let Some(path) = self.cursor.current().map(|p| p.to_path_buf()) else {
            self.idle = true;
            return TickOutcome::Idle;
        };

        match self.opener.open(&path).await {
            Ok(source) => {
                self.consecutive_failures = 0;
                self.track_ordinal += 1;
                self.counters.tracks_started.fetch_add(1, Ordering::Relaxed);

                let tags = source.tags().clone();
                info!(
                    listeners = self.distributor.subscriber_count(),
                    title = ?tags.title,
                    artist = ?tags.artist,
                    "🎵 Playing track: {}",
                    path.display()
                );
                self.now_playing.send_replace(Some(NowPlaying {
                    path: path.display().to_string(),
                    title: tags.title,
                    artist: tags.artist,
                    album: tags.album,
                    format: source.format().cloned(),
                    track: self.track_ordinal,
                    started_at: Utc::now(),
                }));

                self.source = Some(source);
                TickOutcome::Opened
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.counters.tracks_skipped.fetch_add(1, Ordering::Relaxed);
                // Une playlist entièrement illisible ne doit pas noyer les logs
                if self.consecutive_failures <= self.cursor.playlist().len() {
                    warn!("⚠️ Skipping track: {}", e);
                } else {
                    debug!("Skipping track: {}", e);
                }
                if self.consecutive_failures == self.cursor.playlist().len() {
                    warn!("No playable track in the whole playlist, still retrying");
                }

                self.advance().await;
                if self.idle {
                    TickOutcome::Idle
                } else {
                    TickOutcome::Skipped
                }
            }
        }
    }

    async fn advance(&mut self) {
        match self.cursor.advance() {
            Advance::Next => {}
            Advance::Wrapped => {
                self.counters.playlist_cycles.fetch_add(1, Ordering::Relaxed);
                debug!("Playlist wrapped around");
                if self.options.reload_playlist {
                    self.reload_playlist().await;
                }
            }
            Advance::Exhausted => {
                info!("Playlist finished, broadcast stays silent until shutdown");
                self.now_playing.send_replace(None);
                self.idle = true;
            }
        }
    }

    async fn reload_playlist(&mut self) {
        let Some(path) = self.cursor.playlist().source().map(|p| p.to_path_buf()) else {
            return;
        };

        match Playlist::load(&path).await {
            Ok(playlist) => {
                self.counters.playlist_reloads.fetch_add(1, Ordering::Relaxed);
                if playlist != *self.cursor.playlist() {
                    info!(entries = playlist.len(), "Playlist reloaded: {}", path.display());
                    self.consecutive_failures = 0;
                    self.cursor.replace(playlist);
                }
            }
            Err(e) => {
                warn!("Playlist reload failed, keeping previous entries: {}", e);
            }
        }
    }

    fn close_source(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
    }
}
