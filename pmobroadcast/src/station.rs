//! Station: the shared broadcast state handed to every listener front-end

use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::decoder::PassthroughDecoder;
use crate::distributor::{Distributor, DistributorStats};
use crate::error::{Error, Result};
use crate::options::BroadcastOptions;
use crate::pacer::{NowPlaying, Pacer, PacerStats, PacerStatsHandle};
use crate::playlist::{Playlist, PlaybackMode, PlaylistCursor};
use crate::registry::{ListenerRegistry, RegistrySnapshot};
use crate::session::ListenerSession;
use crate::track_source::{FileTrackOpener, TrackOpener};

/// Diagnostics served on `/status`
#[derive(Debug, Clone, Serialize)]
pub struct StationStatus {
    pub name: String,
    pub mount: String,
    pub content_type: String,
    pub playback: PlaybackMode,
    pub tick_ms: u64,
    pub chunk_size: usize,
    pub bitrate_kbps: f64,
    pub playlist_entries: usize,
    pub listeners: RegistrySnapshot,
    pub now_playing: Option<NowPlaying>,
    pub distributor: DistributorStats,
    pub pacer: PacerStats,
    pub started_at: DateTime<Utc>,
    pub uptime_secs: u64,
}

struct StationInner {
    options: BroadcastOptions,
    distributor: Distributor,
    registry: ListenerRegistry,
    now_playing: watch::Receiver<Option<NowPlaying>>,
    pacer_stats: PacerStatsHandle,
    playlist_entries: usize,
    shutdown: CancellationToken,
    pacer_task: Mutex<Option<JoinHandle<()>>>,
    started_at: DateTime<Utc>,
    started: Instant,
}

/// A running broadcast: one pacer, one distributor, any number of listeners
///
/// Cloning is cheap; all clones share the same broadcast.
#[derive(Clone)]
pub struct Station {
    inner: Arc<StationInner>,
}

impl Station {
    /// Loads the configured playlist and starts broadcasting from files
    ///
    /// A missing, unreadable or empty playlist is an error.
    pub async fn from_options(options: BroadcastOptions) -> Result<Self> {
        options.validate()?;
        let path = options
            .playlist
            .clone()
            .ok_or_else(|| Error::invalid_option("no playlist configured"))?;
        let playlist = Playlist::load(&path).await?;
        info!(entries = playlist.len(), "📃 Playlist loaded: {}", path.display());

        let decoder = Arc::new(PassthroughDecoder::strict(options.strict_probe));
        let opener = Arc::new(FileTrackOpener::new(options.chunk_size, decoder));
        Self::start(options, playlist, opener)
    }

    /// Spawns the pacer on the current Tokio runtime
    pub fn start(
        options: BroadcastOptions,
        playlist: Playlist,
        opener: Arc<dyn TrackOpener>,
    ) -> Result<Self> {
        options.validate()?;

        let distributor = Distributor::new(options.queue_capacity);
        let playlist_entries = playlist.len();
        let pacer = Pacer::new(
            PlaylistCursor::new(playlist, options.playback),
            opener,
            distributor.clone(),
            options.pacer_options(),
        );
        let now_playing = pacer.now_playing();
        let pacer_stats = pacer.stats_handle();

        let shutdown = CancellationToken::new();
        let pacer_task = tokio::spawn(pacer.run(shutdown.clone()));

        info!(
            name = %options.name,
            mount = %options.mount,
            bitrate_kbps = format!("{:.1}", options.bitrate_kbps()),
            "📻 Station started"
        );

        Ok(Self {
            inner: Arc::new(StationInner {
                options,
                distributor,
                registry: ListenerRegistry::new(),
                now_playing,
                pacer_stats,
                playlist_entries,
                shutdown,
                pacer_task: Mutex::new(Some(pacer_task)),
                started_at: Utc::now(),
                started: Instant::now(),
            }),
        })
    }

    pub fn options(&self) -> &BroadcastOptions {
        &self.inner.options
    }

    pub fn distributor(&self) -> &Distributor {
        &self.inner.distributor
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.inner.registry
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        self.inner.now_playing.borrow().clone()
    }

    /// Cancelled once [`Station::shutdown`] has been called
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Opens a listener session on this broadcast
    pub fn listen(&self) -> ListenerSession {
        ListenerSession::start(&self.inner.distributor, &self.inner.registry)
    }

    pub fn status(&self) -> StationStatus {
        let options = &self.inner.options;
        StationStatus {
            name: options.name.clone(),
            mount: options.mount.clone(),
            content_type: options.content_type.clone(),
            playback: options.playback,
            tick_ms: options.tick.as_millis() as u64,
            chunk_size: options.chunk_size,
            bitrate_kbps: options.bitrate_kbps(),
            playlist_entries: self.inner.playlist_entries,
            listeners: self.inner.registry.snapshot(),
            now_playing: self.now_playing(),
            distributor: self.inner.distributor.stats(),
            pacer: self.inner.pacer_stats.snapshot(),
            started_at: self.inner.started_at,
            uptime_secs: self.inner.started.elapsed().as_secs(),
        }
    }

    /// Stops the pacer and closes every listener queue
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();

        let task = match self.inner.pacer_task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Pacer task ended abnormally: {}", e);
            }
        }

        let closed = self.inner.distributor.close_all();
        info!(listeners_closed = closed, "Station stopped");
    }
}
