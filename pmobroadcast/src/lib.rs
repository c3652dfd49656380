//! Paced audio broadcast for PMORadio
//!
//! One pacer reads the playlist at a fixed rate and pushes each chunk to a
//! [`Distributor`]; every listener owns a bounded queue fed by that
//! distributor and drained by its [`ListenerSession`]. A slow listener loses
//! chunks from its own queue and never holds back the others. Late listeners
//! join the live position, there is no backfill.
//!
//! ```text
//!  playlist.m3u ──► Pacer ──tick──► Distributor ──┬─► queue ─► ListenerSession ─► HTTP body
//!                    │                            ├─► queue ─► ListenerSession ─► ICY socket
//!               TrackOpener                       └─► ...
//!            (Decoder + file)
//! ```
//!
//! # Features
//!
//! - `pmoconfig` (défaut) : trait [`BroadcastConfigExt`] pour lire la section
//!   `radio` de la configuration
//! - `server` (défaut) : handlers axum et trait [`BroadcastServerExt`] pour
//!   monter la station sur un `pmoserver::Server`
//!
//! # Exemple
//!
//! ```rust,no_run
//! use pmobroadcast::{BroadcastOptions, Station};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> pmobroadcast::Result<()> {
//! let options = BroadcastOptions {
//!     playlist: Some("radio.m3u".into()),
//!     ..Default::default()
//! };
//! let station = Station::from_options(options).await?;
//!
//! let (client, _server) = tokio::io::duplex(64 * 1024);
//! let report = station.listen().run(client, CancellationToken::new()).await;
//! println!("{:?}", report);
//! # Ok(())
//! # }
//! ```

pub mod chunk;
pub mod decoder;
pub mod distributor;
pub mod error;
pub mod icy;
pub mod options;
pub mod pacer;
pub mod playlist;
pub mod registry;
pub mod session;
pub mod station;
pub mod track_source;

#[cfg(feature = "pmoconfig")]
pub mod config_ext;

#[cfg(feature = "server")]
pub mod http;

#[cfg(feature = "server")]
pub mod pmoserver_ext;

#[cfg(feature = "server")]
mod pmoserver_impl;

pub use chunk::Chunk;
pub use decoder::{DecodedTrack, Decoder, FormatInfo, PassthroughDecoder, TrackTags};
pub use distributor::{
    Delivery, DeliveryReport, Distributor, DistributorStats, Endpoint, SubscriberId,
};
pub use error::{Error, PlaylistError, Result, TrackError};
pub use icy::IcyListener;
pub use options::BroadcastOptions;
pub use pacer::{NowPlaying, Pacer, PacerOptions, PacerStats, TickOutcome};
pub use playlist::{PlaybackMode, Playlist, PlaylistCursor};
pub use registry::{ListenerGuard, ListenerRegistry, RegistrySnapshot};
pub use session::{ListenerSession, SessionEnd, SessionReport, SessionState};
pub use station::{Station, StationStatus};
pub use track_source::{FileTrackOpener, FileTrackSource, ReadOutcome, TrackOpener, TrackSource};

#[cfg(feature = "pmoconfig")]
pub use config_ext::BroadcastConfigExt;

#[cfg(feature = "server")]
pub use pmoserver_ext::BroadcastServerExt;
