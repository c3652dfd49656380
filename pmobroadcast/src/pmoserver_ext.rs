//! Extension pmoserver pour la diffusion radio
//!
//! Ce trait permet à `pmobroadcast` d'ajouter des routes sur
//! `pmoserver::Server` sans que pmoserver dépende de pmobroadcast.
//!
//! # Exemple
//!
//! ```rust,no_run
//! use pmobroadcast::{BroadcastOptions, BroadcastServerExt, Station};
//! use pmoserver::ServerBuilder;
//!
//! # async fn example(options: BroadcastOptions) -> anyhow::Result<()> {
//! let station = Station::from_options(options).await?;
//! let mut server = ServerBuilder::new("PMORadio").build();
//! server.init_broadcast(station.clone()).await?;
//!
//! server.start().await?;
//! server.wait().await;
//! station.shutdown().await;
//! # Ok(())
//! # }
//! ```

use anyhow::Result;

use crate::station::Station;

pub trait BroadcastServerExt {
    /// Enregistre les routes de la station
    ///
    /// # Routes enregistrées
    ///
    /// - `GET {mount}` - Flux audio continu (`/stream` par défaut)
    /// - `GET /status` - État de la station en JSON
    async fn init_broadcast(&mut self, station: Station) -> Result<()>;
}

// L'implémentation du trait est dans pmoserver_impl.rs
