//! # pmoserver - Serveur web haut niveau basé sur Axum
//!
//! Cette crate fournit une abstraction simple pour créer des serveurs HTTP
//! avec Axum, utilisée par PMORadio pour exposer le flux audio, l'état de la
//! station et les logs.
//!
//! ## Fonctionnalités
//!
//! - **API de haut niveau** : routes JSON, handlers avec état, sous-routers
//! - **Server-Sent Events (SSE)** : logs en temps réel via `/log-sse`
//! - **Arrêt gracieux** : sur Ctrl+C ou via un `CancellationToken`
//!
//! ## Architecture
//!
//! - [`server`] : serveur principal et builder
//! - [`logs`] : système de logs (tracing + buffer circulaire + SSE)
//!
//! Les crates métier étendent [`Server`] par des traits d'extension, sans que
//! `pmoserver` dépende d'elles.
//!
//! ## Exemple d'utilisation
//!
//! ```rust,no_run
//! use pmoserver::{ServerBuilder, logs::LoggingOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = ServerBuilder::new("MyServer").http_port(8080).build();
//!     server.init_logging(LoggingOptions::default()).await;
//!
//!     server.add_route("/api/status", || async {
//!         serde_json::json!({"status": "ok"})
//!     }).await;
//!
//!     server.start().await?;
//!     server.wait().await;
//!     Ok(())
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{LogState, LoggingOptions, SseLayer, log_dump, log_sse};
pub use server::{Server, ServerBuilder, ServerInfo};
