//! # Module Server - API de haut niveau pour Axum
//!
//! Ce module fournit une abstraction simple pour créer des serveurs HTTP
//! avec Axum, en cachant la configuration du routage et du cycle de vie.
//!
//! ## Fonctionnalités
//!
//! - **Routes JSON simples** : endpoints API avec `add_route()`
//! - **Handlers personnalisés** : flux audio, SSE, etc. avec `add_handler_with_state()`
//! - **Sous-routers** : montage d'un `Router` complet avec `add_router()`
//! - **Arrêt gracieux** : sur Ctrl+C ou via le jeton d'arrêt du serveur

use crate::logs::{LogState, LoggingOptions, create_logs_router, init_logging, log_dump, log_sse};
use anyhow::{Context, Result};
use axum::handler::Handler;
use axum::routing::get;
use axum::{Json, Router};
use pmoconfig::Config;
use serde::Serialize;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::{signal, sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Info serveur sérialisable
#[derive(Clone, Debug, Serialize)]
pub struct ServerInfo {
    pub name: String,
    pub bind_address: String,
    pub http_port: u16,
}

/// Serveur principal
pub struct Server {
    name: String,
    bind_address: IpAddr,
    http_port: u16,
    router: Arc<RwLock<Router>>,
    join_handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    log_state: Option<LogState>,
}

impl Server {
    /// Crée une nouvelle instance de serveur
    ///
    /// # Arguments
    ///
    /// * `name` - Nom du serveur (pour les logs)
    /// * `bind_address` - Adresse d'écoute
    /// * `http_port` - Port HTTP à écouter (0 pour un port éphémère)
    pub fn new(name: impl Into<String>, bind_address: IpAddr, http_port: u16) -> Self {
        Self {
            name: name.into(),
            bind_address,
            http_port,
            router: Arc::new(RwLock::new(Router::new())),
            join_handle: None,
            local_addr: None,
            shutdown: CancellationToken::new(),
            log_state: None,
        }
    }

    /// Ajoute une route JSON dynamique
    ///
    /// La closure fournie est appelée à chaque requête GET sur le chemin.
    ///
    /// ```rust,no_run
    /// # use pmoserver::ServerBuilder;
    /// # #[tokio::main]
    /// # async fn main() {
    /// # let mut server = ServerBuilder::new("Test").build();
    /// server.add_route("/info", || async {
    ///     serde_json::json!({"version": "1.0.0"})
    /// }).await;
    /// # }
    /// ```
    pub async fn add_route<F, Fut, T>(&mut self, path: &str, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let f = Arc::new(f);
        let handler = move || {
            let f = f.clone();
            async move { Json(f().await) }
        };

        self.mount(path, Router::new().route("/", get(handler))).await;
    }

    /// Ajoute un handler Axum standard
    pub async fn add_handler<H, T>(&mut self, path: &str, handler: H)
    where
        H: Handler<T, ()> + Clone + 'static,
        T: 'static,
    {
        self.mount(path, Router::new().route("/", get(handler))).await;
    }

    /// Ajoute un handler avec état
    pub async fn add_handler_with_state<H, T, S>(&mut self, path: &str, handler: H, state: S)
    where
        H: Handler<T, S> + Clone + 'static,
        T: 'static,
        S: Clone + Send + Sync + 'static,
    {
        let route = Router::new().route("/", get(handler)).with_state(state);
        self.mount(path, route).await;
    }

    /// Ajoute un sous-router au serveur
    ///
    /// - Si `path` est "/", merge directement au router principal
    /// - Sinon, nest le router sous le chemin donné
    pub async fn add_router(&mut self, path: &str, sub_router: Router) {
        self.mount(path, sub_router).await;
    }

    async fn mount(&mut self, path: &str, route: Router) {
        let mut r = self.router.write().await;
        *r = if path == "/" {
            std::mem::take(&mut *r).merge(route)
        } else {
            let normalized = format!("/{}", path.trim_matches('/'));
            std::mem::take(&mut *r).nest(&normalized, route)
        };
    }

    /// Copie du router courant (utile pour les tests)
    pub async fn router(&self) -> Router {
        self.router.read().await.clone()
    }

    /// Démarre le serveur HTTP
    ///
    /// Le socket est ouvert avant le retour : une adresse inutilisable est
    /// une erreur remontée à l'appelant. Le service tourne ensuite dans une
    /// tâche de fond jusqu'à Ctrl+C ou l'annulation du jeton d'arrêt.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        let addr = SocketAddr::new(self.bind_address, self.http_port);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Cannot listen on {}", addr))?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        info!("🌐 Server {} running at http://{}", self.name, local_addr);

        let router = self.router.read().await.clone();
        let shutdown = self.shutdown.clone();
        let server_task = tokio::spawn(async move {
            let graceful = shutdown.clone();
            if let Err(e) = axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async move { graceful.cancelled().await })
                .await
            {
                warn!("HTTP server stopped with error: {}", e);
            }
        });

        let shutdown = self.shutdown.clone();
        let signal_task = tokio::spawn(async move {
            tokio::select! {
                res = signal::ctrl_c() => {
                    match res {
                        Ok(()) => info!("Ctrl+C reçu, arrêt gracieux"),
                        Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
                    }
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        });

        self.join_handle = Some(tokio::spawn(async move {
            let _ = server_task.await;
            signal_task.abort();
        }));

        Ok(local_addr)
    }

    /// Attend la fin du serveur
    pub async fn wait(&mut self) {
        if let Some(h) = self.join_handle.take() {
            let _ = h.await;
        }
    }

    /// Demande l'arrêt du serveur
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Jeton annulé à l'arrêt du serveur (Ctrl+C ou `stop()`)
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Adresse effectivement écoutée, disponible après `start()`
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Récupère les infos du serveur
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            bind_address: self.bind_address.to_string(),
            http_port: self.local_addr.map(|a| a.port()).unwrap_or(self.http_port),
        }
    }

    /// État du système de logs, si `init_logging` a été appelé
    pub fn log_state(&self) -> Option<&LogState> {
        self.log_state.as_ref()
    }

    /// Initialise le système de logging et enregistre les routes de logs
    ///
    /// Routes enregistrées : `/log-sse`, `/log-dump` et `/api/log_setup`.
    pub async fn init_logging(&mut self, options: LoggingOptions) {
        let log_state = init_logging(options);
        self.attach_logs(log_state).await;
    }

    /// Enregistre les routes de logs pour un `LogState` déjà initialisé
    pub async fn attach_logs(&mut self, log_state: LogState) {
        self.add_handler_with_state("/log-sse", log_sse, log_state.clone())
            .await;
        self.add_handler_with_state("/log-dump", log_dump, log_state.clone())
            .await;
        self.add_router("/api", create_logs_router(log_state.clone()))
            .await;

        self.log_state = Some(log_state);
    }
}

/// Builder pattern
pub struct ServerBuilder {
    name: String,
    bind_address: IpAddr,
    http_port: u16,
}

impl ServerBuilder {
    /// Crée un nouveau builder écoutant sur toutes les interfaces, port 42001
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: 42001,
        }
    }

    /// Builder initialisé depuis la section `host` de la configuration
    pub fn from_config(name: impl Into<String>, config: &Config) -> Result<Self> {
        let raw = config.get_bind_address()?;
        let bind_address: IpAddr = raw
            .parse()
            .with_context(|| format!("Invalid bind address '{}'", raw))?;
        Ok(Self {
            name: name.into(),
            bind_address,
            http_port: config.get_http_port(),
        })
    }

    pub fn bind_address(mut self, addr: IpAddr) -> Self {
        self.bind_address = addr;
        self
    }

    pub fn http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    /// Construit le serveur
    pub fn build(self) -> Server {
        Server::new(self.name, self.bind_address, self.http_port)
    }
}
