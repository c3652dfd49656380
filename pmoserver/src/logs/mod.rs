// logs.rs
mod sselayer;

pub use sselayer::SseLayer;

use std::{
    collections::VecDeque,
    sync::{Arc, RwLock},
    time::SystemTime,
};

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use pmoconfig::Config;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Registry,
    filter::LevelFilter,
    layer::SubscriberExt,
    reload,
    util::SubscriberInitExt,
};

/// Représente une entrée de log
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: SystemTime,
    pub level: String,
    pub target: String,
    pub message: String,
}

type ReloadHandle = reload::Handle<LevelFilter, Registry>;

/// Buffer circulaire partagé
#[derive(Clone)]
pub struct LogState {
    buffer: Arc<RwLock<VecDeque<LogEntry>>>,
    capacity: usize,
    tx: broadcast::Sender<LogEntry>,
    max_level: Arc<RwLock<Level>>,
    reload_handle: Option<Arc<ReloadHandle>>,
}

impl LogState {
    pub fn new(capacity: usize, reload_handle: Option<ReloadHandle>) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
            tx: broadcast::channel(1000).0,
            max_level: Arc::new(RwLock::new(Level::TRACE)),
            reload_handle: reload_handle.map(Arc::new),
        }
    }

    pub fn set_max_level(&self, level: Level) {
        if let Ok(mut current) = self.max_level.write() {
            *current = level;
        }

        // Recharger le filtre dynamiquement
        if let Some(handle) = &self.reload_handle {
            if let Err(e) = handle.reload(LevelFilter::from_level(level)) {
                eprintln!("Failed to reload log level filter: {}", e);
            }
        }
    }

    pub fn get_max_level(&self) -> Level {
        self.max_level
            .read()
            .map(|level| *level)
            .unwrap_or(Level::TRACE)
    }

    fn push(&self, entry: LogEntry) {
        if let Ok(mut buf) = self.buffer.write() {
            if buf.len() >= self.capacity {
                buf.pop_front();
            }
            buf.push_back(entry.clone());
        }
        let _ = self.tx.send(entry);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.tx.subscribe()
    }

    pub fn dump(&self) -> Vec<LogEntry> {
        self.buffer
            .read()
            .map(|buf| buf.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Query params pour /log-sse
#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub error: Option<bool>,
    #[serde(default)]
    pub warn: Option<bool>,
    #[serde(default)]
    pub info: Option<bool>,
    #[serde(default)]
    pub debug: Option<bool>,
    #[serde(default)]
    pub trace: Option<bool>,
    #[serde(default)]
    pub search: Option<String>,
}

/// Handler SSE
pub async fn log_sse(
    State(state): State<LogState>,
    Query(params): Query<LogQuery>,
) -> impl IntoResponse {
    let mut rx = state.subscribe();

    let history = state.dump();
    let stream_state = state.clone();
    let current_level = stream_state.get_max_level();

    let stream = async_stream::stream! {
        // 1. Historique filtré par le niveau courant
        for entry in history {
            if !is_level_allowed(&entry.level, current_level) || !filter_entry(&entry, &params) {
                continue;
            }
            if let Ok(json) = serde_json::to_string(&entry) {
                yield Ok::<_, axum::Error>(Event::default().data(json));
            }
        }

        // 2. Puis les nouveaux logs en temps réel
        loop {
            let entry = match rx.recv().await {
                Ok(entry) => entry,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let max_level = stream_state.get_max_level();
            if !is_level_allowed(&entry.level, max_level) || !filter_entry(&entry, &params) {
                continue;
            }
            if let Ok(json) = serde_json::to_string(&entry) {
                yield Ok::<_, axum::Error>(Event::default().data(json));
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Handler REST (dump JSON du buffer)
pub async fn log_dump(State(state): State<LogState>) -> impl IntoResponse {
    Json(state.dump())
}

/// Vérifie si un niveau de log est autorisé selon le niveau maximum configuré
fn is_level_allowed(log_level: &str, max_level: Level) -> bool {
    // ERROR < WARN < INFO < DEBUG < TRACE en verbosité
    match string_to_level(log_level) {
        Some(level) => level <= max_level,
        None => false,
    }
}

/// Fonction de filtrage
fn filter_entry(entry: &LogEntry, q: &LogQuery) -> bool {
    let lvl = entry.level.to_lowercase();
    let flags = [
        (q.error, "error"),
        (q.warn, "warn"),
        (q.info, "info"),
        (q.debug, "debug"),
        (q.trace, "trace"),
    ];

    let any_flag = flags.iter().any(|(flag, _)| flag.unwrap_or(false));
    // si aucun flag → tout est autorisé
    let mut allowed = !any_flag
        || flags
            .iter()
            .any(|(flag, name)| flag.unwrap_or(false) && lvl == *name);

    if let Some(search) = &q.search {
        allowed &= entry.message.contains(search.as_str()) || entry.target.contains(search.as_str());
    }

    allowed
}

/// Options d'initialisation du système de logging
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Capacité du buffer circulaire (nombre d'entrées conservées)
    pub buffer_capacity: usize,
    /// Activer la sortie vers stderr/stdout
    pub enable_console: bool,
    /// Niveau minimum (ERROR, WARN, INFO, DEBUG, TRACE)
    pub min_level: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: 1000,
            enable_console: true,
            min_level: "INFO".to_string(),
        }
    }
}

impl LoggingOptions {
    /// Options lues depuis la section `host.logger` de la configuration
    pub fn from_config(config: &Config) -> Self {
        let defaults = Self::default();
        Self {
            buffer_capacity: config
                .get_log_cache_size()
                .unwrap_or(defaults.buffer_capacity),
            enable_console: config
                .get_log_enable_console()
                .unwrap_or(defaults.enable_console),
            min_level: config.get_log_min_level().unwrap_or(defaults.min_level),
        }
    }
}

/// Initialise le système de logging avec SSE et optionnellement la console
///
/// Le niveau de base vient de `options.min_level` et reste modifiable à
/// chaud via [`LogState::set_max_level`]. Si `RUST_LOG` est défini, un
/// `EnvFilter` supplémentaire affine le filtrage par cible.
///
/// Si un subscriber global est déjà installé (tests), le `LogState` est
/// retourné sans être branché.
///
/// ```rust,no_run
/// use pmoserver::logs::{init_logging, LoggingOptions};
///
/// let log_state = init_logging(LoggingOptions::default());
/// ```
pub fn init_logging(options: LoggingOptions) -> LogState {
    let level = string_to_level(&options.min_level).unwrap_or(Level::INFO);
    let (filter, reload_handle) = reload::Layer::new(LevelFilter::from_level(level));

    let log_state = LogState::new(options.buffer_capacity, Some(reload_handle));
    if let Ok(mut current) = log_state.max_level.write() {
        *current = level;
    }

    // Le filtre rechargeable doit être appliqué en premier
    let subscriber = Registry::default()
        .with(filter)
        .with(EnvFilter::try_from_default_env().ok())
        .with(SseLayer::new(log_state.clone()));

    let console = options.enable_console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_ansi(true)
    });

    if let Err(e) = subscriber.with(console).try_init() {
        eprintln!("Logging already initialized: {}", e);
    }

    log_state
}

/// Request body pour la configuration du logging
#[derive(Debug, Deserialize)]
pub struct LogSetupRequest {
    pub level: String,
}

/// Response pour la configuration du logging
#[derive(Debug, Serialize)]
pub struct LogSetupResponse {
    pub current_level: String,
    pub available_levels: Vec<String>,
}

const AVAILABLE_LEVELS: [&str; 5] = ["ERROR", "WARN", "INFO", "DEBUG", "TRACE"];

fn setup_response(level: Level) -> LogSetupResponse {
    LogSetupResponse {
        current_level: level.as_str().to_string(),
        available_levels: AVAILABLE_LEVELS.iter().map(|l| l.to_string()).collect(),
    }
}

/// Handler pour GET /api/log_setup - retourne la configuration actuelle
pub async fn log_setup_get(State(state): State<LogState>) -> impl IntoResponse {
    Json(setup_response(state.get_max_level()))
}

/// Handler pour POST /api/log_setup - met à jour le niveau de log
pub async fn log_setup_post(
    State(state): State<LogState>,
    Json(payload): Json<LogSetupRequest>,
) -> impl IntoResponse {
    let Some(level) = string_to_level(&payload.level) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "Invalid log level. Must be one of: ERROR, WARN, INFO, DEBUG, TRACE"
            })),
        )
            .into_response();
    };

    state.set_max_level(level);
    tracing::info!("Log level changed to: {}", payload.level);

    (StatusCode::OK, Json(setup_response(level))).into_response()
}

fn string_to_level(s: &str) -> Option<Level> {
    match s.trim().to_uppercase().as_str() {
        "ERROR" => Some(Level::ERROR),
        "WARN" => Some(Level::WARN),
        "INFO" => Some(Level::INFO),
        "DEBUG" => Some(Level::DEBUG),
        "TRACE" => Some(Level::TRACE),
        _ => None,
    }
}

/// Crée le router pour l'API de gestion des logs
pub fn create_logs_router(log_state: LogState) -> axum::Router {
    use axum::routing::get;
    axum::Router::new()
        .route("/log_setup", get(log_setup_get).post(log_setup_post))
        .with_state(log_state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: &str, target: &str, message: &str) -> LogEntry {
        LogEntry {
            timestamp: SystemTime::now(),
            level: level.to_string(),
            target: target.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_ring_buffer_keeps_latest_entries() {
        let state = LogState::new(2, None);
        state.push(entry("INFO", "a", "one"));
        state.push(entry("INFO", "a", "two"));
        state.push(entry("INFO", "a", "three"));

        let dump = state.dump();
        assert_eq!(dump.len(), 2);
        assert_eq!(dump[0].message, "two");
        assert_eq!(dump[1].message, "three");
    }

    #[test]
    fn test_level_ordering() {
        assert!(is_level_allowed("ERROR", Level::WARN));
        assert!(is_level_allowed("warn", Level::WARN));
        assert!(!is_level_allowed("INFO", Level::WARN));
        assert!(is_level_allowed("TRACE", Level::TRACE));
        assert!(!is_level_allowed("bogus", Level::TRACE));
    }

    #[test]
    fn test_filter_entry_flags_and_search() {
        let e = entry("WARN", "pmobroadcast::pacer", "skipping missing.mp3");

        assert!(filter_entry(&e, &LogQuery::default()));

        let only_errors = LogQuery {
            error: Some(true),
            ..Default::default()
        };
        assert!(!filter_entry(&e, &only_errors));

        let warn_and_search = LogQuery {
            warn: Some(true),
            search: Some("missing".into()),
            ..Default::default()
        };
        assert!(filter_entry(&e, &warn_and_search));

        let search_target = LogQuery {
            search: Some("pacer".into()),
            ..Default::default()
        };
        assert!(filter_entry(&e, &search_target));
    }

    #[test]
    fn test_set_max_level_without_reload_handle() {
        let state = LogState::new(10, None);
        state.set_max_level(Level::DEBUG);
        assert_eq!(state.get_max_level(), Level::DEBUG);
    }

    #[tokio::test]
    async fn test_push_is_broadcast_to_subscribers() {
        let state = LogState::new(10, None);
        let mut rx = state.subscribe();
        state.push(entry("INFO", "t", "hello"));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.message, "hello");
    }
}
