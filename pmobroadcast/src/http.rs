//! Handlers HTTP du flux radio
//!
//! `GET {mount}` renvoie un corps de longueur indéfinie alimenté par une
//! [`ListenerSession`](crate::ListenerSession) ; `GET /status` expose
//! l'état de la station en JSON.

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::stream::{self, StreamExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::station::{Station, StationStatus};

/// Tampon entre la session et le corps de la réponse
const STREAM_BUFFER: usize = 64 * 1024;

/// Flux audio continu pour un auditeur
///
/// Pas de `Content-Length` : le corps ne se termine qu'à la déconnexion du
/// client ou à l'arrêt de la station.
pub async fn stream_handler(State(station): State<Station>) -> Response {
    if station.is_shut_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "station stopped").into_response();
    }

    let session = station.listen();
    if station.is_shut_down() {
        drop(session);
        return (StatusCode::SERVICE_UNAVAILABLE, "station stopped").into_response();
    }

    let (writer, reader) = tokio::io::duplex(STREAM_BUFFER);
    let cancel = CancellationToken::new();
    let id = session.id();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let report = session.run(writer, cancel).await;
            debug!(listener = id, ?report, "HTTP listener finished");
        }
    });

    // Le corps porte le garde : sa destruction (client parti) annule la session
    let guard = cancel.drop_guard();
    let body = stream::unfold(
        (ReaderStream::new(reader), guard),
        |(mut chunks, guard)| async move {
            chunks.next().await.map(|item| (item, (chunks, guard)))
        },
    );

    let options = station.options();
    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, options.content_type.as_str())
        .header(header::CACHE_CONTROL, "no-cache, no-store")
        .header("icy-name", options.name.as_str())
        .body(Body::from_stream(body))
    {
        Ok(response) => response,
        Err(e) => {
            warn!("Cannot build stream response: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn status_handler(State(station): State<Station>) -> Json<StationStatus> {
    Json(station.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::BroadcastOptions;
    use crate::playlist::Playlist;
    use crate::track_source::FileTrackOpener;
    use crate::PassthroughDecoder;
    use axum::{Router, body::to_bytes, http::Request, routing::get};
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn station(dir: &std::path::Path) -> Station {
        std::fs::write(dir.join("a.mp3"), vec![b'a'; 32]).unwrap();
        let playlist = Playlist::from_entries(vec![dir.join("a.mp3")]).unwrap();
        let options = BroadcastOptions {
            tick: Duration::from_millis(5),
            chunk_size: 8,
            ..Default::default()
        };
        let opener = Arc::new(FileTrackOpener::new(
            options.chunk_size,
            Arc::new(PassthroughDecoder::new()),
        ));
        Station::start(options, playlist, opener).unwrap()
    }

    fn app(station: Station) -> Router {
        Router::new()
            .route("/stream", get(stream_handler))
            .route("/status", get(status_handler))
            .with_state(station)
    }

    #[tokio::test]
    async fn test_stream_headers_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let station = station(dir.path()).await;

        let response = app(station.clone())
            .oneshot(Request::get("/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
        assert_eq!(response.headers()["icy-name"], "PMORadio");
        assert!(response.headers().get(header::CONTENT_LENGTH).is_none());

        let mut body = response.into_body().into_data_stream();
        let first = tokio::time::timeout(Duration::from_secs(1), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!first.is_empty());
        assert!(first.iter().all(|b| *b == b'a'));
        assert_eq!(station.registry().current(), 1);

        // Déconnexion du client
        drop(body);
        tokio::time::timeout(Duration::from_secs(1), async {
            while station.registry().current() != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(station.distributor().subscriber_count(), 0);

        station.shutdown().await;
    }

    #[tokio::test]
    async fn test_stream_ends_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let station = station(dir.path()).await;

        let response = app(station.clone())
            .oneshot(Request::get("/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        station.shutdown().await;

        let body = tokio::time::timeout(
            Duration::from_secs(2),
            to_bytes(response.into_body(), usize::MAX),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(body.iter().all(|b| *b == b'a'));
        tokio::time::timeout(Duration::from_secs(1), async {
            while station.registry().current() != 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let response = app(station)
            .oneshot(Request::get("/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_status_reports_listeners() {
        let dir = tempfile::tempdir().unwrap();
        let station = station(dir.path()).await;
        let _session = station.listen();

        let response = app(station.clone())
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["listeners"]["current"], 1);
        assert_eq!(json["mount"], "/stream");
        assert_eq!(json["chunk_size"], 8);

        station.shutdown().await;
    }
}
