//! Implémentation de [`BroadcastServerExt`](crate::BroadcastServerExt) pour
//! `pmoserver::Server`

use anyhow::Result;
use pmoserver::Server;
use tracing::info;

use crate::http::{status_handler, stream_handler};
use crate::pmoserver_ext::BroadcastServerExt;
use crate::station::Station;

impl BroadcastServerExt for Server {
    async fn init_broadcast(&mut self, station: Station) -> Result<()> {
        station.options().validate()?;
        let mount = station.options().mount.clone();

        self.add_handler_with_state(&mount, stream_handler, station.clone())
            .await;
        self.add_handler_with_state("/status", status_handler, station)
            .await;

        info!("Broadcast mounted at {} (status at /status)", mount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BroadcastOptions, FileTrackOpener, PassthroughDecoder, Playlist};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use pmoserver::ServerBuilder;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_routes_are_registered() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp3"), vec![1u8; 16]).unwrap();
        let playlist = Playlist::from_entries(vec![dir.path().join("a.mp3")]).unwrap();
        let options = BroadcastOptions {
            mount: "/live".into(),
            tick: Duration::from_millis(10),
            chunk_size: 8,
            ..Default::default()
        };
        let opener = Arc::new(FileTrackOpener::new(8, Arc::new(PassthroughDecoder::new())));
        let station = Station::start(options, playlist, opener).unwrap();

        let mut server = ServerBuilder::new("Test").build();
        server.init_broadcast(station.clone()).await.unwrap();
        let router = server.router().await;

        let response = router
            .clone()
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["mount"], "/live");

        let response = router
            .oneshot(Request::get("/live").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
        drop(response);

        station.shutdown().await;
    }
}
