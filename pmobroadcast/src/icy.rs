//! ICY raw-socket listener
//!
//! Old Shoutcast-style clients expect an `ICY 200 OK` status line instead of
//! an HTTP one. Each accepted connection gets its own [`ListenerSession`];
//! the read half is only watched for the peer hanging up.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::station::Station;

const MAX_REQUEST_HEAD: usize = 8 * 1024;
const REQUEST_HEAD_TIMEOUT: Duration = Duration::from_secs(1);

pub struct IcyListener {
    listener: TcpListener,
    station: Station,
}

impl IcyListener {
    pub async fn bind(addr: SocketAddr, station: Station) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })?;
        Ok(Self { listener, station })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until `shutdown` fires
    pub async fn serve(self, shutdown: CancellationToken) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("📡 ICY listener on {}", addr);
        }

        loop {
            let (socket, peer) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("ICY accept failed: {}", e);
                        continue;
                    }
                },
            };

            let station = self.station.clone();
            let cancel = shutdown.child_token();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(socket, station, cancel).await {
                    debug!(%peer, "ICY connection ended: {}", e);
                }
            });
        }

        debug!("ICY listener stopped");
    }
}

/// Reads and discards the request head, up to the blank line
///
/// Some clients send nothing before expecting data, so a timeout is not an
/// error.
async fn read_request_head<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(512);
    let mut buf = [0u8; 512];
    let read = async {
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                return Err(std::io::ErrorKind::UnexpectedEof.into());
            }
            head.extend_from_slice(&buf[..n]);
            if head.windows(4).any(|w| w == b"\r\n\r\n") || head.windows(2).any(|w| w == b"\n\n")
            {
                return Ok(());
            }
            if head.len() > MAX_REQUEST_HEAD {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "request head too large",
                ));
            }
        }
    };
    match tokio::time::timeout(REQUEST_HEAD_TIMEOUT, read).await {
        Ok(res) => res,
        Err(_) => Ok(()),
    }
}

fn response_head(station: &Station) -> String {
    let options = station.options();
    format!(
        "ICY 200 OK\r\nContent-Type: {}\r\nCache-Control: no-cache\r\nicy-name: {}\r\nicy-br: {}\r\n\r\n",
        options.content_type,
        options.name,
        options.bitrate_kbps().round() as u64
    )
}

async fn handle_connection(
    socket: TcpStream,
    station: Station,
    cancel: CancellationToken,
) -> Result<()> {
    let (mut reader, mut writer) = socket.into_split();
    read_request_head(&mut reader).await?;

    if station.is_shut_down() {
        return Ok(());
    }

    writer.write_all(response_head(&station).as_bytes()).await?;
    writer.flush().await?;

    let session = station.listen();

    // Fin de lecture = client parti
    let hangup = cancel.clone();
    let watcher = tokio::spawn(async move {
        let mut sink = [0u8; 256];
        loop {
            match reader.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
        hangup.cancel();
    });

    let report = session.run(writer, cancel).await;
    watcher.abort();
    debug!(?report, "ICY listener finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::BroadcastOptions;
    use crate::playlist::Playlist;
    use crate::track_source::FileTrackOpener;
    use crate::PassthroughDecoder;
    use std::sync::Arc;

    async fn station(dir: &std::path::Path) -> Station {
        std::fs::write(dir.join("a.mp3"), vec![b'z'; 64]).unwrap();
        let playlist = Playlist::from_entries(vec![dir.join("a.mp3")]).unwrap();
        let options = BroadcastOptions {
            name: "Test FM".into(),
            tick: Duration::from_millis(5),
            chunk_size: 16,
            ..Default::default()
        };
        let opener = Arc::new(FileTrackOpener::new(
            options.chunk_size,
            Arc::new(PassthroughDecoder::new()),
        ));
        Station::start(options, playlist, opener).unwrap()
    }

    async fn wait_for_listeners(station: &Station, expected: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while station.registry().current() != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_icy_handshake_and_audio() {
        let dir = tempfile::tempdir().unwrap();
        let station = station(dir.path()).await;
        let listener = IcyListener::bind("127.0.0.1:0".parse().unwrap(), station.clone())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(listener.serve(shutdown.clone()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET / HTTP/1.0\r\nIcy-MetaData: 0\r\n\r\n")
            .await
            .unwrap();

        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        tokio::time::timeout(Duration::from_secs(2), async {
            while !received.windows(4).any(|w| w == b"\r\n\r\n")
                || received.iter().filter(|b| **b == b'z').count() < 16
            {
                let n = client.read(&mut buf).await.unwrap();
                assert!(n > 0);
                received.extend_from_slice(&buf[..n]);
            }
        })
        .await
        .unwrap();

        let text = String::from_utf8_lossy(&received);
        assert!(text.starts_with("ICY 200 OK\r\n"));
        assert!(text.contains("Content-Type: audio/mpeg\r\n"));
        assert!(text.contains("Cache-Control: no-cache\r\n"));
        assert!(text.contains("icy-name: Test FM\r\n"));
        let split = text.find("\r\n\r\n").unwrap() + 4;
        assert!(received[split..].iter().all(|b| *b == b'z'));
        wait_for_listeners(&station, 1).await;

        drop(client);
        wait_for_listeners(&station, 0).await;

        shutdown.cancel();
        server.await.unwrap();
        station.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let station = station(dir.path()).await;
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();

        let res = IcyListener::bind(addr, station.clone()).await;
        assert!(matches!(res, Err(Error::Bind { .. })));
        station.shutdown().await;
    }
}
