use crate::config::ConnectionConfig;
use crate::ldap::{LdapCodec, LdapMessage};
use crate::{LdapMuxError, Result};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{self, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// Any ordered byte stream a session can run over.
pub trait LdapStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> LdapStream for T {}

/// Receives everything the reader task decodes.
///
/// Both callbacks run on the reader task and must not block.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, message: LdapMessage);

    /// The stream ended or failed without the session being shut down.
    fn on_closed(&self);
}

type Writer = SplitSink<Framed<Box<dyn LdapStream>, LdapCodec>, LdapMessage>;

/// A framed connection to one server with its own reader task.
pub struct TransportSession {
    writer: Mutex<Writer>,
    reader: JoinHandle<()>,
    open: Arc<AtomicBool>,
    peer: String,
}

impl TransportSession {
    /// Installs the codec on `stream` and spawns the reader task.
    pub fn start(stream: Box<dyn LdapStream>, peer: String, handler: Arc<dyn MessageHandler>) -> Self {
        let (writer, mut frames) = Framed::new(stream, LdapCodec::new()).split();
        let open = Arc::new(AtomicBool::new(true));

        let reader_open = Arc::clone(&open);
        let reader_peer = peer.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(message) => {
                        debug!(
                            "Received {} for message {} from {}",
                            message.protocol_op.name(),
                            message.message_id,
                            reader_peer
                        );
                        handler.on_message(message);
                    }
                    Err(e) => {
                        error!("Transport error on connection to {}: {}", reader_peer, e);
                        break;
                    }
                }
            }

            if reader_open.swap(false, Ordering::SeqCst) {
                info!("Connection to {} closed by peer", reader_peer);
                handler.on_closed();
            }
        });

        Self {
            writer: Mutex::new(writer),
            reader,
            open,
            peer,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Encodes and writes one message, flushing it to the socket.
    pub async fn send(&self, message: LdapMessage) -> Result<()> {
        if !self.is_open() {
            return Err(LdapMuxError::ConnectionClosed);
        }

        let mut writer = self.writer.lock().await;
        writer.send(message).await.map_err(|e| {
            error!("Failed to write to {}: {}", self.peer, e);
            LdapMuxError::Io(e)
        })
    }

    /// Stops the reader without notifying the handler and closes the
    /// write half.
    pub async fn shutdown(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.reader.abort();

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.close().await {
            debug!("Error closing connection to {}: {}", self.peer, e);
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Opens a session to the configured server.
///
/// Returns `Ok(None)` when the server refuses or cannot be reached in
/// time. TLS failures are errors.
pub async fn connect(
    config: &ConnectionConfig,
    handler: Arc<dyn MessageHandler>,
) -> Result<Option<TransportSession>> {
    let address = format!("{}:{}", config.host, config.port);
    let timeout = config.timeout();

    let tcp = match time::timeout(timeout, TcpStream::connect(&address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("Could not connect to {}: {}", address, e);
            return Ok(None);
        }
        Err(_) => {
            warn!("Connecting to {} timed out after {:?}", address, timeout);
            return Ok(None);
        }
    };
    tcp.set_nodelay(true)?;

    let stream: Box<dyn LdapStream> = if config.use_tls {
        Box::new(tls_handshake(tcp, &config.host, timeout).await?)
    } else {
        Box::new(tcp)
    };

    info!(
        "Connected to {}{}",
        address,
        if config.use_tls { " over TLS" } else { "" }
    );
    Ok(Some(TransportSession::start(stream, address, handler)))
}

fn tls_connector() -> Result<TlsConnector> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config =
        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| LdapMuxError::Tls(format!("Unusable TLS configuration: {}", e)))?
            .with_root_certificates(roots)
            .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

async fn tls_handshake(tcp: TcpStream, host: &str, timeout: Duration) -> Result<TlsStream<TcpStream>> {
    let connector = tls_connector()?;
    let server_name = ServerName::try_from(host.to_owned())
        .map_err(|e| LdapMuxError::Tls(format!("Invalid server name {}: {}", host, e)))?;

    match time::timeout(timeout, connector.connect(server_name, tcp)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(LdapMuxError::Tls(format!("Handshake with {} failed: {}", host, e))),
        Err(_) => Err(LdapMuxError::Tls(format!(
            "Handshake with {} timed out after {:?}",
            host, timeout
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ldap::LdapProtocolOp;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;

    struct Recorder {
        messages: mpsc::UnboundedSender<LdapMessage>,
        closed: AtomicUsize,
    }

    impl MessageHandler for Recorder {
        fn on_message(&self, message: LdapMessage) {
            let _ = self.messages.send(message);
        }

        fn on_closed(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn recorder() -> (Arc<Recorder>, mpsc::UnboundedReceiver<LdapMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder {
            messages: tx,
            closed: AtomicUsize::new(0),
        });
        (recorder, rx)
    }

    #[tokio::test]
    async fn test_messages_flow_both_ways() {
        let (client, server) = tokio::io::duplex(4096);
        let (handler, mut received) = recorder();
        let session = TransportSession::start(Box::new(client), "duplex".to_string(), handler.clone());
        let mut server = Framed::new(server, LdapCodec::new());

        session
            .send(LdapMessage::new(4, LdapProtocolOp::AbandonRequest { message_id: 2 }))
            .await
            .unwrap();
        let written = server.next().await.unwrap().unwrap();
        assert_eq!(written.message_id, 4);

        server
            .send(LdapMessage::new(7, LdapProtocolOp::UnbindRequest))
            .await
            .unwrap();
        let read = received.recv().await.unwrap();
        assert_eq!(read.message_id, 7);
        assert!(session.is_open());
    }

    #[tokio::test]
    async fn test_peer_close_notifies_handler_once() {
        let (client, server) = tokio::io::duplex(4096);
        let (handler, _received) = recorder();
        let session = TransportSession::start(Box::new(client), "duplex".to_string(), handler.clone());

        drop(server);
        for _ in 0..50 {
            if !session.is_open() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!session.is_open());
        assert_eq!(handler.closed.load(Ordering::SeqCst), 1);
        assert!(matches!(
            session.send(LdapMessage::new(1, LdapProtocolOp::UnbindRequest)).await,
            Err(LdapMuxError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_does_not_notify_handler() {
        let (client, _server) = tokio::io::duplex(4096);
        let (handler, _received) = recorder();
        let session = TransportSession::start(Box::new(client), "duplex".to_string(), handler.clone());

        session.shutdown().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!session.is_open());
        assert_eq!(handler.closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refused_connect_is_not_an_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = ConnectionConfig::default()
            .with_host("127.0.0.1")
            .with_port(port)
            .with_timeout(Duration::from_millis(500));
        let (handler, _received) = recorder();
        assert!(connect(&config, handler).await.unwrap().is_none());
    }
}
