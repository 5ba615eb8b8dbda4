use crate::Error;
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use waypoint_wire::{CompressionOptions, Frame, FrameCodec};

type BoxedFrameStream = Pin<Box<dyn Stream<Item = Result<Frame, Error>> + Send>>;
type BoxedFrameSink = Pin<Box<dyn Sink<Frame, Error = Error> + Send>>;

/// A dialed, already-split connection: a boxed frame stream and a boxed
/// frame sink, erasing "plain TCP" vs "TLS over TCP" behind
/// `Pin<Box<dyn Stream/Sink>>` once the handshake is done.
pub struct Connection {
    pub reader: BoxedFrameStream,
    pub writer: BoxedFrameSink,
}

impl Connection {
    pub async fn send_and_recv(&mut self, frame: Frame) -> Result<Frame, Error> {
        self.writer.send(frame).await?;
        self.reader
            .next()
            .await
            .ok_or(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed while awaiting response",
            )))?
    }
}

/// Dial `addr`, optionally upgrading to TLS with `tls_config`, and frame the
/// resulting stream with the binary protocol codec.
#[tracing::instrument(skip(tls_config))]
pub async fn connect(
    addr: &str,
    tls_config: Option<Arc<rustls::ClientConfig>>,
    compression: CompressionOptions,
) -> Result<Connection, Error> {
    let tcp = TcpStream::connect(addr).await?;
    tcp.set_nodelay(true)?;

    match tls_config {
        None => {
            let (read_half, write_half) = tokio::io::split(tcp);
            let reader = FramedRead::new(read_half, FrameCodec::new(compression))
                .map(|r| r.map_err(Error::from));
            let writer = FramedWrite::new(write_half, FrameCodec::new(compression))
                .sink_map_err(Error::from);
            Ok(Connection {
                reader: Box::pin(reader),
                writer: Box::pin(writer),
            })
        }
        Some(config) => {
            let server_name = addr
                .rsplit_once(':')
                .map(|(host, _)| host)
                .unwrap_or(addr)
                .to_string();
            let dns_name = rustls::pki_types::ServerName::try_from(server_name)
                .map_err(|_| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid TLS server name")))?;
            let connector = tokio_rustls::TlsConnector::from(config);
            let tls = connector.connect(dns_name, tcp).await?;
            let (read_half, write_half) = tokio::io::split(tls);
            let reader = FramedRead::new(read_half, FrameCodec::new(compression))
                .map(|r| r.map_err(Error::from));
            let writer = FramedWrite::new(write_half, FrameCodec::new(compression))
                .sink_map_err(Error::from);
            Ok(Connection {
                reader: Box::pin(reader),
                writer: Box::pin(writer),
            })
        }
    }
}

/// Build a default client TLS config trusting the platform's web roots.
pub fn default_tls_config() -> Arc<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Arc::new(config)
}
