use crate::auth::{authenticate, Credentials};
use crate::negotiate::{fetch_error_map, say_hello, select_bucket, ErrorMap};
use crate::hello::NegotiatedFeatures;
use crate::transport::{connect, Connection};
use crate::Error;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use waypoint_wire::{CompressionOptions, Frame, Opcode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    TcpConnecting,
    TlsHandshaking,
    Authenticating,
    Negotiating,
    Ready,
    Closing,
    Fatal,
}

/// A server-push frame the caller should act on: currently only cluster-map
/// change notifications, forwarded so `waypoint-topology::Router::update`
/// can be called.
#[derive(Debug, Clone)]
pub enum PushEvent {
    ClustermapChanged { bucket: Option<String>, body: bytes::Bytes },
}

/// What a response carried when it arrived with no caller left waiting for
/// it, handed to an [`OrphanHandler`] so a caller-supplied reporter can
/// record it without this crate depending on one concrete reporter type.
#[derive(Debug, Clone)]
pub struct OrphanedResponseInfo {
    pub opcode: Opcode,
    pub opaque: u32,
    pub peer: String,
}

pub type OrphanHandler = Arc<dyn Fn(OrphanedResponseInfo) + Send + Sync>;

struct Pending {
    table: Mutex<HashMap<u32, oneshot::Sender<Frame>>>,
}

/// One long-lived connection to a single node, scoped to at most one bucket.
/// Owns its own opaque counter and response-correlation table; all request
/// dispatch goes through [`Session::send`], which is safe to call
/// concurrently -- frames are pipelined on the wire and matched back to
/// their caller by opaque, supporting many in-flight requests per
/// connection.
pub struct Session {
    state: Arc<Mutex<SessionState>>,
    /// Frames to write are handed off to a dedicated writer task over this
    /// channel rather than locking the sink directly, so `Session::send` is
    /// a plain non-blocking enqueue: the owning task is the only thing that
    /// ever touches the socket, per the single-owner-task concurrency model.
    writer: mpsc::UnboundedSender<Frame>,
    pending: Arc<Pending>,
    opaque: AtomicU32,
    pub negotiated_features: NegotiatedFeatures,
    pub error_map: ErrorMap,
    push_rx: Mutex<Option<mpsc::UnboundedReceiver<PushEvent>>>,
}

impl Session {
    pub async fn connect(
        addr: &str,
        tls_config: Option<Arc<rustls::ClientConfig>>,
        credentials: &Credentials,
        bucket: Option<&str>,
        client_id: &str,
        compression: CompressionOptions,
    ) -> Result<Session, Error> {
        Self::connect_with_orphan_handler(
            addr, tls_config, credentials, bucket, client_id, compression, None,
        )
        .await
    }

    /// Like [`Session::connect`], but feeds every orphaned response (one
    /// whose opaque no caller is waiting on) to `orphan_handler` instead of
    /// only logging it. Callers that don't care about orphan accounting
    /// (seed dialing, config watchers) keep using `connect`.
    #[tracing::instrument(skip(tls_config, credentials, orphan_handler))]
    pub async fn connect_with_orphan_handler(
        addr: &str,
        tls_config: Option<Arc<rustls::ClientConfig>>,
        credentials: &Credentials,
        bucket: Option<&str>,
        client_id: &str,
        compression: CompressionOptions,
        orphan_handler: Option<OrphanHandler>,
    ) -> Result<Session, Error> {
        let state = Arc::new(Mutex::new(SessionState::TcpConnecting));

        let mut conn = connect(addr, tls_config.clone(), compression).await?;
        *state.lock().unwrap() = if tls_config.is_some() {
            SessionState::TlsHandshaking
        } else {
            SessionState::Authenticating
        };

        *state.lock().unwrap() = SessionState::Authenticating;
        authenticate(&mut conn, credentials).await.map_err(|e| {
            *state.lock().unwrap() = SessionState::Fatal;
            e
        })?;

        *state.lock().unwrap() = SessionState::Negotiating;
        let negotiated_features = say_hello(&mut conn, client_id).await?;
        let error_map = fetch_error_map(&mut conn).await?;
        if let Some(bucket) = bucket {
            select_bucket(&mut conn, bucket).await?;
        }

        *state.lock().unwrap() = SessionState::Ready;

        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let pending = Arc::new(Pending {
            table: Mutex::new(HashMap::new()),
        });
        let Connection { mut reader, mut writer } = conn;
        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Frame>();
        tokio::spawn(async move {
            while let Some(frame) = writer_rx.recv().await {
                if let Err(err) = writer.send(frame).await {
                    tracing::warn!(?err, "session write loop terminated");
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_state = state.clone();
        let peer = addr.to_string();
        tokio::spawn(async move {
            while let Some(result) = reader.next().await {
                match result {
                    Ok(frame) => {
                        dispatch_incoming(frame, &reader_pending, &push_tx, &peer, orphan_handler.as_deref())
                    }
                    Err(err) => {
                        tracing::warn!(?err, "session read loop terminated");
                        break;
                    }
                }
            }
            *reader_state.lock().unwrap() = SessionState::Disconnected;
            // Any request still awaiting a response will never get one; drop
            // every pending sender so callers observe a cancellation instead
            // of hanging forever.
            reader_pending.table.lock().unwrap().clear();
        });

        Ok(Session {
            state,
            writer: writer_tx,
            pending,
            opaque: AtomicU32::new(1),
            negotiated_features,
            error_map,
            push_rx: Mutex::new(Some(push_rx)),
        })
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    /// Take ownership of this session's server-push event stream. Only one
    /// caller may hold it; later calls return `None`.
    pub fn take_push_events(&self) -> Option<mpsc::UnboundedReceiver<PushEvent>> {
        self.push_rx.lock().unwrap().take()
    }

    /// Idempotent opcodes, used by the retry engine to decide whether
    /// `socket_closed_while_in_flight` may be retried.
    pub fn is_idempotent(opcode: Opcode) -> bool {
        matches!(
            opcode,
            Opcode::Get
                | Opcode::Noop
                | Opcode::GetReplica
                | Opcode::Observe
                | Opcode::ObserveSeqno
                | Opcode::GetMeta
                | Opcode::Stat
                | Opcode::GetClusterConfig
                | Opcode::GetRandomKey
                | Opcode::GetCollectionsManifest
                | Opcode::GetCollectionId
                | Opcode::SubdocMultiLookup
        )
    }

    /// Dispatch `frame` (with a fresh opaque assigned) and await its
    /// response, or time out after `timeout`.
    pub async fn send(&self, mut frame: Frame, timeout: Duration) -> Result<Frame, Error> {
        if self.state() != SessionState::Ready {
            return Err(Error::NotReady(self.state()));
        }
        let opaque = self.opaque.fetch_add(1, Ordering::Relaxed);
        frame.opaque = opaque;

        let (tx, rx) = oneshot::channel();
        self.pending.table.lock().unwrap().insert(opaque, tx);

        if self.writer.send(frame).is_err() {
            self.pending.table.lock().unwrap().remove(&opaque);
            return Err(Error::Cancelled);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_canceled)) => Err(Error::Cancelled),
            Err(_elapsed) => {
                self.pending.table.lock().unwrap().remove(&opaque);
                Err(Error::Timeout)
            }
        }
    }

    /// Transition to `Closing`; the writer task exits once this sender (the
    /// last clone of it) drops, which tears the socket down.
    pub fn close(&self) {
        *self.state.lock().unwrap() = SessionState::Closing;
    }
}

fn dispatch_incoming(
    frame: Frame,
    pending: &Pending,
    push_tx: &mpsc::UnboundedSender<PushEvent>,
    peer: &str,
    orphan_handler: Option<&(dyn Fn(OrphanedResponseInfo) + Send + Sync)>,
) {
    if frame.magic == waypoint_wire::Magic::ServerRequest
        && frame.opcode.code() == Opcode::ClustermapChangeNotification.code()
    {
        let bucket = if frame.key.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&frame.key).into_owned())
        };
        let _ = push_tx.send(PushEvent::ClustermapChanged {
            bucket,
            body: frame.value.clone(),
        });
        return;
    }

    let sender = pending.table.lock().unwrap().remove(&frame.opaque);
    match sender {
        Some(sender) => {
            let _ = sender.send(frame);
        }
        None => {
            tracing::debug!(opaque = frame.opaque, "orphaned response: no waiting caller");
            if let Some(handler) = orphan_handler {
                handler(OrphanedResponseInfo {
                    opcode: frame.opcode,
                    opaque: frame.opaque,
                    peer: peer.to_string(),
                });
            }
        }
    }
}
