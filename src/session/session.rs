//! Packet session
//!
//! Owns the two worker tasks and both queues for one connection. The consumer
//! calls `send` and `drain_and_dispatch` on its own cadence (typically once
//! per simulation tick); transmission and receipt happen asynchronously on
//! the workers.

use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::worker::{recv_loop, send_loop, InboundEvent};
use super::{ErrorPolicy, SessionConfig, SessionRole};
use crate::protocol::{encode_frame, CodecError, EntityState, FrameReader, InputState, Message, PacketKind, RawFrame};

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("transport error: {0}")]
    TransportError(#[from] io::Error),

    #[error("transport closed")]
    TransportClosed,

    #[error("workers did not stop before the shutdown deadline")]
    ShutdownTimeout,

    #[error("{kind:?} frames are not {role:?}-bound")]
    Rejected {
        kind: PacketKind,
        role: SessionRole,
    },
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Consumer callbacks for decoded inbound messages.
///
/// Invoked only from the thread that calls `drain_and_dispatch`, in exact
/// wire arrival order.
pub trait Dispatch {
    fn on_lockstep(&mut self, seq: u16, input: InputState);
    fn on_snapshot(&mut self, seq: u16, states: Vec<EntityState>);
    fn on_sync(&mut self, seq: u16, inputs: Vec<InputState>, states: Vec<EntityState>);
    fn on_ack(&mut self, ack: u16);
}

/// Result of one `drain_and_dispatch` call.
#[derive(Debug, Default)]
pub struct DrainOutcome {
    /// Frames decoded and handed to the dispatcher
    pub dispatched: usize,
    /// Frames dropped under `ErrorPolicy::SkipFrame`
    pub skipped: usize,
    /// The connection is down; no further frames will arrive
    pub closed: bool,
    /// Why the connection went down, when it was not a clean close
    pub close_error: Option<SessionError>,
}

/// A clonable handle for enqueueing outbound messages.
///
/// Obtained from the session at connection time and passed to whatever code
/// needs to send; encoding happens on the caller, transmission on the send
/// worker.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    outbound: mpsc::UnboundedSender<Bytes>,
    connected: Arc<AtomicBool>,
    max_frame_size: usize,
}

impl SessionHandle {
    /// Encode `msg` into a finalized frame and enqueue it for transmission.
    /// Returns immediately; buffers are sent strictly in enqueue order.
    pub fn send(&self, msg: &Message) -> SessionResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SessionError::TransportClosed);
        }

        let frame = encode_frame(msg, self.max_frame_size)?;
        self.outbound
            .send(frame)
            .map_err(|_| SessionError::TransportClosed)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// A duplex packet session over one connected stream.
pub struct PacketSession {
    role: SessionRole,
    policy: ErrorPolicy,
    handle: SessionHandle,
    inbound: mpsc::UnboundedReceiver<InboundEvent>,
    shutdown_tx: watch::Sender<bool>,
    recv_task: JoinHandle<()>,
    send_task: JoinHandle<()>,
    shutdown_timeout: Duration,
    queue_warn_depth: usize,
    closed: bool,
}

impl PacketSession {
    /// Start a session over the two halves of an already-connected stream.
    ///
    /// Socket creation and connection establishment are the caller's job;
    /// the session never closes a transport it did not open beyond dropping
    /// its halves on shutdown. Spawns the receive and send workers.
    pub fn spawn<R, W>(read: R, write: W, role: SessionRole, config: SessionConfig) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connected = Arc::new(AtomicBool::new(true));

        let reader = FrameReader::new(read, config.max_frame_size);
        let recv_task = tokio::spawn(recv_loop(reader, inbound_tx.clone(), shutdown_rx.clone()));
        let send_task = tokio::spawn(send_loop(
            write,
            outbound_rx,
            inbound_tx,
            connected.clone(),
            shutdown_rx,
            config.queue_warn_depth,
        ));

        tracing::debug!(?role, "packet session started");

        Self {
            role,
            policy: config.error_policy,
            handle: SessionHandle {
                outbound: outbound_tx,
                connected,
                max_frame_size: config.max_frame_size,
            },
            inbound: inbound_rx,
            shutdown_tx,
            recv_task,
            send_task,
            shutdown_timeout: Duration::from_millis(config.shutdown_timeout_ms),
            queue_warn_depth: config.queue_warn_depth,
            closed: false,
        }
    }

    /// Start a session over a connected TCP stream.
    pub fn from_stream(stream: TcpStream, role: SessionRole, config: SessionConfig) -> Self {
        let (read, write) = stream.into_split();
        Self::spawn(read, write, role, config)
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    /// A clonable sending handle for this session.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Encode and enqueue one message for transmission.
    pub fn send(&self, msg: &Message) -> SessionResult<()> {
        self.handle.send(msg)
    }

    pub fn is_connected(&self) -> bool {
        !self.closed && self.handle.is_connected()
    }

    /// Pop every inbound frame queued at the moment of the call, decode each
    /// by type id, and route it to the dispatcher. Non-blocking; frames that
    /// arrive during the call are left for the next one.
    ///
    /// Per-frame decode failures and frames not bound for this session's
    /// role follow the configured `ErrorPolicy`. A terminal close event sets
    /// `closed` on the outcome (with the cause, if any) so the consumer can
    /// shut the session down.
    pub fn drain_and_dispatch(&mut self, dispatch: &mut dyn Dispatch) -> SessionResult<DrainOutcome> {
        let mut outcome = DrainOutcome {
            closed: self.closed,
            ..Default::default()
        };

        let backlog = self.inbound.len();
        if backlog >= self.queue_warn_depth {
            tracing::warn!(backlog, "inbound queue backlog past warning depth");
        }

        loop {
            match self.inbound.try_recv() {
                Ok(InboundEvent::Frame(frame)) => {
                    match self.dispatch_frame(&frame, dispatch) {
                        Ok(()) => outcome.dispatched += 1,
                        Err(e) => match self.policy {
                            ErrorPolicy::FailFast => return Err(e),
                            ErrorPolicy::SkipFrame => {
                                tracing::warn!(error = %e, "skipping inbound frame");
                                outcome.skipped += 1;
                            }
                        },
                    }
                }
                Ok(InboundEvent::Closed { error }) => {
                    self.closed = true;
                    self.handle.connected.store(false, Ordering::SeqCst);
                    outcome.closed = true;

                    if let Some(e) = error {
                        if self.policy == ErrorPolicy::FailFast {
                            return Err(e);
                        }
                        tracing::warn!(error = %e, "session closed");
                        outcome.close_error = Some(e);
                    }
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.closed = true;
                    outcome.closed = true;
                    break;
                }
            }
        }

        Ok(outcome)
    }

    fn dispatch_frame(&self, frame: &RawFrame, dispatch: &mut dyn Dispatch) -> SessionResult<()> {
        let kind = frame.kind()?;
        if !self.role.accepts(kind) {
            return Err(SessionError::Rejected {
                kind,
                role: self.role,
            });
        }

        match frame.decode()? {
            Message::Lockstep { seq, input } => dispatch.on_lockstep(seq, input),
            Message::Snapshot { seq, states } => dispatch.on_snapshot(seq, states),
            Message::Sync {
                seq,
                inputs,
                states,
            } => dispatch.on_sync(seq, inputs, states),
            Message::Ack { ack } => dispatch.on_ack(ack),
        }

        Ok(())
    }

    /// Signal both workers to stop, then join them under the configured
    /// deadline. Safe to call with the transport already closed.
    pub async fn shutdown(self) -> SessionResult<()> {
        let PacketSession {
            handle,
            shutdown_tx,
            recv_task,
            send_task,
            shutdown_timeout,
            ..
        } = self;

        handle.connected.store(false, Ordering::SeqCst);
        let _ = shutdown_tx.send(true);

        let recv_abort = recv_task.abort_handle();
        let send_abort = send_task.abort_handle();
        let join = async {
            let _ = recv_task.await;
            let _ = send_task.await;
        };

        if tokio::time::timeout(shutdown_timeout, join).await.is_err() {
            // A worker is stuck in transport I/O; tearing the tasks down
            // drops their stream halves and closes the transport.
            recv_abort.abort();
            send_abort.abort();
            return Err(SessionError::ShutdownTimeout);
        }

        tracing::debug!("packet session stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_MAX_FRAME_SIZE;
    use bytes::BufMut;
    use tokio::io::AsyncWriteExt;

    /// Route worker and drain logs through the test harness output.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    }

    #[derive(Default)]
    struct Recorder {
        locksteps: Vec<(u16, InputState)>,
        snapshots: Vec<(u16, Vec<EntityState>)>,
        syncs: Vec<(u16, usize, usize)>,
        acks: Vec<u16>,
    }

    impl Dispatch for Recorder {
        fn on_lockstep(&mut self, seq: u16, input: InputState) {
            self.locksteps.push((seq, input));
        }

        fn on_snapshot(&mut self, seq: u16, states: Vec<EntityState>) {
            self.snapshots.push((seq, states));
        }

        fn on_sync(&mut self, seq: u16, inputs: Vec<InputState>, states: Vec<EntityState>) {
            self.syncs.push((seq, inputs.len(), states.len()));
        }

        fn on_ack(&mut self, ack: u16) {
            self.acks.push(ack);
        }
    }

    fn session_pair(config: SessionConfig) -> (PacketSession, PacketSession) {
        let (server_stream, client_stream) = tokio::io::duplex(64 * 1024);
        let (sr, sw) = tokio::io::split(server_stream);
        let (cr, cw) = tokio::io::split(client_stream);

        let server = PacketSession::spawn(sr, sw, SessionRole::Server, config.clone());
        let client = PacketSession::spawn(cr, cw, SessionRole::Client, config);
        (server, client)
    }

    /// Drain until `want` callbacks have fired or the session closes.
    async fn drain_until(
        session: &mut PacketSession,
        recorder: &mut Recorder,
        want: usize,
    ) -> DrainOutcome {
        let mut total = DrainOutcome::default();
        for _ in 0..200 {
            let outcome = session.drain_and_dispatch(recorder).unwrap();
            total.dispatched += outcome.dispatched;
            total.skipped += outcome.skipped;
            total.closed |= outcome.closed;
            if total.dispatched + total.skipped >= want || total.closed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        total
    }

    #[tokio::test]
    async fn test_lockstep_dispatch_preserves_send_order() {
        let (mut server, client) = session_pair(SessionConfig::default());

        for seq in 1..=20u16 {
            client
                .send(&Message::Lockstep {
                    seq,
                    input: InputState {
                        jump: seq % 2 == 0,
                        ..Default::default()
                    },
                })
                .unwrap();
        }

        let mut recorder = Recorder::default();
        drain_until(&mut server, &mut recorder, 20).await;

        let seqs: Vec<u16> = recorder.locksteps.iter().map(|(s, _)| *s).collect();
        assert_eq!(seqs, (1..=20).collect::<Vec<u16>>());

        client.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplex_exchange() {
        let (mut server, mut client) = session_pair(SessionConfig::default());

        client
            .send(&Message::Lockstep {
                seq: 1,
                input: InputState {
                    left: true,
                    ..Default::default()
                },
            })
            .unwrap();

        let states = vec![
            EntityState {
                position: [1.0, 2.0, 3.0],
                rotation: [0.0, 0.0, 0.0, 1.0],
                velocity: [0.1, 0.2, 0.3],
            },
            EntityState::default(),
        ];
        server
            .send(&Message::Snapshot {
                seq: 1,
                states: states.clone(),
            })
            .unwrap();
        server.send(&Message::Ack { ack: 1 }).unwrap();

        let mut server_side = Recorder::default();
        drain_until(&mut server, &mut server_side, 1).await;
        assert_eq!(server_side.locksteps.len(), 1);
        assert!(server_side.locksteps[0].1.left);

        let mut client_side = Recorder::default();
        drain_until(&mut client, &mut client_side, 2).await;
        assert_eq!(client_side.snapshots, vec![(1, states)]);
        assert_eq!(client_side.acks, vec![1]);

        client.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_backfill_roundtrip() {
        let (server, mut client) = session_pair(SessionConfig::default());

        server
            .send(&Message::Sync {
                seq: 50,
                inputs: vec![InputState::default(); 4],
                states: vec![EntityState::default(); 2],
            })
            .unwrap();

        let mut recorder = Recorder::default();
        drain_until(&mut client, &mut recorder, 1).await;
        assert_eq!(recorder.syncs, vec![(50, 4, 2)]);

        client.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_server_rejects_client_bound_frames() {
        init_tracing();
        let config = SessionConfig {
            error_policy: ErrorPolicy::SkipFrame,
            ..Default::default()
        };
        let (mut server, client) = session_pair(config);

        client
            .send(&Message::Snapshot {
                seq: 1,
                states: Vec::new(),
            })
            .unwrap();
        client.send(&Message::Ack { ack: 3 }).unwrap();

        let mut recorder = Recorder::default();
        let outcome = drain_until(&mut server, &mut recorder, 2).await;

        assert_eq!(outcome.skipped, 1);
        assert_eq!(recorder.snapshots.len(), 0);
        assert_eq!(recorder.acks, vec![3]);

        client.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_fail_fast_surfaces_rejection() {
        let (mut server, client) = session_pair(SessionConfig::default());

        client
            .send(&Message::Sync {
                seq: 1,
                inputs: Vec::new(),
                states: Vec::new(),
            })
            .unwrap();

        let mut recorder = Recorder::default();
        let mut found = None;
        for _ in 0..200 {
            match server.drain_and_dispatch(&mut recorder) {
                Ok(outcome) if outcome.dispatched == 0 && !outcome.closed => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                Ok(outcome) => panic!("expected rejection, got {outcome:?}"),
                Err(e) => {
                    found = Some(e);
                    break;
                }
            }
        }
        let err = found.expect("rejection never surfaced");
        assert!(matches!(
            err,
            SessionError::Rejected {
                kind: PacketKind::Sync,
                role: SessionRole::Server,
            }
        ));

        client.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_truncated_frame_skipped_under_policy() {
        let config = SessionConfig {
            error_policy: ErrorPolicy::SkipFrame,
            ..Default::default()
        };

        let (stream, peer) = tokio::io::duplex(1024);
        let (read, write) = tokio::io::split(stream);
        let mut session = PacketSession::spawn(read, write, SessionRole::Client, config);
        let (_peer_read, mut peer_write) = tokio::io::split(peer);

        // Snapshot frame declaring 5 states but carrying none
        let mut wire = bytes::BytesMut::new();
        wire.put_u16_le(8); // total
        wire.put_u16_le(1); // Snapshot
        wire.put_u16_le(2); // seq
        wire.put_u16_le(5); // state count
        peer_write.write_all(&wire).await.unwrap();

        // Then a healthy ack
        let frame = encode_frame(&Message::Ack { ack: 9 }, DEFAULT_MAX_FRAME_SIZE).unwrap();
        peer_write.write_all(&frame).await.unwrap();

        let mut recorder = Recorder::default();
        let outcome = drain_until(&mut session, &mut recorder, 2).await;

        assert_eq!(outcome.skipped, 1);
        assert_eq!(recorder.acks, vec![9]);

        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_drain_past_queue_warn_depth() {
        init_tracing();
        let config = SessionConfig {
            queue_warn_depth: 4,
            ..Default::default()
        };
        let (mut server, client) = session_pair(config);

        for seq in 1..=16u16 {
            client
                .send(&Message::Lockstep {
                    seq,
                    input: InputState::default(),
                })
                .unwrap();
        }

        // Let the backlog build before the first drain
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut recorder = Recorder::default();
        let outcome = drain_until(&mut server, &mut recorder, 16).await;
        assert_eq!(outcome.dispatched, 16);

        client.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_times_out_on_stuck_writer() {
        let config = SessionConfig {
            shutdown_timeout_ms: 100,
            ..Default::default()
        };

        // Tiny pipe the peer never drains: the send worker wedges in write_all
        let (stream, peer) = tokio::io::duplex(16);
        let (read, write) = tokio::io::split(stream);
        let session = PacketSession::spawn(read, write, SessionRole::Client, config);

        session
            .send(&Message::Snapshot {
                seq: 1,
                states: vec![EntityState::default(); 4],
            })
            .unwrap();

        // Give the send worker time to pop the buffer and stall mid-write
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = session.shutdown().await.unwrap_err();
        assert!(matches!(err, SessionError::ShutdownTimeout));
        drop(peer);
    }

    #[tokio::test]
    async fn test_clean_close_surfaces_to_consumer() {
        let (server, mut client) = session_pair(SessionConfig::default());

        server.shutdown().await.unwrap();

        let mut recorder = Recorder::default();
        let outcome = drain_until(&mut client, &mut recorder, 1).await;
        assert!(outcome.closed);
        assert!(!client.is_connected());

        client.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_shutdown_fails() {
        let (server, client) = session_pair(SessionConfig::default());

        let handle = client.handle();
        client.shutdown().await.unwrap();

        let err = handle.send(&Message::Ack { ack: 1 }).unwrap_err();
        assert!(matches!(err, SessionError::TransportClosed));

        server.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_tcp_loopback_session() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            PacketSession::from_stream(stream, SessionRole::Server, SessionConfig::default())
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let client = PacketSession::from_stream(stream, SessionRole::Client, SessionConfig::default());
        let mut server = accept.await.unwrap();

        client
            .send(&Message::Lockstep {
                seq: 77,
                input: InputState {
                    down: true,
                    ..Default::default()
                },
            })
            .unwrap();

        let mut recorder = Recorder::default();
        drain_until(&mut server, &mut recorder, 1).await;
        assert_eq!(recorder.locksteps.len(), 1);
        assert_eq!(recorder.locksteps[0].0, 77);
        assert!(recorder.locksteps[0].1.down);

        client.shutdown().await.unwrap();
        server.shutdown().await.unwrap();
    }
}
