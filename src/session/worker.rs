//! Receive and send workers
//!
//! One task per direction. The receive worker turns the read half of the
//! stream into a queue of complete frames; the send worker drains finalized
//! send buffers onto the write half, strictly in enqueue order. Both observe
//! a shared shutdown signal between operations, so a worker parked on socket
//! I/O or an empty queue is cancelled within one loop iteration.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use super::session::SessionError;
use crate::protocol::{CodecError, FrameReader, RawFrame};

/// What the receive side delivers to the consumer.
///
/// A `Closed` event is terminal: it is the last event either worker emits,
/// and carries the cause when the close was not clean. Send-side write
/// failures are surfaced here too, so one dead direction never leaves the
/// consumer waiting forever on the other.
#[derive(Debug)]
pub(crate) enum InboundEvent {
    Frame(RawFrame),
    Closed { error: Option<SessionError> },
}

fn close_error(err: CodecError) -> SessionError {
    match err {
        CodecError::Io(e) => SessionError::TransportError(e),
        other => SessionError::Codec(other),
    }
}

/// Receive worker: read complete frames, push them inbound, stop on close.
///
/// Holds only a sender into the session's inbound queue; once the session is
/// dropped the push fails and the loop ends, so the worker never keeps a dead
/// session alive.
pub(crate) async fn recv_loop<R: AsyncRead + Unpin>(
    mut reader: FrameReader<R>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!("receive worker started");

    loop {
        tokio::select! {
            result = reader.read_frame() => {
                match result {
                    Ok(Some(frame)) => {
                        tracing::trace!(
                            type_id = frame.header.type_id,
                            size = frame.header.total_size,
                            "frame received"
                        );
                        if inbound.send(InboundEvent::Frame(frame)).is_err() {
                            // Session is gone; nothing to deliver to
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::debug!("peer closed the connection");
                        let _ = inbound.send(InboundEvent::Closed { error: None });
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "receive worker stopping");
                        let _ = inbound.send(InboundEvent::Closed {
                            error: Some(close_error(e)),
                        });
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                tracing::debug!("receive worker shutdown requested");
                break;
            }
        }
    }
}

/// Send worker: pop finalized buffers and write each fully, in FIFO order.
///
/// `write_all` retries partial writes internally; a hard failure marks the
/// session disconnected and surfaces the error on the inbound event stream.
pub(crate) async fn send_loop<W: AsyncWrite + Unpin>(
    mut sink: W,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    inbound: mpsc::UnboundedSender<InboundEvent>,
    connected: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
    queue_warn_depth: usize,
) {
    tracing::debug!("send worker started");

    loop {
        tokio::select! {
            buffer = outbound.recv() => {
                let Some(buffer) = buffer else {
                    // All senders dropped; session is gone
                    break;
                };

                let backlog = outbound.len();
                if backlog >= queue_warn_depth {
                    tracing::warn!(backlog, "outbound queue backlog past warning depth");
                }

                let result = async {
                    sink.write_all(&buffer).await?;
                    sink.flush().await
                }
                .await;

                if let Err(e) = result {
                    tracing::warn!(error = %e, "send worker write failed");
                    connected.store(false, Ordering::SeqCst);
                    let _ = inbound.send(InboundEvent::Closed {
                        error: Some(SessionError::TransportError(e)),
                    });
                    break;
                }

                tracing::trace!(size = buffer.len(), "frame sent");
            }
            _ = shutdown.changed() => {
                tracing::debug!("send worker shutdown requested");
                break;
            }
        }
    }
}
