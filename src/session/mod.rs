//! Session module - Duplex packet session over one connected stream
//!
//! Provides:
//! - `PacketSession` owning the receive and send workers for one connection
//! - `SessionHandle` for enqueueing outbound messages from anywhere
//! - `Dispatch` callbacks for decoded inbound messages

mod session;
mod worker;

pub use session::*;

use serde::{Deserialize, Serialize};

use crate::protocol::{PacketKind, DEFAULT_MAX_FRAME_SIZE};

/// Which end of the protocol this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Authoritative host: receives per-tick inputs and acknowledgments
    Server,
    /// Simulating peer: receives everything the server pushes
    Client,
}

impl SessionRole {
    /// Exhaustive mapping of which message kinds are bound for each role.
    ///
    /// Clients upload their input and acknowledgments; the server pushes
    /// relayed inputs, snapshots, resync backfills, and acknowledgments.
    pub fn accepts(self, kind: PacketKind) -> bool {
        match (self, kind) {
            (SessionRole::Server, PacketKind::Lockstep) => true,
            (SessionRole::Server, PacketKind::Ack) => true,
            (SessionRole::Server, PacketKind::Snapshot) => false,
            (SessionRole::Server, PacketKind::Sync) => false,
            (SessionRole::Client, _) => true,
        }
    }
}

/// What to do when a single inbound frame fails to decode or is not bound
/// for this session's role. Framing errors that lose stream synchronization
/// always close the session regardless of policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Abort the drain and hand the error to the caller
    #[default]
    FailFast,
    /// Log, count, and continue with the next frame
    SkipFrame,
}

/// Runtime configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound accepted for a declared frame size
    pub max_frame_size: usize,
    /// Per-frame decode error handling
    pub error_policy: ErrorPolicy,
    /// How long `shutdown` waits for the workers to exit
    pub shutdown_timeout_ms: u64,
    /// Queue length at which a backlog warning is logged.
    ///
    /// Both queues are unbounded, so this is the only visibility the
    /// consumer gets into a peer or dispatcher that cannot keep up.
    pub queue_warn_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            error_policy: ErrorPolicy::default(),
            shutdown_timeout_ms: 1000,
            queue_warn_depth: 1024,
        }
    }
}

/// Consumer-owned sequencing counters.
///
/// The session layer is pure transport framing and does not gate anything on
/// these; the consumer tracks them to decide when to send a Sync backfill
/// instead of incremental messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Highest sequence number acknowledged by the peer
    pub ack: i64,
    /// Last sequence number handed out locally
    pub seq: i64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the local counter and return the wire-sized sequence number.
    pub fn next_seq(&mut self) -> u16 {
        self.seq += 1;
        self.seq as u16
    }

    /// Record an acknowledgment from the peer. Stale acks are ignored.
    pub fn observe_ack(&mut self, ack: u16) {
        if i64::from(ack) > self.ack {
            self.ack = i64::from(ack);
        }
    }

    /// How many sent sequence numbers the peer has yet to acknowledge.
    pub fn outstanding(&self) -> i64 {
        self.seq - self.ack
    }
}
