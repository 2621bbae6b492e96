//! ticknet - Duplex packet session layer for real-time game-state sync
//!
//! Frames raw stream bytes into discrete messages behind a fixed 4-byte
//! length-prefixed header, decouples socket I/O from message handling via
//! dedicated receive and send workers, and defines the binary encoding for a
//! small family of synchronization messages: per-tick input (Lockstep),
//! periodic full state (Snapshot), resync backfill (Sync), and
//! acknowledgment (Ack).
//!
//! The consumer hands an already-connected stream to
//! [`PacketSession::spawn`], then calls [`PacketSession::send`] and
//! [`PacketSession::drain_and_dispatch`] on its own cadence, typically once
//! per simulation tick.

pub mod config;
pub mod protocol;
pub mod session;

pub use config::{Config, ConfigError};
pub use protocol::{
    encode_frame, CodecError, EntityState, FrameDecoder, FrameHeader, FrameReader, InputState,
    Message, PacketKind, RawFrame, SendBuffer, DEFAULT_MAX_FRAME_SIZE, HEADER_SIZE,
};
pub use session::{
    Dispatch, DrainOutcome, ErrorPolicy, PacketSession, SessionConfig, SessionError,
    SessionHandle, SessionResult, SessionRole, SessionState,
};
