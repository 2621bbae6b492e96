//! Protocol module - Defines the wire format for ticknet sessions
//!
//! Every frame on the wire is:
//! - 2 bytes total frame length (little-endian, header included)
//! - 2 bytes message type id (little-endian)
//! - Variable length payload, layout fixed per type
//!
//! All multi-byte fields across the protocol are little-endian; there is no
//! padding and no reliance on in-memory struct layout.

mod codec;
mod message;

pub use codec::*;
pub use message::*;

/// Size of the frame header in bytes: total_size(2) + type_id(2)
pub const HEADER_SIZE: usize = 4;

/// Default upper bound on a declared frame size.
///
/// Large enough for a Sync frame carrying a generous backlog of inputs and
/// states, small enough that a corrupted length field cannot make the reader
/// buffer megabytes of garbage.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024;
