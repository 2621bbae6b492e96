//! Protocol message definitions
//!
//! Defines the four game-state synchronization messages and their exact
//! binary payload layouts. Encoding is explicit and field-by-field; nothing
//! here depends on native struct layout or host endianness.

use bytes::{Buf, BufMut, Bytes};

use super::codec::CodecError;

/// Message type identifiers, as carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketKind {
    /// Per-tick input sample driving deterministic simulation
    Lockstep = 0,
    /// Authoritative full-state sample at a tick
    Snapshot = 1,
    /// Backfill of inputs and states for a lagging or rejoining peer
    Sync = 2,
    /// Acknowledgment of a received sequence number
    Ack = 3,
}

impl PacketKind {
    /// Map a wire type id back to a kind. Any other value is a protocol error.
    pub fn from_type_id(id: u16) -> Option<Self> {
        match id {
            0 => Some(PacketKind::Lockstep),
            1 => Some(PacketKind::Snapshot),
            2 => Some(PacketKind::Sync),
            3 => Some(PacketKind::Ack),
            _ => None,
        }
    }

    pub fn type_id(self) -> u16 {
        self as u16
    }
}

/// One tick's worth of player input.
///
/// Encoded as five single-byte flags in fixed order:
/// left, right, up, down, jump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputState {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
    pub jump: bool,
}

impl InputState {
    /// Encoded size in bytes
    pub const ENCODED_SIZE: usize = 5;

    fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.left as u8);
        buf.put_u8(self.right as u8);
        buf.put_u8(self.up as u8);
        buf.put_u8(self.down as u8);
        buf.put_u8(self.jump as u8);
    }

    /// Caller must have verified `ENCODED_SIZE` bytes remain.
    fn decode(buf: &mut Bytes) -> Self {
        Self {
            left: buf.get_u8() != 0,
            right: buf.get_u8() != 0,
            up: buf.get_u8() != 0,
            down: buf.get_u8() != 0,
            jump: buf.get_u8() != 0,
        }
    }
}

/// Full kinematic state of one entity: position, rotation quaternion
/// (x, y, z, w), velocity. Ten f32 fields, 40 bytes on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EntityState {
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub velocity: [f32; 3],
}

impl EntityState {
    /// Encoded size in bytes
    pub const ENCODED_SIZE: usize = 40;

    fn encode(&self, buf: &mut impl BufMut) {
        for v in self.position {
            buf.put_f32_le(v);
        }
        for v in self.rotation {
            buf.put_f32_le(v);
        }
        for v in self.velocity {
            buf.put_f32_le(v);
        }
    }

    /// Caller must have verified `ENCODED_SIZE` bytes remain.
    fn decode(buf: &mut Bytes) -> Self {
        let mut state = Self::default();
        for v in &mut state.position {
            *v = buf.get_f32_le();
        }
        for v in &mut state.rotation {
            *v = buf.get_f32_le();
        }
        for v in &mut state.velocity {
            *v = buf.get_f32_le();
        }
        state
    }
}

/// All messages exchanged over a packet session.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// One tick's input from a peer
    Lockstep { seq: u16, input: InputState },

    /// Authoritative full state at a tick
    Snapshot { seq: u16, states: Vec<EntityState> },

    /// Resynchronization backfill: a run of inputs plus a run of states
    Sync {
        seq: u16,
        inputs: Vec<InputState>,
        states: Vec<EntityState>,
    },

    /// Acknowledges a sequence number; no further payload
    Ack { ack: u16 },
}

impl Message {
    /// The message's wire kind
    pub fn kind(&self) -> PacketKind {
        match self {
            Message::Lockstep { .. } => PacketKind::Lockstep,
            Message::Snapshot { .. } => PacketKind::Snapshot,
            Message::Sync { .. } => PacketKind::Sync,
            Message::Ack { .. } => PacketKind::Ack,
        }
    }

    /// The message's wire type id
    pub fn type_id(&self) -> u16 {
        self.kind().type_id()
    }

    /// Exact encoded payload size in bytes, computed before encoding.
    pub fn byte_size(&self) -> usize {
        match self {
            Message::Lockstep { .. } => 2 + InputState::ENCODED_SIZE,
            Message::Snapshot { states, .. } => {
                2 + 2 + states.len() * EntityState::ENCODED_SIZE
            }
            Message::Sync { inputs, states, .. } => {
                2 + 2
                    + inputs.len() * InputState::ENCODED_SIZE
                    + 2
                    + states.len() * EntityState::ENCODED_SIZE
            }
            Message::Ack { .. } => 2,
        }
    }

    /// Write the payload into `buf` in declaration order.
    ///
    /// Writes exactly `byte_size()` bytes. Element counts are written as u16;
    /// callers validate count limits before encoding (see `encode_frame`).
    pub fn encode_payload(&self, buf: &mut impl BufMut) {
        match self {
            Message::Lockstep { seq, input } => {
                buf.put_u16_le(*seq);
                input.encode(buf);
            }
            Message::Snapshot { seq, states } => {
                buf.put_u16_le(*seq);
                buf.put_u16_le(states.len() as u16);
                for state in states {
                    state.encode(buf);
                }
            }
            Message::Sync {
                seq,
                inputs,
                states,
            } => {
                buf.put_u16_le(*seq);
                buf.put_u16_le(inputs.len() as u16);
                for input in inputs {
                    input.encode(buf);
                }
                buf.put_u16_le(states.len() as u16);
                for state in states {
                    state.encode(buf);
                }
            }
            Message::Ack { ack } => {
                buf.put_u16_le(*ack);
            }
        }
    }

    /// Decode a payload of the given kind.
    ///
    /// Never reads past the payload boundary: every fixed field and every
    /// declared element run is bounds-checked first, failing with
    /// `TruncatedPayload` when the declared counts exceed the bytes present.
    pub fn decode_payload(kind: PacketKind, payload: &mut Bytes) -> Result<Self, CodecError> {
        match kind {
            PacketKind::Lockstep => {
                let seq = take_u16(payload)?;
                ensure_remaining(payload, InputState::ENCODED_SIZE)?;
                let input = InputState::decode(payload);
                Ok(Message::Lockstep { seq, input })
            }
            PacketKind::Snapshot => {
                let seq = take_u16(payload)?;
                let states = take_states(payload)?;
                Ok(Message::Snapshot { seq, states })
            }
            PacketKind::Sync => {
                let seq = take_u16(payload)?;
                let inputs = take_inputs(payload)?;
                let states = take_states(payload)?;
                Ok(Message::Sync {
                    seq,
                    inputs,
                    states,
                })
            }
            PacketKind::Ack => {
                let ack = take_u16(payload)?;
                Ok(Message::Ack { ack })
            }
        }
    }
}

fn ensure_remaining(payload: &Bytes, needed: usize) -> Result<(), CodecError> {
    if payload.remaining() < needed {
        return Err(CodecError::TruncatedPayload {
            needed,
            available: payload.remaining(),
        });
    }
    Ok(())
}

fn take_u16(payload: &mut Bytes) -> Result<u16, CodecError> {
    ensure_remaining(payload, 2)?;
    Ok(payload.get_u16_le())
}

fn take_inputs(payload: &mut Bytes) -> Result<Vec<InputState>, CodecError> {
    let count = take_u16(payload)? as usize;
    ensure_remaining(payload, count * InputState::ENCODED_SIZE)?;
    Ok((0..count).map(|_| InputState::decode(payload)).collect())
}

fn take_states(payload: &mut Bytes) -> Result<Vec<EntityState>, CodecError> {
    let count = take_u16(payload)? as usize;
    ensure_remaining(payload, count * EntityState::ENCODED_SIZE)?;
    Ok((0..count).map(|_| EntityState::decode(payload)).collect())
}
