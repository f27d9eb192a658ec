//! Wire encoding of protocol messages.
//!
//! The record body is three big-endian `i32`s: `timestamp, sender_id, value`
//! (12 bytes). The kind normally travels out of band as a transport tag;
//! transports without a tag channel use a [`Frame`], which prefixes the
//! record with a one-byte kind.
//!
//! ```text
//! frame:  | kind (1) | timestamp (4) | sender_id (4) | value (4) |
//! record:            |<------------- 12 bytes ---------------->|
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::message::{Message, MessageKind};

/// Size of the fixed record body.
pub const RECORD_LEN: usize = 12;

/// Size of a tagged frame.
pub const FRAME_LEN: usize = RECORD_LEN + 1;

/// The fixed 3-integer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireRecord {
    pub timestamp: i32,
    pub sender: i32,
    pub value: i32,
}

impl WireRecord {
    /// Build the record for a message.
    ///
    /// Fails if the timestamp or sender id is above `i32::MAX`.
    pub fn from_message(msg: &Message) -> Result<Self> {
        Ok(Self {
            timestamp: to_wire_int("timestamp", msg.timestamp)?,
            sender: to_wire_int("sender_id", msg.sender)?,
            value: msg.value,
        })
    }

    /// Write the record into `buf`.
    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_i32(self.timestamp);
        buf.put_i32(self.sender);
        buf.put_i32(self.value);
    }

    /// Read a record from the front of `buf`.
    pub fn get(buf: &mut impl Buf) -> Result<Self> {
        if buf.remaining() < RECORD_LEN {
            return Err(Error::Truncated {
                expected: RECORD_LEN,
                actual: buf.remaining(),
            });
        }
        Ok(Self {
            timestamp: buf.get_i32(),
            sender: buf.get_i32(),
            value: buf.get_i32(),
        })
    }

    /// Attach a kind, validating the unsigned fields.
    pub fn into_message(self, kind: MessageKind) -> Result<Message> {
        let timestamp = u32::try_from(self.timestamp).map_err(|_| Error::Negative {
            field: "timestamp",
            value: self.timestamp,
        })?;
        let sender = u32::try_from(self.sender).map_err(|_| Error::Negative {
            field: "sender_id",
            value: self.sender,
        })?;
        Ok(Message::new(kind, timestamp, sender, self.value))
    }
}

fn to_wire_int(field: &'static str, value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::Overflow { field, value })
}

/// Kind-tagged record for transports that carry raw bytes only.
pub struct Frame;

impl Frame {
    /// Encode a message as a tagged frame.
    pub fn encode(msg: &Message) -> Result<Bytes> {
        let record = WireRecord::from_message(msg)?;
        let mut buf = BytesMut::with_capacity(FRAME_LEN);
        buf.put_u8(msg.kind.to_wire() as u8);
        record.put(&mut buf);
        Ok(buf.freeze())
    }

    /// Decode a tagged frame.
    pub fn decode(mut data: &[u8]) -> Result<Message> {
        if data.len() < FRAME_LEN {
            return Err(Error::Truncated {
                expected: FRAME_LEN,
                actual: data.len(),
            });
        }
        let kind = MessageKind::from_wire(i32::from(data.get_u8()))?;
        WireRecord::get(&mut data)?.into_message(kind)
    }
}
