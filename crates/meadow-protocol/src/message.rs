//! Protocol messages.

use crate::error::{Error, Result};
use crate::types::{NodeClass, NodeId, SlotIndex, Timestamp};

/// Message kind, carried out of band next to the wire record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Announces the sender's class during discovery.
    Type,
    /// Consent to a WANT.
    Ack,
    /// Request for a meadow.
    Want,
    /// A leader summons a contender.
    Come,
    /// A leader admits a waiting node.
    Start,
    /// A leader announces it holds a meadow.
    Occupied,
    /// A meadow was released.
    Free,
}

impl MessageKind {
    /// All kinds, in tag order.
    pub const ALL: [MessageKind; 7] = [
        Self::Type,
        Self::Ack,
        Self::Want,
        Self::Come,
        Self::Start,
        Self::Occupied,
        Self::Free,
    ];

    /// Tag value on the wire.
    pub const fn to_wire(self) -> i32 {
        match self {
            Self::Type => 0,
            Self::Ack => 1,
            Self::Want => 2,
            Self::Come => 3,
            Self::Start => 4,
            Self::Occupied => 5,
            Self::Free => 6,
        }
    }

    /// Parse a wire tag.
    pub fn from_wire(tag: i32) -> Result<Self> {
        usize::try_from(tag)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .ok_or(Error::UnknownKind(tag))
    }

    /// Get a human-readable name for this message kind.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Type => "TYPE",
            Self::Ack => "ACK",
            Self::Want => "WANT",
            Self::Come => "COME",
            Self::Start => "START",
            Self::Occupied => "OCCUPIED",
            Self::Free => "FREE",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A stamped protocol message. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    /// Lamport time at send.
    pub timestamp: Timestamp,
    /// Sending node.
    pub sender: NodeId,
    /// Payload: a class, a slot index, or unused.
    pub value: i32,
    /// Kind tag.
    pub kind: MessageKind,
}

impl Message {
    /// Create a message.
    pub const fn new(kind: MessageKind, timestamp: Timestamp, sender: NodeId, value: i32) -> Self {
        Self {
            timestamp,
            sender,
            value,
            kind,
        }
    }

    /// Interpret the payload as a meadow index.
    ///
    /// Negative payloads never name a slot.
    pub fn slot(&self) -> Option<SlotIndex> {
        usize::try_from(self.value).ok()
    }

    /// Interpret the payload as a node class.
    pub fn class(&self) -> Result<NodeClass> {
        NodeClass::from_wire(self.value)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}(ts={}, from={}, value={})",
            self.kind, self.timestamp, self.sender, self.value
        )
    }
}

/// Encode a slot index as a message payload.
pub(crate) fn slot_payload(slot: SlotIndex) -> i32 {
    i32::try_from(slot).unwrap_or(i32::MAX)
}
