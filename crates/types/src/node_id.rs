//! Fixed-width node identifiers.
//!
//! A [`NodeId`] is a 64-bit handle standing in for a [`Term`](crate::Term)
//! inside index tuples.
//!
//! # Layout
//!
//! ```text
//!  63        56 55                                                0
//! ┌────────────┬───────────────────────────────────────────────────┐
//! │    tag     │                     payload                       │
//! └────────────┴───────────────────────────────────────────────────┘
//! ```
//!
//! - tag `0x00`: pointer; the payload is a byte offset into the object log.
//! - tags `0x01..=0x05`: inline values (see [`crate::inline`]).
//! - tag `0xFF`: reserved specials ([`NodeId::DOES_NOT_EXIST`], [`NodeId::ANY`]).

use std::fmt;

/// Number of payload bits below the tag byte.
pub const PAYLOAD_BITS: u32 = 56;

/// Mask selecting the payload bits.
pub const PAYLOAD_MASK: u64 = (1 << PAYLOAD_BITS) - 1;

/// Type tag stored in the top byte of a [`NodeId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum NodeTag {
    /// Object log offset.
    Pointer = 0x00,
    /// Inline `xsd:integer`.
    Integer = 0x01,
    /// Inline `xsd:decimal`.
    Decimal = 0x02,
    /// Inline `xsd:date`.
    Date = 0x03,
    /// Inline `xsd:dateTime`.
    DateTime = 0x04,
    /// Inline `xsd:boolean`.
    Boolean = 0x05,
    /// Reserved sentinel values.
    Special = 0xFF,
}

impl NodeTag {
    /// Decodes a tag byte. Unassigned bytes yield `None`.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Pointer),
            0x01 => Some(Self::Integer),
            0x02 => Some(Self::Decimal),
            0x03 => Some(Self::Date),
            0x04 => Some(Self::DateTime),
            0x05 => Some(Self::Boolean),
            0xFF => Some(Self::Special),
            _ => None,
        }
    }

    /// Returns true for tags whose payload encodes a value directly.
    pub fn is_inline(self) -> bool {
        matches!(self, Self::Integer | Self::Decimal | Self::Date | Self::DateTime | Self::Boolean)
    }
}

/// A 64-bit node identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Sentinel returned by lookups for terms that have no identifier.
    pub const DOES_NOT_EXIST: Self = Self(((NodeTag::Special as u64) << PAYLOAD_BITS) | 0x01);

    /// Identifier of the wildcard term.
    pub const ANY: Self = Self(((NodeTag::Special as u64) << PAYLOAD_BITS) | 0x02);

    /// Largest object log offset a pointer identifier can carry.
    pub const MAX_OFFSET: u64 = PAYLOAD_MASK;

    /// Reconstructs an identifier from its raw 64-bit form.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw 64-bit form.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Creates a pointer identifier for an object log offset.
    ///
    /// Returns `None` if the offset does not fit in the payload.
    pub fn from_offset(offset: u64) -> Option<Self> {
        (offset <= Self::MAX_OFFSET).then_some(Self(offset))
    }

    /// Creates an identifier from a tag and payload. Payload bits above 56 are dropped.
    pub fn from_parts(tag: NodeTag, payload: u64) -> Self {
        Self(((tag as u64) << PAYLOAD_BITS) | (payload & PAYLOAD_MASK))
    }

    /// Returns the raw tag byte.
    pub fn tag_byte(self) -> u8 {
        (self.0 >> PAYLOAD_BITS) as u8
    }

    /// Returns the decoded tag, or `None` for an unassigned tag byte.
    pub fn tag(self) -> Option<NodeTag> {
        NodeTag::from_byte(self.tag_byte())
    }

    /// Returns the 56 payload bits.
    pub fn payload(self) -> u64 {
        self.0 & PAYLOAD_MASK
    }

    /// Returns the object log offset for pointer identifiers.
    pub fn offset(self) -> Option<u64> {
        self.is_pointer().then_some(self.payload())
    }

    /// Returns true if this identifier addresses the object log.
    pub fn is_pointer(self) -> bool {
        self.tag_byte() == NodeTag::Pointer as u8
    }

    /// Returns true if this identifier encodes its value directly.
    pub fn is_inline(self) -> bool {
        self.tag().is_some_and(NodeTag::is_inline)
    }

    /// Returns true for the does-not-exist sentinel.
    pub fn is_does_not_exist(self) -> bool {
        self == Self::DOES_NOT_EXIST
    }

    /// Returns true for the wildcard identifier.
    pub fn is_any(self) -> bool {
        self == Self::ANY
    }

    /// Returns true for any reserved identifier.
    pub fn is_special(self) -> bool {
        self.tag_byte() == NodeTag::Special as u8
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_does_not_exist() {
            return f.write_str("NodeId(DOES_NOT_EXIST)");
        }
        if self.is_any() {
            return f.write_str("NodeId(ANY)");
        }
        match self.tag() {
            Some(NodeTag::Pointer) => write!(f, "NodeId(ptr:{})", self.payload()),
            Some(tag) => write!(f, "NodeId({tag:?}:{:#x})", self.payload()),
            None => write!(f, "NodeId({:#018x})", self.0),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
