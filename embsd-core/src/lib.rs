//! BSD socket layer core data types
//!
//! This crate provides basic data type definitions used by other embsd crates.
//! embsd users should not depend on this crate directly. Use `embsd::core` reexport instead.
#![no_std]

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidValue;

/// Socket descriptor
///
/// Descriptors are 1-based indices into the socket table. Zero is never a valid descriptor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SockId(u8);

impl SockId {
    /// Largest descriptor value. Bounded by the `select` descriptor set width.
    pub const MAX_VALUE: u8 = 64;

    pub const fn new(value: u8) -> Option<Self> {
        if value != 0 && value <= Self::MAX_VALUE {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn from_index(index: usize) -> Self {
        Self(index as u8 + 1)
    }

    pub const fn into_u8(self) -> u8 {
        self.0
    }

    /// Zero-based table index
    pub const fn index(self) -> usize {
        self.0 as usize - 1
    }
}

impl From<SockId> for u8 {
    fn from(value: SockId) -> Self {
        value.into_u8()
    }
}

impl From<SockId> for i32 {
    fn from(value: SockId) -> Self {
        value.into_u8().into()
    }
}

impl TryFrom<u8> for SockId {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(InvalidValue)
    }
}

impl TryFrom<i32> for SockId {
    type Error = InvalidValue;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(Self::new)
            .ok_or(InvalidValue)
    }
}

/// Address family
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u16)]
pub enum Family {
    /// AF_INET
    Inet = 2,
    /// AF_INET6
    Inet6 = 10,
}

impl Family {
    pub const fn try_from_u16(code: u16) -> Option<Self> {
        match code {
            2 => Some(Family::Inet),
            10 => Some(Family::Inet6),
            _ => None,
        }
    }

    pub const fn into_u16(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Family {
    type Error = InvalidValue;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::try_from_u16(value).ok_or(InvalidValue)
    }
}

/// Socket type
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SockType {
    /// SOCK_STREAM, served by the TCP engine
    Stream = 1,
    /// SOCK_DGRAM, served by the UDP engine
    Dgram = 2,
}

impl SockType {
    /// Matching IP protocol number
    pub const fn protocol(self) -> u8 {
        match self {
            SockType::Stream => IPPROTO_TCP,
            SockType::Dgram => IPPROTO_UDP,
        }
    }
}

impl TryFrom<u8> for SockType {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(SockType::Stream),
            2 => Ok(SockType::Dgram),
            _ => Err(InvalidValue),
        }
    }
}

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// Wake condition of a blocked socket call
///
/// The encoding defines the wake precedence: when several events are observed at once,
/// the one with the lowest code is reported first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Event {
    /// The socket was torn down locally
    Kill = 0,
    /// The connection was closed or aborted
    Close = 1,
    /// A wait timer expired
    Timeout = 2,
    /// A connection was established
    Connect = 3,
    /// Data was queued for reception
    Data = 4,
    /// Sent data was acknowledged, the send window may be open
    Ack = 5,
    /// The engine is ready to retry a datagram transmission
    Send = 6,
}

impl Event {
    pub const MIN: Event = Event::Kill;
    pub const MAX: Event = Event::Send;

    pub const fn try_from_u8(code: u8) -> Option<Event> {
        match code {
            0 => Some(Event::Kill),
            1 => Some(Event::Close),
            2 => Some(Event::Timeout),
            3 => Some(Event::Connect),
            4 => Some(Event::Data),
            5 => Some(Event::Ack),
            6 => Some(Event::Send),
            _ => None,
        }
    }

    pub const fn into_u8(self) -> u8 {
        self as u8
    }
}

impl From<Event> for u8 {
    fn from(value: Event) -> Self {
        value.into_u8()
    }
}

impl TryFrom<u8> for Event {
    type Error = InvalidValue;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::try_from_u8(value).ok_or(InvalidValue)
    }
}

/// A set of events, used both as an interest mask and as an observation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EventSet(u8);

impl EventSet {
    pub const NONE: Self = Self(0);
    pub const ALL: Self = Self((1 << (Event::MAX.into_u8() + 1)) - 1);

    pub const KILL: Self = Self::new_eq(Event::Kill);
    pub const CLOSE: Self = Self::new_eq(Event::Close);
    pub const TIMEOUT: Self = Self::new_eq(Event::Timeout);
    pub const CONNECT: Self = Self::new_eq(Event::Connect);
    pub const DATA: Self = Self::new_eq(Event::Data);
    pub const ACK: Self = Self::new_eq(Event::Ack);
    pub const SEND: Self = Self::new_eq(Event::Send);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn into_bits(self) -> u8 {
        self.0
    }

    pub const fn new_eq(event: Event) -> Self {
        Self(1u8 << event.into_u8())
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersection(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub const fn contains(&self, event: Event) -> bool {
        (self.0 >> event.into_u8()) & 0x1 != 0
    }

    pub const fn insert(&mut self, event: Event) {
        self.0 |= Self::new_eq(event).0
    }

    pub const fn remove(&mut self, event: Event) {
        self.0 &= !Self::new_eq(event).0
    }

    /// Returns the observed event with the highest wake precedence
    pub const fn first(&self) -> Option<Event> {
        Event::try_from_u8(self.0.trailing_zeros() as u8)
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == Self::NONE.0
    }
}

impl From<Event> for EventSet {
    fn from(value: Event) -> Self {
        EventSet::new_eq(value)
    }
}

impl core::ops::BitAnd<EventSet> for EventSet {
    type Output = Self;
    fn bitand(self, rhs: EventSet) -> Self::Output {
        self.intersection(rhs)
    }
}

impl core::ops::BitAndAssign<EventSet> for EventSet {
    fn bitand_assign(&mut self, rhs: EventSet) {
        self.0 &= rhs.0
    }
}

impl core::ops::BitOr<EventSet> for EventSet {
    type Output = Self;
    fn bitor(self, rhs: EventSet) -> Self::Output {
        self.union(rhs)
    }
}

impl core::ops::BitOrAssign<EventSet> for EventSet {
    fn bitor_assign(&mut self, rhs: EventSet) {
        self.0 |= rhs.0;
    }
}

impl core::iter::IntoIterator for EventSet {
    type Item = Event;
    type IntoIter = EventSetIterator;
    fn into_iter(self) -> Self::IntoIter {
        EventSetIterator { residual: self }
    }
}

pub struct EventSetIterator {
    residual: EventSet,
}

impl core::iter::Iterator for EventSetIterator {
    type Item = Event;
    fn next(&mut self) -> Option<Self::Item> {
        let first = self.residual.first();
        if let Some(event) = first {
            self.residual.remove(event);
        }
        first
    }
}

/// Flags of the send and receive families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MsgFlags(u16);

impl MsgFlags {
    pub const NONE: Self = Self(0);
    /// Read queued data without consuming it
    pub const PEEK: Self = Self(0x02);
    /// Datagram was longer than the supplied buffer (recvmsg output only)
    pub const TRUNC: Self = Self(0x20);
    /// Do not block for this call only
    pub const DONTWAIT: Self = Self(0x40);

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub const fn into_bits(self) -> u16 {
        self.0
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr<MsgFlags> for MsgFlags {
    type Output = Self;
    fn bitor(self, rhs: MsgFlags) -> Self::Output {
        MsgFlags(self.0 | rhs.0)
    }
}

impl core::ops::BitOrAssign<MsgFlags> for MsgFlags {
    fn bitor_assign(&mut self, rhs: MsgFlags) {
        self.0 |= rhs.0;
    }
}
