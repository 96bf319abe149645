//! Socket call errors

use embsd_driver::engine::EngineError;

/// Error of a socket call
///
/// Every variant maps to a negative BSD-style integer code, see [`Error::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Invalid socket descriptor or no free socket
    NoSocket,
    /// Invalid parameter or the socket state does not allow the call
    Invalid,
    /// The call would block on a non-blocking socket
    WouldBlock,
    /// Out of memory or engine resources
    NoMemory,
    /// Another task already waits on the same socket slot
    Locked,
    /// Datagram is too large
    MsgSize,
    /// Non-blocking connect started
    InProgress,
    /// Connect already in progress
    Already,
    /// Socket is already connected
    IsConnected,
    /// Socket is not connected
    NotConnected,
    /// Peer refused the connection
    ConnRefused,
    /// Connection was reset by the peer
    ConnReset,
    /// Connection was aborted locally
    ConnAborted,
    /// Operation timed out
    TimedOut,
    /// Address is already in use
    AddrInUse,
    /// Destination address is required
    DestAddrRequired,
    /// Operation is not supported for the socket type
    NotSupported,
    /// Unspecified failure
    Failed,
}

impl Error {
    pub const fn code(self) -> i32 {
        match self {
            Error::NoSocket => -1,
            Error::Invalid => -2,
            Error::WouldBlock => -3,
            Error::NoMemory => -5,
            Error::Locked => -6,
            Error::MsgSize => -7,
            Error::InProgress => -8,
            Error::Already => -9,
            Error::IsConnected => -10,
            Error::NotConnected => -11,
            Error::ConnRefused => -12,
            Error::ConnReset => -13,
            Error::ConnAborted => -14,
            Error::TimedOut => -15,
            Error::AddrInUse => -16,
            Error::DestAddrRequired => -17,
            Error::NotSupported => -18,
            Error::Failed => -19,
        }
    }
}

impl From<Error> for i32 {
    fn from(value: Error) -> Self {
        value.code()
    }
}

impl From<EngineError> for Error {
    fn from(value: EngineError) -> Self {
        match value {
            EngineError::NoMemory => Error::NoMemory,
            EngineError::Busy => Error::WouldBlock,
            EngineError::InvalidState => Error::Invalid,
            EngineError::Failed => Error::Failed,
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            Error::NoSocket => "no socket",
            Error::Invalid => "invalid argument",
            Error::WouldBlock => "operation would block",
            Error::NoMemory => "out of memory",
            Error::Locked => "socket slot is locked",
            Error::MsgSize => "message too long",
            Error::InProgress => "operation in progress",
            Error::Already => "operation already in progress",
            Error::IsConnected => "socket is connected",
            Error::NotConnected => "socket is not connected",
            Error::ConnRefused => "connection refused",
            Error::ConnReset => "connection reset",
            Error::ConnAborted => "connection aborted",
            Error::TimedOut => "timed out",
            Error::AddrInUse => "address in use",
            Error::DestAddrRequired => "destination address required",
            Error::NotSupported => "operation not supported",
            Error::Failed => "error",
        };
        f.write_str(text)
    }
}

impl core::error::Error for Error {}
