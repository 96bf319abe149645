//! BSD socket API handle

use core::future::poll_fn;
use core::net::IpAddr;
use core::task::{Context, Poll};

use crate::addr::SockAddr;
use crate::buffer::FRAME_CAPACITY;
use crate::core::{Family, MsgFlags, SockId, SockType};
use crate::error::Error;
use crate::options::{Ioctl, OptName, SockOpt};
use crate::select::FdSet;
use crate::time::Duration;
use crate::wait::Ticket;

/// Progress of a single suspending call
#[derive(Debug, Default)]
pub(crate) struct Call {
    pub ticket: Ticket,
    /// A wait slot may hold the ticket
    pub armed: bool,
    /// The call has performed its first step
    pub started: bool,
    /// Stream bytes handed to the engine so far
    pub sent: usize,
}

/// Outcome of a receive step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Received {
    /// Bytes copied to the caller
    pub len: usize,
    /// Datagram length before truncation
    pub full_len: usize,
    pub source: SockAddr,
    pub destination: Option<IpAddr>,
}

pub(crate) trait DynamicSockets {
    fn socket(&self, family: Family, ty: SockType, protocol: u8) -> Result<SockId, Error>;
    fn bind(&self, id: SockId, addr: &SockAddr) -> Result<(), Error>;
    fn listen(&self, id: SockId, backlog: usize) -> Result<(), Error>;
    fn poll_accept(
        &self,
        cx: &mut Context<'_>,
        id: SockId,
        call: &mut Call,
    ) -> Poll<Result<(SockId, SockAddr), Error>>;
    fn poll_connect(
        &self,
        cx: &mut Context<'_>,
        id: SockId,
        addr: &SockAddr,
        call: &mut Call,
    ) -> Poll<Result<(), Error>>;
    fn poll_close(&self, cx: &mut Context<'_>, id: SockId, call: &mut Call)
    -> Poll<Result<(), Error>>;
    fn poll_send(
        &self,
        cx: &mut Context<'_>,
        id: SockId,
        data: &[u8],
        to: Option<&SockAddr>,
        flags: MsgFlags,
        call: &mut Call,
    ) -> Poll<Result<usize, Error>>;
    fn poll_recv(
        &self,
        cx: &mut Context<'_>,
        id: SockId,
        bufs: &mut [&mut [u8]],
        flags: MsgFlags,
        call: &mut Call,
    ) -> Poll<Result<Received, Error>>;
    fn poll_select(
        &self,
        cx: &mut Context<'_>,
        interest: &[FdSet; 3],
        timeout: Option<Duration>,
        call: &mut Call,
    ) -> Poll<Result<[FdSet; 3], Error>>;
    fn setsockopt(&self, id: SockId, opt: SockOpt) -> Result<(), Error>;
    fn getsockopt(&self, id: SockId, name: OptName) -> Result<SockOpt, Error>;
    fn ioctl(&self, id: SockId, cmd: Ioctl) -> Result<(), Error>;
    fn getpeername(&self, id: SockId) -> Result<SockAddr, Error>;
    fn getsockname(&self, id: SockId) -> Result<SockAddr, Error>;
    /// Vacates every wait slot held by the ticket
    fn disarm(&self, ticket: Ticket);
}

/// Vacates the wait slots of a call when its future completes or is dropped
struct Waiter<'a> {
    sockets: &'a (dyn DynamicSockets + Sync),
    call: Call,
}

impl<'a> Waiter<'a> {
    fn new(sockets: &'a (dyn DynamicSockets + Sync)) -> Self {
        Self {
            sockets,
            call: Call::default(),
        }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.call.armed {
            self.sockets.disarm(self.call.ticket);
        }
    }
}

/// Result of [`Sockets::recvmsg`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvMsg {
    /// Bytes copied into the buffers
    pub len: usize,
    pub source: SockAddr,
    /// Destination address of the datagram, if capture is enabled
    pub destination: Option<IpAddr>,
    /// [`MsgFlags::TRUNC`] is set if the datagram did not fit
    pub flags: MsgFlags,
}

/// Application handle of a socket stack
///
/// The handle is cheap to copy and may be shared among tasks. Blocking calls suspend the task
/// until the socket state allows them to complete, a timeout expires or the socket is closed.
/// Each socket serves one blocked receiver-side call (accept, connect, receive family, close)
/// and one blocked sender-side call at a time. A second concurrent call on the same side fails
/// with [`Error::Locked`].
///
/// Dropping a pending future abandons the call and frees its wait slot.
#[derive(Clone, Copy)]
pub struct Sockets<'a>(&'a (dyn DynamicSockets + Sync));

impl<'a> Sockets<'a> {
    pub(crate) fn new(sockets: &'a (dyn DynamicSockets + Sync)) -> Self {
        Self(sockets)
    }

    /// Creates a socket.
    ///
    /// `protocol` is either zero or the protocol matching `ty`.
    /// Fails with `NoSocket` when the table is full and `NoMemory` when the engine is out of
    /// sockets.
    pub fn socket(&self, family: Family, ty: SockType, protocol: u8) -> Result<SockId, Error> {
        self.0.socket(family, ty, protocol)
    }

    /// Assigns a local address. Port zero picks an ephemeral port.
    pub fn bind(&self, id: SockId, addr: &SockAddr) -> Result<(), Error> {
        self.0.bind(id, addr)
    }

    /// Turns a bound stream socket into a server with `backlog` pre-allocated children.
    pub fn listen(&self, id: SockId, backlog: usize) -> Result<(), Error> {
        self.0.listen(id, backlog)
    }

    /// Takes the oldest established connection of a listening socket.
    ///
    /// Incoming connections are only admitted while an accept call waits on a blocking socket.
    pub async fn accept(&self, id: SockId) -> Result<(SockId, SockAddr), Error> {
        let mut waiter = Waiter::new(self.0);
        poll_fn(|cx| self.0.poll_accept(cx, id, &mut waiter.call)).await
    }

    /// Connects a stream socket, or sets the peer filter of a datagram socket.
    ///
    /// An unspecified address clears the datagram peer filter.
    /// A non-blocking stream socket returns `InProgress`; completion is reported by `select`.
    pub async fn connect(&self, id: SockId, addr: &SockAddr) -> Result<(), Error> {
        let mut waiter = Waiter::new(self.0);
        poll_fn(|cx| self.0.poll_connect(cx, id, addr, &mut waiter.call)).await
    }

    pub async fn send(&self, id: SockId, buf: &[u8], flags: MsgFlags) -> Result<usize, Error> {
        self.sendto(id, buf, flags, None).await
    }

    /// Sends data.
    ///
    /// A stream send blocks until all data is handed to the engine and returns a partial count
    /// if it is interrupted after progress. A datagram is sent whole or not at all.
    pub async fn sendto(
        &self,
        id: SockId,
        buf: &[u8],
        flags: MsgFlags,
        to: Option<&SockAddr>,
    ) -> Result<usize, Error> {
        let mut waiter = Waiter::new(self.0);
        poll_fn(|cx| self.0.poll_send(cx, id, buf, to, flags, &mut waiter.call)).await
    }

    /// Sends a datagram gathered from `iov`.
    pub async fn sendmsg(
        &self,
        id: SockId,
        iov: &[&[u8]],
        to: Option<&SockAddr>,
        flags: MsgFlags,
    ) -> Result<usize, Error> {
        if self.0.getsockopt(id, OptName::Type)? != SockOpt::Type(SockType::Dgram) {
            return Err(Error::NotSupported);
        }
        let mut datagram = heapless::Vec::<u8, FRAME_CAPACITY>::new();
        for part in iov {
            datagram
                .extend_from_slice(part)
                .map_err(|_| Error::MsgSize)?;
        }
        self.sendto(id, &datagram, flags, to).await
    }

    pub async fn recv(&self, id: SockId, buf: &mut [u8], flags: MsgFlags) -> Result<usize, Error> {
        let received = self.receive(id, &mut [buf], flags).await?;
        Ok(received.len)
    }

    /// Receives data and its source address.
    ///
    /// A datagram longer than `buf` is truncated and the rest is discarded.
    /// A stream socket returns zero once the peer closed the connection.
    pub async fn recvfrom(
        &self,
        id: SockId,
        buf: &mut [u8],
        flags: MsgFlags,
    ) -> Result<(usize, SockAddr), Error> {
        let received = self.receive(id, &mut [buf], flags).await?;
        Ok((received.len, received.source))
    }

    /// Receives a datagram scattered into `iov`.
    pub async fn recvmsg(
        &self,
        id: SockId,
        iov: &mut [&mut [u8]],
        flags: MsgFlags,
    ) -> Result<RecvMsg, Error> {
        if self.0.getsockopt(id, OptName::Type)? != SockOpt::Type(SockType::Dgram) {
            return Err(Error::NotSupported);
        }
        let received = self.receive(id, iov, flags).await?;
        let mut out_flags = MsgFlags::NONE;
        if received.full_len > received.len {
            out_flags |= MsgFlags::TRUNC;
        }
        Ok(RecvMsg {
            len: received.len,
            source: received.source,
            destination: received.destination,
            flags: out_flags,
        })
    }

    async fn receive(
        &self,
        id: SockId,
        bufs: &mut [&mut [u8]],
        flags: MsgFlags,
    ) -> Result<Received, Error> {
        let mut waiter = Waiter::new(self.0);
        poll_fn(|cx| self.0.poll_recv(cx, id, bufs, flags, &mut waiter.call)).await
    }

    /// Closes a socket.
    ///
    /// Blocked calls on the socket fail with `ConnAborted`. A connected stream socket waits for
    /// the graceful close to finish, unless it is non-blocking.
    pub async fn closesocket(&self, id: SockId) -> Result<(), Error> {
        let mut waiter = Waiter::new(self.0);
        poll_fn(|cx| self.0.poll_close(cx, id, &mut waiter.call)).await
    }

    /// Waits until any of the sockets is ready.
    ///
    /// Sets are rewritten to hold ready sockets only. `None` timeout waits forever, a zero
    /// timeout polls. Returns the total number of ready entries.
    pub async fn select(
        &self,
        read: Option<&mut FdSet>,
        write: Option<&mut FdSet>,
        except: Option<&mut FdSet>,
        timeout: Option<Duration>,
    ) -> Result<usize, Error> {
        let mut sets = [read, write, except];
        let interest = sets.each_ref().map(|set| set.as_deref().copied().unwrap_or_default());

        let mut waiter = Waiter::new(self.0);
        let ready =
            poll_fn(|cx| self.0.poll_select(cx, &interest, timeout, &mut waiter.call)).await?;

        let mut count = 0;
        for (set, ready) in sets.iter_mut().zip(ready) {
            if let Some(set) = set {
                **set = ready;
                count += ready.count();
            }
        }
        Ok(count)
    }

    pub fn setsockopt(&self, id: SockId, opt: SockOpt) -> Result<(), Error> {
        self.0.setsockopt(id, opt)
    }

    pub fn getsockopt(&self, id: SockId, name: OptName) -> Result<SockOpt, Error> {
        self.0.getsockopt(id, name)
    }

    pub fn ioctlsocket(&self, id: SockId, cmd: Ioctl) -> Result<(), Error> {
        self.0.ioctl(id, cmd)
    }

    pub fn getpeername(&self, id: SockId) -> Result<SockAddr, Error> {
        self.0.getpeername(id)
    }

    pub fn getsockname(&self, id: SockId) -> Result<SockAddr, Error> {
        self.0.getsockname(id)
    }
}
