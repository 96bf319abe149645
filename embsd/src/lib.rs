//! # embsd
//!
//! This library provides a BSD-compatible socket API on top of an embedded TCP/IP protocol
//! engine in no_std environments. Sockets, backlog connections and received data live in
//! fixed-size tables sized by const generics, requiring no dynamic memory allocation.
//!
//! The library primarily targets the Embassy async framework. Blocking socket calls are async
//! functions that suspend the calling task.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐            ┌────────────────────────┐            ┌──────┐   ┌────────┐
//! │ Application ├─ Sockets ─►│         Stack          │◄── Link ───┤ Core ├──►│ Engine │
//! │    tasks    │            │ ┌───────┐ ┌──────────┐ │            │ task │   │TCP/UDP │
//! └─────────────┘            │ │ Table │ │ Frame    │ │── Engine ─►└──────┘   └────────┘
//!                            │ │       │ │ pool     │ │
//!                            │ └───────┘ └──────────┘ │
//!                            └────────────────────────┘
//! ```
//! Components:
//! * _Stack_ owns the socket table, the receive frame pool and the protocol engine.
//! * _Sockets_ is a shared handle for application tasks. It implements the BSD calls:
//!   socket, bind, listen, accept, connect, the send and receive families, closesocket,
//!   select and the option calls.
//! * _Link_ is the handle of the network core. The core reports connection state changes,
//!   received data and send readiness, and calls `tick` periodically for housekeeping.
//! * _Engine_ is the user-provided TCP/UDP implementation behind the
//!   [`embsd_driver::engine`] traits.
//! * _HostResolver_ serializes host name lookups over a user-provided DNS client.
//!
//! ## Concurrency model
//!
//! A single blocking mutex guards the table and the pool. Application calls and engine
//! callbacks take it for one bounded step and never hold it across an await. Engine methods
//! are called with the mutex held, so an engine must never call back into `Link` from inside
//! them. There are two mutex implementation options:
//! * _CriticalSectionRawMutex_ allows the network core to run in an interrupt.
//! * _ThreadModeRawMutex_ requires all stack users to run in thread mode executors.
//!
//! A blocked call registers its waker in one of two wait slots of the socket. Events only wake
//! the call; the call then re-checks the socket state. Closing a socket wakes its blocked calls
//! with `ConnAborted`. Timeouts are counted in `Link::tick` periods.
//!
//! ## Limitations
//!
//! * Only `AF_INET` and `AF_INET6` with `SOCK_STREAM` and `SOCK_DGRAM` are supported.
//! * Raw sockets, multicast options and out-of-band data are not supported.
//! * `sendmsg` and `recvmsg` serve datagram sockets only.
#![no_std]

pub use embsd_core as core;
pub use embsd_driver::time;

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod addr;
mod buffer;
mod callbacks;
pub mod error;
pub mod inet;
mod io;
mod lifecycle;
pub mod options;
pub mod resolver;
pub mod select;
pub mod socket;
pub mod stack;
mod table;
mod wait;

pub use buffer::FRAME_CAPACITY;
