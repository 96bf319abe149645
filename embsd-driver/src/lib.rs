//! embsd protocol engine interface
//!
//! The crate provides an interface between a TCP/UDP protocol engine and the embsd socket layer.
//! Limited scope facilitates compatibility across versions.
//! Engine adapters should depend on this crate. Socket API users should depend on
//! the `embsd` crate instead.
//!
//! The interface has two directions:
//! * `engine` traits are called by the socket layer to drive protocol state machines
//! * `Link` is called by the engine, from the network core context, to report protocol events
//!   and to advance housekeeping
//!
//! The socket layer calls engine methods while holding its table lock. An engine must not call
//! back into `Link` from inside these methods; events produced by them should be reported from
//! the network core context after the call returns.
//!
//! Engine callbacks are synchronous. `Link` methods never block: they update socket state,
//! queue received data into the bounded frame pool, and wake waiting tasks.

#![no_std]

pub mod dns;
pub mod engine;
pub mod internal;
pub mod link;

pub mod time {
    pub use embassy_time::Duration;
}
