//! Socket options, ioctl and address queries

use embsd_driver::engine::Engine;

use crate::addr::{self, SockAddr};
use crate::core::{Family, SockId, SockType};
use crate::error::Error;
use crate::stack::Inner;
use crate::table::{Control, Flags, State};
use crate::time::Duration;

/// Socket option with its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SockOpt {
    /// SO_KEEPALIVE, stream sockets only
    KeepAlive(bool),
    /// SO_RCVTIMEO, `None` waits forever
    RecvTimeout(Option<Duration>),
    /// SO_SNDTIMEO, `None` waits forever
    SendTimeout(Option<Duration>),
    /// SO_TYPE, read only
    Type(SockType),
    /// IP_TOS
    IpTos(u8),
    /// IP_TTL
    IpTtl(u8),
    /// IP_RECVDSTADDR, datagram sockets only
    RecvDstAddr(bool),
    /// IPV6_TCLASS
    Ipv6TrafficClass(u8),
    /// IPV6_UNICAST_HOPS
    Ipv6HopLimit(u8),
    /// IPV6_V6ONLY, before bind only
    Ipv6Only(bool),
}

impl SockOpt {
    pub const fn name(&self) -> OptName {
        match self {
            SockOpt::KeepAlive(_) => OptName::KeepAlive,
            SockOpt::RecvTimeout(_) => OptName::RecvTimeout,
            SockOpt::SendTimeout(_) => OptName::SendTimeout,
            SockOpt::Type(_) => OptName::Type,
            SockOpt::IpTos(_) => OptName::IpTos,
            SockOpt::IpTtl(_) => OptName::IpTtl,
            SockOpt::RecvDstAddr(_) => OptName::RecvDstAddr,
            SockOpt::Ipv6TrafficClass(_) => OptName::Ipv6TrafficClass,
            SockOpt::Ipv6HopLimit(_) => OptName::Ipv6HopLimit,
            SockOpt::Ipv6Only(_) => OptName::Ipv6Only,
        }
    }
}

/// Option selector for `getsockopt`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OptName {
    KeepAlive,
    RecvTimeout,
    SendTimeout,
    Type,
    IpTos,
    IpTtl,
    RecvDstAddr,
    Ipv6TrafficClass,
    Ipv6HopLimit,
    Ipv6Only,
}

/// Socket control command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Ioctl {
    /// FIONBIO, any socket
    NonBlocking(bool),
    /// Delayed acknowledgements, stream sockets before listen or connect
    DelayAck(bool),
    /// Keep-alive probes, stream sockets before listen or connect
    KeepAlive(bool),
    /// Application-driven receive window, stream sockets before listen or connect
    FlowControl(bool),
}

impl<const SOCKS: usize, const FRAMES: usize> Inner<SOCKS, FRAMES> {
    pub fn setsockopt(&mut self, engine: &dyn Engine, id: SockId, opt: SockOpt) -> Result<(), Error> {
        let ctl = self.table.get_mut(id)?;
        match opt {
            SockOpt::KeepAlive(on) => {
                require_type(ctl, SockType::Stream)?;
                ctl.flags.set(Flags::KEEP_ALIVE, on);
            }
            SockOpt::RecvTimeout(timeout) => ctl.recv_timeout = timeout,
            SockOpt::SendTimeout(timeout) => ctl.send_timeout = timeout,
            SockOpt::Type(_) => return Err(Error::Invalid),
            SockOpt::IpTos(tos) => {
                require_family(ctl, Family::Inet)?;
                ctl.tos = tos;
            }
            SockOpt::IpTtl(ttl) => {
                require_family(ctl, Family::Inet)?;
                ctl.ttl = ttl;
            }
            SockOpt::RecvDstAddr(on) => {
                require_type(ctl, SockType::Dgram)?;
                ctl.flags.set(Flags::RECV_DST, on);
            }
            SockOpt::Ipv6TrafficClass(class) => {
                require_family(ctl, Family::Inet6)?;
                ctl.tos = class;
            }
            SockOpt::Ipv6HopLimit(limit) => {
                require_family(ctl, Family::Inet6)?;
                ctl.hop_limit = limit;
            }
            SockOpt::Ipv6Only(on) => {
                require_family(ctl, Family::Inet6)?;
                if ctl.state != State::Created {
                    return Err(Error::Invalid);
                }
                ctl.flags.set(Flags::V6_ONLY, on);
            }
        }

        // Live engine sockets pick up the new settings
        match (ctl.ty, ctl.state, ctl.engine) {
            (_, State::Server, _) | (_, _, None) => {}
            (SockType::Stream, _, Some(handle)) => engine.tcp_configure(handle, &ctl.tcp_params()),
            (SockType::Dgram, State::Bound, Some(handle)) => {
                engine.udp_configure(handle, &ctl.udp_params())
            }
            (SockType::Dgram, _, Some(_)) => {}
        }
        trace!("socket {:?} option {:?} set", id, opt.name());
        Ok(())
    }

    pub fn getsockopt(&self, id: SockId, name: OptName) -> Result<SockOpt, Error> {
        let ctl = self.table.get(id)?;
        let opt = match name {
            OptName::KeepAlive => {
                require_type(ctl, SockType::Stream)?;
                SockOpt::KeepAlive(ctl.flags.contains(Flags::KEEP_ALIVE))
            }
            OptName::RecvTimeout => SockOpt::RecvTimeout(ctl.recv_timeout),
            OptName::SendTimeout => SockOpt::SendTimeout(ctl.send_timeout),
            OptName::Type => SockOpt::Type(ctl.ty),
            OptName::IpTos => {
                require_family(ctl, Family::Inet)?;
                SockOpt::IpTos(ctl.tos)
            }
            OptName::IpTtl => {
                require_family(ctl, Family::Inet)?;
                SockOpt::IpTtl(ctl.ttl)
            }
            OptName::RecvDstAddr => {
                require_type(ctl, SockType::Dgram)?;
                SockOpt::RecvDstAddr(ctl.flags.contains(Flags::RECV_DST))
            }
            OptName::Ipv6TrafficClass => {
                require_family(ctl, Family::Inet6)?;
                SockOpt::Ipv6TrafficClass(ctl.tos)
            }
            OptName::Ipv6HopLimit => {
                require_family(ctl, Family::Inet6)?;
                SockOpt::Ipv6HopLimit(ctl.hop_limit)
            }
            OptName::Ipv6Only => {
                require_family(ctl, Family::Inet6)?;
                SockOpt::Ipv6Only(ctl.flags.contains(Flags::V6_ONLY))
            }
        };
        Ok(opt)
    }

    pub fn ioctl(&mut self, id: SockId, cmd: Ioctl) -> Result<(), Error> {
        let ctl = self.table.get_mut(id)?;
        let (flag, on) = match cmd {
            Ioctl::NonBlocking(on) => {
                ctl.flags.set(Flags::NON_BLOCKING, on);
                return Ok(());
            }
            Ioctl::DelayAck(on) => (Flags::DELAY_ACK, on),
            Ioctl::KeepAlive(on) => (Flags::KEEP_ALIVE, on),
            Ioctl::FlowControl(on) => (Flags::FLOW_CONTROL, on),
        };
        if ctl.ty != SockType::Stream {
            return Err(Error::NotSupported);
        }
        if !matches!(ctl.state, State::Created | State::Bound) {
            return Err(Error::Invalid);
        }
        ctl.flags.set(flag, on);
        Ok(())
    }

    pub fn getpeername(&self, engine: &dyn Engine, id: SockId) -> Result<SockAddr, Error> {
        let ctl = self.table.get(id)?;
        let remote = match (ctl.ty, ctl.engine) {
            (SockType::Stream, _) if ctl.state != State::Connected => {
                return Err(Error::NotConnected);
            }
            (SockType::Stream, Some(handle)) => engine
                .tcp_peer_addr(handle)
                .map(crate::stack::normalize)
                .unwrap_or(ctl.remote),
            (SockType::Stream, None) => ctl.remote,
            (SockType::Dgram, _) if !ctl.flags.contains(Flags::FILTER) => {
                return Err(Error::NotConnected);
            }
            (SockType::Dgram, _) => ctl.remote,
        };
        Ok(addr::to_external(remote, ctl.family))
    }

    pub fn getsockname(&self, engine: &dyn Engine, id: SockId) -> Result<SockAddr, Error> {
        let ctl = self.table.get(id)?;
        if ctl.state == State::Created {
            return Err(Error::Invalid);
        }
        let local = match (ctl.ty, ctl.engine) {
            (SockType::Stream, Some(handle)) if ctl.state == State::Connected => engine
                .tcp_local_addr(handle)
                .map(crate::stack::normalize)
                .unwrap_or(ctl.local),
            _ => ctl.local,
        };
        Ok(addr::to_external(local, ctl.family))
    }
}

fn require_type(ctl: &Control, ty: SockType) -> Result<(), Error> {
    if ctl.ty == ty {
        Ok(())
    } else {
        Err(Error::NotSupported)
    }
}

fn require_family(ctl: &Control, family: Family) -> Result<(), Error> {
    if ctl.family == family {
        Ok(())
    } else {
        Err(Error::NotSupported)
    }
}
