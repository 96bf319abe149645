//! Generic socket addresses
//!
//! [`SockAddr`] keeps the byte layout of the C `sockaddr_in` and `sockaddr_in6` structures:
//!
//! | offset | `sockaddr_in`          | `sockaddr_in6`          |
//! |--------|------------------------|-------------------------|
//! | 0      | family, native order   | family, native order    |
//! | 2      | port, big-endian       | port, big-endian        |
//! | 4      | IPv4 address           | flow info, big-endian   |
//! | 8      | zero padding           | IPv6 address            |
//! | 24     |                        | scope id, native order  |
//!
//! The socket layer works with `core::net::SocketAddr` internally and converts at the API
//! boundary. IPv4-mapped IPv6 addresses are stored as plain IPv4 addresses and mapped back
//! when reported to an IPv6 socket.

use core::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::core::Family;
use crate::error::Error;

/// Size of `sockaddr_in`
pub const SOCKADDR_IN_LEN: usize = 16;
/// Size of `sockaddr_in6`
pub const SOCKADDR_IN6_LEN: usize = 28;

const FAMILY_OFFSET: usize = 0;
const PORT_OFFSET: usize = 2;
const IN_ADDR_OFFSET: usize = 4;
const FLOW_INFO_OFFSET: usize = 4;
const IN6_ADDR_OFFSET: usize = 8;
const SCOPE_ID_OFFSET: usize = 24;

/// Socket address in the generic BSD byte layout
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SockAddr {
    bytes: [u8; SOCKADDR_IN6_LEN],
    len: u8,
}

impl SockAddr {
    /// Copies a raw address. Bytes past the `sockaddr_in6` size are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let len = bytes.len().min(SOCKADDR_IN6_LEN);
        let mut addr = Self {
            bytes: [0; SOCKADDR_IN6_LEN],
            len: len as u8,
        };
        addr.bytes[..len].copy_from_slice(&bytes[..len]);
        addr
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Raw family code, if the address is long enough to hold one
    pub fn family_code(&self) -> Option<u16> {
        let bytes = self.as_bytes().get(FAMILY_OFFSET..FAMILY_OFFSET + 2)?;
        Some(u16::from_ne_bytes([bytes[0], bytes[1]]))
    }

    /// Parses the address according to its own family field.
    ///
    /// Fails with `Invalid` on unknown family or short length.
    pub fn to_socket_addr(&self) -> Result<SocketAddr, Error> {
        let family = self.family_code().and_then(Family::try_from_u16);
        let bytes = self.as_bytes();
        match family {
            Some(Family::Inet) if bytes.len() >= SOCKADDR_IN_LEN => {
                let port = read_u16_be(bytes, PORT_OFFSET);
                let ip = Ipv4Addr::new(
                    bytes[IN_ADDR_OFFSET],
                    bytes[IN_ADDR_OFFSET + 1],
                    bytes[IN_ADDR_OFFSET + 2],
                    bytes[IN_ADDR_OFFSET + 3],
                );
                Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
            }
            Some(Family::Inet6) if bytes.len() >= SOCKADDR_IN6_LEN => {
                let port = read_u16_be(bytes, PORT_OFFSET);
                let flow_info = u32::from_be_bytes(read_array(bytes, FLOW_INFO_OFFSET));
                let ip = Ipv6Addr::from(read_array::<16>(bytes, IN6_ADDR_OFFSET));
                let scope_id = u32::from_ne_bytes(read_array(bytes, SCOPE_ID_OFFSET));
                Ok(SocketAddr::V6(SocketAddrV6::new(
                    ip, port, flow_info, scope_id,
                )))
            }
            _ => Err(Error::Invalid),
        }
    }
}

impl core::fmt::Debug for SockAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.to_socket_addr() {
            Ok(addr) => write!(f, "SockAddr({})", addr),
            Err(_) => write!(f, "SockAddr({:?})", self.as_bytes()),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for SockAddr {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(fmt, "SockAddr({=[u8]})", self.as_bytes())
    }
}

impl From<SocketAddrV4> for SockAddr {
    fn from(value: SocketAddrV4) -> Self {
        let mut addr = Self {
            bytes: [0; SOCKADDR_IN6_LEN],
            len: SOCKADDR_IN_LEN as u8,
        };
        write_bytes(&mut addr.bytes, FAMILY_OFFSET, &Family::Inet.into_u16().to_ne_bytes());
        write_bytes(&mut addr.bytes, PORT_OFFSET, &value.port().to_be_bytes());
        write_bytes(&mut addr.bytes, IN_ADDR_OFFSET, &value.ip().octets());
        addr
    }
}

impl From<SocketAddrV6> for SockAddr {
    fn from(value: SocketAddrV6) -> Self {
        let mut addr = Self {
            bytes: [0; SOCKADDR_IN6_LEN],
            len: SOCKADDR_IN6_LEN as u8,
        };
        write_bytes(&mut addr.bytes, FAMILY_OFFSET, &Family::Inet6.into_u16().to_ne_bytes());
        write_bytes(&mut addr.bytes, PORT_OFFSET, &value.port().to_be_bytes());
        write_bytes(&mut addr.bytes, FLOW_INFO_OFFSET, &value.flowinfo().to_be_bytes());
        write_bytes(&mut addr.bytes, IN6_ADDR_OFFSET, &value.ip().octets());
        write_bytes(&mut addr.bytes, SCOPE_ID_OFFSET, &value.scope_id().to_ne_bytes());
        addr
    }
}

impl From<SocketAddr> for SockAddr {
    fn from(value: SocketAddr) -> Self {
        match value {
            SocketAddr::V4(addr) => addr.into(),
            SocketAddr::V6(addr) => addr.into(),
        }
    }
}

impl TryFrom<&SockAddr> for SocketAddr {
    type Error = Error;

    fn try_from(value: &SockAddr) -> Result<Self, Self::Error> {
        value.to_socket_addr()
    }
}

/// Converts an API address into the internal form for a socket of `family`.
///
/// An IPv6 socket accepts IPv4 and IPv4-mapped addresses unless it is IPv6-only.
pub(crate) fn to_internal(
    addr: &SockAddr,
    family: Family,
    v6_only: bool,
) -> Result<SocketAddr, Error> {
    match (family, addr.to_socket_addr()?) {
        (Family::Inet, SocketAddr::V4(addr)) => Ok(SocketAddr::V4(addr)),
        (Family::Inet, SocketAddr::V6(_)) => Err(Error::Invalid),
        (Family::Inet6, SocketAddr::V4(addr)) if !v6_only => Ok(SocketAddr::V4(addr)),
        (Family::Inet6, SocketAddr::V4(_)) => Err(Error::Invalid),
        (Family::Inet6, SocketAddr::V6(addr)) => match addr.ip().to_ipv4_mapped() {
            Some(_) if v6_only => Err(Error::Invalid),
            Some(ip) => Ok(SocketAddr::V4(SocketAddrV4::new(ip, addr.port()))),
            None => Ok(SocketAddr::V6(addr)),
        },
    }
}

/// Converts an internal address into the API form for a socket of `family`.
pub(crate) fn to_external(addr: SocketAddr, family: Family) -> SockAddr {
    match (family, addr) {
        (Family::Inet6, SocketAddr::V4(addr)) => {
            SocketAddrV6::new(addr.ip().to_ipv6_mapped(), addr.port(), 0, 0).into()
        }
        (_, addr) => addr.into(),
    }
}

/// Wildcard address of the family, port zero
pub(crate) const fn unspecified(family: Family) -> SocketAddr {
    match family {
        Family::Inet => SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)),
        Family::Inet6 => SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, 0, 0, 0)),
    }
}

pub(crate) fn is_unspecified(addr: &SocketAddr) -> bool {
    addr.ip().is_unspecified()
}

fn read_u16_be(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes(read_array(bytes, offset))
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut array = [0; N];
    array.copy_from_slice(&bytes[offset..offset + N]);
    array
}

fn write_bytes(target: &mut [u8], offset: usize, bytes: &[u8]) {
    target[offset..offset + bytes.len()].copy_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    #[test]
    fn test_sockaddr_in_layout() {
        let addr = SockAddr::from(SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 1), 0x1234));
        let bytes = addr.as_bytes();
        assert_eq!(bytes.len(), SOCKADDR_IN_LEN);
        assert_eq!(u16::from_ne_bytes([bytes[0], bytes[1]]), 2);
        assert_eq!(&bytes[2..4], &[0x12, 0x34]);
        assert_eq!(&bytes[4..8], &[192, 168, 0, 1]);
        assert!(bytes[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_sockaddr_in6_layout() {
        let ip = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1);
        let addr = SockAddr::from(SocketAddrV6::new(ip, 80, 7, 3));
        let bytes = addr.as_bytes();
        assert_eq!(bytes.len(), SOCKADDR_IN6_LEN);
        assert_eq!(u16::from_ne_bytes([bytes[0], bytes[1]]), 10);
        assert_eq!(&bytes[2..4], &[0, 80]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 7]);
        assert_eq!(&bytes[8..24], &ip.octets());
        assert_eq!(u32::from_ne_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]), 3);
    }

    #[test]
    fn test_short_or_unknown() {
        let v4 = SockAddr::from(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 1));
        let short = SockAddr::from_bytes(&v4.as_bytes()[..8]);
        assert_eq!(short.to_socket_addr(), Err(Error::Invalid));

        let mut raw = [0u8; SOCKADDR_IN_LEN];
        raw[..2].copy_from_slice(&7u16.to_ne_bytes());
        assert_eq!(SockAddr::from_bytes(&raw).to_socket_addr(), Err(Error::Invalid));
        assert_eq!(SockAddr::from_bytes(&[]).family_code(), None);
    }

    #[test]
    fn test_family_translation() {
        let v4 = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 5000);
        let mapped = SockAddr::from(SocketAddrV6::new(v4.ip().to_ipv6_mapped(), 5000, 0, 0));
        let v6 = SockAddr::from(SocketAddrV6::new(Ipv6Addr::LOCALHOST, 5000, 0, 0));

        assert_eq!(
            to_internal(&v4.into(), Family::Inet, false),
            Ok(SocketAddr::V4(v4))
        );
        assert_eq!(to_internal(&v6, Family::Inet, false), Err(Error::Invalid));
        assert_eq!(
            to_internal(&v4.into(), Family::Inet6, false),
            Ok(SocketAddr::V4(v4))
        );
        assert_eq!(to_internal(&v4.into(), Family::Inet6, true), Err(Error::Invalid));
        assert_eq!(
            to_internal(&mapped, Family::Inet6, false),
            Ok(SocketAddr::V4(v4))
        );
        assert_eq!(to_internal(&mapped, Family::Inet6, true), Err(Error::Invalid));
        assert!(to_internal(&v6, Family::Inet6, true).is_ok());
    }

    #[test]
    fn test_external_mapping() {
        let v4 = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 5000));
        assert_eq!(to_external(v4, Family::Inet).len(), SOCKADDR_IN_LEN);
        let mapped = to_external(v4, Family::Inet6);
        assert_eq!(mapped.len(), SOCKADDR_IN6_LEN);
        match mapped.to_socket_addr() {
            Ok(SocketAddr::V6(addr)) => {
                assert_eq!(addr.ip().to_ipv4_mapped(), Some(Ipv4Addr::new(10, 0, 0, 2)));
                assert_eq!(addr.port(), 5000);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(is_unspecified(&unspecified(Family::Inet6)));
    }
}
