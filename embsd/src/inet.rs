//! Internet address text conversions

use core::fmt::Write;
use core::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use core::str::FromStr;

use crate::core::Family;
use crate::error::Error;

/// Result of [`inet_addr`] on malformed input
pub const INADDR_NONE: u32 = u32::MAX;

/// Longest text form of an IPv4 address, "255.255.255.255"
pub const INET_ADDRSTRLEN: usize = 16;
/// Longest text form of an IPv6 address
pub const INET6_ADDRSTRLEN: usize = 46;

/// Parses an IPv4 address in any of the BSD numeric forms.
///
/// Accepts `a`, `a.b`, `a.b.c` and `a.b.c.d`, where the last part fills the remaining
/// low-order bytes. Each part may be decimal, octal (leading `0`) or hexadecimal (leading `0x`).
pub fn inet_aton(text: &str) -> Option<Ipv4Addr> {
    let mut parts = [0u32; 4];
    let mut count = 0;
    for part in text.split('.') {
        if count == parts.len() {
            return None;
        }
        parts[count] = parse_part(part)?;
        count += 1;
    }

    let value = match count {
        1 => parts[0],
        2 if parts[0] <= 0xff && parts[1] <= 0xff_ffff => (parts[0] << 24) | parts[1],
        3 if parts[..2].iter().all(|&p| p <= 0xff) && parts[2] <= 0xffff => {
            (parts[0] << 24) | (parts[1] << 16) | parts[2]
        }
        4 if parts.iter().all(|&p| p <= 0xff) => {
            (parts[0] << 24) | (parts[1] << 16) | (parts[2] << 8) | parts[3]
        }
        _ => return None,
    };
    Some(Ipv4Addr::from(value))
}

/// Parses an IPv4 address into its network byte order representation.
///
/// Returns [`INADDR_NONE`] on malformed input. Note that "255.255.255.255" is
/// indistinguishable from an error; use [`inet_aton`] instead.
pub fn inet_addr(text: &str) -> u32 {
    match inet_aton(text) {
        Some(addr) => u32::from_ne_bytes(addr.octets()),
        None => INADDR_NONE,
    }
}

/// Formats an IPv4 address in dotted-quad notation.
pub fn inet_ntoa(addr: Ipv4Addr) -> heapless::String<INET_ADDRSTRLEN> {
    let mut text = heapless::String::new();
    // The longest form fits by construction
    let _ = write!(text, "{}", addr);
    text
}

/// Parses an address in the strict presentation form of `family`.
///
/// IPv4 accepts only the dotted quad of decimal bytes. IPv6 follows RFC 4291 text forms.
pub fn inet_pton(family: Family, text: &str) -> Result<IpAddr, Error> {
    match family {
        Family::Inet => Ipv4Addr::from_str(text)
            .map(IpAddr::V4)
            .map_err(|_| Error::Invalid),
        Family::Inet6 => Ipv6Addr::from_str(text)
            .map(IpAddr::V6)
            .map_err(|_| Error::Invalid),
    }
}

/// Formats an address in its presentation form. IPv6 uses the RFC 5952 compressed form.
pub fn inet_ntop(addr: IpAddr) -> heapless::String<INET6_ADDRSTRLEN> {
    let mut text = heapless::String::new();
    let _ = write!(text, "{}", addr);
    text
}

fn parse_part(part: &str) -> Option<u32> {
    let (digits, radix) = if let Some(hex) = part
        .strip_prefix("0x")
        .or_else(|| part.strip_prefix("0X"))
    {
        (hex, 16)
    } else if part.len() > 1 && part.starts_with('0') {
        (&part[1..], 8)
    } else {
        (part, 10)
    };
    if digits.is_empty() && radix != 16 {
        return None;
    }
    if digits.is_empty() {
        // "0x" alone reads as zero in BSD libc
        return Some(0);
    }
    if !digits.bytes().all(|b| (b as char).is_digit(radix)) {
        return None;
    }
    u32::from_str_radix(digits, radix).ok()
}
