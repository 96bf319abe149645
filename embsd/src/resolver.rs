//! Host name resolution

use core::net::IpAddr;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::mutex::Mutex;
use embsd_driver::dns::{DnsClient, DnsError};

use crate::core::Family;
use crate::inet;

/// Longest accepted host name
pub const MAX_NAME_LEN: usize = 253;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ResolveError {
    /// HOST_NOT_FOUND
    HostNotFound,
    /// TRY_AGAIN
    TryAgain,
    /// NO_RECOVERY
    NoRecovery,
    /// Empty or oversized name
    Invalid,
}

impl From<DnsError> for ResolveError {
    fn from(value: DnsError) -> Self {
        match value {
            DnsError::NotFound => ResolveError::HostNotFound,
            DnsError::Timeout | DnsError::Busy => ResolveError::TryAgain,
            DnsError::NoServer => ResolveError::NoRecovery,
        }
    }
}

impl core::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let text = match self {
            ResolveError::HostNotFound => "host not found",
            ResolveError::TryAgain => "temporary resolution failure",
            ResolveError::NoRecovery => "non-recoverable resolution failure",
            ResolveError::Invalid => "invalid host name",
        };
        f.write_str(text)
    }
}

impl core::error::Error for ResolveError {}

/// Host entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEnt {
    /// Official name, the queried name as given
    pub name: heapless::String<MAX_NAME_LEN>,
    pub family: Family,
    pub address: IpAddr,
}

/// Resolves host names through a DNS client, one query at a time
///
/// # Examples:
///
/// ```ignore
/// use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
/// use embsd::resolver::HostResolver;
///
/// async fn lookup(resolver: &HostResolver<CriticalSectionRawMutex, MyDns>) {
///     let host = resolver.gethostbyname("example.com").await.unwrap();
///     println!("{} is at {}", host.name, host.address);
/// }
/// ```
pub struct HostResolver<M: RawMutex, D: DnsClient> {
    client: Mutex<M, D>,
}

impl<M: RawMutex, D: DnsClient> HostResolver<M, D> {
    pub const fn new(client: D) -> Self {
        Self {
            client: Mutex::new(client),
        }
    }

    /// Looks up the address of a host.
    ///
    /// Numeric addresses are returned without a query. Names are resolved to an IPv4 address
    /// first, then to an IPv6 address if there is no IPv4 record.
    pub async fn gethostbyname(&self, name: &str) -> Result<HostEnt, ResolveError> {
        if name.is_empty() {
            return Err(ResolveError::Invalid);
        }
        let host_name =
            heapless::String::try_from(name).map_err(|_| ResolveError::Invalid)?;

        if let Some(address) = parse_numeric(name) {
            return Ok(HostEnt {
                name: host_name,
                family: family_of(address),
                address,
            });
        }

        let client = self.client.lock().await;
        let address = match client.resolve(name, Family::Inet).await {
            Err(DnsError::NotFound) => {
                trace!("no IPv4 record, trying IPv6");
                client.resolve(name, Family::Inet6).await
            }
            res => res,
        }
        .inspect_err(|err| debug!("resolution failed: {:?}", err))?;

        Ok(HostEnt {
            name: host_name,
            family: family_of(address),
            address,
        })
    }
}

fn parse_numeric(name: &str) -> Option<IpAddr> {
    inet::inet_aton(name)
        .map(IpAddr::V4)
        .or_else(|| inet::inet_pton(Family::Inet6, name).ok())
}

fn family_of(address: IpAddr) -> Family {
    match address {
        IpAddr::V4(_) => Family::Inet,
        IpAddr::V6(_) => Family::Inet6,
    }
}
