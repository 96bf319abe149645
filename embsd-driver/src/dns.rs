//! DNS client consumed by the host resolver

use core::future::Future;
use core::net::IpAddr;

use embsd_core::Family;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DnsError {
    /// The name does not exist or has no record of the requested family
    NotFound,
    /// No answer within the client retry policy
    Timeout,
    /// No DNS server is configured
    NoServer,
    /// The client has no free resolver slot
    Busy,
}

/// Asynchronous name resolution service
///
/// The client may support a single query at a time; the host resolver serializes its callers.
pub trait DnsClient {
    fn resolve(
        &self,
        name: &str,
        family: Family,
    ) -> impl Future<Output = Result<IpAddr, DnsError>>;
}
