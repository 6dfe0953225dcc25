//! Platform host name resolution.
//!
//! Only used while constructing a [`ServiceDiscovery`][crate::ServiceDiscovery] whose DNS server
//! was given by host name instead of an IP literal.

use std::{
    io,
    net::{IpAddr, ToSocketAddrs},
};

/// Forward lookup of a host name to its addresses.
pub trait LookupHost {
    /// Returns the addresses of `host`, in the order the resolver returned them.
    fn lookup_host(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

impl<L: LookupHost + ?Sized> LookupHost for &L {
    fn lookup_host(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        (**self).lookup_host(host)
    }
}

/// Resolves host names with the operating system's resolver (`getaddrinfo` and friends).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLookup;

impl LookupHost for SystemLookup {
    fn lookup_host(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs: Vec<IpAddr> = (host, 0).to_socket_addrs()?.map(|addr| addr.ip()).collect();
        log::trace!("lookup_host: {} -> {:?}", host, addrs);
        Ok(addrs)
    }
}
