//! SRV-based service discovery.
//!
//! Looking up a service is a two-step process:
//!
//! 1. Query the SRV records of `<service><search suffix>.`. Each SRV answer names a target host
//!    and the port the service listens on.
//! 2. Resolve the SRV targets to IPv4 addresses with A queries, in the order the server returned
//!    the SRV answers.
//!
//! SRV priority and weight are ignored. Servers like Consul shuffle their SRV answers, which is
//! what spreads load across instances.

use std::{
    collections::{hash_map, HashMap},
    error, fmt, io,
    net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4},
};

use crate::{
    lookup::{LookupHost, SystemLookup},
    name::DomainName,
    packet::{self, Message, RCode, RData, Type},
    transport::{Exchange, UdpTransport},
    CONSUL_SEARCH_SUFFIX,
};

/// Which of the two lookups of a discovery an [`Error`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    /// The SRV lookup of the service name.
    Service,
    /// The A lookup of an SRV target.
    Target,
}

/// Errors returned by [`ServiceDiscovery`].
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The DNS server address is not a valid `host:port` pair.
    Configuration {
        address: String,
        reason: &'static str,
    },
    /// The DNS server host name could not be resolved to an address.
    Resolution {
        host: String,
        source: Option<io::Error>,
    },
    /// A service or target name cannot be encoded as a DNS name.
    InvalidName { name: String, source: packet::Error },
    /// The transport failed to exchange a message with the DNS server.
    ///
    /// Displays exactly like the underlying I/O error, and [`source`][error::Error::source]
    /// returns that error's own source. The `io::Error` itself is not part of the source chain.
    Transport(io::Error),
    /// The DNS server answered with a response code other than `NO_ERROR`.
    Query { lookup: LookupKind, rcode: RCode },
    /// The response did not contain a usable record of the expected type.
    NoRecord { lookup: LookupKind },
}

impl Error {
    /// Returns the lookup the error occurred in, for errors that stem from a DNS response.
    pub fn lookup(&self) -> Option<LookupKind> {
        match self {
            Error::Query { lookup, .. } | Error::NoRecord { lookup } => Some(*lookup),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Configuration { address, reason } => {
                write!(f, "invalid DNS server address '{}': {}", address, reason)
            }
            Error::Resolution { host, .. } => {
                write!(f, "no service discovery host could be resolved ({})", host)
            }
            Error::InvalidName { name, source } => {
                write!(f, "invalid DNS name '{}': {}", name, source)
            }
            Error::Transport(e) => e.fmt(f),
            Error::Query {
                lookup: LookupKind::Service,
                rcode,
            } => write!(f, "service lookup: DNS query did not succeed ({})", rcode),
            Error::Query {
                lookup: LookupKind::Target,
                rcode,
            } => write!(
                f,
                "service lookup: target DNS query did not succeed ({})",
                rcode
            ),
            Error::NoRecord {
                lookup: LookupKind::Service,
            } => f.write_str("service lookup: no SRV entry in DNS response"),
            Error::NoRecord {
                lookup: LookupKind::Target,
            } => f.write_str("service lookup: no A entry in DNS response"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Resolution {
                source: Some(e), ..
            } => Some(e),
            Error::InvalidName { source, .. } => Some(source),
            Error::Transport(e) => error::Error::source(e),
            _ => None,
        }
    }
}

/// A resolved instance of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceInstance {
    ip: Ipv4Addr,
    port: u16,
}

impl ServiceInstance {
    /// Creates an instance reachable at `ip` on `port`.
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    /// The IPv4 address the SRV target resolved to.
    #[inline]
    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// The port from the SRV record.
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The instance's address as a [`SocketAddr`], ready to connect to.
    #[inline]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddrV4::new(self.ip, self.port).into()
    }
}

impl fmt::Display for ServiceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Remembers the address each SRV target resolved to.
///
/// Keys are target host names without the trailing root dot. Entries are never evicted, so the
/// cache only grows over the lifetime of its [`ServiceDiscovery`].
#[derive(Debug, Clone, Default)]
pub struct TargetCache {
    entries: HashMap<String, Ipv4Addr>,
}

impl TargetCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, target: &str) -> Option<Ipv4Addr> {
        self.entries.get(strip_root(target)).copied()
    }

    /// Records that `target` resolves to `ip`, replacing any previous address.
    pub fn insert(&mut self, target: &str, ip: Ipv4Addr) {
        self.entries.insert(strip_root(target).to_owned(), ip);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, Ipv4Addr> {
        self.entries.iter()
    }
}

/// A synchronous service discoverer bound to one DNS server and search suffix.
///
/// The discovery methods take `&mut self` because they update the [`TargetCache`]. To share a
/// `ServiceDiscovery` between threads, put it behind a `Mutex`.
pub struct ServiceDiscovery<T = UdpTransport> {
    server: SocketAddr,
    search_suffix: String,
    transport: T,
    cache: TargetCache,
}

impl ServiceDiscovery<UdpTransport> {
    /// Creates a discoverer for Consul's DNS interface, using the `.service.consul` suffix.
    ///
    /// `server` is a `host:port` pair. If `host` is not an IP address it is resolved once, here,
    /// with the system resolver.
    pub fn new_consul(server: &str) -> Result<Self, Error> {
        Self::new(server, CONSUL_SEARCH_SUFFIX)
    }

    /// Creates a discoverer that appends `search_suffix` to every service name.
    ///
    /// The suffix is appended verbatim, so it usually starts with a `.`.
    pub fn new(server: &str, search_suffix: impl Into<String>) -> Result<Self, Error> {
        Self::with_lookup(server, search_suffix, &SystemLookup)
    }

    /// Like [`ServiceDiscovery::new`], but resolves a server host name with `lookup`.
    pub fn with_lookup<L: LookupHost + ?Sized>(
        server: &str,
        search_suffix: impl Into<String>,
        lookup: &L,
    ) -> Result<Self, Error> {
        let server = resolve_server(server, lookup)?;
        Ok(Self::with_transport(
            server,
            search_suffix,
            UdpTransport::new(),
        ))
    }
}

impl<T: Exchange> ServiceDiscovery<T> {
    /// Creates a discoverer that sends its queries to `server` through `transport`.
    pub fn with_transport(server: SocketAddr, search_suffix: impl Into<String>, transport: T) -> Self {
        Self {
            server,
            search_suffix: search_suffix.into(),
            transport,
            cache: TargetCache::new(),
        }
    }

    /// Returns the address of the DNS server queries are sent to.
    #[inline]
    pub fn server(&self) -> SocketAddr {
        self.server
    }

    #[inline]
    pub fn search_suffix(&self) -> &str {
        &self.search_suffix
    }

    #[inline]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    #[inline]
    pub fn cache(&self) -> &TargetCache {
        &self.cache
    }

    /// Gives access to the target cache, for example to seed it with known addresses.
    #[inline]
    pub fn cache_mut(&mut self) -> &mut TargetCache {
        &mut self.cache
    }

    /// Returns the first instance of `service_name` whose SRV target resolves.
    ///
    /// SRV answers are tried in the order the server returned them. Targets that fail to resolve
    /// are skipped. Fails with [`Error::NoRecord`] if there are no SRV answers or none of their
    /// targets resolve.
    pub fn discover_service(&mut self, service_name: &str) -> Result<ServiceInstance, Error> {
        let fqdn = self.service_fqdn(service_name)?;
        for srv in self.lookup_srv(&fqdn)? {
            match self.resolve_target(&srv.target) {
                Ok(ip) => return Ok(ServiceInstance::new(ip, srv.port)),
                Err(e) => log::debug!("skipping SRV target {} of {}: {}", srv.target, fqdn, e),
            }
        }

        log::error!(
            "service lookup of {} via {}: no SRV entry in DNS response",
            fqdn,
            self.server
        );
        Err(Error::NoRecord {
            lookup: LookupKind::Service,
        })
    }

    /// Returns every instance of `service_name` whose SRV target resolves, in SRV answer order.
    ///
    /// Only a failed SRV lookup is an error. An empty result is not.
    pub fn discover_all_service_instances(
        &mut self,
        service_name: &str,
    ) -> Result<Vec<ServiceInstance>, Error> {
        let fqdn = self.service_fqdn(service_name)?;
        let mut instances = Vec::new();
        for srv in self.lookup_srv(&fqdn)? {
            match self.resolve_target(&srv.target) {
                Ok(ip) => instances.push(ServiceInstance::new(ip, srv.port)),
                Err(e) => log::debug!("skipping SRV target {} of {}: {}", srv.target, fqdn, e),
            }
        }
        log::debug!("{} resolved to {} instance(s)", fqdn, instances.len());
        Ok(instances)
    }

    fn service_fqdn(&self, service_name: &str) -> Result<DomainName, Error> {
        let fqdn = fqdn(&format!("{}{}", service_name, self.search_suffix));
        DomainName::from_str(&fqdn).map_err(|source| Error::InvalidName { name: fqdn, source })
    }

    /// Queries the SRV records of `fqdn` and returns their targets, in answer order.
    fn lookup_srv(&self, fqdn: &DomainName) -> Result<Vec<SrvTarget>, Error> {
        let response = self.exchange(fqdn, Type::SRV)?;
        if response.rcode() != RCode::NO_ERROR {
            log::error!(
                "service lookup of {} via {}: DNS query did not succeed ({})",
                fqdn,
                self.server,
                response.rcode()
            );
            return Err(Error::Query {
                lookup: LookupKind::Service,
                rcode: response.rcode(),
            });
        }

        let mut targets = Vec::new();
        for rr in response.answers() {
            let RData::SRV(srv) = rr.data() else {
                continue;
            };
            if srv.target().is_root() {
                // RFC 2782: the service is decidedly not available at this target.
                log::debug!("ignoring SRV answer with root target for {}", fqdn);
                continue;
            }
            targets.push(SrvTarget {
                target: srv.target().clone(),
                port: srv.port(),
            });
        }
        Ok(targets)
    }

    /// Resolves an SRV target to its first A record, consulting the cache first.
    ///
    /// The A query carries the target's labels exactly as the SRV record contained them. Only the
    /// cache key is derived from the textual form.
    fn resolve_target(&mut self, target: &DomainName) -> Result<Ipv4Addr, Error> {
        let key = target.to_string();
        if let Some(ip) = self.cache.get(&key) {
            log::trace!("target {} cached as {}", target, ip);
            return Ok(ip);
        }

        let response = self.exchange(target, Type::A)?;
        if response.rcode() != RCode::NO_ERROR {
            log::error!(
                "service lookup of target {} via {}: target DNS query did not succeed ({})",
                target,
                self.server,
                response.rcode()
            );
            return Err(Error::Query {
                lookup: LookupKind::Target,
                rcode: response.rcode(),
            });
        }

        let ip = response.answers().iter().find_map(|rr| match rr.data() {
            RData::A(ip) => Some(*ip),
            _ => None,
        });
        match ip {
            Some(ip) => {
                self.cache.insert(&key, ip);
                Ok(ip)
            }
            None => {
                log::error!(
                    "service lookup of target {} via {}: no A entry in DNS response",
                    target,
                    self.server
                );
                Err(Error::NoRecord {
                    lookup: LookupKind::Target,
                })
            }
        }
    }

    fn exchange(&self, name: &DomainName, ty: Type) -> Result<Message, Error> {
        let query = Message::query(name.clone(), ty);
        match self.transport.exchange(&query, self.server) {
            Ok((response, rtt)) => {
                log::debug!("{} {} answered by {} in {:?}", name, ty, self.server, rtt);
                Ok(response)
            }
            Err(e) => {
                log::error!(
                    "error during connection to DNS server {} ({} {}): {}",
                    self.server,
                    name,
                    ty,
                    e
                );
                Err(Error::Transport(e))
            }
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ServiceDiscovery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDiscovery")
            .field("server", &self.server)
            .field("search_suffix", &self.search_suffix)
            .field("transport", &self.transport)
            .field("cached_targets", &self.cache.len())
            .finish()
    }
}

struct SrvTarget {
    target: DomainName,
    port: u16,
}

/// Parses a `host:port` DNS server address, resolving `host` with `lookup` if it is not an IP
/// address.
///
/// IPv6 literals must be bracketed (`[::1]:53`). When `host` resolves to several addresses, the
/// first one is used.
pub fn resolve_server<L: LookupHost + ?Sized>(
    address: &str,
    lookup: &L,
) -> Result<SocketAddr, Error> {
    let (host, port) = split_host_port(address)?;
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let resolution_error = |source| {
        log::error!("no service discovery host could be resolved for {}", host);
        Error::Resolution {
            host: host.to_owned(),
            source,
        }
    };
    let addrs = lookup
        .lookup_host(host)
        .map_err(|e| resolution_error(Some(e)))?;
    let ip = addrs.first().copied().ok_or_else(|| resolution_error(None))?;
    log::debug!("using {} for DNS server {}", ip, host);
    Ok(SocketAddr::new(ip, port))
}

fn split_host_port(address: &str) -> Result<(&str, u16), Error> {
    let invalid = |reason| Error::Configuration {
        address: address.to_owned(),
        reason,
    };

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, rest) = rest.split_once(']').ok_or_else(|| invalid("missing ']'"))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| invalid("missing port"))?;
        (host, port)
    } else {
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| invalid("missing port"))?;
        if host.contains(':') {
            return Err(invalid("too many colons"));
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(invalid("missing host"));
    }
    if port.is_empty() {
        return Err(invalid("missing port"));
    }
    let port = port.parse().map_err(|_| invalid("invalid port"))?;
    Ok((host, port))
}

/// Appends the root label to `name` unless it is already root-qualified.
fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_owned()
    } else {
        format!("{}.", name)
    }
}

fn strip_root(name: &str) -> &str {
    name.strip_suffix('.').unwrap_or(name)
}
