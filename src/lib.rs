//! DNS-based service discovery via SRV and A records.
//!
//! A [`ServiceDiscovery`] is bound to a single DNS server (for example a Consul agent) and a
//! search suffix such as `.service.consul`. Looking up a service first queries the SRV records of
//! `<service><suffix>.`, then resolves the SRV targets to IPv4 addresses with A queries.
//!
//! ```no_run
//! use srv_discovery::ServiceDiscovery;
//!
//! let mut discovery = ServiceDiscovery::new_consul("127.0.0.1:8600")?;
//! let instance = discovery.discover_service("web")?;
//! println!("web is reachable at {}:{}", instance.ip(), instance.port());
//! # Ok::<(), srv_discovery::Error>(())
//! ```
//!
//! The DNS exchange itself is abstracted by the [`transport::Exchange`] trait. The default
//! [`transport::UdpTransport`] talks plain DNS over UDP and retries truncated responses over TCP.

pub mod discovery;
pub mod lookup;
pub mod name;
pub mod packet;
pub mod transport;

mod hex;
mod num;

pub use discovery::{Error, LookupKind, ServiceDiscovery, ServiceInstance, TargetCache};

/// Size of unicast DNS message buffers.
///
/// Unicast DNS messages over UDP are limited to 512 Bytes unless EDNS is in use.
pub const DNS_BUFFER_SIZE: usize = 512;

/// Search suffix used by Consul's DNS interface.
pub const CONSUL_SEARCH_SUFFIX: &str = ".service.consul";
