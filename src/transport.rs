//! DNS message transports.
//!
//! Discovery only depends on the [`Exchange`] trait. [`UdpTransport`] is the default
//! implementation; it retries truncated responses over [`TcpTransport`].

use std::{
    io::{self, Read, Write},
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, UdpSocket},
    time::{Duration, Instant},
};

use socket2::{Domain, Protocol, Socket, Type};

use crate::{hex::Hex, packet::Message, DNS_BUFFER_SIZE};

/// Sends a DNS query to a server and returns its response.
pub trait Exchange {
    /// Sends `query` to `server` and waits for the matching response.
    ///
    /// Returns the response together with the measured round-trip time. The response code is not
    /// interpreted; a `NX_DOMAIN` answer is still a successful exchange.
    fn exchange(&self, query: &Message, server: SocketAddr) -> io::Result<(Message, Duration)>;
}

impl<T: Exchange + ?Sized> Exchange for &T {
    fn exchange(&self, query: &Message, server: SocketAddr) -> io::Result<(Message, Duration)> {
        (**self).exchange(query, server)
    }
}

impl<T: Exchange + ?Sized> Exchange for Box<T> {
    fn exchange(&self, query: &Message, server: SocketAddr) -> io::Result<(Message, Duration)> {
        (**self).exchange(query, server)
    }
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Plain DNS over UDP.
///
/// Every exchange uses a fresh socket connected to the server, so only datagrams from the server
/// are considered. Datagrams that fail to decode or carry a different message ID are ignored.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    timeout: Duration,
    buffer_size: usize,
    tcp_fallback: bool,
}

impl UdpTransport {
    /// Creates a transport with a 2 second timeout, 512 byte receive buffer and TCP fallback.
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            buffer_size: DNS_BUFFER_SIZE,
            tcp_fallback: true,
        }
    }

    /// Sets the maximum time to wait for a response to a single query.
    ///
    /// The same timeout applies to the TCP retry of a truncated response.
    ///
    /// # Panics
    ///
    /// Panics if `timeout` is zero.
    pub fn set_timeout(&mut self, timeout: Duration) {
        assert!(!timeout.is_zero(), "DNS timeout must be non-zero");
        self.timeout = timeout;
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sets the size of the receive buffer. Values below 512 bytes are raised to 512.
    ///
    /// Only useful with servers that send larger datagrams than plain DNS allows.
    pub fn set_buffer_size(&mut self, size: usize) {
        self.buffer_size = size.max(DNS_BUFFER_SIZE);
    }

    /// Sets whether responses with the TC bit set are retried over TCP.
    ///
    /// When disabled, the truncated response is returned as-is.
    pub fn set_tcp_fallback(&mut self, enabled: bool) {
        self.tcp_fallback = enabled;
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Exchange for UdpTransport {
    fn exchange(&self, query: &Message, server: SocketAddr) -> io::Result<(Message, Duration)> {
        let data = query.encode()?;
        let id = query.header().id();
        let sock = udp_socket(server)?;

        let start = Instant::now();
        log::trace!("udp query to {}: {}", server, Hex(&data));
        sock.send(&data)?;

        let mut buf = vec![0; self.buffer_size];
        loop {
            let remaining = self.timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "timed out waiting for DNS response",
                ));
            }
            sock.set_read_timeout(Some(remaining))?;

            let len = sock.recv(&mut buf)?;
            let recv = &buf[..len];
            log::trace!("udp recv from {}: {}", server, Hex(recv));

            let header = match Message::decode_header(recv) {
                Ok(header) => header,
                Err(e) => {
                    log::warn!("failed to decode response from {}: {}", server, e);
                    continue;
                }
            };
            if !header.is_response() || header.id() != id {
                log::debug!(
                    "ignoring unrelated message from {} (id {}, expected {})",
                    server,
                    header.id(),
                    id
                );
                continue;
            }

            if header.is_truncated() && self.tcp_fallback {
                log::debug!("response from {} is truncated, retrying over TCP", server);
                let tcp = TcpTransport {
                    timeout: self.timeout,
                };
                let (response, _) = tcp.exchange(query, server)?;
                return Ok((response, start.elapsed()));
            }

            match Message::decode(recv) {
                Ok(response) => return Ok((response, start.elapsed())),
                Err(e) if header.is_truncated() => {
                    // Nothing better will arrive for this ID.
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("truncated DNS response: {}", e),
                    ));
                }
                Err(e) => {
                    log::warn!("failed to decode response from {}: {}", server, e);
                }
            }
        }
    }
}

fn udp_socket(server: SocketAddr) -> io::Result<UdpSocket> {
    let bind_addr: SocketAddr = if server.is_ipv6() {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    };
    let sock = Socket::new(Domain::for_address(server), Type::DGRAM, Some(Protocol::UDP))?;
    sock.bind(&bind_addr.into())?;
    sock.connect(&server.into())?;
    Ok(UdpSocket::from(sock))
}

/// DNS over TCP, one connection per query.
///
/// Messages are framed with a 2-byte length prefix ([RFC 1035, section 4.2.2]).
///
/// [RFC 1035, section 4.2.2]: https://datatracker.ietf.org/doc/html/rfc1035#section-4.2.2
#[derive(Debug, Clone)]
pub struct TcpTransport {
    timeout: Duration,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Sets the connect, read and write timeout.
    ///
    /// # Panics
    ///
    /// Panics if `timeout` is zero.
    pub fn set_timeout(&mut self, timeout: Duration) {
        assert!(!timeout.is_zero(), "DNS timeout must be non-zero");
        self.timeout = timeout;
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Exchange for TcpTransport {
    fn exchange(&self, query: &Message, server: SocketAddr) -> io::Result<(Message, Duration)> {
        let data = query.encode()?;
        let start = Instant::now();

        let sock = Socket::new(Domain::for_address(server), Type::STREAM, Some(Protocol::TCP))?;
        sock.connect_timeout(&server.into(), self.timeout)?;
        let mut stream = TcpStream::from(sock);
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        // `Message::encode` guarantees the length fits.
        let mut framed = Vec::with_capacity(2 + data.len());
        framed.extend_from_slice(&(data.len() as u16).to_be_bytes());
        framed.extend_from_slice(&data);
        log::trace!("tcp query to {}: {}", server, Hex(&data));
        stream.write_all(&framed)?;

        let mut len = [0; 2];
        stream.read_exact(&mut len)?;
        let mut buf = vec![0; usize::from(u16::from_be_bytes(len))];
        stream.read_exact(&mut buf)?;
        log::trace!("tcp recv from {}: {}", server, Hex(&buf));

        let response = Message::decode(&buf)?;
        if response.header().id() != query.header().id() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "DNS response ID does not match the query",
            ));
        }
        Ok((response, start.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener, thread};

    use crate::{
        name::DomainName,
        packet::{RData, ResourceRecord, Type as RecordType},
    };

    use super::*;

    fn a_reply(query: &Message, ip: [u8; 4]) -> Message {
        let mut reply = query.reply();
        let name = query.questions()[0].name().clone();
        reply.push_answer(ResourceRecord::new(name, RData::A(ip.into())));
        reply
    }

    fn a_query(name: &str) -> Message {
        Message::query(DomainName::from_str(name).unwrap(), RecordType::A)
    }

    fn first_a(msg: &Message) -> Ipv4Addr {
        match msg.answers()[0].data() {
            RData::A(ip) => *ip,
            other => panic!("expected A record, got {:?}", other),
        }
    }

    #[test]
    fn udp_ignores_unrelated_datagrams() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        let responder = thread::spawn(move || {
            let mut buf = [0; 512];
            let (len, peer) = server.recv_from(&mut buf).unwrap();
            let query = Message::decode(&buf[..len]).unwrap();

            server.send_to(b"garbage", peer).unwrap();
            let mut stale = a_reply(&query, [10, 0, 0, 99]);
            stale.header_mut().set_id(query.header().id().wrapping_add(1));
            server.send_to(&stale.encode().unwrap(), peer).unwrap();
            let reply = a_reply(&query, [10, 0, 0, 1]);
            server.send_to(&reply.encode().unwrap(), peer).unwrap();
        });

        let query = a_query("node1.node.consul");
        let (response, _) = UdpTransport::new().exchange(&query, addr).unwrap();
        assert_eq!(response.header().id(), query.header().id());
        assert_eq!(first_a(&response), Ipv4Addr::new(10, 0, 0, 1));
        responder.join().unwrap();
    }

    #[test]
    fn udp_timeout() {
        // Bound but never answers.
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut transport = UdpTransport::new();
        transport.set_timeout(Duration::from_millis(100));

        let err = transport
            .exchange(&a_query("node1.node.consul"), server.local_addr().unwrap())
            .unwrap_err();
        assert!(
            matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            "{:?}",
            err
        );
    }

    fn bind_udp_and_tcp() -> (UdpSocket, TcpListener) {
        for _ in 0..20 {
            let tcp = TcpListener::bind("127.0.0.1:0").unwrap();
            let port = tcp.local_addr().unwrap().port();
            if let Ok(udp) = UdpSocket::bind(("127.0.0.1", port)) {
                return (udp, tcp);
            }
        }
        panic!("could not find a port that is free for both UDP and TCP");
    }

    #[test]
    fn truncated_response_retries_over_tcp() {
        let (udp, tcp) = bind_udp_and_tcp();
        let addr = udp.local_addr().unwrap();

        let udp_responder = thread::spawn(move || {
            let mut buf = [0; 512];
            let (len, peer) = udp.recv_from(&mut buf).unwrap();
            let query = Message::decode(&buf[..len]).unwrap();
            let mut reply = query.reply();
            reply.header_mut().set_truncated(true);
            udp.send_to(&reply.encode().unwrap(), peer).unwrap();
        });
        let tcp_responder = thread::spawn(move || {
            let (mut stream, _) = tcp.accept().unwrap();
            let mut len = [0; 2];
            stream.read_exact(&mut len).unwrap();
            let mut buf = vec![0; usize::from(u16::from_be_bytes(len))];
            stream.read_exact(&mut buf).unwrap();
            let query = Message::decode(&buf).unwrap();

            let reply = a_reply(&query, [10, 0, 0, 7]).encode().unwrap();
            stream
                .write_all(&(reply.len() as u16).to_be_bytes())
                .unwrap();
            stream.write_all(&reply).unwrap();
        });

        let (response, _) = UdpTransport::new()
            .exchange(&a_query("node7.node.consul"), addr)
            .unwrap();
        assert!(!response.header().is_truncated());
        assert_eq!(first_a(&response), Ipv4Addr::new(10, 0, 0, 7));

        udp_responder.join().unwrap();
        tcp_responder.join().unwrap();
    }

    #[test]
    fn truncated_response_without_fallback() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        let responder = thread::spawn(move || {
            let mut buf = [0; 512];
            let (len, peer) = server.recv_from(&mut buf).unwrap();
            let query = Message::decode(&buf[..len]).unwrap();
            let mut reply = a_reply(&query, [10, 0, 0, 3]);
            reply.header_mut().set_truncated(true);
            server.send_to(&reply.encode().unwrap(), peer).unwrap();
        });

        let mut transport = UdpTransport::new();
        transport.set_tcp_fallback(false);
        let (response, _) = transport
            .exchange(&a_query("node3.node.consul"), addr)
            .unwrap();
        assert!(response.header().is_truncated());
        assert_eq!(first_a(&response), Ipv4Addr::new(10, 0, 0, 3));
        responder.join().unwrap();
    }

    #[test]
    fn udp_buffer_size() {
        let mut transport = UdpTransport::new();
        assert_eq!(transport.buffer_size, DNS_BUFFER_SIZE);
        transport.set_buffer_size(100);
        assert_eq!(transport.buffer_size, DNS_BUFFER_SIZE);
        transport.set_buffer_size(4096);
        assert_eq!(transport.buffer_size, 4096);
    }

    #[test]
    fn udp_large_response() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        let responder = thread::spawn(move || {
            let mut buf = [0; 512];
            let (len, peer) = server.recv_from(&mut buf).unwrap();
            let query = Message::decode(&buf[..len]).unwrap();
            let mut reply = query.reply();
            let name = query.questions()[0].name().clone();
            for i in 0..40 {
                let rr = ResourceRecord::new(name.clone(), RData::A([10, 0, 1, i].into()));
                reply.push_answer(rr);
            }
            let reply = reply.encode().unwrap();
            assert!(reply.len() > DNS_BUFFER_SIZE);
            server.send_to(&reply, peer).unwrap();
        });

        let mut transport = UdpTransport::new();
        transport.set_buffer_size(4096);
        let (response, _) = transport
            .exchange(&a_query("web.service.consul"), addr)
            .unwrap();
        assert_eq!(response.answers().len(), 40);
        assert_eq!(first_a(&response), Ipv4Addr::new(10, 0, 1, 0));
        responder.join().unwrap();
    }

    /// Answers one length-prefixed query on `listener`, letting `reply` build the response.
    fn tcp_respond_once(
        listener: TcpListener,
        reply: impl FnOnce(&Message) -> Message + Send + 'static,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut len = [0; 2];
            stream.read_exact(&mut len).unwrap();
            let mut buf = vec![0; usize::from(u16::from_be_bytes(len))];
            stream.read_exact(&mut buf).unwrap();
            let query = Message::decode(&buf).unwrap();

            let response = reply(&query).encode().unwrap();
            stream
                .write_all(&(response.len() as u16).to_be_bytes())
                .unwrap();
            stream.write_all(&response).unwrap();
        })
    }

    #[test]
    fn tcp_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let responder = tcp_respond_once(listener, |query| a_reply(query, [10, 0, 0, 5]));

        let mut transport = TcpTransport::new();
        transport.set_timeout(Duration::from_secs(5));
        let query = a_query("node5.node.consul");
        let (response, _) = transport.exchange(&query, addr).unwrap();
        assert_eq!(response.header().id(), query.header().id());
        assert_eq!(first_a(&response), Ipv4Addr::new(10, 0, 0, 5));
        responder.join().unwrap();
    }

    #[test]
    fn tcp_rejects_mismatched_id() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let responder = tcp_respond_once(listener, |query| {
            let mut reply = a_reply(query, [10, 0, 0, 5]);
            reply.header_mut().set_id(query.header().id().wrapping_add(1));
            reply
        });

        let err = TcpTransport::default()
            .exchange(&a_query("node5.node.consul"), addr)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        responder.join().unwrap();
    }
}
