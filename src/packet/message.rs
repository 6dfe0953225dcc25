//! Owned DNS messages.

use std::{fmt, net::Ipv4Addr};

use crate::name::DomainName;

use super::{reader::Reader, writer::Writer, Class, Error, Header, RCode, Type};

/// A complete DNS message: header plus the four record sections.
///
/// Section counts in the [`Header`] are derived from the section contents when encoding.
#[derive(Debug, Clone, Default)]
pub struct Message {
    header: Header,
    questions: Vec<Question>,
    answers: Vec<ResourceRecord>,
    authority: Vec<ResourceRecord>,
    additional: Vec<ResourceRecord>,
}

impl Message {
    /// Creates an empty message with an all-zero header.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recursive query for records of type `ty` owned by `name`.
    ///
    /// The message ID is chosen at random.
    pub fn query(name: DomainName, ty: Type) -> Self {
        let mut header = Header::default();
        header.set_id(fastrand::u16(..));
        header.set_recursion_desired(true);
        Self {
            header,
            questions: vec![Question::new(name, ty)],
            ..Self::default()
        }
    }

    /// Creates an empty response to `self`, echoing the ID, RD bit and *Question* section.
    pub fn reply(&self) -> Self {
        let mut header = Header::default();
        header.set_id(self.header.id());
        header.set_response(true);
        header.set_recursion_desired(self.header.is_recursion_desired());
        Self {
            header,
            questions: self.questions.clone(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn header(&self) -> &Header {
        &self.header
    }

    #[inline]
    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Shorthand for `header().rcode()`.
    #[inline]
    pub fn rcode(&self) -> RCode {
        self.header.rcode()
    }

    #[inline]
    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    /// Returns the *Answer* section, in the order the records appeared in the message.
    #[inline]
    pub fn answers(&self) -> &[ResourceRecord] {
        &self.answers
    }

    #[inline]
    pub fn authority(&self) -> &[ResourceRecord] {
        &self.authority
    }

    #[inline]
    pub fn additional(&self) -> &[ResourceRecord] {
        &self.additional
    }

    pub fn push_answer(&mut self, rr: ResourceRecord) {
        self.answers.push(rr);
    }

    pub fn push_authority(&mut self, rr: ResourceRecord) {
        self.authority.push(rr);
    }

    pub fn push_additional(&mut self, rr: ResourceRecord) {
        self.additional.push(rr);
    }

    /// Decodes only the header of the message in `buf`.
    ///
    /// Useful for checking the ID and truncation bit of a response before the rest of it is
    /// decoded.
    pub fn decode_header(buf: &[u8]) -> Result<Header, Error> {
        Reader::new(buf).read_obj::<Header>()
    }

    /// Decodes a complete message.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        let mut r = Reader::new(buf);
        let header = r.read_obj::<Header>()?;
        let [qdcount, ancount, nscount, arcount] = header.counts();

        let questions = (0..qdcount)
            .map(|_| Question::decode(&mut r))
            .collect::<Result<_, _>>()?;
        let mut section = |count: u16| {
            (0..count)
                .map(|_| ResourceRecord::decode(&mut r))
                .collect::<Result<Vec<_>, _>>()
        };
        let answers = section(ancount)?;
        let authority = section(nscount)?;
        let additional = section(arcount)?;

        Ok(Self {
            header,
            questions,
            answers,
            authority,
            additional,
        })
    }

    /// Encodes the message without name compression.
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let count = |len: usize| u16::try_from(len).map_err(|_| Error::Truncated);
        let mut header = self.header;
        header.set_counts([
            count(self.questions.len())?,
            count(self.answers.len())?,
            count(self.authority.len())?,
            count(self.additional.len())?,
        ]);

        let mut w = Writer::new();
        w.write_slice(bytemuck::bytes_of(&header));
        for q in &self.questions {
            q.encode(&mut w);
        }
        for rr in self
            .answers
            .iter()
            .chain(&self.authority)
            .chain(&self.additional)
        {
            rr.encode(&mut w)?;
        }
        w.finish()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let h = &self.header;
        write!(
            f,
            ";; id={} opcode={} rcode={} flags=",
            h.id(),
            h.opcode(),
            h.rcode()
        )?;
        let flags = [
            (h.is_response(), "qr"),
            (h.is_authority(), "aa"),
            (h.is_truncated(), "tc"),
            (h.is_recursion_desired(), "rd"),
            (h.is_recursion_available(), "ra"),
        ];
        let flags: Vec<_> = flags.iter().filter(|(set, _)| *set).map(|f| f.1).collect();
        writeln!(f, "[{}]", flags.join(" "))?;

        for q in &self.questions {
            writeln!(f, ";{}", q)?;
        }
        let sections = [
            ("ANSWER", &self.answers),
            ("AUTHORITY", &self.authority),
            ("ADDITIONAL", &self.additional),
        ];
        for (title, records) in sections {
            if records.is_empty() {
                continue;
            }
            writeln!(f, ";; {}", title)?;
            for rr in records {
                writeln!(f, "{}", rr)?;
            }
        }
        Ok(())
    }
}

/// An entry of the *Question* section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    name: DomainName,
    ty: Type,
    class: Class,
}

impl Question {
    /// Creates a question for records of type `ty` in the Internet class.
    pub fn new(name: DomainName, ty: Type) -> Self {
        Self {
            name,
            ty,
            class: Class::IN,
        }
    }

    #[inline]
    pub fn name(&self) -> &DomainName {
        &self.name
    }

    #[inline]
    pub fn ty(&self) -> Type {
        self.ty
    }

    #[inline]
    pub fn class(&self) -> Class {
        self.class
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self {
            name: r.read_domain_name()?,
            ty: Type(r.read_u16()?),
            class: Class(r.read_u16()?),
        })
    }

    fn encode(&self, w: &mut Writer) {
        w.write_domain_name(&self.name);
        w.write_u16(self.ty.0);
        w.write_u16(self.class.0);
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.name, self.class, self.ty)
    }
}

/// A resource record from the *Answer*, *Authority* or *Additional* section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRecord {
    name: DomainName,
    class: Class,
    ttl: u32,
    data: RData,
}

impl ResourceRecord {
    /// Creates an Internet-class record with a TTL of 0.
    pub fn new(name: DomainName, data: RData) -> Self {
        Self {
            name,
            class: Class::IN,
            ttl: 0,
            data,
        }
    }

    #[inline]
    pub fn ttl(self, ttl: u32) -> Self {
        Self { ttl, ..self }
    }

    #[inline]
    pub fn name(&self) -> &DomainName {
        &self.name
    }

    #[inline]
    pub fn class(&self) -> Class {
        self.class
    }

    /// Returns the record's Time To Live, in seconds.
    #[inline]
    pub fn time_to_live(&self) -> u32 {
        self.ttl
    }

    #[inline]
    pub fn data(&self) -> &RData {
        &self.data
    }

    #[inline]
    pub fn record_type(&self) -> Type {
        self.data.record_type()
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, Error> {
        let name = r.read_domain_name()?;
        let ty = Type(r.read_u16()?);
        let class = Class(r.read_u16()?);
        let ttl = r.read_u32()?;
        let rdlength = r.read_u16()?;
        let mut rdata = r.split_off(usize::from(rdlength))?;
        let data = RData::decode(ty, &mut rdata)?;
        Ok(Self {
            name,
            class,
            ttl,
            data,
        })
    }

    fn encode(&self, w: &mut Writer) -> Result<(), Error> {
        w.write_domain_name(&self.name);
        w.write_u16(self.record_type().0);
        w.write_u16(self.class.0);
        w.write_u32(self.ttl);
        w.write_rdata(|w| self.data.encode(w))
    }
}

impl fmt::Display for ResourceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.name,
            self.ttl,
            self.class,
            self.record_type(),
            self.data
        )
    }
}

/// Record data.
///
/// Record types that service discovery does not interpret are kept as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RData {
    A(Ipv4Addr),
    CNAME(DomainName),
    SRV(Srv),
    Other { ty: Type, data: Vec<u8> },
}

impl RData {
    pub fn record_type(&self) -> Type {
        match self {
            RData::A(_) => Type::A,
            RData::CNAME(_) => Type::CNAME,
            RData::SRV(_) => Type::SRV,
            RData::Other { ty, .. } => *ty,
        }
    }

    fn decode(ty: Type, r: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(match ty {
            Type::A => {
                if r.buf().len() != 4 {
                    return Err(Error::InvalidValue);
                }
                RData::A(Ipv4Addr::from(r.read_array::<4>()?))
            }
            Type::CNAME => RData::CNAME(r.read_domain_name()?),
            Type::SRV => RData::SRV(Srv {
                priority: r.read_u16()?,
                weight: r.read_u16()?,
                port: r.read_u16()?,
                target: r.read_domain_name()?,
            }),
            _ => RData::Other {
                ty,
                data: r.buf().to_vec(),
            },
        })
    }

    fn encode(&self, w: &mut Writer) {
        match self {
            RData::A(addr) => w.write_slice(&addr.octets()),
            RData::CNAME(name) => w.write_domain_name(name),
            RData::SRV(srv) => {
                w.write_u16(srv.priority);
                w.write_u16(srv.weight);
                w.write_u16(srv.port);
                w.write_domain_name(&srv.target);
            }
            RData::Other { data, .. } => w.write_slice(data),
        }
    }
}

impl fmt::Display for RData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RData::A(addr) => addr.fmt(f),
            RData::CNAME(name) => name.fmt(f),
            RData::SRV(srv) => srv.fmt(f),
            RData::Other { data, .. } => write!(f, "\\# {} {}", data.len(), crate::hex::Hex(&data[..])),
        }
    }
}

/// SRV record data ([RFC 2782]).
///
/// [RFC 2782]: https://datatracker.ietf.org/doc/html/rfc2782
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Srv {
    priority: u16,
    weight: u16,
    port: u16,
    target: DomainName,
}

impl Srv {
    pub fn new(priority: u16, weight: u16, port: u16, target: DomainName) -> Self {
        Self {
            priority,
            weight,
            port,
            target,
        }
    }

    /// Lower values mean that the target should be preferred.
    #[inline]
    pub fn priority(&self) -> u16 {
        self.priority
    }

    #[inline]
    pub fn weight(&self) -> u16 {
        self.weight
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The host providing the service. `.` means the service is not available at this domain.
    #[inline]
    pub fn target(&self) -> &DomainName {
        &self.target
    }
}

impl fmt::Display for Srv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.priority, self.weight, self.port, self.target
        )
    }
}

#[cfg(test)]
mod tests {
    use expect_test::expect;

    use crate::hex;

    use super::*;

    fn name(s: &str) -> DomainName {
        s.parse().unwrap()
    }

    #[test]
    fn encode_query() {
        let mut query = Message::query(name("web.service.consul"), Type::SRV);
        query.header_mut().set_id(0x1234);
        let bytes = query.encode().unwrap();
        assert_eq!(
            bytes,
            hex::parse(
                "1234 0100 0001 0000 0000 0000
                 03 776562 07 73657276696365 06 636f6e73756c 00
                 0021 0001"
            )
        );
    }

    #[test]
    fn decode_consul_srv_response() {
        // Response from a Consul agent, with the target compressed against the question name.
        let msg = hex::parse(
            "1234 8580 0001 0002 0000 0000
             03 776562 07 73657276696365 06 636f6e73756c 00 0021 0001
             c00c 0021 0001 00000000 000e 0001 0001 1f90 05 6e6f646531 c010
             c00c 0021 0001 00000000 000e 0001 0001 1f91 05 6e6f646532 c010",
        );
        let msg = Message::decode(&msg).unwrap();
        assert_eq!(msg.header().id(), 0x1234);
        assert!(msg.header().is_response());
        assert!(msg.header().is_authority());
        assert_eq!(msg.rcode(), RCode::NO_ERROR);
        assert_eq!(msg.questions().len(), 1);

        let targets: Vec<_> = msg
            .answers()
            .iter()
            .map(|rr| match rr.data() {
                RData::SRV(srv) => (srv.target().to_string(), srv.port()),
                other => panic!("unexpected record {:?}", other),
            })
            .collect();
        assert_eq!(
            targets,
            [
                ("node1.service.consul.".to_string(), 8080),
                ("node2.service.consul.".to_string(), 8081),
            ]
        );

        expect![[r#"
            ;; id=4660 opcode=QUERY rcode=NO_ERROR flags=[qr aa rd ra]
            ;web.service.consul. IN SRV
            ;; ANSWER
            web.service.consul. 0 IN SRV 1 1 8080 node1.service.consul.
            web.service.consul. 0 IN SRV 1 1 8081 node2.service.consul.
        "#]]
        .assert_eq(&msg.to_string());
    }

    #[test]
    fn reply_roundtrip() {
        let query = Message::query(name("node1.node.dc1.consul"), Type::A);
        let mut reply = query.reply();
        reply.header_mut().set_rcode(RCode::NO_ERROR);
        reply.push_answer(
            ResourceRecord::new(
                name("node1.node.dc1.consul"),
                RData::CNAME(name("node1.internal")),
            )
            .ttl(30),
        );
        reply.push_answer(ResourceRecord::new(
            name("node1.internal"),
            RData::A(Ipv4Addr::new(10, 0, 0, 1)),
        ));
        reply.push_authority(
            ResourceRecord::new(
                name("dc1.consul"),
                RData::Other {
                    ty: Type::NS,
                    data: vec![2, b'n', b's', 0],
                },
            )
            .ttl(300),
        );
        reply.push_additional(ResourceRecord::new(
            DomainName::ROOT,
            RData::Other {
                ty: Type::OPT,
                data: vec![],
            },
        ));

        let decoded = Message::decode(&reply.encode().unwrap()).unwrap();
        assert_eq!(decoded.header().id(), query.header().id());
        assert!(decoded.header().is_response());
        assert!(decoded.header().is_recursion_desired());
        assert_eq!(decoded.questions(), query.questions());
        assert_eq!(decoded.answers(), reply.answers());
        assert_eq!(decoded.additional(), reply.additional());
        assert_eq!(decoded.authority(), reply.authority());
        assert_eq!(decoded.authority()[0].time_to_live(), 300);
    }

    #[test]
    fn decode_errors() {
        assert_eq!(Message::decode(&[0; 11]).unwrap_err(), Error::Eof);

        // Header announces an answer that isn't there.
        let msg = hex::parse("0001 8000 0000 0001 0000 0000");
        assert_eq!(Message::decode(&msg).unwrap_err(), Error::Eof);
        assert_eq!(Message::decode_header(&msg).unwrap().id(), 1);

        // A record with a 3-byte address.
        let msg = hex::parse("0001 8000 0000 0001 0000 0000 00 0001 0001 00000000 0003 0a0000");
        assert_eq!(Message::decode(&msg).unwrap_err(), Error::InvalidValue);
    }
}
