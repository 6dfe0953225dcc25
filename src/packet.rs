//! DNS message model and wire codec.
//!
//! Only the parts of RFC 1035 needed for SRV-based service discovery are modeled in detail
//! (queries, `A`, `CNAME` and `SRV` records). All other record types are carried as opaque data.

#[macro_use]
mod macros;
mod error;
pub mod message;
mod reader;
mod writer;

use core::fmt;

use bitflags::bitflags;

use crate::num::U16;

pub use error::Error;
pub use message::{Message, Question, RData, ResourceRecord, Srv};

ffi_enum! {
    /// DNS message operation codes.
    pub enum Opcode: u8 {
        /// Standard query (or response to a query).
        QUERY = 0,
        /// Inverse query. Obsolete.
        IQUERY = 1,
        /// Server status request.
        STATUS = 2,
        NOTIFY = 4,
        UPDATE = 5,
    }
}

ffi_enum! {
    /// Server response codes.
    ///
    /// Only rcodes with a value of 15 or less fit into the message [`Header`].
    pub enum RCode: u8 {
        /// No error.
        NO_ERROR = 0,
        /// The query sent by the client was erroneous.
        FORM_ERR = 1,
        /// A server-side error prevented processing of the query.
        SERV_FAIL = 2,
        /// The queried domain name does not exist.
        NX_DOMAIN = 3,
        /// The requested query type is not supported by the server.
        NOT_IMP = 4,
        /// The server refused to answer the query for policy reasons.
        REFUSED = 5,
        YX_DOMAIN = 6,
        YX_RR_SET = 7,
        NX_RR_SET = 8,
        NOT_AUTH = 9,
        NOT_ZONE = 10,
    }
}

ffi_enum! {
    /// Resource record types, also used as the QTYPE of a question.
    pub enum Type: u16 {
        A = 1,
        NS = 2,
        CNAME = 5,
        SOA = 6,
        PTR = 12,
        MX = 15,
        TXT = 16,
        AAAA = 28,
        SRV = 33,
        OPT = 41,
        /// Question-only: all record types.
        ANY = 255,
    }
}

ffi_enum! {
    /// Resource record classes, also used as the QCLASS of a question.
    pub enum Class: u16 {
        /// The Internet.
        IN = 1,
        /// Chaosnet.
        CH = 3,
        /// Hesiod.
        HS = 4,
        /// Question-only: any class.
        ANY = 255,
    }
}

// Bit positions in the header flags are inverted, because RFC 1035 starts counting at the MSb.
const fn be_pos(pos: u16) -> u16 {
    15 - pos
}

bitflags! {
    #[derive(Debug)]
    #[repr(transparent)]
    struct HeaderFlags: u16 {
        /// If set, the message is a response to a query. If unset, it is a query.
        const QR = 1 << be_pos(0);
        const OPCODE = Self::OPCODE_MASK;
        /// Authoritative answer.
        const AA = 1 << be_pos(5);
        /// Set if the message was truncated to fit the transmission channel.
        const TC = 1 << be_pos(6);
        /// Recursion desired. Copied into the response.
        const RD = 1 << be_pos(7);
        /// Recursion available.
        const RA = 1 << be_pos(8);
        const Z = 0b111 << be_pos(9);
        const RCODE = Self::RCODE_MASK;
    }
}

impl HeaderFlags {
    const OPCODE_POS: u16 = 11;
    const OPCODE_MASK: u16 = 0b1111 << Self::OPCODE_POS;

    const RCODE_POS: u16 = 0;
    const RCODE_MASK: u16 = 0b1111 << Self::RCODE_POS;
}

/// Message header.
///
/// The section counts are filled in when a [`Message`] is encoded and are otherwise ignored.
#[derive(Clone, Copy, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C, packed)]
pub struct Header {
    id: U16,
    flags: U16,
    qdcount: U16,
    ancount: U16,
    nscount: U16,
    arcount: U16,
}

impl Header {
    fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_retain(self.flags.get())
    }

    fn modify_flags(&mut self, with: impl FnOnce(&mut HeaderFlags)) {
        let mut flags = self.flags();
        with(&mut flags);
        self.flags = flags.bits().into();
    }

    /// Returns the 16-bit message ID.
    ///
    /// Servers copy this ID into the response so that clients can match responses to queries.
    #[inline]
    pub fn id(&self) -> u16 {
        self.id.get()
    }

    #[inline]
    pub fn set_id(&mut self, id: u16) {
        self.id = id.into();
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        self.flags().contains(HeaderFlags::QR)
    }

    pub fn set_response(&mut self, is_response: bool) {
        self.modify_flags(|f| f.set(HeaderFlags::QR, is_response));
    }

    /// Returns whether the truncation flag is set.
    pub fn is_truncated(&self) -> bool {
        self.flags().contains(HeaderFlags::TC)
    }

    pub fn set_truncated(&mut self, trunc: bool) {
        self.modify_flags(|f| f.set(HeaderFlags::TC, trunc));
    }

    pub fn is_recursion_desired(&self) -> bool {
        self.flags().contains(HeaderFlags::RD)
    }

    pub fn set_recursion_desired(&mut self, rd: bool) {
        self.modify_flags(|f| f.set(HeaderFlags::RD, rd));
    }

    pub fn is_recursion_available(&self) -> bool {
        self.flags().contains(HeaderFlags::RA)
    }

    pub fn is_authority(&self) -> bool {
        self.flags().contains(HeaderFlags::AA)
    }

    pub fn opcode(&self) -> Opcode {
        let bits = self.flags().bits();
        Opcode(((bits & HeaderFlags::OPCODE_MASK) >> HeaderFlags::OPCODE_POS) as u8)
    }

    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.modify_flags(|f| {
            f.remove(HeaderFlags::OPCODE);
            *f.0.bits_mut() |=
                (u16::from(opcode.0) << HeaderFlags::OPCODE_POS) & HeaderFlags::OPCODE_MASK;
        });
    }

    pub fn rcode(&self) -> RCode {
        let bits = self.flags().bits();
        RCode(((bits & HeaderFlags::RCODE_MASK) >> HeaderFlags::RCODE_POS) as u8)
    }

    pub fn set_rcode(&mut self, rcode: RCode) {
        self.modify_flags(|f| {
            f.remove(HeaderFlags::RCODE);
            *f.0.bits_mut() |=
                (u16::from(rcode.0) << HeaderFlags::RCODE_POS) & HeaderFlags::RCODE_MASK;
        });
    }

    fn counts(&self) -> [u16; 4] {
        [
            self.qdcount.get(),
            self.ancount.get(),
            self.nscount.get(),
            self.arcount.get(),
        ]
    }

    fn set_counts(&mut self, [qd, an, ns, ar]: [u16; 4]) {
        self.qdcount = qd.into();
        self.ancount = an.into();
        self.nscount = ns.into();
        self.arcount = ar.into();
    }
}

impl fmt::Debug for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Header")
            .field("id", &self.id())
            .field("flags", &self.flags())
            .field("opcode", &self.opcode())
            .field("rcode", &self.rcode())
            .finish()
    }
}
