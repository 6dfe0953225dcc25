use crate::name::DomainName;

use super::Error;

/// Growable output buffer for an uncompressed DNS message.
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Largest message that can be framed over TCP.
    pub(crate) const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

    pub(crate) fn new() -> Self {
        Self {
            buf: Vec::with_capacity(crate::DNS_BUFFER_SIZE),
        }
    }

    pub(crate) fn pos(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn write_slice(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub(crate) fn write_u8(&mut self, b: u8) {
        self.buf.push(b);
    }

    pub(crate) fn write_u16(&mut self, v: u16) {
        self.write_slice(&v.to_be_bytes());
    }

    pub(crate) fn write_u32(&mut self, v: u32) {
        self.write_slice(&v.to_be_bytes());
    }

    /// Overwrites a previously written `u16` at `pos`.
    pub(crate) fn patch_u16(&mut self, pos: usize, v: u16) {
        self.buf[pos..pos + 2].copy_from_slice(&v.to_be_bytes());
    }

    pub(crate) fn write_domain_name(&mut self, name: &DomainName) {
        for label in name.labels() {
            // `Label` guarantees at most 63 bytes.
            self.write_u8(label.as_bytes().len() as u8);
            self.write_slice(label.as_bytes());
        }
        // Implicit root label at the end.
        self.write_u8(0);
    }

    /// Runs `f` to write RDATA, preceded by its 16-bit length.
    pub(crate) fn write_rdata(&mut self, f: impl FnOnce(&mut Self)) -> Result<(), Error> {
        let len_pos = self.pos();
        self.write_u16(0);
        f(self);
        let len = self.pos() - len_pos - 2;
        let len = u16::try_from(len).map_err(|_| Error::Truncated)?;
        self.patch_u16(len_pos, len);
        Ok(())
    }

    pub(crate) fn finish(self) -> Result<Vec<u8>, Error> {
        if self.buf.len() > Self::MAX_MESSAGE_LEN {
            return Err(Error::Truncated);
        }
        Ok(self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rdata_length_prefix() {
        let mut w = Writer::new();
        w.write_u8(0xaa);
        w.write_rdata(|w| {
            w.write_u16(1);
            w.write_u8(2);
        })
        .unwrap();
        assert_eq!(w.finish().unwrap(), [0xaa, 0, 3, 0, 1, 2]);
    }

    #[test]
    fn domain_name() {
        let mut w = Writer::new();
        w.write_domain_name(&"a.bc".parse().unwrap());
        w.write_domain_name(&DomainName::ROOT);
        assert_eq!(w.finish().unwrap(), b"\x01a\x02bc\x00\x00");
    }
}
