use std::{cmp, mem::size_of};

use bytemuck::AnyBitPattern;

use crate::name::{DomainName, Label};

use super::Error;

/// Cursor over a complete DNS message.
///
/// The whole message is retained so that compressed domain names can follow pointers to earlier
/// parts of it.
#[derive(Debug, Clone)]
pub(crate) struct Reader<'a> {
    full_buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self {
            full_buf: buf,
            pos: 0,
        }
    }

    /// Returns the unread remainder of the message.
    pub(crate) fn buf(&self) -> &'a [u8] {
        &self.full_buf[self.pos..]
    }

    pub(crate) fn read_obj<T: AnyBitPattern>(&mut self) -> Result<T, Error> {
        let bytes = self.read_slice(size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    fn peek_u8(&self) -> Result<u8, Error> {
        self.full_buf.get(self.pos).copied().ok_or(Error::Eof)
    }

    pub(crate) fn read_slice(&mut self, len: usize) -> Result<&'a [u8], Error> {
        let slice = self
            .full_buf
            .get(self.pos..self.pos + len)
            .ok_or(Error::Eof)?;
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn read_array<const LEN: usize>(&mut self) -> Result<[u8; LEN], Error> {
        let slice = self.read_slice(LEN)?;
        let mut array = [0; LEN];
        array.copy_from_slice(slice);
        Ok(array)
    }

    /// Splits off a `Reader` over the next `len` bytes and skips past them.
    ///
    /// The returned reader can still follow name pointers into earlier parts of the message, but
    /// cannot read past `len`.
    pub(crate) fn split_off(&mut self, len: usize) -> Result<Reader<'a>, Error> {
        if self.buf().len() < len {
            return Err(Error::Eof);
        }
        let mut rdata = self.clone();
        rdata.full_buf = &rdata.full_buf[..self.pos + len];
        self.pos += len;
        Ok(rdata)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, Error> {
        self.read_obj::<u8>()
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, Error> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, Error> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    /// Reads a possibly compressed `<domain-name>`.
    pub(crate) fn read_domain_name(&mut self) -> Result<DomainName, Error> {
        let mut name = DomainName::ROOT;
        let mut min_pos = self.pos;
        let mut cursor = self.clone();
        loop {
            let length = cursor.peek_u8()?;
            match length & 0b1100_0000 {
                0b1100_0000 => {
                    let ptr = usize::from(cursor.read_u16()? & 0b0011_1111_1111_1111);
                    // Pointers must go strictly backwards. This rules out loops.
                    if ptr >= min_pos {
                        return Err(Error::PointerLoop);
                    }
                    self.pos = cmp::max(self.pos, cursor.pos);
                    min_pos = ptr;
                    cursor.pos = ptr;
                }
                0b0000_0000 => {
                    cursor.pos += 1;
                    if length == 0 {
                        break;
                    }
                    let label = cursor.read_slice(usize::from(length))?;
                    name.push_label(Label::try_new(label)?)?;
                }
                // 01 and 10 prefixes are reserved
                _ => return Err(Error::InvalidValue),
            }
        }

        self.pos = cmp::max(self.pos, cursor.pos);
        Ok(name)
    }
}
