//! Domain names and labels.

use std::{
    fmt::{self, Write},
    str::FromStr,
};

use crate::packet::Error;

/// A `.`-separated component of a [`DomainName`].
///
/// Labels consist of arbitrary bytes and have a maximum length of 63 bytes. This type can only
/// represent non-empty labels, so the minimum length is 1 byte.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label {
    // Guaranteed to contain >0 and at most `Label::MAX_LEN` bytes.
    bytes: Box<[u8]>,
}

impl Label {
    /// The maximum length of a domain label.
    pub const MAX_LEN: usize = 0b0011_1111;

    /// Creates a [`Label`] from raw bytes or a string slice, returning an error if the bytes are
    /// empty or longer than [`Self::MAX_LEN`].
    pub fn try_new(label: impl AsRef<[u8]>) -> Result<Self, Error> {
        let label = label.as_ref();
        if label.is_empty() {
            return Err(Error::InvalidEmptyLabel);
        }

        if label.len() > Self::MAX_LEN {
            return Err(Error::LabelTooLong);
        }

        Ok(Self {
            bytes: label.into(),
        })
    }

    /// Returns the raw bytes of this label.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r#""{}""#, self.as_bytes().escape_ascii())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_bytes().escape_ascii().fmt(f)
    }
}

impl FromStr for Label {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_new(s)
    }
}

/// An absolute domain name, represented as a list of [`Label`]s.
///
/// The terminating empty (root) label is implicit. The [`Display`][fmt::Display] form is always
/// root-qualified, so `web.service.consul` is printed as `web.service.consul.`.
#[derive(PartialEq, Eq, Clone, Hash)]
pub struct DomainName {
    // Does not include the trailing empty label.
    labels: Vec<Label>,
}

impl DomainName {
    /// The empty root domain `.`.
    pub const ROOT: Self = Self { labels: Vec::new() };

    /// Maximum encoded length of a domain name, including length octets and the root label.
    pub const MAX_WIRE_LEN: usize = 255;

    /// Parses a domain name as a string of `.`-separated labels.
    ///
    /// A trailing `.` is allowed but not required.
    pub fn from_str(s: &str) -> Result<Self, Error> {
        s.parse()
    }

    /// Returns the `.`-separated labels making up this domain name.
    ///
    /// The trailing empty label is not included.
    #[inline]
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Returns `true` if this is the root domain `.`.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.labels.is_empty()
    }

    /// Appends a [`Label`] to the end of this domain name.
    ///
    /// Fails with [`Error::NameTooLong`] if the name would exceed [`Self::MAX_WIRE_LEN`] once
    /// encoded.
    pub fn push_label(&mut self, label: Label) -> Result<(), Error> {
        if self.wire_len() + 1 + label.as_bytes().len() > Self::MAX_WIRE_LEN {
            return Err(Error::NameTooLong);
        }
        self.labels.push(label);
        Ok(())
    }

    /// Returns the number of bytes this name occupies in an uncompressed DNS message.
    pub fn wire_len(&self) -> usize {
        self.labels
            .iter()
            .map(|label| 1 + label.as_bytes().len())
            .sum::<usize>()
            + 1
    }
}

impl fmt::Debug for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return f.write_char('.');
        }
        for label in &self.labels {
            label.fmt(f)?;
            f.write_char('.')?;
        }
        Ok(())
    }
}

impl FromStr for DomainName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "." {
            // `split_terminator` returns an empty label for this, so special-case it
            return Ok(Self::ROOT);
        }

        let mut name = DomainName::ROOT;
        for label in s.split_terminator('.') {
            name.push_label(label.parse()?)?;
        }
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_label() {
        assert_eq!(format!(" {} ", Label::try_new("\0").unwrap()), r#" \x00 "#);
        assert_eq!(format!(" {} ", Label::try_new("a").unwrap()), r#" a "#);
        assert_eq!(format!(" {:?} ", Label::try_new("\n").unwrap()), r#" "\n" "#);
    }

    #[test]
    fn label_length() {
        assert_eq!(Label::try_new(""), Err(Error::InvalidEmptyLabel));
        assert!(Label::try_new([b'a'; Label::MAX_LEN]).is_ok());
        assert_eq!(
            Label::try_new([b'a'; Label::MAX_LEN + 1]),
            Err(Error::LabelTooLong)
        );
    }

    #[test]
    fn domain_name_string_conversion() {
        assert_eq!("..".parse::<DomainName>(), Err(Error::InvalidEmptyLabel));
        assert_eq!(".com".parse::<DomainName>(), Err(Error::InvalidEmptyLabel));
        assert_eq!(
            "web..service.consul".parse::<DomainName>(),
            Err(Error::InvalidEmptyLabel)
        );
        assert_eq!(".".parse::<DomainName>(), Ok(DomainName::ROOT));
        assert!(DomainName::ROOT.is_root());
        assert_eq!("com.".parse::<DomainName>().unwrap().to_string(), "com.");
        assert_eq!("com".parse::<DomainName>().unwrap().to_string(), "com.");

        let name = DomainName::from_str("web.service.consul.").unwrap();
        assert_eq!(name.labels().len(), 3);
        assert_eq!(name.to_string(), "web.service.consul.");
    }

    #[test]
    fn domain_name_length() {
        assert_eq!(DomainName::ROOT.wire_len(), 1);
        assert_eq!(DomainName::from_str("a.bc").unwrap().wire_len(), 6);

        // 4 * (1 + 63) = 256 > 255
        let label = "a".repeat(Label::MAX_LEN);
        let long = [label.as_str(); 4].join(".");
        assert_eq!(long.parse::<DomainName>(), Err(Error::NameTooLong));

        let ok = [label.as_str(); 3].join(".");
        assert!(ok.parse::<DomainName>().is_ok());
    }
}
