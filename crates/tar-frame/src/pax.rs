//! PAX extended header record parsing.
//!
//! A PAX extension block is a sequence of records of the form
//! `"%d %s=%s\n"`: a decimal length covering the whole record, a space, the
//! key, `=`, the value, and a newline. Values are raw bytes; only keys are
//! required to be UTF-8.

use thiserror::Error;

/// PAX key overriding the member path.
pub const PAX_PATH: &str = "path";
/// PAX key overriding the link target.
pub const PAX_LINKPATH: &str = "linkpath";
/// PAX key overriding the member size.
pub const PAX_SIZE: &str = "size";

/// Error parsing a PAX extension record.
#[derive(Debug, Error)]
pub enum PaxError {
    /// The record framing is broken (bad length, missing separator, ...).
    #[error("malformed PAX extension record")]
    Malformed,
    /// The key is not valid UTF-8.
    #[error("PAX key is not valid UTF-8: {0}")]
    InvalidKey(#[from] std::str::Utf8Error),
}

/// A single PAX key/value pair.
#[derive(Debug, Clone)]
pub struct PaxExtension<'a> {
    key: &'a [u8],
    value: &'a [u8],
}

impl<'a> PaxExtension<'a> {
    /// The key as a string.
    pub fn key(&self) -> Result<&'a str, std::str::Utf8Error> {
        std::str::from_utf8(self.key)
    }

    /// The raw value bytes.
    #[must_use]
    pub fn value_bytes(&self) -> &'a [u8] {
        self.value
    }

    /// The value as a string, when it happens to be UTF-8.
    pub fn value(&self) -> Result<&'a str, std::str::Utf8Error> {
        std::str::from_utf8(self.value)
    }
}

/// Iterator over the records of a PAX extension block.
#[derive(Debug)]
pub struct PaxExtensions<'a> {
    data: &'a [u8],
}

impl<'a> PaxExtensions<'a> {
    /// Iterate over the records in `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }
}

impl<'a> Iterator for PaxExtensions<'a> {
    type Item = Result<PaxExtension<'a>, PaxError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }

        // decimal record length up to the first space
        let space = match self.data.iter().position(|&b| b == b' ') {
            Some(pos) => pos,
            None => return Some(Err(PaxError::Malformed)),
        };
        let len: usize = match std::str::from_utf8(&self.data[..space])
            .ok()
            .and_then(|s| s.parse().ok())
        {
            Some(len) if len > space + 1 && len <= self.data.len() => len,
            _ => return Some(Err(PaxError::Malformed)),
        };

        let record = &self.data[space + 1..len];
        self.data = &self.data[len..];

        // strip the trailing newline, then split at '='
        let record = match record.split_last() {
            Some((b'\n', rest)) => rest,
            _ => return Some(Err(PaxError::Malformed)),
        };
        let eq = match record.iter().position(|&b| b == b'=') {
            Some(pos) => pos,
            None => return Some(Err(PaxError::Malformed)),
        };

        Some(Ok(PaxExtension {
            key: &record[..eq],
            value: &record[eq + 1..],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_records() {
        let data = b"14 path=hello\n18 size=123456789\n";
        let records: Vec<_> = PaxExtensions::new(data)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key().unwrap(), "path");
        assert_eq!(records[0].value_bytes(), b"hello");
        assert_eq!(records[1].key().unwrap(), "size");
        assert_eq!(records[1].value().unwrap(), "123456789");
    }

    #[test]
    fn test_value_may_contain_equals() {
        let data = b"15 comment=a=b\n";
        let records: Vec<_> = PaxExtensions::new(data)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key().unwrap(), "comment");
        assert_eq!(records[0].value_bytes(), b"a=b");
    }

    #[test]
    fn test_malformed_records() {
        assert!(PaxExtensions::new(b"nolength").next().unwrap().is_err());
        assert!(PaxExtensions::new(b"999 path=x\n").next().unwrap().is_err());
        assert!(PaxExtensions::new(b"8 path=x").next().unwrap().is_err()); // no newline
        assert!(PaxExtensions::new(b"8 pathx\n").next().unwrap().is_err()); // no '='
    }

    #[test]
    fn test_empty_input() {
        assert!(PaxExtensions::new(b"").next().is_none());
    }
}
