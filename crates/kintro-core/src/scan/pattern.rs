use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Byte pattern with single-byte wildcards.
///
/// Textual form: hex byte pairs, `?` for one wildcard byte, spaces ignored.
/// `"48 8B ? ? 05"` and `"488B??05"` are the same pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    bytes: Vec<Option<u8>>,
}

impl Pattern {
    pub fn parse(text: &str) -> Result<Self> {
        let mut bytes = Vec::new();
        let mut chars = text.chars().filter(|c| *c != ' ');

        while let Some(c) = chars.next() {
            if c == '?' {
                bytes.push(None);
                continue;
            }

            let high = c.to_digit(16);
            let low = chars.next().and_then(|c| c.to_digit(16));
            match (high, low) {
                (Some(high), Some(low)) => bytes.push(Some((high * 16 + low) as u8)),
                _ => {
                    return Err(Error::InvalidPattern(format!(
                        "invalid byte at position {} in '{}'",
                        bytes.len(),
                        text
                    )));
                }
            }
        }

        if bytes.is_empty() {
            return Err(Error::InvalidPattern("pattern is empty".to_string()));
        }

        Ok(Self { bytes })
    }

    /// Byte-array pattern where every occurrence of `wildcard` matches anything
    pub fn from_bytes_with_wildcard(bytes: &[u8], wildcard: u8) -> Self {
        Self {
            bytes: bytes
                .iter()
                .map(|&b| if b == wildcard { None } else { Some(b) })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[Option<u8>] {
        &self.bytes
    }

    /// Whether `data` starts with this pattern
    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() >= self.bytes.len()
            && self
                .bytes
                .iter()
                .zip(data)
                .all(|(p, b)| p.is_none_or(|value| value == *b))
    }

    /// Offset of the first match in `data`
    pub fn find_in(&self, data: &[u8]) -> Option<usize> {
        if self.bytes.is_empty() || data.len() < self.bytes.len() {
            return None;
        }

        let last = data.len() - self.bytes.len();
        'outer: for i in 0..=last {
            for (j, byte) in self.bytes.iter().enumerate() {
                if let Some(value) = byte
                    && data[i + j] != *value
                {
                    continue 'outer;
                }
            }
            return Some(i);
        }
        None
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .bytes
            .iter()
            .map(|b| match b {
                Some(value) => format!("{:02X}", value),
                None => "?".to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        f.write_str(&text)
    }
}

/// Match `bytes` against a textual pattern in lockstep.
///
/// Invalid patterns and patterns longer than `bytes` never match.
pub fn compare(bytes: &[u8], pattern: &str) -> bool {
    Pattern::parse(pattern).is_ok_and(|p| p.matches(bytes))
}
