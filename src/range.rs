// SPDX-License-Identifier: MIT
//! Decode requests: a DSpace byte range plus a concurrency mode

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use crate::error::{RacError, Result};

/// A DSpace range with optional bounds, written `"i..j"`
///
/// A missing start means 0 and a missing end means the decompressed size, so
/// `"..8"` is the first eight bytes and `"400.."` everything from 400 on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl DRange {
    /// The whole file
    pub fn full() -> Self {
        Self::default()
    }

    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Fill in omitted bounds and check the result against the file size
    pub fn resolve(&self, total_dsize: u64) -> Result<Range<u64>> {
        let start = self.start.unwrap_or(0);
        let end = self.end.unwrap_or(total_dsize);
        if start > end {
            return Err(RacError::InvertedRange { start, end });
        }
        if end > total_dsize {
            return Err(RacError::OutOfRange {
                start,
                end,
                total: total_dsize,
            });
        }
        Ok(start..end)
    }
}

impl fmt::Display for DRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(start) = self.start {
            write!(f, "{}", start)?;
        }
        f.write_str("..")?;
        if let Some(end) = self.end {
            write!(f, "{}", end)?;
        }
        Ok(())
    }
}

impl FromStr for DRange {
    type Err = RacError;

    fn from_str(s: &str) -> Result<Self> {
        let (start, end) = s.trim().split_once("..").ok_or_else(|| {
            RacError::config(format!("range {:?} is not of the form \"i..j\"", s))
        })?;
        let bound = |text: &str| -> Result<Option<u64>> {
            if text.is_empty() {
                return Ok(None);
            }
            text.parse::<u64>()
                .map(Some)
                .map_err(|e| RacError::config(format!("invalid range bound {:?}: {}", text, e)))
        };
        Ok(Self {
            start: bound(start)?,
            end: bound(end)?,
        })
    }
}

/// How chunk decoding is spread across threads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Decode chunk after chunk on the calling thread
    SingleThreaded,
    /// Decode on a worker pool; zero workers means one per available core
    Parallel { workers: usize },
}

impl Default for DecodeMode {
    fn default() -> Self {
        DecodeMode::Parallel { workers: 0 }
    }
}

/// What to decode and how
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodeRequest {
    pub range: DRange,
    pub mode: DecodeMode,
}

impl DecodeRequest {
    pub fn new(range: DRange, mode: DecodeMode) -> Self {
        Self { range, mode }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_both_bounds() {
        assert_eq!("400..500".parse::<DRange>().unwrap(), DRange::new(400, 500));
    }

    #[test]
    fn test_parse_omitted_bounds() {
        let head: DRange = "..8".parse().unwrap();
        assert_eq!(head.start, None);
        assert_eq!(head.end, Some(8));

        let tail: DRange = "400..".parse().unwrap();
        assert_eq!(tail.start, Some(400));
        assert_eq!(tail.end, None);

        assert_eq!("..".parse::<DRange>().unwrap(), DRange::full());
    }

    #[test]
    fn test_parse_malformed() {
        assert!(matches!("400".parse::<DRange>(), Err(RacError::Config(_))));
        assert!(matches!("a..b".parse::<DRange>(), Err(RacError::Config(_))));
        assert!(matches!("-1..5".parse::<DRange>(), Err(RacError::Config(_))));
    }

    #[test]
    fn test_display() {
        assert_eq!(DRange::new(1, 2).to_string(), "1..2");
        assert_eq!("..8".parse::<DRange>().unwrap().to_string(), "..8");
    }

    #[test]
    fn test_resolve_defaults() {
        assert_eq!(DRange::full().resolve(64).unwrap(), 0..64);
        assert_eq!("10..".parse::<DRange>().unwrap().resolve(64).unwrap(), 10..64);
        assert_eq!(DRange::new(64, 64).resolve(64).unwrap(), 64..64);
    }

    #[test]
    fn test_resolve_rejects_bad_ranges() {
        assert!(matches!(
            DRange::new(5, 3).resolve(64),
            Err(RacError::InvertedRange { start: 5, end: 3 })
        ));
        assert!(matches!(
            DRange::new(0, 65).resolve(64),
            Err(RacError::OutOfRange { .. })
        ));
        // An open end resolves to the total, which is then below the start
        assert!(matches!(
            "70..".parse::<DRange>().unwrap().resolve(64),
            Err(RacError::InvertedRange { .. })
        ));
    }
}
