// SPDX-License-Identifier: MIT
//! CSpace page alignment
//!
//! With a page size P, a chunk that would otherwise straddle more P-aligned
//! pages than its length requires is moved to the next page boundary. The gap
//! is filled with zeros and never referenced by the index.

/// Computes the zero padding to emit before each chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PagePadder {
    page_size: u64,
}

impl PagePadder {
    /// A page size of zero disables padding
    pub fn new(page_size: u64) -> Self {
        Self { page_size }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn is_enabled(&self) -> bool {
        self.page_size > 0
    }

    /// Number of zero bytes to write at `pos` before a chunk of `len` bytes
    pub fn padding_for(&self, pos: u64, len: u64) -> u64 {
        if self.page_size == 0 || len == 0 {
            return 0;
        }
        let within = pos % self.page_size;
        if within == 0 {
            return 0;
        }
        if self.pages_spanned(pos, len) > len.div_ceil(self.page_size) {
            self.page_size - within
        } else {
            0
        }
    }

    /// How many pages the byte range `[pos, pos + len)` touches
    pub fn pages_spanned(&self, pos: u64, len: u64) -> u64 {
        if self.page_size == 0 || len == 0 {
            return 0;
        }
        let within = pos % self.page_size;
        (within + len).div_ceil(self.page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled() {
        let padder = PagePadder::new(0);
        assert!(!padder.is_enabled());
        assert_eq!(padder.padding_for(13, 100), 0);
    }

    #[test]
    fn test_aligned_position_needs_no_padding() {
        let padder = PagePadder::new(64);
        assert_eq!(padder.padding_for(128, 200), 0);
    }

    #[test]
    fn test_fitting_chunk_is_not_moved() {
        let padder = PagePadder::new(64);
        // 40..60 stays within the first page
        assert_eq!(padder.padding_for(40, 20), 0);
        // 100 bytes need two pages wherever they start, 10..110 uses two
        assert_eq!(padder.padding_for(10, 100), 0);
    }

    #[test]
    fn test_straddling_chunk_is_moved() {
        let padder = PagePadder::new(64);
        // 40..80 crosses a boundary although 40 bytes fit in one page
        assert_eq!(padder.padding_for(40, 40), 24);
        // 60..160 would touch three pages for a two-page chunk
        assert_eq!(padder.padding_for(60, 100), 4);
    }

    #[test]
    fn test_padding_minimizes_pages() {
        let padder = PagePadder::new(32);
        for pos in 0..200u64 {
            for len in 1..100u64 {
                let start = pos + padder.padding_for(pos, len);
                assert_eq!(
                    padder.pages_spanned(start, len),
                    len.div_ceil(32),
                    "pos {} len {}",
                    pos,
                    len
                );
            }
        }
    }
}
