//! Byte pattern matching with wildcard support.
//!
//! Patterns are written as space separated hex bytes where `??` (or `?`)
//! matches any byte, e.g. `"4C 8D ?? ?? ?? ?? ?? 48"`.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::{Error, Result};
use crate::process::{ModuleImage, ReadMemory};

/// Size of each read while scanning a module image
pub const SCAN_CHUNK_SIZE: usize = 0x10000;

/// Granularity of the retry when a whole chunk cannot be read
pub const SCAN_PAGE_SIZE: usize = 0x1000;

/// A byte pattern where `None` entries are wildcards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    bytes: Vec<Option<u8>>,
}

impl Pattern {
    /// Build a pattern from explicit bytes and wildcards
    pub fn new(bytes: Vec<Option<u8>>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InvalidPattern("Pattern is empty".to_string()));
        }
        Ok(Self { bytes })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut bytes = Vec::new();
        for token in text.split_whitespace() {
            if token == "??" || token == "?" {
                bytes.push(None);
                continue;
            }

            let value = u8::from_str_radix(token, 16).map_err(|e| {
                Error::InvalidPattern(format!("Invalid pattern token '{}': {}", token, e))
            })?;
            bytes.push(Some(value));
        }

        Self::new(bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; an empty pattern cannot be constructed
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[Option<u8>] {
        &self.bytes
    }

    /// Check whether `window` matches the pattern at its start
    pub fn matches(&self, window: &[u8]) -> bool {
        window.len() >= self.bytes.len()
            && self
                .bytes
                .iter()
                .zip(window)
                .all(|(expected, actual)| expected.is_none_or(|value| value == *actual))
    }

    /// Find the first occurrence of the pattern in a buffer.
    ///
    /// Returns the byte offset where the pattern starts, or None if not found.
    pub fn find_first(&self, buffer: &[u8]) -> Option<usize> {
        if self.bytes.len() > buffer.len() {
            return None;
        }

        buffer
            .windows(self.bytes.len())
            .position(|window| self.matches(window))
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
                None => "??".to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        f.write_str(&text)
    }
}

/// Scan a module image for the first match of `pattern`.
///
/// The image is read in chunks; the last `pattern.len() - 1` bytes of every
/// chunk are carried over so matches spanning a chunk boundary are found.
/// A chunk that fails to read is retried page by page, so only the pages
/// that really are unreadable get skipped. Matching restarts after a gap.
pub fn scan<R: ReadMemory>(reader: &R, module: &ModuleImage, pattern: &Pattern) -> Option<u64> {
    scan_with_chunk_size(reader, module, pattern, SCAN_CHUNK_SIZE)
}

pub fn scan_with_chunk_size<R: ReadMemory>(
    reader: &R,
    module: &ModuleImage,
    pattern: &Pattern,
    chunk_size: usize,
) -> Option<u64> {
    let mut window = ScanWindow::new(pattern);
    let mut address = module.base;

    while address < module.end() {
        let read_size = chunk_size.min((module.end() - address) as usize);

        let found = match reader.read_bytes(address, read_size) {
            Ok(chunk) => window.feed(address, &chunk),
            Err(e) => {
                debug!(
                    "Chunk at {} ({:#x} bytes) unreadable, retrying by page: {}",
                    module.describe(address),
                    read_size,
                    e
                );
                scan_pages(reader, &mut window, address, read_size)
            }
        };
        if found.is_some() {
            return found;
        }

        address += read_size as u64;
    }

    None
}

/// Feed `start..start + len` to the window one page at a time, skipping
/// pages that cannot be read.
fn scan_pages<R: ReadMemory>(
    reader: &R,
    window: &mut ScanWindow<'_>,
    start: u64,
    len: usize,
) -> Option<u64> {
    let page = SCAN_PAGE_SIZE as u64;
    let end = start + len as u64;
    let mut address = start;

    while address < end {
        let page_end = ((address / page + 1) * page).min(end);
        if let Ok(bytes) = reader.read_bytes(address, (page_end - address) as usize) {
            if let Some(found) = window.feed(address, &bytes) {
                return Some(found);
            }
        }
        address = page_end;
    }

    None
}

/// Pattern search over consecutive reads.
///
/// Keeps the tail of the previous read so a match may straddle two reads.
/// The tail is only reused when the next read starts right where it ended.
struct ScanWindow<'a> {
    pattern: &'a Pattern,
    tail: Vec<u8>,
    tail_end: u64,
}

impl<'a> ScanWindow<'a> {
    fn new(pattern: &'a Pattern) -> Self {
        Self {
            pattern,
            tail: Vec::new(),
            tail_end: 0,
        }
    }

    fn feed(&mut self, address: u64, bytes: &[u8]) -> Option<u64> {
        if self.tail_end != address {
            self.tail.clear();
        }

        let data_base = address - self.tail.len() as u64;
        let mut data = std::mem::take(&mut self.tail);
        data.extend_from_slice(bytes);

        if let Some(offset) = self.pattern.find_first(&data) {
            return Some(data_base + offset as u64);
        }

        let keep = self.pattern.len() - 1;
        if keep > 0 {
            let start = data.len().saturating_sub(keep);
            self.tail = data[start..].to_vec();
        }
        self.tail_end = address + bytes.len() as u64;

        None
    }
}
