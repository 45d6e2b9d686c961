//! Memory-mapped line reader

use crate::error::Result;
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Lazy, finite iterator over the `\n`-separated lines of a mapped file
///
/// Lines are yielded without their terminator. Lines that are not valid
/// UTF-8 are skipped and counted in [`MmapLines::invalid_utf8`]. A final line
/// without a trailing newline is still yielded.
pub struct MmapLines {
    map: Option<Mmap>,
    pos: usize,
    invalid_utf8: u64,
}

impl MmapLines {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        // Zero-length files cannot be mapped on every platform
        let map = if file.metadata()?.len() == 0 {
            None
        } else {
            // The input must not be truncated while it is being indexed
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Self {
            map,
            pos: 0,
            invalid_utf8: 0,
        })
    }

    /// Lines skipped so far because they were not UTF-8
    pub fn invalid_utf8(&self) -> u64 {
        self.invalid_utf8
    }

    /// Size of the mapped input in bytes
    pub fn len_bytes(&self) -> usize {
        self.map.as_ref().map_or(0, |m| m.len())
    }
}

impl Iterator for MmapLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let data: &[u8] = self.map.as_deref()?;

        while self.pos < data.len() {
            let rest = &data[self.pos..];
            let (line, advance) = match rest.iter().position(|&b| b == b'\n') {
                Some(i) => (&rest[..i], i + 1),
                None => (rest, rest.len()),
            };
            self.pos += advance;

            match std::str::from_utf8(line) {
                Ok(s) => return Some(s.to_string()),
                Err(_) => self.invalid_utf8 += 1,
            }
        }
        None
    }
}
