use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::EpkError;

/// Read-only mapping of an input file. The mapping and its descriptor are
/// released when this value is dropped, whichever way the run ends.
pub struct MappedImage {
    map: Mmap,
}

impl MappedImage {
    pub fn open(path: &Path) -> Result<Self, EpkError> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and lives no longer than this
        // value; concurrent modification of the input is not supported.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self { map })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }
}

/// Bounds-checked view of `len` bytes at `offset`.
pub fn span(image: &[u8], offset: usize, len: usize) -> Result<&[u8], EpkError> {
    offset
        .checked_add(len)
        .filter(|&end| end <= image.len())
        .map(|end| &image[offset..end])
        .ok_or(EpkError::TruncatedImage { offset, needed: len, available: image.len().saturating_sub(offset) })
}
