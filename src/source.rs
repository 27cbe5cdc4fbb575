//! Scoped byte sources.
//!
//! A [`ByteSource`] is opened at the start of a read or write call and dropped
//! before the call returns. Large files are memory-mapped so chunk payloads,
//! artwork and audio regions stay views into the file instead of copies.

use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::ops::Deref;
use std::path::Path;

use crate::error::Result;

pub enum ByteSource {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl ByteSource {
    /// Open `path`, mapping it when it is larger than `mmap_threshold` bytes.
    pub fn open<P: AsRef<Path>>(path: P, mmap_threshold: u64) -> Result<Self> {
        let mut file = File::open(path.as_ref())?;
        let file_size = file.metadata()?.len();

        if file_size > mmap_threshold {
            // SAFETY: the map is read-only and dropped before any write to the path.
            let mmap = unsafe { Mmap::map(&file)? };
            tracing::debug!(
                path = %path.as_ref().display(),
                size = file_size,
                "memory-mapped source"
            );
            Ok(ByteSource::Mapped(mmap))
        } else {
            let mut data = Vec::with_capacity(file_size as usize);
            file.read_to_end(&mut data)?;
            Ok(ByteSource::Owned(data))
        }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        ByteSource::Owned(data)
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, ByteSource::Mapped(_))
    }
}

impl Deref for ByteSource {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            ByteSource::Mapped(map) => map,
            ByteSource::Owned(data) => data,
        }
    }
}

impl AsRef<[u8]> for ByteSource {
    fn as_ref(&self) -> &[u8] {
        self
    }
}
