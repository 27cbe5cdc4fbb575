//! The Chunk/Box model shared by every container reader.
//!
//! A [`Chunk`] is one framing unit (IFF chunk, MP4 box, Ogg page, ASF object)
//! borrowed from the byte source: id, declared size, byte range, payload view and
//! children. [`ByteView`] is the bounds-checked cursor every reader decodes with.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::Serialize;
use std::fmt;
use std::ops::Range;
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkId {
    FourCc([u8; 4]),
    Guid(Uuid),
    Page(u32),
    /// FLAC metadata block type
    Block(u8),
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkId::FourCc(code) => f.write_str(&fourcc_to_string(code)),
            ChunkId::Guid(guid) => write!(f, "{}", guid.hyphenated().to_string().to_uppercase()),
            ChunkId::Page(seq) => write!(f, "page {}", seq),
            ChunkId::Block(kind) => match flac_block_name(*kind) {
                Some(name) => f.write_str(name),
                None => write!(f, "BLOCK_{}", kind),
            },
        }
    }
}

fn flac_block_name(kind: u8) -> Option<&'static str> {
    let name = match kind {
        0 => "STREAMINFO",
        1 => "PADDING",
        2 => "APPLICATION",
        3 => "SEEKTABLE",
        4 => "VORBIS_COMMENT",
        5 => "CUESHEET",
        6 => "PICTURE",
        _ => return None,
    };
    Some(name)
}

/// Render a four character code, mapping the MP4 copyright byte to `©`.
pub fn fourcc_to_string(code: &[u8; 4]) -> String {
    code.iter()
        .map(|&b| match b {
            0xA9 => '©',
            0x20..=0x7E => b as char,
            _ => '.',
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct Chunk<'a> {
    pub id: ChunkId,
    pub declared_size: u64,
    /// Whole unit in the source, header and pad byte included
    pub range: Range<usize>,
    pub payload_offset: usize,
    pub payload: &'a [u8],
    pub children: Vec<Chunk<'a>>,
}

impl<'a> Chunk<'a> {
    pub fn fourcc(&self) -> Option<&[u8; 4]> {
        match &self.id {
            ChunkId::FourCc(code) => Some(code),
            _ => None,
        }
    }

    pub fn is(&self, code: &[u8; 4]) -> bool {
        self.fourcc() == Some(code)
    }

    pub fn child(&self, code: &[u8; 4]) -> Option<&Chunk<'a>> {
        self.children.iter().find(|c| c.is(code))
    }

    pub fn children_named<'s>(&'s self, code: &'s [u8; 4]) -> impl Iterator<Item = &'s Chunk<'a>> {
        self.children.iter().filter(move |c| c.is(code))
    }

    /// Follow a path of four character codes through the children.
    pub fn descend(&self, path: &[&[u8; 4]]) -> Option<&Chunk<'a>> {
        let mut current = self;
        for code in path {
            current = current.child(code)?;
        }
        Some(current)
    }

    pub fn summary(&self) -> ChunkSummary {
        ChunkSummary {
            id: self.id.to_string(),
            offset: self.range.start as u64,
            size: self.declared_size,
            children: self.children.iter().map(Chunk::summary).collect(),
        }
    }
}

/// Find the first top-level chunk with the given code.
pub fn find<'c, 'a>(chunks: &'c [Chunk<'a>], code: &[u8; 4]) -> Option<&'c Chunk<'a>> {
    chunks.iter().find(|c| c.is(code))
}

/// Owned, serializable outline of a chunk tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkSummary {
    pub id: String,
    pub offset: u64,
    pub size: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ChunkSummary>,
}

/// Bounds-checked reader over a byte slice.
///
/// Every read checks the remaining length first; nothing is allocated from a
/// declared size before that size has been verified against the data.
#[derive(Debug, Clone)]
pub struct ByteView<'a> {
    data: &'a [u8],
    pos: usize,
    base: u64,
}

impl<'a> ByteView<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, base: 0 }
    }

    /// A view whose errors report offsets relative to `base`.
    pub fn at(data: &'a [u8], base: u64) -> Self {
        Self { data, pos: 0, base }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn absolute_position(&self) -> u64 {
        self.base + self.pos as u64
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::truncated(self.base + pos as u64, pos - self.data.len()));
        }
        self.pos = pos;
        Ok(())
    }

    fn ensure(&self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(Error::truncated(self.absolute_position(), n - self.remaining()));
        }
        Ok(())
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn peek(&self, n: usize) -> Option<&'a [u8]> {
        self.data.get(self.pos..self.pos + n)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }

    /// Split off the next `n` bytes as their own view.
    pub fn sub(&mut self, n: usize) -> Result<ByteView<'a>> {
        let base = self.absolute_position();
        let data = self.bytes(n)?;
        Ok(ByteView::at(data, base))
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16_be(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.bytes(2)?))
    }

    pub fn u16_le(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.bytes(2)?))
    }

    pub fn i16_be(&mut self) -> Result<i16> {
        Ok(BigEndian::read_i16(self.bytes(2)?))
    }

    pub fn u24_be(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u24(self.bytes(3)?))
    }

    pub fn u32_be(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.bytes(4)?))
    }

    pub fn u32_le(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.bytes(4)?))
    }

    pub fn i32_le(&mut self) -> Result<i32> {
        Ok(LittleEndian::read_i32(self.bytes(4)?))
    }

    pub fn u64_be(&mut self) -> Result<u64> {
        Ok(BigEndian::read_u64(self.bytes(8)?))
    }

    pub fn u64_le(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.bytes(8)?))
    }

    pub fn i64_le(&mut self) -> Result<i64> {
        Ok(LittleEndian::read_i64(self.bytes(8)?))
    }

    pub fn fourcc(&mut self) -> Result<[u8; 4]> {
        self.array::<4>()
    }
}

/// Width of the size field in an IFF-style chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeWidth {
    U32,
    U64,
}

/// Scan a run of big-endian IFF chunks (`id + size + payload [+ pad]`) in
/// `data[start..end]`.
///
/// A declared size larger than the rest of the region is an error. Odd-length
/// payloads consume one pad byte, but only when that byte exists before `end`.
pub fn scan_iff(
    data: &[u8],
    start: usize,
    end: usize,
    width: SizeWidth,
) -> Result<Vec<Chunk<'_>>> {
    let header_len = match width {
        SizeWidth::U32 => 8,
        SizeWidth::U64 => 12,
    };
    let mut chunks = Vec::new();
    let mut pos = start;

    while end.saturating_sub(pos) >= header_len {
        let mut view = ByteView::at(&data[pos..end], pos as u64);
        let id = view.fourcc()?;
        let declared_size = match width {
            SizeWidth::U32 => view.u32_be()? as u64,
            SizeWidth::U64 => view.u64_be()?,
        };
        let payload_offset = pos + header_len;
        let available = (end - payload_offset) as u64;
        if declared_size > available {
            return Err(Error::chunk(
                "declared size exceeds the remaining bytes",
                fourcc_to_string(&id),
                pos as u64,
                declared_size,
            ));
        }

        let payload_end = payload_offset + declared_size as usize;
        let mut next = payload_end;
        if declared_size % 2 == 1 && next < end {
            next += 1;
        }

        tracing::trace!(chunk = %fourcc_to_string(&id), offset = pos, size = declared_size, "chunk");
        chunks.push(Chunk {
            id: ChunkId::FourCc(id),
            declared_size,
            range: pos..next,
            payload_offset,
            payload: &data[payload_offset..payload_end],
            children: Vec::new(),
        });
        pos = next;
    }

    if pos < end {
        tracing::debug!(offset = pos, trailing = end - pos, "ignoring trailing bytes after last chunk");
    }

    Ok(chunks)
}
