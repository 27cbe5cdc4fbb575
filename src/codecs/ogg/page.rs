//! Ogg page framing: header, lacing table, CRC and repagination.

use std::ops::Range;

use crate::prelude::*;

pub const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
pub const HEADER_LEN: usize = 27;

pub const FLAG_CONTINUED: u8 = 0x01;
pub const FLAG_FIRST: u8 = 0x02;

/// Granule position of a page on which no packet ends.
pub const NO_GRANULE: u64 = u64::MAX;

const MAX_SEGMENTS: usize = 255;
const CRC_OFFSET: usize = 22;

static CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut r = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            r = if r & 0x8000_0000 != 0 {
                (r << 1) ^ 0x04C1_1DB7
            } else {
                r << 1
            };
            bit += 1;
        }
        table[i] = r;
        i += 1;
    }
    table
}

/// Ogg CRC-32: polynomial 0x04c11db7, no reflection, zero initial value.
pub fn crc32(data: &[u8]) -> u32 {
    data.iter().fold(0u32, |crc, &b| {
        (crc << 8) ^ CRC_TABLE[((crc >> 24) as u8 ^ b) as usize]
    })
}

#[derive(Debug, Clone)]
pub struct Page<'a> {
    pub offset: usize,
    pub flags: u8,
    pub granule: u64,
    pub serial: u32,
    pub sequence: u32,
    pub crc: u32,
    pub lacing: &'a [u8],
    pub body: &'a [u8],
    /// Header, lacing table and body
    pub len: usize,
}

impl<'a> Page<'a> {
    pub fn parse(data: &'a [u8], offset: usize) -> R<Page<'a>> {
        let mut view = ByteView::at(&data[offset..], offset as u64);
        if view.peek(4) != Some(&CAPTURE_PATTERN[..]) {
            return Err(Error::cannot_read("missing OggS capture pattern").at_offset(offset as u64));
        }
        view.skip(4)?;
        let version = view.u8()?;
        if version != 0 {
            return Err(Error::cannot_read(format!("unsupported Ogg version {}", version)).at_offset(offset as u64));
        }
        let flags = view.u8()?;
        let granule = view.u64_le()?;
        let serial = view.u32_le()?;
        let sequence = view.u32_le()?;
        let crc = view.u32_le()?;
        let segments = view.u8()? as usize;
        let lacing = view.bytes(segments)?;

        let body_len: usize = lacing.iter().map(|&l| l as usize).sum();
        let len = HEADER_LEN + segments + body_len;
        if view.remaining() < body_len {
            return Err(Error::chunk(
                "page size exceeds the remaining bytes",
                "OggS",
                offset as u64,
                len as u64,
            ));
        }
        let body = view.bytes(body_len)?;

        Ok(Page {
            offset,
            flags,
            granule,
            serial,
            sequence,
            crc,
            lacing,
            body,
            len,
        })
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    pub fn is_continued(&self) -> bool {
        self.flags & FLAG_CONTINUED != 0
    }

    /// Packet pieces on this page: body range and whether the packet ends here.
    pub fn segments(&self) -> Vec<(Range<usize>, bool)> {
        let mut pieces = Vec::new();
        let mut start = 0;
        let mut pos = 0;
        for &lace in self.lacing {
            pos += lace as usize;
            if lace < 255 {
                pieces.push((start..pos, true));
                start = pos;
            }
        }
        if self.lacing.last() == Some(&255) {
            pieces.push((start..pos, false));
        }
        pieces
    }

    pub fn to_chunk(&self, data: &'a [u8]) -> Chunk<'a> {
        let payload_offset = self.offset + HEADER_LEN + self.lacing.len();
        Chunk {
            id: ChunkId::Page(self.sequence),
            declared_size: self.len as u64,
            range: self.range(),
            payload_offset,
            payload: &data[payload_offset..self.offset + self.len],
            children: Vec::new(),
        }
    }
}

/// Every page in `data`, in file order. Bytes after the last page that are too
/// short for a page header are ignored.
pub fn read_pages(data: &[u8]) -> R<Vec<Page<'_>>> {
    let mut pages = Vec::new();
    let mut offset = 0;
    while data.len() - offset >= HEADER_LEN {
        let page = Page::parse(data, offset)?;
        offset += page.len;
        pages.push(page);
    }
    if offset < data.len() {
        tracing::warn!(trailing = data.len() - offset, "Ignoring bytes after the last Ogg page");
    }
    Ok(pages)
}

/// Serialize one page and fill in its CRC.
pub fn write_page(flags: u8, granule: u64, serial: u32, sequence: u32, lacing: &[u8], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + lacing.len() + body.len());
    out.extend_from_slice(CAPTURE_PATTERN);
    out.push(0);
    out.push(flags);
    out.extend_from_slice(&granule.to_le_bytes());
    out.extend_from_slice(&serial.to_le_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.push(lacing.len() as u8);
    out.extend_from_slice(lacing);
    out.extend_from_slice(body);
    let crc = crc32(&out);
    LittleEndian::write_u32(&mut out[CRC_OFFSET..CRC_OFFSET + 4], crc);
    out
}

/// Copy of an existing page with a new sequence number and CRC.
pub fn renumber(page: &[u8], sequence: u32) -> Vec<u8> {
    let mut out = page.to_vec();
    LittleEndian::write_u32(&mut out[18..22], sequence);
    LittleEndian::write_u32(&mut out[CRC_OFFSET..CRC_OFFSET + 4], 0);
    let crc = crc32(&out);
    LittleEndian::write_u32(&mut out[CRC_OFFSET..CRC_OFFSET + 4], crc);
    out
}

/// Lay `packets` out on fresh pages starting at `first_sequence`. Header pages
/// carry granule 0 once a packet ends on them.
pub fn paginate(packets: &[Vec<u8>], serial: u32, first_sequence: u32) -> Vec<Vec<u8>> {
    // (lacing value, packet index) per segment
    let mut segments: Vec<(u8, usize)> = Vec::new();
    for (index, packet) in packets.iter().enumerate() {
        let full = packet.len() / 255;
        segments.extend(std::iter::repeat_n((255u8, index), full));
        segments.push(((packet.len() % 255) as u8, index));
    }

    let mut pages = Vec::new();
    let mut sequence = first_sequence;
    let mut offsets = vec![0usize; packets.len()];
    let mut continued = false;

    for group in segments.chunks(MAX_SEGMENTS) {
        let mut lacing = Vec::with_capacity(group.len());
        let mut body = Vec::new();
        for &(lace, index) in group {
            let start = offsets[index];
            body.extend_from_slice(&packets[index][start..start + lace as usize]);
            offsets[index] += lace as usize;
            lacing.push(lace);
        }
        let ends_packet = lacing.iter().any(|&l| l < 255);
        let flags = if continued { FLAG_CONTINUED } else { 0 };
        let granule = if ends_packet { 0 } else { NO_GRANULE };
        pages.push(write_page(flags, granule, serial, sequence, &lacing, &body));
        continued = lacing.last() == Some(&255);
        sequence += 1;
    }
    pages
}
