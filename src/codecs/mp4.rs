//! MP4/M4A codec.
//!
//! Boxes are scanned into a [`Chunk`] tree. Stream parameters come from the
//! first sound track (`mdhd`, the `stsd` sample entry and its `esds` or `alac`
//! config); metadata from `moov/udta/meta/ilst`.

mod esds;
mod ilst;

use crate::header::Mp4Details;
use crate::prelude::*;

const FTYP: &[u8; 4] = b"ftyp";
const MOOV: &[u8; 4] = b"moov";
const MDAT: &[u8; 4] = b"mdat";
const MVHD: &[u8; 4] = b"mvhd";
const TRAK: &[u8; 4] = b"trak";
const MDIA: &[u8; 4] = b"mdia";
const MDHD: &[u8; 4] = b"mdhd";
const HDLR: &[u8; 4] = b"hdlr";
const MINF: &[u8; 4] = b"minf";
const STBL: &[u8; 4] = b"stbl";
const STSD: &[u8; 4] = b"stsd";
const STCO: &[u8; 4] = b"stco";
const CO64: &[u8; 4] = b"co64";
const UDTA: &[u8; 4] = b"udta";
const META: &[u8; 4] = b"meta";
const ILST: &[u8; 4] = b"ilst";
const ESDS: &[u8; 4] = b"esds";
const ALAC: &[u8; 4] = b"alac";

const SOUND_HANDLER: &[u8; 4] = b"soun";

const CONTAINERS: [&[u8; 4]; 12] = [
    MOOV, TRAK, MDIA, MINF, STBL, UDTA, ILST, b"edts", b"dinf", b"moof", b"traf", b"mvex",
];

/// Sample entry code, display name, lossless.
const KINDS: [(&[u8; 4], &str, bool); 9] = [
    (b"mp4a", "AAC", false),
    (ALAC, "Apple Lossless", true),
    (b"ac-3", "AC-3", false),
    (b"ec-3", "E-AC-3", false),
    (b"fLaC", "FLAC", true),
    (b"Opus", "Opus", false),
    (b"drms", "AAC (protected)", false),
    (b"samr", "AMR", false),
    (b"enca", "Encrypted audio", false),
];

/// Sound sample entry fields before the child boxes (version 0).
const SAMPLE_ENTRY_LEN: usize = 28;

const MAX_DEPTH: usize = 16;

fn kind_info(code: &[u8; 4]) -> Option<(&'static str, bool)> {
    KINDS
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, name, lossless)| (*name, *lossless))
}

/// Where the children of a box start inside its payload, `None` for leaf boxes.
fn child_offset(code: &[u8; 4], payload: &[u8], parent: Option<&[u8; 4]>) -> Option<usize> {
    if parent == Some(ILST) {
        return Some(0);
    }
    if CONTAINERS.contains(&code) {
        return Some(0);
    }
    match code {
        // QuickTime writes `meta` without the full box version/flags
        META if payload.get(4..8) == Some(&HDLR[..]) => Some(0),
        META => Some(4),
        STSD => Some(8),
        _ if kind_info(code).is_some() => {
            let version = payload.get(8..10).map(BigEndian::read_u16).unwrap_or(0);
            match version {
                1 => Some(SAMPLE_ENTRY_LEN + 16),
                2 => Some(SAMPLE_ENTRY_LEN + 36),
                _ => Some(SAMPLE_ENTRY_LEN),
            }
        }
        _ => None,
    }
}

/// Scan the boxes in `data[start..end]`.
///
/// A size of 1 means a 64-bit size follows the type, 0 means the box runs to
/// the end of the enclosing region. Trailing bytes too short for a box header
/// are ignored.
pub fn scan_boxes<'a>(
    data: &'a [u8],
    start: usize,
    end: usize,
    parent: Option<&[u8; 4]>,
    depth: usize,
) -> R<Vec<Chunk<'a>>> {
    let mut boxes = Vec::new();
    let mut pos = start;

    while end - pos >= 8 {
        let mut view = ByteView::at(&data[pos..end], pos as u64);
        let size32 = view.u32_be()?;
        let code = view.fourcc()?;
        let (size, header_len) = match size32 {
            0 => ((end - pos) as u64, 8),
            1 => (view.u64_be()?, 16),
            n => (n as u64, 8),
        };

        if size < header_len as u64 {
            return Err(Error::chunk(
                "box size smaller than its header",
                fourcc_to_string(&code),
                pos as u64,
                size,
            ));
        }
        if size > (end - pos) as u64 {
            return Err(Error::chunk(
                "declared size exceeds the remaining bytes",
                fourcc_to_string(&code),
                pos as u64,
                size,
            ));
        }

        let box_end = pos + size as usize;
        let payload_offset = pos + header_len;
        let payload = &data[payload_offset..box_end];
        let children = match child_offset(&code, payload, parent) {
            Some(offset) if depth < MAX_DEPTH && offset <= payload.len() => {
                scan_boxes(data, payload_offset + offset, box_end, Some(&code), depth + 1)?
            }
            _ => Vec::new(),
        };

        tracing::trace!(code = %fourcc_to_string(&code), offset = pos, size, "box");
        boxes.push(Chunk {
            id: ChunkId::FourCc(code),
            declared_size: size,
            range: pos..box_end,
            payload_offset,
            payload,
            children,
        });
        pos = box_end;
    }
    Ok(boxes)
}

/// Render a box, switching to a 64-bit size when the body needs it.
pub(crate) fn render_box(code: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let size = body.len() as u64 + 8;
    let mut out = Vec::with_capacity(body.len() + 16);
    if size > u32::MAX as u64 {
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(code);
        out.extend_from_slice(&(size + 8).to_be_bytes());
    } else {
        out.extend_from_slice(&(size as u32).to_be_bytes());
        out.extend_from_slice(code);
    }
    out.extend_from_slice(body);
    out
}

/// Timescale and duration of an `mvhd` or `mdhd` payload. An all-ones duration is indefinite.
fn timing(payload: &[u8], base: u64) -> R<(u32, Option<u64>)> {
    let mut view = ByteView::at(payload, base);
    let version = view.u8()?;
    view.skip(3)?;
    if version == 1 {
        view.skip(16)?;
        let timescale = view.u32_be()?;
        let duration = view.u64_be()?;
        Ok((timescale, Some(duration).filter(|&d| d != u64::MAX)))
    } else {
        view.skip(8)?;
        let timescale = view.u32_be()?;
        let duration = view.u32_be()?;
        Ok((timescale, Some(duration as u64).filter(|_| duration != u32::MAX)))
    }
}

fn is_sound_track(trak: &Chunk<'_>) -> bool {
    trak.descend(&[MDIA, HDLR])
        .and_then(|hdlr| hdlr.payload.get(8..12))
        .is_some_and(|handler| handler == SOUND_HANDLER)
}

/// First sound track, or the first track with a sample description.
fn audio_track<'c, 'a>(moov: &'c Chunk<'a>) -> Option<&'c Chunk<'a>> {
    let tracks: Vec<&Chunk<'a>> = moov.children_named(TRAK).collect();
    tracks
        .iter()
        .find(|trak| is_sound_track(trak))
        .or_else(|| tracks.iter().find(|trak| trak.descend(&[MDIA, MINF, STBL, STSD]).is_some()))
        .copied()
}

#[derive(Debug, Default)]
struct AlacConfig {
    bit_depth: u8,
    channels: u8,
    avg_bitrate: u32,
    sample_rate: u32,
}

fn parse_alac(payload: &[u8], base: u64) -> R<AlacConfig> {
    let mut view = ByteView::at(payload, base);
    view.skip(4 + 4 + 1)?;
    let bit_depth = view.u8()?;
    view.skip(3)?;
    let channels = view.u8()?;
    view.skip(2 + 4)?;
    Ok(AlacConfig {
        bit_depth,
        channels,
        avg_bitrate: view.u32_be()?,
        sample_rate: view.u32_be()?,
    })
}

pub struct Mp4Codec;

impl Mp4Codec {
    fn boxes<'a>(&self, data: &'a [u8]) -> R<Vec<Chunk<'a>>> {
        self.validate_file_format(data)?;
        scan_boxes(data, 0, data.len(), None, 0)
    }

    fn moov<'c, 'a>(&self, boxes: &'c [Chunk<'a>]) -> R<&'c Chunk<'a>> {
        crate::chunk::find(boxes, MOOV).ok_or_else(|| Error::cannot_read("MP4 file has no moov box"))
    }

    fn ilst<'c, 'a>(&self, moov: &'c Chunk<'a>) -> Option<&'c Chunk<'a>> {
        moov.descend(&[UDTA, META, ILST])
    }

    /// Rebuild `meta`, `udta` and `moov` around a new `ilst`.
    fn rebuild_moov(&self, data: &[u8], moov: &Chunk<'_>, ilst: Vec<u8>) -> Vec<u8> {
        let copy = |chunk: &Chunk<'_>| data[chunk.range.clone()].to_vec();

        let new_meta = |meta: Option<&Chunk<'_>>| -> Vec<u8> {
            let mut body = Vec::new();
            match meta {
                Some(meta) => {
                    let prefix = meta.children.first().map_or(meta.payload.len(), |first| {
                        first.range.start - meta.payload_offset
                    });
                    body.extend_from_slice(&meta.payload[..prefix]);
                    let mut replaced = false;
                    for child in &meta.children {
                        if child.is(ILST) {
                            body.extend_from_slice(&ilst);
                            replaced = true;
                        } else {
                            body.extend(copy(child));
                        }
                    }
                    if !replaced {
                        if meta.child(HDLR).is_none() {
                            body.extend(metadata_handler());
                        }
                        body.extend_from_slice(&ilst);
                    }
                }
                None => {
                    body.extend_from_slice(&[0u8; 4]);
                    body.extend(metadata_handler());
                    body.extend_from_slice(&ilst);
                }
            }
            render_box(META, &body)
        };

        let new_udta = |udta: Option<&Chunk<'_>>| -> Vec<u8> {
            let mut body = Vec::new();
            match udta {
                Some(udta) => {
                    for child in &udta.children {
                        if child.is(META) {
                            body.extend(new_meta(Some(child)));
                        } else {
                            body.extend(copy(child));
                        }
                    }
                    if udta.child(META).is_none() {
                        body.extend(new_meta(None));
                    }
                }
                None => body.extend(new_meta(None)),
            }
            render_box(UDTA, &body)
        };

        let mut body = Vec::new();
        for child in &moov.children {
            if child.is(UDTA) {
                body.extend(new_udta(Some(child)));
            } else {
                body.extend(copy(child));
            }
        }
        if moov.child(UDTA).is_none() {
            body.extend(new_udta(None));
        }
        render_box(MOOV, &body)
    }
}

fn metadata_handler() -> Vec<u8> {
    let mut body = vec![0u8; 8];
    body.extend_from_slice(b"mdir");
    body.extend_from_slice(b"appl");
    body.extend_from_slice(&[0u8; 9]);
    render_box(HDLR, &body)
}

/// Shift every `stco`/`co64` entry in a serialized `moov` by `delta`.
fn shift_chunk_offsets(moov: &mut [u8], delta: i64) -> R<()> {
    let mut tables = Vec::new();
    {
        let boxes = scan_boxes(moov, 0, moov.len(), None, 0)?;
        collect_offset_tables(&boxes, &mut tables);
    }

    for (code, payload_offset, payload_len) in tables {
        let payload = &mut moov[payload_offset..payload_offset + payload_len];
        if payload.len() < 8 {
            continue;
        }
        let count = BigEndian::read_u32(&payload[4..8]) as usize;
        let width = if code == *CO64 { 8 } else { 4 };
        for i in 0..count {
            let at = 8 + i * width;
            let Some(entry) = payload.get_mut(at..at + width) else {
                break;
            };
            if width == 8 {
                let moved = BigEndian::read_u64(entry)
                    .checked_add_signed(delta)
                    .ok_or_else(|| Error::cannot_write("chunk offset does not fit a 64-bit co64 entry"))?;
                BigEndian::write_u64(entry, moved);
            } else {
                let moved = BigEndian::read_u32(entry) as i64 + delta;
                let moved = u32::try_from(moved)
                    .map_err(|_| Error::cannot_write("chunk offset does not fit a 32-bit stco entry"))?;
                BigEndian::write_u32(entry, moved);
            }
        }
    }
    Ok(())
}

fn collect_offset_tables(boxes: &[Chunk<'_>], out: &mut Vec<([u8; 4], usize, usize)>) {
    for chunk in boxes {
        if let Some(code) = chunk.fourcc() {
            if code == STCO || code == CO64 {
                out.push((*code, chunk.payload_offset, chunk.payload.len()));
            }
        }
        collect_offset_tables(&chunk.children, out);
    }
}

impl Codec for Mp4Codec {
    fn format(&self) -> AudioFormat {
        AudioFormat::Mp4
    }

    fn validate_file_format(&self, data: &[u8]) -> R<()> {
        if data.len() < 8 {
            return Err(Error::cannot_read("File too small to be a valid MP4"));
        }
        match &data[4..8] {
            b"ftyp" | b"moov" | b"mdat" | b"free" | b"skip" | b"wide" => Ok(()),
            _ => Err(Error::cannot_read("Not an MP4 file: no leading box")),
        }
    }

    fn chunks<'a>(&self, data: &'a [u8]) -> R<Vec<Chunk<'a>>> {
        self.boxes(data)
    }

    fn read_header(&self, data: &[u8]) -> R<GenericAudioHeader> {
        let boxes = self.boxes(data)?;
        let moov = self.moov(&boxes)?;

        let mut details = Mp4Details::default();
        let mut header_timing = None;
        if let Some(mvhd) = moov.child(MVHD) {
            header_timing = Some(timing(mvhd.payload, mvhd.payload_offset as u64)?);
        }

        let track = audio_track(moov).ok_or_else(|| Error::cannot_read("MP4 file has no audio track"))?;
        if let Some(mdhd) = track.descend(&[MDIA, MDHD]) {
            header_timing = Some(timing(mdhd.payload, mdhd.payload_offset as u64)?);
        }

        let entry = track
            .descend(&[MDIA, MINF, STBL, STSD])
            .and_then(|stsd| stsd.children.first())
            .ok_or_else(|| Error::cannot_read("MP4 audio track has no sample description"))?;
        let code = entry.fourcc().copied().unwrap_or([0; 4]);
        details.kind = fourcc_to_string(&code);

        let mut header = GenericAudioHeader::new(AudioFormat::Mp4, FormatDetails::Mp4(Mp4Details::default()));
        let (name, lossless) = kind_info(&code).unwrap_or(("Unknown", false));
        header.encoding = name.to_string();
        header.lossless = lossless;

        let mut view = ByteView::at(entry.payload, entry.payload_offset as u64);
        view.skip(16)?;
        header.channels = view.u16_be()?;
        header.bits_per_sample = view.u16_be()?;
        view.skip(4)?;
        header.sample_rate = view.u16_be()? as u32;

        if let Some(esds) = entry.child(ESDS) {
            match esds::parse(esds.payload, esds.payload_offset as u64) {
                Ok(es) => {
                    details.object_type = es.object_type;
                    details.audio_profile = es.audio_profile().map(str::to_string);
                    details.max_bitrate = Some(es.max_bitrate).filter(|&b| b > 0);
                    details.avg_bitrate = Some(es.avg_bitrate).filter(|&b| b > 0);
                    if let Some(codec) = es.codec_name() {
                        header.encoding = codec.to_string();
                    }
                    if header.sample_rate == 0 {
                        header.sample_rate = es.sample_rate.unwrap_or(0);
                    }
                    header.vbr = es.max_bitrate > 0 && es.avg_bitrate > 0 && es.max_bitrate != es.avg_bitrate;
                }
                Err(e) => tracing::warn!("Ignoring unreadable esds: {}", e),
            }
        }
        if let Some(alac) = entry.child(ALAC) {
            match parse_alac(alac.payload, alac.payload_offset as u64) {
                Ok(config) => {
                    header.bits_per_sample = config.bit_depth as u16;
                    header.channels = config.channels as u16;
                    header.sample_rate = config.sample_rate;
                    details.avg_bitrate = Some(config.avg_bitrate).filter(|&b| b > 0);
                }
                Err(e) => tracing::warn!("Ignoring unreadable alac config: {}", e),
            }
        }

        if let Some((timescale, duration)) = header_timing {
            details.timescale = timescale;
            if let Some(duration) = duration.filter(|_| timescale > 0) {
                header.set_duration_secs(duration as f64 / timescale as f64);
                if timescale == header.sample_rate {
                    header.total_samples = Some(duration);
                }
            }
        }

        if let Some(mdat) = crate::chunk::find(&boxes, MDAT) {
            header.audio_range = Some(mdat.payload_offset as u64..mdat.range.end as u64);
        }
        header.bitrate = match details.avg_bitrate {
            Some(bits) => (bits as f64 / 1000.0).round() as u32,
            None => header.average_bitrate().unwrap_or(0),
        };
        header.details = FormatDetails::Mp4(details);
        Ok(header)
    }

    fn read_tag(&self, data: &[u8]) -> R<Tag> {
        let boxes = self.boxes(data)?;
        let moov = self.moov(&boxes)?;
        let mut tag = Tag::new();
        if let Some(ilst) = self.ilst(moov) {
            ilst::read_items(ilst, &mut tag);
        }
        Ok(tag)
    }

    fn write_tag(&self, data: &[u8], tag: &Tag, _config: &WriteConfig) -> R<Vec<u8>> {
        let boxes = self.boxes(data)?;
        let moov = self.moov(&boxes)?;
        let old_ilst = self.ilst(moov);
        if old_ilst.is_none() && tag.is_empty() {
            return Ok(data.to_vec());
        }

        let ilst = ilst::render_ilst(data, old_ilst, tag)?;
        let mut new_moov = self.rebuild_moov(data, moov, ilst);

        let delta = new_moov.len() as i64 - moov.range.len() as i64;
        let mdat_follows = boxes
            .iter()
            .any(|b| b.is(MDAT) && b.range.start > moov.range.start);
        if delta != 0 && mdat_follows {
            tracing::debug!(delta, "Shifting chunk offsets");
            shift_chunk_offsets(&mut new_moov, delta)?;
        }

        let mut out = Vec::with_capacity(data.len() + new_moov.len());
        out.extend_from_slice(&data[..moov.range.start]);
        out.extend_from_slice(&new_moov);
        out.extend_from_slice(&data[moov.range.end..]);
        Ok(out)
    }
}
