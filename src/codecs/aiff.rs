use chrono::{Duration, NaiveDate};

use crate::codecs::{id3, latin1, trim_text};
use crate::header::AiffDetails;
use crate::prelude::*;

// Chunk Identifiers
const FORM_CHUNK_ID: &[u8; 4] = b"FORM";
const AIFF_FORMAT_ID: &[u8; 4] = b"AIFF";
const AIFC_FORMAT_ID: &[u8; 4] = b"AIFC";
const COMM_CHUNK_ID: &[u8; 4] = b"COMM";
const SSND_CHUNK_ID: &[u8; 4] = b"SSND";

// AIFF Metadata Chunk Identifiers
const ANNO_CHUNK_ID: &[u8; 4] = b"ANNO";
const COMT_CHUNK_ID: &[u8; 4] = b"COMT";
const NAME_CHUNK_ID: &[u8; 4] = b"NAME";
const AUTH_CHUNK_ID: &[u8; 4] = b"AUTH";
const COPYRIGHT_CHUNK_ID: &[u8; 4] = b"(c) ";
const ID3_CHUNK_ID: &[u8; 4] = b"ID3 ";
const ID3_LOWER_CHUNK_ID: &[u8; 4] = b"id3 ";

/// Chunks replaced by the ID3 chunk on write
const TAG_CHUNK_IDS: [&[u8; 4]; 7] = [
    NAME_CHUNK_ID,
    AUTH_CHUNK_ID,
    COPYRIGHT_CHUNK_ID,
    ANNO_CHUNK_ID,
    COMT_CHUNK_ID,
    ID3_CHUNK_ID,
    ID3_LOWER_CHUNK_ID,
];

// Chunk Structures
const HEADER_SIZE: usize = 12; // FORM + size + AIFF
const COMM_MIN_SIZE: usize = 18;
const SSND_HEADER_SIZE: usize = 8; // offset + block size

struct Compression {
    code: &'static [u8; 4],
    label: &'static str,
    lossless: bool,
    little_endian: bool,
}

const fn compression(
    code: &'static [u8; 4],
    label: &'static str,
    lossless: bool,
    little_endian: bool,
) -> Compression {
    Compression {
        code,
        label,
        lossless,
        little_endian,
    }
}

static COMPRESSIONS: [Compression; 26] = [
    compression(b"NONE", "Big-endian PCM", true, false),
    compression(b"raw ", "Offset-binary PCM", true, false),
    compression(b"twos", "Big-endian PCM", true, false),
    compression(b"sowt", "Little-endian PCM", true, true),
    compression(b"in24", "24-bit PCM", true, false),
    compression(b"in32", "32-bit PCM", true, false),
    compression(b"fl32", "32-bit float", true, false),
    compression(b"FL32", "32-bit float", true, false),
    compression(b"fl64", "64-bit float", true, false),
    compression(b"FL64", "64-bit float", true, false),
    compression(b"alaw", "A-law 2:1", false, false),
    compression(b"ALAW", "A-law 2:1", false, false),
    compression(b"ulaw", "µ-law 2:1", false, false),
    compression(b"ULAW", "µ-law 2:1", false, false),
    compression(b"ima4", "IMA 4:1 ADPCM", false, false),
    compression(b"MAC3", "MACE 3:1", false, false),
    compression(b"MAC6", "MACE 6:1", false, false),
    compression(b"GSM ", "GSM", false, false),
    compression(b"Qclp", "Qualcomm PureVoice", false, false),
    compression(b"QDMC", "QDesign Music", false, false),
    compression(b"QDM2", "QDesign Music 2", false, false),
    compression(b"ACE2", "ACE 2-to-1", false, false),
    compression(b"ACE8", "ACE 8-to-3", false, false),
    compression(b"ADP4", "4:1 Intel/DVI ADPCM", false, false),
    compression(b"DWVW", "Delta With Variable Word Width", false, false),
    compression(b"alac", "Apple Lossless", true, false),
];

fn lookup_compression(code: &[u8; 4]) -> Option<&'static Compression> {
    COMPRESSIONS.iter().find(|c| c.code == code)
}

struct CommonChunk {
    channels: u16,
    sample_frames: u32,
    bits_per_sample: u16,
    sample_rate: f64,
    compression: [u8; 4],
    compression_name: String,
}

pub struct AiffCodec;

impl AiffCodec {
    /// The FORM chunk with every top-level chunk as a child.
    fn form<'a>(&self, data: &'a [u8]) -> R<Chunk<'a>> {
        self.validate_file_format(data)?;
        let form_size = BigEndian::read_u32(&data[4..8]) as u64;
        let end = 8 + form_size;
        if end > data.len() as u64 {
            return Err(Error::chunk(
                "FORM size exceeds the file",
                "FORM",
                0,
                form_size,
            ));
        }
        let end = end as usize;
        let children = scan_iff(data, HEADER_SIZE, end, SizeWidth::U32)?;
        Ok(Chunk {
            id: ChunkId::FourCc(*FORM_CHUNK_ID),
            declared_size: form_size,
            range: 0..end,
            payload_offset: 8,
            payload: &data[8..end],
            children,
        })
    }

    fn parse_comm(&self, chunk: &Chunk<'_>, aifc: bool) -> R<CommonChunk> {
        if chunk.payload.len() < COMM_MIN_SIZE {
            return Err(Error::chunk(
                "COMM chunk too small",
                "COMM",
                chunk.range.start as u64,
                chunk.declared_size,
            ));
        }
        let mut view = ByteView::at(chunk.payload, chunk.payload_offset as u64);
        let channels = view.u16_be()?;
        let sample_frames = view.u32_be()?;
        let bits_per_sample = view.u16_be()?;
        let sample_rate = read_ieee_extended(&view.array::<10>()?);

        let mut compression = *b"NONE";
        let mut compression_name = String::new();
        if aifc && view.remaining() >= 4 {
            compression = view.fourcc()?;
            if let Ok(len) = view.u8() {
                match view.bytes(len as usize) {
                    Ok(name) => compression_name = trim_text(&latin1(name)),
                    Err(_) => tracing::warn!("truncated AIFF-C compression name"),
                }
            }
        }

        Ok(CommonChunk {
            channels,
            sample_frames,
            bits_per_sample,
            sample_rate,
            compression,
            compression_name,
        })
    }

    /// Text chunks mapped to fields. COMT entries carry their timestamp as a date.
    fn text_chunk_tag(&self, chunks: &[Chunk<'_>]) -> Tag {
        let mut tag = Tag::new();
        for chunk in chunks {
            match chunk.fourcc() {
                Some(NAME_CHUNK_ID) => tag.add(FieldKey::Title, trim_text(&latin1(chunk.payload))),
                Some(AUTH_CHUNK_ID) => tag.add(FieldKey::Artist, trim_text(&latin1(chunk.payload))),
                Some(COPYRIGHT_CHUNK_ID) => {
                    tag.add(FieldKey::Copyright, trim_text(&latin1(chunk.payload)))
                }
                Some(ANNO_CHUNK_ID) => tag.add(FieldKey::Comment, trim_text(&latin1(chunk.payload))),
                Some(COMT_CHUNK_ID) => {
                    if let Err(e) = read_comments(chunk, &mut tag) {
                        tracing::warn!(error = %e, "skipping corrupt COMT entries");
                    }
                }
                _ => {}
            }
        }
        tag
    }

    fn rewrite(&self, data: &[u8], tag: &Tag, keep_unmapped: bool) -> R<Vec<u8>> {
        let form = self.form(data)?;
        if form.child(COMM_CHUNK_ID).is_none() || form.child(SSND_CHUNK_ID).is_none() {
            return Err(Error::cannot_write("AIFF file is missing its COMM or SSND chunk"));
        }

        let mut preserved = Vec::new();
        if keep_unmapped {
            for chunk in &form.children {
                if chunk.is(ID3_CHUNK_ID) || chunk.is(ID3_LOWER_CHUNK_ID) {
                    match id3::read_id3v2(chunk.payload) {
                        Ok(existing) => preserved.extend(id3::unmapped_frames(&existing)),
                        Err(e) => tracing::warn!(error = %e, "dropping unreadable ID3 chunk"),
                    }
                }
            }
        }

        let mut output = Cursor::new(Vec::with_capacity(data.len()));
        output.write_all(&data[..HEADER_SIZE])?;

        for chunk in &form.children {
            let id = chunk.fourcc().copied().unwrap_or_default();
            if TAG_CHUNK_IDS.contains(&&id) {
                continue;
            }
            let raw = &data[chunk.range.clone()];
            output.write_all(raw)?;
            // An odd chunk that ended at EOF gets its pad byte now that something follows
            if raw.len() % 2 == 1 {
                output.write_all(&[0])?;
            }
        }

        if !tag.is_empty() || !preserved.is_empty() {
            let id3_tag = id3::render_id3v23(tag, &preserved, 0)?;
            write_aif_chunk(&mut output, ID3_CHUNK_ID, &id3_tag)?;
        }

        let mut result_data = output.into_inner();
        let form_size = u32::try_from(result_data.len() - 8)
            .map_err(|_| Error::cannot_write("AIFF file larger than 4 GiB"))?;
        BigEndian::write_u32(&mut result_data[4..8], form_size);
        Ok(result_data)
    }
}

impl Codec for AiffCodec {
    fn format(&self) -> AudioFormat {
        AudioFormat::Aiff
    }

    fn validate_file_format(&self, data: &[u8]) -> R<()> {
        if data.len() < HEADER_SIZE {
            return Err(Error::cannot_read("File too small to be a valid AIFF"));
        }
        if &data[0..4] != FORM_CHUNK_ID {
            return Err(Error::cannot_read("Not a FORM file"));
        }
        if &data[8..12] != AIFF_FORMAT_ID && &data[8..12] != AIFC_FORMAT_ID {
            return Err(Error::cannot_read("Not an AIFF file"));
        }
        Ok(())
    }

    fn chunks<'a>(&self, data: &'a [u8]) -> R<Vec<Chunk<'a>>> {
        Ok(vec![self.form(data)?])
    }

    fn read_header(&self, data: &[u8]) -> R<GenericAudioHeader> {
        let form = self.form(data)?;
        let aifc = &data[8..12] == AIFC_FORMAT_ID;

        let comm_chunk = form
            .child(COMM_CHUNK_ID)
            .ok_or_else(|| Error::cannot_read("missing COMM chunk"))?;
        let ssnd = form
            .child(SSND_CHUNK_ID)
            .ok_or_else(|| Error::cannot_read("missing SSND chunk"))?;
        let comm = self.parse_comm(comm_chunk, aifc)?;

        let mut view = ByteView::at(ssnd.payload, ssnd.payload_offset as u64);
        let data_offset = view.u32_be()? as usize;
        let _block_size = view.u32_be()?;
        let audio_start = (ssnd.payload_offset + SSND_HEADER_SIZE + data_offset)
            .min(ssnd.payload_offset + ssnd.payload.len());
        let audio_end = ssnd.payload_offset + ssnd.payload.len();

        let known = lookup_compression(&comm.compression);
        let code = fourcc_to_string(&comm.compression);
        let mut header = GenericAudioHeader::new(
            AudioFormat::Aiff,
            FormatDetails::Aiff(AiffDetails {
                aifc,
                compression: code.clone(),
                compression_name: comm.compression_name.clone(),
                little_endian: known.is_some_and(|c| c.little_endian),
                sample_frames: comm.sample_frames,
            }),
        );
        header.encoding = match known {
            Some(c) => c.label.to_string(),
            None if !comm.compression_name.is_empty() => comm.compression_name.clone(),
            None => code,
        };
        header.lossless = known.is_some_and(|c| c.lossless);
        header.sample_rate = comm.sample_rate.round() as u32;
        header.channels = comm.channels;
        header.bits_per_sample = comm.bits_per_sample;
        header.audio_range = Some(audio_start as u64..audio_end as u64);
        header.set_duration_from_samples(comm.sample_frames as u64);

        let pcm = matches!(&comm.compression, b"NONE" | b"twos" | b"sowt" | b"raw ");
        header.bitrate = if pcm {
            let bits = header.sample_rate as u64 * comm.bits_per_sample as u64 * comm.channels as u64;
            u32::try_from(bits / 1000).unwrap_or(u32::MAX)
        } else {
            header.average_bitrate().unwrap_or(0)
        };

        Ok(header)
    }

    fn read_tag(&self, data: &[u8]) -> R<Tag> {
        let form = self.form(data)?;
        let text_tag = self.text_chunk_tag(&form.children);

        let id3_tag = form
            .children
            .iter()
            .filter(|c| c.is(ID3_CHUNK_ID) || c.is(ID3_LOWER_CHUNK_ID))
            .find_map(|c| match id3::read_tag(c.payload) {
                Ok(tag) => Some(tag),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable ID3 chunk");
                    None
                }
            });

        Ok(match id3_tag {
            Some(mut tag) => {
                tag.fill_missing(&text_tag);
                tag
            }
            None => text_tag,
        })
    }

    fn write_tag(&self, data: &[u8], tag: &Tag, _config: &WriteConfig) -> R<Vec<u8>> {
        self.rewrite(data, tag, true)
    }

    fn delete_tag(&self, data: &[u8], _config: &WriteConfig) -> R<Vec<u8>> {
        self.rewrite(data, &Tag::new(), false)
    }
}

fn read_comments(chunk: &Chunk<'_>, tag: &mut Tag) -> R<()> {
    let mut view = ByteView::at(chunk.payload, chunk.payload_offset as u64);
    let count = view.u16_be()?;
    for _ in 0..count {
        let timestamp = view.u32_be()?;
        let _marker = view.i16_be()?;
        let len = view.u16_be()? as usize;
        let text = trim_text(&latin1(view.bytes(len)?));
        if len % 2 == 1 && !view.is_empty() {
            view.skip(1)?;
        }
        match comment_date(timestamp) {
            Some(date) if !text.is_empty() => tag.add(FieldKey::Comment, format!("{} {}", text, date)),
            _ => tag.add(FieldKey::Comment, text),
        }
    }
    Ok(())
}

/// Seconds since 1904-01-01 as an ISO date-time; zero means unset.
fn comment_date(timestamp: u32) -> Option<String> {
    if timestamp == 0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1904, 1, 1)?.and_hms_opt(0, 0, 0)?;
    let date = epoch.checked_add_signed(Duration::seconds(timestamp as i64))?;
    Some(date.format("%Y-%m-%dT%H:%M:%S").to_string())
}

fn write_aif_chunk(output: &mut Cursor<Vec<u8>>, chunk_id: &[u8; 4], data: &[u8]) -> R<()> {
    output.write_all(chunk_id)?;
    output.write_u32::<BigEndian>(data.len() as u32)?;
    output.write_all(data)?;
    if data.len() % 2 == 1 {
        output.write_all(&[0])?; // padding
    }
    Ok(())
}

/// IEEE 754 80-bit extended float, as used for the COMM sample rate.
fn read_ieee_extended(extended: &[u8; 10]) -> f64 {
    let sign = (extended[0] & 0x80) != 0;
    let exponent = ((extended[0] as u16 & 0x7F) << 8) | (extended[1] as u16);
    let mantissa = BigEndian::read_u64(&extended[2..10]);

    if exponent == 0 && mantissa == 0 {
        return 0.0;
    }
    if exponent == 0x7FFF {
        return if sign { f64::NEG_INFINITY } else { f64::INFINITY };
    }

    let adjusted_exponent = exponent as i32 - 16383;
    let result = (mantissa as f64 / (1u64 << 63) as f64) * 2.0_f64.powi(adjusted_exponent);
    if sign { -result } else { result }
}
