//! RealMedia (`.rm`, `.ra`) reader. The format has no writer.

use crate::codecs::{latin1, trim_text};
use crate::header::RealDetails;
use crate::prelude::*;

// Chunk Identifiers
const RMF_CHUNK_ID: &[u8; 4] = b".RMF";
const PROP_CHUNK_ID: &[u8; 4] = b"PROP";
const MDPR_CHUNK_ID: &[u8; 4] = b"MDPR";
const CONT_CHUNK_ID: &[u8; 4] = b"CONT";
const DATA_CHUNK_ID: &[u8; 4] = b"DATA";

/// Signature of a RealAudio stream header, bare or inside MDPR.
const RA_SIGNATURE: &[u8; 4] = b".ra\xfd";

// Chunk Structures
const CHUNK_HEADER_SIZE: usize = 8; // id + size, size counts the header
const DATA_HEADER_SIZE: usize = 10; // version + packet count + next data header

#[derive(Debug, Default)]
struct Properties {
    max_bit_rate: u32,
    avg_bit_rate: u32,
    duration_ms: u32,
}

#[derive(Debug, Default)]
struct MediaProperties {
    max_bit_rate: u32,
    avg_bit_rate: u32,
    duration_ms: u32,
    mime_type: String,
    audio: Option<AudioParams>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct AudioParams {
    sample_rate: u32,
    sample_size: u16,
    channels: u16,
}

/// Chunks as `id + u32 size + payload`, where the size includes the 8 header bytes.
fn scan_chunks(data: &[u8]) -> R<Vec<Chunk<'_>>> {
    let mut chunks = Vec::new();
    let mut pos = 0;
    while data.len() - pos >= CHUNK_HEADER_SIZE {
        let mut view = ByteView::at(&data[pos..], pos as u64);
        let id = view.fourcc()?;
        let size = view.u32_be()? as u64;
        if size < CHUNK_HEADER_SIZE as u64 {
            return Err(Error::chunk("chunk size below header size", fourcc_to_string(&id), pos as u64, size));
        }
        if size > (data.len() - pos) as u64 {
            return Err(Error::chunk(
                "declared size exceeds the remaining bytes",
                fourcc_to_string(&id),
                pos as u64,
                size,
            ));
        }
        let end = pos + size as usize;
        tracing::trace!(chunk = %fourcc_to_string(&id), offset = pos, size, "chunk");
        chunks.push(Chunk {
            id: ChunkId::FourCc(id),
            declared_size: size,
            range: pos..end,
            payload_offset: pos + CHUNK_HEADER_SIZE,
            payload: &data[pos + CHUNK_HEADER_SIZE..end],
            children: Vec::new(),
        });
        pos = end;
    }
    if pos < data.len() {
        tracing::debug!(offset = pos, trailing = data.len() - pos, "ignoring trailing bytes after last chunk");
    }
    Ok(chunks)
}

fn view_of<'a>(chunk: &Chunk<'a>) -> ByteView<'a> {
    ByteView::at(chunk.payload, chunk.payload_offset as u64)
}

fn parse_prop(chunk: &Chunk<'_>) -> R<Properties> {
    let mut view = view_of(chunk);
    let _version = view.u16_be()?;
    let max_bit_rate = view.u32_be()?;
    let avg_bit_rate = view.u32_be()?;
    let _max_packet_size = view.u32_be()?;
    let _avg_packet_size = view.u32_be()?;
    let _num_packets = view.u32_be()?;
    let duration_ms = view.u32_be()?;
    Ok(Properties {
        max_bit_rate,
        avg_bit_rate,
        duration_ms,
    })
}

fn parse_mdpr(chunk: &Chunk<'_>) -> R<MediaProperties> {
    let mut view = view_of(chunk);
    let _version = view.u16_be()?;
    let _stream_number = view.u16_be()?;
    let max_bit_rate = view.u32_be()?;
    let avg_bit_rate = view.u32_be()?;
    view.skip(16)?; // packet sizes, start time, preroll
    let duration_ms = view.u32_be()?;
    let name_len = view.u8()? as usize;
    view.skip(name_len)?;
    let mime_len = view.u8()? as usize;
    let mime_type = trim_text(&latin1(view.bytes(mime_len)?));
    let specific_len = view.u32_be()? as usize;
    let specific = view.bytes(specific_len.min(view.remaining()))?;

    let audio = if specific.starts_with(RA_SIGNATURE) {
        match parse_ra_header(specific) {
            Ok(audio) => Some(audio),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable RealAudio stream header");
                None
            }
        }
    } else {
        None
    };

    Ok(MediaProperties {
        max_bit_rate,
        avg_bit_rate,
        duration_ms,
        mime_type,
        audio,
    })
}

/// Audio parameters of a `.ra\xfd` header. Version 3 streams are always 8 kHz mono.
fn parse_ra_header(data: &[u8]) -> R<AudioParams> {
    let mut view = ByteView::new(data);
    view.skip(RA_SIGNATURE.len())?;
    let version = view.u16_be()?;
    match version {
        3 => Ok(AudioParams {
            sample_rate: 8000,
            sample_size: 16,
            channels: 1,
        }),
        4 | 5 => {
            view.skip(42)?;
            if version == 5 {
                view.skip(6)?;
            }
            let sample_rate = view.u16_be()? as u32;
            view.skip(2)?;
            let sample_size = view.u16_be()?;
            let channels = view.u16_be()?;
            Ok(AudioParams {
                sample_rate,
                sample_size,
                channels,
            })
        }
        other => Err(Error::cannot_read(format!("unknown RealAudio header version {}", other))),
    }
}

/// Title, author, copyright and comment, each with a 16-bit length.
fn parse_cont(chunk: &Chunk<'_>) -> R<[String; 4]> {
    let mut view = view_of(chunk);
    let _version = view.u16_be()?;
    let mut fields: [String; 4] = Default::default();
    for field in fields.iter_mut() {
        let len = view.u16_be()? as usize;
        *field = trim_text(&latin1(view.bytes(len)?));
    }
    Ok(fields)
}

pub struct RealCodec;

impl RealCodec {
    fn is_bare_audio(&self, data: &[u8]) -> bool {
        data.starts_with(RA_SIGNATURE)
    }

    /// Header of a bare `.ra` file, which carries no chunk structure.
    fn read_bare_header(&self, data: &[u8]) -> R<GenericAudioHeader> {
        let audio = parse_ra_header(data)?;
        let mut header = GenericAudioHeader::new(AudioFormat::Real, FormatDetails::Real(RealDetails::default()));
        header.encoding = "RealAudio".to_string();
        header.sample_rate = audio.sample_rate;
        header.channels = audio.channels;
        header.bits_per_sample = audio.sample_size;
        Ok(header)
    }
}

impl Codec for RealCodec {
    fn format(&self) -> AudioFormat {
        AudioFormat::Real
    }

    fn validate_file_format(&self, data: &[u8]) -> R<()> {
        if data.len() < CHUNK_HEADER_SIZE {
            return Err(Error::cannot_read("File too small to be a valid RealMedia file"));
        }
        if !data.starts_with(RMF_CHUNK_ID) && !self.is_bare_audio(data) {
            return Err(Error::cannot_read("Not a valid RealMedia file: Missing .RMF header"));
        }
        Ok(())
    }

    fn chunks<'a>(&self, data: &'a [u8]) -> R<Vec<Chunk<'a>>> {
        self.validate_file_format(data)?;
        if self.is_bare_audio(data) {
            return Ok(vec![Chunk {
                id: ChunkId::FourCc(*RA_SIGNATURE),
                declared_size: data.len() as u64,
                range: 0..data.len(),
                payload_offset: RA_SIGNATURE.len(),
                payload: &data[RA_SIGNATURE.len()..],
                children: Vec::new(),
            }]);
        }
        scan_chunks(data)
    }

    fn read_header(&self, data: &[u8]) -> R<GenericAudioHeader> {
        self.validate_file_format(data)?;
        if self.is_bare_audio(data) {
            return self.read_bare_header(data);
        }

        let chunks = scan_chunks(data)?;
        let prop = crate::chunk::find(&chunks, PROP_CHUNK_ID)
            .ok_or_else(|| Error::cannot_read("RealMedia file has no PROP chunk"))?;
        let props = parse_prop(prop)?;

        // First audio stream wins; unreadable stream headers are skipped
        let mut streams: Vec<MediaProperties> = chunks
            .iter()
            .filter(|c| c.is(MDPR_CHUNK_ID))
            .filter_map(|c| match parse_mdpr(c) {
                Ok(media) => Some(media),
                Err(e) => {
                    tracing::warn!(error = %e, offset = c.range.start, "skipping corrupt MDPR chunk");
                    None
                }
            })
            .collect();
        let first_audio = streams
            .iter()
            .position(|m| m.audio.is_some() || m.mime_type.starts_with("audio/"))
            .unwrap_or(0);
        let media = (first_audio < streams.len()).then(|| streams.swap_remove(first_audio));

        let details = RealDetails {
            mime_type: media.as_ref().map(|m| m.mime_type.clone()).filter(|m| !m.is_empty()),
            max_bitrate: media
                .as_ref()
                .map(|m| m.max_bit_rate)
                .filter(|&rate| rate > 0)
                .unwrap_or(props.max_bit_rate),
        };
        let mut header = GenericAudioHeader::new(AudioFormat::Real, FormatDetails::Real(details));
        header.encoding = "RealAudio".to_string();
        if let Some(audio) = media.as_ref().and_then(|m| m.audio) {
            header.sample_rate = audio.sample_rate;
            header.channels = audio.channels;
            header.bits_per_sample = audio.sample_size;
        }

        let duration_ms = match media.as_ref().map(|m| m.duration_ms) {
            Some(ms) if ms > 0 => ms,
            _ => props.duration_ms,
        };
        header.set_duration_secs(duration_ms as f64 / 1000.0);
        if header.sample_rate > 0 {
            header.total_samples = Some(duration_ms as u64 * header.sample_rate as u64 / 1000);
        }

        let avg_bit_rate = match media.as_ref().map(|m| m.avg_bit_rate) {
            Some(rate) if rate > 0 => rate,
            _ => props.avg_bit_rate,
        };
        header.bitrate = avg_bit_rate / 1000;

        if let Some(data_chunk) = crate::chunk::find(&chunks, DATA_CHUNK_ID) {
            let start = (data_chunk.payload_offset + DATA_HEADER_SIZE).min(data_chunk.range.end);
            header.audio_range = Some(start as u64..data_chunk.range.end as u64);
        }
        Ok(header)
    }

    fn read_tag(&self, data: &[u8]) -> R<Tag> {
        self.validate_file_format(data)?;
        let mut tag = Tag::new();
        if self.is_bare_audio(data) {
            return Ok(tag);
        }

        let chunks = scan_chunks(data)?;
        let Some(cont) = crate::chunk::find(&chunks, CONT_CHUNK_ID) else {
            return Ok(tag);
        };
        let [title, author, copyright, comment] = match parse_cont(cont) {
            Ok(fields) => fields,
            Err(e) => {
                tracing::warn!(error = %e, offset = cont.range.start, "skipping corrupt CONT chunk");
                return Ok(tag);
            }
        };

        // Many files put the title in the author slot
        let title = if title.is_empty() { author.clone() } else { title };
        let artist = if author.is_empty() { copyright.clone() } else { author };
        tag.add(FieldKey::Title, title);
        tag.add(FieldKey::Artist, artist);
        tag.add(FieldKey::Copyright, copyright);
        tag.add(FieldKey::Comment, comment);
        Ok(tag)
    }

    fn write_tag(&self, _data: &[u8], _tag: &Tag, _config: &WriteConfig) -> R<Vec<u8>> {
        Err(Error::cannot_write("RealMedia files are read-only"))
    }

    fn delete_tag(&self, _data: &[u8], _config: &WriteConfig) -> R<Vec<u8>> {
        Err(Error::cannot_write("RealMedia files are read-only"))
    }
}
