//! DSDIFF (`.dff`) reader. The format has no writer.

use crate::codecs::{id3, latin1, trim_text};
use crate::header::DffDetails;
use crate::prelude::*;

// Chunk Identifiers
const FRM8_CHUNK_ID: &[u8; 4] = b"FRM8";
const DSD_FORM_ID: &[u8; 4] = b"DSD ";
const FVER_CHUNK_ID: &[u8; 4] = b"FVER";
const PROP_CHUNK_ID: &[u8; 4] = b"PROP";
const SND_PROPERTY_ID: &[u8; 4] = b"SND ";
const FS_CHUNK_ID: &[u8; 4] = b"FS  ";
const CHNL_CHUNK_ID: &[u8; 4] = b"CHNL";
const CMPR_CHUNK_ID: &[u8; 4] = b"CMPR";
const DSD_CHUNK_ID: &[u8; 4] = b"DSD ";
const DST_CHUNK_ID: &[u8; 4] = b"DST ";
const FRTE_CHUNK_ID: &[u8; 4] = b"FRTE";
const DIIN_CHUNK_ID: &[u8; 4] = b"DIIN";
const DITI_CHUNK_ID: &[u8; 4] = b"DITI";
const DIAR_CHUNK_ID: &[u8; 4] = b"DIAR";
const ID3_CHUNK_ID: &[u8; 4] = b"ID3 ";

// Chunk Structures
const HEADER_SIZE: usize = 16; // FRM8 + 64-bit size + DSD
const CHUNK_HEADER_SIZE: usize = 12;

#[derive(Debug, Default)]
struct SoundProperties {
    sample_rate: u32,
    channels: u16,
    compression: Option<[u8; 4]>,
    compression_name: String,
}

pub struct DffCodec;

impl DffCodec {
    /// The FRM8 chunk with its local chunks as children; PROP, DST and DIIN
    /// carry their own nested chunks.
    fn form<'a>(&self, data: &'a [u8]) -> R<Chunk<'a>> {
        self.validate_file_format(data)?;
        let form_size = BigEndian::read_u64(&data[4..12]);
        let end = (CHUNK_HEADER_SIZE as u64).saturating_add(form_size);
        if end > data.len() as u64 {
            return Err(Error::chunk("FRM8 size exceeds the file", "FRM8", 0, form_size));
        }
        let end = end as usize;

        let mut children = scan_iff(data, HEADER_SIZE, end, SizeWidth::U64)?;
        for chunk in children.iter_mut() {
            let nested_start = match chunk.fourcc() {
                Some(PROP_CHUNK_ID) => chunk.payload_offset + 4,
                Some(DST_CHUNK_ID) | Some(DIIN_CHUNK_ID) => chunk.payload_offset,
                _ => continue,
            };
            let nested_end = chunk.payload_offset + chunk.payload.len();
            if nested_start <= nested_end {
                chunk.children = scan_iff(data, nested_start, nested_end, SizeWidth::U64)?;
            }
        }

        Ok(Chunk {
            id: ChunkId::FourCc(*FRM8_CHUNK_ID),
            declared_size: form_size,
            range: 0..end,
            payload_offset: CHUNK_HEADER_SIZE,
            payload: &data[CHUNK_HEADER_SIZE..end],
            children,
        })
    }

    fn parse_prop(&self, prop: &Chunk<'_>) -> R<SoundProperties> {
        if prop.payload.get(0..4) != Some(&SND_PROPERTY_ID[..]) {
            return Err(Error::chunk(
                "PROP chunk is not a SND property",
                "PROP",
                prop.range.start as u64,
                prop.declared_size,
            ));
        }

        let mut props = SoundProperties::default();
        for chunk in &prop.children {
            let mut view = ByteView::at(chunk.payload, chunk.payload_offset as u64);
            match chunk.fourcc() {
                Some(FS_CHUNK_ID) => props.sample_rate = view.u32_be()?,
                Some(CHNL_CHUNK_ID) => props.channels = view.u16_be()?,
                Some(CMPR_CHUNK_ID) => {
                    props.compression = Some(view.fourcc()?);
                    let len = view.u8()? as usize;
                    props.compression_name = trim_text(&latin1(view.bytes(len.min(view.remaining()))?));
                }
                _ => {}
            }
        }
        Ok(props)
    }

    /// Text of a DITI/DIAR chunk: 32-bit count followed by the characters.
    fn info_text(&self, chunk: &Chunk<'_>) -> R<String> {
        let mut view = ByteView::at(chunk.payload, chunk.payload_offset as u64);
        let len = view.u32_be()? as usize;
        Ok(trim_text(&latin1(view.bytes(len)?)))
    }
}

impl Codec for DffCodec {
    fn format(&self) -> AudioFormat {
        AudioFormat::Dff
    }

    fn validate_file_format(&self, data: &[u8]) -> R<()> {
        if data.len() < HEADER_SIZE {
            return Err(Error::cannot_read("File too small to be a valid DFF"));
        }
        if &data[0..4] != FRM8_CHUNK_ID {
            return Err(Error::cannot_read("Not a valid DFF file: Missing FRM8 header"));
        }
        if &data[12..16] != DSD_FORM_ID {
            return Err(Error::cannot_read("Not a valid DFF file: Form type is not DSD"));
        }
        Ok(())
    }

    fn chunks<'a>(&self, data: &'a [u8]) -> R<Vec<Chunk<'a>>> {
        Ok(vec![self.form(data)?])
    }

    fn read_header(&self, data: &[u8]) -> R<GenericAudioHeader> {
        let form = self.form(data)?;

        // PROP has to come before the sound data
        let prop_index = form.children.iter().position(|c| c.is(PROP_CHUNK_ID));
        let sound_index = form
            .children
            .iter()
            .position(|c| c.is(DSD_CHUNK_ID) || c.is(DST_CHUNK_ID));
        let (prop, sound) = match (prop_index, sound_index) {
            (Some(p), Some(s)) if p < s => (&form.children[p], &form.children[s]),
            (_, None) => return Err(Error::cannot_read("DFF file has no DSD or DST sound chunk")),
            _ => return Err(Error::cannot_read("DFF file has no PROP chunk before its sound data")),
        };
        let props = self.parse_prop(prop)?;
        if props.sample_rate == 0 || props.channels == 0 {
            return Err(Error::chunk(
                "PROP chunk lacks FS or CHNL",
                "PROP",
                prop.range.start as u64,
                prop.declared_size,
            ));
        }

        let version = match form.child(FVER_CHUNK_ID) {
            Some(fver) if fver.payload.len() >= 4 => {
                let v = fver.payload;
                Some(format!("{}.{}.{}.{}", v[0], v[1], v[2], v[3]))
            }
            _ => None,
        };

        let mut details = DffDetails {
            version,
            compression: if props.compression_name.is_empty() {
                props
                    .compression
                    .map(|code| fourcc_to_string(&code).trim_end().to_string())
                    .unwrap_or_else(|| "DSD".to_string())
            } else {
                props.compression_name.clone()
            },
            dst_frames: None,
            dst_frame_rate: None,
        };

        let sound_range = sound.payload_offset as u64..(sound.payload_offset + sound.payload.len()) as u64;
        let samples = if sound.is(DST_CHUNK_ID) {
            let frte = sound.child(FRTE_CHUNK_ID).ok_or_else(|| {
                Error::chunk(
                    "DST sound chunk without FRTE",
                    "DST ",
                    sound.range.start as u64,
                    sound.declared_size,
                )
            })?;
            let mut view = ByteView::at(frte.payload, frte.payload_offset as u64);
            let frames = view.u32_be()?;
            let frame_rate = view.u16_be()?;
            if frame_rate == 0 {
                return Err(Error::chunk("FRTE frame rate is zero", "FRTE", frte.range.start as u64, frte.declared_size));
            }
            details.dst_frames = Some(frames);
            details.dst_frame_rate = Some(frame_rate);
            (frames as f64 / frame_rate as f64 * props.sample_rate as f64) as u64
        } else {
            (sound_range.end - sound_range.start) * 8 / props.channels as u64
        };

        let dst = sound.is(DST_CHUNK_ID);
        let mut header = GenericAudioHeader::new(AudioFormat::Dff, FormatDetails::Dff(details));
        header.encoding = if dst { "DST" } else { "DSD" }.to_string();
        header.sample_rate = props.sample_rate;
        header.channels = props.channels;
        header.bits_per_sample = 1;
        header.lossless = true;
        header.vbr = dst;
        header.audio_range = Some(sound_range);
        header.set_duration_from_samples(samples);
        header.bitrate = if dst {
            header.average_bitrate().unwrap_or(0)
        } else {
            (props.sample_rate as u64 * props.channels as u64 / 1000) as u32
        };
        Ok(header)
    }

    fn read_tag(&self, data: &[u8]) -> R<Tag> {
        let form = self.form(data)?;

        let mut tag = form
            .children
            .iter()
            .filter(|c| c.is(ID3_CHUNK_ID))
            .find_map(|c| match id3::read_tag(c.payload) {
                Ok(tag) => Some(tag),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable ID3 chunk");
                    None
                }
            })
            .unwrap_or_default();

        let mut info = Tag::new();
        // Edited master info, inside DIIN or loose at the top level
        let info_chunks = form.children.iter().flat_map(|c| {
            if c.is(DIIN_CHUNK_ID) {
                c.children.iter().collect::<Vec<_>>()
            } else {
                vec![c]
            }
        });
        for chunk in info_chunks {
            let key = match chunk.fourcc() {
                Some(DITI_CHUNK_ID) => FieldKey::Title,
                Some(DIAR_CHUNK_ID) => FieldKey::Artist,
                _ => continue,
            };
            match self.info_text(chunk) {
                Ok(text) => info.add(key, text),
                Err(e) => tracing::warn!(error = %e, chunk = %chunk.id, "skipping corrupt edited master chunk"),
            }
        }
        tag.fill_missing(&info);
        Ok(tag)
    }

    fn write_tag(&self, _data: &[u8], _tag: &Tag, _config: &WriteConfig) -> R<Vec<u8>> {
        Err(Error::cannot_write("DFF files are read-only"))
    }

    fn delete_tag(&self, _data: &[u8], _config: &WriteConfig) -> R<Vec<u8>> {
        Err(Error::cannot_write("DFF files are read-only"))
    }
}
