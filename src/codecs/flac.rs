use crate::codecs::id3;
use crate::codecs::vorbis::{self, VorbisComments};
use crate::header::FlacDetails;
use crate::prelude::*;

// FLAC-specific constants
const FLAC_MARKER: &[u8; 4] = b"fLaC";
const STREAMINFO_BLOCK_TYPE: u8 = 0;
const PADDING_BLOCK_TYPE: u8 = 1;
const VORBIS_COMMENT_BLOCK_TYPE: u8 = 4;
const PICTURE_BLOCK_TYPE: u8 = 6;
const INVALID_BLOCK_TYPE: u8 = 127;
const LAST_METADATA_BLOCK_FLAG: u8 = 0x80;

const BLOCK_HEADER_SIZE: usize = 4;
const STREAMINFO_SIZE: usize = 34;
const MAX_BLOCK_SIZE: usize = 0xFF_FFFF;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub min_block_size: u16,
    pub max_block_size: u16,
    pub min_frame_size: u32,
    pub max_frame_size: u32,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Zero when the encoder did not know the length
    pub total_samples: u64,
    pub md5: [u8; 16],
}

/// Decode the 34-byte bit-packed STREAMINFO record.
pub fn parse_streaminfo(si: &[u8]) -> R<StreamInfo> {
    if si.len() < STREAMINFO_SIZE {
        return Err(Error::cannot_read(format!(
            "STREAMINFO is {} bytes, expected {}",
            si.len(),
            STREAMINFO_SIZE
        )));
    }

    let sample_rate = ((si[10] as u32) << 12) | ((si[11] as u32) << 4) | ((si[12] as u32) >> 4);
    let channels = (((si[12] >> 1) & 0x07) + 1) as u16;
    let bits_per_sample = ((((si[12] & 0x01) << 4) | (si[13] >> 4)) + 1) as u16;
    let total_samples = (((si[13] & 0x0F) as u64) << 32) | BigEndian::read_u32(&si[14..18]) as u64;

    let mut md5 = [0u8; 16];
    md5.copy_from_slice(&si[18..34]);

    Ok(StreamInfo {
        min_block_size: BigEndian::read_u16(&si[0..2]),
        max_block_size: BigEndian::read_u16(&si[2..4]),
        min_frame_size: BigEndian::read_u24(&si[4..7]),
        max_frame_size: BigEndian::read_u24(&si[7..10]),
        sample_rate,
        channels,
        bits_per_sample,
        total_samples,
        md5,
    })
}

/// Metadata blocks plus the offsets that frame them.
struct MetadataRegion<'a> {
    /// Offset of the fLaC marker (non-zero when an ID3v2 tag precedes it)
    marker: usize,
    blocks: Vec<Chunk<'a>>,
    audio_start: usize,
}

fn block_type(chunk: &Chunk<'_>) -> u8 {
    match chunk.id {
        ChunkId::Block(kind) => kind,
        _ => INVALID_BLOCK_TYPE,
    }
}

pub struct FlacCodec;

impl FlacCodec {
    fn marker_offset(&self, data: &[u8]) -> usize {
        match id3::tag_len(data) {
            Some(len) if data.get(len..len + 4) == Some(&FLAC_MARKER[..]) => len,
            _ => 0,
        }
    }

    fn region<'a>(&self, data: &'a [u8]) -> R<MetadataRegion<'a>> {
        self.validate_file_format(data)?;
        let marker = self.marker_offset(data);
        let mut pos = marker + FLAC_MARKER.len();
        let mut blocks = Vec::new();

        loop {
            let mut view = ByteView::at(&data[pos..], pos as u64);
            if view.remaining() < BLOCK_HEADER_SIZE {
                return Err(Error::cannot_read("truncated metadata block header").at_offset(pos as u64));
            }
            let flags = view.u8()?;
            let is_last = flags & LAST_METADATA_BLOCK_FLAG != 0;
            let kind = flags & 0x7F;
            let size = view.u24_be()? as usize;
            let id = ChunkId::Block(kind);

            if kind == INVALID_BLOCK_TYPE {
                return Err(Error::chunk("invalid metadata block type", id.to_string(), pos as u64, size as u64));
            }
            if size > view.remaining() {
                return Err(Error::chunk(
                    "metadata block exceeds the file",
                    id.to_string(),
                    pos as u64,
                    size as u64,
                ));
            }
            if blocks.is_empty() && kind != STREAMINFO_BLOCK_TYPE {
                return Err(Error::chunk(
                    "STREAMINFO must be the first metadata block",
                    id.to_string(),
                    pos as u64,
                    size as u64,
                ));
            }

            let payload_offset = pos + BLOCK_HEADER_SIZE;
            let end = payload_offset + size;
            tracing::trace!(block = %id, offset = pos, size, "metadata block");
            blocks.push(Chunk {
                id,
                declared_size: size as u64,
                range: pos..end,
                payload_offset,
                payload: &data[payload_offset..end],
                children: Vec::new(),
            });
            pos = end;
            if is_last {
                break;
            }
        }

        Ok(MetadataRegion {
            marker,
            blocks,
            audio_start: pos,
        })
    }
}

impl Codec for FlacCodec {
    fn format(&self) -> AudioFormat {
        AudioFormat::Flac
    }

    fn validate_file_format(&self, data: &[u8]) -> R<()> {
        let marker = self.marker_offset(data);
        if data.len() < marker + FLAC_MARKER.len() {
            return Err(Error::cannot_read("File too small to be a valid FLAC"));
        }
        if &data[marker..marker + 4] != FLAC_MARKER {
            return Err(Error::cannot_read("Not a valid FLAC file: Missing fLaC marker"));
        }
        Ok(())
    }

    fn chunks<'a>(&self, data: &'a [u8]) -> R<Vec<Chunk<'a>>> {
        Ok(self.region(data)?.blocks)
    }

    fn read_header(&self, data: &[u8]) -> R<GenericAudioHeader> {
        let region = self.region(data)?;
        let info = parse_streaminfo(region.blocks[0].payload)?;

        let mut header = GenericAudioHeader::new(
            AudioFormat::Flac,
            FormatDetails::Flac(FlacDetails {
                min_block_size: info.min_block_size,
                max_block_size: info.max_block_size,
                min_frame_size: info.min_frame_size,
                max_frame_size: info.max_frame_size,
                md5: info.md5.iter().map(|b| format!("{:02x}", b)).collect(),
            }),
        );
        header.encoding = "FLAC".to_string();
        header.lossless = true;
        header.vbr = true;
        header.sample_rate = info.sample_rate;
        header.channels = info.channels;
        header.bits_per_sample = info.bits_per_sample;
        header.audio_range = Some(region.audio_start as u64..data.len() as u64);
        if info.total_samples > 0 {
            header.set_duration_from_samples(info.total_samples);
        }
        header.bitrate = header.average_bitrate().unwrap_or(0);
        Ok(header)
    }

    fn read_tag(&self, data: &[u8]) -> R<Tag> {
        let region = self.region(data)?;
        let mut tag = Tag::new();
        let mut pictures = Vec::new();

        for block in &region.blocks {
            match block_type(block) {
                VORBIS_COMMENT_BLOCK_TYPE if tag.is_empty() => {
                    match VorbisComments::parse(block.payload, block.payload_offset as u64) {
                        Ok(comments) => tag = comments.to_tag(),
                        Err(e) => tracing::warn!(error = %e, "skipping corrupt VORBIS_COMMENT block"),
                    }
                }
                PICTURE_BLOCK_TYPE => match vorbis::parse_picture(block.payload) {
                    Ok(mut art) => {
                        let end = (block.payload_offset + block.payload.len()) as u64;
                        art.range = Some(end - art.data.len() as u64..end);
                        pictures.push(art);
                    }
                    Err(e) => tracing::warn!(error = %e, "skipping corrupt PICTURE block"),
                },
                _ => {}
            }
        }

        for art in pictures {
            tag.add(FieldKey::CoverArt, art);
        }
        Ok(tag)
    }

    fn write_tag(&self, data: &[u8], tag: &Tag, config: &WriteConfig) -> R<Vec<u8>> {
        let region = self.region(data)?;

        let existing = region
            .blocks
            .iter()
            .find(|b| block_type(b) == VORBIS_COMMENT_BLOCK_TYPE)
            .and_then(|b| VorbisComments::parse(b.payload, b.payload_offset as u64).ok())
            .unwrap_or_else(|| VorbisComments::new(&config.vendor));
        let comment_block = existing.with_tag(&tag.clone().without_artwork()).to_bytes();
        let picture_blocks: Vec<Vec<u8>> = tag.artworks().map(vorbis::picture_to_bytes).collect();

        // (type, payload) in output order
        let mut blocks: Vec<(u8, &[u8])> = Vec::new();
        let mut comment_placed = false;
        for block in &region.blocks {
            match block_type(block) {
                PADDING_BLOCK_TYPE | PICTURE_BLOCK_TYPE => {}
                VORBIS_COMMENT_BLOCK_TYPE => {
                    if !comment_placed {
                        blocks.push((VORBIS_COMMENT_BLOCK_TYPE, comment_block.as_slice()));
                        comment_placed = true;
                    }
                }
                kind => {
                    blocks.push((kind, block.payload));
                    if kind == STREAMINFO_BLOCK_TYPE && !comment_placed {
                        // A missing comment block goes right after STREAMINFO
                        if !region.blocks.iter().any(|b| block_type(b) == VORBIS_COMMENT_BLOCK_TYPE) {
                            blocks.push((VORBIS_COMMENT_BLOCK_TYPE, comment_block.as_slice()));
                            comment_placed = true;
                        }
                    }
                }
            }
        }
        for picture in &picture_blocks {
            blocks.push((PICTURE_BLOCK_TYPE, picture.as_slice()));
        }

        let old_region = region.audio_start - (region.marker + FLAC_MARKER.len());
        let needed: usize = blocks.iter().map(|(_, p)| BLOCK_HEADER_SIZE + p.len()).sum();
        let padding = if needed == old_region {
            None
        } else if needed + BLOCK_HEADER_SIZE <= old_region {
            Some(old_region - needed - BLOCK_HEADER_SIZE)
        } else {
            tracing::debug!(needed, old_region, "metadata region grows");
            Some(config.padding as usize)
        };
        let padding_block = vec![0u8; padding.unwrap_or(0)];
        if padding.is_some() {
            blocks.push((PADDING_BLOCK_TYPE, padding_block.as_slice()));
        }

        let mut output = Cursor::new(Vec::with_capacity(data.len() + needed));
        output.write_all(&data[..region.marker])?;
        output.write_all(FLAC_MARKER)?;
        let count = blocks.len();
        for (i, (kind, payload)) in blocks.into_iter().enumerate() {
            if payload.len() > MAX_BLOCK_SIZE {
                return Err(Error::cannot_write(format!(
                    "metadata block of {} bytes does not fit a 24-bit length",
                    payload.len()
                )));
            }
            let flags = if i + 1 == count { kind | LAST_METADATA_BLOCK_FLAG } else { kind };
            output.write_u8(flags)?;
            output.write_u24::<BigEndian>(payload.len() as u32)?;
            output.write_all(payload)?;
        }
        output.write_all(&data[region.audio_start..])?;
        Ok(output.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaminfo(rate: u32, channels: u8, bits: u8, total: u64) -> Vec<u8> {
        let mut si = vec![0u8; STREAMINFO_SIZE];
        si[0..2].copy_from_slice(&4096u16.to_be_bytes());
        si[2..4].copy_from_slice(&4096u16.to_be_bytes());
        si[4..7].copy_from_slice(&[0, 0x10, 0]);
        si[7..10].copy_from_slice(&[0, 0x40, 0]);
        let packed = ((rate as u64) << 44)
            | (((channels - 1) as u64) << 41)
            | (((bits - 1) as u64) << 36)
            | total;
        si[10..18].copy_from_slice(&packed.to_be_bytes());
        si[18..34].copy_from_slice(&[0xAB; 16]);
        si
    }

    fn block(kind: u8, payload: &[u8], last: bool) -> Vec<u8> {
        let mut out = vec![if last { kind | 0x80 } else { kind }];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
        out.extend_from_slice(payload);
        out
    }

    fn flac(blocks: &[Vec<u8>], audio: &[u8]) -> Vec<u8> {
        let mut out = FLAC_MARKER.to_vec();
        out.extend(blocks.concat());
        out.extend_from_slice(audio);
        out
    }

    fn comments(pairs: &[(&str, &str)]) -> Vec<u8> {
        VorbisComments {
            vendor: "reference libFLAC".to_string(),
            comments: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
        .to_bytes()
    }

    #[test]
    fn streaminfo_fixture_decodes_exactly() {
        let info = parse_streaminfo(&streaminfo(44100, 2, 16, 1_234_567)).unwrap();
        assert_eq!(info.sample_rate, 44100);
        assert_eq!(info.channels, 2);
        assert_eq!(info.bits_per_sample, 16);
        assert_eq!(info.total_samples, 1_234_567);
        assert_eq!(info.min_block_size, 4096);
        assert_eq!(info.min_frame_size, 0x1000);
        assert_eq!(info.max_frame_size, 0x4000);
    }

    #[test]
    fn streaminfo_36_bit_sample_count() {
        let info = parse_streaminfo(&streaminfo(192000, 8, 24, 0xF_0000_0001)).unwrap();
        assert_eq!(info.sample_rate, 192000);
        assert_eq!(info.channels, 8);
        assert_eq!(info.bits_per_sample, 24);
        assert_eq!(info.total_samples, 0xF_0000_0001);
    }

    #[test]
    fn short_streaminfo_is_rejected() {
        assert!(parse_streaminfo(&[0u8; 33]).unwrap_err().is_cannot_read());
    }

    #[test]
    fn streaminfo_must_come_first() {
        let data = flac(
            &[
                block(VORBIS_COMMENT_BLOCK_TYPE, &comments(&[]), false),
                block(STREAMINFO_BLOCK_TYPE, &streaminfo(44100, 2, 16, 0), true),
            ],
            &[],
        );
        assert!(FlacCodec.read_header(&data).unwrap_err().is_cannot_read());
    }

    #[test]
    fn reads_header_and_tag() {
        let data = flac(
            &[
                block(STREAMINFO_BLOCK_TYPE, &streaminfo(44100, 2, 16, 441000), false),
                block(3, &[0u8; 18], false),
                block(VORBIS_COMMENT_BLOCK_TYPE, &comments(&[("TITLE", "Song"), ("TRACKNUMBER", "1"), ("TRACKTOTAL", "9")]), false),
                block(PADDING_BLOCK_TYPE, &[0u8; 100], true),
            ],
            &[0x55; 10000],
        );
        let header = FlacCodec.read_header(&data).unwrap();
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.duration_secs(), Some(10.0));
        assert_eq!(header.bitrate, 8);
        assert!(header.lossless);

        let tag = FlacCodec.read_tag(&data).unwrap();
        assert_eq!(tag.first_text(FieldKey::Title), Some("Song"));
        assert_eq!(tag.first_text(FieldKey::Track), Some("1/9"));
    }

    #[test]
    fn block_past_eof_is_cannot_read() {
        let mut data = flac(&[block(STREAMINFO_BLOCK_TYPE, &streaminfo(44100, 2, 16, 0), true)], &[]);
        data[5] = 0x7F; // declared length far beyond the file
        let err = FlacCodec.read_tag(&data).unwrap_err();
        assert!(err.is_cannot_read());
        assert!(err.to_string().contains("STREAMINFO"));
    }

    #[test]
    fn corrupt_picture_is_skipped() {
        let data = flac(
            &[
                block(STREAMINFO_BLOCK_TYPE, &streaminfo(44100, 2, 16, 0), false),
                block(PICTURE_BLOCK_TYPE, &[0, 0, 0, 3, 0xFF, 0xFF], false),
                block(VORBIS_COMMENT_BLOCK_TYPE, &comments(&[("ARTIST", "Band")]), true),
            ],
            &[],
        );
        let tag = FlacCodec.read_tag(&data).unwrap();
        assert_eq!(tag.first_text(FieldKey::Artist), Some("Band"));
        assert_eq!(tag.artworks().count(), 0);
    }

    #[test]
    fn write_reuses_padding() {
        let data = flac(
            &[
                block(STREAMINFO_BLOCK_TYPE, &streaminfo(44100, 2, 16, 100), false),
                block(VORBIS_COMMENT_BLOCK_TYPE, &comments(&[("TITLE", "Old"), ("REPLAYGAIN_TRACK_GAIN", "1 dB")]), false),
                block(PADDING_BLOCK_TYPE, &[0u8; 1000], true),
            ],
            b"AUDIOFRAMES",
        );
        let mut tag = FlacCodec.read_tag(&data).unwrap();
        tag.set(FieldKey::Title, "New title");
        tag.add(FieldKey::CoverArt, Artwork::new("image/png", b"\x89PNG\r\n\x1a\n123".to_vec()));

        let written = FlacCodec.write_tag(&data, &tag, &WriteConfig::default()).unwrap();
        assert_eq!(written.len(), data.len());
        assert!(written.ends_with(b"AUDIOFRAMES"));
        assert_eq!(FlacCodec.read_tag(&written).unwrap(), tag);

        let region = FlacCodec.region(&written).unwrap();
        let comments = VorbisComments::parse(region.blocks[1].payload, 0).unwrap();
        assert!(comments.comments.iter().any(|(k, _)| k == "REPLAYGAIN_TRACK_GAIN"));
        assert_eq!(comments.vendor, "reference libFLAC");
    }

    #[test]
    fn write_grows_region_with_configured_padding() {
        let data = flac(
            &[block(STREAMINFO_BLOCK_TYPE, &streaminfo(44100, 2, 16, 100), true)],
            b"AUDIO",
        );
        let mut tag = Tag::new();
        tag.add(FieldKey::Album, "Record");
        let config = WriteConfig { padding: 64, ..WriteConfig::default() };

        let written = FlacCodec.write_tag(&data, &tag, &config).unwrap();
        let region = FlacCodec.region(&written).unwrap();
        assert_eq!(block_type(&region.blocks[1]), VORBIS_COMMENT_BLOCK_TYPE);
        let padding = region.blocks.last().unwrap();
        assert_eq!(block_type(padding), PADDING_BLOCK_TYPE);
        assert_eq!(padding.payload.len(), 64);
        assert_eq!(FlacCodec.read_tag(&written).unwrap(), tag);
        let comments = VorbisComments::parse(region.blocks[1].payload, 0).unwrap();
        assert_eq!(comments.vendor, "tagcodex");
    }

    #[test]
    fn leading_id3_is_skipped_and_kept() {
        let mut data = b"ID3\x03\0\0\0\0\0\x04\0\0\0\0".to_vec();
        data.extend(flac(&[block(STREAMINFO_BLOCK_TYPE, &streaminfo(48000, 1, 24, 48000), true)], &[]));
        let header = FlacCodec.read_header(&data).unwrap();
        assert_eq!(header.sample_rate, 48000);
        assert_eq!(header.channels, 1);

        let written = FlacCodec.write_tag(&data, &Tag::new(), &WriteConfig::default()).unwrap();
        assert!(written.starts_with(b"ID3\x03"));
    }
}
