//! MPEG audio (MP3) codec.
//!
//! The stream parameters come from the first valid frame header plus the
//! Xing/Info or VBRI header stored inside that frame. Metadata lives in a
//! leading ID3v2 tag and an optional trailing ID3v1 block.

mod xing;

use crate::codecs::id3;
use crate::header::Mp3Details;
use crate::prelude::*;
use xing::{VbriHeader, XingHeader, xing_offset};

const ID3_CHUNK_ID: &[u8; 4] = b"ID3 ";
const FRAME_CHUNK_ID: &[u8; 4] = b"MPEG";
const ID3V1_CHUNK_ID: &[u8; 4] = b"TAG ";

/// How far past the tag a frame sync is searched for.
const SYNC_SEARCH_LIMIT: usize = 64 * 1024;

const BITRATE_V1_L1: [u32; 15] = [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448];
const BITRATE_V1_L2: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384];
const BITRATE_V1_L3: [u32; 15] = [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320];
const BITRATE_V2_L1: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256];
const BITRATE_V2_L23: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

const SAMPLE_RATES: [u32; 3] = [44100, 48000, 32000];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

impl MpegVersion {
    pub fn name(&self) -> &'static str {
        match self {
            MpegVersion::Mpeg1 => "1",
            MpegVersion::Mpeg2 => "2",
            MpegVersion::Mpeg25 => "2.5",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Stereo,
    JointStereo,
    DualChannel,
    Mono,
}

impl ChannelMode {
    pub fn name(&self) -> &'static str {
        match self {
            ChannelMode::Stereo => "Stereo",
            ChannelMode::JointStereo => "Joint Stereo",
            ChannelMode::DualChannel => "Dual Channel",
            ChannelMode::Mono => "Mono",
        }
    }

    pub fn channels(&self) -> u16 {
        if *self == ChannelMode::Mono { 1 } else { 2 }
    }
}

/// Decoded four byte MPEG audio frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: MpegVersion,
    pub layer: u8,
    pub protected: bool,
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub padding: bool,
    pub channel_mode: ChannelMode,
    pub frame_len: usize,
    pub samples_per_frame: u32,
}

impl FrameHeader {
    /// `None` for anything that is not a usable frame header. Free-format
    /// bitrates are rejected because the frame length cannot be derived.
    pub fn parse(bytes: [u8; 4]) -> Option<FrameHeader> {
        let word = BigEndian::read_u32(&bytes);
        if word >> 21 != 0x7FF {
            return None;
        }

        let version = match (word >> 19) & 0x03 {
            0 => MpegVersion::Mpeg25,
            2 => MpegVersion::Mpeg2,
            3 => MpegVersion::Mpeg1,
            _ => return None,
        };
        let layer = match (word >> 17) & 0x03 {
            1 => 3,
            2 => 2,
            3 => 1,
            _ => return None,
        };
        let protected = (word >> 16) & 1 == 0;

        let bitrate_index = ((word >> 12) & 0x0F) as usize;
        if bitrate_index == 0 || bitrate_index == 15 {
            return None;
        }
        let table = match (version, layer) {
            (MpegVersion::Mpeg1, 1) => &BITRATE_V1_L1,
            (MpegVersion::Mpeg1, 2) => &BITRATE_V1_L2,
            (MpegVersion::Mpeg1, _) => &BITRATE_V1_L3,
            (_, 1) => &BITRATE_V2_L1,
            (_, _) => &BITRATE_V2_L23,
        };
        let bitrate_kbps = table[bitrate_index];

        let rate_index = ((word >> 10) & 0x03) as usize;
        if rate_index == 3 {
            return None;
        }
        let sample_rate = match version {
            MpegVersion::Mpeg1 => SAMPLE_RATES[rate_index],
            MpegVersion::Mpeg2 => SAMPLE_RATES[rate_index] / 2,
            MpegVersion::Mpeg25 => SAMPLE_RATES[rate_index] / 4,
        };

        let padding = (word >> 9) & 1 == 1;
        let channel_mode = match (word >> 6) & 0x03 {
            0 => ChannelMode::Stereo,
            1 => ChannelMode::JointStereo,
            2 => ChannelMode::DualChannel,
            _ => ChannelMode::Mono,
        };

        let samples_per_frame = match (version, layer) {
            (_, 1) => 384,
            (_, 2) => 1152,
            (MpegVersion::Mpeg1, _) => 1152,
            (_, _) => 576,
        };

        let bits = bitrate_kbps * 1000;
        let frame_len = if layer == 1 {
            (12 * bits / sample_rate + padding as u32) * 4
        } else {
            samples_per_frame / 8 * bits / sample_rate + padding as u32
        } as usize;

        Some(FrameHeader {
            version,
            layer,
            protected,
            bitrate_kbps,
            sample_rate,
            padding,
            channel_mode,
            frame_len,
            samples_per_frame,
        })
    }

    fn layer_name(&self) -> &'static str {
        match self.layer {
            1 => "I",
            2 => "II",
            _ => "III",
        }
    }

    fn same_stream(&self, other: &FrameHeader) -> bool {
        self.version == other.version
            && self.layer == other.layer
            && self.sample_rate == other.sample_rate
    }
}

/// First frame in `data[start..end]` whose successor (when there is room for
/// one) is also a frame of the same stream.
pub fn find_first_frame(data: &[u8], start: usize, end: usize) -> Option<(usize, FrameHeader)> {
    let limit = end.min(start.saturating_add(SYNC_SEARCH_LIMIT));
    let mut pos = start;

    while pos + 4 <= limit {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        if let Some(header) = FrameHeader::parse([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) {
            let next = pos + header.frame_len;
            if next + 4 > end {
                return Some((pos, header));
            }
            let following = FrameHeader::parse([data[next], data[next + 1], data[next + 2], data[next + 3]]);
            if following.is_some_and(|f| header.same_stream(&f)) {
                return Some((pos, header));
            }
        }
        pos += 1;
    }
    None
}

/// Byte layout around the audio: `[0, audio_start)` is the ID3v2 tag and
/// `[audio_end, len)` the ID3v1 block.
struct Layout {
    audio_start: usize,
    audio_end: usize,
}

pub struct Mp3Codec;

impl Mp3Codec {
    fn layout(&self, data: &[u8]) -> R<Layout> {
        let audio_start = match id3::tag_len(data) {
            Some(len) if len > data.len() => {
                return Err(Error::chunk(
                    "ID3v2 tag size exceeds the remaining bytes",
                    "ID3",
                    0,
                    (len - id3::HEADER_LEN) as u64,
                ));
            }
            Some(len) => len,
            None => 0,
        };
        let audio_end = if id3::has_id3v1(data) && data.len() - id3::ID3V1_LEN >= audio_start {
            data.len() - id3::ID3V1_LEN
        } else {
            data.len()
        };
        Ok(Layout {
            audio_start,
            audio_end,
        })
    }

    fn first_frame(&self, data: &[u8], layout: &Layout) -> R<(usize, FrameHeader)> {
        find_first_frame(data, layout.audio_start, layout.audio_end)
            .ok_or_else(|| Error::cannot_read("no MPEG frame sync found").at_offset(layout.audio_start as u64))
    }
}

impl Codec for Mp3Codec {
    fn format(&self) -> AudioFormat {
        AudioFormat::Mp3
    }

    fn validate_file_format(&self, data: &[u8]) -> R<()> {
        let layout = self.layout(data)?;
        self.first_frame(data, &layout)?;
        Ok(())
    }

    fn chunks<'a>(&self, data: &'a [u8]) -> R<Vec<Chunk<'a>>> {
        let layout = self.layout(data)?;
        let mut chunks = Vec::new();

        if layout.audio_start > 0 {
            chunks.push(Chunk {
                id: ChunkId::FourCc(*ID3_CHUNK_ID),
                declared_size: (layout.audio_start - id3::HEADER_LEN) as u64,
                range: 0..layout.audio_start,
                payload_offset: id3::HEADER_LEN,
                payload: &data[id3::HEADER_LEN..layout.audio_start],
                children: Vec::new(),
            });
        }

        if let Some((offset, frame)) = find_first_frame(data, layout.audio_start, layout.audio_end) {
            let end = (offset + frame.frame_len).min(layout.audio_end);
            let bytes = &data[offset..end];
            let mut children = Vec::new();
            if let Ok(Some(xing)) = XingHeader::parse(bytes, &frame, offset as u64) {
                let start = offset + xing_offset(frame.version, frame.channel_mode);
                children.push(Chunk {
                    id: ChunkId::FourCc(*xing.id()),
                    declared_size: (end - start) as u64,
                    range: start..end,
                    payload_offset: start + 4,
                    payload: &data[start + 4..end],
                    children: Vec::new(),
                });
            }
            chunks.push(Chunk {
                id: ChunkId::FourCc(*FRAME_CHUNK_ID),
                declared_size: frame.frame_len as u64,
                range: offset..end,
                payload_offset: offset + 4,
                payload: &data[offset + 4..end],
                children,
            });
        }

        if layout.audio_end < data.len() {
            chunks.push(Chunk {
                id: ChunkId::FourCc(*ID3V1_CHUNK_ID),
                declared_size: id3::ID3V1_LEN as u64,
                range: layout.audio_end..data.len(),
                payload_offset: layout.audio_end + 3,
                payload: &data[layout.audio_end + 3..],
                children: Vec::new(),
            });
        }
        Ok(chunks)
    }

    fn read_header(&self, data: &[u8]) -> R<GenericAudioHeader> {
        let layout = self.layout(data)?;
        let (offset, frame) = self.first_frame(data, &layout)?;
        let frame_bytes = &data[offset..(offset + frame.frame_len).min(layout.audio_end)];

        let xing = XingHeader::parse(frame_bytes, &frame, offset as u64)?;
        let vbri = match xing {
            Some(_) => None,
            None => VbriHeader::parse(frame_bytes, offset as u64)?,
        };

        let mut details = Mp3Details {
            version: frame.version.name().to_string(),
            layer: frame.layer,
            channel_mode: frame.channel_mode.name().to_string(),
            first_frame_offset: offset as u64,
            ..Default::default()
        };

        let (frames, stream_bytes, vbr) = if let Some(xing) = &xing {
            details.vbr_header = Some(fourcc_to_string(xing.id()));
            details.quality = xing.quality;
            if let Some(lame) = &xing.lame {
                details.encoder = Some(lame.encoder.clone());
                details.encoder_delay = Some(lame.encoder_delay);
                details.encoder_padding = Some(lame.encoder_padding);
            }
            (xing.frames, xing.bytes, xing.vbr)
        } else if let Some(vbri) = &vbri {
            details.vbr_header = Some("VBRI".to_string());
            details.quality = Some(vbri.quality as u32);
            (Some(vbri.frames), Some(vbri.bytes), true)
        } else {
            (None, None, false)
        };
        details.frames = frames;

        let mut header = GenericAudioHeader::new(AudioFormat::Mp3, FormatDetails::Mp3(details));
        header.encoding = format!("MPEG-{} Layer {}", frame.version.name(), frame.layer_name());
        header.sample_rate = frame.sample_rate;
        header.channels = frame.channel_mode.channels();
        header.bits_per_sample = 16;
        header.vbr = vbr;
        header.audio_range = Some(offset as u64..layout.audio_end as u64);

        let audio_bytes = (layout.audio_end - offset) as u64;
        match frames {
            Some(frames) if frames > 0 => {
                header.set_duration_from_samples(frames as u64 * frame.samples_per_frame as u64);
                let bytes = stream_bytes.map(u64::from).unwrap_or(audio_bytes);
                header.bitrate = match header.duration_secs() {
                    Some(secs) if secs > 0.0 => (bytes as f64 * 8.0 / secs / 1000.0).round() as u32,
                    _ => frame.bitrate_kbps,
                };
            }
            _ => {
                // no frame count, assume every frame has the first frame's bitrate
                header.bitrate = frame.bitrate_kbps;
                header.set_duration_secs(audio_bytes as f64 * 8.0 / (frame.bitrate_kbps as f64 * 1000.0));
            }
        }

        tracing::debug!(
            offset,
            sample_rate = header.sample_rate,
            bitrate = header.bitrate,
            vbr = header.vbr,
            "MPEG stream"
        );
        Ok(header)
    }

    fn read_tag(&self, data: &[u8]) -> R<Tag> {
        let layout = self.layout(data)?;
        let mut tag = if layout.audio_start > 0 {
            match id3::read_tag(data) {
                Ok(tag) => tag,
                Err(e) => {
                    tracing::warn!("Ignoring unreadable ID3v2 tag: {}", e);
                    Tag::new()
                }
            }
        } else {
            Tag::new()
        };
        if layout.audio_end < data.len() {
            if let Some(v1) = id3::read_id3v1(data) {
                tag.fill_missing(&v1);
            }
        }
        Ok(tag)
    }

    fn write_tag(&self, data: &[u8], tag: &Tag, config: &WriteConfig) -> R<Vec<u8>> {
        let layout = self.layout(data)?;
        let preserved = if layout.audio_start > 0 {
            match id3::read_id3v2(data) {
                Ok(old) => id3::unmapped_frames(&old),
                Err(e) => {
                    tracing::warn!("Dropping unreadable ID3v2 tag: {}", e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let mut out = id3::render_id3v23(tag, &preserved, config.padding)?;
        out.extend_from_slice(&data[layout.audio_start..layout.audio_end]);
        if layout.audio_end < data.len() {
            out.extend(id3::render_id3v1(tag));
        }
        Ok(out)
    }

    fn delete_tag(&self, data: &[u8], _config: &WriteConfig) -> R<Vec<u8>> {
        let layout = self.layout(data)?;
        Ok(data[layout.audio_start..layout.audio_end].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// MPEG-1 Layer III, 128 kbps, 44.1 kHz, stereo: 417 byte frames.
    const FRAME_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];

    fn frames(count: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for i in 0..count {
            let mut frame = vec![(i % 200) as u8 + 1; 417];
            frame[..4].copy_from_slice(&FRAME_HEADER);
            out.extend(frame);
        }
        out
    }

    fn with_xing(mut audio: Vec<u8>, id: &[u8; 4], frame_count: u32) -> Vec<u8> {
        audio[36..40].copy_from_slice(id);
        audio[40..44].copy_from_slice(&3u32.to_be_bytes());
        audio[44..48].copy_from_slice(&frame_count.to_be_bytes());
        let len = audio.len() as u32;
        audio[48..52].copy_from_slice(&len.to_be_bytes());
        audio
    }

    fn tag_with_title(title: &str) -> Tag {
        let mut tag = Tag::new();
        tag.add(FieldKey::Title, title);
        tag
    }

    #[test]
    fn parses_frame_header_fields() {
        let header = FrameHeader::parse(FRAME_HEADER).unwrap();
        assert_eq!(header.version, MpegVersion::Mpeg1);
        assert_eq!(header.layer, 3);
        assert_eq!(header.bitrate_kbps, 128);
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.frame_len, 417);
        assert_eq!(header.samples_per_frame, 1152);

        // MPEG-2 Layer III, 64 kbps, 22.05 kHz, mono
        let header = FrameHeader::parse([0xFF, 0xF3, 0x80, 0xC0]).unwrap();
        assert_eq!(header.version, MpegVersion::Mpeg2);
        assert_eq!(header.bitrate_kbps, 64);
        assert_eq!(header.sample_rate, 22050);
        assert_eq!(header.channel_mode, ChannelMode::Mono);
        assert_eq!(header.samples_per_frame, 576);
        assert_eq!(header.frame_len, 208);

        assert!(FrameHeader::parse([0xFF, 0xFB, 0xF0, 0x00]).is_none());
        assert!(FrameHeader::parse([0xFF, 0xFB, 0x9C, 0x00]).is_none());
        assert!(FrameHeader::parse([0xFE, 0xFB, 0x90, 0x00]).is_none());
    }

    #[test]
    fn cbr_stream_after_id3() {
        let mut data = id3::render_id3v23(&tag_with_title("x"), &[], 16).unwrap();
        let tag_end = data.len();
        data.extend(frames(10));

        let header = Mp3Codec.read_header(&data).unwrap();
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.channels, 2);
        assert_eq!(header.bitrate, 128);
        assert!(!header.vbr);
        assert_eq!(header.audio_range, Some(tag_end as u64..data.len() as u64));
        let secs = header.duration_secs().unwrap();
        assert!((secs - 4170.0 * 8.0 / 128_000.0).abs() < 1e-6);
        let FormatDetails::Mp3(details) = &header.details else {
            panic!("wrong details");
        };
        assert_eq!(details.first_frame_offset, tag_end as u64);
        assert_eq!(details.frames, None);
    }

    #[test]
    fn unreadable_id3v2_falls_back_to_id3v1() {
        let mut body = vec![0xFF, 0xFF, 0xFF, 0xFF];
        body.extend_from_slice(b"TIT2");
        body.extend_from_slice(&5u32.to_be_bytes());
        body.extend_from_slice(&[0, 0, 0]);
        body.extend_from_slice(b"Lost");
        let mut data = b"ID3\x03\x00\x40".to_vec();
        data.extend_from_slice(&[0, 0, 0, body.len() as u8]);
        data.extend(body);
        data.extend(frames(4));
        data.extend(id3::render_id3v1(&tag_with_title("Fallback")));

        assert_eq!(Mp3Codec.read_header(&data).unwrap().sample_rate, 44100);
        let tag = Mp3Codec.read_tag(&data).unwrap();
        assert_eq!(tag.first_text(FieldKey::Title), Some("Fallback"));
    }

    #[test]
    fn xing_frame_count_gives_duration() {
        let data = with_xing(frames(20), b"Xing", 100);
        let header = Mp3Codec.read_header(&data).unwrap();
        assert!(header.vbr);
        assert_eq!(header.total_samples, Some(115_200));
        assert!((header.duration_secs().unwrap() - 115_200.0 / 44100.0).abs() < 1e-6);

        let info = with_xing(frames(20), b"Info", 100);
        assert!(!Mp3Codec.read_header(&info).unwrap().vbr);
    }

    #[test]
    fn truncated_xing_frame_is_invalid_frame() {
        let mut data = frames(1);
        data[36..40].copy_from_slice(b"Xing");
        data[40..44].copy_from_slice(&0x0Fu32.to_be_bytes());
        data.truncate(80);
        let err = Mp3Codec.read_header(&data).unwrap_err();
        assert!(matches!(err, Error::InvalidFrame { .. }));
    }

    #[test]
    fn no_sync_is_cannot_read() {
        let err = Mp3Codec.read_header(&[0u8; 2000]).unwrap_err();
        assert!(err.is_cannot_read());
        let mut oversized = b"ID3\x03\0\0\0\0\x7F\x7F".to_vec();
        oversized.extend(frames(2));
        assert!(Mp3Codec.read_header(&oversized).unwrap_err().is_cannot_read());
    }

    #[test]
    fn id3v1_fills_missing_fields() {
        let mut data = id3::render_id3v23(&tag_with_title("long v2 title"), &[], 0).unwrap();
        data.extend(frames(3));
        let mut v1 = Tag::new();
        v1.add(FieldKey::Title, "v1 title");
        v1.add(FieldKey::Album, "v1 album");
        data.extend(id3::render_id3v1(&v1));

        let tag = Mp3Codec.read_tag(&data).unwrap();
        assert_eq!(tag.first_text(FieldKey::Title), Some("long v2 title"));
        assert_eq!(tag.first_text(FieldKey::Album), Some("v1 album"));
    }

    #[test]
    fn write_keeps_audio_and_unmapped_frames() {
        let preserved = vec![id3::Frame {
            id: "PRIV".to_string(),
            data: b"owner\0secret".to_vec(),
        }];
        let mut data = id3::render_id3v23(&tag_with_title("old"), &preserved, 0).unwrap();
        let audio = frames(5);
        data.extend(&audio);
        data.extend(id3::render_id3v1(&tag_with_title("old")));

        let mut tag = tag_with_title("new");
        tag.add(FieldKey::Artist, "Someone");
        let written = Mp3Codec.write_tag(&data, &tag, &WriteConfig::default()).unwrap();

        assert_eq!(Mp3Codec.read_tag(&written).unwrap(), tag);
        let reread = id3::read_id3v2(&written).unwrap();
        assert!(reread.frames.iter().any(|f| f.id == "PRIV" && f.data == preserved[0].data));
        let start = id3::tag_len(&written).unwrap();
        assert_eq!(&written[start..start + audio.len()], audio.as_slice());
        assert_eq!(id3::read_id3v1(&written).unwrap().first_text(FieldKey::Title), Some("new"));
    }

    #[test]
    fn delete_strips_both_tags() {
        let mut data = id3::render_id3v23(&tag_with_title("t"), &[], 32).unwrap();
        let audio = frames(4);
        data.extend(&audio);
        data.extend(id3::render_id3v1(&tag_with_title("t")));

        let stripped = Mp3Codec.delete_tag(&data, &WriteConfig::default()).unwrap();
        assert_eq!(stripped, audio);
        assert!(Mp3Codec.read_tag(&stripped).unwrap().is_empty());
    }

    #[test]
    fn chunks_outline() {
        let mut data = id3::render_id3v23(&tag_with_title("t"), &[], 0).unwrap();
        data.extend(with_xing(frames(3), b"Xing", 3));
        let chunks = Mp3Codec.chunks(&data).unwrap();
        assert!(chunks[0].is(ID3_CHUNK_ID));
        assert!(chunks[1].is(FRAME_CHUNK_ID));
        assert!(chunks[1].child(b"Xing").is_some());
    }
}
