//! Ogg Vorbis and Ogg Opus: identification header, comment packet and
//! comment rewriting with page renumbering.

mod page;

use crate::codecs::vorbis::VorbisComments;
use crate::header::OggDetails;
use crate::prelude::*;

use page::{FLAG_FIRST, NO_GRANULE, Page};

const VORBIS_MAGIC: &[u8; 6] = b"vorbis";
const VORBIS_IDENTIFICATION: u8 = 0x01;
const VORBIS_COMMENT_PREFIX: &[u8; 7] = b"\x03vorbis";
const OPUS_HEAD: &[u8; 8] = b"OpusHead";
const OPUS_TAGS: &[u8; 8] = b"OpusTags";

/// Opus always decodes at 48 kHz whatever the input rate was.
const OPUS_RATE: u32 = 48000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamCodec {
    Vorbis,
    Opus,
}

impl StreamCodec {
    fn detect(packet: &[u8]) -> Option<Self> {
        if packet.first() == Some(&VORBIS_IDENTIFICATION) && packet.get(1..7) == Some(&VORBIS_MAGIC[..]) {
            Some(StreamCodec::Vorbis)
        } else if packet.starts_with(OPUS_HEAD) {
            Some(StreamCodec::Opus)
        } else {
            None
        }
    }

    fn name(self) -> &'static str {
        match self {
            StreamCodec::Vorbis => "Vorbis",
            StreamCodec::Opus => "Opus",
        }
    }

    /// Identification, comment and (Vorbis only) setup.
    fn header_packets(self) -> usize {
        match self {
            StreamCodec::Vorbis => 3,
            StreamCodec::Opus => 2,
        }
    }

    fn comment_prefix(self) -> &'static [u8] {
        match self {
            StreamCodec::Vorbis => VORBIS_COMMENT_PREFIX,
            StreamCodec::Opus => OPUS_TAGS,
        }
    }
}

/// Header packets of the first logical stream, reassembled across pages.
struct Headers<'a> {
    codec: StreamCodec,
    serial: u32,
    packets: Vec<Vec<u8>>,
    /// Index of the page on which the last header packet ends
    last_page: usize,
    /// The last header packet ends exactly where its page ends
    ends_on_boundary: bool,
    pages: Vec<Page<'a>>,
}

impl Headers<'_> {
    /// Comment payload without its packet prefix or framing bit.
    fn comment_body(&self) -> R<&[u8]> {
        let packet = &self.packets[1];
        let prefix = self.codec.comment_prefix();
        if !packet.starts_with(prefix) {
            return Err(Error::cannot_read(format!("{} comment header is missing", self.codec.name())));
        }
        Ok(&packet[prefix.len()..])
    }

    fn comments(&self) -> R<VorbisComments> {
        let body = self.comment_body()?;
        VorbisComments::parse(body, 0)
    }
}

fn read_headers(data: &[u8]) -> R<Headers<'_>> {
    let pages = page::read_pages(data)?;
    let Some(first) = pages.first() else {
        return Err(Error::cannot_read("no Ogg pages"));
    };
    let serial = first.serial;
    if first.flags & FLAG_FIRST == 0 {
        tracing::debug!(serial, "first page lacks the beginning-of-stream flag");
    }

    let mut codec = None;
    let mut packets: Vec<Vec<u8>> = Vec::new();
    let mut current = Vec::new();
    // (codec, page index, ends on boundary)
    let mut found = None;

    'pages: for (index, page) in pages.iter().enumerate().filter(|(_, p)| p.serial == serial) {
        let pieces = page.segments();
        let piece_count = pieces.len();
        for (piece, (range, complete)) in pieces.into_iter().enumerate() {
            current.extend_from_slice(&page.body[range]);
            if !complete {
                continue;
            }
            packets.push(std::mem::take(&mut current));

            let kind = match codec {
                Some(kind) => kind,
                None => {
                    let kind = StreamCodec::detect(&packets[0])
                        .ok_or_else(|| Error::cannot_read("unsupported Ogg stream codec").at_offset(page.offset as u64))?;
                    codec = Some(kind);
                    kind
                }
            };
            if packets.len() == kind.header_packets() {
                found = Some((kind, index, piece + 1 == piece_count));
                break 'pages;
            }
        }
    }

    if let Some((codec, last_page, ends_on_boundary)) = found {
        tracing::debug!(codec = codec.name(), serial, last_page, "Ogg header packets");
        return Ok(Headers {
            codec,
            serial,
            packets,
            last_page,
            ends_on_boundary,
            pages,
        });
    }
    Err(Error::cannot_read("Ogg stream ends before its header packets"))
}

struct Identification {
    channels: u16,
    sample_rate: u32,
    bitrate_maximum: Option<i32>,
    bitrate_nominal: Option<i32>,
    bitrate_minimum: Option<i32>,
    pre_skip: Option<u16>,
}

fn positive(value: i32) -> Option<i32> {
    (value > 0).then_some(value)
}

fn parse_identification(codec: StreamCodec, packet: &[u8], base: u64) -> R<Identification> {
    let mut view = ByteView::at(packet, base);
    let id = match codec {
        StreamCodec::Vorbis => {
            view.skip(1 + VORBIS_MAGIC.len())?;
            let version = view.u32_le()?;
            if version != 0 {
                return Err(Error::cannot_read(format!("unsupported Vorbis version {}", version)));
            }
            let channels = view.u8()? as u16;
            let sample_rate = view.u32_le()?;
            Identification {
                channels,
                sample_rate,
                bitrate_maximum: positive(view.i32_le()?),
                bitrate_nominal: positive(view.i32_le()?),
                bitrate_minimum: positive(view.i32_le()?),
                pre_skip: None,
            }
        }
        StreamCodec::Opus => {
            view.skip(OPUS_HEAD.len())?;
            let _version = view.u8()?;
            let channels = view.u8()? as u16;
            let pre_skip = view.u16_le()?;
            let input_rate = view.u32_le()?;
            tracing::trace!(input_rate, "OpusHead");
            Identification {
                channels,
                sample_rate: OPUS_RATE,
                bitrate_maximum: None,
                bitrate_nominal: None,
                bitrate_minimum: None,
                pre_skip: Some(pre_skip),
            }
        }
    };
    if id.channels == 0 || id.sample_rate == 0 {
        return Err(Error::cannot_read(format!(
            "{} header has {} channels at {} Hz",
            codec.name(),
            id.channels,
            id.sample_rate
        )));
    }
    Ok(id)
}

pub struct OggCodec;

impl Codec for OggCodec {
    fn format(&self) -> AudioFormat {
        AudioFormat::Ogg
    }

    fn validate_file_format(&self, data: &[u8]) -> R<()> {
        if !data.starts_with(page::CAPTURE_PATTERN) {
            return Err(Error::cannot_read("Not a valid Ogg file: Missing OggS capture pattern"));
        }
        Ok(())
    }

    fn chunks<'a>(&self, data: &'a [u8]) -> R<Vec<Chunk<'a>>> {
        self.validate_file_format(data)?;
        let pages = page::read_pages(data)?;
        Ok(pages.iter().map(|page| page.to_chunk(data)).collect())
    }

    fn read_header(&self, data: &[u8]) -> R<GenericAudioHeader> {
        self.validate_file_format(data)?;
        let headers = read_headers(data)?;
        let id = parse_identification(headers.codec, &headers.packets[0], headers.pages[0].offset as u64)?;
        let vendor = match headers.comments() {
            Ok(comments) => comments.vendor,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable comment header");
                String::new()
            }
        };

        let mut header = GenericAudioHeader::new(
            AudioFormat::Ogg,
            FormatDetails::Ogg(OggDetails {
                codec: headers.codec.name().to_string(),
                serial: headers.serial,
                vendor,
                bitrate_maximum: id.bitrate_maximum,
                bitrate_nominal: id.bitrate_nominal,
                bitrate_minimum: id.bitrate_minimum,
                pre_skip: id.pre_skip,
            }),
        );
        header.encoding = headers.codec.name().to_string();
        header.sample_rate = id.sample_rate;
        header.channels = id.channels;
        header.bits_per_sample = 16;
        header.vbr = id.bitrate_nominal.is_none() || id.bitrate_minimum != id.bitrate_maximum;

        let audio_start = headers.pages[headers.last_page].range().end;
        header.audio_range = Some(audio_start as u64..data.len() as u64);

        let last_granule = headers
            .pages
            .iter()
            .rev()
            .find(|p| p.serial == headers.serial && p.granule != NO_GRANULE)
            .map(|p| p.granule);
        if let Some(granule) = last_granule {
            let samples = granule.saturating_sub(id.pre_skip.unwrap_or(0) as u64);
            header.set_duration_from_samples(samples);
        }

        header.bitrate = match id.bitrate_nominal {
            Some(nominal) => (nominal as f64 / 1000.0).round() as u32,
            None => header.average_bitrate().unwrap_or(0),
        };
        Ok(header)
    }

    fn read_tag(&self, data: &[u8]) -> R<Tag> {
        self.validate_file_format(data)?;
        let headers = read_headers(data)?;
        match headers.comments() {
            Ok(comments) => Ok(comments.to_tag()),
            Err(e) => {
                tracing::warn!(error = %e, "skipping corrupt comment header");
                Ok(Tag::new())
            }
        }
    }

    fn write_tag(&self, data: &[u8], tag: &Tag, config: &WriteConfig) -> R<Vec<u8>> {
        self.validate_file_format(data)?;
        let headers = read_headers(data)?;
        if !headers.ends_on_boundary {
            return Err(Error::cannot_write("Ogg header packets share a page with audio data"));
        }
        let first = &headers.pages[0];
        if first.segments().len() != 1 {
            return Err(Error::cannot_write("first Ogg page carries more than the identification header"));
        }

        let existing = headers
            .comments()
            .unwrap_or_else(|_| VorbisComments::new(&config.vendor));
        let mut comment = headers.codec.comment_prefix().to_vec();
        comment.extend(existing.with_tag(tag).to_bytes());
        if headers.codec == StreamCodec::Vorbis {
            comment.push(0x01);
        }

        let mut packets = vec![comment];
        packets.extend(headers.packets[2..].iter().cloned());
        let new_pages = page::paginate(&packets, headers.serial, first.sequence + 1);

        let replaced = headers.pages[1..=headers.last_page]
            .iter()
            .filter(|p| p.serial == headers.serial)
            .count();
        let delta = new_pages.len() as i64 - replaced as i64;
        tracing::debug!(replaced, written = new_pages.len(), "rewriting Ogg comment pages");

        let mut output = Vec::with_capacity(data.len() + new_pages.iter().map(Vec::len).sum::<usize>());
        output.extend_from_slice(&data[first.range()]);
        for page in new_pages {
            output.extend(page);
        }
        for (index, page) in headers.pages.iter().enumerate().skip(1) {
            let bytes = &data[page.range()];
            if page.serial != headers.serial {
                output.extend_from_slice(bytes);
            } else if index > headers.last_page {
                if delta == 0 {
                    output.extend_from_slice(bytes);
                } else {
                    let sequence = u32::try_from(page.sequence as i64 + delta)
                        .map_err(|_| Error::cannot_write("Ogg page sequence overflow"))?;
                    output.extend(page::renumber(bytes, sequence));
                }
            }
        }
        if let Some(last) = headers.pages.last() {
            output.extend_from_slice(&data[last.range().end..]);
        }
        Ok(output)
    }
}
