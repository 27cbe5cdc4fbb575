//! ASF (WMA) container: GUID-keyed header objects, stream properties and the
//! three metadata object kinds.

mod descriptor;

use uuid::Uuid;

use crate::codecs::{id3, trim_text};
use crate::header::AsfDetails;
use crate::prelude::*;

use descriptor::{CONTENT_FIELDS, Descriptor, DescriptorValue};

/// Header Object GUID as it is laid out on disk.
pub const HEADER_OBJECT_GUID: [u8; 16] = [
    0x30, 0x26, 0xB2, 0x75, 0x8E, 0x66, 0xCF, 0x11, 0xA6, 0xD9, 0x00, 0xAA, 0x00, 0x62, 0xCE, 0x6C,
];

const HEADER: Uuid = Uuid::from_u128(0x75B22630_668E_11CF_A6D9_00AA0062CE6C);
const DATA: Uuid = Uuid::from_u128(0x75B22636_668E_11CF_A6D9_00AA0062CE6C);
const FILE_PROPERTIES: Uuid = Uuid::from_u128(0x8CABDCA1_A947_11CF_8EE4_00C00C205365);
const STREAM_PROPERTIES: Uuid = Uuid::from_u128(0xB7DC0791_A9B7_11CF_8EE6_00C00C205365);
const HEADER_EXTENSION: Uuid = Uuid::from_u128(0x5FBF03B5_A92E_11CF_8EE3_00C00C205365);
const CONTENT_DESCRIPTION: Uuid = Uuid::from_u128(0x75B22633_668E_11CF_A6D9_00AA0062CE6C);
const EXTENDED_CONTENT_DESCRIPTION: Uuid = Uuid::from_u128(0xD2D0A440_E307_11D2_97F0_00A0C95EA850);
const METADATA: Uuid = Uuid::from_u128(0xC5F8CBEA_5BAF_4877_8467_AA8C44FA4CCA);
const METADATA_LIBRARY: Uuid = Uuid::from_u128(0x44231C94_9498_49D1_A141_1D134E457054);
const AUDIO_MEDIA: Uuid = Uuid::from_u128(0xF8699E40_5B4D_11CF_A8FD_00805F5C442B);
const EXTENSION_RESERVED: Uuid = Uuid::from_u128(0xABD3D211_A9BA_11CF_8EE6_00C00C205365);

const OBJECT_HEADER_LEN: usize = 24;
/// Object header, object count and two reserved bytes.
const HEADER_OBJECT_LEN: usize = 30;
/// Object header, reserved GUID, reserved word and data size.
const HEADER_EXTENSION_LEN: usize = 46;
/// Object header, file id, packet count and reserved word.
const DATA_OBJECT_LEN: usize = 50;
/// File size field inside the File Properties payload.
const FILE_SIZE_OFFSET: usize = 16;

const WMA_LOSSLESS: u16 = 0x0163;
const PCM: u16 = 0x0001;

/// Generic field for each Content Description string; the fifth (rating) has none.
const CONTENT_KEYS: [FieldKey; 4] = [FieldKey::Title, FieldKey::Artist, FieldKey::Copyright, FieldKey::Comment];

const DESCRIPTOR_NAMES: [(&str, FieldKey); 17] = [
    ("WM/AlbumTitle", FieldKey::Album),
    ("WM/AlbumArtist", FieldKey::AlbumArtist),
    ("WM/TrackNumber", FieldKey::Track),
    ("WM/PartOfSet", FieldKey::Disc),
    ("WM/Year", FieldKey::Year),
    ("WM/Genre", FieldKey::Genre),
    ("WM/Composer", FieldKey::Composer),
    ("WM/EncodedBy", FieldKey::Encoder),
    ("WM/Lyrics", FieldKey::Lyrics),
    ("WM/ContentGroupDescription", FieldKey::Grouping),
    ("WM/BeatsPerMinute", FieldKey::Bpm),
    ("WM/ISRC", FieldKey::Isrc),
    ("WM/Picture", FieldKey::CoverArt),
    // values that do not fit the Content Description object
    ("Title", FieldKey::Title),
    ("Author", FieldKey::Artist),
    ("Copyright", FieldKey::Copyright),
    ("Description", FieldKey::Comment),
];

const GENRE_ID: &str = "WM/GenreID";
/// Zero-based track number written by old encoders.
const ZERO_BASED_TRACK: &str = "WM/Track";
const IS_VBR: &str = "IsVBR";

fn object_name(guid: Uuid) -> String {
    let name = match guid {
        g if g == HEADER => "Header",
        g if g == DATA => "Data",
        g if g == FILE_PROPERTIES => "File Properties",
        g if g == STREAM_PROPERTIES => "Stream Properties",
        g if g == HEADER_EXTENSION => "Header Extension",
        g if g == CONTENT_DESCRIPTION => "Content Description",
        g if g == EXTENDED_CONTENT_DESCRIPTION => "Extended Content Description",
        g if g == METADATA => "Metadata",
        g if g == METADATA_LIBRARY => "Metadata Library",
        _ => return ChunkId::Guid(guid).to_string(),
    };
    name.to_string()
}

fn descriptor_key(name: &str) -> Option<FieldKey> {
    DESCRIPTOR_NAMES
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, key)| *key)
}

fn descriptor_name(key: FieldKey) -> Option<&'static str> {
    DESCRIPTOR_NAMES.iter().find(|(_, k)| *k == key).map(|(n, _)| *n)
}

fn is_mapped(name: &str) -> bool {
    descriptor_key(name).is_some() || name.eq_ignore_ascii_case(GENRE_ID) || name.eq_ignore_ascii_case(ZERO_BASED_TRACK)
}

fn codec_name(codec_id: u16) -> String {
    let name = match codec_id {
        PCM => "PCM",
        0x000A => "WMA Voice",
        0x0055 => "MP3",
        0x0160 => "WMA Version 1",
        0x0161 => "WMA Version 2",
        0x0162 => "WMA Pro",
        WMA_LOSSLESS => "WMA Lossless",
        other => return format!("Unknown (0x{:04X})", other),
    };
    name.to_string()
}

/// "(17)" or "17" to the ID3v1 genre name.
fn genre_from_id(text: &str) -> Option<&'static str> {
    let digits = text.trim().trim_start_matches('(').trim_end_matches(')');
    digits.parse::<u8>().ok().and_then(id3::genre_name)
}

/// Objects between `start` and `end`. The Header and Header Extension objects
/// get their nested objects as children.
fn scan_objects(data: &[u8], start: usize, end: usize) -> R<Vec<Chunk<'_>>> {
    let mut objects = Vec::new();
    let mut pos = start;
    while end - pos >= OBJECT_HEADER_LEN {
        let mut view = ByteView::at(&data[pos..end], pos as u64);
        let guid = Uuid::from_bytes_le(view.array::<16>()?);
        let size = view.u64_le()?;
        let header_len = match guid {
            g if g == HEADER => HEADER_OBJECT_LEN,
            g if g == HEADER_EXTENSION => HEADER_EXTENSION_LEN,
            _ => OBJECT_HEADER_LEN,
        };
        if size < header_len as u64 || size > (end - pos) as u64 {
            return Err(Error::chunk("object size exceeds its parent", object_name(guid), pos as u64, size));
        }
        let object_end = pos + size as usize;
        let payload_offset = pos + header_len;
        let children = if guid == HEADER || guid == HEADER_EXTENSION {
            scan_objects(data, payload_offset, object_end)?
        } else {
            Vec::new()
        };
        tracing::trace!(object = %object_name(guid), offset = pos, size, "ASF object");
        objects.push(Chunk {
            id: ChunkId::Guid(guid),
            declared_size: size,
            range: pos..object_end,
            payload_offset,
            payload: &data[payload_offset..object_end],
            children,
        });
        pos = object_end;
    }
    if pos < end {
        tracing::warn!(offset = pos, trailing = end - pos, "Ignoring bytes too short for an ASF object");
    }
    Ok(objects)
}

fn is_object(chunk: &Chunk<'_>, guid: Uuid) -> bool {
    chunk.id == ChunkId::Guid(guid)
}

fn child_object<'c, 'a>(parent: &'c Chunk<'a>, guid: Uuid) -> Option<&'c Chunk<'a>> {
    parent.children.iter().find(|c| is_object(c, guid))
}

fn render_object(guid: Uuid, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(OBJECT_HEADER_LEN + body.len());
    out.extend_from_slice(&guid.to_bytes_le());
    out.extend_from_slice(&((OBJECT_HEADER_LEN + body.len()) as u64).to_le_bytes());
    out.extend_from_slice(body);
    out
}

struct FileProperties {
    file_size: u64,
    play_duration: u64,
    preroll_ms: u64,
    max_bitrate: u32,
}

fn parse_file_properties(object: &Chunk<'_>) -> R<FileProperties> {
    let mut view = ByteView::at(object.payload, object.payload_offset as u64);
    view.skip(16)?;
    let file_size = view.u64_le()?;
    view.skip(16)?; // creation date, data packets
    let play_duration = view.u64_le()?;
    view.skip(8)?; // send duration
    let preroll_ms = view.u64_le()?;
    view.skip(12)?; // flags, min and max packet size
    let max_bitrate = view.u32_le()?;
    Ok(FileProperties {
        file_size,
        play_duration,
        preroll_ms,
        max_bitrate,
    })
}

/// WAVEFORMATEX fields of an audio stream.
struct AudioStream {
    codec_id: u16,
    channels: u16,
    sample_rate: u32,
    avg_bytes_per_sec: u32,
    bits_per_sample: u16,
}

fn parse_audio_stream(object: &Chunk<'_>) -> R<Option<AudioStream>> {
    let mut view = ByteView::at(object.payload, object.payload_offset as u64);
    let stream_type = Uuid::from_bytes_le(view.array::<16>()?);
    if stream_type != AUDIO_MEDIA {
        return Ok(None);
    }
    view.skip(16 + 8)?; // error correction type, time offset
    let type_len = view.u32_le()? as usize;
    view.skip(4 + 2 + 4)?; // error correction length, flags, reserved
    let mut format = view.sub(type_len)?;
    let codec_id = format.u16_le()?;
    let channels = format.u16_le()?;
    let sample_rate = format.u32_le()?;
    let avg_bytes_per_sec = format.u32_le()?;
    format.skip(2)?; // block align
    let bits_per_sample = format.u16_le()?;
    Ok(Some(AudioStream {
        codec_id,
        channels,
        sample_rate,
        avg_bytes_per_sec,
        bits_per_sample,
    }))
}

/// Every metadata record in the header. Corrupt objects are skipped.
#[derive(Default)]
struct Metadata {
    content: Option<[String; CONTENT_FIELDS]>,
    extended: Vec<Descriptor>,
    /// Metadata and Metadata Library records
    library: Vec<Descriptor>,
}

fn read_metadata(header: &Chunk<'_>) -> Metadata {
    let mut meta = Metadata::default();
    for object in &header.children {
        if is_object(object, CONTENT_DESCRIPTION) {
            match descriptor::parse_content_description(object.payload, object.payload_offset as u64) {
                Ok(fields) => meta.content = Some(fields),
                Err(e) => tracing::warn!(error = %e, "skipping corrupt Content Description"),
            }
        } else if is_object(object, EXTENDED_CONTENT_DESCRIPTION) {
            match descriptor::parse_extended(object.payload, object.payload_offset) {
                Ok(records) => meta.extended.extend(records),
                Err(e) => tracing::warn!(error = %e, "skipping corrupt Extended Content Description"),
            }
        } else if is_object(object, HEADER_EXTENSION) {
            for nested in &object.children {
                if is_object(nested, METADATA_LIBRARY) || is_object(nested, METADATA) {
                    match descriptor::parse_metadata_library(nested.payload, nested.payload_offset) {
                        Ok(records) => meta.library.extend(records),
                        Err(e) => tracing::warn!(error = %e, object = %nested.id, "skipping corrupt metadata object"),
                    }
                }
            }
        }
    }
    meta
}

impl Metadata {
    fn records(&self) -> impl Iterator<Item = &Descriptor> {
        self.extended.iter().chain(self.library.iter())
    }

    fn find(&self, name: &str) -> Option<&Descriptor> {
        self.records().find(|d| d.name.eq_ignore_ascii_case(name))
    }
}

/// Descriptors for every field of `tag` that does not go into the Content
/// Description strings.
fn tag_descriptors(tag: &Tag, content: &mut [String; CONTENT_FIELDS]) -> Vec<Descriptor> {
    let mut records = Vec::new();
    for key in tag.keys() {
        let Some(name) = descriptor_name(key) else {
            continue;
        };
        if key == FieldKey::CoverArt {
            for art in tag.artworks() {
                records.push(Descriptor::new(name, DescriptorValue::Binary(descriptor::render_picture(art))));
            }
            continue;
        }

        let mut texts = tag.texts(key).into_iter();
        if let Some(index) = CONTENT_KEYS.iter().position(|k| *k == key) {
            if let Some(first) = texts.next() {
                if descriptor::utf16z(first).len() <= u16::MAX as usize {
                    content[index] = first.to_string();
                } else {
                    records.push(Descriptor::new(name, DescriptorValue::Text(first.to_string())));
                }
            }
        }
        for text in texts {
            records.push(Descriptor::new(name, DescriptorValue::Text(text.to_string())));
        }

        if key == FieldKey::Genre {
            if let Some(index) = tag.first_text(key).and_then(id3::genre_index) {
                records.push(Descriptor::new(GENRE_ID, DescriptorValue::Text(format!("({})", index))));
            }
        }
    }
    records
}

pub struct AsfCodec;

impl AsfCodec {
    fn objects<'a>(&self, data: &'a [u8]) -> R<Vec<Chunk<'a>>> {
        self.validate_file_format(data)?;
        scan_objects(data, 0, data.len())
    }

    /// The Header Object, which always comes first.
    fn header<'c, 'a>(&self, objects: &'c [Chunk<'a>]) -> R<&'c Chunk<'a>> {
        objects
            .first()
            .filter(|o| is_object(o, HEADER))
            .ok_or_else(|| Error::cannot_read("ASF file does not start with a Header Object"))
    }

    /// Header Extension body: kept objects, then a rebuilt Metadata Library.
    fn render_header_extension(&self, data: &[u8], old: Option<&Chunk<'_>>, library: &[Vec<u8>]) -> Option<Vec<u8>> {
        let mut body = Vec::new();
        if let Some(old) = old {
            for nested in old.children.iter().filter(|n| !is_object(n, METADATA_LIBRARY) && !is_object(n, METADATA)) {
                body.extend_from_slice(&data[nested.range.clone()]);
            }
        }
        if !library.is_empty() {
            let mut records = (library.len() as u16).to_le_bytes().to_vec();
            for record in library {
                records.extend_from_slice(record);
            }
            body.extend(render_object(METADATA_LIBRARY, &records));
        }
        if old.is_none() && body.is_empty() {
            return None;
        }

        let mut ext = Vec::with_capacity(HEADER_EXTENSION_LEN - OBJECT_HEADER_LEN + body.len());
        match old {
            Some(old) => ext.extend_from_slice(&data[old.range.start + OBJECT_HEADER_LEN..old.range.start + 42]),
            None => {
                ext.extend_from_slice(&EXTENSION_RESERVED.to_bytes_le());
                ext.extend_from_slice(&6u16.to_le_bytes());
            }
        }
        ext.extend_from_slice(&(body.len() as u32).to_le_bytes());
        ext.extend(body);
        Some(render_object(HEADER_EXTENSION, &ext))
    }
}

impl Codec for AsfCodec {
    fn format(&self) -> AudioFormat {
        AudioFormat::Asf
    }

    fn validate_file_format(&self, data: &[u8]) -> R<()> {
        if data.len() < HEADER_OBJECT_LEN {
            return Err(Error::cannot_read("File too small to be a valid ASF file"));
        }
        if data[0..16] != HEADER_OBJECT_GUID {
            return Err(Error::cannot_read("Not a valid ASF file: Missing Header Object"));
        }
        Ok(())
    }

    fn chunks<'a>(&self, data: &'a [u8]) -> R<Vec<Chunk<'a>>> {
        self.objects(data)
    }

    fn read_header(&self, data: &[u8]) -> R<GenericAudioHeader> {
        let objects = self.objects(data)?;
        let header_object = self.header(&objects)?;

        let file = child_object(header_object, FILE_PROPERTIES)
            .ok_or_else(|| Error::cannot_read("missing File Properties object"))
            .and_then(parse_file_properties)?;
        let mut stream = None;
        for object in header_object.children.iter().filter(|o| is_object(o, STREAM_PROPERTIES)) {
            if let Some(audio) = parse_audio_stream(object)? {
                stream = Some(audio);
                break;
            }
        }
        let stream = stream.ok_or_else(|| Error::cannot_read("no audio Stream Properties object"))?;

        let mut header = GenericAudioHeader::new(
            AudioFormat::Asf,
            FormatDetails::Asf(AsfDetails {
                codec_id: stream.codec_id,
                preroll_ms: file.preroll_ms,
                file_size: file.file_size,
            }),
        );
        header.encoding = codec_name(stream.codec_id);
        header.sample_rate = stream.sample_rate;
        header.channels = stream.channels;
        header.bits_per_sample = stream.bits_per_sample;
        header.lossless = matches!(stream.codec_id, WMA_LOSSLESS | PCM);
        header.set_duration_secs((file.play_duration as f64 / 1e7 - file.preroll_ms as f64 / 1000.0).max(0.0));

        if let Some(data_object) = objects.iter().find(|o| is_object(o, DATA)) {
            let start = (data_object.range.start + DATA_OBJECT_LEN).min(data_object.range.end);
            header.audio_range = Some(start as u64..data_object.range.end as u64);
        }

        let meta = read_metadata(header_object);
        header.vbr = matches!(meta.find(IS_VBR).map(|d| &d.value), Some(DescriptorValue::Bool(true)));

        header.bitrate = if stream.avg_bytes_per_sec > 0 {
            (stream.avg_bytes_per_sec as f64 * 8.0 / 1000.0).round() as u32
        } else if file.max_bitrate > 0 {
            (file.max_bitrate as f64 / 1000.0).round() as u32
        } else {
            header.average_bitrate().unwrap_or(0)
        };
        Ok(header)
    }

    fn read_tag(&self, data: &[u8]) -> R<Tag> {
        let objects = self.objects(data)?;
        let meta = read_metadata(self.header(&objects)?);

        let mut tag = Tag::new();
        if let Some(content) = &meta.content {
            for (key, text) in CONTENT_KEYS.iter().zip(content.iter()) {
                tag.add(*key, trim_text(text));
            }
        }

        for record in meta.records() {
            let Some(key) = descriptor_key(&record.name) else {
                continue;
            };
            match (&record.value, key) {
                (DescriptorValue::Binary(bytes), FieldKey::CoverArt) => match descriptor::parse_picture(bytes) {
                    Ok(mut art) => {
                        if let Some(range) = &record.range {
                            let end = range.end as u64;
                            art.range = Some(end - art.data.len() as u64..end);
                        }
                        tag.add(key, art);
                    }
                    Err(e) => tracing::warn!(error = %e, "skipping corrupt WM/Picture"),
                },
                (value, _) => match value.as_text() {
                    Some(text) => tag.add(key, trim_text(&text)),
                    None => tracing::debug!(descriptor = %record.name, "descriptor has no text form"),
                },
            }
        }

        if !tag.contains(FieldKey::Genre) {
            let genre = meta
                .find(GENRE_ID)
                .and_then(|d| d.value.as_text())
                .and_then(|text| genre_from_id(&text));
            if let Some(genre) = genre {
                tag.add(FieldKey::Genre, genre);
            }
        }
        if !tag.contains(FieldKey::Track) {
            let track = meta
                .find(ZERO_BASED_TRACK)
                .and_then(|d| d.value.as_text())
                .and_then(|text| text.trim().parse::<u32>().ok());
            match track.map(|t| t.checked_add(1)) {
                Some(Some(track)) => tag.add(FieldKey::Track, track.to_string()),
                Some(None) => tracing::warn!("Skipping out-of-range {} descriptor", ZERO_BASED_TRACK),
                None => {}
            }
        }
        Ok(tag)
    }

    fn write_tag(&self, data: &[u8], tag: &Tag, _config: &WriteConfig) -> R<Vec<u8>> {
        let objects = self.objects(data)?;
        let header_object = self.header(&objects)?;
        let meta = read_metadata(header_object);

        let mut content: [String; CONTENT_FIELDS] = Default::default();
        if let Some(old) = &meta.content {
            content[4] = old[4].clone();
        }
        let new_records = tag_descriptors(tag, &mut content);

        // Unmapped records are copied byte for byte into the object they came from
        let mut extended: Vec<Vec<u8>> = meta
            .extended
            .iter()
            .filter(|d| !is_mapped(&d.name))
            .filter_map(|d| d.record.clone().map(|r| data[r].to_vec()))
            .collect();
        let mut library: Vec<Vec<u8>> = meta
            .library
            .iter()
            .filter(|d| !is_mapped(&d.name))
            .filter_map(|d| d.record.clone().map(|r| data[r].to_vec()))
            .collect();
        for record in &new_records {
            if record.value.encoded_len() <= u16::MAX as usize {
                extended.push(descriptor::render_extended_record(record)?);
            } else {
                library.push(descriptor::render_library_record(record)?);
            }
        }
        if extended.len() > u16::MAX as usize || library.len() > u16::MAX as usize {
            return Err(Error::cannot_write("too many ASF metadata descriptors"));
        }

        let content_object = if content.iter().all(String::is_empty) {
            None
        } else {
            Some(render_object(CONTENT_DESCRIPTION, &descriptor::render_content_description(&content)?))
        };
        let extended_object = if extended.is_empty() {
            None
        } else {
            let mut body = (extended.len() as u16).to_le_bytes().to_vec();
            for record in &extended {
                body.extend_from_slice(record);
            }
            Some(render_object(EXTENDED_CONTENT_DESCRIPTION, &body))
        };
        let old_extension = child_object(header_object, HEADER_EXTENSION);
        let extension_object = self.render_header_extension(data, old_extension, &library);

        // Rebuilt objects take the place of the ones they replace; new ones go last
        let mut children: Vec<Vec<u8>> = Vec::new();
        let mut file_properties_index = None;
        let (mut content_object, mut extended_object, mut extension_object) =
            (content_object, extended_object, extension_object);
        for object in &header_object.children {
            let replacement = if is_object(object, CONTENT_DESCRIPTION) {
                content_object.take()
            } else if is_object(object, EXTENDED_CONTENT_DESCRIPTION) {
                extended_object.take()
            } else if is_object(object, HEADER_EXTENSION) {
                extension_object.take()
            } else {
                if is_object(object, FILE_PROPERTIES) {
                    file_properties_index = Some(children.len());
                }
                Some(data[object.range.clone()].to_vec())
            };
            children.extend(replacement);
        }
        children.extend(extension_object);
        children.extend(content_object);
        children.extend(extended_object);

        let body_len: usize = children.iter().map(Vec::len).sum();
        let header_len = HEADER_OBJECT_LEN + body_len;
        let mut output = Vec::with_capacity(data.len() - header_object.range.len() + header_len);
        output.extend_from_slice(&HEADER_OBJECT_GUID);
        output.write_u64::<LittleEndian>(header_len as u64)?;
        output.write_u32::<LittleEndian>(children.len() as u32)?;
        output.extend_from_slice(&data[header_object.range.start + 28..header_object.range.start + HEADER_OBJECT_LEN]);

        let mut file_size_at = None;
        for (index, child) in children.iter().enumerate() {
            if Some(index) == file_properties_index {
                file_size_at = Some(output.len() + OBJECT_HEADER_LEN + FILE_SIZE_OFFSET);
            }
            output.extend_from_slice(child);
        }
        output.extend_from_slice(&data[header_object.range.end..]);

        if let Some(at) = file_size_at {
            let total = output.len() as u64;
            LittleEndian::write_u64(&mut output[at..at + 8], total);
        }
        tracing::debug!(old = header_object.range.len(), new = header_len, "rewrote ASF header");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_properties(file_size: u64, duration_100ns: u64, preroll_ms: u64) -> Vec<u8> {
        let mut body = vec![0x11u8; 16];
        body.extend_from_slice(&file_size.to_le_bytes());
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&10u64.to_le_bytes());
        body.extend_from_slice(&duration_100ns.to_le_bytes());
        body.extend_from_slice(&duration_100ns.to_le_bytes());
        body.extend_from_slice(&preroll_ms.to_le_bytes());
        body.extend_from_slice(&2u32.to_le_bytes());
        body.extend_from_slice(&3200u32.to_le_bytes());
        body.extend_from_slice(&3200u32.to_le_bytes());
        body.extend_from_slice(&128_000u32.to_le_bytes());
        render_object(FILE_PROPERTIES, &body)
    }

    fn audio_stream(codec_id: u16) -> Vec<u8> {
        let mut format = Vec::new();
        format.extend_from_slice(&codec_id.to_le_bytes());
        format.extend_from_slice(&2u16.to_le_bytes());
        format.extend_from_slice(&44100u32.to_le_bytes());
        format.extend_from_slice(&16_000u32.to_le_bytes());
        format.extend_from_slice(&2973u16.to_le_bytes());
        format.extend_from_slice(&16u16.to_le_bytes());
        format.extend_from_slice(&0u16.to_le_bytes());

        let mut body = AUDIO_MEDIA.to_bytes_le().to_vec();
        body.extend_from_slice(&[0u8; 16]);
        body.extend_from_slice(&0u64.to_le_bytes());
        body.extend_from_slice(&(format.len() as u32).to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(&1u16.to_le_bytes());
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend(format);
        render_object(STREAM_PROPERTIES, &body)
    }

    fn content_description(fields: [&str; 5]) -> Vec<u8> {
        let fields = fields.map(str::to_string);
        render_object(CONTENT_DESCRIPTION, &descriptor::render_content_description(&fields).unwrap())
    }

    fn extended(records: &[Descriptor]) -> Vec<u8> {
        let mut body = (records.len() as u16).to_le_bytes().to_vec();
        for record in records {
            body.extend(descriptor::render_extended_record(record).unwrap());
        }
        render_object(EXTENDED_CONTENT_DESCRIPTION, &body)
    }

    fn asf(children: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = children.concat();
        let mut out = HEADER_OBJECT_GUID.to_vec();
        out.extend_from_slice(&((HEADER_OBJECT_LEN + body.len()) as u64).to_le_bytes());
        out.extend_from_slice(&(children.len() as u32).to_le_bytes());
        out.extend_from_slice(&[0x01, 0x02]);
        out.extend(body);

        let mut data_body = vec![0x22u8; 16];
        data_body.extend_from_slice(&1u64.to_le_bytes());
        data_body.extend_from_slice(&[0x01, 0x01]);
        data_body.extend_from_slice(&[0xAB; 3200]);
        out.extend(render_object(DATA, &data_body));
        out
    }

    fn text(name: &str, value: &str) -> Descriptor {
        Descriptor::new(name, DescriptorValue::Text(value.to_string()))
    }

    fn sample() -> Vec<u8> {
        asf(&[
            file_properties(0, 130_000_000, 3000),
            audio_stream(0x0161),
            content_description(["Song", "Singer", "", "Liner notes", "PG"]),
            extended(&[
                text("WM/AlbumTitle", "Record"),
                Descriptor::new("WM/TrackNumber", DescriptorValue::DWord(4)),
                text("WM/GenreID", "(17)"),
                text("WM/MCDI", "opaque"),
                Descriptor::new("IsVBR", DescriptorValue::Bool(false)),
            ]),
        ])
    }

    fn header_objects(data: &[u8]) -> Vec<String> {
        let objects = AsfCodec.objects(data).unwrap();
        objects[0]
            .children
            .iter()
            .filter_map(|c| match c.id {
                ChunkId::Guid(guid) => Some(object_name(guid)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn header_guid_matches_disk_layout() {
        assert_eq!(HEADER.to_bytes_le(), HEADER_OBJECT_GUID);
    }

    #[test]
    fn reads_stream_properties() {
        let header = AsfCodec.read_header(&sample()).unwrap();
        assert_eq!(header.encoding, "WMA Version 2");
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.channels, 2);
        assert_eq!(header.bits_per_sample, 16);
        assert_eq!(header.bitrate, 128);
        assert_eq!(header.duration_secs(), Some(10.0));
        assert!(!header.lossless);
        assert!(!header.vbr);
        assert_eq!(header.audio_bytes(), Some(3200));
    }

    #[test]
    fn lossless_codec() {
        let data = asf(&[file_properties(0, 10_000_000, 0), audio_stream(WMA_LOSSLESS)]);
        let header = AsfCodec.read_header(&data).unwrap();
        assert_eq!(header.encoding, "WMA Lossless");
        assert!(header.lossless);
    }

    #[test]
    fn reads_content_and_extended_descriptors() {
        let tag = AsfCodec.read_tag(&sample()).unwrap();
        assert_eq!(tag.first_text(FieldKey::Title), Some("Song"));
        assert_eq!(tag.first_text(FieldKey::Artist), Some("Singer"));
        assert_eq!(tag.first_text(FieldKey::Comment), Some("Liner notes"));
        assert_eq!(tag.first_text(FieldKey::Album), Some("Record"));
        assert_eq!(tag.first_text(FieldKey::Track), Some("4"));
        assert_eq!(tag.first_text(FieldKey::Genre), Some("Rock"));
        assert!(!tag.contains(FieldKey::Copyright));
    }

    #[test]
    fn zero_based_track_is_shifted_or_skipped() {
        let header = [file_properties(0, 10_000_000, 0), audio_stream(0x0161)];
        let data = asf(&[header[0].clone(), header[1].clone(), extended(&[text("WM/Track", "2")])]);
        assert_eq!(AsfCodec.read_tag(&data).unwrap().first_text(FieldKey::Track), Some("3"));

        let data = asf(&[header[0].clone(), header[1].clone(), extended(&[text("WM/Track", "4294967295")])]);
        let tag = AsfCodec.read_tag(&data).unwrap();
        assert!(!tag.contains(FieldKey::Track));
    }

    #[test]
    fn write_round_trip_keeps_unmapped_descriptors() {
        let data = sample();
        let mut tag = AsfCodec.read_tag(&data).unwrap();
        tag.set(FieldKey::Title, "Other song");
        tag.add(FieldKey::Composer, "Writer");
        tag.add(FieldKey::CoverArt, Artwork::new("image/jpeg", vec![0xFF; 100]));

        let written = AsfCodec.write_tag(&data, &tag, &WriteConfig::default()).unwrap();
        assert_eq!(AsfCodec.read_tag(&written).unwrap(), tag);
        assert!(written.ends_with(&data[data.len() - 3200..]));

        let header = AsfCodec.read_header(&written).unwrap();
        match header.details {
            FormatDetails::Asf(details) => assert_eq!(details.file_size, written.len() as u64),
            other => panic!("unexpected details {:?}", other),
        }

        let objects = AsfCodec.objects(&written).unwrap();
        let meta = read_metadata(&objects[0]);
        assert!(meta.find("WM/MCDI").is_some());
        assert_eq!(meta.content.as_ref().map(|c| c[4].as_str()), Some("PG"));
        assert_eq!(
            LittleEndian::read_u32(&written[24..28]) as usize,
            objects[0].children.len()
        );
    }

    #[test]
    fn large_picture_goes_to_metadata_library() {
        let data = sample();
        let mut tag = Tag::new();
        tag.add(FieldKey::Title, "Big art");
        tag.add(FieldKey::CoverArt, Artwork::new("image/png", vec![0x89; 70_000]));

        let written = AsfCodec.write_tag(&data, &tag, &WriteConfig::default()).unwrap();
        assert!(header_objects(&written).contains(&"Header Extension".to_string()));
        let objects = AsfCodec.objects(&written).unwrap();
        let meta = read_metadata(&objects[0]);
        assert_eq!(meta.library.len(), 1);
        assert_eq!(meta.library[0].name, "WM/Picture");

        let read = AsfCodec.read_tag(&written).unwrap();
        assert_eq!(read, tag);
        let art = read.artworks().next().unwrap();
        let range = art.range.clone().unwrap();
        assert_eq!(&written[range.start as usize..range.end as usize], &art.data[..]);
    }

    #[test]
    fn genre_writes_numeric_id() {
        let mut tag = Tag::new();
        tag.add(FieldKey::Genre, "Jazz");
        let written = AsfCodec.write_tag(&sample(), &tag, &WriteConfig::default()).unwrap();
        let objects = AsfCodec.objects(&written).unwrap();
        let meta = read_metadata(&objects[0]);
        assert_eq!(meta.find(GENRE_ID).and_then(|d| d.value.as_text()).as_deref(), Some("(8)"));
        assert_eq!(AsfCodec.read_tag(&written).unwrap(), tag);
    }

    #[test]
    fn delete_drops_mapped_fields_only() {
        let written = AsfCodec.delete_tag(&sample(), &WriteConfig::default()).unwrap();
        assert!(AsfCodec.read_tag(&written).unwrap().is_empty());
        let objects = AsfCodec.objects(&written).unwrap();
        let meta = read_metadata(&objects[0]);
        assert!(meta.find("WM/MCDI").is_some());
        assert!(meta.find("WM/AlbumTitle").is_none());
    }

    #[test]
    fn object_past_eof_is_cannot_read() {
        let mut data = sample();
        data.truncate(data.len() - 100);
        let err = AsfCodec.read_tag(&data).unwrap_err();
        assert!(err.is_cannot_read());
        assert!(err.to_string().contains("Data"));
    }

    #[test]
    fn missing_file_properties_is_cannot_read() {
        let data = asf(&[audio_stream(0x0161)]);
        assert!(AsfCodec.read_header(&data).unwrap_err().is_cannot_read());
        assert!(AsfCodec.read_tag(&data).unwrap().is_empty());
    }
}
