//! ID3v1 and ID3v2 tags.
//!
//! Read support covers ID3v2.2, 2.3 and 2.4 (unsynchronisation, extended header,
//! per-frame data length indicator) and ID3v1/1.1. Tags are always written as
//! ID3v2.3. Frames that do not map to a [`FieldKey`] survive a rewrite as-is.

use std::borrow::Cow;

use crate::codecs::{encode_latin1, encode_utf16le, latin1, trim_text, utf16, utf16_bom};
use crate::prelude::*;
use crate::tag::parse_number_pair;

const ID3V2_ID: &[u8; 3] = b"ID3";
const ID3V1_ID: &[u8; 3] = b"TAG";

pub const HEADER_LEN: usize = 10;
pub const ID3V1_LEN: usize = 128;

const FLAG_UNSYNCHRONISATION: u8 = 0x80;
const FLAG_EXTENDED_HEADER: u8 = 0x40;
const FLAG_FOOTER: u8 = 0x10;

// v2.3 frame flags
const V3_COMPRESSION: u16 = 0x0080;
const V3_ENCRYPTION: u16 = 0x0040;
const V3_GROUPING: u16 = 0x0020;

// v2.4 frame flags
const V4_GROUPING: u16 = 0x0040;
const V4_COMPRESSION: u16 = 0x0008;
const V4_ENCRYPTION: u16 = 0x0004;
const V4_UNSYNCHRONISATION: u16 = 0x0002;
const V4_DATA_LENGTH: u16 = 0x0001;

const ENCODING_LATIN1: u8 = 0;
const ENCODING_UTF16: u8 = 1;
const ENCODING_UTF16BE: u8 = 2;
const ENCODING_UTF8: u8 = 3;

/// Largest body a 28-bit syncsafe size can describe.
const MAX_TAG_SIZE: usize = 0x0FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Id3v2Header {
    pub major: u8,
    pub revision: u8,
    pub flags: u8,
    /// Body size, excluding the 10-byte header and any footer
    pub size: u32,
}

/// A frame body with unsynchronisation and data length prefixes already removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Id3v2 {
    pub header: Id3v2Header,
    pub frames: Vec<Frame>,
}

pub fn syncsafe(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| (acc << 7) | (b & 0x7F) as u32)
}

fn encode_syncsafe(value: u32) -> [u8; 4] {
    [
        ((value >> 21) & 0x7F) as u8,
        ((value >> 14) & 0x7F) as u8,
        ((value >> 7) & 0x7F) as u8,
        (value & 0x7F) as u8,
    ]
}

pub fn parse_header(data: &[u8]) -> Option<Id3v2Header> {
    if data.len() < HEADER_LEN || &data[0..3] != ID3V2_ID {
        return None;
    }
    let major = data[3];
    if !(2..=4).contains(&major) || data[6..10].iter().any(|&b| b & 0x80 != 0) {
        return None;
    }
    Some(Id3v2Header {
        major,
        revision: data[4],
        flags: data[5],
        size: syncsafe(&data[6..10]),
    })
}

/// Total length of a leading ID3v2 tag, header and footer included.
pub fn tag_len(data: &[u8]) -> Option<usize> {
    let header = parse_header(data)?;
    let footer = if header.major == 4 && header.flags & FLAG_FOOTER != 0 {
        HEADER_LEN
    } else {
        0
    };
    Some(HEADER_LEN + header.size as usize + footer)
}

fn remove_unsynchronisation(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        out.push(data[i]);
        if data[i] == 0xFF && data.get(i + 1) == Some(&0x00) {
            i += 1;
        }
        i += 1;
    }
    out
}

/// Parse the ID3v2 tag at the start of `data`.
pub fn read_id3v2(data: &[u8]) -> R<Id3v2> {
    let header = parse_header(data).ok_or_else(|| Error::cannot_read("missing ID3v2 header"))?;
    let end = HEADER_LEN + header.size as usize;
    if end > data.len() {
        return Err(Error::chunk(
            "ID3v2 tag size exceeds the remaining bytes",
            "ID3",
            0,
            header.size as u64,
        ));
    }

    let body: Cow<[u8]> = if header.flags & FLAG_UNSYNCHRONISATION != 0 && header.major < 4 {
        Cow::Owned(remove_unsynchronisation(&data[HEADER_LEN..end]))
    } else {
        Cow::Borrowed(&data[HEADER_LEN..end])
    };

    let mut view = ByteView::at(&body, HEADER_LEN as u64);
    if header.flags & FLAG_EXTENDED_HEADER != 0 && header.major >= 3 {
        if header.major == 3 {
            let size = view.u32_be()? as usize;
            view.skip(size)?;
        } else {
            let size = syncsafe(view.bytes(4)?) as usize;
            view.skip(size.saturating_sub(4))?;
        }
    }

    let frames = read_frames(&mut view, header.major)?;
    tracing::debug!(version = header.major, frames = frames.len(), "ID3v2 tag");
    Ok(Id3v2 { header, frames })
}

fn read_frames(view: &mut ByteView<'_>, major: u8) -> R<Vec<Frame>> {
    let (id_len, header_len) = if major == 2 { (3, 6) } else { (4, 10) };
    let mut frames = Vec::new();

    while view.remaining() >= header_len {
        let offset = view.absolute_position();
        let id_bytes = view.bytes(id_len)?;
        if id_bytes[0] == 0 {
            break; // padding
        }
        if !id_bytes.iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()) {
            tracing::warn!(offset, "invalid ID3v2 frame id, stopping");
            break;
        }
        let id = String::from_utf8_lossy(id_bytes).to_string();

        let (size, flags) = match major {
            2 => (view.u24_be()? as usize, 0u16),
            3 => (view.u32_be()? as usize, view.u16_be()?),
            _ => (syncsafe(view.bytes(4)?) as usize, view.u16_be()?),
        };
        if size > view.remaining() {
            tracing::warn!(frame = %id, offset, size, "frame exceeds the tag, stopping");
            break;
        }
        let mut body = view.bytes(size)?;

        let (compressed, encrypted, grouped) = match major {
            3 => (
                flags & V3_COMPRESSION != 0,
                flags & V3_ENCRYPTION != 0,
                flags & V3_GROUPING != 0,
            ),
            4 => (
                flags & V4_COMPRESSION != 0,
                flags & V4_ENCRYPTION != 0,
                flags & V4_GROUPING != 0,
            ),
            _ => (false, false, false),
        };
        if compressed || encrypted {
            tracing::debug!(frame = %id, "skipping compressed or encrypted frame");
            continue;
        }
        if grouped && !body.is_empty() {
            body = &body[1..];
        }
        if major == 4 && flags & V4_DATA_LENGTH != 0 {
            body = body.get(4..).unwrap_or_default();
        }
        let data = if major == 4 && flags & V4_UNSYNCHRONISATION != 0 {
            remove_unsynchronisation(body)
        } else {
            body.to_vec()
        };

        frames.push(Frame { id, data });
    }

    Ok(frames)
}

/// Map a frame id (any version) to its field.
fn frame_key(id: &str) -> Option<FieldKey> {
    let key = match id {
        "TIT2" | "TT2" => FieldKey::Title,
        "TPE1" | "TP1" => FieldKey::Artist,
        "TALB" | "TAL" => FieldKey::Album,
        "TPE2" | "TP2" => FieldKey::AlbumArtist,
        "TRCK" | "TRK" => FieldKey::Track,
        "TPOS" | "TPA" => FieldKey::Disc,
        "TYER" | "TDRC" | "TYE" => FieldKey::Year,
        "TCON" | "TCO" => FieldKey::Genre,
        "COMM" | "COM" => FieldKey::Comment,
        "TCOM" | "TCM" => FieldKey::Composer,
        "TCOP" | "TCR" => FieldKey::Copyright,
        "TSSE" | "TSS" => FieldKey::Encoder,
        "USLT" | "ULT" => FieldKey::Lyrics,
        "TIT1" | "TT1" => FieldKey::Grouping,
        "TBPM" | "TBP" => FieldKey::Bpm,
        "TSRC" | "TRC" => FieldKey::Isrc,
        "APIC" | "PIC" => FieldKey::CoverArt,
        _ => return None,
    };
    Some(key)
}

/// Frame id written for a text field.
fn v23_frame_id(key: FieldKey) -> &'static [u8; 4] {
    match key {
        FieldKey::Title => b"TIT2",
        FieldKey::Artist => b"TPE1",
        FieldKey::Album => b"TALB",
        FieldKey::AlbumArtist => b"TPE2",
        FieldKey::Track => b"TRCK",
        FieldKey::Disc => b"TPOS",
        FieldKey::Year => b"TYER",
        FieldKey::Genre => b"TCON",
        FieldKey::Comment => b"COMM",
        FieldKey::Composer => b"TCOM",
        FieldKey::Copyright => b"TCOP",
        FieldKey::Encoder => b"TSSE",
        FieldKey::Lyrics => b"USLT",
        FieldKey::Grouping => b"TIT1",
        FieldKey::Bpm => b"TBPM",
        FieldKey::Isrc => b"TSRC",
        FieldKey::CoverArt => b"APIC",
    }
}

/// Comments with a description (iTunNORM and friends) are not the user comment.
fn is_mapped(frame: &Frame) -> bool {
    match frame_key(&frame.id) {
        Some(FieldKey::Comment) => comment_parts(&frame.data).is_some_and(|(desc, _)| desc.is_empty()),
        Some(_) => true,
        None => false,
    }
}

fn decode_text(encoding: u8, bytes: &[u8]) -> String {
    match encoding {
        ENCODING_LATIN1 => latin1(bytes),
        ENCODING_UTF16 => utf16_bom(bytes),
        ENCODING_UTF16BE => utf16(bytes, true),
        _ => String::from_utf8_lossy(bytes).to_string(),
    }
}

/// Split at the first terminator for the encoding; UTF-16 terminators sit on even offsets.
fn split_terminated(encoding: u8, bytes: &[u8]) -> (&[u8], &[u8]) {
    if matches!(encoding, ENCODING_UTF16 | ENCODING_UTF16BE) {
        let mut i = 0;
        while i + 1 < bytes.len() {
            if bytes[i] == 0 && bytes[i + 1] == 0 {
                return (&bytes[..i], &bytes[i + 2..]);
            }
            i += 2;
        }
        (bytes, &[])
    } else {
        match bytes.iter().position(|&b| b == 0) {
            Some(i) => (&bytes[..i], &bytes[i + 1..]),
            None => (bytes, &[]),
        }
    }
}

fn text_values(data: &[u8]) -> Vec<String> {
    let Some((&encoding, text)) = data.split_first() else {
        return Vec::new();
    };
    decode_text(encoding, text)
        .split('\0')
        .map(|v| trim_text(&v.replace('\u{feff}', "")))
        .filter(|v| !v.is_empty())
        .collect()
}

/// (description, text) of a COMM or USLT body.
fn comment_parts(data: &[u8]) -> Option<(String, String)> {
    if data.len() < 4 {
        return None;
    }
    let encoding = data[0];
    let (desc, text) = split_terminated(encoding, &data[4..]);
    Some((
        trim_text(&decode_text(encoding, desc)),
        trim_text(&decode_text(encoding, text)),
    ))
}

fn parse_picture(frame: &Frame) -> R<Artwork> {
    let mut view = ByteView::new(&frame.data);
    let encoding = view.u8()?;
    let mime_type = if frame.id == "PIC" {
        match &view.array::<3>()? {
            b"JPG" => "image/jpeg".to_string(),
            b"PNG" => "image/png".to_string(),
            other => format!("image/{}", String::from_utf8_lossy(other).to_lowercase()),
        }
    } else {
        let rest = view.rest();
        let (mime, after) = split_terminated(ENCODING_LATIN1, rest);
        view = ByteView::new(after);
        latin1(mime)
    };
    let picture_type = view.u8()?;
    let (desc, image) = split_terminated(encoding, view.rest());
    if image.is_empty() {
        return Err(Error::invalid_frame(0, "picture frame without image data"));
    }
    let mime_type = if mime_type.is_empty() {
        Artwork::sniff_mime(image).to_string()
    } else {
        mime_type
    };
    Ok(Artwork {
        mime_type,
        description: trim_text(&decode_text(encoding, desc)),
        picture_type,
        data: image.to_vec(),
        range: None,
    })
}

/// Resolve "(17)", "(17)Rock" and bare "17" against the ID3v1 genre list.
pub fn resolve_genre(text: &str) -> String {
    let text = text.trim();
    if let Some(rest) = text.strip_prefix('(') {
        if rest.starts_with('(') {
            return rest.to_string();
        }
        if let Some(close) = rest.find(')') {
            let refinement = rest[close + 1..].trim();
            if !refinement.is_empty() {
                return refinement.to_string();
            }
            if let Some(name) = rest[..close].parse::<u8>().ok().and_then(genre_name) {
                return name.to_string();
            }
        }
    }
    if !text.is_empty() && text.chars().all(|c| c.is_ascii_digit()) {
        if let Some(name) = text.parse::<u8>().ok().and_then(genre_name) {
            return name.to_string();
        }
    }
    text.to_string()
}

/// Field mapper: frames to generic fields.
pub fn frames_to_tag(id3: &Id3v2) -> Tag {
    let mut tag = Tag::new();
    for frame in &id3.frames {
        let Some(key) = frame_key(&frame.id) else {
            continue;
        };
        match key {
            FieldKey::CoverArt => match parse_picture(frame) {
                Ok(art) => tag.add(key, art),
                Err(e) => tracing::warn!(frame = %frame.id, error = %e, "skipping picture frame"),
            },
            FieldKey::Comment | FieldKey::Lyrics => {
                if let Some((desc, text)) = comment_parts(&frame.data) {
                    if key == FieldKey::Lyrics || desc.is_empty() {
                        tag.add(key, text);
                    }
                }
            }
            FieldKey::Genre => {
                for value in text_values(&frame.data) {
                    tag.add(key, resolve_genre(&value));
                }
            }
            _ => {
                for value in text_values(&frame.data) {
                    tag.add(key, value);
                }
            }
        }
    }
    tag
}

pub fn read_tag(data: &[u8]) -> R<Tag> {
    Ok(frames_to_tag(&read_id3v2(data)?))
}

/// Frames a rewrite has to carry over. ID3v2.2 frames use a different layout and are dropped.
pub fn unmapped_frames(id3: &Id3v2) -> Vec<Frame> {
    if id3.header.major < 3 {
        return Vec::new();
    }
    id3.frames
        .iter()
        .filter(|frame| !is_mapped(frame))
        .cloned()
        .collect()
}

pub fn has_id3v1(data: &[u8]) -> bool {
    data.len() >= ID3V1_LEN && &data[data.len() - ID3V1_LEN..data.len() - ID3V1_LEN + 3] == ID3V1_ID
}

pub fn read_id3v1(data: &[u8]) -> Option<Tag> {
    if !has_id3v1(data) {
        return None;
    }
    let block = &data[data.len() - ID3V1_LEN..];
    let field = |range: std::ops::Range<usize>| trim_text(&latin1(&block[range]));

    let mut tag = Tag::new();
    tag.add(FieldKey::Title, field(3..33));
    tag.add(FieldKey::Artist, field(33..63));
    tag.add(FieldKey::Album, field(63..93));
    tag.add(FieldKey::Year, field(93..97));

    // ID3v1.1 stores the track in the last comment byte
    if block[125] == 0 && block[126] != 0 {
        tag.add(FieldKey::Comment, field(97..125));
        tag.add(FieldKey::Track, block[126].to_string());
    } else {
        tag.add(FieldKey::Comment, field(97..127));
    }
    if let Some(genre) = genre_name(block[127]) {
        tag.add(FieldKey::Genre, genre);
    }
    Some(tag)
}

fn latin1_lossy(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| {
            let mut buf = [0u8; 4];
            encode_latin1(c.encode_utf8(&mut buf))
                .and_then(|bytes| bytes.first().copied())
                .unwrap_or(b'?')
        })
        .collect()
}

fn put_field(block: &mut [u8], text: Option<&str>) {
    let bytes = latin1_lossy(text.unwrap_or_default());
    let len = bytes.len().min(block.len());
    block[..len].copy_from_slice(&bytes[..len]);
}

/// Serialize an ID3v1.1 block. Text is truncated to the fixed field widths.
pub fn render_id3v1(tag: &Tag) -> Vec<u8> {
    let mut block = vec![0u8; ID3V1_LEN];
    block[..3].copy_from_slice(ID3V1_ID);
    put_field(&mut block[3..33], tag.first_text(FieldKey::Title));
    put_field(&mut block[33..63], tag.first_text(FieldKey::Artist));
    put_field(&mut block[63..93], tag.first_text(FieldKey::Album));
    put_field(&mut block[93..97], tag.first_text(FieldKey::Year));

    let track = tag
        .first_text(FieldKey::Track)
        .and_then(|text| parse_number_pair(text).0)
        .filter(|n| (1..=255).contains(n));
    match track {
        Some(n) => {
            put_field(&mut block[97..125], tag.first_text(FieldKey::Comment));
            block[126] = n as u8;
        }
        None => put_field(&mut block[97..127], tag.first_text(FieldKey::Comment)),
    }

    block[127] = tag
        .first_text(FieldKey::Genre)
        .and_then(genre_index)
        .unwrap_or(255);
    block
}

/// Encoding byte plus encoded text, Latin-1 when possible.
fn encode_text(text: &str) -> (u8, Vec<u8>) {
    match encode_latin1(text) {
        Some(bytes) => (ENCODING_LATIN1, bytes),
        None => {
            let mut bytes = vec![0xFF, 0xFE];
            bytes.extend(encode_utf16le(text));
            (ENCODING_UTF16, bytes)
        }
    }
}

fn terminator(encoding: u8) -> &'static [u8] {
    if encoding == ENCODING_LATIN1 { &[0] } else { &[0, 0] }
}

fn write_frame(out: &mut Vec<u8>, id: &[u8], body: &[u8]) -> R<()> {
    out.write_all(id)?;
    out.write_u32::<BigEndian>(body.len() as u32)?;
    out.write_u16::<BigEndian>(0)?;
    out.write_all(body)?;
    Ok(())
}

fn comment_body(text: &str) -> Vec<u8> {
    let (encoding, encoded) = encode_text(text);
    let mut body = vec![encoding];
    body.extend_from_slice(b"eng");
    if encoding == ENCODING_UTF16 {
        body.extend_from_slice(&[0xFF, 0xFE]);
    }
    body.extend_from_slice(terminator(encoding));
    body.extend(encoded);
    body
}

fn picture_body(art: &Artwork) -> Vec<u8> {
    let (encoding, desc) = encode_text(&art.description);
    let mut body = vec![encoding];
    body.extend(encode_latin1(&art.mime_type).unwrap_or_default());
    body.push(0);
    body.push(art.picture_type);
    body.extend(desc);
    body.extend_from_slice(terminator(encoding));
    body.extend_from_slice(&art.data);
    body
}

/// Serialize `tag` plus carried-over frames as an ID3v2.3 tag with `padding` zero bytes.
pub fn render_id3v23(tag: &Tag, preserved: &[Frame], padding: u32) -> R<Vec<u8>> {
    let mut frames = Vec::new();

    for key in tag.keys() {
        let id = v23_frame_id(key);
        match key {
            FieldKey::CoverArt => {
                for art in tag.artworks() {
                    write_frame(&mut frames, id, &picture_body(art))?;
                }
            }
            FieldKey::Comment | FieldKey::Lyrics => {
                for text in tag.texts(key) {
                    write_frame(&mut frames, id, &comment_body(text))?;
                }
            }
            _ => {
                let joined = tag.texts(key).join("\0");
                let (encoding, encoded) = encode_text(&joined);
                let mut body = vec![encoding];
                body.extend(encoded);
                write_frame(&mut frames, id, &body)?;
            }
        }
    }

    for frame in preserved {
        write_frame(&mut frames, frame.id.as_bytes(), &frame.data)?;
    }

    let size = frames.len() + padding as usize;
    if size > MAX_TAG_SIZE {
        return Err(Error::cannot_write("ID3v2 tag larger than 256 MiB"));
    }

    let mut out = Vec::with_capacity(HEADER_LEN + size);
    out.write_all(ID3V2_ID)?;
    out.write_all(&[3, 0, 0])?;
    out.write_all(&encode_syncsafe(size as u32))?;
    out.write_all(&frames)?;
    out.resize(HEADER_LEN + size, 0);
    Ok(out)
}

pub fn genre_name(index: u8) -> Option<&'static str> {
    GENRES.get(index as usize).copied()
}

pub fn genre_index(name: &str) -> Option<u8> {
    GENRES
        .iter()
        .position(|g| g.eq_ignore_ascii_case(name.trim()))
        .map(|i| i as u8)
}

pub static GENRES: [&str; 148] = [
    "Blues",
    "Classic Rock",
    "Country",
    "Dance",
    "Disco",
    "Funk",
    "Grunge",
    "Hip-Hop",
    "Jazz",
    "Metal",
    "New Age",
    "Oldies",
    "Other",
    "Pop",
    "R&B",
    "Rap",
    "Reggae",
    "Rock",
    "Techno",
    "Industrial",
    "Alternative",
    "Ska",
    "Death Metal",
    "Pranks",
    "Soundtrack",
    "Euro-Techno",
    "Ambient",
    "Trip-Hop",
    "Vocal",
    "Jazz+Funk",
    "Fusion",
    "Trance",
    "Classical",
    "Instrumental",
    "Acid",
    "House",
    "Game",
    "Sound Clip",
    "Gospel",
    "Noise",
    "Alternative Rock",
    "Bass",
    "Soul",
    "Punk",
    "Space",
    "Meditative",
    "Instrumental Pop",
    "Instrumental Rock",
    "Ethnic",
    "Gothic",
    "Darkwave",
    "Techno-Industrial",
    "Electronic",
    "Pop-Folk",
    "Eurodance",
    "Dream",
    "Southern Rock",
    "Comedy",
    "Cult",
    "Gangsta",
    "Top 40",
    "Christian Rap",
    "Pop/Funk",
    "Jungle",
    "Native US",
    "Cabaret",
    "New Wave",
    "Psychadelic",
    "Rave",
    "Showtunes",
    "Trailer",
    "Lo-Fi",
    "Tribal",
    "Acid Punk",
    "Acid Jazz",
    "Polka",
    "Retro",
    "Musical",
    "Rock & Roll",
    "Hard Rock",
    "Folk",
    "Folk-Rock",
    "National Folk",
    "Swing",
    "Fast Fusion",
    "Bebob",
    "Latin",
    "Revival",
    "Celtic",
    "Bluegrass",
    "Avantgarde",
    "Gothic Rock",
    "Progressive Rock",
    "Psychedelic Rock",
    "Symphonic Rock",
    "Slow Rock",
    "Big Band",
    "Chorus",
    "Easy Listening",
    "Acoustic",
    "Humour",
    "Speech",
    "Chanson",
    "Opera",
    "Chamber Music",
    "Sonata",
    "Symphony",
    "Booty Bass",
    "Primus",
    "Porn Groove",
    "Satire",
    "Slow Jam",
    "Club",
    "Tango",
    "Samba",
    "Folklore",
    "Ballad",
    "Power Ballad",
    "Rhythmic Soul",
    "Freestyle",
    "Duet",
    "Punk Rock",
    "Drum Solo",
    "A capella",
    "Euro-House",
    "Dance Hall",
    "Goa",
    "Drum & Bass",
    "Club-House",
    "Hardcore",
    "Terror",
    "Indie",
    "BritPop",
    "Afro-Punk",
    "Polsk Punk",
    "Beat",
    "Christian Gangsta Rap",
    "Heavy Metal",
    "Black Metal",
    "Crossover",
    "Contemporary Christian",
    "Christian Rock",
    "Merengue",
    "Salsa",
    "Thrash Metal",
    "Anime",
    "JPop",
    "Synthpop",
];
