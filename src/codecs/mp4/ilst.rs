//! iTunes-style `ilst` items and their `data` boxes.

use crate::codecs::{id3, utf16};
use crate::prelude::*;
use crate::tag::{format_number_pair, parse_number_pair};

use super::render_box;

const DATA: &[u8; 4] = b"data";
const MEAN: &[u8; 4] = b"mean";
const NAME: &[u8; 4] = b"name";
const FREEFORM: &[u8; 4] = b"----";
const ITUNES_MEAN: &str = "com.apple.iTunes";

const TYPE_IMPLICIT: u32 = 0;
const TYPE_UTF8: u32 = 1;
const TYPE_UTF16: u32 = 2;
const TYPE_JPEG: u32 = 13;
const TYPE_PNG: u32 = 14;
const TYPE_BE_SIGNED: u32 = 21;
const TYPE_BE_UNSIGNED: u32 = 22;
const TYPE_BMP: u32 = 27;

/// Item code for each field. ISRC lives in a `----` item instead.
const ITEM_CODES: [(&[u8; 4], FieldKey); 16] = [
    (b"\xa9nam", FieldKey::Title),
    (b"\xa9ART", FieldKey::Artist),
    (b"\xa9alb", FieldKey::Album),
    (b"aART", FieldKey::AlbumArtist),
    (b"trkn", FieldKey::Track),
    (b"disk", FieldKey::Disc),
    (b"\xa9day", FieldKey::Year),
    (b"\xa9gen", FieldKey::Genre),
    (b"\xa9cmt", FieldKey::Comment),
    (b"\xa9wrt", FieldKey::Composer),
    (b"cprt", FieldKey::Copyright),
    (b"\xa9too", FieldKey::Encoder),
    (b"\xa9lyr", FieldKey::Lyrics),
    (b"\xa9grp", FieldKey::Grouping),
    (b"tmpo", FieldKey::Bpm),
    (b"covr", FieldKey::CoverArt),
];

const GENRE_ID: &[u8; 4] = b"gnre";

fn code_for(key: FieldKey) -> Option<&'static [u8; 4]> {
    ITEM_CODES.iter().find(|(_, k)| *k == key).map(|(code, _)| *code)
}

/// `mean` and `name` strings of a freeform item.
fn freeform_name(item: &Chunk<'_>) -> Option<(String, String)> {
    let text = |code: &[u8; 4]| {
        item.child(code)
            .and_then(|c| c.payload.get(4..))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    };
    Some((text(MEAN)?, text(NAME)?))
}

pub fn item_key(item: &Chunk<'_>) -> Option<FieldKey> {
    let code = item.fourcc()?;
    if code == GENRE_ID {
        return Some(FieldKey::Genre);
    }
    if code == FREEFORM {
        let (mean, name) = freeform_name(item)?;
        return (mean == ITUNES_MEAN && name.eq_ignore_ascii_case("ISRC")).then_some(FieldKey::Isrc);
    }
    ITEM_CODES.iter().find(|(c, _)| *c == code).map(|(_, key)| *key)
}

/// Type code and value bytes of a `data` box.
fn data_value<'a>(data_box: &Chunk<'a>) -> Option<(u32, &'a [u8])> {
    let payload = data_box.payload;
    if payload.len() < 8 {
        return None;
    }
    let kind = BigEndian::read_u32(&payload[0..4]) & 0x00FF_FFFF;
    Some((kind, &payload[8..]))
}

fn be_int(bytes: &[u8], signed: bool) -> Option<i64> {
    let value = match (bytes.len(), signed) {
        (1, true) => bytes[0] as i8 as i64,
        (1, false) => bytes[0] as i64,
        (2, true) => BigEndian::read_i16(bytes) as i64,
        (2, false) => BigEndian::read_u16(bytes) as i64,
        (3, _) => BigEndian::read_u24(bytes) as i64,
        (4, true) => BigEndian::read_i32(bytes) as i64,
        (4, false) => BigEndian::read_u32(bytes) as i64,
        (8, _) => BigEndian::read_i64(bytes),
        _ => return None,
    };
    Some(value)
}

fn image_mime(kind: u32, bytes: &[u8]) -> String {
    match kind {
        TYPE_JPEG => "image/jpeg".to_string(),
        TYPE_PNG => "image/png".to_string(),
        TYPE_BMP => "image/bmp".to_string(),
        _ => Artwork::sniff_mime(bytes).to_string(),
    }
}

fn decode_value(key: FieldKey, code: &[u8; 4], kind: u32, bytes: &[u8], value_offset: u64) -> Option<FieldValue> {
    match key {
        FieldKey::Track | FieldKey::Disc => {
            if bytes.len() < 6 {
                return None;
            }
            let number = BigEndian::read_u16(&bytes[2..4]) as u32;
            let total = BigEndian::read_u16(&bytes[4..6]) as u32;
            Some(format_number_pair(number, total).into())
        }
        FieldKey::Genre if code == GENRE_ID => {
            let index = be_int(bytes, false)?;
            // gnre counts from one
            let name = u8::try_from(index - 1).ok().and_then(id3::genre_name)?;
            Some(name.into())
        }
        FieldKey::CoverArt => {
            let mut art = Artwork::new(&image_mime(kind, bytes), bytes.to_vec());
            art.range = Some(value_offset..value_offset + bytes.len() as u64);
            Some(art.into())
        }
        _ => match kind {
            TYPE_UTF8 => Some(String::from_utf8_lossy(bytes).into_owned().into()),
            TYPE_UTF16 => Some(utf16(bytes, true).into()),
            TYPE_BE_SIGNED | TYPE_BE_UNSIGNED | TYPE_IMPLICIT => {
                be_int(bytes, kind == TYPE_BE_SIGNED).map(|n| n.to_string().into())
            }
            _ => None,
        },
    }
}

/// Decode every mapped item of `ilst` into `tag`. Items that cannot be
/// decoded are skipped.
pub fn read_items(ilst: &Chunk<'_>, tag: &mut Tag) {
    for item in &ilst.children {
        let Some(key) = item_key(item) else {
            continue;
        };
        let Some(code) = item.fourcc() else {
            continue;
        };
        for data_box in item.children_named(DATA) {
            let Some((kind, bytes)) = data_value(data_box) else {
                tracing::warn!(item = %item.id, offset = data_box.range.start, "Skipping short data box");
                continue;
            };
            let value_offset = (data_box.payload_offset + 8) as u64;
            match decode_value(key, code, kind, bytes, value_offset) {
                Some(value) => tag.add(key, value),
                None => tracing::warn!(item = %item.id, kind, "Skipping undecodable item value"),
            }
        }
    }
}

fn data_box(kind: u32, value: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(8 + value.len());
    body.extend_from_slice(&kind.to_be_bytes());
    body.extend_from_slice(&[0u8; 4]);
    body.extend_from_slice(value);
    render_box(DATA, &body)
}

fn number_pair_value(text: &str, trailing: usize) -> Vec<u8> {
    let (number, total) = parse_number_pair(text);
    let mut value = vec![0u8; 2];
    value.extend_from_slice(&(number.unwrap_or(0).min(u16::MAX as u32) as u16).to_be_bytes());
    value.extend_from_slice(&(total.unwrap_or(0).min(u16::MAX as u32) as u16).to_be_bytes());
    value.resize(value.len() + trailing, 0);
    value
}

fn image_type(mime: &str) -> u32 {
    match mime {
        "image/jpeg" | "image/jpg" => TYPE_JPEG,
        "image/png" => TYPE_PNG,
        "image/bmp" => TYPE_BMP,
        _ => TYPE_IMPLICIT,
    }
}

fn freeform_item(name: &str, values: &[&str]) -> Vec<u8> {
    let mut body = Vec::new();
    let mut mean = vec![0u8; 4];
    mean.extend_from_slice(ITUNES_MEAN.as_bytes());
    body.extend(render_box(MEAN, &mean));
    let mut name_body = vec![0u8; 4];
    name_body.extend_from_slice(name.as_bytes());
    body.extend(render_box(NAME, &name_body));
    for value in values {
        body.extend(data_box(TYPE_UTF8, value.as_bytes()));
    }
    render_box(FREEFORM, &body)
}

fn render_item(tag: &Tag, key: FieldKey) -> R<Vec<u8>> {
    if key == FieldKey::Isrc {
        return Ok(freeform_item("ISRC", &tag.texts(key)));
    }
    let code = code_for(key).ok_or_else(|| Error::cannot_write(format!("no MP4 item for {}", key.name())))?;

    let mut body = Vec::new();
    match key {
        FieldKey::Track | FieldKey::Disc => {
            if let Some(text) = tag.first_text(key) {
                let trailing = if key == FieldKey::Track { 2 } else { 0 };
                body.extend(data_box(TYPE_IMPLICIT, &number_pair_value(text, trailing)));
            }
        }
        FieldKey::Bpm => {
            if let Some(text) = tag.first_text(key) {
                let bpm: u16 = text
                    .trim()
                    .parse()
                    .map_err(|_| Error::cannot_write(format!("BPM is not a number: {}", text)))?;
                body.extend(data_box(TYPE_BE_SIGNED, &bpm.to_be_bytes()));
            }
        }
        FieldKey::CoverArt => {
            for art in tag.artworks() {
                body.extend(data_box(image_type(&art.mime_type), &art.data));
            }
        }
        _ => {
            for text in tag.texts(key) {
                body.extend(data_box(TYPE_UTF8, text.as_bytes()));
            }
        }
    }
    Ok(render_box(code, &body))
}

/// Build a new `ilst` box: items for `tag`, then every unmapped item of the
/// old `ilst` copied byte for byte.
pub fn render_ilst(data: &[u8], old: Option<&Chunk<'_>>, tag: &Tag) -> R<Vec<u8>> {
    let mut body = Vec::new();
    for key in tag.keys() {
        body.extend(render_item(tag, key)?);
    }
    if let Some(old) = old {
        for item in old.children.iter().filter(|item| item_key(item).is_none()) {
            body.extend_from_slice(&data[item.range.clone()]);
        }
    }
    Ok(render_box(b"ilst", &body))
}
