//! Metadata records of the ASF header: Content Description strings,
//! Extended Content Description and Metadata Library descriptors, and the
//! `WM/Picture` binary layout.

use std::ops::Range;

use uuid::Uuid;

use crate::codecs::{encode_utf16le, utf16};
use crate::prelude::*;

const TYPE_UNICODE: u16 = 0;
const TYPE_BYTES: u16 = 1;
const TYPE_BOOL: u16 = 2;
const TYPE_DWORD: u16 = 3;
const TYPE_QWORD: u16 = 4;
const TYPE_WORD: u16 = 5;
const TYPE_GUID: u16 = 6;

/// Title, author, copyright, description, rating.
pub const CONTENT_FIELDS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorValue {
    Text(String),
    Binary(Vec<u8>),
    Bool(bool),
    Word(u16),
    DWord(u32),
    QWord(u64),
    Guid(Uuid),
}

impl DescriptorValue {
    fn type_code(&self) -> u16 {
        match self {
            DescriptorValue::Text(_) => TYPE_UNICODE,
            DescriptorValue::Binary(_) => TYPE_BYTES,
            DescriptorValue::Bool(_) => TYPE_BOOL,
            DescriptorValue::DWord(_) => TYPE_DWORD,
            DescriptorValue::QWord(_) => TYPE_QWORD,
            DescriptorValue::Word(_) => TYPE_WORD,
            DescriptorValue::Guid(_) => TYPE_GUID,
        }
    }

    /// Extended Content Description stores BOOL in four bytes, the metadata
    /// objects in two.
    fn decode(kind: u16, bytes: &[u8], wide_bool: bool) -> Option<DescriptorValue> {
        let value = match kind {
            TYPE_UNICODE => DescriptorValue::Text(utf16(bytes, false).trim_end_matches('\0').to_string()),
            TYPE_BYTES => DescriptorValue::Binary(bytes.to_vec()),
            TYPE_BOOL => {
                let width = if wide_bool { 4 } else { 2 };
                DescriptorValue::Bool(bytes.get(..width)?.iter().any(|&b| b != 0))
            }
            TYPE_DWORD => DescriptorValue::DWord(LittleEndian::read_u32(bytes.get(..4)?)),
            TYPE_QWORD => DescriptorValue::QWord(LittleEndian::read_u64(bytes.get(..8)?)),
            TYPE_WORD => DescriptorValue::Word(LittleEndian::read_u16(bytes.get(..2)?)),
            TYPE_GUID => DescriptorValue::Guid(Uuid::from_bytes_le(bytes.get(..16)?.try_into().ok()?)),
            _ => return None,
        };
        Some(value)
    }

    fn encode(&self, wide_bool: bool) -> Vec<u8> {
        match self {
            DescriptorValue::Text(text) => utf16z(text),
            DescriptorValue::Binary(bytes) => bytes.clone(),
            DescriptorValue::Bool(flag) => {
                let width = if wide_bool { 4 } else { 2 };
                let mut out = vec![0u8; width];
                out[0] = *flag as u8;
                out
            }
            DescriptorValue::Word(v) => v.to_le_bytes().to_vec(),
            DescriptorValue::DWord(v) => v.to_le_bytes().to_vec(),
            DescriptorValue::QWord(v) => v.to_le_bytes().to_vec(),
            DescriptorValue::Guid(guid) => guid.to_bytes_le().to_vec(),
        }
    }

    /// Text form used by the field mapper; binary values have none.
    pub fn as_text(&self) -> Option<String> {
        match self {
            DescriptorValue::Text(text) => Some(text.clone()),
            DescriptorValue::Bool(flag) => Some(if *flag { "1" } else { "0" }.to_string()),
            DescriptorValue::Word(v) => Some(v.to_string()),
            DescriptorValue::DWord(v) => Some(v.to_string()),
            DescriptorValue::QWord(v) => Some(v.to_string()),
            DescriptorValue::Binary(_) | DescriptorValue::Guid(_) => None,
        }
    }

    /// Encoded size, used to pick the object a value fits in.
    pub fn encoded_len(&self) -> usize {
        self.encode(true).len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub name: String,
    pub value: DescriptorValue,
    pub stream: u16,
    pub language: u16,
    /// Value bytes in the source
    pub range: Option<Range<usize>>,
    /// Whole record in the source, for byte-for-byte copies
    pub record: Option<Range<usize>>,
}

impl Descriptor {
    pub fn new<S: Into<String>>(name: S, value: DescriptorValue) -> Self {
        Self {
            name: name.into(),
            value,
            stream: 0,
            language: 0,
            range: None,
            record: None,
        }
    }
}

/// UTF-16LE with a terminating null character.
pub fn utf16z(text: &str) -> Vec<u8> {
    let mut out = encode_utf16le(text);
    out.extend_from_slice(&[0, 0]);
    out
}

pub fn parse_content_description(payload: &[u8], base: u64) -> R<[String; CONTENT_FIELDS]> {
    let mut view = ByteView::at(payload, base);
    let mut lens = [0usize; CONTENT_FIELDS];
    for len in lens.iter_mut() {
        *len = view.u16_le()? as usize;
    }
    let mut fields: [String; CONTENT_FIELDS] = Default::default();
    for (field, len) in fields.iter_mut().zip(lens) {
        *field = utf16(view.bytes(len)?, false).trim_end_matches('\0').to_string();
    }
    Ok(fields)
}

pub fn render_content_description(fields: &[String; CONTENT_FIELDS]) -> R<Vec<u8>> {
    let encoded: Vec<Vec<u8>> = fields
        .iter()
        .map(|f| if f.is_empty() { Vec::new() } else { utf16z(f) })
        .collect();
    let mut out = Vec::new();
    for field in &encoded {
        let len = u16::try_from(field.len())
            .map_err(|_| Error::cannot_write("content description field over 64 KiB"))?;
        out.extend_from_slice(&len.to_le_bytes());
    }
    for field in encoded {
        out.extend(field);
    }
    Ok(out)
}

/// Descriptors of an Extended Content Description payload. A record with an
/// unknown value type is skipped.
pub fn parse_extended(payload: &[u8], base: usize) -> R<Vec<Descriptor>> {
    let mut view = ByteView::at(payload, base as u64);
    let count = view.u16_le()?;
    let mut descriptors = Vec::with_capacity((count as usize).min(view.remaining() / 6));
    for _ in 0..count {
        let start = base + view.position();
        let name_len = view.u16_le()? as usize;
        let name = utf16(view.bytes(name_len)?, false).trim_end_matches('\0').to_string();
        let kind = view.u16_le()?;
        let value_len = view.u16_le()? as usize;
        let value_start = base + view.position();
        let bytes = view.bytes(value_len)?;
        let end = base + view.position();

        match DescriptorValue::decode(kind, bytes, true) {
            Some(value) => descriptors.push(Descriptor {
                name,
                value,
                stream: 0,
                language: 0,
                range: Some(value_start..value_start + value_len),
                record: Some(start..end),
            }),
            None => tracing::warn!(descriptor = %name, kind, "skipping undecodable descriptor"),
        }
    }
    Ok(descriptors)
}

pub fn render_extended_record(descriptor: &Descriptor) -> R<Vec<u8>> {
    let name = utf16z(&descriptor.name);
    let value = descriptor.value.encode(true);
    let name_len = u16::try_from(name.len()).map_err(|_| Error::cannot_write("descriptor name too long"))?;
    let value_len = u16::try_from(value.len())
        .map_err(|_| Error::cannot_write(format!("{} does not fit an extended descriptor", descriptor.name)))?;
    let mut out = Vec::with_capacity(6 + name.len() + value.len());
    out.extend_from_slice(&name_len.to_le_bytes());
    out.extend(name);
    out.extend_from_slice(&descriptor.value.type_code().to_le_bytes());
    out.extend_from_slice(&value_len.to_le_bytes());
    out.extend(value);
    Ok(out)
}

/// Records of a Metadata or Metadata Library payload (same layout).
pub fn parse_metadata_library(payload: &[u8], base: usize) -> R<Vec<Descriptor>> {
    let mut view = ByteView::at(payload, base as u64);
    let count = view.u16_le()?;
    let mut descriptors = Vec::with_capacity((count as usize).min(view.remaining() / 12));
    for _ in 0..count {
        let start = base + view.position();
        let language = view.u16_le()?;
        let stream = view.u16_le()?;
        let name_len = view.u16_le()? as usize;
        let kind = view.u16_le()?;
        let value_len = view.u32_le()? as usize;
        let name = utf16(view.bytes(name_len)?, false).trim_end_matches('\0').to_string();
        let value_start = base + view.position();
        let bytes = view.bytes(value_len)?;
        let end = base + view.position();

        match DescriptorValue::decode(kind, bytes, false) {
            Some(value) => descriptors.push(Descriptor {
                name,
                value,
                stream,
                language,
                range: Some(value_start..value_start + value_len),
                record: Some(start..end),
            }),
            None => tracing::warn!(descriptor = %name, kind, "skipping undecodable metadata record"),
        }
    }
    Ok(descriptors)
}

pub fn render_library_record(descriptor: &Descriptor) -> R<Vec<u8>> {
    let name = utf16z(&descriptor.name);
    let value = descriptor.value.encode(false);
    let name_len = u16::try_from(name.len()).map_err(|_| Error::cannot_write("descriptor name too long"))?;
    let value_len = u32::try_from(value.len())
        .map_err(|_| Error::cannot_write(format!("{} does not fit a metadata record", descriptor.name)))?;
    let mut out = Vec::with_capacity(12 + name.len() + value.len());
    out.extend_from_slice(&descriptor.language.to_le_bytes());
    out.extend_from_slice(&descriptor.stream.to_le_bytes());
    out.extend_from_slice(&name_len.to_le_bytes());
    out.extend_from_slice(&descriptor.value.type_code().to_le_bytes());
    out.extend_from_slice(&value_len.to_le_bytes());
    out.extend(name);
    out.extend(value);
    Ok(out)
}

/// Offset just past the double-null terminator of the UTF-16 string at the
/// start of `data`. Terminators are only matched on two-byte boundaries.
fn utf16_terminator(data: &[u8]) -> Option<usize> {
    data.chunks_exact(2)
        .position(|pair| pair == [0, 0])
        .map(|units| units * 2 + 2)
}

/// Decode a `WM/Picture` value: type, image size, mime, description, image.
pub fn parse_picture(value: &[u8]) -> R<Artwork> {
    let mut view = ByteView::new(value);
    let picture_type = view.u8()?;
    let size = view.u32_le()? as usize;
    let rest = view.rest();

    let mime_end = utf16_terminator(rest).ok_or_else(|| Error::cannot_read("WM/Picture mime type is not terminated"))?;
    let mime_type = utf16(&rest[..mime_end - 2], false);
    let rest = &rest[mime_end..];
    let desc_end =
        utf16_terminator(rest).ok_or_else(|| Error::cannot_read("WM/Picture description is not terminated"))?;
    let description = utf16(&rest[..desc_end - 2], false);
    let image = &rest[desc_end..];
    if image.len() < size {
        return Err(Error::cannot_read(format!(
            "WM/Picture declares {} image bytes, {} present",
            size,
            image.len()
        )));
    }

    Ok(Artwork {
        mime_type,
        description,
        picture_type,
        data: image[..size].to_vec(),
        range: None,
    })
}

pub fn render_picture(art: &Artwork) -> Vec<u8> {
    let mut out = vec![art.picture_type];
    out.extend_from_slice(&(art.data.len() as u32).to_le_bytes());
    out.extend(utf16z(&art.mime_type));
    out.extend(utf16z(&art.description));
    out.extend_from_slice(&art.data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_description_skips_empty_fields() {
        let fields = [
            "Title".to_string(),
            String::new(),
            "(c) 2001".to_string(),
            String::new(),
            String::new(),
        ];
        let payload = render_content_description(&fields).unwrap();
        assert_eq!(&payload[0..4], &[12, 0, 0, 0]);
        assert_eq!(parse_content_description(&payload, 0).unwrap(), fields);
    }

    #[test]
    fn extended_descriptor_types() {
        let descriptors = [
            Descriptor::new("WM/AlbumTitle", DescriptorValue::Text("Album".into())),
            Descriptor::new("WM/TrackNumber", DescriptorValue::DWord(7)),
            Descriptor::new("IsVBR", DescriptorValue::Bool(true)),
            Descriptor::new("WM/Year", DescriptorValue::Word(1999)),
        ];
        let mut payload = (descriptors.len() as u16).to_le_bytes().to_vec();
        for d in &descriptors {
            payload.extend(render_extended_record(d).unwrap());
        }
        let parsed = parse_extended(&payload, 100).unwrap();
        assert_eq!(parsed.len(), 4);
        assert_eq!(parsed[0].value.as_text().as_deref(), Some("Album"));
        assert_eq!(parsed[1].value, DescriptorValue::DWord(7));
        assert_eq!(parsed[2].value, DescriptorValue::Bool(true));
        assert_eq!(parsed[3].value.as_text().as_deref(), Some("1999"));
        assert_eq!(parsed[0].record.as_ref().map(|r| r.start), Some(102));
    }

    #[test]
    fn truncated_descriptor_is_cannot_read() {
        let mut payload = 1u16.to_le_bytes().to_vec();
        payload.extend(render_extended_record(&Descriptor::new("WM/Genre", DescriptorValue::Text("Rock".into()))).unwrap());
        payload.truncate(payload.len() - 3);
        assert!(parse_extended(&payload, 0).unwrap_err().is_cannot_read());
    }

    #[test]
    fn library_record_carries_large_values() {
        let mut record = Descriptor::new("WM/Picture", DescriptorValue::Binary(vec![7u8; 70_000]));
        record.stream = 1;
        let mut payload = 1u16.to_le_bytes().to_vec();
        payload.extend(render_library_record(&record).unwrap());
        let parsed = parse_metadata_library(&payload, 0).unwrap();
        assert_eq!(parsed[0].stream, 1);
        assert_eq!(parsed[0].value, record.value);
        assert!(render_extended_record(&record).is_err());
    }

    #[test]
    fn picture_terminators_are_two_byte_aligned() {
        // "a\u{100}" encodes as 61 00 00 01: a zero pair at an odd offset
        let art = Artwork {
            mime_type: "image/png".to_string(),
            description: "a\u{100}".to_string(),
            picture_type: 3,
            data: vec![0, 0, 1, 2],
            range: None,
        };
        let bytes = render_picture(&art);
        assert_eq!(parse_picture(&bytes).unwrap(), art);
        assert_eq!(parse_picture(&bytes).unwrap().description, "a\u{100}");
    }

    #[test]
    fn picture_shorter_than_declared_is_rejected() {
        let mut bytes = render_picture(&Artwork::new("image/jpeg", vec![0xFF; 10]));
        bytes.truncate(bytes.len() - 4);
        assert!(parse_picture(&bytes).is_err());
    }
}
