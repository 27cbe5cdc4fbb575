use std::path::Path;

use encoding_rs::{UTF_16BE, UTF_16LE, WINDOWS_1252};

use crate::prelude::*;
mod aiff;
mod asf;
mod dff;
mod flac;
pub mod id3;
mod mp3;
mod mp4;
mod ogg;
mod real;
pub mod vorbis;
pub use aiff::AiffCodec;
pub use asf::AsfCodec;
pub use dff::DffCodec;
pub use flac::FlacCodec;
pub use mp3::Mp3Codec;
pub use mp4::Mp4Codec;
pub use ogg::OggCodec;
pub use real::RealCodec;

pub fn get_codec<P: AsRef<Path>>(file_path: P) -> R<Box<dyn Codec>> {
    let extension = file_path
        .as_ref()
        .extension()
        .and_then(|ext| ext.to_str())
        .ok_or_else(|| Error::UnsupportedFormat("Invalid file extension".to_string()))?;

    match AudioFormat::from_extension(extension) {
        Some(format) => Ok(codec_for(format)),
        None => Err(Error::UnsupportedFormat(format!(
            "No codec found for extension: {}",
            extension
        ))),
    }
}

pub fn codec_for(format: AudioFormat) -> Box<dyn Codec> {
    match format {
        AudioFormat::Aiff => Box::new(AiffCodec),
        AudioFormat::Flac => Box::new(FlacCodec),
        AudioFormat::Mp4 => Box::new(Mp4Codec),
        AudioFormat::Mp3 => Box::new(Mp3Codec),
        AudioFormat::Ogg => Box::new(OggCodec),
        AudioFormat::Asf => Box::new(AsfCodec),
        AudioFormat::Dff => Box::new(DffCodec),
        AudioFormat::Real => Box::new(RealCodec),
    }
}

/// Identify a container from its leading bytes.
pub fn probe(data: &[u8]) -> Option<AudioFormat> {
    if data.len() >= 12 && &data[0..4] == b"FORM" && matches!(&data[8..12], b"AIFF" | b"AIFC") {
        return Some(AudioFormat::Aiff);
    }
    if data.len() >= 16 && &data[0..4] == b"FRM8" && &data[12..16] == b"DSD " {
        return Some(AudioFormat::Dff);
    }
    if data.starts_with(b"fLaC") {
        return Some(AudioFormat::Flac);
    }
    if data.starts_with(b"OggS") {
        return Some(AudioFormat::Ogg);
    }
    if data.len() >= 16 && data[0..16] == asf::HEADER_OBJECT_GUID {
        return Some(AudioFormat::Asf);
    }
    if data.starts_with(b".RMF") || data.starts_with(b".ra\xfd") {
        return Some(AudioFormat::Real);
    }
    if data.len() >= 8 && &data[4..8] == b"ftyp" {
        return Some(AudioFormat::Mp4);
    }
    if let Some(tag_len) = id3::tag_len(data) {
        // FLAC files sometimes carry a leading ID3v2 tag
        if data.get(tag_len..tag_len + 4) == Some(&b"fLaC"[..]) {
            return Some(AudioFormat::Flac);
        }
        return Some(AudioFormat::Mp3);
    }
    if data.len() >= 2 && data[0] == 0xFF && data[1] & 0xE0 == 0xE0 {
        return Some(AudioFormat::Mp3);
    }
    None
}

pub(crate) fn latin1(bytes: &[u8]) -> String {
    WINDOWS_1252.decode_without_bom_handling(bytes).0.into_owned()
}

/// `None` when the text has characters outside the single-byte charset.
pub(crate) fn encode_latin1(text: &str) -> Option<Vec<u8>> {
    let (bytes, _, had_errors) = WINDOWS_1252.encode(text);
    if had_errors {
        None
    } else {
        Some(bytes.into_owned())
    }
}

pub(crate) fn utf16(bytes: &[u8], big_endian: bool) -> String {
    let encoding = if big_endian { UTF_16BE } else { UTF_16LE };
    encoding.decode_without_bom_handling(bytes).0.into_owned()
}

/// UTF-16 with an optional byte order mark, little-endian when there is none.
pub(crate) fn utf16_bom(bytes: &[u8]) -> String {
    UTF_16LE.decode(bytes).0.into_owned()
}

pub(crate) fn encode_utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|unit| unit.to_le_bytes()).collect()
}

pub(crate) fn trim_text(text: &str) -> String {
    text.trim_end_matches('\0').trim().to_string()
}

pub(crate) fn utf8_lossy(bytes: &[u8]) -> String {
    trim_text(&String::from_utf8_lossy(bytes))
}
