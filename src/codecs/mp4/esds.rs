//! Elementary stream descriptor (`esds`) chain.
//!
//! ES descriptor, then decoder config (object type, bitrates), then the
//! decoder specific info (AudioSpecificConfig) and the SL config.

use crate::prelude::*;

const ES_DESCRIPTOR_TAG: u8 = 0x03;
const DECODER_CONFIG_TAG: u8 = 0x04;
const DECODER_SPECIFIC_TAG: u8 = 0x05;
const SL_CONFIG_TAG: u8 = 0x06;

/// Prefix bytes some encoders put before the real section length.
const FILLER_BYTES: [u8; 3] = [0x80, 0x81, 0xFE];

const AAC_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EsDescriptor {
    pub es_id: u16,
    pub object_type: Option<u8>,
    pub stream_type: Option<u8>,
    pub buffer_size: u32,
    pub max_bitrate: u32,
    pub avg_bitrate: u32,
    pub audio_object_type: Option<u8>,
    pub sample_rate: Option<u32>,
    pub channel_config: Option<u8>,
    pub sl_predefined: Option<u8>,
}

impl EsDescriptor {
    pub fn audio_profile(&self) -> Option<&'static str> {
        audio_profile(self.audio_object_type?)
    }

    /// Codec family from the decoder config object type.
    pub fn codec_name(&self) -> Option<&'static str> {
        let name = match self.object_type? {
            0x40 => "AAC",
            0x66..=0x68 => "MPEG-2 AAC",
            0x69 | 0x6B => "MP3",
            0xA5 => "AC-3",
            0xA6 => "E-AC-3",
            0xAD => "Opus",
            _ => return None,
        };
        Some(name)
    }
}

pub fn audio_profile(object_type: u8) -> Option<&'static str> {
    let name = match object_type {
        1 => "AAC Main",
        2 => "AAC LC",
        3 => "AAC SSR",
        4 => "AAC LTP",
        5 => "HE-AAC (SBR)",
        6 => "AAC Scalable",
        17 => "ER AAC LC",
        19 => "ER AAC LTP",
        20 => "ER AAC Scalable",
        23 => "ER AAC LD",
        29 => "HE-AAC v2 (PS)",
        39 => "ER AAC ELD",
        42 => "USAC",
        _ => return None,
    };
    Some(name)
}

/// Section header: tag byte, up to three filler bytes, then the length byte.
fn section(view: &mut ByteView<'_>) -> R<(u8, usize)> {
    let tag = view.u8()?;
    let mut skipped = 0;
    while skipped < FILLER_BYTES.len() {
        match view.peek(1) {
            Some([b]) if FILLER_BYTES.contains(b) => {
                view.skip(1)?;
                skipped += 1;
            }
            _ => break,
        }
    }
    let len = view.u8()? as usize;
    Ok((tag, len))
}

struct Bits<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Bits<'_> {
    fn read(&mut self, count: usize) -> Option<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            let byte = *self.data.get(self.pos / 8)?;
            let bit = (byte >> (7 - self.pos % 8)) & 1;
            value = (value << 1) | bit as u32;
            self.pos += 1;
        }
        Some(value)
    }
}

/// Audio object type, sample rate and channel configuration from an AudioSpecificConfig.
fn audio_specific_config(data: &[u8]) -> Option<(u8, Option<u32>, u8)> {
    let mut bits = Bits { data, pos: 0 };
    let mut object_type = bits.read(5)?;
    if object_type == 31 {
        object_type = 32 + bits.read(6)?;
    }
    let rate_index = bits.read(4)? as usize;
    let sample_rate = if rate_index == 15 {
        Some(bits.read(24)?)
    } else {
        AAC_SAMPLE_RATES.get(rate_index).copied()
    };
    let channels = bits.read(4)? as u8;
    Some((object_type as u8, sample_rate, channels))
}

/// Parse an `esds` payload (version and flags included).
pub fn parse(payload: &[u8], base: u64) -> R<EsDescriptor> {
    let mut view = ByteView::at(payload, base);
    view.skip(4)?;

    let (tag, _) = section(&mut view)?;
    if tag != ES_DESCRIPTOR_TAG {
        return Err(Error::cannot_read(format!("esds starts with descriptor tag {:#04x}", tag)).at_offset(base));
    }

    let mut es = EsDescriptor {
        es_id: view.u16_be()?,
        ..Default::default()
    };
    let flags = view.u8()?;
    if flags & 0x80 != 0 {
        view.skip(2)?;
    }
    if flags & 0x40 != 0 {
        let url_len = view.u8()? as usize;
        view.skip(url_len)?;
    }
    if flags & 0x20 != 0 {
        view.skip(2)?;
    }

    while view.remaining() >= 2 {
        let (tag, len) = section(&mut view)?;
        let len = len.min(view.remaining());
        match tag {
            DECODER_CONFIG_TAG => {
                // the decoder specific section nests inside the decoder config
                es.object_type = Some(view.u8()?);
                es.stream_type = Some(view.u8()? >> 2);
                es.buffer_size = view.u24_be()?;
                es.max_bitrate = view.u32_be()?;
                es.avg_bitrate = view.u32_be()?;
            }
            DECODER_SPECIFIC_TAG => {
                let config = view.bytes(len)?;
                if let Some((object_type, rate, channels)) = audio_specific_config(config) {
                    es.audio_object_type = Some(object_type);
                    es.sample_rate = rate;
                    es.channel_config = Some(channels);
                }
            }
            SL_CONFIG_TAG => {
                let sl = view.bytes(len)?;
                es.sl_predefined = sl.first().copied();
            }
            _ => view.skip(len)?,
        }
    }

    tracing::trace!(object_type = ?es.object_type, avg = es.avg_bitrate, "esds");
    Ok(es)
}
