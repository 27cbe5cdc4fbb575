//! VBR headers stored in the first MPEG frame: Xing/Info (with the LAME
//! extension) and Fraunhofer VBRI.

use crate::prelude::*;

use super::{ChannelMode, FrameHeader, MpegVersion};

const XING_ID: &[u8; 4] = b"Xing";
const INFO_ID: &[u8; 4] = b"Info";
const VBRI_ID: &[u8; 4] = b"VBRI";

const FLAG_FRAMES: u32 = 0x0001;
const FLAG_BYTES: u32 = 0x0002;
const FLAG_TOC: u32 = 0x0004;
const FLAG_QUALITY: u32 = 0x0008;

/// Identifier, flags, frames, bytes, TOC and quality.
const XING_BLOCK_LEN: usize = 120;
const LAME_LEN: usize = 24;
const TOC_LEN: usize = 100;

/// VBRI sits right after a 32 byte side info block regardless of the channel mode.
pub const VBRI_OFFSET: usize = 36;

/// Offset of the Xing/Info identifier from the start of the frame.
pub fn xing_offset(version: MpegVersion, mode: ChannelMode) -> usize {
    match (version, mode) {
        (MpegVersion::Mpeg1, ChannelMode::Mono) => 21,
        (MpegVersion::Mpeg1, _) => 36,
        (_, ChannelMode::Mono) => 13,
        (_, _) => 21,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LameHeader {
    pub encoder: String,
    pub vbr_method: u8,
    pub lowpass_hz: u32,
    pub encoder_delay: u16,
    pub encoder_padding: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XingHeader {
    /// `Xing` marks a VBR stream, `Info` a CBR one
    pub vbr: bool,
    pub frames: Option<u32>,
    pub bytes: Option<u32>,
    pub toc: Option<Vec<u8>>,
    pub quality: Option<u32>,
    pub lame: Option<LameHeader>,
}

impl XingHeader {
    pub fn id(&self) -> &'static [u8; 4] {
        if self.vbr { XING_ID } else { INFO_ID }
    }

    /// Look for a Xing/Info header in `frame`, which starts at `frame_offset` in the file.
    ///
    /// `Ok(None)` means the frame carries no header. A header whose flagged
    /// fields run past the end of the frame is an [`Error::InvalidFrame`].
    pub fn parse(frame: &[u8], header: &FrameHeader, frame_offset: u64) -> R<Option<XingHeader>> {
        let offset = xing_offset(header.version, header.channel_mode);
        let vbr = match frame.get(offset..offset + 4) {
            Some(id) if id == XING_ID => true,
            Some(id) if id == INFO_ID => false,
            _ => return Ok(None),
        };

        let invalid = |e: Error| -> Error {
            let reason = format!("Xing header does not fit the frame: {}", e);
            Error::invalid_frame(frame_offset + offset as u64, reason)
        };

        let mut view = ByteView::at(&frame[offset + 4..], frame_offset + offset as u64 + 4);
        let flags = view.u32_be().map_err(invalid)?;

        let frames = if flags & FLAG_FRAMES != 0 {
            Some(view.u32_be().map_err(invalid)?)
        } else {
            None
        };
        let bytes = if flags & FLAG_BYTES != 0 {
            Some(view.u32_be().map_err(invalid)?)
        } else {
            None
        };
        let toc = if flags & FLAG_TOC != 0 {
            Some(view.bytes(TOC_LEN).map_err(invalid)?.to_vec())
        } else {
            None
        };
        let quality = if flags & FLAG_QUALITY != 0 {
            Some(view.u32_be().map_err(invalid)?)
        } else {
            None
        };

        let lame = frame
            .get(offset + XING_BLOCK_LEN..)
            .and_then(LameHeader::parse);

        tracing::debug!(vbr, ?frames, ?bytes, lame = lame.is_some(), "Xing header");
        Ok(Some(XingHeader {
            vbr,
            frames,
            bytes,
            toc,
            quality,
            lame,
        }))
    }
}

impl LameHeader {
    fn parse(data: &[u8]) -> Option<LameHeader> {
        if data.len() < LAME_LEN || !matches!(&data[0..4], b"LAME" | b"Lavf" | b"Lavc") {
            return None;
        }
        let encoder = String::from_utf8_lossy(&data[0..9])
            .trim_end_matches(['\0', ' '])
            .to_string();
        let gapless = &data[21..24];
        Some(LameHeader {
            encoder,
            vbr_method: data[9] & 0x0F,
            lowpass_hz: data[10] as u32 * 100,
            encoder_delay: ((gapless[0] as u16) << 4) | ((gapless[1] as u16) >> 4),
            encoder_padding: (((gapless[1] & 0x0F) as u16) << 8) | gapless[2] as u16,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VbriHeader {
    pub version: u16,
    pub delay: u16,
    pub quality: u16,
    pub bytes: u32,
    pub frames: u32,
}

impl VbriHeader {
    pub fn parse(frame: &[u8], frame_offset: u64) -> R<Option<VbriHeader>> {
        if frame.get(VBRI_OFFSET..VBRI_OFFSET + 4) != Some(&VBRI_ID[..]) {
            return Ok(None);
        }
        let mut view = ByteView::at(&frame[VBRI_OFFSET + 4..], frame_offset + VBRI_OFFSET as u64 + 4);
        let read = |view: &mut ByteView<'_>| -> R<VbriHeader> {
            Ok(VbriHeader {
                version: view.u16_be()?,
                delay: view.u16_be()?,
                quality: view.u16_be()?,
                bytes: view.u32_be()?,
                frames: view.u32_be()?,
            })
        };
        read(&mut view)
            .map(Some)
            .map_err(|e| Error::invalid_frame(frame_offset + VBRI_OFFSET as u64, e.to_string()))
    }
}
