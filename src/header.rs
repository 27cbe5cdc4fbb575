//! Normalized technical stream info.

use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::Range;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AudioFormat {
    Aiff,
    Flac,
    Mp4,
    Mp3,
    Ogg,
    Asf,
    Dff,
    Real,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 8] = [
        AudioFormat::Aiff,
        AudioFormat::Flac,
        AudioFormat::Mp4,
        AudioFormat::Mp3,
        AudioFormat::Ogg,
        AudioFormat::Asf,
        AudioFormat::Dff,
        AudioFormat::Real,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AudioFormat::Aiff => "AIFF",
            AudioFormat::Flac => "FLAC",
            AudioFormat::Mp4 => "MP4",
            AudioFormat::Mp3 => "MP3",
            AudioFormat::Ogg => "Ogg",
            AudioFormat::Asf => "ASF",
            AudioFormat::Dff => "DFF",
            AudioFormat::Real => "RealAudio",
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            AudioFormat::Aiff => &["aif", "aiff", "aifc"],
            AudioFormat::Flac => &["flac"],
            AudioFormat::Mp4 => &["m4a", "m4b", "m4p", "mp4"],
            AudioFormat::Mp3 => &["mp3"],
            AudioFormat::Ogg => &["ogg", "oga", "opus"],
            AudioFormat::Asf => &["wma", "asf"],
            AudioFormat::Dff => &["dff"],
            AudioFormat::Real => &["ra", "rm", "rmvb"],
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|format| format.extensions().contains(&ext.as_str()))
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenericAudioHeader {
    pub format: AudioFormat,
    /// Human readable codec label, e.g. "AAC LC" or "Big-endian PCM"
    pub encoding: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// `None` when the stream length cannot be determined
    #[serde(rename = "duration_secs", serialize_with = "serialize_duration")]
    pub duration: Option<Duration>,
    /// Kilobits per second
    pub bitrate: u32,
    pub vbr: bool,
    pub lossless: bool,
    pub total_samples: Option<u64>,
    /// Byte range of the encoded audio in the source
    pub audio_range: Option<Range<u64>>,
    pub details: FormatDetails,
}

impl GenericAudioHeader {
    pub fn new(format: AudioFormat, details: FormatDetails) -> Self {
        Self {
            format,
            encoding: String::new(),
            sample_rate: 0,
            channels: 0,
            bits_per_sample: 0,
            duration: None,
            bitrate: 0,
            vbr: false,
            lossless: false,
            total_samples: None,
            audio_range: None,
            details,
        }
    }

    pub fn duration_secs(&self) -> Option<f64> {
        self.duration.map(|d| d.as_secs_f64())
    }

    /// Set the duration from fractional seconds; values a `Duration` cannot hold leave it unknown.
    pub fn set_duration_secs(&mut self, secs: f64) {
        self.duration = Duration::try_from_secs_f64(secs).ok();
    }

    /// Fill duration from a sample count when the rate is known.
    pub fn set_duration_from_samples(&mut self, samples: u64) {
        self.total_samples = Some(samples);
        if self.sample_rate > 0 {
            self.set_duration_secs(samples as f64 / self.sample_rate as f64);
        }
    }

    pub fn audio_bytes(&self) -> Option<u64> {
        self.audio_range.as_ref().map(|r| r.end - r.start)
    }

    /// Average bitrate of the audio region, when both its size and the duration are known.
    pub fn average_bitrate(&self) -> Option<u32> {
        let secs = self.duration_secs()?;
        let bytes = self.audio_bytes()?;
        if secs <= 0.0 {
            return None;
        }
        Some((bytes as f64 * 8.0 / secs / 1000.0).round() as u32)
    }
}

fn serialize_duration<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(d) => s.serialize_some(&d.as_secs_f64()),
        None => s.serialize_none(),
    }
}

/// Per-format technical view carried alongside the normalized fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum FormatDetails {
    Aiff(AiffDetails),
    Flac(FlacDetails),
    Mp4(Mp4Details),
    Mp3(Mp3Details),
    Ogg(OggDetails),
    Asf(AsfDetails),
    Dff(DffDetails),
    Real(RealDetails),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AiffDetails {
    pub aifc: bool,
    pub compression: String,
    pub compression_name: String,
    pub little_endian: bool,
    pub sample_frames: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FlacDetails {
    pub min_block_size: u16,
    pub max_block_size: u16,
    pub min_frame_size: u32,
    pub max_frame_size: u32,
    pub md5: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Mp4Details {
    pub kind: String,
    pub object_type: Option<u8>,
    pub audio_profile: Option<String>,
    pub max_bitrate: Option<u32>,
    pub avg_bitrate: Option<u32>,
    pub timescale: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Mp3Details {
    pub version: String,
    pub layer: u8,
    pub channel_mode: String,
    pub first_frame_offset: u64,
    /// "Xing", "Info" or "VBRI"
    pub vbr_header: Option<String>,
    pub frames: Option<u32>,
    pub quality: Option<u32>,
    pub encoder: Option<String>,
    pub encoder_delay: Option<u16>,
    pub encoder_padding: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OggDetails {
    pub codec: String,
    pub serial: u32,
    pub vendor: String,
    pub bitrate_maximum: Option<i32>,
    pub bitrate_nominal: Option<i32>,
    pub bitrate_minimum: Option<i32>,
    pub pre_skip: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AsfDetails {
    pub codec_id: u16,
    pub preroll_ms: u64,
    pub file_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DffDetails {
    pub version: Option<String>,
    pub compression: String,
    pub dst_frames: Option<u32>,
    pub dst_frame_rate: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RealDetails {
    pub mime_type: Option<String>,
    pub max_bitrate: u32,
}
