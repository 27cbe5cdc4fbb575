//! Read/write options, loadable from TOML.

use serde::Deserialize;
use std::path::Path;

use crate::error::{Error, Result};

/// Files larger than this are memory-mapped instead of read into memory.
pub const DEFAULT_MMAP_THRESHOLD: u64 = 100 * 1024 * 1024;
pub const DEFAULT_PADDING: u32 = 4096;
pub const DEFAULT_VENDOR: &str = "tagcodex";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CodexConfig {
    pub read: ReadConfig,
    pub write: WriteConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReadConfig {
    /// Keep COVER_ART values in tags returned to the caller
    pub artwork: bool,
    pub mmap_threshold: u64,
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            artwork: true,
            mmap_threshold: DEFAULT_MMAP_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WriteConfig {
    /// Padding reserved when a metadata region has to grow (FLAC, ID3v2)
    pub padding: u32,
    /// Vendor string for Vorbis comment blocks created from scratch
    pub vendor: String,
}

impl Default for WriteConfig {
    fn default() -> Self {
        Self {
            padding: DEFAULT_PADDING,
            vendor: DEFAULT_VENDOR.to_string(),
        }
    }
}

impl CodexConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text)
            .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = CodexConfig::from_toml_str("").unwrap();
        assert_eq!(config, CodexConfig::default());
        assert!(config.read.artwork);
        assert_eq!(config.write.padding, DEFAULT_PADDING);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = CodexConfig::from_toml_str(
            "[read]\nartwork = false\n\n[write]\npadding = 1024\n",
        )
        .unwrap();
        assert!(!config.read.artwork);
        assert_eq!(config.read.mmap_threshold, DEFAULT_MMAP_THRESHOLD);
        assert_eq!(config.write.padding, 1024);
        assert_eq!(config.write.vendor, DEFAULT_VENDOR);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(CodexConfig::from_toml_str("[read\nartwork = ").is_err());
    }
}
