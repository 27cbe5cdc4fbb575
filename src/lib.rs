pub mod chunk;
pub mod codecs;
pub mod config;
pub mod error;
pub mod header;
mod prelude;
pub mod source;
pub mod tag;

use std::path::{Path, PathBuf};

use crate::chunk::ChunkSummary;
use crate::config::CodexConfig;
use crate::prelude::*;
use crate::source::ByteSource;

pub use crate::codecs::{codec_for, get_codec, probe};
pub use crate::error::{Error, Result};
pub use crate::header::{AudioFormat, GenericAudioHeader};
pub use crate::tag::{Artwork, FieldKey, FieldValue, Tag};

/// One container format: reader, field mapper and (where supported) writer.
///
/// Every method takes the whole file as a byte slice and is stateless, so a codec
/// can be shared across threads. Writers return the complete new file.
pub trait Codec: Send + Sync {
    fn format(&self) -> AudioFormat;

    fn validate_file_format(&self, data: &[u8]) -> R<()>;

    /// Top-level framing units (with children where the format nests).
    fn chunks<'a>(&self, data: &'a [u8]) -> R<Vec<Chunk<'a>>>;

    fn read_header(&self, data: &[u8]) -> R<GenericAudioHeader>;

    fn read_tag(&self, data: &[u8]) -> R<Tag>;

    fn write_tag(&self, data: &[u8], tag: &Tag, config: &WriteConfig) -> R<Vec<u8>>;

    fn delete_tag(&self, data: &[u8], config: &WriteConfig) -> R<Vec<u8>> {
        self.write_tag(data, &Tag::new(), config)
    }
}

/// File-level facade. Each call opens its own byte source and releases it before returning.
pub struct AudioFile {
    path: PathBuf,
    codec: Box<dyn Codec>,
    config: CodexConfig,
}

impl AudioFile {
    /// Pick a codec by extension, falling back to the file signature.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Input file does not exist: {}", path.display()),
            )));
        }

        let codec = match get_codec(&path) {
            Ok(codec) => codec,
            Err(Error::UnsupportedFormat(_)) => {
                let config = CodexConfig::default();
                let source = ByteSource::open(&path, config.read.mmap_threshold)?;
                let format = probe(&source).ok_or_else(|| {
                    Error::UnsupportedFormat(format!("unrecognized file: {}", path.display()))
                })?;
                codec_for(format)
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            path,
            codec,
            config: CodexConfig::default(),
        })
    }

    pub fn with_config(mut self, config: CodexConfig) -> Self {
        self.config = config;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> AudioFormat {
        self.codec.format()
    }

    pub fn get_filename(&self) -> &str {
        self.path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("unknown")
    }

    fn source(&self) -> Result<ByteSource> {
        ByteSource::open(&self.path, self.config.read.mmap_threshold)
    }

    pub fn header(&self) -> Result<GenericAudioHeader> {
        let source = self.source()?;
        self.codec.read_header(&source)
    }

    pub fn tag(&self) -> Result<Tag> {
        let source = self.source()?;
        let tag = self.codec.read_tag(&source)?;
        if self.config.read.artwork {
            Ok(tag)
        } else {
            Ok(tag.without_artwork())
        }
    }

    pub fn chunks_summary(&self) -> Result<Vec<ChunkSummary>> {
        let source = self.source()?;
        let chunks = self.codec.chunks(&source)?;
        Ok(chunks.iter().map(Chunk::summary).collect())
    }

    pub fn save_tag(&self, tag: &Tag) -> Result<()> {
        let output = {
            let source = self.source()?;
            self.codec.write_tag(&source, tag, &self.config.write)?
        };
        self.replace_contents(&output)
    }

    pub fn delete_tag(&self) -> Result<()> {
        let output = {
            let source = self.source()?;
            self.codec.delete_tag(&source, &self.config.write)?
        };
        self.replace_contents(&output)
    }

    /// Write next to the original, then rename over it. Copy when rename fails.
    fn replace_contents(&self, bytes: &[u8]) -> Result<()> {
        let temp_file = self
            .path
            .with_file_name(format!(".{}.tagcodex-tmp", self.get_filename()));
        if let Err(e) = std::fs::write(&temp_file, bytes) {
            remove_temp(&temp_file);
            return Err(e.into());
        }

        match std::fs::rename(&temp_file, &self.path) {
            Ok(_) => Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, "rename failed, copying instead");
                let copied = std::fs::copy(&temp_file, &self.path);
                remove_temp(&temp_file);
                copied.map(|_| ()).map_err(Error::from)
            }
        }
    }
}

fn remove_temp(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "could not remove temporary file");
        }
    }
}
