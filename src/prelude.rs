pub use crate::Codec;
pub use crate::chunk::{ByteView, Chunk, ChunkId, SizeWidth, fourcc_to_string, scan_iff};
pub use crate::config::WriteConfig;
pub use crate::error::{Error, Result as R};
pub use crate::header::{AudioFormat, FormatDetails, GenericAudioHeader};
pub use crate::tag::{Artwork, FieldKey, FieldValue, Tag};
pub use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

pub use std::io::{Cursor, Read, Seek, SeekFrom, Write};
