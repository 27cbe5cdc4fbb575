//! Format-independent tag model.
//!
//! A [`Tag`] is an ordered multimap from [`FieldKey`] to one or more values. Each
//! format's field mapper fills one on read and consumes one on write.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldKey {
    Title,
    Artist,
    Album,
    AlbumArtist,
    Track,
    Disc,
    Year,
    Genre,
    Comment,
    Composer,
    Copyright,
    Encoder,
    Lyrics,
    Grouping,
    Bpm,
    Isrc,
    CoverArt,
}

impl FieldKey {
    pub const ALL: [FieldKey; 17] = [
        FieldKey::Title,
        FieldKey::Artist,
        FieldKey::Album,
        FieldKey::AlbumArtist,
        FieldKey::Track,
        FieldKey::Disc,
        FieldKey::Year,
        FieldKey::Genre,
        FieldKey::Comment,
        FieldKey::Composer,
        FieldKey::Copyright,
        FieldKey::Encoder,
        FieldKey::Lyrics,
        FieldKey::Grouping,
        FieldKey::Bpm,
        FieldKey::Isrc,
        FieldKey::CoverArt,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FieldKey::Title => "TITLE",
            FieldKey::Artist => "ARTIST",
            FieldKey::Album => "ALBUM",
            FieldKey::AlbumArtist => "ALBUM_ARTIST",
            FieldKey::Track => "TRACK",
            FieldKey::Disc => "DISC",
            FieldKey::Year => "YEAR",
            FieldKey::Genre => "GENRE",
            FieldKey::Comment => "COMMENT",
            FieldKey::Composer => "COMPOSER",
            FieldKey::Copyright => "COPYRIGHT",
            FieldKey::Encoder => "ENCODER",
            FieldKey::Lyrics => "LYRICS",
            FieldKey::Grouping => "GROUPING",
            FieldKey::Bpm => "BPM",
            FieldKey::Isrc => "ISRC",
            FieldKey::CoverArt => "COVER_ART",
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FieldKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        FieldKey::ALL
            .into_iter()
            .find(|key| key.name() == wanted)
            .ok_or_else(|| format!("unknown field '{}'", s))
    }
}

/// Embedded picture.
///
/// The image bytes are copied out of the source so a `Tag` outlives the byte
/// source it was read from. `range` records where those bytes sit in the source
/// file (FLAC, MP4 and ASF readers), so callers that only need the location can
/// read with `ReadConfig.artwork` off and re-slice the file themselves.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Artwork {
    pub mime_type: String,
    pub description: String,
    /// ID3/FLAC picture type, 3 = front cover
    pub picture_type: u8,
    #[serde(rename = "size", serialize_with = "serialize_len")]
    pub data: Vec<u8>,
    #[serde(skip)]
    pub range: Option<Range<u64>>,
}

impl Artwork {
    pub const FRONT_COVER: u8 = 3;

    pub fn new(mime_type: &str, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.to_string(),
            description: String::new(),
            picture_type: Self::FRONT_COVER,
            data,
            range: None,
        }
    }

    /// Guess a mime type from the image signature.
    pub fn sniff_mime(data: &[u8]) -> &'static str {
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            "image/jpeg"
        } else if data.starts_with(b"\x89PNG\r\n\x1a\n") {
            "image/png"
        } else if data.starts_with(b"GIF8") {
            "image/gif"
        } else if data.starts_with(b"BM") {
            "image/bmp"
        } else {
            "application/octet-stream"
        }
    }
}

// The source range is provenance, not content.
impl PartialEq for Artwork {
    fn eq(&self, other: &Self) -> bool {
        self.mime_type == other.mime_type
            && self.description == other.description
            && self.picture_type == other.picture_type
            && self.data == other.data
    }
}

fn serialize_len<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(data.len() as u64)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Artwork(Artwork),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            FieldValue::Artwork(_) => None,
        }
    }

    pub fn as_artwork(&self) -> Option<&Artwork> {
        match self {
            FieldValue::Artwork(art) => Some(art),
            FieldValue::Text(_) => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(text: &str) -> Self {
        FieldValue::Text(text.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(text: String) -> Self {
        FieldValue::Text(text)
    }
}

impl From<Artwork> for FieldValue {
    fn from(art: Artwork) -> Self {
        FieldValue::Artwork(art)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    entries: Vec<(FieldKey, FieldValue)>,
}

impl Tag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FieldKey, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    /// Distinct keys in first-seen order.
    pub fn keys(&self) -> Vec<FieldKey> {
        let mut keys = Vec::new();
        for (key, _) in &self.entries {
            if !keys.contains(key) {
                keys.push(*key);
            }
        }
        keys
    }

    pub fn contains(&self, key: FieldKey) -> bool {
        self.entries.iter().any(|(k, _)| *k == key)
    }

    /// Append a value. Empty text is ignored.
    pub fn add<V: Into<FieldValue>>(&mut self, key: FieldKey, value: V) {
        let value = value.into();
        if let FieldValue::Text(text) = &value {
            if text.is_empty() {
                return;
            }
        }
        tracing::trace!(field = %key, "mapped");
        self.entries.push((key, value));
    }

    /// Replace every value of `key` with a single text value, keeping its position.
    pub fn set<V: Into<FieldValue>>(&mut self, key: FieldKey, value: V) {
        let value = value.into();
        match self.entries.iter().position(|(k, _)| *k == key) {
            Some(index) => {
                self.entries[index].1 = value;
                let mut seen = 0;
                self.entries.retain(|(k, _)| {
                    if *k != key {
                        return true;
                    }
                    seen += 1;
                    seen == 1
                });
            }
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: FieldKey) {
        self.entries.retain(|(k, _)| *k != key);
    }

    pub fn get_all(&self, key: FieldKey) -> impl Iterator<Item = &FieldValue> {
        self.entries
            .iter()
            .filter(move |(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    pub fn first(&self, key: FieldKey) -> Option<&FieldValue> {
        self.get_all(key).next()
    }

    pub fn first_text(&self, key: FieldKey) -> Option<&str> {
        self.get_all(key).find_map(FieldValue::as_text)
    }

    pub fn texts(&self, key: FieldKey) -> Vec<&str> {
        self.get_all(key).filter_map(FieldValue::as_text).collect()
    }

    pub fn artworks(&self) -> impl Iterator<Item = &Artwork> {
        self.get_all(FieldKey::CoverArt)
            .filter_map(FieldValue::as_artwork)
    }

    /// Text fields only, artwork dropped.
    pub fn without_artwork(mut self) -> Self {
        self.remove(FieldKey::CoverArt);
        self
    }

    /// Append the values of every key this tag does not have yet.
    pub fn fill_missing(&mut self, other: &Tag) {
        let present = self.keys();
        for (key, value) in &other.entries {
            if !present.contains(key) {
                self.entries.push((*key, value.clone()));
            }
        }
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let keys = self.keys();
        let mut map = s.serialize_map(Some(keys.len()))?;
        for key in keys {
            let values: Vec<&FieldValue> = self.get_all(key).collect();
            map.serialize_entry(key.name(), &values)?;
        }
        map.end()
    }
}

/// Split "n/total" (or just "n") into its numbers.
pub fn parse_number_pair(text: &str) -> (Option<u32>, Option<u32>) {
    let mut parts = text.splitn(2, '/');
    let number = parts.next().and_then(|s| s.trim().parse().ok());
    let total = parts.next().and_then(|s| s.trim().parse().ok());
    (number, total)
}

/// Render a number/total pair: "" when both are zero, "n" without a total, "n/total" otherwise.
pub fn format_number_pair(number: u32, total: u32) -> String {
    match (number, total) {
        (0, 0) => String::new(),
        (n, 0) => n.to_string(),
        (n, t) => format!("{}/{}", n, t),
    }
}
