//! Vorbis comments and FLAC picture blocks, shared by the FLAC and Ogg codecs.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::codecs::trim_text;
use crate::prelude::*;
use crate::tag::{format_number_pair, parse_number_pair};

pub const PICTURE_KEY: &str = "METADATA_BLOCK_PICTURE";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VorbisComments {
    pub vendor: String,
    /// Comments in file order, keys as stored
    pub comments: Vec<(String, String)>,
}

fn read_len_prefixed<'a>(view: &mut ByteView<'a>) -> R<&'a [u8]> {
    let len = view.u32_le()? as usize;
    view.bytes(len)
}

impl VorbisComments {
    pub fn new(vendor: &str) -> Self {
        Self {
            vendor: vendor.to_string(),
            comments: Vec::new(),
        }
    }

    /// Parse a comment block (without the Vorbis packet type/magic or framing bit).
    pub fn parse(data: &[u8], base_offset: u64) -> R<Self> {
        let mut view = ByteView::at(data, base_offset);
        let vendor = String::from_utf8_lossy(read_len_prefixed(&mut view)?).to_string();
        let count = view.u32_le()? as usize;

        // Every comment needs at least its length field
        let mut comments = Vec::with_capacity(count.min(view.remaining() / 4));
        for _ in 0..count {
            let raw = read_len_prefixed(&mut view)?;
            let text = String::from_utf8_lossy(raw);
            match text.split_once('=') {
                Some((key, value)) => comments.push((key.to_string(), value.to_string())),
                None => tracing::warn!(comment = %text, "comment without '=', skipping"),
            }
        }
        Ok(Self { vendor, comments })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.vendor.len() as u32).to_le_bytes());
        out.extend_from_slice(self.vendor.as_bytes());
        out.extend_from_slice(&(self.comments.len() as u32).to_le_bytes());
        for (key, value) in &self.comments {
            let entry = format!("{}={}", key, value);
            out.extend_from_slice(&(entry.len() as u32).to_le_bytes());
            out.extend_from_slice(entry.as_bytes());
        }
        out
    }

    /// Field mapper: comments to generic fields, folding the separate total keys into "n/total".
    pub fn to_tag(&self) -> Tag {
        let mut tag = Tag::new();
        let mut track_total = None;
        let mut disc_total = None;

        for (key, value) in &self.comments {
            let upper = key.to_ascii_uppercase();
            match upper.as_str() {
                "TRACKTOTAL" | "TOTALTRACKS" => track_total = Some(trim_text(value)),
                "DISCTOTAL" | "TOTALDISCS" => disc_total = Some(trim_text(value)),
                PICTURE_KEY => match STANDARD.decode(value.trim()) {
                    Ok(bytes) => match parse_picture(&bytes) {
                        Ok(art) => tag.add(FieldKey::CoverArt, art),
                        Err(e) => tracing::warn!(error = %e, "skipping picture comment"),
                    },
                    Err(e) => tracing::warn!(error = %e, "picture comment is not base64"),
                },
                _ => {
                    if let Some(field) = comment_key(&upper) {
                        tag.add(field, trim_text(value));
                    }
                }
            }
        }

        fold_total(&mut tag, FieldKey::Track, track_total);
        fold_total(&mut tag, FieldKey::Disc, disc_total);
        tag
    }

    /// Rebuild the comment list for `tag`, keeping every comment that maps to no field.
    pub fn with_tag(&self, tag: &Tag) -> Self {
        let mut comments: Vec<(String, String)> = self
            .comments
            .iter()
            .filter(|(key, _)| !is_mapped_key(key))
            .cloned()
            .collect();

        for key in tag.keys() {
            match key {
                FieldKey::CoverArt => {
                    for art in tag.artworks() {
                        comments.push((PICTURE_KEY.to_string(), STANDARD.encode(picture_to_bytes(art))));
                    }
                }
                FieldKey::Track | FieldKey::Disc => {
                    let (number_key, total_key) = if key == FieldKey::Track {
                        ("TRACKNUMBER", "TRACKTOTAL")
                    } else {
                        ("DISCNUMBER", "DISCTOTAL")
                    };
                    for text in tag.texts(key) {
                        match parse_number_pair(text) {
                            (Some(number), Some(total)) => {
                                comments.push((number_key.to_string(), number.to_string()));
                                comments.push((total_key.to_string(), total.to_string()));
                            }
                            _ => comments.push((number_key.to_string(), text.to_string())),
                        }
                    }
                }
                _ => {
                    let name = field_comment_key(key);
                    for text in tag.texts(key) {
                        comments.push((name.to_string(), text.to_string()));
                    }
                }
            }
        }

        Self {
            vendor: self.vendor.clone(),
            comments,
        }
    }
}

fn fold_total(tag: &mut Tag, key: FieldKey, total: Option<String>) {
    let Some(total) = total.filter(|t| !t.is_empty()) else {
        return;
    };
    match tag.first_text(key).map(str::to_string) {
        Some(number) if !number.contains('/') => {
            let folded = match (number.parse::<u32>(), total.parse::<u32>()) {
                (Ok(n), Ok(t)) => format_number_pair(n, t),
                _ => format!("{}/{}", number, total),
            };
            tag.set(key, folded);
        }
        Some(_) => {}
        None => tag.add(key, format!("0/{}", total)),
    }
}

fn comment_key(upper: &str) -> Option<FieldKey> {
    let key = match upper {
        "TITLE" => FieldKey::Title,
        "ARTIST" => FieldKey::Artist,
        "ALBUM" => FieldKey::Album,
        "ALBUMARTIST" | "ALBUM ARTIST" | "ALBUM_ARTIST" => FieldKey::AlbumArtist,
        "TRACKNUMBER" => FieldKey::Track,
        "DISCNUMBER" => FieldKey::Disc,
        "DATE" | "YEAR" => FieldKey::Year,
        "GENRE" => FieldKey::Genre,
        "COMMENT" | "DESCRIPTION" => FieldKey::Comment,
        "COMPOSER" => FieldKey::Composer,
        "COPYRIGHT" => FieldKey::Copyright,
        "ENCODER" | "ENCODED-BY" => FieldKey::Encoder,
        "LYRICS" | "UNSYNCEDLYRICS" => FieldKey::Lyrics,
        "GROUPING" => FieldKey::Grouping,
        "BPM" => FieldKey::Bpm,
        "ISRC" => FieldKey::Isrc,
        _ => return None,
    };
    Some(key)
}

fn is_mapped_key(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    comment_key(&upper).is_some()
        || matches!(
            upper.as_str(),
            "TRACKTOTAL" | "TOTALTRACKS" | "DISCTOTAL" | "TOTALDISCS" | PICTURE_KEY
        )
}

fn field_comment_key(key: FieldKey) -> &'static str {
    match key {
        FieldKey::Title => "TITLE",
        FieldKey::Artist => "ARTIST",
        FieldKey::Album => "ALBUM",
        FieldKey::AlbumArtist => "ALBUMARTIST",
        FieldKey::Track => "TRACKNUMBER",
        FieldKey::Disc => "DISCNUMBER",
        FieldKey::Year => "DATE",
        FieldKey::Genre => "GENRE",
        FieldKey::Comment => "COMMENT",
        FieldKey::Composer => "COMPOSER",
        FieldKey::Copyright => "COPYRIGHT",
        FieldKey::Encoder => "ENCODER",
        FieldKey::Lyrics => "LYRICS",
        FieldKey::Grouping => "GROUPING",
        FieldKey::Bpm => "BPM",
        FieldKey::Isrc => "ISRC",
        FieldKey::CoverArt => PICTURE_KEY,
    }
}

/// Decode a FLAC PICTURE block body.
pub fn parse_picture(data: &[u8]) -> R<Artwork> {
    let mut view = ByteView::new(data);
    let picture_type = view.u32_be()?;
    let mime_len = view.u32_be()? as usize;
    let mime_type = String::from_utf8_lossy(view.bytes(mime_len)?).to_string();
    let desc_len = view.u32_be()? as usize;
    let description = String::from_utf8_lossy(view.bytes(desc_len)?).to_string();
    view.skip(16)?; // width, height, depth, colors
    let data_len = view.u32_be()? as usize;
    let image = view.bytes(data_len)?;

    Ok(Artwork {
        mime_type,
        description,
        picture_type: picture_type.min(u8::MAX as u32) as u8,
        data: image.to_vec(),
        range: None,
    })
}

/// Encode a FLAC PICTURE block body. Dimensions are left at zero.
pub fn picture_to_bytes(art: &Artwork) -> Vec<u8> {
    let mut out = Vec::with_capacity(32 + art.mime_type.len() + art.description.len() + art.data.len());
    out.extend_from_slice(&(art.picture_type as u32).to_be_bytes());
    for field in [art.mime_type.as_bytes(), art.description.as_bytes()] {
        out.extend_from_slice(&(field.len() as u32).to_be_bytes());
        out.extend_from_slice(field);
    }
    out.extend_from_slice(&[0u8; 16]); // width, height, depth, colors
    out.extend_from_slice(&(art.data.len() as u32).to_be_bytes());
    out.extend_from_slice(&art.data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comments(pairs: &[(&str, &str)]) -> VorbisComments {
        VorbisComments {
            vendor: "test".to_string(),
            comments: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn parse_and_serialize() {
        let block = comments(&[("TITLE", "Song"), ("artist", "Band")]);
        let parsed = VorbisComments::parse(&block.to_bytes(), 0).unwrap();
        assert_eq!(parsed, block);
    }

    #[test]
    fn truncated_block_is_an_error() {
        let mut bytes = comments(&[("TITLE", "Song")]).to_bytes();
        bytes.truncate(bytes.len() - 2);
        assert!(VorbisComments::parse(&bytes, 0).unwrap_err().is_cannot_read());
    }

    #[test]
    fn huge_comment_count_does_not_allocate() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(VorbisComments::parse(&bytes, 0).is_err());
    }

    #[test]
    fn totals_are_folded() {
        let tag = comments(&[
            ("TRACKNUMBER", "3"),
            ("TRACKTOTAL", "12"),
            ("DISCNUMBER", "1/2"),
            ("DISCTOTAL", "2"),
        ])
        .to_tag();
        assert_eq!(tag.first_text(FieldKey::Track), Some("3/12"));
        assert_eq!(tag.first_text(FieldKey::Disc), Some("1/2"));
    }

    #[test]
    fn rewrite_keeps_unmapped_and_splits_totals() {
        let original = comments(&[
            ("TITLE", "Old"),
            ("REPLAYGAIN_TRACK_GAIN", "-6.5 dB"),
            ("TRACKTOTAL", "9"),
        ]);
        let mut tag = Tag::new();
        tag.add(FieldKey::Title, "New");
        tag.add(FieldKey::Track, "2/9");

        let rewritten = original.with_tag(&tag);
        assert_eq!(
            rewritten.comments,
            vec![
                ("REPLAYGAIN_TRACK_GAIN".to_string(), "-6.5 dB".to_string()),
                ("TITLE".to_string(), "New".to_string()),
                ("TRACKNUMBER".to_string(), "2".to_string()),
                ("TRACKTOTAL".to_string(), "9".to_string()),
            ]
        );
        assert_eq!(rewritten.to_tag(), tag);
    }

    #[test]
    fn picture_block_round_trip() {
        let mut art = Artwork::new("image/jpeg", vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2]);
        art.description = "cover".to_string();
        let parsed = parse_picture(&picture_to_bytes(&art)).unwrap();
        assert_eq!(parsed, art);
    }

    #[test]
    fn picture_type_beyond_the_standard_list_survives() {
        let mut art = Artwork::new("image/png", vec![1, 2, 3]);
        art.picture_type = 42;
        let bytes = picture_to_bytes(&art);
        assert_eq!(&bytes[..4], &42u32.to_be_bytes());
        assert_eq!(parse_picture(&bytes).unwrap().picture_type, 42);
    }

    #[test]
    fn truncated_picture_is_an_error() {
        let bytes = picture_to_bytes(&Artwork::new("image/jpeg", vec![0xFF; 64]));
        for cut in [3, 10, 30, bytes.len() - 1] {
            assert!(parse_picture(&bytes[..cut]).is_err());
        }
    }

    #[test]
    fn picture_comment_is_artwork() {
        let art = Artwork::new("image/png", b"\x89PNG\r\n\x1a\nxx".to_vec());
        let encoded = STANDARD.encode(picture_to_bytes(&art));
        let tag = comments(&[(PICTURE_KEY, &encoded)]).to_tag();
        assert_eq!(tag.artworks().next(), Some(&art));
    }
}
