mod common;

use tagcodex_lib::header::FormatDetails;
use tagcodex_lib::{AudioFormat, FieldKey, codec_for, probe};

#[test]
fn probe_recognizes_every_sample() {
    for format in AudioFormat::ALL {
        let data = common::sample(format);
        assert_eq!(probe(&data), Some(format), "{}", format);
        codec_for(format).validate_file_format(&data).unwrap();
    }
}

#[test]
fn every_sample_has_its_title() {
    for format in AudioFormat::ALL {
        let data = common::sample(format);
        let tag = codec_for(format).read_tag(&data).unwrap();
        let expected = match format {
            AudioFormat::Aiff => "Aiff title",
            AudioFormat::Flac => "Flac title",
            AudioFormat::Mp4 => "Mp4 title",
            AudioFormat::Mp3 => "Mp3 title",
            AudioFormat::Ogg => "Ogg title",
            AudioFormat::Asf => "Asf title",
            AudioFormat::Dff => "Dff title",
            AudioFormat::Real => "Real title",
        };
        assert_eq!(tag.first_text(FieldKey::Title), Some(expected), "{}", format);
    }
}

#[test]
fn every_sample_outlines_its_chunks() {
    for format in AudioFormat::ALL {
        let data = common::sample(format);
        let chunks = codec_for(format).chunks(&data).unwrap();
        assert!(!chunks.is_empty(), "{}", format);
        for chunk in &chunks {
            assert!(chunk.range.end <= data.len(), "{}: {}", format, chunk.id);
        }
    }
}

#[test]
fn aiff_stream() {
    let header = codec_for(AudioFormat::Aiff).read_header(&common::aiff(None)).unwrap();
    assert_eq!(header.sample_rate, 44100);
    assert_eq!(header.channels, 2);
    assert_eq!(header.bits_per_sample, 16);
    assert_eq!(header.duration_secs(), Some(1.0));
    assert!(header.lossless);
}

#[test]
fn flac_stream() {
    let header = codec_for(AudioFormat::Flac).read_header(&common::flac(&[])).unwrap();
    assert_eq!(header.sample_rate, 48000);
    assert_eq!(header.channels, 2);
    assert_eq!(header.bits_per_sample, 24);
    assert_eq!(header.total_samples, Some(96_000));
    assert_eq!(header.duration_secs(), Some(2.0));
    assert!(header.lossless);
    assert_eq!(header.audio_bytes(), Some(24_000));
    assert_eq!(header.bitrate, 96);
}

#[test]
fn flac_track_pair_is_folded() {
    let data = common::flac(&[("TRACKNUMBER", "4"), ("TRACKTOTAL", "11"), ("ARTIST", "A"), ("ARTIST", "B")]);
    let tag = codec_for(AudioFormat::Flac).read_tag(&data).unwrap();
    assert_eq!(tag.first_text(FieldKey::Track), Some("4/11"));
    assert_eq!(tag.texts(FieldKey::Artist), vec!["A", "B"]);
}

#[test]
fn mp3_stream() {
    let data = common::mp3(Some("x"));
    let header = codec_for(AudioFormat::Mp3).read_header(&data).unwrap();
    assert_eq!(header.sample_rate, 44100);
    assert_eq!(header.channels, 2);
    assert_eq!(header.bitrate, 128);
    assert!(!header.vbr);
    assert!(!header.lossless);
    let range = header.audio_range.unwrap();
    assert_eq!(range.end, data.len() as u64);
    assert_eq!(range.end - range.start, 20 * 417);
}

#[test]
fn mp4_stream() {
    let header = codec_for(AudioFormat::Mp4).read_header(&common::mp4(None)).unwrap();
    assert_eq!(header.sample_rate, 44100);
    assert_eq!(header.channels, 2);
    assert!((header.duration_secs().unwrap() - 10.0).abs() < 1e-9);
    assert!(!header.lossless);
    assert!(matches!(header.details, FormatDetails::Mp4(_)));
}

#[test]
fn ogg_stream() {
    let header = codec_for(AudioFormat::Ogg).read_header(&common::ogg_vorbis(&[])).unwrap();
    assert_eq!(header.encoding, "Vorbis");
    assert_eq!(header.sample_rate, 44100);
    assert_eq!(header.channels, 2);
    assert_eq!(header.bitrate, 160);
    assert_eq!(header.duration_secs(), Some(5.0));
    match header.details {
        FormatDetails::Ogg(details) => assert_eq!(details.serial, common::OGG_SERIAL),
        other => panic!("unexpected details {:?}", other),
    }
}

#[test]
fn asf_stream_subtracts_preroll() {
    let header = codec_for(AudioFormat::Asf).read_header(&common::asf(None)).unwrap();
    assert_eq!(header.sample_rate, 44100);
    assert_eq!(header.channels, 2);
    assert_eq!(header.bitrate, 128);
    assert_eq!(header.duration_secs(), Some(8.0));
    assert!(!header.lossless);
}

#[test]
fn dff_stream() {
    let header = codec_for(AudioFormat::Dff).read_header(&common::dff(None)).unwrap();
    assert_eq!(header.sample_rate, 2_822_400);
    assert_eq!(header.channels, 2);
    assert_eq!(header.bits_per_sample, 1);
    assert_eq!(header.duration_secs(), Some(1.0));
    assert!(header.lossless);
}

#[test]
fn real_stream_and_fallbacks() {
    let codec = codec_for(AudioFormat::Real);
    let header = codec.read_header(&common::real(["", "", "", ""])).unwrap();
    assert_eq!(header.sample_rate, 22_050);
    assert_eq!(header.channels, 2);
    assert_eq!(header.duration_secs(), Some(30.0));
    assert_eq!(header.bitrate, 44);

    let tag = codec.read_tag(&common::real(["", "Author", "Label", ""])).unwrap();
    assert_eq!(tag.first_text(FieldKey::Title), Some("Author"));
    assert_eq!(tag.first_text(FieldKey::Artist), Some("Author"));
}

#[test]
fn headers_serialize_to_json() {
    for format in AudioFormat::ALL {
        let header = codec_for(format).read_header(&common::sample(format)).unwrap();
        let json = serde_json::to_value(&header).unwrap();
        assert_eq!(json["sample_rate"], header.sample_rate, "{}", format);
        assert!(json["details"]["kind"].is_string(), "{}", format);
    }
}
