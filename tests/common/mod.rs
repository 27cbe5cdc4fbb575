//! Synthesized fixture files for every supported container.
#![allow(dead_code)]

use tagcodex_lib::codecs::id3;
use tagcodex_lib::codecs::vorbis::VorbisComments;
use tagcodex_lib::{AudioFormat, FieldKey, Tag};
use uuid::Uuid;

pub const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00, 0x01, 0x02];

pub fn tag(fields: &[(FieldKey, &str)]) -> Tag {
    let mut tag = Tag::new();
    for &(key, value) in fields {
        tag.add(key, value);
    }
    tag
}

/// One valid file per format, with a title where the format carries tags.
pub fn sample(format: AudioFormat) -> Vec<u8> {
    match format {
        AudioFormat::Aiff => aiff(Some("Aiff title")),
        AudioFormat::Flac => flac(&[("TITLE", "Flac title")]),
        AudioFormat::Mp4 => mp4(Some("Mp4 title")),
        AudioFormat::Mp3 => mp3(Some("Mp3 title")),
        AudioFormat::Ogg => ogg_vorbis(&[("TITLE", "Ogg title")]),
        AudioFormat::Asf => asf(Some("Asf title")),
        AudioFormat::Dff => dff(Some("Dff title")),
        AudioFormat::Real => real(["Real title", "Real author", "", ""]),
    }
}

/// File extension `sample(format)` should be saved with.
pub fn extension(format: AudioFormat) -> &'static str {
    format.extensions()[0]
}

// ---------------------------------------------------------------- AIFF

fn iff_chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        out.push(0);
    }
    out
}

/// 1 second of 44.1 kHz 16-bit stereo, plus an APPL chunk no reader knows.
pub fn aiff(title: Option<&str>) -> Vec<u8> {
    let mut comm = 2u16.to_be_bytes().to_vec();
    comm.extend_from_slice(&44100u32.to_be_bytes());
    comm.extend_from_slice(&16u16.to_be_bytes());
    comm.extend_from_slice(&[0x40, 0x0E, 0xAC, 0x44, 0, 0, 0, 0, 0, 0]);

    let mut ssnd = vec![0u8; 8];
    ssnd.extend(std::iter::repeat_n(0x11, 400));

    let mut body = b"AIFF".to_vec();
    body.extend(iff_chunk(b"COMM", &comm));
    if let Some(title) = title {
        body.extend(iff_chunk(b"NAME", title.as_bytes()));
    }
    body.extend(iff_chunk(b"APPL", b"stoc\x01\x02\x03"));
    body.extend(iff_chunk(b"SSND", &ssnd));

    let mut out = b"FORM".to_vec();
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend(body);
    out
}

// ---------------------------------------------------------------- FLAC

fn flac_block(kind: u8, payload: &[u8], last: bool) -> Vec<u8> {
    let mut out = vec![if last { kind | 0x80 } else { kind }];
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
    out.extend_from_slice(payload);
    out
}

fn streaminfo(rate: u32, channels: u8, bits: u8, total: u64) -> Vec<u8> {
    let mut si = vec![0u8; 34];
    si[0..2].copy_from_slice(&4096u16.to_be_bytes());
    si[2..4].copy_from_slice(&4096u16.to_be_bytes());
    let packed = ((rate as u64) << 44) | (((channels - 1) as u64) << 41) | (((bits - 1) as u64) << 36) | total;
    si[10..18].copy_from_slice(&packed.to_be_bytes());
    si[18..34].copy_from_slice(&[0x5A; 16]);
    si
}

/// 2 seconds of 48 kHz 24-bit stereo with a Vorbis comment block and padding.
pub fn flac(comments: &[(&str, &str)]) -> Vec<u8> {
    let vorbis = VorbisComments {
        vendor: "reference libFLAC 1.4.3 20230623".to_string(),
        comments: comments.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
    };
    let mut out = b"fLaC".to_vec();
    out.extend(flac_block(0, &streaminfo(48000, 2, 24, 96_000), false));
    out.extend(flac_block(4, &vorbis.to_bytes(), false));
    out.extend(flac_block(1, &[0u8; 512], true));
    out.extend(std::iter::repeat_n(0xF8, 24_000));
    out
}

// ---------------------------------------------------------------- MP3

/// MPEG-1 Layer III, 128 kbps, 44.1 kHz, stereo.
const MP3_FRAME_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];
const MP3_FRAME_LEN: usize = 417;

pub fn mp3_frames(count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count * MP3_FRAME_LEN);
    for i in 0..count {
        let mut frame = vec![(i % 200) as u8 + 1; MP3_FRAME_LEN];
        frame[..4].copy_from_slice(&MP3_FRAME_HEADER);
        out.extend(frame);
    }
    out
}

pub fn mp3(title: Option<&str>) -> Vec<u8> {
    let mut out = match title {
        Some(title) => id3::render_id3v23(&tag(&[(FieldKey::Title, title)]), &[], 64).expect("id3 tag"),
        None => Vec::new(),
    };
    out.extend(mp3_frames(20));
    out
}

// ---------------------------------------------------------------- MP4

fn mp4_box(code: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(code);
    out.extend_from_slice(body);
    out
}

fn mp4_full_box(code: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut full = vec![0u8; 4];
    full.extend_from_slice(body);
    mp4_box(code, &full)
}

fn mp4_text_item(code: &[u8; 4], text: &str) -> Vec<u8> {
    let mut body = 1u32.to_be_bytes().to_vec();
    body.extend_from_slice(&[0u8; 4]);
    body.extend_from_slice(text.as_bytes());
    mp4_box(code, &mp4_box(b"data", &body))
}

fn mp4a_entry() -> Vec<u8> {
    let mut body = vec![0u8; 6];
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&[0u8; 8]);
    body.extend_from_slice(&2u16.to_be_bytes());
    body.extend_from_slice(&16u16.to_be_bytes());
    body.extend_from_slice(&[0u8; 4]);
    body.extend_from_slice(&44100u16.to_be_bytes());
    body.extend_from_slice(&[0u8; 2]);

    let mut es = vec![0x03, 0x80, 0x80, 0x80, 0x22, 0x00, 0x01, 0x00];
    es.extend_from_slice(&[0x04, 0x80, 0x80, 0x80, 0x14, 0x40, 0x15, 0x00, 0x18, 0x00]);
    es.extend_from_slice(&256_000u32.to_be_bytes());
    es.extend_from_slice(&128_000u32.to_be_bytes());
    es.extend_from_slice(&[0x05, 0x80, 0x80, 0x80, 0x02, 0x12, 0x10]);
    es.extend_from_slice(&[0x06, 0x80, 0x80, 0x80, 0x01, 0x02]);
    body.extend(mp4_full_box(b"esds", &es));
    mp4_box(b"mp4a", &body)
}

fn mp4_track(chunk_offset: u32) -> Vec<u8> {
    let mut mdhd = vec![0u8; 8];
    mdhd.extend_from_slice(&44100u32.to_be_bytes());
    mdhd.extend_from_slice(&441_000u32.to_be_bytes());
    mdhd.extend_from_slice(&[0u8; 4]);

    let mut hdlr = vec![0u8; 4];
    hdlr.extend_from_slice(b"soun");
    hdlr.extend_from_slice(&[0u8; 13]);

    let mut stsd = 1u32.to_be_bytes().to_vec();
    stsd.extend(mp4a_entry());

    let mut stco = 1u32.to_be_bytes().to_vec();
    stco.extend_from_slice(&chunk_offset.to_be_bytes());

    let mut stbl = mp4_full_box(b"stsd", &stsd);
    stbl.extend(mp4_full_box(b"stco", &stco));

    let mut mdia = mp4_full_box(b"mdhd", &mdhd);
    mdia.extend(mp4_full_box(b"hdlr", &hdlr));
    mdia.extend(mp4_box(b"minf", &mp4_box(b"stbl", &stbl)));
    mp4_box(b"trak", &mp4_box(b"mdia", &mdia))
}

/// 10 seconds of 44.1 kHz stereo AAC LC; moov precedes mdat.
pub fn mp4(title: Option<&str>) -> Vec<u8> {
    let ftyp = mp4_box(b"ftyp", b"M4A \0\0\0\0M4A mp42isom");
    let mut mvhd = vec![0u8; 8];
    mvhd.extend_from_slice(&1000u32.to_be_bytes());
    mvhd.extend_from_slice(&10_000u32.to_be_bytes());
    mvhd.extend_from_slice(&[0u8; 80]);
    let mvhd = mp4_full_box(b"mvhd", &mvhd);

    let mut handler = vec![0u8; 8];
    handler.extend_from_slice(b"mdirappl");
    handler.extend_from_slice(&[0u8; 9]);
    let mut items = Vec::new();
    if let Some(title) = title {
        items.extend(mp4_text_item(b"\xa9nam", title));
    }
    items.extend(mp4_text_item(b"\xa9too", "Lavf60.3.100"));
    let mut meta = vec![0u8; 4];
    meta.extend(mp4_box(b"hdlr", &handler));
    meta.extend(mp4_box(b"ilst", &items));
    let udta = mp4_box(b"udta", &mp4_box(b"meta", &meta));

    let moov_len = 8 + mvhd.len() + mp4_track(0).len() + udta.len();
    let mdat_payload = (ftyp.len() + moov_len + 8) as u32;

    let mut moov = mvhd;
    moov.extend(mp4_track(mdat_payload));
    moov.extend(udta);

    let mut out = ftyp;
    out.extend(mp4_box(b"moov", &moov));
    out.extend(mp4_box(b"mdat", &[0x21; 16_000]));
    out
}

/// First `stco` entry, wherever the boxes ended up.
pub fn mp4_first_chunk_offset(data: &[u8]) -> u32 {
    let pos = data.windows(4).position(|w| w == b"stco").expect("stco box");
    u32::from_be_bytes([data[pos + 12], data[pos + 13], data[pos + 14], data[pos + 15]])
}

// ---------------------------------------------------------------- Ogg

fn ogg_crc(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 { (crc << 1) ^ 0x04C1_1DB7 } else { crc << 1 };
        }
    }
    crc
}

fn lacing(packet: &[u8]) -> Vec<u8> {
    let mut out = vec![255u8; packet.len() / 255];
    out.push((packet.len() % 255) as u8);
    out
}

pub fn ogg_page(flags: u8, granule: u64, serial: u32, sequence: u32, packets: &[&[u8]]) -> Vec<u8> {
    let lacing: Vec<u8> = packets.iter().flat_map(|p| lacing(p)).collect();
    let mut out = b"OggS".to_vec();
    out.push(0);
    out.push(flags);
    out.extend_from_slice(&granule.to_le_bytes());
    out.extend_from_slice(&serial.to_le_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.push(lacing.len() as u8);
    out.extend_from_slice(&lacing);
    for packet in packets {
        out.extend_from_slice(packet);
    }
    let crc = ogg_crc(&out);
    out[22..26].copy_from_slice(&crc.to_le_bytes());
    out
}

/// Sequence numbers of every page, `None` when a page has a bad CRC.
pub fn ogg_sequences(data: &[u8]) -> Option<Vec<u32>> {
    let mut sequences = Vec::new();
    let mut pos = 0;
    while pos + 27 <= data.len() {
        let segments = data[pos + 26] as usize;
        let body: usize = data[pos + 27..pos + 27 + segments].iter().map(|&l| l as usize).sum();
        let len = 27 + segments + body;
        let mut page = data[pos..pos + len].to_vec();
        let stored = u32::from_le_bytes([page[22], page[23], page[24], page[25]]);
        page[22..26].copy_from_slice(&[0; 4]);
        if ogg_crc(&page) != stored {
            return None;
        }
        sequences.push(u32::from_le_bytes([page[18], page[19], page[20], page[21]]));
        pos += len;
    }
    Some(sequences)
}

pub const OGG_SERIAL: u32 = 0x0BAD_CAFE;

/// 44.1 kHz stereo Vorbis, 5 seconds over three audio pages.
pub fn ogg_vorbis(comments: &[(&str, &str)]) -> Vec<u8> {
    let mut id = b"\x01vorbis".to_vec();
    id.extend_from_slice(&0u32.to_le_bytes());
    id.push(2);
    id.extend_from_slice(&44100u32.to_le_bytes());
    id.extend_from_slice(&0i32.to_le_bytes());
    id.extend_from_slice(&160_000i32.to_le_bytes());
    id.extend_from_slice(&0i32.to_le_bytes());
    id.push(0xB8);
    id.push(0x01);

    let vorbis = VorbisComments {
        vendor: "Xiph.Org libVorbis I 20200704 (Reducing Environment)".to_string(),
        comments: comments.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
    };
    let mut comment = b"\x03vorbis".to_vec();
    comment.extend(vorbis.to_bytes());
    comment.push(0x01);

    let mut setup = b"\x05vorbis".to_vec();
    setup.extend(std::iter::repeat_n(0x42, 300));

    let mut out = ogg_page(0x02, 0, OGG_SERIAL, 0, &[id.as_slice()]);
    out.extend(ogg_page(0, 0, OGG_SERIAL, 1, &[comment.as_slice(), setup.as_slice()]));
    let total = 220_500u64;
    for step in 1..=3u32 {
        let flags = if step == 3 { 0x04 } else { 0 };
        let granule = total * step as u64 / 3;
        out.extend(ogg_page(flags, granule, OGG_SERIAL, 1 + step, &[&[0xAA; 120][..]]));
    }
    out
}

// ---------------------------------------------------------------- ASF

fn guid(value: u128) -> [u8; 16] {
    Uuid::from_u128(value).to_bytes_le()
}

const ASF_HEADER: u128 = 0x75B22630_668E_11CF_A6D9_00AA0062CE6C;
const ASF_DATA: u128 = 0x75B22636_668E_11CF_A6D9_00AA0062CE6C;
const ASF_FILE_PROPERTIES: u128 = 0x8CABDCA1_A947_11CF_8EE4_00C00C205365;
const ASF_STREAM_PROPERTIES: u128 = 0xB7DC0791_A9B7_11CF_8EE6_00C00C205365;
const ASF_CONTENT_DESCRIPTION: u128 = 0x75B22633_668E_11CF_A6D9_00AA0062CE6C;
const ASF_AUDIO_MEDIA: u128 = 0xF8699E40_5B4D_11CF_A8FD_00805F5C442B;

fn asf_object(id: u128, body: &[u8]) -> Vec<u8> {
    let mut out = guid(id).to_vec();
    out.extend_from_slice(&((body.len() + 24) as u64).to_le_bytes());
    out.extend_from_slice(body);
    out
}

fn utf16z(text: &str) -> Vec<u8> {
    let mut out: Vec<u8> = text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    out.extend_from_slice(&[0, 0]);
    out
}

/// WMA v2, 44.1 kHz stereo, 8 seconds after a 2 second preroll.
pub fn asf(title: Option<&str>) -> Vec<u8> {
    let mut props = vec![0x11u8; 16];
    props.extend_from_slice(&0u64.to_le_bytes());
    props.extend_from_slice(&0u64.to_le_bytes());
    props.extend_from_slice(&10u64.to_le_bytes());
    props.extend_from_slice(&100_000_000u64.to_le_bytes());
    props.extend_from_slice(&100_000_000u64.to_le_bytes());
    props.extend_from_slice(&2000u64.to_le_bytes());
    props.extend_from_slice(&2u32.to_le_bytes());
    props.extend_from_slice(&3200u32.to_le_bytes());
    props.extend_from_slice(&3200u32.to_le_bytes());
    props.extend_from_slice(&128_000u32.to_le_bytes());

    let mut format = 0x0161u16.to_le_bytes().to_vec();
    format.extend_from_slice(&2u16.to_le_bytes());
    format.extend_from_slice(&44100u32.to_le_bytes());
    format.extend_from_slice(&16_000u32.to_le_bytes());
    format.extend_from_slice(&2973u16.to_le_bytes());
    format.extend_from_slice(&16u16.to_le_bytes());
    format.extend_from_slice(&0u16.to_le_bytes());
    let mut stream = guid(ASF_AUDIO_MEDIA).to_vec();
    stream.extend_from_slice(&[0u8; 16]);
    stream.extend_from_slice(&0u64.to_le_bytes());
    stream.extend_from_slice(&(format.len() as u32).to_le_bytes());
    stream.extend_from_slice(&0u32.to_le_bytes());
    stream.extend_from_slice(&1u16.to_le_bytes());
    stream.extend_from_slice(&0u32.to_le_bytes());
    stream.extend(format);

    let mut children = vec![
        asf_object(ASF_FILE_PROPERTIES, &props),
        asf_object(ASF_STREAM_PROPERTIES, &stream),
    ];
    if let Some(title) = title {
        let strings: Vec<Vec<u8>> = [title, "", "", "", ""].iter().map(|s| utf16z(s)).collect();
        let mut body = Vec::new();
        for s in &strings {
            body.extend_from_slice(&(s.len() as u16).to_le_bytes());
        }
        for s in &strings {
            body.extend_from_slice(s);
        }
        children.push(asf_object(ASF_CONTENT_DESCRIPTION, &body));
    }

    let body: Vec<u8> = children.concat();
    let mut out = guid(ASF_HEADER).to_vec();
    out.extend_from_slice(&((30 + body.len()) as u64).to_le_bytes());
    out.extend_from_slice(&(children.len() as u32).to_le_bytes());
    out.extend_from_slice(&[0x01, 0x02]);
    out.extend(body);

    let mut data = vec![0x22u8; 16];
    data.extend_from_slice(&1u64.to_le_bytes());
    data.extend_from_slice(&[0x01, 0x01]);
    data.extend_from_slice(&[0xAB; 3200]);
    out.extend(asf_object(ASF_DATA, &data));
    out
}

// ---------------------------------------------------------------- DFF

fn dff_chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    out.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        out.push(0);
    }
    out
}

/// DSD64 stereo, 1 second, with an edited master title.
pub fn dff(title: Option<&str>) -> Vec<u8> {
    let mut prop = b"SND ".to_vec();
    prop.extend(dff_chunk(b"FS  ", &2_822_400u32.to_be_bytes()));
    prop.extend(dff_chunk(b"CHNL", b"\x00\x02SLFTSRGT"));
    prop.extend(dff_chunk(b"CMPR", b"DSD \x0enot compressed"));

    let mut body = b"DSD ".to_vec();
    body.extend(dff_chunk(b"FVER", &[1, 5, 0, 0]));
    body.extend(dff_chunk(b"PROP", &prop));
    body.extend(dff_chunk(b"DSD ", &vec![0x69; 705_600]));
    if let Some(title) = title {
        let mut diti = (title.len() as u32).to_be_bytes().to_vec();
        diti.extend_from_slice(title.as_bytes());
        body.extend(dff_chunk(b"DIIN", &dff_chunk(b"DITI", &diti)));
    }

    let mut out = b"FRM8".to_vec();
    out.extend_from_slice(&(body.len() as u64).to_be_bytes());
    out.extend(body);
    out
}

// ---------------------------------------------------------------- RealMedia

fn rm_chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.extend_from_slice(&((body.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// Cook stream, 22.05 kHz stereo, 30 seconds at 44.1 kbps.
pub fn real(cont: [&str; 4]) -> Vec<u8> {
    let mut rmf = 0u16.to_be_bytes().to_vec();
    rmf.extend_from_slice(&0u32.to_be_bytes());
    rmf.extend_from_slice(&4u32.to_be_bytes());

    let mut prop = 0u16.to_be_bytes().to_vec();
    for value in [64_000u32, 44_100, 640, 640, 100, 30_000, 0, 0, 0] {
        prop.extend_from_slice(&value.to_be_bytes());
    }
    prop.extend_from_slice(&[0, 1, 0, 0]);

    let mut ra = b".ra\xfd".to_vec();
    ra.extend_from_slice(&4u16.to_be_bytes());
    ra.extend_from_slice(&[0u8; 42]);
    ra.extend_from_slice(&22_050u16.to_be_bytes());
    ra.extend_from_slice(&[0, 0]);
    ra.extend_from_slice(&16u16.to_be_bytes());
    ra.extend_from_slice(&2u16.to_be_bytes());

    let mut mdpr = 0u16.to_be_bytes().to_vec();
    mdpr.extend_from_slice(&0u16.to_be_bytes());
    for value in [44_100u32, 44_100, 640, 640, 0, 0, 30_000] {
        mdpr.extend_from_slice(&value.to_be_bytes());
    }
    mdpr.push(5);
    mdpr.extend_from_slice(b"Audio");
    let mime = b"audio/x-pn-realaudio";
    mdpr.push(mime.len() as u8);
    mdpr.extend_from_slice(mime);
    mdpr.extend_from_slice(&(ra.len() as u32).to_be_bytes());
    mdpr.extend(ra);

    let mut content = 0u16.to_be_bytes().to_vec();
    for field in cont {
        content.extend_from_slice(&(field.len() as u16).to_be_bytes());
        content.extend_from_slice(field.as_bytes());
    }

    let mut data = vec![0u8; 10];
    data.extend_from_slice(&[0x55; 512]);

    [
        rm_chunk(b".RMF", &rmf),
        rm_chunk(b"PROP", &prop),
        rm_chunk(b"MDPR", &mdpr),
        rm_chunk(b"CONT", &content),
        rm_chunk(b"DATA", &data),
    ]
    .concat()
}
