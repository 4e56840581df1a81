//! WebP walker tests: VP8X feature gating, metadata chunks and dimensions.

mod common;

use common::*;
use photometa::{ImageFormat, Source, Value};

fn exif_tiff() -> Vec<u8> {
    TiffBuilder::new()
        .ifd0(0x0112, Val::Short(vec![1]))
        .build()
}

const XMP_PACKET: &str = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
 <rdf:Description rdf:about="" xmlns:xmp="http://ns.adobe.com/xap/1.0/" xmp:Rating="5"/>
</rdf:RDF>"#;

#[test]
fn vp8x_flags_gate_sources() {
    // EXIF bit set, XMP bit clear, but both chunks present: the XMP chunk
    // must be ignored.
    let webp = webp_file(&[
        webp_vp8x(true, false, 1920, 1080),
        webp_chunk(b"EXIF", &exif_tiff()),
        webp_chunk(b"XMP ", XMP_PACKET.as_bytes()),
    ]);
    let sources = Source::EXIF | Source::XMP;
    let got = decode_collect(webp, ImageFormat::WebP, sources, true).unwrap();
    assert_eq!(got.tags.exif()["Orientation"].value, Value::U16(1));
    assert!(got.tags.xmp().is_empty());
}

#[test]
fn vp8x_canvas_dimensions() {
    let webp = webp_file(&[webp_vp8x(false, false, 1920, 1080)]);
    let got = decode_collect(webp, ImageFormat::WebP, Source::CONFIG, true).unwrap();
    let config = got.config.unwrap();
    assert_eq!((config.width, config.height), (1920, 1080));
}

#[test]
fn xmp_chunk_decodes_when_flagged() {
    let webp = webp_file(&[
        webp_vp8x(false, true, 64, 64),
        webp_chunk(b"XMP ", XMP_PACKET.as_bytes()),
    ]);
    let got = decode_collect(webp, ImageFormat::WebP, Source::XMP, true).unwrap();
    assert_eq!(got.tags.xmp()["Rating"].value, Value::Text("5".to_string()));
}

#[test]
fn vp8_frame_header_dimensions() {
    let mut frame = vec![0u8; 10];
    frame[3..6].copy_from_slice(&[0x9d, 0x01, 0x2a]);
    frame[6..8].copy_from_slice(&800u16.to_le_bytes());
    frame[8..10].copy_from_slice(&600u16.to_le_bytes());
    let webp = webp_file(&[webp_chunk(b"VP8 ", &frame)]);
    let got = decode_collect(webp, ImageFormat::WebP, Source::CONFIG, true).unwrap();
    let config = got.config.unwrap();
    assert_eq!((config.width, config.height), (800, 600));
}

#[test]
fn vp8l_header_dimensions() {
    let width: u32 = 1023;
    let height: u32 = 511;
    let bits = (width - 1) | (height - 1) << 14;
    let mut payload = vec![0x2f];
    payload.extend_from_slice(&bits.to_le_bytes());
    let webp = webp_file(&[webp_chunk(b"VP8L", &payload)]);
    let got = decode_collect(webp, ImageFormat::WebP, Source::CONFIG, true).unwrap();
    let config = got.config.unwrap();
    assert_eq!((config.width, config.height), (1023, 511));
}

#[test]
fn missing_riff_header_is_invalid_format() {
    let err = decode_collect(b"JUNKJUNKJUNK".to_vec(), ImageFormat::WebP, Source::EXIF, true)
        .unwrap_err();
    assert!(err.to_string().contains("invalid format"), "got: {err}");
}
