//! TIFF and raw (DNG-style) walker tests: dimension selection and the full
//! EXIF pass.

mod common;

use common::*;
use photometa::{ImageFormat, Source, Value};

fn put_u16_le(b: &mut [u8], v: u16) {
    b[0..2].copy_from_slice(&v.to_le_bytes());
}
fn put_u32_le(b: &mut [u8], v: u32) {
    b[0..4].copy_from_slice(&v.to_le_bytes());
}
fn put_ifd_entry(b: &mut [u8], tag: u16, typ: u16, count: u32, val: u32) {
    put_u16_le(&mut b[0..2], tag);
    put_u16_le(&mut b[2..4], typ);
    put_u32_le(&mut b[4..8], count);
    put_u32_le(&mut b[8..12], val);
}

#[test]
fn tiff_dimensions_and_tags() {
    let tiff = TiffBuilder::new()
        .ifd0(0x0100, Val::Long(vec![1920]))
        .ifd0(0x0101, Val::Long(vec![1080]))
        .ifd0(0x0112, Val::Short(vec![1]))
        .build();
    let sources = Source::EXIF | Source::CONFIG;
    let got = decode_collect(tiff, ImageFormat::Tiff, sources, true).unwrap();
    let config = got.config.unwrap();
    assert_eq!((config.width, config.height), (1920, 1080));
    assert_eq!(got.tags.exif()["Orientation"].value, Value::U16(1));
}

#[test]
fn tiff_short_dimensions() {
    let tiff = TiffBuilder::new()
        .ifd0(0x0100, Val::Short(vec![640]))
        .ifd0(0x0101, Val::Short(vec![480]))
        .build();
    let got = decode_collect(tiff, ImageFormat::Tiff, Source::CONFIG, true).unwrap();
    let config = got.config.unwrap();
    assert_eq!((config.width, config.height), (640, 480));
}

#[test]
fn tiff_big_endian_decodes() {
    let tiff = TiffBuilder::new()
        .big_endian()
        .ifd0(0x0112, Val::Short(vec![6]))
        .build();
    let got = decode_collect(tiff, ImageFormat::Tiff, Source::EXIF, true).unwrap();
    assert_eq!(got.tags.exif()["Orientation"].value, Value::U16(6));
}

#[test]
fn tiff_bad_magic_is_invalid_format() {
    let err =
        decode_collect(b"II\x2b\x00\x08\x00\x00\x00".to_vec(), ImageFormat::Tiff, Source::EXIF, true)
            .unwrap_err();
    assert!(err.to_string().contains("invalid format"));
}

/// Little-endian raw file: IFD0 with small dimensions plus one SubIFD
/// holding the full-size image, optionally with DefaultCropSize.
fn build_raw(default_crop: Option<(u16, u16)>) -> Vec<u8> {
    let ifd0_entries = 3 + usize::from(default_crop.is_some());
    let ifd0_off = 8usize;
    let sub_ifd_off = ifd0_off + 2 + 12 * ifd0_entries + 4;

    let mut v = Vec::new();
    v.extend_from_slice(b"II");
    v.extend_from_slice(&42u16.to_le_bytes());
    v.extend_from_slice(&8u32.to_le_bytes());

    let mut entry = [0u8; 12];
    v.extend_from_slice(&(ifd0_entries as u16).to_le_bytes());
    put_ifd_entry(&mut entry, 0x0100, 3, 1, 160); // thumbnail-sized IFD0
    v.extend_from_slice(&entry);
    put_ifd_entry(&mut entry, 0x0101, 3, 1, 120);
    v.extend_from_slice(&entry);
    put_ifd_entry(&mut entry, 0x014a, 4, 1, sub_ifd_off as u32); // SubIFDs
    v.extend_from_slice(&entry);
    if let Some((w, h)) = default_crop {
        let val = u32::from(w) | u32::from(h) << 16; // SHORT×2 inline
        put_ifd_entry(&mut entry, 0xc620, 3, 2, val);
        v.extend_from_slice(&entry);
    }
    v.extend_from_slice(&0u32.to_le_bytes());

    // The SubIFD with the real sensor dimensions.
    assert_eq!(v.len(), sub_ifd_off);
    v.extend_from_slice(&2u16.to_le_bytes());
    put_ifd_entry(&mut entry, 0x0100, 4, 1, 4000);
    v.extend_from_slice(&entry);
    put_ifd_entry(&mut entry, 0x0101, 4, 1, 3000);
    v.extend_from_slice(&entry);
    v.extend_from_slice(&0u32.to_le_bytes());
    v
}

#[test]
fn raw_prefers_largest_sub_ifd() {
    let got = decode_collect(build_raw(None), ImageFormat::Dng, Source::CONFIG, true).unwrap();
    let config = got.config.unwrap();
    assert_eq!((config.width, config.height), (4000, 3000));
}

#[test]
fn raw_default_crop_size_wins() {
    let got = decode_collect(
        build_raw(Some((3840, 2880))),
        ImageFormat::Dng,
        Source::CONFIG,
        true,
    )
    .unwrap();
    let config = got.config.unwrap();
    assert_eq!((config.width, config.height), (3840, 2880));
}

#[test]
fn raw_exif_pass_follows_thumbnail_chain() {
    let tiff = TiffBuilder::new()
        .ifd0(0x0112, Val::Short(vec![1]))
        .ifd1(0x0103, Val::Short(vec![6])) // thumbnail Compression
        .build();
    let got = decode_collect(tiff, ImageFormat::Nef, Source::EXIF, true).unwrap();
    assert_eq!(got.tags.exif()["Orientation"].namespace, "IFD0");
    assert_eq!(got.tags.exif()["Compression"].namespace, "IFD1");
}

#[test]
fn raw_exif_ifd_dimensions_considered() {
    // No SubIFDs; ExifIFD carries larger ExifImageWidth/Height than IFD0.
    let tiff = TiffBuilder::new()
        .ifd0(0x0100, Val::Short(vec![160]))
        .ifd0(0x0101, Val::Short(vec![120]))
        .exif_ifd(0xa002, Val::Long(vec![6000]))
        .exif_ifd(0xa003, Val::Long(vec![4000]))
        .build();
    let got = decode_collect(tiff, ImageFormat::Arw, Source::CONFIG, true).unwrap();
    let config = got.config.unwrap();
    assert_eq!((config.width, config.height), (6000, 4000));
}
