//! Shared builders for synthetic image fixtures.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use photometa::{
    decode, Error, ImageConfig, ImageFormat, Options, Source, TagInfo, Tags,
};

/// Everything a decode run produced, for assertions.
#[derive(Debug)]
pub struct Collected {
    pub tags: Tags,
    pub sequence: Vec<TagInfo>,
    pub warnings: Vec<String>,
    pub config: Option<ImageConfig>,
}

/// Decode `data`, collecting tags, warnings and the image config.
/// `accept_all` replaces the default filter (which skips IFD1).
pub fn decode_collect(
    data: Vec<u8>,
    format: ImageFormat,
    sources: Source,
    accept_all: bool,
) -> Result<Collected, Error> {
    let sequence = Arc::new(Mutex::new(Vec::<TagInfo>::new()));
    let warnings = Arc::new(Mutex::new(Vec::<String>::new()));

    let sink = Arc::clone(&sequence);
    let warn_sink = Arc::clone(&warnings);
    let mut opts = Options {
        reader: Some(Box::new(Cursor::new(data))),
        image_format: format,
        sources,
        handle_tag: Some(Box::new(move |tag| {
            sink.lock().unwrap().push(tag);
            Ok(())
        })),
        warn: Some(Box::new(move |msg| {
            warn_sink.lock().unwrap().push(msg.to_string());
        })),
        ..Options::default()
    };
    if accept_all {
        opts.should_handle_tag = Some(Box::new(|_| true));
    }

    let result = decode(opts)?;

    let sequence = Arc::try_unwrap(sequence).unwrap().into_inner().unwrap();
    let warnings = Arc::try_unwrap(warnings).unwrap().into_inner().unwrap();
    let mut tags = Tags::default();
    for tag in &sequence {
        tags.add(tag.clone());
    }
    Ok(Collected {
        tags,
        sequence,
        warnings,
        config: result.image_config,
    })
}

/// A TIFF tag value for [`TiffBuilder`].
#[derive(Clone)]
pub enum Val {
    Ascii(String),
    Short(Vec<u16>),
    Long(Vec<u32>),
    Rat(Vec<(u32, u32)>),
    SRat(Vec<(i32, i32)>),
    Byte(Vec<u8>),
    Undef(Vec<u8>),
}

impl Val {
    /// (type code, element count, encoded bytes).
    fn encode(&self, e: Endian) -> (u16, u32, Vec<u8>) {
        match self {
            Val::Ascii(s) => {
                let mut b = s.as_bytes().to_vec();
                b.push(0);
                (2, b.len() as u32, b)
            }
            Val::Short(v) => (3, v.len() as u32, v.iter().flat_map(|&n| e.u16(n)).collect()),
            Val::Long(v) => (4, v.len() as u32, v.iter().flat_map(|&n| e.u32(n)).collect()),
            Val::Rat(v) => (
                5,
                v.len() as u32,
                v.iter()
                    .flat_map(|&(num, den)| [e.u32(num), e.u32(den)].concat())
                    .collect(),
            ),
            Val::SRat(v) => (
                10,
                v.len() as u32,
                v.iter()
                    .flat_map(|&(num, den)| [e.u32(num as u32), e.u32(den as u32)].concat())
                    .collect(),
            ),
            Val::Byte(v) => (1, v.len() as u32, v.clone()),
            Val::Undef(v) => (7, v.len() as u32, v.clone()),
        }
    }
}

#[derive(Clone, Copy)]
struct Endian {
    big: bool,
}

impl Endian {
    fn u16(self, v: u16) -> Vec<u8> {
        if self.big {
            v.to_be_bytes().to_vec()
        } else {
            v.to_le_bytes().to_vec()
        }
    }
    fn u32(self, v: u32) -> Vec<u8> {
        if self.big {
            v.to_be_bytes().to_vec()
        } else {
            v.to_le_bytes().to_vec()
        }
    }
}

/// Builds a TIFF block: IFD0, optional IFD1 (thumbnail chain), optional
/// nested ExifIFD and GPSInfoIFD (added as pointer entries on IFD0), and an
/// out-of-line data area.
#[derive(Default)]
pub struct TiffBuilder {
    big_endian: bool,
    ifd0: Vec<(u16, Val)>,
    exif_ifd: Vec<(u16, Val)>,
    gps_ifd: Vec<(u16, Val)>,
    ifd1: Vec<(u16, Val)>,
}

impl TiffBuilder {
    pub fn new() -> TiffBuilder {
        TiffBuilder::default()
    }

    pub fn big_endian(mut self) -> TiffBuilder {
        self.big_endian = true;
        self
    }

    pub fn ifd0(mut self, tag: u16, val: Val) -> TiffBuilder {
        self.ifd0.push((tag, val));
        self
    }

    pub fn exif_ifd(mut self, tag: u16, val: Val) -> TiffBuilder {
        self.exif_ifd.push((tag, val));
        self
    }

    pub fn gps_ifd(mut self, tag: u16, val: Val) -> TiffBuilder {
        self.gps_ifd.push((tag, val));
        self
    }

    pub fn ifd1(mut self, tag: u16, val: Val) -> TiffBuilder {
        self.ifd1.push((tag, val));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let e = Endian {
            big: self.big_endian,
        };
        let ifd_size = |n: usize| 2 + 12 * n as u32 + 4;

        let ifd0_count = self.ifd0.len()
            + usize::from(!self.exif_ifd.is_empty())
            + usize::from(!self.gps_ifd.is_empty());

        let ifd0_off = 8u32;
        let mut next = ifd0_off + ifd_size(ifd0_count);
        let ifd1_off = (!self.ifd1.is_empty()).then(|| {
            let o = next;
            next += ifd_size(self.ifd1.len());
            o
        });
        let exif_off = (!self.exif_ifd.is_empty()).then(|| {
            let o = next;
            next += ifd_size(self.exif_ifd.len());
            o
        });
        let gps_off = (!self.gps_ifd.is_empty()).then(|| {
            let o = next;
            next += ifd_size(self.gps_ifd.len());
            o
        });
        let data_base = next;
        let mut data: Vec<u8> = Vec::new();

        let mut out = Vec::new();
        out.extend_from_slice(if self.big_endian { b"MM" } else { b"II" });
        out.extend(e.u16(42));
        out.extend(e.u32(8));

        let encode_entry =
            |out: &mut Vec<u8>, data: &mut Vec<u8>, tag: u16, val: &Val| {
                let (typ, count, bytes) = val.encode(e);
                out.extend(e.u16(tag));
                out.extend(e.u16(typ));
                out.extend(e.u32(count));
                if bytes.len() <= 4 {
                    let mut slot = bytes;
                    slot.resize(4, 0);
                    out.extend(slot);
                } else {
                    let offset = data_base + data.len() as u32;
                    data.extend(bytes);
                    out.extend(e.u32(offset));
                }
            };

        // IFD0, with pointer entries for the nested IFDs.
        out.extend(e.u16(ifd0_count as u16));
        for (tag, val) in &self.ifd0 {
            encode_entry(&mut out, &mut data, *tag, val);
        }
        if let Some(off) = exif_off {
            encode_entry(&mut out, &mut data, 0x8769, &Val::Long(vec![off]));
        }
        if let Some(off) = gps_off {
            encode_entry(&mut out, &mut data, 0x8825, &Val::Long(vec![off]));
        }
        out.extend(e.u32(ifd1_off.unwrap_or(0)));

        if ifd1_off.is_some() {
            out.extend(e.u16(self.ifd1.len() as u16));
            for (tag, val) in &self.ifd1 {
                encode_entry(&mut out, &mut data, *tag, val);
            }
            out.extend(e.u32(0));
        }
        if exif_off.is_some() {
            out.extend(e.u16(self.exif_ifd.len() as u16));
            for (tag, val) in &self.exif_ifd {
                encode_entry(&mut out, &mut data, *tag, val);
            }
            out.extend(e.u32(0));
        }
        if gps_off.is_some() {
            out.extend(e.u16(self.gps_ifd.len() as u16));
            for (tag, val) in &self.gps_ifd {
                encode_entry(&mut out, &mut data, *tag, val);
            }
            out.extend(e.u32(0));
        }

        assert_eq!(out.len() as u32, data_base, "ifd layout mismatch");
        out.extend(data);
        out
    }
}

// JPEG segment builders.

pub fn jpeg_file(segments: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0xff, 0xd8];
    for segment in segments {
        out.extend_from_slice(segment);
    }
    out.extend_from_slice(&[0xff, 0xda]); // SOS terminates the walk
    out
}

fn jpeg_segment(marker: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = marker.to_be_bytes().to_vec();
    out.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn app1_exif(tiff: &[u8]) -> Vec<u8> {
    let mut payload = b"Exif\0\0".to_vec();
    payload.extend_from_slice(tiff);
    jpeg_segment(0xffe1, &payload)
}

pub fn app1_xmp(xml: &str) -> Vec<u8> {
    let mut payload = b"http://ns.adobe.com/xap/1.0/\0".to_vec();
    payload.extend_from_slice(xml.as_bytes());
    jpeg_segment(0xffe1, &payload)
}

pub fn app13_iptc(blocks: &[u8]) -> Vec<u8> {
    let mut payload = b"Photoshop 3.0\0".to_vec();
    payload.extend_from_slice(blocks);
    jpeg_segment(0xffed, &payload)
}

pub fn sof0(width: u16, height: u16) -> Vec<u8> {
    let mut payload = vec![8u8]; // sample precision
    payload.extend_from_slice(&height.to_be_bytes());
    payload.extend_from_slice(&width.to_be_bytes());
    payload.push(3); // component count
    payload.extend_from_slice(&[1, 0x22, 0, 2, 0x11, 1, 3, 0x11, 1]);
    jpeg_segment(0xffc0, &payload)
}

// IPTC builders.

pub fn iptc_dataset(record: u8, id: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![0x1c, record, id];
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn iptc_block(resource_id: u16, data: &[u8]) -> Vec<u8> {
    let mut out = b"8BIM".to_vec();
    out.extend_from_slice(&resource_id.to_be_bytes());
    out.extend_from_slice(&[0, 0]); // empty Pascal name
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
    if data.len() % 2 != 0 {
        out.push(0);
    }
    out
}

/// Datasets announcing UTF-8 followed by City.
pub fn iptc_city_blocks(city: &str) -> Vec<u8> {
    let mut datasets = iptc_dataset(1, 90, b"\x1b%G");
    datasets.extend(iptc_dataset(2, 90, city.as_bytes()));
    iptc_block(0x0404, &datasets)
}

// PNG builders.

pub fn png_file(chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];
    for chunk in chunks {
        out.extend_from_slice(chunk);
    }
    out
}

pub fn png_chunk(chunk_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = (payload.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(chunk_type);
    out.extend_from_slice(payload);
    out.extend_from_slice(&[0, 0, 0, 0]); // CRC is skipped, not verified
    out
}

/// A zTXt chunk holding a hex-encoded raw IPTC profile.
pub fn png_ztxt_iptc(blocks: &[u8]) -> Vec<u8> {
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    let hex: String = blocks.iter().map(|b| format!("{b:02x}")).collect();
    let mut text = format!("\nRaw profile type iptc\n{:8}\n", blocks.len()).into_bytes();
    for line in hex.as_bytes().chunks(72) {
        text.extend_from_slice(line);
        text.push(b'\n');
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&text).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut payload = b"Raw profile type iptc\0".to_vec();
    payload.push(0); // compression method: deflate
    payload.extend_from_slice(&compressed);
    png_chunk(b"zTXt", &payload)
}

// WebP builders.

pub fn webp_file(chunks: &[Vec<u8>]) -> Vec<u8> {
    let mut body = b"WEBP".to_vec();
    for chunk in chunks {
        body.extend_from_slice(chunk);
    }
    let mut out = b"RIFF".to_vec();
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

pub fn webp_chunk(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = id.to_vec();
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

pub fn webp_vp8x(has_exif: bool, has_xmp: bool, width: u32, height: u32) -> Vec<u8> {
    let mut flags = 0u8;
    if has_exif {
        flags |= 1 << 3;
    }
    if has_xmp {
        flags |= 1 << 2;
    }
    let mut payload = vec![flags, 0, 0, 0];
    payload.extend_from_slice(&(width - 1).to_le_bytes()[..3]);
    payload.extend_from_slice(&(height - 1).to_le_bytes()[..3]);
    webp_chunk(b"VP8X", &payload)
}

// ISOBMFF builders.

pub fn bmff_box(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(box_type);
    out.extend_from_slice(payload);
    out
}

pub fn bmff_full_box(box_type: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut inner = (u32::from(version) << 24 | (flags & 0xff_ffff))
        .to_be_bytes()
        .to_vec();
    inner.extend_from_slice(payload);
    bmff_box(box_type, &inner)
}
