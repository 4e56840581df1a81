//! WebP walker: RIFF chunk loop. The VP8X feature flags gate which metadata
//! chunks can exist; EXIF and "XMP " chunks carry the payloads, and the
//! VP8X/VP8/VP8L headers provide canvas dimensions.

use std::io::{BufReader, Read, Seek};

use crate::error::Error;
use crate::exif::ExifDecoder;
use crate::io::SourceReader;
use crate::{xmp, Ctx, ImageConfig, Source};

const XMP_METADATA_BIT: u8 = 1 << 2;
const EXIF_METADATA_BIT: u8 = 1 << 3;

pub(crate) fn decode<R: Read + Seek>(s: &mut SourceReader<R>, ctx: &mut Ctx) -> Result<(), Error> {
    let mut source_set = (Source::EXIF | Source::XMP | Source::CONFIG) & ctx.sources;
    if source_set.is_empty() {
        return Ok(());
    }

    let mut chunk_id = [0u8; 4];
    s.read_full(&mut chunk_id)?;
    if &chunk_id != b"RIFF" {
        return Err(Error::invalid_format("missing RIFF header"));
    }
    s.skip(4)?; // file size
    s.read_full(&mut chunk_id)?;
    if &chunk_id != b"WEBP" {
        return Err(Error::invalid_format("missing WEBP fourcc"));
    }

    loop {
        if source_set.is_empty() {
            return Ok(());
        }
        s.read_full(&mut chunk_id)?;
        if s.is_eof() {
            return Ok(());
        }
        let chunk_len = s.read_u32()?;

        match &chunk_id {
            b"VP8X" => {
                if chunk_len != 10 {
                    return Err(Error::invalid_format("unexpected VP8X chunk length"));
                }
                let mut buf = [0u8; 10];
                s.read_full(&mut buf)?;

                if buf[0] & EXIF_METADATA_BIT == 0 {
                    source_set = source_set.remove(Source::EXIF);
                }
                if buf[0] & XMP_METADATA_BIT == 0 {
                    source_set = source_set.remove(Source::XMP);
                }

                if source_set.has(Source::CONFIG) {
                    source_set = source_set.remove(Source::CONFIG);
                    let width = 1 + u24_le(&buf[4..7]);
                    let height = 1 + u24_le(&buf[7..10]);
                    ctx.image_config = Some(ImageConfig { width, height });
                }

                if source_set.is_empty() {
                    return Ok(());
                }
            }
            b"EXIF" if source_set.has(Source::EXIF) => {
                source_set = source_set.remove(Source::EXIF);
                // Chunk payload starts at the TIFF header, no "Exif" magic.
                let thumbnail_offset = s.pos()?;
                let sub = s.buffered_reader(u64::from(chunk_len))?;
                let mut sub_reader = SourceReader::new(sub, s.byte_order);
                ExifDecoder::new(&mut sub_reader, ctx, thumbnail_offset).decode()?;
            }
            b"XMP " if source_set.has(Source::XMP) => {
                source_set = source_set.remove(Source::XMP);
                let sub = s.buffered_reader(u64::from(chunk_len))?;
                xmp::decode(BufReader::new(sub), ctx)?;
            }
            b"VP8 " if source_set.has(Source::CONFIG) => {
                source_set = source_set.remove(Source::CONFIG);
                let mut buf = [0u8; 10];
                s.read_full(&mut buf)?;
                // Key frame start code.
                if buf[3..6] == [0x9d, 0x01, 0x2a] {
                    let width = u32::from(u16::from_le_bytes([buf[6], buf[7]]) & 0x3fff);
                    let height = u32::from(u16::from_le_bytes([buf[8], buf[9]]) & 0x3fff);
                    ctx.image_config = Some(ImageConfig { width, height });
                }
                s.skip(i64::from(chunk_len) - 10)?;
            }
            b"VP8L" if source_set.has(Source::CONFIG) => {
                source_set = source_set.remove(Source::CONFIG);
                let mut buf = [0u8; 5];
                s.read_full(&mut buf)?;
                if buf[0] == 0x2f {
                    let bits = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);
                    let width = (bits & 0x3fff) + 1;
                    let height = ((bits >> 14) & 0x3fff) + 1;
                    ctx.image_config = Some(ImageConfig { width, height });
                }
                s.skip(i64::from(chunk_len) - 5)?;
            }
            _ => {
                s.skip(i64::from(chunk_len))?;
            }
        }
    }
}

fn u24_le(b: &[u8]) -> u32 {
    u32::from(b[0]) | u32::from(b[1]) << 8 | u32::from(b[2]) << 16
}
