//! JPEG walker: SOI, then a marker/segment loop dispatching APP1 (EXIF or
//! XMP), APP13 (IPTC) and SOF0/1/2 (dimensions). Stops at SOS or once every
//! requested source has been satisfied.

use std::io::{BufReader, Read, Seek};

use crate::error::Error;
use crate::exif::ExifDecoder;
use crate::io::SourceReader;
use crate::iptc::IptcDecoder;
use crate::{xmp, Ctx, ImageConfig, Source};

const MARKER_SOI: u16 = 0xffd8;
const MARKER_APP1: u16 = 0xffe1;
const MARKER_APP13: u16 = 0xffed;
const MARKER_SOS: u16 = 0xffda;
const MARKER_SOF0: u16 = 0xffc0;
const MARKER_SOF1: u16 = 0xffc1;
const MARKER_SOF2: u16 = 0xffc2;

/// "Exif" in the APP1 header.
const EXIF_HEADER: u32 = 0x4578_6966;
/// The 29-byte APP1 XMP identifier.
const XMP_MARKER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

pub(crate) fn decode<R: Read + Seek>(s: &mut SourceReader<R>, ctx: &mut Ctx) -> Result<(), Error> {
    let Ok(soi) = s.read_u16() else {
        return Ok(());
    };
    if s.is_eof() || soi != MARKER_SOI {
        return Ok(());
    }

    let mut source_set =
        (Source::EXIF | Source::IPTC | Source::XMP | Source::CONFIG) & ctx.sources;

    loop {
        if source_set.is_empty() {
            return Ok(());
        }
        let marker = s.read_u16()?;
        if s.is_eof() {
            return Ok(());
        }
        if marker == 0 {
            continue;
        }
        if marker == MARKER_SOS {
            // Start of scan; no metadata follows.
            return Ok(());
        }

        // Segment length includes its own two bytes.
        let length = s.read_u16()?;
        if length < 2 {
            return Err(Error::invalid_format("JPEG segment length below 2"));
        }
        let length = u32::from(length) - 2;

        if marker == MARKER_APP1 {
            let segment_start = s.pos()?;
            let segment_end = segment_start + u64::from(length);

            if source_set.has(Source::XMP) && length as usize >= XMP_MARKER.len() {
                let is_xmp = match s.read_bytes_volatile(XMP_MARKER.len()) {
                    Ok(b) => b == XMP_MARKER,
                    Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => false,
                    Err(e) => return Err(e),
                };
                if is_xmp {
                    source_set = source_set.remove(Source::XMP);
                    let payload_len = u64::from(length) - XMP_MARKER.len() as u64;
                    let limited = s.get_mut().take(payload_len);
                    xmp::decode(BufReader::new(limited), ctx)?;
                    s.seek(segment_end)?;
                    continue;
                }
                // Not XMP, rewind for the EXIF probe.
                s.seek(segment_start)?;
            }

            if source_set.has(Source::EXIF) {
                if handle_exif(s, ctx, u64::from(length))? {
                    source_set = source_set.remove(Source::EXIF);
                }
                s.seek(segment_end)?;
                continue;
            }

            s.seek(segment_end)?;
            continue;
        }

        if marker == MARKER_APP13 && source_set.has(Source::IPTC) {
            source_set = source_set.remove(Source::IPTC);
            handle_iptc(s, ctx, length)?;
            continue;
        }

        if source_set.has(Source::CONFIG)
            && (marker == MARKER_SOF0 || marker == MARKER_SOF1 || marker == MARKER_SOF2)
        {
            source_set = source_set.remove(Source::CONFIG);
            s.skip(1)?; // sample precision
            let height = u32::from(s.read_u16()?);
            let width = u32::from(s.read_u16()?);
            ctx.image_config = Some(ImageConfig { width, height });
            s.skip(i64::from(length) - 5)?;
            continue;
        }

        s.skip(i64::from(length))?;
    }
}

/// Materialize the APP1 payload and run the EXIF decoder over it. Returns
/// whether the segment carried the "Exif" header. A truncated EXIF block
/// ends quietly so IPTC and XMP later in the file still decode.
fn handle_exif<R: Read + Seek>(
    s: &mut SourceReader<R>,
    ctx: &mut Ctx,
    length: u64,
) -> Result<bool, Error> {
    let thumbnail_offset = s.pos()?;
    let sub = s.buffered_reader(length)?;
    let mut sub_reader = SourceReader::new(sub, s.byte_order);

    let header = match sub_reader.read_u32() {
        Ok(v) => v,
        Err(e) if e.is_truncation() => return Ok(false),
        Err(e) => return Err(e),
    };
    if header != EXIF_HEADER {
        return Ok(false);
    }
    sub_reader.skip(2)?; // null + padding

    match ExifDecoder::new(&mut sub_reader, ctx, thumbnail_offset).decode() {
        Ok(()) => Ok(true),
        Err(e) if e.is_truncation() => {
            ctx.warnf("truncated EXIF segment");
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

fn handle_iptc<R: Read + Seek>(
    s: &mut SourceReader<R>,
    ctx: &mut Ctx,
    length: u32,
) -> Result<(), Error> {
    // The Photoshop APP13 header precedes the 8BIM blocks.
    const HEADER_LENGTH: u32 = 14;
    let Some(rest) = length.checked_sub(HEADER_LENGTH) else {
        return Err(Error::invalid_format("APP13 segment too short"));
    };
    s.skip(i64::from(HEADER_LENGTH))?;
    let sub = s.buffered_reader(u64::from(rest))?;
    match IptcDecoder::new(sub, ctx).decode_blocks() {
        Ok(()) => Ok(()),
        Err(Error::Stop) => Ok(()),
        Err(e) => Err(e),
    }
}

