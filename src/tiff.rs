//! TIFF walker: validates the header, pre-scans IFD0 for dimensions when
//! requested, then hands the stream to the EXIF IFD decoder.

use std::io::{Read, Seek};

use crate::error::Error;
use crate::exif::ExifDecoder;
use crate::io::{ByteOrder, SourceReader};
use crate::{Ctx, ImageConfig, Source};

pub(crate) const TIFF_MAGIC: u16 = 42;
pub(crate) const BYTE_ORDER_BIG: u16 = 0x4d4d;
pub(crate) const BYTE_ORDER_LITTLE: u16 = 0x4949;

const TAG_IMAGE_WIDTH: u16 = 0x0100;
const TAG_IMAGE_HEIGHT: u16 = 0x0101;

/// TIFF SHORT type code.
pub(crate) const TYPE_SHORT: u16 = 3;

/// Read the byte-order mark, magic and IFD0 offset, position the stream at
/// IFD0 and set the reader's byte order. Shared with the raw walker.
pub(crate) fn read_header<R: Read + Seek>(s: &mut SourceReader<R>) -> Result<(), Error> {
    let byte_order_tag = s.read_u16()?;
    match byte_order_tag {
        BYTE_ORDER_BIG => s.byte_order = ByteOrder::Big,
        BYTE_ORDER_LITTLE => s.byte_order = ByteOrder::Little,
        _ => return Err(Error::invalid_format("invalid TIFF byte-order mark")),
    }

    if s.read_u16()? != TIFF_MAGIC {
        return Err(Error::invalid_format("invalid TIFF magic"));
    }

    let ifd_offset = s.read_u32()?;
    if ifd_offset < 8 {
        return Err(Error::invalid_format("invalid IFD0 offset"));
    }
    s.skip(i64::from(ifd_offset) - 8)?;
    Ok(())
}

/// Read one SHORT-or-LONG dimension value from the 4-byte value slot.
pub(crate) fn read_dimension<R: Read + Seek>(
    s: &mut SourceReader<R>,
    data_type: u16,
) -> Result<u32, Error> {
    if data_type == TYPE_SHORT {
        let v = u32::from(s.read_u16()?);
        s.skip(2)?; // padding
        Ok(v)
    } else {
        s.read_u32()
    }
}

pub(crate) fn decode<R: Read + Seek>(s: &mut SourceReader<R>, ctx: &mut Ctx) -> Result<(), Error> {
    read_header(s)?;

    if ctx.sources.has(Source::CONFIG) {
        let ifd_pos = s.pos()?;
        let num_tags = s.read_u16()?;
        let (mut width, mut height) = (0u32, 0u32);
        for _ in 0..num_tags {
            let tag_id = s.read_u16()?;
            let data_type = s.read_u16()?;
            let _count = s.read_u32()?;
            if tag_id == TAG_IMAGE_WIDTH || tag_id == TAG_IMAGE_HEIGHT {
                let value = read_dimension(s, data_type)?;
                if tag_id == TAG_IMAGE_WIDTH {
                    width = value;
                } else {
                    height = value;
                }
                if width > 0 && height > 0 {
                    break;
                }
            } else {
                s.skip(4)?;
            }
        }
        ctx.image_config = Some(ImageConfig { width, height });

        if ctx.sources == Source::CONFIG {
            return Ok(());
        }
        s.seek(ifd_pos)?;
    }

    ExifDecoder::new(s, ctx, 0).decode_tags("IFD0")
}
