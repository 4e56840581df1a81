//! Walker for the TIFF-based raw formats (DNG, CR2, NEF, ARW, PEF). The
//! header parse matches plain TIFF; dimension selection walks IFD0, the
//! ExifIFD and any SubIFDs, preferring DefaultCropSize, then the largest
//! area found. The full EXIF pass follows the IFD0 → IFD1 chain.

use std::io::{Read, Seek};

use crate::error::Error;
use crate::exif::ExifDecoder;
use crate::io::SourceReader;
use crate::tiff;
use crate::{Ctx, ImageConfig, Source};

const TAG_IMAGE_WIDTH: u16 = 0x0100;
const TAG_IMAGE_HEIGHT: u16 = 0x0101;
const TAG_SUB_IFDS: u16 = 0x014a;
const TAG_EXIF_IFD_POINTER: u16 = 0x8769;
const TAG_EXIF_IMAGE_WIDTH: u16 = 0xa002;
const TAG_EXIF_IMAGE_HEIGHT: u16 = 0xa003;
const TAG_DEFAULT_CROP_SIZE: u16 = 0xc620;

pub(crate) fn decode<R: Read + Seek>(s: &mut SourceReader<R>, ctx: &mut Ctx) -> Result<(), Error> {
    tiff::read_header(s)?;

    if ctx.sources.has(Source::CONFIG) {
        let ifd_pos = s.pos()?;
        resolve_dimensions(s, ctx)?;
        if ctx.sources == Source::CONFIG {
            return Ok(());
        }
        s.seek(ifd_pos)?;
    }

    let mut dec = ExifDecoder::new(s, ctx, 0);
    dec.decode_tags("IFD0")?;

    // Thumbnail IFD.
    let ifd1_offset = dec.next_ifd_offset()?;
    if ifd1_offset > 0 {
        dec.seek_to(u64::from(ifd1_offset))?;
        dec.decode_tags("IFD1")?;
    }
    Ok(())
}

fn resolve_dimensions<R: Read + Seek>(
    s: &mut SourceReader<R>,
    ctx: &mut Ctx,
) -> Result<(), Error> {
    let (mut width, mut height) = (0u32, 0u32);
    let mut exif_ifd_offset = 0u32;
    let mut sub_ifd_offsets: Vec<u32> = Vec::new();
    let mut default_crop: Option<(u32, u32)> = None;

    let num_tags = s.read_u16()?;
    for _ in 0..num_tags {
        let tag_id = s.read_u16()?;
        let data_type = s.read_u16()?;
        let count = s.read_u32()?;

        match tag_id {
            TAG_IMAGE_WIDTH | TAG_IMAGE_HEIGHT => {
                let value = tiff::read_dimension(s, data_type)?;
                if tag_id == TAG_IMAGE_WIDTH {
                    width = value;
                } else {
                    height = value;
                }
            }
            TAG_EXIF_IFD_POINTER => {
                exif_ifd_offset = s.read_u32()?;
            }
            TAG_SUB_IFDS => {
                if count == 1 {
                    sub_ifd_offsets.push(s.read_u32()?);
                } else {
                    // The value slot holds an offset to the offset vector.
                    let array_offset = s.read_u32()?;
                    s.preserve_pos(|s| {
                        s.seek(u64::from(array_offset))?;
                        for _ in 0..count {
                            sub_ifd_offsets.push(s.read_u32()?);
                        }
                        Ok(())
                    })?;
                }
            }
            TAG_DEFAULT_CROP_SIZE => {
                if let Some(crop) = read_default_crop_size(s, data_type, count)? {
                    default_crop = Some(crop);
                }
            }
            _ => s.skip(4)?,
        }
    }

    // Follow the ExifIFD for ExifImageWidth/ExifImageHeight.
    let (mut exif_w, mut exif_h) = (0u32, 0u32);
    if exif_ifd_offset > 0 {
        s.preserve_pos(|s| {
            s.seek(u64::from(exif_ifd_offset))?;
            let (w, h) = read_ifd_dimensions(s, TAG_EXIF_IMAGE_WIDTH, TAG_EXIF_IMAGE_HEIGHT)?;
            exif_w = w;
            exif_h = h;
            Ok(())
        })?;
    }

    // Follow SubIFDs for the largest dimensions and DefaultCropSize.
    let (mut sub_w, mut sub_h) = (0u32, 0u32);
    for &offset in &sub_ifd_offsets {
        s.preserve_pos(|s| {
            s.seek(u64::from(offset))?;
            let (w, h, crop) = read_sub_ifd_info(s)?;
            if let Some((crop_w, crop_h)) = crop {
                if crop_w > 0 && crop_h > 0 {
                    default_crop = Some((crop_w, crop_h));
                }
            }
            if u64::from(w) * u64::from(h) > u64::from(sub_w) * u64::from(sub_h) {
                sub_w = w;
                sub_h = h;
            }
            Ok(())
        })?;
    }

    // DefaultCropSize wins; otherwise the largest area seen.
    let (mut best_w, mut best_h) = (width, height);
    if u64::from(exif_w) * u64::from(exif_h) > u64::from(best_w) * u64::from(best_h) {
        (best_w, best_h) = (exif_w, exif_h);
    }
    if u64::from(sub_w) * u64::from(sub_h) > u64::from(best_w) * u64::from(best_h) {
        (best_w, best_h) = (sub_w, sub_h);
    }
    if let Some((crop_w, crop_h)) = default_crop {
        if crop_w > 0 && crop_h > 0 {
            (best_w, best_h) = (crop_w, crop_h);
        }
    }

    ctx.image_config = Some(ImageConfig {
        width: best_w,
        height: best_h,
    });
    Ok(())
}

/// DefaultCropSize comes as SHORT×2, LONG×2 or RATIONAL×2; the latter two
/// spill out of the 4-byte value slot.
fn read_default_crop_size<R: Read + Seek>(
    s: &mut SourceReader<R>,
    data_type: u16,
    count: u32,
) -> Result<Option<(u32, u32)>, Error> {
    match (data_type, count) {
        (4, 2) => {
            let crop_offset = s.read_u32()?;
            let mut crop = (0, 0);
            s.preserve_pos(|s| {
                s.seek(u64::from(crop_offset))?;
                crop = (s.read_u32()?, s.read_u32()?);
                Ok(())
            })?;
            Ok(Some(crop))
        }
        (3, 2) => {
            let w = u32::from(s.read_u16()?);
            let h = u32::from(s.read_u16()?);
            Ok(Some((w, h)))
        }
        (5, 2) => {
            let crop_offset = s.read_u32()?;
            let mut crop = (0, 0);
            s.preserve_pos(|s| {
                s.seek(u64::from(crop_offset))?;
                let (num1, den1) = (s.read_u32()?, s.read_u32()?);
                let (num2, den2) = (s.read_u32()?, s.read_u32()?);
                let w = if den1 > 0 { num1 / den1 } else { 0 };
                let h = if den2 > 0 { num2 / den2 } else { 0 };
                crop = (w, h);
                Ok(())
            })?;
            Ok(Some(crop))
        }
        _ => {
            s.skip(4)?;
            Ok(None)
        }
    }
}

/// Scan the IFD at the current position for the given width/height tags.
fn read_ifd_dimensions<R: Read + Seek>(
    s: &mut SourceReader<R>,
    w_tag: u16,
    h_tag: u16,
) -> Result<(u32, u32), Error> {
    let num_tags = s.read_u16()?;
    let (mut w, mut h) = (0u32, 0u32);
    for _ in 0..num_tags {
        let tag_id = s.read_u16()?;
        let data_type = s.read_u16()?;
        let _count = s.read_u32()?;
        if tag_id == w_tag || tag_id == h_tag {
            let value = tiff::read_dimension(s, data_type)?;
            if tag_id == w_tag {
                w = value;
            } else {
                h = value;
            }
            if w > 0 && h > 0 {
                return Ok((w, h));
            }
        } else {
            s.skip(4)?;
        }
    }
    Ok((w, h))
}

/// Scan a SubIFD for ImageWidth, ImageHeight and DefaultCropSize.
fn read_sub_ifd_info<R: Read + Seek>(
    s: &mut SourceReader<R>,
) -> Result<(u32, u32, Option<(u32, u32)>), Error> {
    let num_tags = s.read_u16()?;
    let (mut w, mut h) = (0u32, 0u32);
    let mut crop = None;
    for _ in 0..num_tags {
        let tag_id = s.read_u16()?;
        let data_type = s.read_u16()?;
        let count = s.read_u32()?;
        match tag_id {
            TAG_IMAGE_WIDTH | TAG_IMAGE_HEIGHT => {
                let value = tiff::read_dimension(s, data_type)?;
                if tag_id == TAG_IMAGE_WIDTH {
                    w = value;
                } else {
                    h = value;
                }
            }
            TAG_DEFAULT_CROP_SIZE => {
                if let Some(c) = read_default_crop_size(s, data_type, count)? {
                    crop = Some(c);
                }
            }
            _ => s.skip(4)?,
        }
    }
    Ok((w, h, crop))
}
