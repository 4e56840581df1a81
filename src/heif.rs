//! HEIF/AVIF walker: scans the ISOBMFF box tree for the `meta` box and
//! resolves the EXIF and XMP items through `iinf` + `iloc`, and the primary
//! image's dimensions through `pitm` + `ipma` + `ipco` (`ispe`/`irot`).

use std::collections::HashMap;
use std::io::{BufReader, Read, Seek};

use crate::error::Error;
use crate::exif::ExifDecoder;
use crate::io::SourceReader;
use crate::{xmp, Ctx, ImageConfig, Source};

/// One image property collected from `ipco`, in order.
#[derive(Default, Clone, Copy)]
struct IpcoProp {
    is_ispe: bool,
    is_irot: bool,
    width: u32,
    height: u32,
    angle: u8,
}

/// Box header: (start position, total size including header, type).
/// A size of 1 means the actual size follows in the next 8 bytes; a size of
/// 0 means the box extends to end of file.
fn read_box<R: Read + Seek>(s: &mut SourceReader<R>) -> Result<(u64, u64, [u8; 4]), Error> {
    let start = s.pos()?;
    let size = s.read_u32()?;
    let mut box_type = [0u8; 4];
    s.read_full(&mut box_type)?;
    let total = if size == 1 {
        s.read_u64()?
    } else {
        u64::from(size)
    };
    Ok((start, total, box_type))
}

/// Read an `iloc` field of the declared size as a big-endian integer.
fn read_var_uint<R: Read + Seek>(s: &mut SourceReader<R>, n: usize) -> Result<u64, Error> {
    match n {
        0 => Ok(0),
        2 => Ok(u64::from(s.read_u16()?)),
        4 => Ok(u64::from(s.read_u32()?)),
        8 => s.read_u64(),
        _ => Err(Error::invalid_format(format!(
            "heif: unsupported iloc field size: {n}"
        ))),
    }
}

pub(crate) fn decode<R: Read + Seek>(s: &mut SourceReader<R>, ctx: &mut Ctx) -> Result<(), Error> {
    // Step 1: the ftyp box must come first.
    let (ftyp_start, ftyp_size, ftyp_type) = read_box(s)?;
    if s.is_eof() || &ftyp_type != b"ftyp" {
        return Err(Error::invalid_format("missing ftyp box"));
    }
    if ftyp_size > 0 {
        s.seek(ftyp_start + ftyp_size)?;
    }

    // Step 2: skim top-level boxes for meta.
    let (meta_start, meta_size) = loop {
        let (start, size, box_type) = read_box(s)?;
        if s.is_eof() {
            return Ok(()); // no meta box; nothing to decode
        }
        if &box_type == b"meta" {
            break (start, size);
        }
        if size == 0 {
            return Ok(()); // box extends to EOF, meta not found
        }
        s.seek(start + size)?;
    };

    // meta is a FullBox.
    s.skip(4)?;
    let meta_end = if meta_size == 0 {
        u64::MAX
    } else {
        meta_start + meta_size
    };

    let mut exif_item_id = 0u32;
    let mut xmp_item_id = 0u32;
    let mut primary_item_id = 0u32;
    // (offset, length) of each item's first extent, resolved after the full
    // meta scan so box ordering does not matter.
    let mut iloc_entries: HashMap<u32, (u64, u64)> = HashMap::new();
    let mut ipco_props: Vec<IpcoProp> = Vec::new();
    // 1-based property indices associated with the primary item.
    let mut primary_prop_indices: Vec<usize> = Vec::new();

    // Step 3: iterate the inner boxes of meta.
    while s.pos()?.saturating_add(8) <= meta_end {
        let (inner_start, inner_size, inner_type) = read_box(s)?;
        if s.is_eof() || inner_size == 0 {
            break;
        }
        let inner_end = inner_start + inner_size;

        match &inner_type {
            b"pitm" => {
                if ctx.sources.has(Source::CONFIG) {
                    let version_flags = s.read_u32()?;
                    primary_item_id = if version_flags >> 24 == 0 {
                        u32::from(s.read_u16()?)
                    } else {
                        s.read_u32()?
                    };
                }
            }
            b"iinf" => {
                decode_iinf(s, ctx, &mut exif_item_id, &mut xmp_item_id)?;
            }
            b"iloc" => {
                decode_iloc(s, &mut iloc_entries)?;
            }
            b"iprp" => {
                if ctx.sources.has(Source::CONFIG) {
                    decode_iprp(
                        s,
                        inner_end,
                        primary_item_id,
                        &mut ipco_props,
                        &mut primary_prop_indices,
                    )?;
                }
            }
            _ => {}
        }
        s.seek(inner_end)?;
    }

    // Step 4: resolve the item locations.
    let exif_location = (exif_item_id != 0)
        .then(|| iloc_entries.get(&exif_item_id).copied())
        .flatten();
    let xmp_location = (xmp_item_id != 0)
        .then(|| iloc_entries.get(&xmp_item_id).copied())
        .flatten();

    // Step 5: dimensions from the collected properties.
    if ctx.sources.has(Source::CONFIG) && !ipco_props.is_empty() {
        resolve_config(ctx, primary_item_id, &ipco_props, &primary_prop_indices);
    }

    // Step 6: EXIF via its absolute file offset.
    if ctx.sources.has(Source::EXIF) {
        if let Some((offset, length)) = exif_location {
            if offset != 0 && length > 4 {
                handle_exif(s, ctx, offset, length)?;
            }
        }
    }

    // Step 7: XMP.
    if ctx.sources.has(Source::XMP) {
        if let Some((offset, length)) = xmp_location {
            if offset != 0 && length > 0 {
                s.seek(offset)?;
                let sub = s.buffered_reader(length)?;
                xmp::decode(BufReader::new(sub), ctx)?;
            }
        }
    }

    Ok(())
}

/// `iinf`: a count of `infe` boxes mapping item IDs to item types. Only
/// `infe` version 2 and 3 are understood; older versions warn and skip.
fn decode_iinf<R: Read + Seek>(
    s: &mut SourceReader<R>,
    ctx: &mut Ctx,
    exif_item_id: &mut u32,
    xmp_item_id: &mut u32,
) -> Result<(), Error> {
    let version_flags = s.read_u32()?;
    let count = if version_flags >> 24 == 0 {
        u32::from(s.read_u16()?)
    } else {
        s.read_u32()?
    };

    for _ in 0..count {
        let (infe_start, infe_size, infe_type) = read_box(s)?;
        if s.is_eof() || infe_size == 0 {
            break;
        }
        let infe_end = infe_start + infe_size;

        if &infe_type == b"infe" {
            let version_flags = s.read_u32()?;
            let infe_version = version_flags >> 24;
            if infe_version >= 2 {
                let item_id = if infe_version == 2 {
                    u32::from(s.read_u16()?)
                } else {
                    s.read_u32()?
                };
                s.skip(2)?; // protection index
                let mut item_type = [0u8; 4];
                s.read_full(&mut item_type)?;
                match &item_type {
                    b"Exif" => *exif_item_id = item_id,
                    // "mime" items are assumed to carry XMP.
                    b"mime" => *xmp_item_id = item_id,
                    _ => {}
                }
            } else {
                ctx.warnf(&format!(
                    "heif: infe version {infe_version} not supported, skipping"
                ));
            }
        }
        s.seek(infe_end)?;
    }
    Ok(())
}

/// `iloc`: per-item construction method and extents. Only construction
/// method 0 (absolute file offsets) is honored; other methods are read and
/// discarded.
fn decode_iloc<R: Read + Seek>(
    s: &mut SourceReader<R>,
    entries: &mut HashMap<u32, (u64, u64)>,
) -> Result<(), Error> {
    let version_flags = s.read_u32()?;
    let version = (version_flags >> 24) as u8;

    let b1 = s.read_u8()?;
    let offset_size = usize::from(b1 >> 4);
    let length_size = usize::from(b1 & 0x0f);
    let b2 = s.read_u8()?;
    let base_offset_size = usize::from(b2 >> 4);
    let index_size = usize::from(b2 & 0x0f);

    let count = if version < 2 {
        u32::from(s.read_u16()?)
    } else {
        s.read_u32()?
    };

    for _ in 0..count {
        let item_id = if version < 2 {
            u32::from(s.read_u16()?)
        } else {
            s.read_u32()?
        };

        let construction_method = if version >= 1 { s.read_u16()? } else { 0 };
        s.skip(2)?; // data reference index

        let base_offset = read_var_uint(s, base_offset_size)?;
        let extent_count = s.read_u16()?;

        if construction_method != 0 {
            for _ in 0..extent_count {
                if version >= 1 && index_size > 0 {
                    read_var_uint(s, index_size)?;
                }
                read_var_uint(s, offset_size)?;
                read_var_uint(s, length_size)?;
            }
            continue;
        }

        let mut first: Option<(u64, u64)> = None;
        for _ in 0..extent_count {
            if version >= 1 && index_size > 0 {
                read_var_uint(s, index_size)?; // extent index, discarded
            }
            let offset = read_var_uint(s, offset_size)?;
            let length = read_var_uint(s, length_size)?;
            if first.is_none() {
                first = Some((base_offset + offset, length));
            }
        }
        if let Some(location) = first {
            entries.insert(item_id, location);
        }
    }
    Ok(())
}

/// `iprp`: `ipco` is the ordered property list (`ispe`, `irot` recognized)
/// and `ipma` associates items with 1-based property indices.
fn decode_iprp<R: Read + Seek>(
    s: &mut SourceReader<R>,
    iprp_end: u64,
    primary_item_id: u32,
    ipco_props: &mut Vec<IpcoProp>,
    primary_prop_indices: &mut Vec<usize>,
) -> Result<(), Error> {
    while s.pos()?.saturating_add(8) <= iprp_end {
        let (child_start, child_size, child_type) = read_box(s)?;
        if s.is_eof() || child_size == 0 {
            break;
        }
        let child_end = child_start + child_size;

        match &child_type {
            b"ipco" => {
                while s.pos()?.saturating_add(8) <= child_end {
                    let (prop_start, prop_size, prop_type) = read_box(s)?;
                    if s.is_eof() || prop_size == 0 {
                        break;
                    }
                    let prop_end = prop_start + prop_size;

                    let mut prop = IpcoProp::default();
                    match &prop_type {
                        b"ispe" => {
                            s.skip(4)?; // version + flags
                            prop.is_ispe = true;
                            prop.width = s.read_u32()?;
                            prop.height = s.read_u32()?;
                        }
                        b"irot" => {
                            prop.is_irot = true;
                            prop.angle = s.read_u8()?;
                        }
                        _ => {}
                    }
                    ipco_props.push(prop);
                    s.seek(prop_end)?;
                }
            }
            b"ipma" => {
                let version_flags = s.read_u32()?;
                let version = (version_flags >> 24) as u8;
                let flags = version_flags & 0xff_ffff;
                let entry_count = s.read_u32()?;
                for _ in 0..entry_count {
                    let item_id = if version < 1 {
                        u32::from(s.read_u16()?)
                    } else {
                        s.read_u32()?
                    };
                    let assoc_count = s.read_u8()?;
                    for _ in 0..assoc_count {
                        let prop_index = if flags & 1 != 0 {
                            usize::from(s.read_u16()? & 0x7fff)
                        } else {
                            usize::from(s.read_u8()? & 0x7f)
                        };
                        if item_id == primary_item_id && primary_item_id != 0 {
                            primary_prop_indices.push(prop_index);
                        }
                    }
                }
            }
            _ => {}
        }
        s.seek(child_end)?;
    }
    Ok(())
}

/// Pick the primary item's `ispe` via its property associations, falling
/// back to the largest `ispe` seen; `irot` of 90°/270° swaps the axes.
fn resolve_config(
    ctx: &mut Ctx,
    primary_item_id: u32,
    ipco_props: &[IpcoProp],
    primary_prop_indices: &[usize],
) {
    let mut width = 0u32;
    let mut height = 0u32;
    let mut rotate = false;

    if primary_item_id != 0 && !primary_prop_indices.is_empty() {
        for &index in primary_prop_indices {
            if index < 1 || index > ipco_props.len() {
                continue;
            }
            let prop = ipco_props[index - 1];
            if prop.is_ispe && prop.width > 0 && prop.height > 0 {
                width = prop.width;
                height = prop.height;
            }
            if prop.is_irot && (prop.angle == 1 || prop.angle == 3) {
                rotate = true;
            }
        }
    }

    if width == 0 || height == 0 {
        // The primary image is larger than tiles or thumbnails in standard
        // HEIF/AVIF output, so the largest ispe is the sane fallback.
        for prop in ipco_props {
            if prop.is_ispe
                && prop.width > 0
                && prop.height > 0
                && u64::from(prop.width) * u64::from(prop.height)
                    > u64::from(width) * u64::from(height)
            {
                width = prop.width;
                height = prop.height;
            }
        }
        rotate = ipco_props
            .iter()
            .any(|p| p.is_irot && (p.angle == 1 || p.angle == 3));
    }

    if width > 0 && height > 0 {
        if rotate {
            std::mem::swap(&mut width, &mut height);
        }
        ctx.image_config = Some(ImageConfig { width, height });
    }
}

/// HEIF EXIF payloads start with a 4-byte big-endian header offset to skip
/// before the TIFF header. Truncated EXIF ends quietly so XMP in the same
/// file still decodes.
fn handle_exif<R: Read + Seek>(
    s: &mut SourceReader<R>,
    ctx: &mut Ctx,
    offset: u64,
    length: u64,
) -> Result<(), Error> {
    s.seek(offset)?;
    let exif_header_offset = s.read_u32()?;
    if u64::from(exif_header_offset) > length - 4 {
        return Err(Error::invalid_format(format!(
            "heif: invalid exif header offset {exif_header_offset}"
        )));
    }
    s.skip(i64::from(exif_header_offset))?;
    let thumbnail_pos = s.pos()?;
    let data_len = length - 4 - u64::from(exif_header_offset);
    if data_len == 0 {
        return Ok(());
    }
    let sub = s.buffered_reader(data_len)?;
    let mut sub_reader = SourceReader::new(sub, s.byte_order);
    match ExifDecoder::new(&mut sub_reader, ctx, thumbnail_pos).decode() {
        Ok(()) => Ok(()),
        Err(e) if e.is_truncation() => {
            ctx.warnf("heif: truncated EXIF item");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
