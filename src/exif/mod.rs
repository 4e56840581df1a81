//! EXIF decoding: a TIFF header followed by a chain of IFDs, each a list of
//! 12-byte entries plus a 4-byte next-IFD offset. Entries either hold their
//! value in place (total size ≤ 4 bytes) or point to an out-of-line payload,
//! and a few dedicated tag IDs point to nested IFDs or to embedded XMP/IPTC
//! packets.

mod fields;

use std::io::{BufReader, Read, Seek};

use crate::convert::{self, ConvCtx};
use crate::error::Error;
use crate::io::{ByteOrder, SourceReader};
use crate::iptc::IptcDecoder;
use crate::value::{is_undefined, to_printable_value, trim_nulls, Value};
use crate::{xmp, Ctx, Source, TagInfo, UNKNOWN_PREFIX};

const BYTE_ORDER_BIG: u16 = 0x4d4d;
const BYTE_ORDER_LITTLE: u16 = 0x4949;

/// EXIF tag carrying an out-of-line XMP packet (ApplicationNotes).
const TAG_XMP: u16 = 0x02bc;
/// EXIF tag carrying an out-of-line IPTC packet (IPTC-NAA).
const TAG_IPTC: u16 = 0x83bb;

const TAG_NAME_THUMBNAIL_OFFSET: &str = "ThumbnailOffset";

/// The TIFF field types and their per-element sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExifType {
    UnsignedByte,
    Ascii,
    UnsignedShort,
    UnsignedLong,
    UnsignedRat,
    SignedByte,
    Undef,
    SignedShort,
    SignedLong,
    SignedRat,
    Float,
    Double,
}

impl ExifType {
    fn from_code(code: u16) -> Option<ExifType> {
        Some(match code {
            1 => ExifType::UnsignedByte,
            2 => ExifType::Ascii,
            3 => ExifType::UnsignedShort,
            4 => ExifType::UnsignedLong,
            5 => ExifType::UnsignedRat,
            6 => ExifType::SignedByte,
            7 => ExifType::Undef,
            8 => ExifType::SignedShort,
            9 => ExifType::SignedLong,
            10 => ExifType::SignedRat,
            11 => ExifType::Float,
            12 => ExifType::Double,
            _ => return None,
        })
    }

    fn size(self) -> u32 {
        match self {
            ExifType::UnsignedByte | ExifType::Ascii | ExifType::SignedByte | ExifType::Undef => 1,
            ExifType::UnsignedShort | ExifType::SignedShort => 2,
            ExifType::UnsignedLong | ExifType::SignedLong | ExifType::Float => 4,
            ExifType::UnsignedRat | ExifType::SignedRat | ExifType::Double => 8,
        }
    }
}

/// Decoder for one TIFF-structured metadata block.
pub(crate) struct ExifDecoder<'a, R> {
    s: &'a mut SourceReader<R>,
    ctx: &'a mut Ctx,
    /// Added to stored thumbnail offsets so the caller receives an absolute
    /// position in the original file.
    thumbnail_offset: u64,
    /// IFD kinds already entered; repeated pointer tags are skipped so
    /// adversarial IFD graphs cannot loop.
    seen_ifds: Vec<&'static str>,
}

impl<'a, R: Read + Seek> ExifDecoder<'a, R> {
    pub(crate) fn new(
        s: &'a mut SourceReader<R>,
        ctx: &'a mut Ctx,
        thumbnail_offset: u64,
    ) -> ExifDecoder<'a, R> {
        ExifDecoder {
            s,
            ctx,
            thumbnail_offset,
            seen_ifds: Vec::new(),
        }
    }

    /// Decode a full TIFF block from the header: byte-order mark, magic,
    /// IFD0, then the thumbnail IFD1 via the next-IFD chain.
    pub(crate) fn decode(&mut self) -> Result<(), Error> {
        self.s.reader_offset = self.s.pos()?;
        let byte_order_tag = self.s.read_u16()?;
        match byte_order_tag {
            BYTE_ORDER_BIG => self.s.byte_order = ByteOrder::Big,
            BYTE_ORDER_LITTLE => self.s.byte_order = ByteOrder::Little,
            _ => return Ok(()),
        }
        self.s.skip(2)?;

        // Main image.
        let ifd0_offset = self.s.read_u32()?;
        if ifd0_offset < 8 {
            return Ok(());
        }
        self.s.skip(i64::from(ifd0_offset) - 8)?;
        self.decode_tags("IFD0")?;

        // Thumbnail IFD.
        let ifd1_offset = self.s.read_u32()?;
        if ifd1_offset == 0 {
            return Ok(());
        }
        self.s.seek(u64::from(ifd1_offset) + self.s.reader_offset)?;
        self.decode_tags("IFD1")
    }

    /// Decode the IFD at the current position.
    pub(crate) fn decode_tags(&mut self, namespace: &str) -> Result<(), Error> {
        let num_tags = self.s.read_u16()?;
        for _ in 0..num_tags {
            self.decode_tag(namespace)?;
        }
        Ok(())
    }

    fn decode_tags_at(&mut self, namespace: &str, offset: u64) -> Result<(), Error> {
        let saved = self.s.pos()?;
        self.s.seek(offset + self.s.reader_offset)?;
        let result = self.decode_tags(namespace);
        self.s.seek(saved)?;
        result
    }

    /// Offset of the next IFD in the chain, read after `decode_tags`.
    pub(crate) fn next_ifd_offset(&mut self) -> Result<u32, Error> {
        self.s.read_u32()
    }

    /// Position the stream at `offset` relative to the TIFF origin.
    pub(crate) fn seek_to(&mut self, offset: u64) -> Result<(), Error> {
        self.s.seek(offset + self.s.reader_offset)
    }

    fn decode_tag(&mut self, namespace: &str) -> Result<(), Error> {
        let tag_id = self.s.read_u16()?;
        let data_type = self.s.read_u16()?;
        let count = self.s.read_u32()?;
        if count > 0x10000 {
            self.s.skip(4)?;
            return Ok(());
        }

        let mut tag_name = match fields::FIELDS.get(&tag_id) {
            Some(name) => (*name).to_string(),
            None => format!("{UNKNOWN_PREFIX}0x{tag_id:x}"),
        };
        // Context-dependent IDs carry space-separated alternatives; pick the
        // first.
        if let Some((first, _)) = tag_name.split_once(' ') {
            tag_name = first.to_string();
        }

        let ifd = fields::ifd_pointer_name(tag_id);
        if let Some(kind) = ifd {
            if self.seen_ifds.contains(&kind) {
                self.s.skip(4)?;
                return Ok(());
            }
            self.seen_ifds.push(kind);
        }

        let Some(typ) = ExifType::from_code(data_type) else {
            return Err(Error::invalid_format(format!(
                "unknown EXIF type {data_type}"
            )));
        };
        let val_len = typ.size() * count;

        if tag_id == TAG_XMP {
            return self.decode_embedded_xmp(val_len);
        }
        if tag_id == TAG_IPTC {
            return self.decode_embedded_iptc(val_len);
        }

        if !self.ctx.sources.has(Source::EXIF) || val_len > self.ctx.limit_tag_size {
            self.s.skip(4)?;
            return Ok(());
        }

        let mut tag_info = TagInfo {
            source: Source::EXIF,
            tag: tag_name.clone(),
            namespace: namespace.to_string(),
            value: Value::Undef,
        };

        if ifd.is_none() && !self.ctx.should_handle(&tag_info)? {
            self.s.skip(4)?;
            return Ok(());
        }

        let mut val = if val_len > 4 {
            let value_offset = self.s.read_u32()?;
            let offset = u64::from(value_offset) + self.s.reader_offset;
            let saved = self.s.pos()?;
            let result = self.read_out_of_line(offset, typ, count, val_len);
            self.s.seek(saved)?;
            result?
        } else {
            let v = convert_values(self.s, self.ctx, typ, count, val_len)?;
            let padding = 4 - val_len;
            if padding > 0 {
                self.s.skip(i64::from(padding))?;
            }
            v
        };

        if let Some(kind) = ifd {
            let Value::U32(offset) = val else {
                return Err(Error::invalid_format("invalid IFD pointer value"));
            };
            let child_namespace = format!("{namespace}/{kind}");
            return self.decode_tags_at(&child_namespace, u64::from(offset));
        }

        if convert::has_converter(&tag_name) {
            let ctx = &mut *self.ctx;
            let mut warn = |msg: &str| ctx.warnf(msg);
            let mut conv_ctx = ConvCtx {
                tag_name: &tag_name,
                byte_order: self.s.byte_order,
                warn: &mut warn,
            };
            val = convert::convert_tag(&mut conv_ctx, val);
            if let Value::F64(f) = val {
                if is_undefined(f) {
                    val = Value::Undef;
                }
            }
        } else {
            val = to_printable_value(val);
        }

        if tag_name == TAG_NAME_THUMBNAIL_OFFSET {
            if let Some(stored) = val.as_u32() {
                let absolute = u64::from(stored) + self.s.reader_offset + self.thumbnail_offset;
                val = Value::U32(absolute as u32);
            }
        }

        tag_info.value = val;
        self.ctx.handle(tag_info)
    }

    fn read_out_of_line(
        &mut self,
        offset: u64,
        typ: ExifType,
        count: u32,
        val_len: u32,
    ) -> Result<Value, Error> {
        self.s.seek(offset)?;
        let sub = self.s.buffered_reader(u64::from(val_len))?;
        let mut sub_reader = SourceReader::new(sub, self.s.byte_order);
        convert_values(&mut sub_reader, self.ctx, typ, count, val_len)
    }

    /// Tag 0x02BC: an XMP packet stored like any other out-of-line value.
    /// Best effort: a malformed payload warns and EXIF decoding continues.
    fn decode_embedded_xmp(&mut self, val_len: u32) -> Result<(), Error> {
        if !self.ctx.sources.has(Source::XMP) {
            self.s.skip(4)?;
            return Ok(());
        }
        let value_offset = self.s.read_u32()?;
        let offset = u64::from(value_offset) + self.s.reader_offset;
        let saved = self.s.pos()?;
        let decoded = (|| {
            self.s.seek(offset)?;
            let sub = self.s.buffered_reader(u64::from(val_len))?;
            xmp::decode(BufReader::new(sub), self.ctx)
        })();
        self.s.seek(saved)?;
        match decoded {
            Ok(()) => Ok(()),
            Err(Error::StopWalking) => Err(Error::StopWalking),
            Err(e) => {
                self.ctx.warnf(&format!("skipping malformed XMP packet: {e}"));
                Ok(())
            }
        }
    }

    /// Tag 0x83BB: an out-of-line IPTC packet of raw datasets.
    fn decode_embedded_iptc(&mut self, val_len: u32) -> Result<(), Error> {
        if !self.ctx.sources.has(Source::IPTC) {
            self.s.skip(4)?;
            return Ok(());
        }
        let value_offset = self.s.read_u32()?;
        let offset = u64::from(value_offset) + self.s.reader_offset;
        let saved = self.s.pos()?;
        let result = (|| {
            self.s.seek(offset)?;
            let sub = self.s.buffered_reader(u64::from(val_len))?;
            IptcDecoder::new(sub, self.ctx).decode_records()
        })();
        self.s.seek(saved)?;
        result
    }
}

/// Decode `count` elements of `typ` from `s`, collapsing all-byte lists to a
/// byte sequence and trimming ASCII values.
fn convert_values<R: Read + Seek>(
    s: &mut SourceReader<R>,
    ctx: &mut Ctx,
    typ: ExifType,
    count: u32,
    val_len: u32,
) -> Result<Value, Error> {
    if count == 0 {
        return Ok(Value::Text(String::new()));
    }

    if typ == ExifType::Ascii {
        let b = s.read_bytes_volatile(val_len as usize)?;
        let b = &b[..count as usize];
        return Ok(Value::Text(
            String::from_utf8_lossy(trim_nulls(b)).into_owned(),
        ));
    }

    if count == 1 {
        return convert_value(s, ctx, typ);
    }

    let mut values = Vec::with_capacity(count as usize);
    let mut all_bytes = true;
    for _ in 0..count {
        let v = convert_value(s, ctx, typ)?;
        if !matches!(v, Value::U8(_)) {
            all_bytes = false;
        }
        values.push(v);
    }

    if all_bytes {
        let bytes = values
            .into_iter()
            .map(|v| match v {
                Value::U8(b) => b,
                _ => 0,
            })
            .collect();
        return Ok(Value::Bytes(bytes));
    }
    Ok(Value::List(values))
}

fn convert_value<R: Read + Seek>(
    s: &mut SourceReader<R>,
    ctx: &mut Ctx,
    typ: ExifType,
) -> Result<Value, Error> {
    let v = match typ {
        ExifType::UnsignedByte | ExifType::Ascii | ExifType::Undef | ExifType::SignedByte => {
            Value::U8(s.read_u8()?)
        }
        ExifType::UnsignedShort | ExifType::SignedShort => Value::U16(s.read_u16()?),
        ExifType::UnsignedLong => Value::U32(s.read_u32()?),
        ExifType::SignedLong => Value::I32(s.read_i32()?),
        ExifType::UnsignedRat => {
            let (num, den) = (s.read_u32()?, s.read_u32()?);
            if den == 0 {
                return Ok(Value::Undef);
            }
            match crate::Rat::new(num, den) {
                Ok(r) => Value::URat(r),
                Err(e) => {
                    ctx.warnf(&format!("failed to convert rational: {e}"));
                    Value::I32(0)
                }
            }
        }
        ExifType::SignedRat => {
            let (num, den) = (s.read_i32()?, s.read_i32()?);
            match crate::Rat::new(num, den) {
                Ok(r) => Value::IRat(r),
                Err(e) => {
                    ctx.warnf(&format!("failed to convert signed rational: {e}"));
                    Value::I32(0)
                }
            }
        }
        ExifType::Float => Value::F32(s.read_f32()?),
        ExifType::Double => Value::F64(s.read_f64()?),
    };

    // NaN and ±Inf map to the "undef" sentinel, in line with ExifTool.
    match v {
        Value::F32(f) if is_undefined(f64::from(f)) => Ok(Value::Undef),
        Value::F64(f) if is_undefined(f) => Ok(Value::Undef),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ByteOrder;
    use crate::Ctx;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

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

    fn collecting_ctx() -> (Ctx, Arc<Mutex<Vec<TagInfo>>>) {
        let tags = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&tags);
        let ctx = Ctx::with_handler(
            Source::EXIF | Source::IPTC | Source::XMP,
            Box::new(move |tag| {
                sink.lock().unwrap().push(tag);
                Ok(())
            }),
        );
        (ctx, tags)
    }

    fn decode_tiff(data: Vec<u8>) -> Vec<TagInfo> {
        let (mut ctx, tags) = collecting_ctx();
        let mut s = SourceReader::new(Cursor::new(data), ByteOrder::Big);
        ExifDecoder::new(&mut s, &mut ctx, 0).decode().unwrap();
        drop(ctx);
        Arc::try_unwrap(tags).unwrap().into_inner().unwrap()
    }

    /// Little-endian TIFF with one IFD0 entry: Orientation = 1.
    fn orientation_tiff() -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(b"II");
        v.extend_from_slice(&42u16.to_le_bytes());
        v.extend_from_slice(&8u32.to_le_bytes());
        v.extend_from_slice(&1u16.to_le_bytes());
        let mut entry = [0u8; 12];
        put_ifd_entry(&mut entry, 0x0112, 3, 1, 1);
        v.extend_from_slice(&entry);
        v.extend_from_slice(&0u32.to_le_bytes());
        v
    }

    #[test]
    fn decodes_inline_short() {
        let tags = decode_tiff(orientation_tiff());
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].tag, "Orientation");
        assert_eq!(tags[0].namespace, "IFD0");
        assert_eq!(tags[0].value, Value::U16(1));
    }

    #[test]
    fn inline_and_out_of_line_ascii_are_equal() {
        // Two Make tags: "abc\0" fits in the 4-byte slot, "abcd\0" spills
        // out of line. Same logical decoding path for both.
        let mut v = Vec::new();
        v.extend_from_slice(b"II");
        v.extend_from_slice(&42u16.to_le_bytes());
        v.extend_from_slice(&8u32.to_le_bytes());
        v.extend_from_slice(&2u16.to_le_bytes());
        let mut entry = [0u8; 12];
        put_u16_le(&mut entry[0..2], 0x010f); // Make
        put_u16_le(&mut entry[2..4], 2); // ASCII
        put_u32_le(&mut entry[4..8], 4);
        entry[8..12].copy_from_slice(b"abc\0");
        v.extend_from_slice(&entry);
        let data_offset = 8 + 2 + 2 * 12 + 4;
        put_ifd_entry(&mut entry, 0x0110, 2, 5, data_offset as u32); // Model
        v.extend_from_slice(&entry);
        v.extend_from_slice(&0u32.to_le_bytes());
        v.extend_from_slice(b"abcd\0");

        let tags = decode_tiff(v);
        assert_eq!(tags[0].value, Value::Text("abc".to_string()));
        assert_eq!(tags[1].value, Value::Text("abcd".to_string()));
    }

    #[test]
    fn zero_denominator_rational_is_undef() {
        let mut v = Vec::new();
        v.extend_from_slice(b"II");
        v.extend_from_slice(&42u16.to_le_bytes());
        v.extend_from_slice(&8u32.to_le_bytes());
        v.extend_from_slice(&1u16.to_le_bytes());
        let data_offset = (8 + 2 + 12 + 4) as u32;
        let mut entry = [0u8; 12];
        put_ifd_entry(&mut entry, 0x011a, 5, 1, data_offset); // XResolution
        v.extend_from_slice(&entry);
        v.extend_from_slice(&0u32.to_le_bytes());
        v.extend_from_slice(&7u32.to_le_bytes());
        v.extend_from_slice(&0u32.to_le_bytes()); // den = 0
        let tags = decode_tiff(v);
        assert_eq!(tags[0].value, Value::Undef);
    }

    #[test]
    fn repeated_ifd_pointer_kind_is_skipped() {
        // IFD0 carries two ExifIFD pointers, the second pointing back at
        // IFD0 itself. The visited-kind set must stop the second one.
        let mut v = Vec::new();
        v.extend_from_slice(b"II");
        v.extend_from_slice(&42u16.to_le_bytes());
        v.extend_from_slice(&8u32.to_le_bytes());
        let ifd0 = 8u32;
        let exif_ifd = 8 + 2 + 2 * 12 + 4;
        v.extend_from_slice(&2u16.to_le_bytes());
        let mut entry = [0u8; 12];
        put_ifd_entry(&mut entry, 0x8769, 4, 1, exif_ifd as u32);
        v.extend_from_slice(&entry);
        put_ifd_entry(&mut entry, 0x8769, 4, 1, ifd0);
        v.extend_from_slice(&entry);
        v.extend_from_slice(&0u32.to_le_bytes());
        // The nested ExifIFD: one Orientation entry.
        v.extend_from_slice(&1u16.to_le_bytes());
        put_ifd_entry(&mut entry, 0x0112, 3, 1, 3);
        v.extend_from_slice(&entry);
        v.extend_from_slice(&0u32.to_le_bytes());

        let tags = decode_tiff(v);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].namespace, "IFD0/ExifIFD");
        assert_eq!(tags[0].value, Value::U16(3));
    }

    #[test]
    fn unknown_tag_id_gets_prefixed_name() {
        let mut v = orientation_tiff();
        // Rewrite the tag ID to one with no table entry.
        let entry_start = 8 + 2;
        put_u16_le(&mut v[entry_start..entry_start + 2], 0xeeee);
        let tags = decode_tiff(v);
        assert_eq!(tags[0].tag, "UnknownTag_0xeeee");
    }

    #[test]
    fn oversized_count_skips_entry() {
        let mut v = orientation_tiff();
        let entry_start = 8 + 2;
        put_u32_le(&mut v[entry_start + 4..entry_start + 8], 0x10001);
        let tags = decode_tiff(v);
        assert!(tags.is_empty());
    }

    #[test]
    fn unknown_type_code_aborts() {
        let mut v = orientation_tiff();
        let entry_start = 8 + 2;
        put_u16_le(&mut v[entry_start + 2..entry_start + 4], 13);
        let (mut ctx, _) = collecting_ctx();
        let mut s = SourceReader::new(Cursor::new(v), ByteOrder::Big);
        let err = ExifDecoder::new(&mut s, &mut ctx, 0).decode().unwrap_err();
        assert!(err.to_string().contains("unknown EXIF type 13"));
    }
}
