//! IPTC-IIM decoding: datasets delimited by 0x1C markers, either raw or
//! wrapped in Photoshop "8BIM" resource blocks. IPTC is always big-endian,
//! regardless of any surrounding EXIF byte order.

mod fields;

use std::collections::BTreeMap;
use std::io::{Read, Seek};

use crate::error::Error;
use crate::io::{ByteOrder, SourceReader};
use crate::value::{trim_nulls, Value};
use crate::{Ctx, Source, TagInfo, UNKNOWN_PREFIX};

use fields::{IptcField, IptcFormat};

const DATASET_MARKER: u8 = 0x1c;
/// Photoshop resource ID of the block holding IPTC records.
const METADATA_BLOCK_ID: u16 = 0x0404;
/// Record 1, dataset 90.
const CODED_CHARACTER_SET: u8 = 90;

const CHARSET_UTF8: &str = "UTF-8";
const CHARSET_ISO8859_1: &str = "ISO-8859-1";

/// Accumulator for repeatable fields, keyed by (tag name, record name).
/// Ordered so repeated decodes emit identical callback sequences.
type StringSlices = BTreeMap<(String, String), Vec<String>>;

pub(crate) struct IptcDecoder<'a, R> {
    s: SourceReader<R>,
    ctx: &'a mut Ctx,
    /// Character set selected by a CodedCharacterSet dataset; strings are
    /// decoded as ISO-8859-1 until UTF-8 is announced.
    charset: String,
}

impl<'a, R: Read + Seek> IptcDecoder<'a, R> {
    pub(crate) fn new(r: R, ctx: &'a mut Ctx) -> IptcDecoder<'a, R> {
        IptcDecoder {
            s: SourceReader::new(r, ByteOrder::Big),
            ctx,
            charset: String::new(),
        }
    }

    /// Decode raw datasets delimited by 0x1C. Any other marker byte ends
    /// decoding.
    pub(crate) fn decode_records(&mut self) -> Result<(), Error> {
        let mut slices = StringSlices::new();
        loop {
            let marker = self.s.read_u8()?;
            if self.s.is_eof() || marker != DATASET_MARKER {
                break;
            }
            self.decode_record(&mut slices)?;
        }
        self.flush_slices(slices)
    }

    /// Decode 8BIM resource blocks, reading datasets out of the 0x0404
    /// block and skipping others. Assumes the reader starts at the first
    /// signature.
    pub(crate) fn decode_blocks(&mut self) -> Result<(), Error> {
        let mut slices = StringSlices::new();
        loop {
            match self.decode_block(&mut slices) {
                Ok(()) => {}
                // Trailing bytes that are not a whole block end the scan.
                Err(e) if e.is_truncation() => break,
                Err(e) => return Err(e),
            }
        }
        self.flush_slices(slices)
    }

    fn decode_block(&mut self, slices: &mut StringSlices) -> Result<(), Error> {
        let mut signature = [0u8; 4];
        self.s.read_full(&mut signature)?;
        if self.s.is_eof() || &signature != b"8BIM" {
            return Err(Error::Stop);
        }

        let identifier = self.s.read_u16()?;
        let is_meta = identifier == METADATA_BLOCK_ID;

        // Pascal-style name, padded to an even total including the length
        // byte. An empty name is a length byte plus one zero byte.
        let mut name_length = self.s.read_u8()?;
        if name_length == 0 {
            name_length = 2;
        } else if name_length % 2 == 1 {
            name_length += 1;
        }
        self.s.skip(i64::from(name_length) - 1)?;

        let data_size = self.s.read_u32()?;

        if !is_meta {
            self.s.skip(i64::from(data_size))?;
        } else {
            let data_start = self.s.pos()?;
            let data_end = data_start + u64::from(data_size);
            while self.s.pos()? < data_end {
                let marker = self.s.read_u8()?;
                if self.s.is_eof() || marker != DATASET_MARKER {
                    break;
                }
                self.decode_record(slices)?;
            }
            self.s.seek(data_end)?;
        }

        if data_size % 2 != 0 {
            // Odd-sized blocks are followed by one padding byte.
            self.s.skip(1)?;
        }
        Ok(())
    }

    fn decode_record(&mut self, slices: &mut StringSlices) -> Result<(), Error> {
        let record_type = self.s.read_u8()?;
        let dataset_number = self.s.read_u8()?;
        let record_size = self.s.read_u16()?;

        let (field, record_name) = match fields::lookup(record_type, dataset_number) {
            Some(field) => (field, fields::record_name(record_type)),
            None => (
                // Assume a non-repeatable string.
                IptcField {
                    name: "",
                    format: IptcFormat::Str,
                    repeatable: false,
                },
                "IPTCUnknownRecord".to_string(),
            ),
        };
        let tag_name = if field.name.is_empty() {
            format!("{UNKNOWN_PREFIX}{dataset_number}")
        } else {
            field.name.to_string()
        };

        let mut tag_info = TagInfo {
            source: Source::IPTC,
            tag: tag_name.clone(),
            namespace: record_name,
            value: Value::Undef,
        };

        if u32::from(record_size) > self.ctx.limit_tag_size
            || !self.ctx.should_handle(&tag_info)?
        {
            self.s.skip(i64::from(record_size))?;
            return Ok(());
        }

        let mut v = match field.format {
            IptcFormat::Str => {
                let raw = self.s.read_bytes_volatile(usize::from(record_size))?;
                let bytes = if self.charset.is_empty() || self.charset == CHARSET_ISO8859_1 {
                    decode_iso8859_1(raw)
                } else {
                    raw.to_vec()
                };
                Value::Bytes(bytes)
            }
            IptcFormat::Long => Value::U32(self.s.read_u32()?),
            IptcFormat::Short => Value::U16(self.s.read_u16()?),
            IptcFormat::Byte => Value::U8(self.s.read_u8()?),
        };

        v = convert_field(&tag_name, v);

        if record_type == 1 && dataset_number == CODED_CHARACTER_SET {
            if let Some(s) = v.as_str() {
                self.charset = s.to_string();
            }
        }

        if let Value::Bytes(b) = &v {
            let s = String::from_utf8_lossy(trim_nulls(b)).trim().to_string();
            v = Value::Text(s);
        }

        if field.repeatable {
            slices
                .entry((tag_info.tag.clone(), tag_info.namespace.clone()))
                .or_default()
                .push(value_text(&v));
        } else {
            tag_info.value = v;
            self.ctx.handle(tag_info)?;
        }
        Ok(())
    }

    /// Emit the accumulated repeatable fields: a single element as a
    /// scalar, several as a list.
    fn flush_slices(&mut self, slices: StringSlices) -> Result<(), Error> {
        for ((tag, namespace), values) in slices {
            let value = if values.len() == 1 {
                Value::Text(values.into_iter().next().unwrap_or_default())
            } else {
                Value::List(values.into_iter().map(Value::Text).collect())
            };
            self.ctx.handle(TagInfo {
                source: Source::IPTC,
                tag,
                namespace,
                value,
            })?;
        }
        Ok(())
    }
}

fn decode_iso8859_1(b: &[u8]) -> Vec<u8> {
    b.iter().map(|&c| c as char).collect::<String>().into_bytes()
}

fn value_text(v: &Value) -> String {
    match v {
        Value::Text(s) => s.clone(),
        Value::Bytes(b) => String::from_utf8_lossy(trim_nulls(b)).into_owned(),
        Value::U8(n) => n.to_string(),
        Value::U16(n) => n.to_string(),
        Value::U32(n) => n.to_string(),
        other => format!("{other:?}"),
    }
}

fn convert_field(tag_name: &str, v: Value) -> Value {
    match tag_name {
        "DateCreated" | "DateSent" | "DigitalCreationDate" => compact_date(v),
        "DigitalCreationTime" | "TimeSent" | "TimeCreated" => compact_time(v),
        "ProgramVersion" => {
            let s = value_text(&v);
            Value::Text(s.strip_suffix(".0").unwrap_or(&s).to_string())
        }
        "CodedCharacterSet" => {
            let charset = match &v {
                Value::Bytes(b) => resolve_coded_character_set(b),
                _ => "",
            };
            if charset.is_empty() {
                Value::Text(CHARSET_UTF8.to_string())
            } else {
                Value::Text(charset.to_string())
            }
        }
        _ => v,
    }
}

fn compact_date(v: Value) -> Value {
    let s = value_text(&v);
    // 20211020 => 2021:10:20
    if s.len() == 8 && s.is_char_boundary(4) && s.is_char_boundary(6) {
        return Value::Text(format!("{}:{}:{}", &s[..4], &s[4..6], &s[6..]));
    }
    // 2015-01-22 => 2015:01:22
    if s.len() == 10 && s.is_char_boundary(4) && s.is_char_boundary(7) {
        return Value::Text(format!("{}:{}:{}", &s[..4], &s[5..7], &s[8..]));
    }
    Value::Text(s)
}

fn compact_time(v: Value) -> Value {
    let s = value_text(&v);
    if !s.is_ascii() {
        return Value::Text(s);
    }
    // 111116 => 11:11:16
    if s.len() == 6 {
        return Value::Text(format!("{}:{}:{}", &s[..2], &s[2..4], &s[4..]));
    }
    // 130444+1000 => 13:04:44+10:00
    if s.len() == 11 {
        return Value::Text(format!(
            "{}:{}:{}{}:{}",
            &s[..2],
            &s[2..4],
            &s[4..6],
            &s[6..9],
            &s[9..]
        ));
    }
    Value::Text(s)
}

/// Resolve the CodedCharacterSet escape sequence to UTF-8 or ISO-8859-1,
/// or empty when unrecognized (the caller falls back to UTF-8).
fn resolve_coded_character_set(b: &[u8]) -> &'static str {
    const ESC: u8 = 0x1b;
    if b.len() > 2 && b[0] == ESC && b[1] == b'%' && b[2] == b'G' {
        return CHARSET_UTF8;
    }
    if b.len() > 2 && b[0] == ESC && b[1] == b'.' && b[2] == b'A' {
        return CHARSET_ISO8859_1;
    }
    if b.len() > 4 && b[0] == ESC && (b[1] == b'.' || b[2] == b'.' || b[3] == b'.') && b[4] == b'A'
    {
        return CHARSET_ISO8859_1;
    }
    if b.len() > 2 && b[0] == ESC && b[1] == b'-' && b[2] == b'A' {
        return CHARSET_ISO8859_1;
    }
    ""
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ctx;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    fn dataset(record: u8, id: u8, payload: &[u8]) -> Vec<u8> {
        let mut v = vec![DATASET_MARKER, record, id];
        v.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        v.extend_from_slice(payload);
        v
    }

    fn block(id: u16, data: &[u8]) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(b"8BIM");
        v.extend_from_slice(&id.to_be_bytes());
        v.extend_from_slice(&[0, 0]); // empty Pascal name
        v.extend_from_slice(&(data.len() as u32).to_be_bytes());
        v.extend_from_slice(data);
        if data.len() % 2 != 0 {
            v.push(0);
        }
        v
    }

    fn decode(data: Vec<u8>, blocks: bool) -> Vec<TagInfo> {
        let tags = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&tags);
        let mut ctx = Ctx::with_handler(
            Source::IPTC,
            Box::new(move |tag| {
                sink.lock().unwrap().push(tag);
                Ok(())
            }),
        );
        let mut dec = IptcDecoder::new(Cursor::new(data), &mut ctx);
        if blocks {
            dec.decode_blocks().unwrap();
        } else {
            dec.decode_records().unwrap();
        }
        drop(ctx);
        Arc::try_unwrap(tags).unwrap().into_inner().unwrap()
    }

    #[test]
    fn raw_records_city() {
        let mut data = dataset(1, 90, b"\x1b%G"); // UTF-8
        data.extend(dataset(2, 90, "Benalmádena".as_bytes()));
        let tags = decode(data, false);
        let city = tags.iter().find(|t| t.tag == "City").unwrap();
        assert_eq!(city.value, Value::Text("Benalmádena".to_string()));
        assert_eq!(city.namespace, "IPTCApplication");
    }

    #[test]
    fn latin1_is_default_charset() {
        // 0xE1 is "á" in ISO-8859-1; no CodedCharacterSet announced.
        let data = dataset(2, 90, b"Benalm\xe1dena");
        let tags = decode(data, false);
        assert_eq!(tags[0].value, Value::Text("Benalmádena".to_string()));
    }

    #[test]
    fn repeatable_fields_accumulate() {
        let mut data = dataset(2, 25, b"sunset");
        data.extend(dataset(2, 25, b"beach"));
        let tags = decode(data, false);
        let keywords = tags.iter().find(|t| t.tag == "Keywords").unwrap();
        assert_eq!(
            keywords.value,
            Value::List(vec![
                Value::Text("sunset".to_string()),
                Value::Text("beach".to_string())
            ])
        );
    }

    #[test]
    fn single_repeatable_is_scalar() {
        let tags = decode(dataset(2, 25, b"sunset"), false);
        assert_eq!(tags[0].value, Value::Text("sunset".to_string()));
    }

    #[test]
    fn unknown_dataset_gets_default_def() {
        let tags = decode(dataset(6, 77, b"x"), false);
        assert_eq!(tags[0].tag, "UnknownTag_77");
        assert_eq!(tags[0].namespace, "IPTCUnknownRecord");
    }

    #[test]
    fn date_and_time_converters() {
        let mut data = dataset(2, 55, b"20211020");
        data.extend(dataset(2, 60, b"130444+1000"));
        data.extend(dataset(2, 70, b"13.2.0"));
        let tags = decode(data, false);
        let by_name = |n: &str| tags.iter().find(|t| t.tag == n).unwrap().value.clone();
        assert_eq!(by_name("DateCreated"), Value::Text("2021:10:20".to_string()));
        assert_eq!(
            by_name("TimeCreated"),
            Value::Text("13:04:44+10:00".to_string())
        );
        assert_eq!(by_name("ProgramVersion"), Value::Text("13.2".to_string()));
    }

    #[test]
    fn blocks_skip_non_meta_and_honor_padding() {
        // A non-meta block with odd data size, then the 0x0404 block.
        let mut data = block(0x0400, &[1, 2, 3]);
        data.extend(block(METADATA_BLOCK_ID, &dataset(2, 90, b"Oslo")));
        let tags = decode(data, true);
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].value, Value::Text("Oslo".to_string()));
    }

    #[test]
    fn charset_escape_sequences() {
        assert_eq!(resolve_coded_character_set(b"\x1b%G"), CHARSET_UTF8);
        assert_eq!(resolve_coded_character_set(b"\x1b.A"), CHARSET_ISO8859_1);
        assert_eq!(resolve_coded_character_set(b"\x1b-A"), CHARSET_ISO8859_1);
        assert_eq!(resolve_coded_character_set(b"\x1bXX.A"), CHARSET_ISO8859_1);
        assert_eq!(resolve_coded_character_set(b"garbage"), "");
    }
}
