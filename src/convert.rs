//! Per-tag-name value converters, normalizing raw EXIF field values to
//! ExifTool conventions. The table is closed; tags without an entry get the
//! printable-string treatment in the EXIF decoder.

use crate::io::ByteOrder;
use crate::value::{is_undefined, printable_string, trim_nulls, Value};

pub(crate) struct ConvCtx<'a> {
    pub tag_name: &'a str,
    pub byte_order: ByteOrder,
    pub warn: &'a mut dyn FnMut(&str),
}

impl ConvCtx<'_> {
    fn warnf(&mut self, msg: &str) {
        let line = format!("{}: {}", self.tag_name, msg);
        (self.warn)(&line);
    }
}

/// Whether a converter is registered for this tag name.
pub(crate) fn has_converter(tag_name: &str) -> bool {
    matches!(
        tag_name,
        "ApertureValue"
            | "MaxApertureValue"
            | "ShutterSpeedValue"
            | "GPSLatitude"
            | "GPSLongitude"
            | "GPSMeasureMode"
            | "GPSSatellites"
            | "SubSecTime"
            | "SubSecTimeOriginal"
            | "SubSecTimeDigitized"
            | "GPSTimeStamp"
            | "GPSVersionID"
            | "ComponentsConfiguration"
            | "SubjectArea"
            | "BitsPerSample"
            | "PageNumber"
            | "StripByteCounts"
            | "StripOffsets"
            | "LensInfo"
            | "WhitePoint"
            | "YCbCrCoefficients"
            | "ReferenceBlackWhite"
            | "PrimaryChromaticities"
            | "Padding"
            | "UserComment"
            | "CFAPattern"
    )
}

/// Apply the converter registered for `ctx.tag_name`. Tags without one get
/// the printable-string default.
pub(crate) fn convert_tag(ctx: &mut ConvCtx<'_>, v: Value) -> Value {
    match ctx.tag_name {
        "ApertureValue" | "MaxApertureValue" => apex_to_fnumber(v),
        "ShutterSpeedValue" => apex_to_seconds(v),
        "GPSLatitude" | "GPSLongitude" => degrees_to_decimal(ctx, v),
        "GPSMeasureMode" | "GPSSatellites" | "SubSecTime" | "SubSecTimeOriginal"
        | "SubSecTimeDigitized" => string_to_int(ctx, v),
        "GPSTimeStamp" => to_timestamp_string(v),
        "GPSVersionID" | "ComponentsConfiguration" => bytes_to_space_delimited(ctx, v),
        "SubjectArea" | "BitsPerSample" | "PageNumber" | "StripByteCounts" | "StripOffsets" => {
            numbers_to_space_delimited(ctx, v)
        }
        "LensInfo" | "WhitePoint" | "YCbCrCoefficients" | "ReferenceBlackWhite"
        | "PrimaryChromaticities" => rats_to_space_delimited(ctx, v),
        "Padding" => binary_data_summary(ctx, v),
        "UserComment" => user_comment(ctx, v),
        "CFAPattern" => cfa_pattern(ctx, v),
        _ => crate::value::to_printable_value(v),
    }
}

/// APEX aperture to f-number: 2^(x/2).
fn apex_to_fnumber(v: Value) -> Value {
    match v.to_f64() {
        Some(f) => Value::F64(2f64.powf(f / 2.0)),
        None => Value::I32(0),
    }
}

/// APEX shutter speed to seconds: 2^(-x).
fn apex_to_seconds(v: Value) -> Value {
    match v.to_f64() {
        Some(f) => Value::F64(1.0 / 2f64.powf(f)),
        None => Value::I32(0),
    }
}

fn degrees_to_decimal(ctx: &mut ConvCtx<'_>, v: Value) -> Value {
    match to_degrees(&v) {
        Ok(d) => Value::F64(d),
        Err(msg) => {
            ctx.warnf(&format!("failed to convert degrees to decimal: {msg}"));
            Value::F64(0.0)
        }
    }
}

fn to_degrees(v: &Value) -> Result<f64, String> {
    match v {
        Value::List(items) => {
            if items.len() != 3 {
                return Err(format!("expected 3 values, got {}", items.len()));
            }
            let deg = items[0].to_f64().unwrap_or(0.0);
            let min = items[1].to_f64().unwrap_or(0.0);
            let sec = items[2].to_f64().unwrap_or(0.0);
            Ok(deg + min / 60.0 + sec / 3600.0)
        }
        Value::F64(f) => Ok(*f),
        Value::Text(s) => parse_degrees(s),
        Value::Bytes(b) => parse_degrees(&String::from_utf8_lossy(b)),
        other => Err(format!("unsupported degree value {other:?}")),
    }
}

fn parse_degrees(s: &str) -> Result<f64, String> {
    if s.is_empty() || s == "0100" {
        return Ok(0.0);
    }
    let mut parts = s.splitn(3, ',');
    let mut next = || -> Result<f64, String> {
        parts
            .next()
            .and_then(|p| p.trim().parse::<f64>().ok())
            .ok_or_else(|| format!("failed to parse {s:?}"))
    };
    let (deg, min, sec) = (next()?, next()?, next()?);
    Ok(deg + min / 60.0 + sec / 3600.0)
}

fn string_to_int(ctx: &mut ConvCtx<'_>, v: Value) -> Value {
    match v {
        Value::Text(s) => {
            let s = printable_string(&s);
            Value::I32(s.parse().unwrap_or(0))
        }
        other => {
            ctx.warnf(&format!("expected string, got {other:?}"));
            Value::I32(0)
        }
    }
}

/// GPSTimeStamp: three rationals to "HH:MM:SS". The numerators are used
/// directly, so fractional seconds like 4279/100 render as "42.79".
fn to_timestamp_string(v: Value) -> Value {
    match v {
        Value::List(items) => {
            if items.len() != 3 {
                return Value::Text(String::new());
            }
            let num = |item: &Value| -> i64 {
                match item {
                    Value::URat(r) => i64::from(r.num()),
                    Value::IRat(r) => i64::from(r.num()),
                    _ => 0,
                }
            };
            let mut s = format!("{:02}:{:02}:{:02}", num(&items[0]), num(&items[1]), num(&items[2]));
            if s.len() == 10 {
                // 13:03:4279 => 13:03:42.79
                s.insert(8, '.');
            }
            Value::Text(s)
        }
        Value::Text(s) => {
            // 17,00000,8,00000,29,0000
            let parts: Vec<&str> = s.split(',').collect();
            if parts.len() != 6 {
                return Value::Text(String::new());
            }
            let p = |i: usize| parts[i].parse::<i64>().unwrap_or(0);
            Value::Text(format!("{:02}:{:02}:{:02}", p(0), p(2), p(4)))
        }
        _ => Value::Text(String::new()),
    }
}

fn bytes_to_space_delimited(ctx: &mut ConvCtx<'_>, v: Value) -> Value {
    let bytes = match v {
        Value::Bytes(b) => b,
        Value::U8(b) => vec![b],
        other => {
            ctx.warnf(&format!("expected bytes, got {other:?}"));
            return Value::Text(String::new());
        }
    };
    Value::Text(join_space(bytes.iter().map(|b| b.to_string())))
}

fn numbers_to_space_delimited(ctx: &mut ConvCtx<'_>, v: Value) -> Value {
    match v {
        Value::List(items) => Value::Text(join_space(
            items
                .iter()
                .map(|n| n.integer_text().unwrap_or_else(|| "0".to_string())),
        )),
        Value::Bytes(b) => Value::Text(join_space(b.iter().map(|n| n.to_string()))),
        scalar => match scalar.integer_text() {
            Some(s) => Value::Text(s),
            None => {
                ctx.warnf(&format!("expected numbers, got {scalar:?}"));
                Value::Text(String::new())
            }
        },
    }
}

fn rats_to_space_delimited(ctx: &mut ConvCtx<'_>, v: Value) -> Value {
    let items = match v {
        Value::List(items) => items,
        other => {
            ctx.warnf(&format!("expected a list, got {other:?}"));
            return Value::Text(String::new());
        }
    };
    Value::Text(join_space(items.iter().map(|item| match item {
        Value::Text(s) => s.clone(),
        Value::Undef => "undef".to_string(),
        other => {
            let f = other.to_f64().unwrap_or(0.0);
            if is_undefined(f) {
                "undef".to_string()
            } else {
                format_float(f)
            }
        }
    })))
}

fn binary_data_summary(ctx: &mut ConvCtx<'_>, v: Value) -> Value {
    match v {
        Value::Bytes(b) => Value::Text(format!("(Binary data {} bytes)", b.len())),
        other => {
            ctx.warnf(&format!("expected bytes, got {other:?}"));
            Value::Text(String::new())
        }
    }
}

/// UserComment carries an 8-byte ID code before the text payload.
/// Plain-string comments are against spec but common; they are returned
/// as-is with a warning, like ExifTool does.
fn user_comment(ctx: &mut ConvCtx<'_>, v: Value) -> Value {
    let b = match v {
        Value::Bytes(b) => b,
        Value::Text(s) => {
            ctx.warnf("expected bytes, got a plain string");
            return Value::Text(s);
        }
        other => {
            ctx.warnf(&format!("expected bytes, got {other:?}"));
            return Value::Text(String::new());
        }
    };
    if b.len() < 8 {
        return Value::Text(String::new());
    }
    let (id, payload) = b.split_at(8);
    match id {
        b"ASCII\0\0\0" => {
            let s = printable_string(&String::from_utf8_lossy(trim_nulls(payload)));
            if s.is_ascii() {
                Value::Text(s)
            } else {
                Value::Text(String::new())
            }
        }
        b"UNICODE\0" => Value::Text(printable_string(&String::from_utf8_lossy(trim_nulls(
            payload,
        )))),
        b"\0\0\0\0\0\0\0\0" => match std::str::from_utf8(trim_nulls(payload)) {
            Ok(s) => Value::Text(s.trim_end_matches(' ').to_string()),
            Err(_) => Value::Text(String::new()),
        },
        _ => Value::Text(String::new()),
    }
}

/// CFAPattern: 2 shorts (horizontal and vertical repeat) followed by H×V
/// pattern bytes. Some cameras write the shorts in the opposite byte order
/// to the EXIF header; retry with the inverted order before giving up.
fn cfa_pattern(ctx: &mut ConvCtx<'_>, v: Value) -> Value {
    let b = match v {
        Value::Bytes(b) => b,
        other => {
            ctx.warnf(&format!("expected bytes, got {other:?}"));
            return Value::Text(String::new());
        }
    };
    if b.len() < 4 {
        return Value::Bytes(trim_nulls(&b).to_vec());
    }
    let read_repeat = |order: ByteOrder| {
        let h = order.u16(&b[0..2]);
        let v = order.u16(&b[2..4]);
        (h, v, 4 + usize::from(h) * usize::from(v))
    };
    let (mut h, mut v, mut hi) = read_repeat(ctx.byte_order);
    if hi > b.len() {
        (h, v, hi) = read_repeat(ctx.byte_order.other());
        if hi > b.len() {
            return Value::Bytes(trim_nulls(&b).to_vec());
        }
    }
    let pattern = join_space(b[4..hi].iter().map(|p| p.to_string()));
    Value::Text(format!("{h} {v} {pattern}"))
}

fn join_space(parts: impl Iterator<Item = String>) -> String {
    parts.collect::<Vec<_>>().join(" ")
}

/// Shortest decimal rendering without an exponent, for list converters.
fn format_float(f: f64) -> String {
    let s = format!("{f}");
    if s.contains('e') || s.contains('E') {
        format!("{f:.10}")
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    } else {
        s
    }
}
