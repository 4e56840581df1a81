//! PNG walker: chunk loop dispatching the eXIf chunk and the zTXt
//! "Raw profile type iptc" text profile (zlib-compressed, hex-encoded 8BIM
//! blocks). See https://exiftool.org/TagNames/PNG.html

use std::io::{Cursor, Read, Seek};

use flate2::read::ZlibDecoder;

use crate::error::Error;
use crate::exif::ExifDecoder;
use crate::io::SourceReader;
use crate::iptc::IptcDecoder;
use crate::{Ctx, Source};

const CHUNK_EXIF: [u8; 4] = *b"eXIf";
const CHUNK_COMPRESSED_TEXT: [u8; 4] = *b"zTXt";
const RAW_PROFILE_IPTC: &[u8] = b"Raw profile type iptc";
/// Profile name is 1-79 bytes plus the null terminator.
const MAX_PROFILE_NAME: usize = 80;

pub(crate) fn decode<R: Read + Seek>(s: &mut SourceReader<R>, ctx: &mut Ctx) -> Result<(), Error> {
    // Signature.
    s.skip(8)?;

    let mut sources = ctx.sources;

    loop {
        if sources.is_empty() {
            return Ok(());
        }
        let chunk_length = s.read_u32()?;
        let mut chunk_type = [0u8; 4];
        s.read_full(&mut chunk_type)?;
        if s.is_eof() {
            return Ok(());
        }

        if sources.has(Source::EXIF) && chunk_type == CHUNK_EXIF {
            sources = sources.remove(Source::EXIF);
            // The chunk payload starts directly at the TIFF header.
            let sub = s.buffered_reader(u64::from(chunk_length))?;
            let mut sub_reader = SourceReader::new(sub, s.byte_order);
            ExifDecoder::new(&mut sub_reader, ctx, 0).decode()?;
            s.skip(4)?; // CRC
        } else if chunk_type == CHUNK_COMPRESSED_TEXT {
            let (profile_name, profile_name_len) = s.read_null_terminated(MAX_PROFILE_NAME)?;
            let remaining = i64::from(chunk_length) - profile_name_len as i64;
            if profile_name == RAW_PROFILE_IPTC && sources.has(Source::IPTC) {
                sources = sources.remove(Source::IPTC);
                if remaining < 0 {
                    return Err(Error::invalid_format(format!(
                        "invalid zTXt data length {remaining}"
                    )));
                }
                let raw = s.read_bytes_volatile(remaining as usize)?.to_vec();
                let text = decompress_ztxt(&raw)?;
                let blocks = profile_hex_payload(&text)?;
                IptcDecoder::new(Cursor::new(blocks), ctx).decode_blocks()?;
            } else {
                s.skip(remaining)?;
            }
            s.skip(4)?; // CRC
        } else {
            s.skip(i64::from(chunk_length))?;
            s.skip(4)?; // CRC
        }
    }
}

/// zTXt payload: one compression-method byte (0 = deflate) then a zlib
/// stream.
fn decompress_ztxt(data: &[u8]) -> Result<Vec<u8>, Error> {
    let Some((&method, compressed)) = data.split_first() else {
        return Err(Error::invalid_format("empty zTXt payload"));
    };
    if method != 0 {
        return Err(Error::invalid_format(format!(
            "unknown PNG compression method {method}"
        )));
    }
    let mut out = Vec::new();
    ZlibDecoder::new(compressed)
        .read_to_end(&mut out)
        .map_err(|e| Error::invalid_format(format!("decompressing zTXt: {e}")))?;
    Ok(out)
}

/// The decompressed profile text is a newline, the profile type line and a
/// length line, followed by hex across multiple lines. Strip the header,
/// drop the newlines and decode the hex.
fn profile_hex_payload(text: &[u8]) -> Result<Vec<u8>, Error> {
    let mut rest = text;
    for _ in 0..3 {
        match rest.iter().position(|&b| b == b'\n') {
            Some(i) => rest = &rest[i + 1..],
            None => break,
        }
    }
    let hex: Vec<u8> = rest.iter().copied().filter(|&b| b != b'\n').collect();
    hex_decode(&hex)
}

fn hex_decode(hex: &[u8]) -> Result<Vec<u8>, Error> {
    fn nibble(b: u8) -> Result<u8, Error> {
        match b {
            b'0'..=b'9' => Ok(b - b'0'),
            b'a'..=b'f' => Ok(b - b'a' + 10),
            b'A'..=b'F' => Ok(b - b'A' + 10),
            _ => Err(Error::invalid_format(format!("invalid hex byte {b:#04x}"))),
        }
    }
    if hex.len() % 2 != 0 {
        return Err(Error::invalid_format("odd hex payload length"));
    }
    hex.chunks_exact(2)
        .map(|pair| Ok(nibble(pair[0])? << 4 | nibble(pair[1])?))
        .collect()
}
