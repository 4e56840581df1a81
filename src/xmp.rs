//! XMP decoding: a deliberately small RDF subset. Attributes on
//! `rdf:Description` elements become tags, a few well-known Dublin Core
//! child lists (creator/publisher/subject/rights) are collected, and the
//! exif-namespace GPS child scalars are parsed to decimal degrees. Callers
//! needing full RDF fidelity supply their own packet handler.

use std::io::{BufRead, Read};

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;

use crate::error::Error;
use crate::value::Value;
use crate::{Ctx, Source, TagInfo};

const NS_RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const NS_DC: &str = "http://purl.org/dc/elements/1.1/";
const NS_EXIF: &str = "http://ns.adobe.com/exif/1.0/";

const LIST_ELEMENTS: &[&str] = &["creator", "publisher", "subject", "rights"];
const GPS_ELEMENTS: &[&str] = &["GPSLatitude", "GPSLongitude", "GPSAltitude", "GPSAltitudeRef"];

/// Decode one XMP packet. With a custom handler installed the packet is
/// passed through raw; the handler must consume it fully.
pub(crate) fn decode<R: BufRead>(mut r: R, ctx: &mut Ctx) -> Result<(), Error> {
    if let Some(handler) = ctx.handle_xmp.as_mut() {
        handler(&mut r)?;
        // One more read to confirm the handler consumed the packet.
        let mut probe = [0u8; 1];
        if r.read(&mut probe)? != 0 {
            return Err(Error::invalid_format("expected EOF after XMP"));
        }
        return Ok(());
    }
    decode_rdf(r, ctx)
}

fn decode_rdf<R: BufRead>(r: R, ctx: &mut Ctx) -> Result<(), Error> {
    let mut reader = NsReader::from_reader(r);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    // Active dc list element (local name + namespace URI) and its items.
    let mut list: Option<(String, String)> = None;
    let mut list_items: Vec<String> = Vec::new();
    let mut in_li = false;
    // Active GPS child element awaiting its text node.
    let mut gps: Option<(String, String)> = None;

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| Error::invalid_format(format!("decoding XMP: {e}")))?;
        match event {
            // Self-closing elements can only contribute attributes.
            Event::Empty(ref e) => {
                let (ns, local) = resolve_name(&reader, e);
                if local == "Description" && ns.as_deref() == Some(NS_RDF) {
                    handle_description_attrs(&reader, e, ctx)?;
                }
            }
            Event::Start(ref e) => {
                let (ns, local) = resolve_name(&reader, e);
                if local == "Description" && ns.as_deref() == Some(NS_RDF) {
                    handle_description_attrs(&reader, e, ctx)?;
                } else if list.is_none() && LIST_ELEMENTS.contains(&local.as_str()) {
                    list = Some((local, ns.unwrap_or_default()));
                    list_items.clear();
                } else if local == "li" && list.is_some() {
                    in_li = true;
                } else if gps.is_none() && GPS_ELEMENTS.contains(&local.as_str()) {
                    gps = Some((local, ns.unwrap_or_else(|| NS_EXIF.to_string())));
                }
            }
            Event::Text(ref t) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::invalid_format(format!("decoding XMP: {e}")))?;
                if in_li {
                    list_items.push(text.into_owned());
                } else if let Some((name, ns)) = gps.take() {
                    handle_gps_scalar(&name, &ns, text.trim(), ctx)?;
                }
            }
            Event::End(ref e) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if local == "li" {
                    in_li = false;
                } else if list.as_ref().is_some_and(|(name, _)| *name == local) {
                    if let Some((list_local, list_ns)) = list.take() {
                        flush_list(&list_local, &list_ns, &mut list_items, ctx)?;
                    }
                } else if gps.as_ref().is_some_and(|(name, _)| *name == local) {
                    gps = None;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn resolve_name<R>(reader: &NsReader<R>, e: &BytesStart<'_>) -> (Option<String>, String) {
    let (res, local) = reader.resolve_element(e.name());
    let ns = match res {
        ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
        _ => None,
    };
    (ns, String::from_utf8_lossy(local.as_ref()).into_owned())
}

/// Emit one tag per attribute, skipping namespace declarations and the RDF
/// and Dublin Core default namespaces.
fn handle_description_attrs<R>(
    reader: &NsReader<R>,
    e: &BytesStart<'_>,
    ctx: &mut Ctx,
) -> Result<(), Error> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| Error::invalid_format(format!("decoding XMP: {e}")))?;
        if attr.key.as_namespace_binding().is_some() {
            continue;
        }
        let (res, local) = reader.resolve_attribute(attr.key);
        let ns = match res {
            ResolveResult::Bound(ns) => String::from_utf8_lossy(ns.as_ref()).into_owned(),
            _ => String::new(),
        };
        if ns == NS_RDF || ns == NS_DC {
            continue;
        }
        let value = attr
            .unescape_value()
            .map_err(|e| Error::invalid_format(format!("decoding XMP: {e}")))?;

        let tag_info = TagInfo {
            source: Source::XMP,
            tag: first_upper(&String::from_utf8_lossy(local.as_ref())),
            namespace: ns,
            value: Value::Text(value.into_owned()),
        };
        if !ctx.should_handle(&tag_info)? {
            continue;
        }
        ctx.handle(tag_info)?;
    }
    Ok(())
}

/// Emit a collected child list: a single item as a scalar, several as a
/// list. This is how ExifTool renders them.
fn flush_list(
    local: &str,
    ns: &str,
    items: &mut Vec<String>,
    ctx: &mut Ctx,
) -> Result<(), Error> {
    if items.is_empty() || local.is_empty() {
        return Ok(());
    }
    let collected = std::mem::take(items);
    let value = if collected.len() == 1 {
        Value::Text(collected.into_iter().next().unwrap_or_default())
    } else {
        Value::List(collected.into_iter().map(Value::Text).collect())
    };
    let tag_info = TagInfo {
        source: Source::XMP,
        tag: first_upper(local),
        namespace: ns.to_string(),
        value,
    };
    if !ctx.should_handle(&tag_info)? {
        return Ok(());
    }
    ctx.handle(tag_info)
}

fn handle_gps_scalar(name: &str, ns: &str, text: &str, ctx: &mut Ctx) -> Result<(), Error> {
    let Ok(degrees) = parse_gps_coordinate(text) else {
        return Ok(());
    };
    let tag_info = TagInfo {
        source: Source::XMP,
        tag: name.to_string(),
        namespace: ns.to_string(),
        value: Value::F64(degrees),
    };
    if !ctx.should_handle(&tag_info)? {
        return Ok(());
    }
    ctx.handle(tag_info)
}

fn first_upper(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Parse an XMP GPS coordinate: "deg,min" with an optional N/S/E/W suffix
/// (e.g. "26,34.951N"), or a plain decimal with an optional suffix.
fn parse_gps_coordinate(s: &str) -> Result<f64, Error> {
    let mut s = s.trim();
    if s.is_empty() {
        return Err(Error::invalid_format("empty coordinate"));
    }

    let mut negative = false;
    match s.as_bytes()[s.len() - 1] {
        b'S' | b's' | b'W' | b'w' => {
            negative = true;
            s = &s[..s.len() - 1];
        }
        b'N' | b'n' | b'E' | b'e' => {
            s = &s[..s.len() - 1];
        }
        _ => {}
    }

    let degrees = match s.split_once(',') {
        Some((deg, min)) => {
            let deg: f64 = deg
                .parse()
                .map_err(|e| Error::invalid_format(format!("parsing degrees: {e}")))?;
            let min: f64 = min
                .parse()
                .map_err(|e| Error::invalid_format(format!("parsing minutes: {e}")))?;
            deg + min / 60.0
        }
        None => s
            .parse()
            .map_err(|e| Error::invalid_format(format!("parsing decimal: {e}")))?,
    };

    Ok(if negative { -degrees } else { degrees })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn decode_packet(xml: &str) -> Vec<TagInfo> {
        let tags = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&tags);
        let mut ctx = Ctx::with_handler(
            Source::XMP,
            Box::new(move |tag| {
                sink.lock().unwrap().push(tag);
                Ok(())
            }),
        );
        decode(std::io::Cursor::new(xml.as_bytes().to_vec()), &mut ctx).unwrap();
        drop(ctx);
        Arc::try_unwrap(tags).unwrap().into_inner().unwrap()
    }

    const PACKET: &str = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/">
 <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about=""
    xmlns:xmp="http://ns.adobe.com/xap/1.0/"
    xmlns:dc="http://purl.org/dc/elements/1.1/"
    xmlns:photoshop="http://ns.adobe.com/photoshop/1.0/"
    xmp:CreatorTool="Adobe Photoshop Lightroom Classic 12.4 (Macintosh)"
    photoshop:City="Benalmádena">
   <dc:creator>
    <rdf:Seq>
     <rdf:li>Bjørn Erik Pedersen</rdf:li>
    </rdf:Seq>
   </dc:creator>
   <dc:subject>
    <rdf:Bag>
     <rdf:li>sunrise</rdf:li>
     <rdf:li>beach</rdf:li>
    </rdf:Bag>
   </dc:subject>
  </rdf:Description>
 </rdf:RDF>
</x:xmpmeta>"#;

    #[test]
    fn attributes_become_tags_with_namespace_uri() {
        let tags = decode_packet(PACKET);
        let creator_tool = tags.iter().find(|t| t.tag == "CreatorTool").unwrap();
        assert_eq!(
            creator_tool.value,
            Value::Text("Adobe Photoshop Lightroom Classic 12.4 (Macintosh)".to_string())
        );
        assert_eq!(creator_tool.namespace, "http://ns.adobe.com/xap/1.0/");

        let city = tags.iter().find(|t| t.tag == "City").unwrap();
        assert_eq!(city.namespace, "http://ns.adobe.com/photoshop/1.0/");

        // rdf:about is skipped.
        assert!(!tags.iter().any(|t| t.tag == "About"));
    }

    #[test]
    fn single_item_list_is_scalar() {
        let tags = decode_packet(PACKET);
        let creator = tags.iter().find(|t| t.tag == "Creator").unwrap();
        assert_eq!(
            creator.value,
            Value::Text("Bjørn Erik Pedersen".to_string())
        );
        assert_eq!(creator.namespace, "http://purl.org/dc/elements/1.1/");
    }

    #[test]
    fn multi_item_list_is_list() {
        let tags = decode_packet(PACKET);
        let subject = tags.iter().find(|t| t.tag == "Subject").unwrap();
        assert_eq!(
            subject.value,
            Value::List(vec![
                Value::Text("sunrise".to_string()),
                Value::Text("beach".to_string())
            ])
        );
    }

    #[test]
    fn gps_child_elements_parse_to_decimal() {
        let xml = r#"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
  <rdf:Description rdf:about="" xmlns:exif="http://ns.adobe.com/exif/1.0/">
   <exif:GPSLatitude>26,34.951N</exif:GPSLatitude>
   <exif:GPSLongitude>80,12.014W</exif:GPSLongitude>
  </rdf:Description>
 </rdf:RDF>"#;
        let tags = decode_packet(xml);
        let lat = tags.iter().find(|t| t.tag == "GPSLatitude").unwrap();
        let long = tags.iter().find(|t| t.tag == "GPSLongitude").unwrap();
        assert_eq!(lat.namespace, "http://ns.adobe.com/exif/1.0/");
        let lat = lat.value.to_f64().unwrap();
        let long = long.value.to_f64().unwrap();
        assert!((lat - 26.582_516_6).abs() < 1e-6, "lat {lat}");
        assert!((long + 80.200_233_3).abs() < 1e-6, "long {long}");
    }

    #[test]
    fn gps_coordinate_grammar() {
        assert!((parse_gps_coordinate("26,34.951N").unwrap() - 26.58251666).abs() < 1e-8);
        assert!((parse_gps_coordinate("80,12.014W").unwrap() + 80.20023333).abs() < 1e-8);
        assert!((parse_gps_coordinate("26.5825").unwrap() - 26.5825).abs() < 1e-12);
        assert!((parse_gps_coordinate("-80.2002").unwrap() + 80.2002).abs() < 1e-12);
        assert!((parse_gps_coordinate("26.5825S").unwrap() + 26.5825).abs() < 1e-12);
        assert!(parse_gps_coordinate("").is_err());
        assert!(parse_gps_coordinate("a,b").is_err());
    }

    #[test]
    fn custom_handler_must_consume_packet() {
        let mut ctx = Ctx::new(Source::XMP);
        ctx.handle_xmp = Some(Box::new(|r: &mut dyn Read| -> Result<(), Error> {
            let mut sink = Vec::new();
            r.read_to_end(&mut sink)?;
            Ok(())
        }));
        decode(std::io::Cursor::new(PACKET.as_bytes().to_vec()), &mut ctx).unwrap();

        let mut ctx = Ctx::new(Source::XMP);
        ctx.handle_xmp = Some(Box::new(|r: &mut dyn Read| -> Result<(), Error> {
            let mut b = [0u8; 1];
            let _ = r.read(&mut b)?;
            Ok(())
        }));
        let err = decode(std::io::Cursor::new(PACKET.as_bytes().to_vec()), &mut ctx).unwrap_err();
        assert!(err.to_string().contains("expected EOF after XMP"));
    }
}
