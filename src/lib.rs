//! # photometa
//!
//! Read-only image metadata extraction. Given a seekable byte stream in a
//! declared container format (JPEG, PNG, TIFF, WebP, HEIF/HEIC, AVIF, or the
//! TIFF-based raws DNG/CR2/NEF/ARW/PEF), the decoder locates embedded
//! metadata packets — EXIF tag trees, IPTC-IIM records and XMP packets —
//! decodes each tag to a typed [`Value`] normalized to ExifTool conventions,
//! and streams the results to a caller-supplied callback. Pixel dimensions
//! of the primary image are reported when the [`Source::CONFIG`] source is
//! requested.
//!
//! Designed for adversarial inputs: offsets are bounds-checked, IFD cycles
//! are broken by a visited-kind set, sub-stream materialization is capped at
//! 10 MiB, and tag-count/tag-size limits bound each decode.
//!
//! ## Example
//!
//! ```no_run
//! use photometa::{decode, ImageFormat, Options, Source};
//!
//! let file = std::fs::File::open("photo.jpg").unwrap();
//! let opts = Options {
//!     reader: Some(Box::new(file)),
//!     image_format: ImageFormat::Jpeg,
//!     sources: Source::EXIF | Source::IPTC | Source::XMP,
//!     handle_tag: Some(Box::new(|tag| {
//!         println!("{}/{} = {:?}", tag.namespace, tag.tag, tag.value);
//!         Ok(())
//!     })),
//!     ..Options::default()
//! };
//! decode(opts).unwrap();
//! ```
//!
//! The decoder never writes metadata and does not detect formats: the caller
//! declares which container to parse.

mod convert;
mod error;
mod exif;
mod heif;
mod io;
mod iptc;
mod jpeg;
mod png;
mod raw;
mod tiff;
mod value;
mod webp;
mod xmp;

use std::io::Read;
use std::sync::mpsc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDateTime};

pub use error::Error;
pub use io::ReadSeek;
pub use value::{Rat, RatComponent, Value};

use io::{ByteOrder, SourceReader};

/// Prefix used for tags whose ID is not in the static name tables.
pub const UNKNOWN_PREFIX: &str = "UnknownTag_";

/// A bit-set of metadata sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Source(u32);

impl Source {
    /// EXIF tag trees (TIFF-structured).
    pub const EXIF: Source = Source(1);
    /// IPTC-IIM records.
    pub const IPTC: Source = Source(1 << 1);
    /// XMP (RDF/XML) packets.
    pub const XMP: Source = Source(1 << 2);
    /// The image dimensions encoded in the container. Not to be confused
    /// with dimensions stored in EXIF tags.
    pub const CONFIG: Source = Source(1 << 3);

    pub fn has(self, source: Source) -> bool {
        self.0 & source.0 != 0
    }

    pub fn remove(self, source: Source) -> Source {
        Source(self.0 & !source.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Source {
    type Output = Source;
    fn bitor(self, rhs: Source) -> Source {
        Source(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for Source {
    type Output = Source;
    fn bitand(self, rhs: Source) -> Source {
        Source(self.0 & rhs.0)
    }
}

/// The container format of the input stream. Declared by the caller;
/// auto-detection is not implemented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ImageFormat {
    #[default]
    Auto,
    Jpeg,
    Tiff,
    Png,
    WebP,
    Heif,
    Avif,
    Dng,
    Cr2,
    Nef,
    Arw,
    Pef,
}

/// One decoded tag, streamed to the caller's callback.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TagInfo {
    /// Which source produced the tag.
    pub source: Source,
    /// Human-readable tag name, e.g. "ExposureTime", "City", "Creator".
    pub tag: String,
    /// Provenance: the slash-joined IFD path for EXIF (e.g.
    /// "IFD0/GPSInfoIFD"), the record name for IPTC (e.g.
    /// "IPTCApplication"), the XML namespace URI for XMP.
    pub namespace: String,
    /// The decoded value.
    pub value: Value,
}

/// Pixel dimensions of the primary image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ImageConfig {
    pub width: u32,
    pub height: u32,
}

/// The result of a [`decode`] call. Tags are not aggregated here; they are
/// delivered incrementally through the tag callback.
#[derive(Debug, Default)]
pub struct DecodeResult {
    /// Populated only when [`Source::CONFIG`] was requested and the walker
    /// found dimensions.
    pub image_config: Option<ImageConfig>,
}

/// Called for each decoded tag. Return `Err(Error::StopWalking)` to stop
/// the walk; that is treated as successful early termination.
pub type HandleTagFn = Box<dyn FnMut(TagInfo) -> Result<(), Error> + Send>;

/// Pre-filter invoked before a tag's value is decoded.
pub type ShouldHandleTagFn = Box<dyn FnMut(&TagInfo) -> bool + Send>;

/// Custom raw XMP packet handler. Must read the packet to the end.
pub type HandleXmpFn = Box<dyn FnMut(&mut dyn Read) -> Result<(), Error> + Send>;

/// Warning sink.
pub type WarnFn = Box<dyn FnMut(&str) + Send>;

/// Options for [`decode`].
pub struct Options {
    /// The stream to read image metadata from. Required.
    pub reader: Option<Box<dyn ReadSeek + Send>>,

    /// The container format of `reader`. Required; must not be `Auto`.
    pub image_format: ImageFormat,

    /// The sources to read. Defaults to `EXIF | IPTC | XMP`.
    pub sources: Source,

    /// Called for each tag. Defaults to a no-op.
    pub handle_tag: Option<HandleTagFn>,

    /// When set, tags for which this returns false are skipped without
    /// decoding their value. The default accepts all non-EXIF tags and only
    /// EXIF tags whose namespace begins with "IFD0" (i.e. it skips the
    /// thumbnail IFD1).
    pub should_handle_tag: Option<ShouldHandleTagFn>,

    /// When set, called with the raw packet for each XMP segment instead of
    /// the built-in RDF decoder. The handler must consume the packet fully.
    pub handle_xmp: Option<HandleXmpFn>,

    /// Warning sink. Defaults to a no-op.
    pub warn: Option<WarnFn>,

    /// Maximum wall-clock time for the decode. Zero disables the timeout.
    pub timeout: Duration,

    /// Maximum number of tags passed through the filter before the walk
    /// stops (successfully). Default 5000.
    pub limit_num_tags: u32,

    /// Tag values larger than this many bytes are skipped without notice.
    /// Not applied to the XMP source. Default 10 000.
    pub limit_tag_size: u32,
}

impl Default for Options {
    fn default() -> Options {
        Options {
            reader: None,
            image_format: ImageFormat::Auto,
            sources: Source::default(),
            handle_tag: None,
            should_handle_tag: None,
            handle_xmp: None,
            warn: None,
            timeout: Duration::ZERO,
            limit_num_tags: 0,
            limit_tag_size: 0,
        }
    }
}

const DEFAULT_LIMIT_NUM_TAGS: u32 = 5000;
const DEFAULT_LIMIT_TAG_SIZE: u32 = 10_000;

/// Per-decode state shared by the walkers: effective options, the tag-count
/// budget and the CONFIG result.
pub(crate) struct Ctx {
    pub(crate) sources: Source,
    handle_tag: HandleTagFn,
    should_handle_tag: ShouldHandleTagFn,
    pub(crate) handle_xmp: Option<HandleXmpFn>,
    warn: WarnFn,
    limit_num_tags: u32,
    pub(crate) limit_tag_size: u32,
    tag_count: u32,
    pub(crate) image_config: Option<ImageConfig>,
}

fn default_should_handle(tag: &TagInfo) -> bool {
    if tag.source != Source::EXIF {
        return true;
    }
    // Skip all tags in the thumbnail IFD (IFD1).
    tag.namespace.starts_with("IFD0")
}

impl Ctx {
    pub(crate) fn new(sources: Source) -> Ctx {
        Ctx {
            sources,
            handle_tag: Box::new(|_| Ok(())),
            should_handle_tag: Box::new(default_should_handle),
            handle_xmp: None,
            warn: Box::new(|_| {}),
            limit_num_tags: DEFAULT_LIMIT_NUM_TAGS,
            limit_tag_size: DEFAULT_LIMIT_TAG_SIZE,
            tag_count: 0,
            image_config: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_handler(sources: Source, handle_tag: HandleTagFn) -> Ctx {
        let mut ctx = Ctx::new(sources);
        ctx.handle_tag = handle_tag;
        ctx
    }

    /// Applies the caller's filter, charging the tag-count budget first.
    /// IFD-pointer tags bypass this entirely.
    pub(crate) fn should_handle(&mut self, tag: &TagInfo) -> Result<bool, Error> {
        self.tag_count += 1;
        if self.tag_count > self.limit_num_tags {
            return Err(Error::StopWalking);
        }
        Ok((self.should_handle_tag)(tag))
    }

    pub(crate) fn handle(&mut self, tag: TagInfo) -> Result<(), Error> {
        (self.handle_tag)(tag)
    }

    pub(crate) fn warnf(&mut self, msg: &str) {
        (self.warn)(msg);
    }
}

/// Decode the metadata sources requested in `opts`, streaming tags to the
/// callback. See the crate docs for the overall contract.
pub fn decode(mut opts: Options) -> Result<DecodeResult, Error> {
    let Some(reader) = opts.reader.take() else {
        return Err(Error::InvalidOptions("no reader provided"));
    };
    if opts.image_format == ImageFormat::Auto {
        return Err(Error::InvalidOptions(
            "no image format provided; format detection not implemented",
        ));
    }

    let mut sources = if opts.sources.is_empty() {
        Source::EXIF | Source::IPTC | Source::XMP
    } else {
        opts.sources
    };
    sources = sources & allowed_sources(opts.image_format);
    if sources.is_empty() {
        return Ok(DecodeResult::default());
    }

    let mut ctx = Ctx::new(sources);
    if let Some(handle_tag) = opts.handle_tag.take() {
        ctx.handle_tag = handle_tag;
    }
    if let Some(should_handle_tag) = opts.should_handle_tag.take() {
        ctx.should_handle_tag = should_handle_tag;
    }
    ctx.handle_xmp = opts.handle_xmp.take();
    if let Some(warn) = opts.warn.take() {
        ctx.warn = warn;
    }
    if opts.limit_num_tags != 0 {
        ctx.limit_num_tags = opts.limit_num_tags;
    }
    if opts.limit_tag_size != 0 {
        ctx.limit_tag_size = opts.limit_tag_size;
    }

    let byte_order = match opts.image_format {
        ImageFormat::WebP => ByteOrder::Little,
        _ => ByteOrder::Big,
    };
    let mut stream = SourceReader::new(reader, byte_order);
    let format = opts.image_format;

    if opts.timeout > Duration::ZERO {
        // Race the walker against a single timer on a worker thread. The
        // worker owns all walker state, so an abandoned worker cannot race
        // the caller.
        let timeout = opts.timeout;
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let walked = run_walker(format, &mut stream, &mut ctx);
            let _ = tx.send((walked, ctx.image_config));
        });
        match rx.recv_timeout(timeout) {
            Ok((walked, image_config)) => finish(walked, image_config),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::TimedOut(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(Error::invalid_format("metadata worker terminated"))
            }
        }
    } else {
        let walked = run_walker(format, &mut stream, &mut ctx);
        finish(walked, ctx.image_config)
    }
}

fn run_walker(
    format: ImageFormat,
    stream: &mut SourceReader<Box<dyn ReadSeek + Send>>,
    ctx: &mut Ctx,
) -> Result<(), Error> {
    match format {
        ImageFormat::Jpeg => jpeg::decode(stream, ctx),
        ImageFormat::Tiff => tiff::decode(stream, ctx),
        ImageFormat::Png => png::decode(stream, ctx),
        ImageFormat::WebP => webp::decode(stream, ctx),
        ImageFormat::Heif | ImageFormat::Avif => heif::decode(stream, ctx),
        ImageFormat::Dng
        | ImageFormat::Cr2
        | ImageFormat::Nef
        | ImageFormat::Arw
        | ImageFormat::Pef => raw::decode(stream, ctx),
        ImageFormat::Auto => unreachable!("validated at entry"),
    }
}

/// Normalize terminal outcomes: the stop sentinels and clean end-of-stream
/// are success; truncation surfaces as invalid format.
fn finish(
    walked: Result<(), Error>,
    image_config: Option<ImageConfig>,
) -> Result<DecodeResult, Error> {
    match walked {
        Ok(()) => Ok(DecodeResult { image_config }),
        Err(e) if e.is_stop() => Ok(DecodeResult { image_config }),
        Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(Error::invalid_format("unexpected end of stream"))
        }
        Err(e) => Err(e),
    }
}

/// The sources each container can carry.
fn allowed_sources(format: ImageFormat) -> Source {
    match format {
        ImageFormat::Jpeg
        | ImageFormat::Tiff
        | ImageFormat::Png
        | ImageFormat::Dng
        | ImageFormat::Cr2
        | ImageFormat::Nef
        | ImageFormat::Arw
        | ImageFormat::Pef => Source::EXIF | Source::IPTC | Source::XMP | Source::CONFIG,
        ImageFormat::WebP | ImageFormat::Heif | ImageFormat::Avif => {
            Source::EXIF | Source::XMP | Source::CONFIG
        }
        ImageFormat::Auto => Source::default(),
    }
}

/// A collection of tags grouped per source, keyed by tag name. Last write
/// wins for duplicate names within a source.
#[derive(Debug, Default, Clone)]
pub struct Tags {
    exif: std::collections::HashMap<String, TagInfo>,
    iptc: std::collections::HashMap<String, TagInfo>,
    xmp: std::collections::HashMap<String, TagInfo>,
}

impl Tags {
    /// Add a tag to its source's map.
    pub fn add(&mut self, tag: TagInfo) {
        if let Some(map) = self.source_map_mut(tag.source) {
            map.insert(tag.tag.clone(), tag);
        }
    }

    /// Whether a tag with this source and name was added.
    pub fn has(&self, tag: &TagInfo) -> bool {
        self.source_map(tag.source)
            .is_some_and(|m| m.contains_key(&tag.tag))
    }

    pub fn exif(&self) -> &std::collections::HashMap<String, TagInfo> {
        &self.exif
    }

    pub fn iptc(&self) -> &std::collections::HashMap<String, TagInfo> {
        &self.iptc
    }

    pub fn xmp(&self) -> &std::collections::HashMap<String, TagInfo> {
        &self.xmp
    }

    /// All tags in one map. EXIF, then IPTC, then XMP; later sources win on
    /// name collisions.
    pub fn all(&self) -> std::collections::HashMap<String, TagInfo> {
        let mut all = self.exif.clone();
        all.extend(self.iptc.clone());
        all.extend(self.xmp.clone());
        all
    }

    /// Latitude and longitude in decimal degrees, from EXIF when present,
    /// falling back to XMP. South and west are negative.
    pub fn lat_long(&self) -> Option<(f64, f64)> {
        self.lat_long_from_exif()
            .or_else(|| self.lat_long_from_xmp())
    }

    fn lat_long_from_exif(&self) -> Option<(f64, f64)> {
        let long = self.exif.get("GPSLongitude")?.value.to_f64()?;
        let lat = self.exif.get("GPSLatitude")?.value.to_f64()?;
        let ns = self.exif.get("GPSLatitudeRef").and_then(|t| t.value.as_str());
        let ew = self.exif.get("GPSLongitudeRef").and_then(|t| t.value.as_str());
        let mut lat = if ns == Some("S") { -lat } else { lat };
        let mut long = if ew == Some("W") { -long } else { long };
        if lat.is_nan() {
            lat = 0.0;
        }
        if long.is_nan() {
            long = 0.0;
        }
        Some((lat, long))
    }

    fn lat_long_from_xmp(&self) -> Option<(f64, f64)> {
        let lat = self.xmp.get("GPSLatitude")?.value.to_f64().unwrap_or(0.0);
        let long = self.xmp.get("GPSLongitude")?.value.to_f64().unwrap_or(0.0);
        Some((
            if lat.is_nan() { 0.0 } else { lat },
            if long.is_nan() { 0.0 } else { long },
        ))
    }

    /// A date/time assembled from available sources: EXIF DateTimeOriginal
    /// or ModifyDate first, then the XMP date tags, then IPTC
    /// DateCreated + TimeCreated. Timezone-less values resolve with a
    /// +00:00 offset.
    pub fn date_time(&self) -> Option<DateTime<FixedOffset>> {
        let (s, has_zone) = self.date_time_string()?;
        if has_zone {
            for layout in ["%Y:%m:%d %H:%M:%S%:z", "%Y-%m-%dT%H:%M:%S%:z"] {
                if let Ok(dt) = DateTime::parse_from_str(&s, layout) {
                    return Some(dt);
                }
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
                return Some(dt);
            }
        }
        let naive = NaiveDateTime::parse_from_str(&s, "%Y:%m:%d %H:%M:%S").ok()?;
        Some(naive.and_utc().fixed_offset())
    }

    fn date_time_string(&self) -> Option<(String, bool)> {
        let text = |tag: &TagInfo| tag.value.as_str().map(str::to_string);

        for name in ["DateTimeOriginal", "ModifyDate"] {
            if let Some(s) = self.exif.get(name).and_then(text) {
                return Some((s, false));
            }
        }
        for name in ["DateTimeOriginal", "CreateDate", "DateCreated"] {
            if let Some(s) = self.xmp.get(name).and_then(text) {
                let has_zone = s.len() > 19;
                return Some((s, has_zone));
            }
        }
        if let Some(date) = self.iptc.get("DateCreated").and_then(text) {
            if let Some(time) = self.iptc.get("TimeCreated").and_then(text) {
                let has_zone = time.len() > 8;
                return Some((format!("{date} {time}"), has_zone));
            }
            return Some((format!("{date} 00:00:00"), false));
        }
        None
    }

    fn source_map(&self, source: Source) -> Option<&std::collections::HashMap<String, TagInfo>> {
        match source {
            Source::EXIF => Some(&self.exif),
            Source::IPTC => Some(&self.iptc),
            Source::XMP => Some(&self.xmp),
            _ => None,
        }
    }

    fn source_map_mut(
        &mut self,
        source: Source,
    ) -> Option<&mut std::collections::HashMap<String, TagInfo>> {
        match source {
            Source::EXIF => Some(&mut self.exif),
            Source::IPTC => Some(&mut self.iptc),
            Source::XMP => Some(&mut self.xmp),
            _ => None,
        }
    }
}
