//! Structural scan: recover embedded raster images from the object table.
//!
//! Page resource dictionaries are not a reliable index of a PDF's images:
//! images can hang off nested form XObjects, annotations, or nothing at
//! all after an incremental edit. The scanner therefore walks every
//! indirect object and keeps each stream whose dictionary declares
//! `/Subtype /Image`, regardless of reachability.
//!
//! ## Damaged files
//!
//! lopdf locates objects through `startxref` and the cross-reference
//! table. When that fails the scanner reads `N G obj ... endobj` bodies
//! straight from the file, so a broken table still yields its images. The
//! recovered dictionaries are matched with byte regexes; only the keys an
//! image needs are read.
//!
//! ## Typed cursor
//!
//! Dictionary values are read through [`PdfValue`], which tags every
//! object as a stream, dictionary, name, number, reference, or array.
//! [`ObjectCursor`] follows references so callers never probe raw
//! `lopdf::Object` variants themselves.
//!
//! ## Why spawn_blocking?
//!
//! Parsing is CPU-bound and synchronous. [`scan_images`] moves it onto the
//! blocking pool; a panic inside the parser is reported as a warning and an
//! empty result instead of taking the request down.

use crate::config::ScanLimits;
use crate::error::ExtractionWarning;
use crate::pipeline::sniff::format_bytes;
use crate::report::{ImageFormat, RawImageRecord};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use once_cell::sync::Lazy;
use regex::bytes::Regex as BytesRegex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Longest reference chain followed before giving up (guards against cycles).
const MAX_REFERENCE_DEPTH: usize = 16;

/// Images accepted by a scan plus any recoverable problems encountered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOutcome {
    pub images: Vec<RawImageRecord>,
    pub warnings: Vec<ExtractionWarning>,
}

// ── Typed cursor ─────────────────────────────────────────────────────────

/// A PDF object classified by kind.
#[derive(Debug, Clone, Copy)]
pub enum PdfValue<'a> {
    Stream(&'a Stream),
    Dictionary(&'a Dictionary),
    Name(&'a [u8]),
    Number(f64),
    Reference(ObjectId),
    Array(&'a [Object]),
    Other,
}

impl<'a> PdfValue<'a> {
    pub fn of(obj: &'a Object) -> Self {
        match obj {
            Object::Stream(s) => PdfValue::Stream(s),
            Object::Dictionary(d) => PdfValue::Dictionary(d),
            Object::Name(n) => PdfValue::Name(n.as_slice()),
            Object::Integer(i) => PdfValue::Number(*i as f64),
            Object::Real(r) => PdfValue::Number(*r as f64),
            Object::Reference(id) => PdfValue::Reference(*id),
            Object::Array(items) => PdfValue::Array(items.as_slice()),
            _ => PdfValue::Other,
        }
    }

    /// The dictionary of a stream or a bare dictionary.
    pub fn dict(self) -> Option<&'a Dictionary> {
        match self {
            PdfValue::Stream(s) => Some(&s.dict),
            PdfValue::Dictionary(d) => Some(d),
            _ => None,
        }
    }
}

/// Read-only walker over a parsed document's indirect objects.
#[derive(Clone, Copy)]
pub struct ObjectCursor<'a> {
    doc: &'a Document,
}

impl<'a> ObjectCursor<'a> {
    pub fn new(doc: &'a Document) -> Self {
        Self { doc }
    }

    /// Every indirect object in ascending `(number, generation)` order.
    pub fn objects(self) -> impl Iterator<Item = (ObjectId, PdfValue<'a>)> + 'a {
        self.doc
            .objects
            .iter()
            .map(|(id, obj)| (*id, PdfValue::of(obj)))
    }

    /// Follow references until a direct value is reached.
    ///
    /// Dangling or overly deep chains resolve to [`PdfValue::Other`].
    pub fn resolve(self, value: PdfValue<'a>) -> PdfValue<'a> {
        let mut current = value;
        for _ in 0..MAX_REFERENCE_DEPTH {
            match current {
                PdfValue::Reference(id) => match self.doc.get_object(id) {
                    Ok(obj) => current = PdfValue::of(obj),
                    Err(_) => return PdfValue::Other,
                },
                direct => return direct,
            }
        }
        PdfValue::Other
    }

    /// Look up `key` in `dict`, resolving indirect values.
    pub fn get(self, dict: &'a Dictionary, key: &[u8]) -> Option<PdfValue<'a>> {
        dict.get(key)
            .ok()
            .map(|obj| self.resolve(PdfValue::of(obj)))
    }

    pub fn name(self, dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
        match self.get(dict, key)? {
            PdfValue::Name(n) => Some(n),
            _ => None,
        }
    }

    pub fn number(self, dict: &'a Dictionary, key: &[u8]) -> Option<f64> {
        match self.get(dict, key)? {
            PdfValue::Number(n) => Some(n),
            _ => None,
        }
    }

    /// A name or an array of names (the two legal shapes of `/Filter`).
    pub fn names(self, dict: &'a Dictionary, key: &[u8]) -> Vec<&'a [u8]> {
        match self.get(dict, key) {
            Some(PdfValue::Name(n)) => vec![n],
            Some(PdfValue::Array(items)) => items
                .iter()
                .filter_map(|item| match self.resolve(PdfValue::of(item)) {
                    PdfValue::Name(n) => Some(n),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

// ── Scan ─────────────────────────────────────────────────────────────────

/// An image stream found in the file, before limits are applied.
struct Candidate {
    id: ObjectId,
    width: u32,
    height: u32,
    filters: Vec<Vec<u8>>,
    decode_parms: Option<Dictionary>,
    content: Vec<u8>,
}

/// Scan with the default acceptance limits.
pub fn scan(pdf_bytes: &[u8]) -> Vec<RawImageRecord> {
    scan_with_limits(pdf_bytes, &ScanLimits::default()).images
}

/// Walk every indirect object and collect accepted images.
///
/// Never fails. When lopdf cannot load the cross-reference table the
/// objects are read from the raw body instead and the outcome carries one
/// [`ExtractionWarning::Unparseable`].
pub fn scan_with_limits(pdf_bytes: &[u8], limits: &ScanLimits) -> ScanOutcome {
    let parsed = match Document::load_mem(pdf_bytes) {
        Ok(doc) if doc.objects.is_empty() => Err("no objects listed".to_string()),
        Ok(doc) => Ok(doc),
        Err(e) => Err(e.to_string()),
    };

    let (candidates, warnings) = match parsed {
        Ok(doc) => {
            debug!(
                "PDF has {} page(s), {} objects",
                doc.get_pages().len(),
                doc.objects.len()
            );
            (parsed_candidates(&doc), Vec::new())
        }
        Err(detail) => {
            warn!(
                "Could not parse PDF structure ({}), recovering objects from the raw body",
                detail
            );
            (
                recovered_candidates(pdf_bytes),
                vec![ExtractionWarning::Unparseable { detail }],
            )
        }
    };

    let images = accept(candidates, limits);
    info!("Total images extracted: {}", images.len());
    ScanOutcome { images, warnings }
}

/// Run [`scan_with_limits`] on the blocking pool.
pub async fn scan_images(pdf_bytes: Arc<[u8]>, limits: ScanLimits) -> ScanOutcome {
    match tokio::task::spawn_blocking(move || scan_with_limits(&pdf_bytes, &limits)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Image scan aborted: {}", e);
            ScanOutcome {
                images: Vec::new(),
                warnings: vec![ExtractionWarning::Unparseable {
                    detail: format!("scan task failed: {e}"),
                }],
            }
        }
    }
}

fn parsed_candidates(doc: &Document) -> Vec<Candidate> {
    let cursor = ObjectCursor::new(doc);
    let mut candidates = Vec::new();

    for (id, value) in cursor.objects() {
        let Some(dict) = value.dict() else { continue };
        if cursor.name(dict, b"Subtype") != Some(b"Image".as_slice()) {
            continue;
        }
        let PdfValue::Stream(stream) = value else {
            debug!("Object {:?} declares /Image without stream contents, skipped", id);
            continue;
        };
        let decode_parms = match cursor.get(dict, b"DecodeParms") {
            Some(PdfValue::Dictionary(d)) => Some(d.clone()),
            _ => None,
        };
        candidates.push(Candidate {
            id,
            width: dimension(cursor.number(dict, b"Width")),
            height: dimension(cursor.number(dict, b"Height")),
            filters: cursor
                .names(dict, b"Filter")
                .into_iter()
                .map(<[u8]>::to_vec)
                .collect(),
            decode_parms,
            content: stream.content.clone(),
        });
    }
    candidates
}

/// Apply the acceptance limits and number the survivors in order.
fn accept(candidates: Vec<Candidate>, limits: &ScanLimits) -> Vec<RawImageRecord> {
    let mut images = Vec::new();

    for candidate in candidates {
        let (id, width, height) = (candidate.id, candidate.width, candidate.height);
        if candidate.content.is_empty() {
            debug!("Image object {:?} has an empty stream, skipped", id);
            continue;
        }

        let format = classify_filter(&candidate.filters);
        let bytes = payload(candidate, format);
        let byte_size = bytes.len();

        if !limits.accepts(width, height, byte_size) {
            debug!(
                "Image object {:?} rejected: {}x{}, {} bytes",
                id, width, height, byte_size
            );
            continue;
        }

        let index = images.len();
        info!(
            "Image {}: {}x{} ({}, {})",
            index,
            width,
            height,
            format,
            format_bytes(byte_size as u64)
        );
        images.push(RawImageRecord {
            index,
            bytes,
            width,
            height,
            format,
            byte_size,
        });
    }
    images
}

fn dimension(n: Option<f64>) -> u32 {
    match n {
        Some(v) if v.is_finite() && v > 0.0 => v.min(u32::MAX as f64) as u32,
        _ => 0,
    }
}

fn is_dct(filter: &[u8]) -> bool {
    filter.starts_with(b"DCT")
}

/// DCT-based filters carry JPEG data; everything else is labelled PNG.
fn classify_filter(filters: &[Vec<u8>]) -> ImageFormat {
    if filters.iter().any(|f| is_dct(f)) {
        ImageFormat::Jpeg
    } else {
        ImageFormat::Png
    }
}

/// The bytes stored for an image.
///
/// For DCT streams only the filters ahead of `DCTDecode` are undone, which
/// leaves the JPEG file. Other streams are decoded through the whole chain.
/// A chain lopdf cannot undo keeps the stored bytes.
fn payload(candidate: Candidate, format: ImageFormat) -> Vec<u8> {
    let chain = match format {
        ImageFormat::Jpeg => {
            let dct = candidate.filters.iter().position(|f| is_dct(f)).unwrap_or(0);
            &candidate.filters[..dct]
        }
        _ => &candidate.filters[..],
    };
    if chain.is_empty() {
        return candidate.content;
    }
    match decode(chain, candidate.decode_parms.as_ref(), &candidate.content) {
        Some(decoded) => decoded,
        None => {
            debug!(
                "Image object {:?}: filter chain not decodable, kept as stored",
                candidate.id
            );
            candidate.content
        }
    }
}

fn decode(filters: &[Vec<u8>], parms: Option<&Dictionary>, content: &[u8]) -> Option<Vec<u8>> {
    let names: Vec<Object> = filters.iter().cloned().map(Object::Name).collect();
    // lopdf refuses to decode anything tagged /Subtype /Image.
    let mut dict = dictionary! { "Filter" => names };
    if let Some(parms) = parms {
        dict.set("DecodeParms", parms.clone());
    }
    Stream::new(dict, content.to_vec())
        .decompressed_content()
        .ok()
        .filter(|decoded| !decoded.is_empty())
}

// ── Recovery ─────────────────────────────────────────────────────────────

static OBJ_HEADER: Lazy<BytesRegex> =
    Lazy::new(|| BytesRegex::new(r"(?-u)(\d+)\s+(\d+)\s+obj\b").unwrap());
static END_OBJ: Lazy<BytesRegex> = Lazy::new(|| BytesRegex::new(r"(?-u)\bendobj\b").unwrap());
static STREAM_START: Lazy<BytesRegex> =
    Lazy::new(|| BytesRegex::new(r"(?-u)>>\s*stream(?:\r\n|\n|\r)").unwrap());
static END_STREAM: Lazy<BytesRegex> =
    Lazy::new(|| BytesRegex::new(r"(?-u)(?:\r\n|\n|\r)?endstream\b").unwrap());
static IMAGE_SUBTYPE: Lazy<BytesRegex> =
    Lazy::new(|| BytesRegex::new(r"(?-u)/Subtype\s*/Image(?:[\s/<>\[\]()]|$)").unwrap());
static NUMERIC_ENTRY: Lazy<BytesRegex> = Lazy::new(|| {
    BytesRegex::new(r"(?-u)/(Width|Height|Length)\s+([+-]?\d+(?:\.\d+)?)(?:\s+(\d+)\s+R\b)?")
        .unwrap()
});
static FILTER_ENTRY: Lazy<BytesRegex> =
    Lazy::new(|| BytesRegex::new(r"(?-u)/Filter\s*(\[[^\]]*\]|/[^\s/<>\[\]()]+)").unwrap());
static NAME: Lazy<BytesRegex> =
    Lazy::new(|| BytesRegex::new(r"(?-u)/([^\s/<>\[\]()]+)").unwrap());
static NUMBER_BODY: Lazy<BytesRegex> =
    Lazy::new(|| BytesRegex::new(r"(?-u)^\s*([+-]?\d+(?:\.\d+)?)\s*$").unwrap());

/// An indirect object read straight from the file body.
enum RawObject {
    Number(f64),
    Image { dict: Vec<u8>, content: Vec<u8> },
    Other,
}

/// A numeric dictionary value, direct or `N G R`.
#[derive(Clone, Copy)]
enum NumericValue {
    Direct(f64),
    Indirect(ObjectId),
}

#[derive(Default)]
struct NumericEntries {
    width: Option<NumericValue>,
    height: Option<NumericValue>,
    length: Option<NumericValue>,
}

impl NumericEntries {
    /// First `/Width`, `/Height` and `/Length` entries of a dictionary.
    fn parse(dict: &[u8]) -> Self {
        let mut entries = Self::default();
        for caps in NUMERIC_ENTRY.captures_iter(dict) {
            let Some(value) = numeric_value(&caps) else { continue };
            let slot = match &caps[1] {
                b"Width" => &mut entries.width,
                b"Height" => &mut entries.height,
                _ => &mut entries.length,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        entries
    }
}

fn numeric_value(caps: &regex::bytes::Captures<'_>) -> Option<NumericValue> {
    let first = ascii_number(&caps[2])?;
    match caps.get(3) {
        Some(generation) => {
            let number = u32::try_from(first as i64).ok()?;
            let generation = u16::try_from(ascii_number(generation.as_bytes())? as i64).ok()?;
            Some(NumericValue::Indirect((number, generation)))
        }
        None => Some(NumericValue::Direct(first)),
    }
}

fn ascii_number(bytes: &[u8]) -> Option<f64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

/// Names listed by a dictionary's `/Filter` entry.
fn filter_names(dict: &[u8]) -> Vec<Vec<u8>> {
    let Some(caps) = FILTER_ENTRY.captures(dict) else {
        return Vec::new();
    };
    NAME.captures_iter(&caps[1])
        .map(|name| name[1].to_vec())
        .collect()
}

/// Read every `N G obj` body in file order, ignoring the cross-reference
/// table. A later definition of the same id replaces an earlier one, as an
/// incremental update would.
fn recover_objects(bytes: &[u8]) -> BTreeMap<ObjectId, RawObject> {
    let mut objects = BTreeMap::new();
    let mut pos = 0;

    while let Some(caps) = OBJ_HEADER.captures_at(bytes, pos) {
        let (Some(header), Some(number), Some(generation)) = (
            caps.get(0),
            ascii_number(&caps[1]).and_then(|n| u32::try_from(n as i64).ok()),
            ascii_number(&caps[2]).and_then(|g| u16::try_from(g as i64).ok()),
        ) else {
            pos = caps.get(0).map_or(bytes.len(), |m| m.end());
            continue;
        };
        let id = (number, generation);
        let body_start = header.end();

        let end_obj = END_OBJ.find_at(bytes, body_start);
        let next_header = OBJ_HEADER.find_at(bytes, body_start).map(|m| m.start());
        let limit = [end_obj.map(|m| m.start()), next_header]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(bytes.len());

        match STREAM_START.find_at(bytes, body_start).filter(|m| m.start() < limit) {
            Some(marker) => {
                let dict = &bytes[body_start..marker.start() + 2];
                let content_start = marker.end();
                let (content_end, resume) = stream_bounds(bytes, dict, content_start);
                let object = if IMAGE_SUBTYPE.is_match(dict) {
                    RawObject::Image {
                        dict: dict.to_vec(),
                        content: bytes[content_start..content_end].to_vec(),
                    }
                } else {
                    RawObject::Other
                };
                objects.insert(id, object);
                pos = resume;
            }
            None => {
                let object = NUMBER_BODY
                    .captures(&bytes[body_start..limit])
                    .and_then(|c| ascii_number(&c[1]))
                    .map_or(RawObject::Other, RawObject::Number);
                objects.insert(id, object);
                pos = match end_obj {
                    Some(m) if m.start() == limit => m.end(),
                    _ => limit,
                };
            }
        }
    }
    objects
}

/// End of a stream's content and the offset to resume scanning from.
///
/// A direct `/Length` is trusted when `endstream` follows it; otherwise the
/// content runs to the next `endstream`, or to end of file.
fn stream_bounds(bytes: &[u8], dict: &[u8], start: usize) -> (usize, usize) {
    if let Some(NumericValue::Direct(len)) = NumericEntries::parse(dict).length {
        if len >= 0.0 {
            let end = start.saturating_add(len as usize);
            if let Some(m) = END_STREAM.find_at(bytes, end.min(bytes.len())) {
                let between = &bytes[end.min(m.start())..m.start()];
                if end <= m.start() && between.iter().all(u8::is_ascii_whitespace) {
                    return (end, m.end());
                }
            }
        }
    }
    match END_STREAM.find_at(bytes, start) {
        Some(m) => (m.start(), m.end()),
        None => (bytes.len(), bytes.len()),
    }
}

/// Image candidates read from the raw body, for files whose
/// cross-reference table lopdf cannot load.
fn recovered_candidates(bytes: &[u8]) -> Vec<Candidate> {
    let objects = recover_objects(bytes);
    let numbers: HashMap<ObjectId, f64> = objects
        .iter()
        .filter_map(|(id, obj)| match obj {
            RawObject::Number(n) => Some((*id, *n)),
            _ => None,
        })
        .collect();
    let resolve = |value: Option<NumericValue>| -> Option<f64> {
        match value? {
            NumericValue::Direct(n) => Some(n),
            NumericValue::Indirect(id) => numbers.get(&id).copied(),
        }
    };

    let candidates: Vec<Candidate> = objects
        .into_iter()
        .filter_map(|(id, obj)| match obj {
            RawObject::Image { dict, content } => {
                let entries = NumericEntries::parse(&dict);
                Some(Candidate {
                    id,
                    width: dimension(resolve(entries.width)),
                    height: dimension(resolve(entries.height)),
                    filters: filter_names(&dict),
                    decode_parms: None,
                    content,
                })
            }
            _ => None,
        })
        .collect();
    debug!("Recovered {} image stream(s) from the raw body", candidates.len());
    candidates
}
