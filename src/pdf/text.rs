//! Text layer extraction and tamper heuristics
//!
//! The verifier compares the carrying PDF against the embedded original on
//! cheap structural signals: text equality under whitespace normalization,
//! bounded annotation and image growth, metadata dates, and the number of
//! `startxref` markers (an incremental update leaves more than one).

use chrono::{DateTime, NaiveDateTime, Utc};
use lopdf::{Document, Object};

use crate::crypto::content_hash::MAX_CONTENT_PAGES;

use super::{resolve, resolve_dict};

/// Extract per-page text, best effort; unreadable pages yield empty strings.
pub fn extract_page_texts(doc: &Document, max_pages: usize) -> Vec<String> {
    doc.get_pages()
        .keys()
        .take(max_pages)
        .map(|page| doc.extract_text(&[*page]).unwrap_or_default())
        .collect()
}

/// Text for the content hash: the first [`MAX_CONTENT_PAGES`] pages.
pub fn content_hash_pages(doc: &Document) -> Vec<String> {
    extract_page_texts(doc, MAX_CONTENT_PAGES)
}

/// Whole-document text with runs of whitespace collapsed to single spaces.
pub fn normalized_text(doc: &Document) -> String {
    let pages = extract_page_texts(doc, usize::MAX);
    pages
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Count page annotations across the document.
pub fn count_annotations(doc: &Document) -> usize {
    let mut count = 0;
    for (_, page_id) in doc.get_pages() {
        let dict = match doc.get_object(page_id).ok().and_then(|o| o.as_dict().ok()) {
            Some(dict) => dict,
            None => continue,
        };
        if let Ok(annots) = dict.get(b"Annots") {
            if let Object::Array(entries) = resolve(doc, annots) {
                count += entries.len();
            }
        }
    }
    count
}

/// Count image XObjects referenced from page resources.
pub fn count_images(doc: &Document) -> usize {
    let mut count = 0;
    for (_, page_id) in doc.get_pages() {
        let dict = match doc.get_object(page_id).ok().and_then(|o| o.as_dict().ok()) {
            Some(dict) => dict,
            None => continue,
        };
        let resources = match dict.get(b"Resources").ok().and_then(|r| resolve_dict(doc, r)) {
            Some(resources) => resources,
            None => continue,
        };
        let xobjects = match resources
            .get(b"XObject")
            .ok()
            .and_then(|x| resolve_dict(doc, x))
        {
            Some(xobjects) => xobjects,
            None => continue,
        };
        for (_, entry) in xobjects.iter() {
            if let Some(xobject) = resolve_dict(doc, entry) {
                if matches!(xobject.get(b"Subtype"), Ok(Object::Name(name)) if name == b"Image") {
                    count += 1;
                }
            }
        }
    }
    count
}

/// Number of `startxref` markers in the raw file. A freshly written PDF has
/// exactly one; each incremental update appends another.
pub fn count_startxref(bytes: &[u8]) -> usize {
    const NEEDLE: &[u8] = b"startxref";
    if bytes.len() < NEEDLE.len() {
        return 0;
    }
    bytes
        .windows(NEEDLE.len())
        .filter(|window| *window == NEEDLE)
        .count()
}

/// Read a string entry from the Info dictionary.
pub fn info_string(doc: &Document, key: &[u8]) -> Option<String> {
    let info = doc.trailer.get(b"Info").ok()?;
    let dict = resolve_dict(doc, info)?;
    super::decode_pdf_string(resolve(doc, dict.get(key).ok()?))
}

/// Parse a PDF date (`D:YYYYMMDDHHmmSS` with optional timezone suffix).
pub fn parse_pdf_date(value: &str) -> Option<DateTime<Utc>> {
    let digits: String = value
        .trim_start_matches("D:")
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.len() < 8 {
        return None;
    }
    let padded = format!("{digits:0<14}");
    let naive = NaiveDateTime::parse_from_str(&padded, "%Y%m%d%H%M%S").ok()?;
    Some(naive.and_utc())
}

/// Format a timestamp as a PDF date string (UTC).
pub fn format_pdf_date(value: DateTime<Utc>) -> String {
    value.format("D:%Y%m%d%H%M%SZ").to_string()
}
