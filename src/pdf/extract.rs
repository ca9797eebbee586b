//! Attachment extraction
//!
//! Real-world PDFs arrive after passing through readers that rewrite or
//! partially drop structure, so the extractor tries every discovery path in
//! order: the EmbeddedFiles name tree (with `Kids` recursion), the catalog
//! `AF` array, page-level `FileAttachment` annotations, and finally a full
//! scan of indirect objects for `Filespec` dictionaries.

use std::collections::HashSet;
use std::io::Read;

use flate2::read::ZlibDecoder;
use lopdf::{Dictionary, Document, Object, ObjectId};
use serde_json::Value;

use crate::domain::VerificationBundle;

use super::{decode_pdf_string, resolve, resolve_dict};

/// One recovered embedded file
#[derive(Debug, Clone)]
pub struct ExtractedAttachment {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Recover all embedded files, deduplicated across discovery paths.
pub fn extract_attachments(doc: &Document) -> Vec<ExtractedAttachment> {
    let mut filespecs: Vec<(Option<ObjectId>, Dictionary)> = Vec::new();

    collect_name_tree(doc, &mut filespecs);
    collect_af_array(doc, &mut filespecs);
    collect_annotations(doc, &mut filespecs);
    collect_object_scan(doc, &mut filespecs);

    let mut seen_ids: HashSet<ObjectId> = HashSet::new();
    let mut seen_names: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for (id, dict) in filespecs {
        if let Some(id) = id {
            if !seen_ids.insert(id) {
                continue;
            }
        }
        let Some(attachment) = materialize(doc, &dict) else {
            continue;
        };
        if !seen_names.insert(attachment.name.clone()) {
            continue;
        }
        out.push(attachment);
    }

    out
}

/// Find the embedded original PDF: canonical `*Original_PDF*` names plus
/// the legacy `original.pdf`.
pub fn extract_original_pdf(doc: &Document) -> Option<Vec<u8>> {
    extract_attachments(doc)
        .into_iter()
        .find(|a| {
            let name = a.name.to_ascii_lowercase();
            name.contains("original_pdf") || name == "original.pdf"
        })
        .map(|a| a.bytes)
}

/// Find the verification bundle: any JSON attachment carrying a bundle
/// marker key, with the legacy metadata fallback.
pub fn extract_bundle(doc: &Document) -> Option<(VerificationBundle, Value)> {
    for attachment in extract_attachments(doc) {
        if let Ok(value) = serde_json::from_slice::<Value>(&attachment.bytes) {
            if VerificationBundle::value_looks_like_bundle(&value) {
                if let Ok(bundle) = serde_json::from_value(value.clone()) {
                    return Some((bundle, value));
                }
            }
        }
    }

    // Legacy writers stuffed the bundle into Subject/Keywords metadata.
    for key in [b"Subject".as_slice(), b"Keywords".as_slice()] {
        if let Some(raw) = super::text::info_string(doc, key) {
            if let Ok(value) = serde_json::from_str::<Value>(&raw) {
                if VerificationBundle::value_looks_like_bundle(&value) {
                    if let Ok(bundle) = serde_json::from_value(value.clone()) {
                        return Some((bundle, value));
                    }
                }
            }
        }
    }

    None
}

// ---------------------------------------------------------------------------
// Discovery paths
// ---------------------------------------------------------------------------

fn catalog<'a>(doc: &'a Document) -> Option<&'a Dictionary> {
    let root = doc.trailer.get(b"Root").ok()?;
    resolve_dict(doc, root)
}

/// (a) Names -> EmbeddedFiles name tree, recursing through Kids.
fn collect_name_tree(doc: &Document, out: &mut Vec<(Option<ObjectId>, Dictionary)>) {
    let Some(catalog) = catalog(doc) else { return };
    let Some(names) = catalog.get(b"Names").ok().and_then(|n| resolve_dict(doc, n)) else {
        return;
    };
    let Some(embedded) = names
        .get(b"EmbeddedFiles")
        .ok()
        .and_then(|e| resolve_dict(doc, e))
    else {
        return;
    };
    walk_name_tree(doc, embedded, out, 0);
}

fn walk_name_tree(
    doc: &Document,
    node: &Dictionary,
    out: &mut Vec<(Option<ObjectId>, Dictionary)>,
    depth: usize,
) {
    if depth > 8 {
        return;
    }
    if let Ok(Object::Array(entries)) = node.get(b"Names").map(|n| resolve(doc, n)) {
        // Pairs of (name, filespec)
        for pair in entries.chunks(2) {
            if pair.len() == 2 {
                push_filespec(doc, &pair[1], out);
            }
        }
    }
    if let Ok(Object::Array(kids)) = node.get(b"Kids").map(|k| resolve(doc, k)) {
        for kid in kids {
            if let Some(child) = resolve_dict(doc, kid) {
                walk_name_tree(doc, child, out, depth + 1);
            }
        }
    }
}

/// (b) Catalog AF (associated files) array.
fn collect_af_array(doc: &Document, out: &mut Vec<(Option<ObjectId>, Dictionary)>) {
    let Some(catalog) = catalog(doc) else { return };
    if let Ok(Object::Array(entries)) = catalog.get(b"AF").map(|a| resolve(doc, a)) {
        for entry in entries {
            push_filespec(doc, entry, out);
        }
    }
}

/// (c) Page-level FileAttachment annotations.
fn collect_annotations(doc: &Document, out: &mut Vec<(Option<ObjectId>, Dictionary)>) {
    for (_, page_id) in doc.get_pages() {
        let Some(page) = doc.get_object(page_id).ok().and_then(|o| o.as_dict().ok()) else {
            continue;
        };
        let Ok(Object::Array(annots)) = page.get(b"Annots").map(|a| resolve(doc, a)) else {
            continue;
        };
        for annot in annots {
            let Some(dict) = resolve_dict(doc, annot) else { continue };
            let is_file_attachment = matches!(
                dict.get(b"Subtype"),
                Ok(Object::Name(name)) if name == b"FileAttachment"
            );
            if !is_file_attachment {
                continue;
            }
            if let Ok(fs) = dict.get(b"FS") {
                push_filespec(doc, fs, out);
            }
        }
    }
}

/// (d) Full indirect-object scan.
fn collect_object_scan(doc: &Document, out: &mut Vec<(Option<ObjectId>, Dictionary)>) {
    for (id, object) in &doc.objects {
        let Object::Dictionary(dict) = object else { continue };
        let is_filespec = matches!(dict.get(b"Type"), Ok(Object::Name(name)) if name == b"Filespec")
            || dict.has(b"EF");
        if is_filespec && looks_like_filespec(dict) {
            out.push((Some(*id), dict.clone()));
        }
    }
}

fn looks_like_filespec(dict: &Dictionary) -> bool {
    dict.has(b"EF") && (dict.has(b"F") || dict.has(b"UF"))
}

fn push_filespec(doc: &Document, object: &Object, out: &mut Vec<(Option<ObjectId>, Dictionary)>) {
    let id = match object {
        Object::Reference(id) => Some(*id),
        _ => None,
    };
    if let Some(dict) = resolve_dict(doc, object) {
        if looks_like_filespec(dict) {
            out.push((id, dict.clone()));
        }
    }
}

// ---------------------------------------------------------------------------
// Payload recovery
// ---------------------------------------------------------------------------

fn materialize(doc: &Document, filespec: &Dictionary) -> Option<ExtractedAttachment> {
    let name = filespec
        .get(b"UF")
        .ok()
        .and_then(|n| decode_pdf_string(resolve(doc, n)))
        .or_else(|| {
            filespec
                .get(b"F")
                .ok()
                .and_then(|n| decode_pdf_string(resolve(doc, n)))
        })?;

    let ef = filespec.get(b"EF").ok().and_then(|e| resolve_dict(doc, e))?;
    let stream_obj = ef.get(b"F").or_else(|_| ef.get(b"UF")).ok()?;
    let stream = match resolve(doc, stream_obj) {
        Object::Stream(stream) => stream,
        _ => return None,
    };

    let bytes = embedded_bytes(stream)?;
    Some(ExtractedAttachment { name, bytes })
}

/// Decode an embedded-file stream: declared filters first, then raw zlib
/// (`0x78` header) for streams whose filter entry was lost.
fn embedded_bytes(stream: &lopdf::Stream) -> Option<Vec<u8>> {
    if let Ok(decoded) = stream.decompressed_content() {
        return Some(decoded);
    }
    let raw = &stream.content;
    if raw.first() == Some(&0x78) {
        let mut decoder = ZlibDecoder::new(raw.as_slice());
        let mut out = Vec::new();
        if decoder.read_to_end(&mut out).is_ok() && !out.is_empty() {
            return Some(out);
        }
    }
    Some(raw.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::augment::attach_file;
    use lopdf::dictionary;

    fn minimal_doc() -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    #[test]
    fn test_attach_and_extract_round_trip() {
        let mut doc = minimal_doc();
        attach_file(
            &mut doc,
            "Justifai_Original_PDF.pdf",
            b"%PDF-1.5 fake body",
            "application#2Fpdf",
        )
        .unwrap();

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        let reloaded = Document::load_mem(&bytes).unwrap();

        let attachments = extract_attachments(&reloaded);
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].name, "Justifai_Original_PDF.pdf");
        assert_eq!(attachments[0].bytes, b"%PDF-1.5 fake body");
    }

    #[test]
    fn test_extract_original_by_name_patterns() {
        let mut doc = minimal_doc();
        attach_file(&mut doc, "LegitDoc_Original_PDF.pdf", b"legacy body", "application#2Fpdf")
            .unwrap();

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        let reloaded = Document::load_mem(&bytes).unwrap();

        assert_eq!(extract_original_pdf(&reloaded).as_deref(), Some(b"legacy body".as_slice()));
    }

    #[test]
    fn test_extract_legacy_lowercase_name() {
        let mut doc = minimal_doc();
        attach_file(&mut doc, "original.pdf", b"very old body", "application#2Fpdf").unwrap();

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        let reloaded = Document::load_mem(&bytes).unwrap();

        assert_eq!(
            extract_original_pdf(&reloaded).as_deref(),
            Some(b"very old body".as_slice())
        );
    }

    #[test]
    fn test_unrelated_attachment_not_taken_as_original() {
        let mut doc = minimal_doc();
        attach_file(&mut doc, "notes.txt", b"unrelated", "text#2Fplain").unwrap();

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        let reloaded = Document::load_mem(&bytes).unwrap();

        assert!(extract_original_pdf(&reloaded).is_none());
    }

    #[test]
    fn test_extract_bundle_by_marker_keys() {
        let mut doc = minimal_doc();
        let bundle = serde_json::json!({
            "documentHash": "ab".repeat(32),
            "merkleLeaf": "cd".repeat(32),
        });
        attach_file(
            &mut doc,
            "Justifai_Verification_Bundle.json",
            bundle.to_string().as_bytes(),
            "application#2Fjson",
        )
        .unwrap();

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        let reloaded = Document::load_mem(&bytes).unwrap();

        let (parsed, raw) = extract_bundle(&reloaded).unwrap();
        assert_eq!(parsed.document_hash.as_deref(), Some("ab".repeat(32).as_str()));
        assert_eq!(raw["merkleLeaf"], bundle["merkleLeaf"]);
    }

    #[test]
    fn test_legacy_metadata_bundle_fallback() {
        let mut doc = minimal_doc();
        let bundle = serde_json::json!({ "fingerprintHash": "ef".repeat(32) });
        let info_id = doc.add_object(dictionary! {
            "Subject" => Object::string_literal(bundle.to_string()),
        });
        doc.trailer.set("Info", info_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        let reloaded = Document::load_mem(&bytes).unwrap();

        let (parsed, _) = extract_bundle(&reloaded).unwrap();
        assert_eq!(parsed.fingerprint_hash.as_deref(), Some("ef".repeat(32).as_str()));
    }

    #[test]
    fn test_no_bundle_returns_none() {
        let doc = minimal_doc();
        assert!(extract_bundle(&doc).is_none());
    }
}
