//! PDF augmentation and verification
//!
//! All object-level PDF surgery is isolated here:
//! - [`augment`] embeds the original PDF and verification bundle, draws the
//!   QR image, and rewrites metadata
//! - [`extract`] recovers attachments through every discovery path a reader
//!   might have left intact
//! - [`text`] extracts the text layer and runs the tamper heuristics
//! - [`verify`] is the ten-step verification pipeline

pub mod augment;
pub mod extract;
pub mod text;
pub mod verify;

use lopdf::{Dictionary, Document, Object, ObjectId};

/// Canonical attachment name for the embedded original document
pub const ORIGINAL_PDF_NAME: &str = "Justifai_Original_PDF.pdf";
/// Canonical attachment name for the verification bundle
pub const BUNDLE_NAME: &str = "Justifai_Verification_Bundle.json";
/// Marker annotation name identifying the QR overlay
pub const QR_MARKER_NAME: &str = "JustifaiQR";

/// Follow references until a non-reference object (or a broken chain).
pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    let mut current = object;
    let mut hops = 0;
    while let Object::Reference(id) = current {
        match doc.get_object(*id) {
            Ok(next) => current = next,
            Err(_) => break,
        }
        hops += 1;
        if hops > 16 {
            break;
        }
    }
    current
}

/// Resolve a dictionary entry to a dictionary, following references.
pub(crate) fn resolve_dict<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, object) {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

/// Decode a PDF string object, handling the UTF-16BE (`FEFF`) form names
/// are often written in.
pub(crate) fn decode_pdf_string(object: &Object) -> Option<String> {
    let bytes = match object {
        Object::String(bytes, _) => bytes,
        _ => return None,
    };
    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16(&units).ok();
    }
    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// Page media height in points, walking the inheritance chain; the Letter
/// height when nothing is declared.
pub(crate) fn page_media_height(doc: &Document, page_id: ObjectId) -> f64 {
    let mut current = Some(page_id);
    let mut hops = 0;
    while let Some(id) = current {
        let dict = match doc.get_object(id).ok().and_then(|o| o.as_dict().ok()) {
            Some(dict) => dict,
            None => break,
        };
        if let Ok(media_box) = dict.get(b"MediaBox") {
            if let Object::Array(values) = resolve(doc, media_box) {
                if values.len() == 4 {
                    let y0 = number(&values[1]).unwrap_or(0.0);
                    let y1 = number(&values[3]).unwrap_or(792.0);
                    return y1 - y0;
                }
            }
        }
        current = dict
            .get(b"Parent")
            .ok()
            .and_then(|p| p.as_reference().ok());
        hops += 1;
        if hops > 32 {
            break;
        }
    }
    792.0
}

pub(crate) fn number(object: &Object) -> Option<f64> {
    match object {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(*r as f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::StringFormat;

    #[test]
    fn test_decode_literal_string() {
        let object = Object::String(b"plain name.pdf".to_vec(), StringFormat::Literal);
        assert_eq!(decode_pdf_string(&object).as_deref(), Some("plain name.pdf"));
    }

    #[test]
    fn test_decode_utf16be_string() {
        // BOM + "Ab"
        let object = Object::String(
            vec![0xFE, 0xFF, 0x00, 0x41, 0x00, 0x62],
            StringFormat::Hexadecimal,
        );
        assert_eq!(decode_pdf_string(&object).as_deref(), Some("Ab"));
    }

    #[test]
    fn test_decode_rejects_non_string() {
        assert_eq!(decode_pdf_string(&Object::Integer(4)), None);
    }
}
