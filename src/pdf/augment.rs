//! PDF augmentation
//!
//! Turns an original certificate PDF into its self-verifying form:
//! 1. attach the original bytes as `Justifai_Original_PDF.pdf`
//! 2. attach the verification bundle as `Justifai_Verification_Bundle.json`
//! 3. draw the QR image at the template-specified position
//! 4. add a hidden 1x1 marker annotation named `/JustifaiQR`
//! 5. rewrite Producer/Creator to the issuer and reset the dates
//!
//! Attachments are wired through the EmbeddedFiles name tree, the catalog
//! `AF` array, and plain `Filespec` objects so every extractor path in
//! [`super::extract`] finds them.

use std::io::Write;

use chrono::Utc;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};

use crate::domain::QrPlacement;
use crate::error::{IssuerError, Result};

use super::text::format_pdf_date;
use super::{BUNDLE_NAME, ORIGINAL_PDF_NAME, QR_MARKER_NAME};

/// CSS pixels (96/in) to PDF points (72/in)
const PX_TO_PT: f64 = 72.0 / 96.0;

/// Placement converted to PDF points with the origin already flipped
#[derive(Debug, Clone, Copy)]
pub struct PlacementPt {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub page: u32,
}

impl PlacementPt {
    /// Convert a CSS-pixel placement to points on a page of the given
    /// height, flipping from top-left to bottom-left origin.
    pub fn from_css(placement: &QrPlacement, page_height_pt: f64) -> Self {
        let width = placement.width * PX_TO_PT;
        let height = placement.height * PX_TO_PT;
        Self {
            x: placement.x * PX_TO_PT,
            y: page_height_pt - placement.y * PX_TO_PT - height,
            width,
            height,
            page: placement.page,
        }
    }
}

/// Inputs for one augmentation
pub struct AugmentRequest<'a> {
    pub original_pdf: &'a [u8],
    pub bundle_json: &'a [u8],
    pub qr_png: &'a [u8],
    pub placement: QrPlacement,
    pub issuer_name: &'a str,
}

/// Produce the augmented PDF.
pub fn augment_pdf(request: &AugmentRequest<'_>) -> Result<Vec<u8>> {
    let mut doc = Document::load_mem(request.original_pdf)
        .map_err(|e| IssuerError::Pdf(format!("original pdf parse: {e}")))?;

    attach_file(
        &mut doc,
        ORIGINAL_PDF_NAME,
        request.original_pdf,
        "application#2Fpdf",
    )?;
    attach_file(&mut doc, BUNDLE_NAME, request.bundle_json, "application#2Fjson")?;

    let page_id = select_page(&doc, request.placement.page)?;
    let placement = PlacementPt::from_css(
        &request.placement,
        super::page_media_height(&doc, page_id),
    );
    draw_qr_image(&mut doc, page_id, request.qr_png, &placement)?;
    add_marker_annotation(&mut doc, page_id)?;
    rewrite_metadata(&mut doc, request.issuer_name);

    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| IssuerError::Pdf(format!("augmented pdf save: {e}")))?;
    Ok(out)
}

fn select_page(doc: &Document, page_index: u32) -> Result<ObjectId> {
    let pages = doc.get_pages();
    if pages.is_empty() {
        return Err(IssuerError::Pdf("document has no pages".to_string()));
    }
    // Page numbers are 1-based; clamp past-the-end indices to the last page.
    let wanted = page_index + 1;
    pages
        .get(&wanted)
        .copied()
        .or_else(|| pages.values().last().copied())
        .ok_or_else(|| IssuerError::Pdf("page lookup failed".to_string()))
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

/// Attach bytes as a named embedded file; returns the Filespec object id.
pub(crate) fn attach_file(
    doc: &mut Document,
    name: &str,
    bytes: &[u8],
    subtype: &str,
) -> Result<ObjectId> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    let compressed = encoder
        .write_all(bytes)
        .and_then(|_| encoder.finish())
        .map_err(|e| IssuerError::Pdf(format!("attachment compression: {e}")))?;

    let stream_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "EmbeddedFile",
            "Subtype" => Object::Name(subtype.as_bytes().to_vec()),
            "Filter" => "FlateDecode",
            "Params" => dictionary! { "Size" => bytes.len() as i64 },
        },
        compressed,
    ));

    let filespec_id = doc.add_object(dictionary! {
        "Type" => "Filespec",
        "F" => Object::string_literal(name),
        "UF" => Object::string_literal(name),
        "EF" => dictionary! { "F" => stream_id },
    });

    register_embedded_file(doc, name, filespec_id)?;
    append_to_af(doc, filespec_id)?;
    Ok(filespec_id)
}

fn catalog_id(doc: &Document) -> Result<ObjectId> {
    doc.trailer
        .get(b"Root")
        .and_then(|root| root.as_reference())
        .map_err(|e| IssuerError::Pdf(format!("catalog missing: {e}")))
}

/// Insert into the catalog's EmbeddedFiles name tree, keeping entries
/// sorted by key as the name-tree contract requires.
fn register_embedded_file(doc: &mut Document, name: &str, filespec_id: ObjectId) -> Result<()> {
    let root_id = catalog_id(doc)?;

    // Collect existing entries (inline or referenced) before mutating.
    let mut entries: Vec<(String, Object)> = Vec::new();
    {
        let catalog = doc
            .get_object(root_id)
            .ok()
            .and_then(|o| o.as_dict().ok());
        if let Some(catalog) = catalog {
            if let Some(names) = catalog.get(b"Names").ok().and_then(|n| super::resolve_dict(doc, n))
            {
                if let Some(embedded) = names
                    .get(b"EmbeddedFiles")
                    .ok()
                    .and_then(|e| super::resolve_dict(doc, e))
                {
                    if let Ok(Object::Array(existing)) =
                        embedded.get(b"Names").map(|n| super::resolve(doc, n))
                    {
                        for pair in existing.chunks(2) {
                            if pair.len() == 2 {
                                if let Some(key) = super::decode_pdf_string(&pair[0]) {
                                    entries.push((key, pair[1].clone()));
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    entries.retain(|(key, _)| key != name);
    entries.push((name.to_string(), Object::Reference(filespec_id)));
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut flat: Vec<Object> = Vec::with_capacity(entries.len() * 2);
    for (key, value) in entries {
        flat.push(Object::string_literal(key));
        flat.push(value);
    }

    let embedded_files = dictionary! { "Names" => flat };

    let catalog = doc
        .get_object_mut(root_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|e| IssuerError::Pdf(format!("catalog not a dictionary: {e}")))?;

    // Rebuild the Names dictionary inline; preserving other name trees.
    let mut names_dict = match catalog.get(b"Names") {
        Ok(Object::Dictionary(existing)) => existing.clone(),
        _ => Dictionary::new(),
    };
    names_dict.set("EmbeddedFiles", Object::Dictionary(embedded_files));
    catalog.set("Names", Object::Dictionary(names_dict));

    Ok(())
}

fn append_to_af(doc: &mut Document, filespec_id: ObjectId) -> Result<()> {
    let root_id = catalog_id(doc)?;
    let catalog = doc
        .get_object_mut(root_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|e| IssuerError::Pdf(format!("catalog not a dictionary: {e}")))?;

    let mut af = match catalog.get(b"AF") {
        Ok(Object::Array(existing)) => existing.clone(),
        _ => Vec::new(),
    };
    af.push(Object::Reference(filespec_id));
    catalog.set("AF", Object::Array(af));
    Ok(())
}

// ---------------------------------------------------------------------------
// QR image
// ---------------------------------------------------------------------------

fn draw_qr_image(
    doc: &mut Document,
    page_id: ObjectId,
    qr_png: &[u8],
    placement: &PlacementPt,
) -> Result<()> {
    let decoded = image::load_from_memory(qr_png)
        .map_err(|e| IssuerError::Pdf(format!("qr png decode: {e}")))?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();

    // Composite onto white; PDF image XObjects carry no alpha here.
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        let alpha = a as u32;
        rgb.push(((r as u32 * alpha + 255 * (255 - alpha)) / 255) as u8);
        rgb.push(((g as u32 * alpha + 255 * (255 - alpha)) / 255) as u8);
        rgb.push(((b as u32 * alpha + 255 * (255 - alpha)) / 255) as u8);
    }

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    let compressed = encoder
        .write_all(&rgb)
        .and_then(|_| encoder.finish())
        .map_err(|e| IssuerError::Pdf(format!("qr image compression: {e}")))?;

    let image_id = doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "FlateDecode",
        },
        compressed,
    ));

    add_page_xobject(doc, page_id, b"JfaiQR", image_id)?;

    let operations = vec![
        Operation::new("q", vec![]),
        Operation::new(
            "cm",
            vec![
                Object::Real(placement.width as f32),
                0.into(),
                0.into(),
                Object::Real(placement.height as f32),
                Object::Real(placement.x as f32),
                Object::Real(placement.y as f32),
            ],
        ),
        Operation::new("Do", vec![Object::Name(b"JfaiQR".to_vec())]),
        Operation::new("Q", vec![]),
    ];
    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content
            .encode()
            .map_err(|e| IssuerError::Pdf(format!("qr content encode: {e}")))?,
    ));

    append_page_content(doc, page_id, content_id)
}

fn add_page_xobject(
    doc: &mut Document,
    page_id: ObjectId,
    name: &[u8],
    xobject_id: ObjectId,
) -> Result<()> {
    // Snapshot the resources location before mutating.
    enum Target {
        Referenced(ObjectId),
        Inline(Dictionary),
    }

    let target = {
        let page = doc
            .get_object(page_id)
            .and_then(|o| o.as_dict())
            .map_err(|e| IssuerError::Pdf(format!("page not a dictionary: {e}")))?;
        match page.get(b"Resources") {
            Ok(Object::Reference(id)) => Target::Referenced(*id),
            Ok(Object::Dictionary(dict)) => Target::Inline(dict.clone()),
            _ => Target::Inline(Dictionary::new()),
        }
    };

    match target {
        Target::Referenced(resources_id) => {
            let resources = doc
                .get_object_mut(resources_id)
                .and_then(|o| o.as_dict_mut())
                .map_err(|e| IssuerError::Pdf(format!("resources not a dictionary: {e}")))?;
            insert_xobject(resources, name, xobject_id);
        }
        Target::Inline(mut resources) => {
            insert_xobject(&mut resources, name, xobject_id);
            let page = doc
                .get_object_mut(page_id)
                .and_then(|o| o.as_dict_mut())
                .map_err(|e| IssuerError::Pdf(format!("page not a dictionary: {e}")))?;
            page.set("Resources", Object::Dictionary(resources));
        }
    }
    Ok(())
}

fn insert_xobject(resources: &mut Dictionary, name: &[u8], xobject_id: ObjectId) {
    let mut xobjects = match resources.get(b"XObject") {
        Ok(Object::Dictionary(existing)) => existing.clone(),
        _ => Dictionary::new(),
    };
    xobjects.set(name, Object::Reference(xobject_id));
    resources.set("XObject", Object::Dictionary(xobjects));
}

fn append_page_content(doc: &mut Document, page_id: ObjectId, content_id: ObjectId) -> Result<()> {
    let existing = {
        let page = doc
            .get_object(page_id)
            .and_then(|o| o.as_dict())
            .map_err(|e| IssuerError::Pdf(format!("page not a dictionary: {e}")))?;
        page.get(b"Contents").ok().cloned()
    };

    let mut contents: Vec<Object> = match existing {
        Some(Object::Array(items)) => items,
        Some(single @ Object::Reference(_)) => vec![single],
        Some(other) => vec![other],
        None => Vec::new(),
    };
    contents.push(Object::Reference(content_id));

    let page = doc
        .get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|e| IssuerError::Pdf(format!("page not a dictionary: {e}")))?;
    page.set("Contents", Object::Array(contents));
    Ok(())
}

// ---------------------------------------------------------------------------
// Marker annotation and metadata
// ---------------------------------------------------------------------------

fn add_marker_annotation(doc: &mut Document, page_id: ObjectId) -> Result<()> {
    let annotation_id = doc.add_object(dictionary! {
        "Type" => "Annot",
        "Subtype" => "Square",
        "Rect" => vec![0.into(), 0.into(), 1.into(), 1.into()],
        "Name" => Object::Name(QR_MARKER_NAME.as_bytes().to_vec()),
        // Hidden flag
        "F" => 2,
    });

    let existing = {
        let page = doc
            .get_object(page_id)
            .and_then(|o| o.as_dict())
            .map_err(|e| IssuerError::Pdf(format!("page not a dictionary: {e}")))?;
        page.get(b"Annots").ok().cloned()
    };

    let mut annots: Vec<Object> = match existing {
        Some(Object::Array(items)) => items,
        Some(Object::Reference(id)) => match doc.get_object(id) {
            Ok(Object::Array(items)) => items.clone(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    annots.push(Object::Reference(annotation_id));

    let page = doc
        .get_object_mut(page_id)
        .and_then(|o| o.as_dict_mut())
        .map_err(|e| IssuerError::Pdf(format!("page not a dictionary: {e}")))?;
    page.set("Annots", Object::Array(annots));
    Ok(())
}

fn rewrite_metadata(doc: &mut Document, issuer_name: &str) {
    let now = format_pdf_date(Utc::now());

    let mut info = match doc.trailer.get(b"Info") {
        Ok(Object::Reference(id)) => doc
            .get_object(*id)
            .ok()
            .and_then(|o| o.as_dict().ok())
            .cloned()
            .unwrap_or_default(),
        Ok(Object::Dictionary(dict)) => dict.clone(),
        _ => Dictionary::new(),
    };

    info.set("Producer", Object::string_literal(issuer_name));
    info.set("Creator", Object::string_literal(issuer_name));
    info.set("CreationDate", Object::string_literal(now.clone()));
    info.set("ModDate", Object::string_literal(now));

    let info_id = doc.add_object(Object::Dictionary(info));
    doc.trailer.set("Info", info_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::text;

    async fn rendered_original() -> Vec<u8> {
        use crate::infra::CertificateRenderer;
        crate::infra::BasicPdfRenderer
            .render("<h1>Certificate</h1><p>Issued to Alice</p>")
            .await
            .unwrap()
    }

    fn request<'a>(original: &'a [u8], bundle: &'a [u8], qr: &'a [u8]) -> AugmentRequest<'a> {
        AugmentRequest {
            original_pdf: original,
            bundle_json: bundle,
            qr_png: qr,
            placement: QrPlacement::default(),
            issuer_name: "Justifai",
        }
    }

    fn qr_png() -> Vec<u8> {
        crate::qr::render_png("https://verify.example/?jobId=1", &crate::qr::QrRenderOptions::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_augment_produces_verifiable_structure() {
        let original = rendered_original().await;
        let bundle = serde_json::json!({"documentHash": "ab".repeat(32)}).to_string();
        let qr = qr_png();

        let augmented = augment_pdf(&request(&original, bundle.as_bytes(), &qr)).unwrap();
        let doc = Document::load_mem(&augmented).unwrap();

        // Both attachments recoverable byte-exact.
        let recovered = crate::pdf::extract::extract_original_pdf(&doc).unwrap();
        assert_eq!(recovered, original);
        let (parsed, _) = crate::pdf::extract::extract_bundle(&doc).unwrap();
        assert_eq!(parsed.document_hash.as_deref(), Some("ab".repeat(32).as_str()));

        // Exactly one extra annotation (the hidden marker) and one image.
        assert_eq!(text::count_annotations(&doc), 1);
        assert_eq!(text::count_images(&doc), 1);

        // The text layer is untouched.
        let original_doc = Document::load_mem(&original).unwrap();
        assert_eq!(text::normalized_text(&doc), text::normalized_text(&original_doc));

        // Metadata rewritten.
        assert_eq!(text::info_string(&doc, b"Producer").as_deref(), Some("Justifai"));
        assert!(text::info_string(&doc, b"CreationDate").is_some());

        // Full rewrite: a single startxref marker.
        assert_eq!(text::count_startxref(&augmented), 1);
    }

    #[tokio::test]
    async fn test_marker_annotation_name() {
        let original = rendered_original().await;
        let bundle = b"{}".to_vec();
        let qr = qr_png();
        let augmented = augment_pdf(&request(&original, &bundle, &qr)).unwrap();
        let doc = Document::load_mem(&augmented).unwrap();

        let mut found = false;
        for (_, object) in &doc.objects {
            if let Object::Dictionary(dict) = object {
                if matches!(dict.get(b"Name"), Ok(Object::Name(n)) if n == QR_MARKER_NAME.as_bytes())
                {
                    assert!(
                        matches!(dict.get(b"Subtype"), Ok(Object::Name(s)) if s == b"Square")
                    );
                    found = true;
                }
            }
        }
        assert!(found, "marker annotation not written");
    }

    #[test]
    fn test_placement_px_to_pt_conversion() {
        let css = QrPlacement {
            x: 96.0,
            y: 96.0,
            width: 192.0,
            height: 192.0,
            page: 0,
        };
        let pt = PlacementPt::from_css(&css, 792.0);
        assert_eq!(pt.x, 72.0);
        assert_eq!(pt.width, 144.0);
        assert_eq!(pt.height, 144.0);
        // Top-left 96px maps to bottom-left: 792 - 72 - 144.
        assert_eq!(pt.y, 792.0 - 72.0 - 144.0);
    }

    #[tokio::test]
    async fn test_augment_rejects_non_pdf() {
        let qr = qr_png();
        let err = augment_pdf(&request(b"not a pdf", b"{}", &qr));
        assert!(matches!(err, Err(IssuerError::Pdf(_))));
    }
}
