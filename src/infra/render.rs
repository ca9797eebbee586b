//! HTML-to-PDF renderer seam
//!
//! Rendering engines are external collaborators; the scheduler only sees
//! this trait. [`BasicPdfRenderer`] is the built-in implementation used for
//! local development and the test suite: it strips markup and emits a
//! minimal single-page text PDF. Deployments inject a browser-backed
//! renderer through the same trait.

use async_trait::async_trait;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use serde_json::Value;

use crate::error::{IssuerError, Result};

#[async_trait]
pub trait CertificateRenderer: Send + Sync {
    /// Render final HTML (parameters already substituted) to PDF bytes.
    async fn render(&self, html: &str) -> Result<Vec<u8>>;

    fn name(&self) -> &'static str;
}

/// Substitute `{{param}}` placeholders from the job's data map.
///
/// Missing parameters render as empty strings, matching how template
/// engines treat absent bindings.
pub fn substitute_params(template: &str, data: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                if let Some(value) = data.get(key) {
                    match value {
                        Value::String(s) => out.push_str(s),
                        other => out.push_str(&other.to_string()),
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Minimal deterministic PDF renderer: one Letter page, Helvetica, one line
/// of text per block element.
pub struct BasicPdfRenderer;

impl BasicPdfRenderer {
    const PAGE_WIDTH: f32 = 612.0;
    const PAGE_HEIGHT: f32 = 792.0;
    const MARGIN: f32 = 72.0;
    const LEADING: f32 = 18.0;

    fn build_pdf(lines: &[String]) -> Result<Vec<u8>> {
        let mut doc = Document::with_version("1.5");

        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let mut operations = vec![Operation::new("BT", vec![])];
        operations.push(Operation::new(
            "Tf",
            vec![Object::Name(b"F1".to_vec()), 12.into()],
        ));
        operations.push(Operation::new(
            "Td",
            vec![
                Object::Real(Self::MARGIN),
                Object::Real(Self::PAGE_HEIGHT - Self::MARGIN),
            ],
        ));
        for line in lines {
            operations.push(Operation::new(
                "Tj",
                vec![Object::string_literal(line.as_str())],
            ));
            operations.push(Operation::new(
                "Td",
                vec![Object::Real(0.0), Object::Real(-Self::LEADING)],
            ));
        }
        operations.push(Operation::new("ET", vec![]));

        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content
                .encode()
                .map_err(|e| IssuerError::Pdf(format!("content encode: {e}")))?,
        ));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                Object::Real(Self::PAGE_WIDTH),
                Object::Real(Self::PAGE_HEIGHT),
            ],
            "Resources" => dictionary! {
                "Font" => dictionary! { "F1" => font_id },
            },
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

        let mut out = Vec::new();
        doc.save_to(&mut out)
            .map_err(|e| IssuerError::Pdf(format!("pdf save: {e}")))?;
        Ok(out)
    }
}

#[async_trait]
impl CertificateRenderer for BasicPdfRenderer {
    async fn render(&self, html: &str) -> Result<Vec<u8>> {
        let lines = strip_markup(html);
        Self::build_pdf(&lines)
    }

    fn name(&self) -> &'static str {
        "basic"
    }
}

/// Reduce HTML to visible text lines; block boundaries become line breaks.
fn strip_markup(html: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut in_tag = false;
    let mut in_style_or_script = false;
    let mut tag = String::new();

    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag
                    .trim_start_matches('/')
                    .split_whitespace()
                    .next()
                    .unwrap_or("")
                    .to_ascii_lowercase();
                match name.as_str() {
                    "style" | "script" => {
                        in_style_or_script = !tag.starts_with('/');
                    }
                    "p" | "div" | "h1" | "h2" | "h3" | "h4" | "br" | "li" | "tr" => {
                        let trimmed = current.trim();
                        if !trimmed.is_empty() {
                            lines.push(trimmed.to_string());
                        }
                        current.clear();
                    }
                    _ => {}
                }
            }
            _ if in_tag => tag.push(c),
            _ if in_style_or_script => {}
            '\n' | '\r' => current.push(' '),
            _ => current.push(c),
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        lines.push(trimmed.to_string());
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_substitution() {
        let html = "<h1>{{name}}</h1><p>score: {{ score }}</p>";
        let data = json!({"name": "Alice", "score": 97});
        assert_eq!(
            substitute_params(html, &data),
            "<h1>Alice</h1><p>score: 97</p>"
        );
    }

    #[test]
    fn test_missing_params_render_empty() {
        assert_eq!(
            substitute_params("<p>{{missing}}</p>", &json!({})),
            "<p></p>"
        );
    }

    #[test]
    fn test_unterminated_placeholder_is_literal() {
        assert_eq!(substitute_params("a {{broken", &json!({})), "a {{broken");
    }

    #[test]
    fn test_strip_markup() {
        let lines = strip_markup("<style>.x{color:red}</style><h1>Title</h1><p>Body text</p>");
        assert_eq!(lines, vec!["Title", "Body text"]);
    }

    #[tokio::test]
    async fn test_rendered_pdf_parses_and_carries_text() {
        let renderer = BasicPdfRenderer;
        let bytes = renderer
            .render("<h1>Certificate of Merit</h1><p>Issued to Alice</p>")
            .await
            .unwrap();

        assert!(bytes.starts_with(b"%PDF"));

        let doc = Document::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);

        let text = doc.extract_text(&[1]).unwrap();
        assert!(text.contains("Certificate of Merit"));
        assert!(text.contains("Issued to Alice"));
    }

    #[tokio::test]
    async fn test_rendering_is_deterministic() {
        let renderer = BasicPdfRenderer;
        let a = renderer.render("<p>same input</p>").await.unwrap();
        let b = renderer.render("<p>same input</p>").await.unwrap();
        assert_eq!(a, b);
    }
}
