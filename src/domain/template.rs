//! Certificate templates and QR placement

use serde::{Deserialize, Serialize};

use crate::crypto::hash::{keccak256, to_hex};

use super::types::{TemplateId, TenantId};

/// Where the QR image lands on the rendered page, in CSS pixels (96/in)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QrPlacement {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    /// Zero-based page index
    pub page: u32,
}

impl Default for QrPlacement {
    fn default() -> Self {
        Self {
            x: 40.0,
            y: 40.0,
            width: 120.0,
            height: 120.0,
            page: 0,
        }
    }
}

/// HTML certificate template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Raw HTML handed to the renderer after parameter substitution
    pub content: String,
    /// Declared parameter names; an empty list means "accept everything"
    pub parameters: Vec<String>,
    pub qr_placement: Option<QrPlacement>,
}

impl Template {
    pub fn new(tenant_id: TenantId, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: TemplateId::new(),
            tenant_id,
            name: name.into(),
            content: content.into(),
            parameters: Vec::new(),
            qr_placement: None,
        }
    }

    /// `keccak256(utf8(content))` as stored hex
    pub fn content_hash(&self) -> String {
        to_hex(&keccak256(self.content.as_bytes()))
    }

    /// Effective placement: explicit hints, then the `.qr-placeholder` CSS
    /// block in the HTML, then the default corner position.
    pub fn effective_placement(&self) -> QrPlacement {
        self.qr_placement
            .or_else(|| placement_from_html(&self.content))
            .unwrap_or_default()
    }
}

/// Parse a `.qr-placeholder { left: ..px; top: ..px; ... }` CSS block.
///
/// This is the fallback for templates authored before explicit placement
/// hints existed; only the pixel form is recognized.
pub fn placement_from_html(html: &str) -> Option<QrPlacement> {
    let class_pos = html.find(".qr-placeholder")?;
    let rest = &html[class_pos..];
    let open = rest.find('{')?;
    let close = rest[open..].find('}')? + open;
    let block = &rest[open + 1..close];

    let mut placement = QrPlacement::default();
    let mut found = false;

    for declaration in block.split(';') {
        let mut parts = declaration.splitn(2, ':');
        let property = parts.next()?.trim().to_ascii_lowercase();
        let value = match parts.next() {
            Some(v) => v.trim(),
            None => continue,
        };
        let px = match parse_px(value) {
            Some(px) => px,
            None => continue,
        };
        match property.as_str() {
            "left" => {
                placement.x = px;
                found = true;
            }
            "top" => {
                placement.y = px;
                found = true;
            }
            "width" => {
                placement.width = px;
                found = true;
            }
            "height" => {
                placement.height = px;
                found = true;
            }
            _ => {}
        }
    }

    found.then_some(placement)
}

fn parse_px(value: &str) -> Option<f64> {
    value.trim().strip_suffix("px")?.trim().parse::<f64>().ok()
}
