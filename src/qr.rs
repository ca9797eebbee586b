//! QR code rasterization
//!
//! Renders payload content to PNG with an adaptive error-correction ladder:
//! levels are tried in order {M, L, Q, H} and lowered only when the encoder
//! reports the data does not fit. When no level fits, callers fall back to
//! progressively smaller payloads (portal URL, then minimal JSON).

use std::io::Cursor;

use image::{ImageOutputFormat, Rgba, RgbaImage};
use qrcode::types::QrError;
use qrcode::{Color, EcLevel, QrCode};

use crate::error::{IssuerError, Result};

/// Visual style of the rendered code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QrStyle {
    /// Dark modules on an opaque light background
    Classic,
    /// Light modules on a near-black background
    Dark,
    /// Dark modules on a fully transparent background
    Transparent,
}

impl QrStyle {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "classic" => Some(Self::Classic),
            "dark" => Some(Self::Dark),
            "transparent" => Some(Self::Transparent),
            _ => None,
        }
    }
}

/// Rendering options
#[derive(Debug, Clone)]
pub struct QrRenderOptions {
    /// Target output width/height in pixels
    pub width: u32,
    /// Quiet-zone margin, in modules
    pub margin: u32,
    pub dark: Rgba<u8>,
    pub light: Rgba<u8>,
    pub style: QrStyle,
}

impl Default for QrRenderOptions {
    fn default() -> Self {
        Self {
            width: 768,
            margin: 8,
            dark: Rgba([0, 0, 0, 255]),
            light: Rgba([255, 255, 255, 255]),
            style: QrStyle::Classic,
        }
    }
}

impl QrRenderOptions {
    /// Options for the standalone QR artifact (`QR_PNG_WIDTH`, default 768).
    pub fn artifact_from_env() -> Self {
        Self::from_env_with_width("QR_PNG_WIDTH", 768)
    }

    /// Options for the image drawn into PDFs (`QR_PDF_PNG_WIDTH`,
    /// default 1536).
    pub fn pdf_from_env() -> Self {
        Self::from_env_with_width("QR_PDF_PNG_WIDTH", 1536)
    }

    fn from_env_with_width(width_var: &str, default_width: u32) -> Self {
        let mut opts = Self {
            width: env_parse(width_var).unwrap_or(default_width),
            margin: env_parse("QR_MARGIN").unwrap_or(8),
            ..Self::default()
        };
        if let Some(style) = std::env::var("QR_STYLE").ok().and_then(|s| QrStyle::parse(&s)) {
            opts.style = style;
        }
        if let Some(color) = std::env::var("QR_DARK_COLOR").ok().and_then(|s| parse_color(&s)) {
            opts.dark = color;
        }
        if let Some(color) = std::env::var("QR_LIGHT_COLOR").ok().and_then(|s| parse_color(&s)) {
            opts.light = color;
        }
        opts
    }

    fn palette(&self) -> (Rgba<u8>, Rgba<u8>) {
        match self.style {
            QrStyle::Classic => (self.dark, self.light),
            QrStyle::Dark => (Rgba([245, 245, 245, 255]), Rgba([16, 16, 16, 255])),
            QrStyle::Transparent => (self.dark, Rgba([0, 0, 0, 0])),
        }
    }
}

fn env_parse(name: &str) -> Option<u32> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

/// Parse `#RRGGBB` or `#RRGGBBAA`
fn parse_color(input: &str) -> Option<Rgba<u8>> {
    let hex = input.trim().strip_prefix('#').unwrap_or(input.trim());
    let bytes = hex::decode(hex).ok()?;
    match bytes.len() {
        3 => Some(Rgba([bytes[0], bytes[1], bytes[2], 255])),
        4 => Some(Rgba([bytes[0], bytes[1], bytes[2], bytes[3]])),
        _ => None,
    }
}

/// Error-correction ladder; lowered only on data-too-big
const ECL_LADDER: [EcLevel; 4] = [EcLevel::M, EcLevel::L, EcLevel::Q, EcLevel::H];

/// Encode content at the strongest level that fits.
fn encode_with_ladder(content: &str) -> Result<QrCode> {
    let mut last_overflow = None;
    for level in ECL_LADDER {
        match QrCode::with_error_correction_level(content.as_bytes(), level) {
            Ok(code) => return Ok(code),
            Err(QrError::DataTooLong) => {
                last_overflow = Some(level);
                continue;
            }
            Err(e) => return Err(IssuerError::Validation(format!("qr encode failed: {e}"))),
        }
    }
    Err(IssuerError::Validation(format!(
        "qr payload of {} bytes does not fit at any error-correction level (last tried {last_overflow:?})",
        content.len()
    )))
}

/// Render content to a PNG at the configured width.
pub fn render_png(content: &str, opts: &QrRenderOptions) -> Result<Vec<u8>> {
    let code = encode_with_ladder(content)?;
    rasterize(&code, opts)
}

/// Render the first content in `primary` + `fallbacks` that fits a QR code.
/// Returns the PNG and the index of the content used (0 = primary).
pub fn render_with_fallbacks(
    primary: &str,
    fallbacks: &[String],
    opts: &QrRenderOptions,
) -> Result<(Vec<u8>, usize)> {
    match render_png(primary, opts) {
        Ok(png) => return Ok((png, 0)),
        Err(IssuerError::Validation(_)) => {}
        Err(e) => return Err(e),
    }
    for (i, fallback) in fallbacks.iter().enumerate() {
        if let Ok(png) = render_png(fallback, opts) {
            return Ok((png, i + 1));
        }
    }
    Err(IssuerError::Validation(
        "no QR payload variant fits a QR code".to_string(),
    ))
}

fn rasterize(code: &QrCode, opts: &QrRenderOptions) -> Result<Vec<u8>> {
    let modules = code.width() as u32;
    let total_modules = modules + 2 * opts.margin;
    let scale = (opts.width / total_modules).max(1);
    let size = total_modules * scale;

    let (dark, light) = opts.palette();
    let colors = code.to_colors();

    let mut img = RgbaImage::from_pixel(size, size, light);
    for (i, color) in colors.iter().enumerate() {
        if *color != Color::Dark {
            continue;
        }
        let mx = (i as u32 % modules + opts.margin) * scale;
        let my = (i as u32 / modules + opts.margin) * scale;
        for dy in 0..scale {
            for dx in 0..scale {
                img.put_pixel(mx + dx, my + dy, dark);
            }
        }
    }

    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageOutputFormat::Png)
        .map_err(|e| IssuerError::Validation(format!("png encode failed: {e}")))?;
    Ok(out.into_inner())
}
