// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Overlay renderer — turns an SVG template into an RGBA raster that the PDF
// store can embed as a page stamp.
//
// Stamps are authored as small SVG documents (rotated watermark text, the
// security band with its lock icon) and rasterised with resvg. Text placed
// into a template MUST go through [`escape_markup`] first; a raw `&`, `<`,
// or `>` in purchaser-supplied input would otherwise break the XML parse.

use filigrana_core::error::{FiligranaError, Result};
use image::RgbaImage;
use resvg::{tiny_skia, usvg};
use tracing::debug;

/// Escape the XML-significant characters of purchaser-supplied text so it
/// can be interpolated into an SVG template.
pub fn escape_markup(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Renders SVG templates to RGBA images.
///
/// Holds a font database loaded once at startup; rendering itself is cheap
/// enough to run per page.
pub struct OverlayRenderer {
    options: usvg::Options<'static>,
}

impl OverlayRenderer {
    /// Create a renderer with the system font collection loaded.
    pub fn new() -> Self {
        let mut options = usvg::Options::default();
        options.fontdb_mut().load_system_fonts();
        debug!(fonts = options.fontdb.len(), "overlay renderer ready");
        Self { options }
    }

    /// Rasterise an SVG document at its declared size.
    ///
    /// The returned image has straight (non-premultiplied) alpha, matching
    /// what the PDF store expects when it splits colour and soft-mask
    /// channels.
    pub fn render(&self, svg: &str) -> Result<RgbaImage> {
        let tree = usvg::Tree::from_str(svg, &self.options)
            .map_err(|e| FiligranaError::RenderError(format!("SVG parse failed: {e}")))?;

        let size = tree.size().to_int_size();
        let (width, height) = (size.width(), size.height());
        let mut pixmap = tiny_skia::Pixmap::new(width, height).ok_or_else(|| {
            FiligranaError::RenderError(format!("invalid raster size {width}x{height}"))
        })?;

        resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

        let mut output = RgbaImage::new(width, height);
        for (pixel, out) in pixmap.pixels().iter().zip(output.pixels_mut()) {
            let c = pixel.demultiply();
            *out = image::Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
        }

        Ok(output)
    }
}

impl Default for OverlayRenderer {
    fn default() -> Self {
        Self::new()
    }
}
