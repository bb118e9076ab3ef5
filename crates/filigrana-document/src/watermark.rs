// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Central watermark stage — stamps a large, rotated, semi-transparent
// identity string across the middle of every page.
//
// A partially watermarked document is a compliance risk, not a cosmetic
// defect: if any page fails to render or embed, the whole document is
// rejected.

use std::collections::HashMap;

use filigrana_core::error::Result;
use filigrana_core::types::WatermarkText;
use lopdf::content::Operation;
use lopdf::{Object, ObjectId};
use tracing::{debug, instrument};

use crate::overlay::{escape_markup, OverlayRenderer};
use crate::pdf::PdfStore;

/// Square canvas (px) the stamp is rendered into before page scaling.
const STAMP_CANVAS_PX: u32 = 1200;

/// The stamp is scaled so its width covers this fraction of the page.
const STAMP_WIDTH_RATIO: f32 = 0.8;

/// Constant alpha applied when drawing the stamp.
const STAMP_OPACITY: f32 = 0.5;

/// Stamp font size bounds in points.
const STAMP_FONT_MIN: i32 = 12;
const STAMP_FONT_MAX: i32 = 18;

/// Stamp font size for a page: 2 % of the smaller page dimension, bounded
/// to [12, 18].
fn stamp_font_size(page_width: f32, page_height: f32) -> i32 {
    let scaled = (page_width.min(page_height) * 0.02).floor() as i32;
    scaled.clamp(STAMP_FONT_MIN, STAMP_FONT_MAX)
}

/// The SVG template for the central stamp: text rotated 45° about the
/// canvas centre. `text` must already be markup-escaped.
fn stamp_svg(text: &str, font_size: i32) -> String {
    let center = STAMP_CANVAS_PX / 2;
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="{size}" height="{size}" viewBox="0 0 {size} {size}">
  <style>
    .wm {{ font-family: Helvetica, Arial, sans-serif; font-size: {px}px; fill: #666666; }}
  </style>
  <g transform="translate({c},{c}) rotate(45) translate(-{c},-{c})">
    <text x="{c}" y="{c}" text-anchor="middle" dominant-baseline="middle" class="wm">{text}</text>
  </g>
</svg>"#,
        size = STAMP_CANVAS_PX,
        px = font_size * 3,
        c = center,
    )
}

/// Apply the central watermark to every page of the document.
///
/// Mutates the document in place. Fails as a whole on the first page that
/// cannot be stamped.
#[instrument(skip_all, fields(pages = store.page_count()))]
pub fn apply_central_watermark(
    store: &mut PdfStore,
    renderer: &OverlayRenderer,
    text: &WatermarkText,
) -> Result<()> {
    let escaped = escape_markup(&text.canonical());

    // Pages sharing a font size reuse one embedded raster.
    let mut stamps: HashMap<i32, ObjectId> = HashMap::new();

    for page_id in store.page_ids() {
        let (page_width, page_height) = store.page_size(page_id)?;
        let font_size = stamp_font_size(page_width, page_height);

        let image_id = match stamps.get(&font_size) {
            Some(id) => *id,
            None => {
                let image = renderer.render(&stamp_svg(&escaped, font_size))?;
                let id = store.embed_image(&image, true)?;
                stamps.insert(font_size, id);
                id
            }
        };

        let image_name = store.add_image_resource(page_id, image_id)?;
        let gstate_name = store.add_alpha_gstate(page_id, STAMP_OPACITY)?;

        // Stamp width = 80 % of the page; the canvas is square so the drawn
        // height equals the drawn width.
        let draw_width = page_width * STAMP_WIDTH_RATIO;
        let draw_height = draw_width;
        let x = (page_width - draw_width) / 2.0;
        let y = (page_height - draw_height) / 2.0;

        store.isolate_page_content(page_id)?;
        store.append_page_ops(
            page_id,
            vec![
                Operation::new("q", vec![]),
                Operation::new("gs", vec![Object::Name(gstate_name.into_bytes())]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(draw_width),
                        Object::Real(0.0),
                        Object::Real(0.0),
                        Object::Real(draw_height),
                        Object::Real(x),
                        Object::Real(y),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(image_name.into_bytes())]),
                Operation::new("Q", vec![]),
            ],
        )?;

        debug!(?page_id, font_size, draw_width, "page watermarked");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::store::tests::minimal_pdf;
    use chrono::TimeZone;
    use chrono::Utc;
    use lopdf::Object;

    fn fixed_text() -> WatermarkText {
        WatermarkText::new(
            "Ana Ruiz",
            "ana@example.com",
            Some(Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()),
        )
    }

    /// Count XObject entries registered on a page.
    fn page_xobject_count(store: &PdfStore, page_id: lopdf::ObjectId) -> usize {
        let page = store.document().get_object(page_id).unwrap().as_dict().unwrap();
        let resources = match page.get(b"Resources").unwrap() {
            Object::Dictionary(dict) => dict.clone(),
            Object::Reference(id) => store
                .document()
                .get_object(*id)
                .unwrap()
                .as_dict()
                .unwrap()
                .clone(),
            other => panic!("unexpected resources object: {other:?}"),
        };
        match resources.get(b"XObject") {
            Ok(Object::Dictionary(dict)) => dict.len(),
            _ => 0,
        }
    }

    #[test]
    fn font_size_is_bounded() {
        // Tiny page floors below the minimum.
        assert_eq!(stamp_font_size(100.0, 100.0), 12);
        // A4 portrait: 595 * 0.02 = 11.9 → floor 11 → clamped to 12.
        assert_eq!(stamp_font_size(595.0, 842.0), 12);
        // Mid-size page lands inside the band.
        assert_eq!(stamp_font_size(800.0, 900.0), 16);
        // Large page caps at the maximum.
        assert_eq!(stamp_font_size(2000.0, 2000.0), 18);
    }

    #[test]
    fn stamp_svg_contains_escaped_text_and_rotation() {
        let svg = stamp_svg(&escape_markup("Ruiz & Sons"), 14);
        assert!(svg.contains("Ruiz &amp; Sons"));
        assert!(svg.contains("rotate(45)"));
        assert!(svg.contains("font-size: 42px"));
    }

    #[test]
    fn every_page_gets_a_stamp() {
        let mut store = PdfStore::from_bytes(&minimal_pdf(3)).unwrap();
        let renderer = OverlayRenderer::new();

        apply_central_watermark(&mut store, &renderer, &fixed_text()).unwrap();

        for page_id in store.page_ids() {
            assert_eq!(page_xobject_count(&store, page_id), 1);
        }

        // The result is still a loadable PDF.
        let bytes = store.save_to_bytes().unwrap();
        assert_eq!(PdfStore::from_bytes(&bytes).unwrap().page_count(), 3);
    }

    #[test]
    fn watermarking_is_deterministic_for_fixed_inputs() {
        let source = minimal_pdf(2);
        let renderer = OverlayRenderer::new();
        let text = fixed_text();

        let mut first = PdfStore::from_bytes(&source).unwrap();
        apply_central_watermark(&mut first, &renderer, &text).unwrap();

        let mut second = PdfStore::from_bytes(&source).unwrap();
        apply_central_watermark(&mut second, &renderer, &text).unwrap();

        assert_eq!(
            first.save_to_bytes().unwrap(),
            second.save_to_bytes().unwrap()
        );
    }

    #[test]
    fn pages_share_one_embedded_stamp_raster() {
        let mut store = PdfStore::from_bytes(&minimal_pdf(4)).unwrap();
        let renderer = OverlayRenderer::new();

        apply_central_watermark(&mut store, &renderer, &fixed_text()).unwrap();

        // All four identical pages resolve to the same XObject reference.
        let mut referenced = std::collections::HashSet::new();
        for page_id in store.page_ids() {
            let page = store.document().get_object(page_id).unwrap().as_dict().unwrap();
            let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
            if let Ok(Object::Dictionary(xobjects)) = resources.get(b"XObject") {
                for (_, value) in xobjects.iter() {
                    if let Object::Reference(id) = value {
                        referenced.insert(*id);
                    }
                }
            }
        }
        assert_eq!(referenced.len(), 1);
    }
}
