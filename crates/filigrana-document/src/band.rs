// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Security band stage — draws an opaque header strip on every page carrying
// the content hash, the purchaser identity, and the legal notices, and
// writes the matching document metadata.
//
// The hash passed in must be the digest of this document's own watermarked
// bytes; the caller computes it between the watermark and band stages.

use std::collections::HashMap;

use chrono::Utc;
use filigrana_core::error::Result;
use filigrana_core::types::WatermarkText;
use lopdf::content::Operation;
use lopdf::{Object, ObjectId};
use tracing::{debug, instrument};

use crate::overlay::{escape_markup, OverlayRenderer};
use crate::pdf::{DocumentInfo, PdfStore};

/// Band height in points, constant across all pages and documents.
const BAND_HEIGHT_PT: f32 = 36.0;

/// Fixed legal/traceability notice (band line 1).
const BAND_NOTICE: &str =
    "Documento encriptado y firmado electrónicamente. Datos guardados y trazados.";

/// Fixed anti-redistribution warning (band line 3).
const BAND_WARNING: &str =
    "La venta, distribución y/o comercialización de este contenido está prohibida y será denunciada.";

/// Document title written into /Info.
const INFO_TITLE: &str = "Analíticas Esenciales";

/// Document author written into /Info.
const INFO_AUTHOR: &str = "INTERGALACTIC SL";

/// Producer string written into /Info.
const INFO_PRODUCER: &str = "Sistema de Watermarking v1.0";

/// The band SVG: dark full-width strip with a lock glyph and three text
/// lines. `identity_line` must already be markup-escaped; the fixed lines
/// contain no markup-significant characters.
fn band_svg(width_px: u32, identity_line: &str) -> String {
    let height = BAND_HEIGHT_PT as u32;
    let icon_y = height / 2 - 10;
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width_px}" height="{height}">
  <style>
    .bg {{ fill: rgb(51, 51, 51); }}
    .l1 {{ font-family: Helvetica, Arial, sans-serif; font-size: 9px; font-weight: bold; fill: white; }}
    .l2 {{ font-family: Helvetica, Arial, sans-serif; font-size: 6px; fill: rgb(153, 204, 255); }}
    .l3 {{ font-family: Helvetica, Arial, sans-serif; font-size: 6px; font-style: italic; fill: white; }}
  </style>
  <rect width="100%" height="100%" class="bg" />
  <svg x="10" y="{icon_y}" width="20" height="20" viewBox="0 0 24 24" fill="none" stroke="white" stroke-width="2" stroke-linecap="round" stroke-linejoin="round">
    <rect x="3" y="11" width="18" height="11" rx="2" ry="2"></rect>
    <path d="M7 11V7a5 5 0 0 1 10 0v4"></path>
  </svg>
  <text x="40" y="12" class="l1">{notice}</text>
  <text x="40" y="22" class="l2">{identity_line}</text>
  <text x="40" y="30" class="l3">{warning}</text>
</svg>"#,
        notice = BAND_NOTICE,
        warning = BAND_WARNING,
    )
}

/// Add the security band and document metadata.
///
/// Mutates the document in place. The band is anchored to the top edge of
/// every page, stretched to full page width, always exactly
/// [`BAND_HEIGHT_PT`] tall, and displays the same `document_hash` on every
/// page.
#[instrument(skip_all, fields(pages = store.page_count(), hash = document_hash))]
pub fn add_security_features(
    store: &mut PdfStore,
    renderer: &OverlayRenderer,
    text: &WatermarkText,
    document_hash: &str,
) -> Result<()> {
    store.set_metadata(&DocumentInfo {
        title: INFO_TITLE.into(),
        author: INFO_AUTHOR.into(),
        subject: format!("Documento personal para {} ({})", text.full_name, text.email),
        keywords: vec![
            "analiticas".into(),
            "esenciales".into(),
            "privado".into(),
            text.full_name.clone(),
            text.email.clone(),
        ],
        producer: INFO_PRODUCER.into(),
        creation_date: text.timestamp,
        modification_date: Utc::now(),
    })?;

    let identity_line = escape_markup(&format!(
        "{} | {} | {}",
        text.full_name, text.email, document_hash
    ));

    // Pages with the same width reuse one rendered band.
    let mut bands: HashMap<u32, ObjectId> = HashMap::new();

    for page_id in store.page_ids() {
        let (page_width, page_height) = store.page_size(page_id)?;
        let width_px = page_width.round().max(1.0) as u32;

        let image_id = match bands.get(&width_px) {
            Some(id) => *id,
            None => {
                let image = renderer.render(&band_svg(width_px, &identity_line))?;
                let id = store.embed_image(&image, false)?;
                bands.insert(width_px, id);
                id
            }
        };

        let image_name = store.add_image_resource(page_id, image_id)?;

        store.isolate_page_content(page_id)?;
        store.append_page_ops(
            page_id,
            vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(page_width),
                        Object::Real(0.0),
                        Object::Real(0.0),
                        Object::Real(BAND_HEIGHT_PT),
                        Object::Real(0.0),
                        Object::Real(page_height - BAND_HEIGHT_PT),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(image_name.into_bytes())]),
                Operation::new("Q", vec![]),
            ],
        )?;

        debug!(?page_id, width_px, "security band drawn");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::store::tests::minimal_pdf;
    use chrono::TimeZone;

    fn fixed_text() -> WatermarkText {
        WatermarkText::new(
            "Ana Ruiz",
            "ana@example.com",
            Some(Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()),
        )
    }

    const HASH: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    #[test]
    fn band_svg_carries_all_three_lines() {
        let svg = band_svg(595, "Ana Ruiz | ana@example.com | deadbeef");
        assert!(svg.contains(BAND_NOTICE));
        assert!(svg.contains("Ana Ruiz | ana@example.com | deadbeef"));
        assert!(svg.contains(BAND_WARNING));
        assert!(svg.contains(r#"height="36""#));
    }

    #[test]
    fn metadata_reflects_purchaser_and_purchase_time() {
        let mut store = PdfStore::from_bytes(&minimal_pdf(1)).unwrap();
        let renderer = OverlayRenderer::new();

        add_security_features(&mut store, &renderer, &fixed_text(), HASH).unwrap();

        let info_id = match store.document().trailer.get(b"Info").unwrap() {
            lopdf::Object::Reference(id) => *id,
            other => panic!("expected reference, got {other:?}"),
        };
        let info = store.document().get_object(info_id).unwrap().as_dict().unwrap();

        let string_of = |key: &[u8]| match info.get(key).unwrap() {
            lopdf::Object::String(bytes, _) => bytes.clone(),
            other => panic!("expected string for {key:?}, got {other:?}"),
        };

        assert_eq!(string_of(b"Author"), b"INTERGALACTIC SL".to_vec());
        assert_eq!(
            string_of(b"Subject"),
            b"Documento personal para Ana Ruiz (ana@example.com)".to_vec()
        );
        assert_eq!(
            string_of(b"CreationDate"),
            b"D:20260314092653+00'00'".to_vec()
        );
        assert!(String::from_utf8_lossy(&string_of(b"Keywords")).contains("ana@example.com"));
    }

    #[test]
    fn every_page_shows_the_same_band_raster() {
        let mut store = PdfStore::from_bytes(&minimal_pdf(3)).unwrap();
        let renderer = OverlayRenderer::new();

        add_security_features(&mut store, &renderer, &fixed_text(), HASH).unwrap();

        // Same page width on all pages → one shared band XObject.
        let mut referenced = std::collections::HashSet::new();
        for page_id in store.page_ids() {
            let page = store.document().get_object(page_id).unwrap().as_dict().unwrap();
            let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
            let xobjects = resources.get(b"XObject").unwrap().as_dict().unwrap();
            assert_eq!(xobjects.len(), 1);
            for (_, value) in xobjects.iter() {
                if let lopdf::Object::Reference(id) = value {
                    referenced.insert(*id);
                }
            }
        }
        assert_eq!(referenced.len(), 1);

        let bytes = store.save_to_bytes().unwrap();
        assert_eq!(PdfStore::from_bytes(&bytes).unwrap().page_count(), 3);
    }

    /// Two-page A4 document with real text content, built with printpdf.
    fn generated_text_pdf() -> Vec<u8> {
        use printpdf::{
            BuiltinFont, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, PdfWarnMsg, Point, Pt,
            TextItem,
        };

        let mut doc = PdfDocument::new("Analíticas Esenciales");
        let pages: Vec<PdfPage> = (0..2)
            .map(|index| {
                let ops = vec![
                    Op::StartTextSection,
                    Op::SetTextCursor {
                        pos: Point {
                            x: Pt(72.0),
                            y: Pt(720.0),
                        },
                    },
                    Op::SetFontSizeBuiltinFont {
                        size: Pt(11.0),
                        font: BuiltinFont::Helvetica,
                    },
                    Op::WriteTextBuiltinFont {
                        items: vec![TextItem::Text(format!("Capítulo {}", index + 1))],
                        font: BuiltinFont::Helvetica,
                    },
                    Op::EndTextSection,
                ];
                PdfPage::new(Mm(210.0), Mm(297.0), ops)
            })
            .collect();
        doc.with_pages(pages);

        let mut warnings: Vec<PdfWarnMsg> = Vec::new();
        doc.save(&PdfSaveOptions::default(), &mut warnings)
    }

    #[test]
    fn full_stage_chain_on_a_document_with_content() {
        // Mirrors the pipeline: watermark → save → hash → reload → band.
        let renderer = OverlayRenderer::new();
        let text = fixed_text();

        let mut store = PdfStore::from_bytes(&generated_text_pdf()).unwrap();
        crate::watermark::apply_central_watermark(&mut store, &renderer, &text).unwrap();
        let watermarked = store.save_to_bytes().unwrap();

        let hash = filigrana_trace::integrity::hash_bytes(&watermarked);

        let mut store = PdfStore::from_bytes(&watermarked).unwrap();
        add_security_features(&mut store, &renderer, &text, &hash).unwrap();
        let final_bytes = store.save_to_bytes().unwrap();

        let finished = PdfStore::from_bytes(&final_bytes).unwrap();
        assert_eq!(finished.page_count(), 2);

        // Each page carries both overlays: the stamp and the band.
        for page_id in finished.page_ids() {
            let page = finished
                .document()
                .get_object(page_id)
                .unwrap()
                .as_dict()
                .unwrap();
            let resources = page.get(b"Resources").unwrap().as_dict().unwrap();
            let xobjects = resources.get(b"XObject").unwrap().as_dict().unwrap();
            assert_eq!(xobjects.len(), 2);
        }
    }

    #[test]
    fn identity_line_is_escaped_before_rendering() {
        let mut store = PdfStore::from_bytes(&minimal_pdf(1)).unwrap();
        let renderer = OverlayRenderer::new();
        let text = WatermarkText::new(
            "Ruiz & Sons <legal>",
            "ana@example.com",
            Some(Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()),
        );

        // Raw '&' and '<' in the purchaser name must not break the render.
        add_security_features(&mut store, &renderer, &text, HASH).unwrap();
    }
}
