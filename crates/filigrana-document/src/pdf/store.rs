// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// PDF store — load/save, page geometry, image embedding, and content-stream
// surgery on existing documents using the `lopdf` crate.
//
// The stamping stages never touch lopdf objects directly; everything they
// need (embed a raster, register a resource name, append draw operations,
// write /Info metadata) goes through this wrapper.

use chrono::{DateTime, Utc};
use filigrana_core::error::{FiligranaError, Result};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::codecs::jpeg::JpegEncoder;
use image::{ExtendedColorType, RgbaImage};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream, StringFormat};
use std::io::Write;
use tracing::{debug, warn};

/// JPEG quality used for embedded stamp rasters.
const STAMP_JPEG_QUALITY: u8 = 90;

/// Maximum /Parent hops when resolving inherited page attributes.
/// Real page trees are a handful of levels deep; this only guards against
/// cyclic references in corrupt files.
const MAX_TREE_DEPTH: usize = 32;

/// Convert a `lopdf::Error` into a `FiligranaError::PdfError`.
fn pdf_err(e: lopdf::Error) -> FiligranaError {
    FiligranaError::PdfError(e.to_string())
}

/// Document /Info metadata written by the security stage.
#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub title: String,
    pub author: String,
    pub subject: String,
    pub keywords: Vec<String>,
    pub producer: String,
    pub creation_date: DateTime<Utc>,
    pub modification_date: DateTime<Utc>,
}

/// Byte-level PDF access for the stamping stages.
///
/// Wraps `lopdf::Document`. Each pipeline stage owns one `PdfStore` for the
/// duration of its mutation; stage handoff happens through
/// [`PdfStore::save_to_bytes`] so no two stages ever share a buffer.
pub struct PdfStore {
    document: Document,
}

impl PdfStore {
    // -- Construction / serialisation -----------------------------------------

    /// Load a PDF from raw bytes already in memory.
    ///
    /// Fails fast when the bytes are not a readable document. Encrypted
    /// documents are tolerated as long as they open with an empty user
    /// password.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut document = Document::load_mem(data)
            .map_err(|e| FiligranaError::PdfError(format!("failed to load PDF: {e}")))?;

        if document.is_encrypted() {
            warn!("source document is encrypted; attempting empty user password");
            document.decrypt("").map_err(|e| {
                FiligranaError::PdfError(format!("encrypted document is not readable: {e}"))
            })?;
        }

        debug!(pages = document.get_pages().len(), "PDF loaded from bytes");
        Ok(Self { document })
    }

    /// Serialise the current document state to bytes.
    pub fn save_to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.document
            .save_to(&mut output)
            .map_err(|e| FiligranaError::PdfError(format!("failed to serialise PDF: {e}")))?;
        Ok(output)
    }

    /// Borrow the underlying document (used by inspection tests).
    pub fn document(&self) -> &Document {
        &self.document
    }

    // -- Page enumeration / geometry ------------------------------------------

    /// Page object ids in page order.
    pub fn page_ids(&self) -> Vec<ObjectId> {
        // get_pages() keys are 1-indexed page numbers in a BTreeMap, so the
        // value iteration order is already the page order.
        self.document.get_pages().into_values().collect()
    }

    /// Number of pages in the document.
    pub fn page_count(&self) -> usize {
        self.document.get_pages().len()
    }

    /// Page width and height in points, from /MediaBox.
    ///
    /// MediaBox is inheritable: when the page dictionary lacks its own
    /// entry, the /Parent chain is walked until one is found.
    pub fn page_size(&self, page_id: ObjectId) -> Result<(f32, f32)> {
        let mut current = page_id;
        for _ in 0..MAX_TREE_DEPTH {
            let dict = self.dict_at(current)?;
            if let Ok(media_box) = dict.get(b"MediaBox") {
                let media_box = self.resolve(media_box)?;
                return rect_size(media_box);
            }
            match dict.get(b"Parent") {
                Ok(Object::Reference(parent)) => current = *parent,
                _ => break,
            }
        }
        Err(FiligranaError::PdfError(format!(
            "page {page_id:?} has no MediaBox (own or inherited)"
        )))
    }

    // -- Image embedding -------------------------------------------------------

    /// Embed an RGBA raster as an image XObject and return its object id.
    ///
    /// Colour goes in as DCTDecode (JPEG); when `with_alpha` is set the
    /// alpha channel is attached as a FlateDecode /SMask so transparent
    /// stamp regions stay transparent on the page.
    pub fn embed_image(&mut self, image: &RgbaImage, with_alpha: bool) -> Result<ObjectId> {
        let (width, height) = image.dimensions();
        let mut rgb = Vec::with_capacity((width * height * 3) as usize);
        let mut alpha = Vec::with_capacity((width * height) as usize);
        for pixel in image.pixels() {
            rgb.extend_from_slice(&[pixel[0], pixel[1], pixel[2]]);
            alpha.push(pixel[3]);
        }

        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, STAMP_JPEG_QUALITY)
            .encode(&rgb, width, height, ExtendedColorType::Rgb8)
            .map_err(|e| {
                FiligranaError::PdfError(format!("stamp JPEG encoding failed: {e}"))
            })?;

        let mut dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        };

        if with_alpha {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&alpha)
                .and_then(|_| encoder.finish())
                .map(|deflated| {
                    let smask = Stream::new(
                        dictionary! {
                            "Type" => "XObject",
                            "Subtype" => "Image",
                            "Width" => width as i64,
                            "Height" => height as i64,
                            "ColorSpace" => "DeviceGray",
                            "BitsPerComponent" => 8,
                            "Filter" => "FlateDecode",
                        },
                        deflated,
                    );
                    let smask_id = self.document.add_object(smask);
                    dict.set("SMask", Object::Reference(smask_id));
                })
                .map_err(|e| {
                    FiligranaError::PdfError(format!("soft mask deflate failed: {e}"))
                })?;
        }

        Ok(self.document.add_object(Stream::new(dict, jpeg)))
    }

    // -- Resource registration -------------------------------------------------

    /// Register an image XObject under a fresh name in the page's resources
    /// and return that name.
    pub fn add_image_resource(&mut self, page_id: ObjectId, xobject_id: ObjectId) -> Result<String> {
        self.insert_resource(page_id, b"XObject", "FgIm", Object::Reference(xobject_id))
    }

    /// Register a constant-alpha graphics state on the page and return its
    /// resource name.
    pub fn add_alpha_gstate(&mut self, page_id: ObjectId, alpha: f32) -> Result<String> {
        let gstate = dictionary! {
            "Type" => "ExtGState",
            "ca" => Object::Real(alpha),
            "CA" => Object::Real(alpha),
        };
        let gstate_id = self.document.add_object(Object::Dictionary(gstate));
        self.insert_resource(page_id, b"ExtGState", "FgGs", Object::Reference(gstate_id))
    }

    // -- Content stream surgery ------------------------------------------------

    /// Fence the page's existing content inside a `q`/`Q` pair so that
    /// whatever graphics state it leaves behind cannot skew overlays
    /// appended afterwards.
    ///
    /// Stages call this once per page before their first append.
    pub fn isolate_page_content(&mut self, page_id: ObjectId) -> Result<()> {
        let existing = self.content_stream_ids(page_id)?;
        if existing.is_empty() {
            return Ok(());
        }

        let push = self
            .document
            .add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
        let pop = self
            .document
            .add_object(Stream::new(Dictionary::new(), b"Q\n".to_vec()));

        let mut contents = Vec::with_capacity(existing.len() + 2);
        contents.push(push);
        contents.extend(existing);
        contents.push(pop);
        self.set_contents(page_id, contents)
    }

    /// Append drawing operations to the page as a new content stream.
    pub fn append_page_ops(&mut self, page_id: ObjectId, operations: Vec<Operation>) -> Result<()> {
        let encoded = Content { operations }
            .encode()
            .map_err(|e| FiligranaError::PdfError(format!("content encoding failed: {e}")))?;
        let stream_id = self
            .document
            .add_object(Stream::new(Dictionary::new(), encoded));

        let mut contents = self.content_stream_ids(page_id)?;
        contents.push(stream_id);
        self.set_contents(page_id, contents)
    }

    // -- Metadata --------------------------------------------------------------

    /// Replace the document's /Info dictionary.
    pub fn set_metadata(&mut self, info: &DocumentInfo) -> Result<()> {
        let mut dict = Dictionary::new();
        dict.set("Title", pdf_text_string(&info.title));
        dict.set("Author", pdf_text_string(&info.author));
        dict.set("Subject", pdf_text_string(&info.subject));
        dict.set("Keywords", pdf_text_string(&info.keywords.join(", ")));
        dict.set("Producer", pdf_text_string(&info.producer));
        dict.set(
            "CreationDate",
            Object::string_literal(pdf_date(info.creation_date)),
        );
        dict.set(
            "ModDate",
            Object::string_literal(pdf_date(info.modification_date)),
        );

        let info_id = self.document.add_object(Object::Dictionary(dict));
        self.document
            .trailer
            .set("Info", Object::Reference(info_id));
        Ok(())
    }

    // -- Internals -------------------------------------------------------------

    /// Resolve a chain of references to the final object.
    fn resolve<'a>(&'a self, mut object: &'a Object) -> Result<&'a Object> {
        for _ in 0..MAX_TREE_DEPTH {
            match object {
                Object::Reference(id) => {
                    object = self.document.get_object(*id).map_err(pdf_err)?;
                }
                other => return Ok(other),
            }
        }
        Err(FiligranaError::PdfError("reference cycle".into()))
    }

    /// The dictionary stored at `id`.
    fn dict_at(&self, id: ObjectId) -> Result<&Dictionary> {
        self.document
            .get_object(id)
            .map_err(pdf_err)?
            .as_dict()
            .map_err(pdf_err)
    }

    /// Normalise the page's /Contents entry into a list of stream object
    /// ids. Direct (non-reference) entries are hoisted into their own
    /// objects so the result can always be stored back as an array of
    /// references.
    fn content_stream_ids(&mut self, page_id: ObjectId) -> Result<Vec<ObjectId>> {
        let contents = match self.dict_at(page_id)?.get(b"Contents") {
            Ok(object) => object.clone(),
            Err(_) => return Ok(Vec::new()),
        };

        match contents {
            Object::Reference(id) => Ok(vec![id]),
            Object::Array(items) => {
                let mut ids = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Object::Reference(id) => ids.push(id),
                        direct => ids.push(self.document.add_object(direct)),
                    }
                }
                Ok(ids)
            }
            direct @ Object::Stream(_) => Ok(vec![self.document.add_object(direct)]),
            other => Err(FiligranaError::PdfError(format!(
                "unsupported /Contents object: {other:?}"
            ))),
        }
    }

    /// Store `ids` as the page's /Contents array.
    fn set_contents(&mut self, page_id: ObjectId, ids: Vec<ObjectId>) -> Result<()> {
        let refs = ids.into_iter().map(Object::Reference).collect::<Vec<_>>();
        let page = self
            .document
            .get_object_mut(page_id)
            .map_err(pdf_err)?
            .as_dict_mut()
            .map_err(pdf_err)?;
        page.set("Contents", Object::Array(refs));
        Ok(())
    }

    /// Make sure the page carries its own inline /Resources dictionary,
    /// cloning a referenced or inherited one when necessary. Stamping must
    /// not mutate resource dictionaries shared with other pages.
    fn ensure_inline_resources(&mut self, page_id: ObjectId) -> Result<()> {
        let resolved: Dictionary = {
            let page = self.dict_at(page_id)?;
            match page.get(b"Resources") {
                Ok(Object::Dictionary(_)) => return Ok(()), // already inline
                Ok(other) => self.resolve(other)?.as_dict().map_err(pdf_err)?.clone(),
                Err(_) => self.inherited_resources(page_id)?,
            }
        };

        let page = self
            .document
            .get_object_mut(page_id)
            .map_err(pdf_err)?
            .as_dict_mut()
            .map_err(pdf_err)?;
        page.set("Resources", Object::Dictionary(resolved));
        Ok(())
    }

    /// Walk the /Parent chain for an inheritable /Resources entry; an empty
    /// dictionary when none exists anywhere.
    fn inherited_resources(&self, page_id: ObjectId) -> Result<Dictionary> {
        let mut current = page_id;
        for _ in 0..MAX_TREE_DEPTH {
            let dict = self.dict_at(current)?;
            if let Ok(resources) = dict.get(b"Resources") {
                return Ok(self.resolve(resources)?.as_dict().map_err(pdf_err)?.clone());
            }
            match dict.get(b"Parent") {
                Ok(Object::Reference(parent)) => current = *parent,
                _ => break,
            }
        }
        Ok(Dictionary::new())
    }

    /// Insert `value` under a fresh `prefix{n}` name in the page's
    /// `category` resource sub-dictionary, returning the chosen name.
    fn insert_resource(
        &mut self,
        page_id: ObjectId,
        category: &[u8],
        prefix: &str,
        value: Object,
    ) -> Result<String> {
        self.ensure_inline_resources(page_id)?;

        // Build the updated category dictionary from the current state.
        let mut entries = {
            let page = self.dict_at(page_id)?;
            let resources = page.get(b"Resources").map_err(pdf_err)?;
            let resources = resources.as_dict().map_err(pdf_err)?;
            match resources.get(category) {
                Ok(existing) => self.resolve(existing)?.as_dict().map_err(pdf_err)?.clone(),
                Err(_) => Dictionary::new(),
            }
        };

        let mut index = 0usize;
        let name = loop {
            let candidate = format!("{prefix}{index}");
            if !entries.has(candidate.as_bytes()) {
                break candidate;
            }
            index += 1;
        };
        entries.set(name.as_bytes(), value);

        let page = self
            .document
            .get_object_mut(page_id)
            .map_err(pdf_err)?
            .as_dict_mut()
            .map_err(pdf_err)?;
        let resources = page
            .get_mut(b"Resources")
            .map_err(pdf_err)?
            .as_dict_mut()
            .map_err(pdf_err)?;
        resources.set(category, Object::Dictionary(entries));

        Ok(name)
    }
}

/// Width/height of a PDF rectangle array.
fn rect_size(rect: &Object) -> Result<(f32, f32)> {
    let items = rect.as_array().map_err(pdf_err)?;
    if items.len() != 4 {
        return Err(FiligranaError::PdfError(format!(
            "malformed rectangle: {} elements",
            items.len()
        )));
    }
    let mut values = [0f32; 4];
    for (slot, item) in values.iter_mut().zip(items) {
        *slot = match item {
            Object::Integer(i) => *i as f32,
            Object::Real(r) => *r,
            other => {
                return Err(FiligranaError::PdfError(format!(
                    "non-numeric rectangle element: {other:?}"
                )))
            }
        };
    }
    Ok(((values[2] - values[0]).abs(), (values[3] - values[1]).abs()))
}

/// Encode text for a PDF string object: plain literal for ASCII, UTF-16BE
/// with BOM (hex-encoded) otherwise.
fn pdf_text_string(text: &str) -> Object {
    if text.is_ascii() {
        Object::string_literal(text)
    } else {
        let mut bytes = vec![0xFE, 0xFF];
        for unit in text.encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        Object::String(bytes, StringFormat::Hexadecimal)
    }
}

/// PDF date string (`D:YYYYMMDDHHMMSS+00'00'`) for a UTC timestamp.
fn pdf_date(timestamp: DateTime<Utc>) -> String {
    format!("D:{}+00'00'", timestamp.format("%Y%m%d%H%M%S"))
}
