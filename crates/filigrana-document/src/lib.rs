// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Filigrana — document processing: PDF store, overlay rendering, the
// watermark and security-band stages, and the external compressor boundary.

pub mod band;
pub mod compress;
pub mod overlay;
pub mod pdf;
pub mod watermark;

pub use band::add_security_features;
pub use overlay::OverlayRenderer;
pub use watermark::apply_central_watermark;
