// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Unified error types for Filigrana.

use thiserror::Error;

/// Top-level error type for all Filigrana operations.
#[derive(Debug, Error)]
pub enum FiligranaError {
    // -- Webhook / payload errors --
    #[error("invalid webhook payload: {0}")]
    Payload(String),

    // -- Source resolution errors --
    #[error("source resolution failed: {0}")]
    SourceResolution(String),

    #[error("download failed for {url}: {reason}")]
    Download { url: String, reason: String },

    // -- Document errors --
    #[error("PDF operation failed: {0}")]
    PdfError(String),

    #[error("overlay rendering failed: {0}")]
    RenderError(String),

    #[error("external tool failed: {0}")]
    External(String),

    // -- Delivery errors --
    #[error("mail transport error: {0}")]
    Mail(String),

    #[error("batch produced no deliverable output: {0}")]
    EmptyBatch(String),

    // -- Traceability --
    #[error("integrity check failed: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("database error: {0}")]
    Database(String),

    // -- Configuration / persistence --
    #[error("configuration error: {0}")]
    Config(String),

    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FiligranaError>;
