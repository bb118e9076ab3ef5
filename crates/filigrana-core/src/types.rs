// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Core domain types for the Filigrana watermark-and-deliver pipeline.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one webhook processing run.
///
/// Every accepted purchase event gets its own id; temp storage and log
/// correlation are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A purchase event as resolved from the inbound webhook payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseEvent {
    /// Purchaser's full name.
    pub full_name: String,
    /// Purchaser's email address (also the delivery target).
    pub email: String,
    /// Purchase timestamp supplied by the payload, when present.
    pub purchased_at: Option<DateTime<Utc>>,
    /// Offer identifier used to select the source-document policy.
    pub offer_title: Option<String>,
}

/// The composite identity string stamped onto every page:
/// `fullName | email | timestamp`.
///
/// The timestamp is the payload-supplied purchase time when available,
/// otherwise the wall-clock time at construction — it is never absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatermarkText {
    pub full_name: String,
    pub email: String,
    pub timestamp: DateTime<Utc>,
}

impl WatermarkText {
    pub fn new(
        full_name: impl Into<String>,
        email: impl Into<String>,
        purchased_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            full_name: full_name.into(),
            email: email.into(),
            timestamp: purchased_at.unwrap_or_else(Utc::now),
        }
    }

    pub fn for_event(event: &PurchaseEvent) -> Self {
        Self::new(
            event.full_name.clone(),
            event.email.clone(),
            event.purchased_at,
        )
    }

    /// The canonical ` | `-joined form used as stamp content.
    pub fn canonical(&self) -> String {
        format!(
            "{} | {} | {}",
            self.full_name,
            self.email,
            self.timestamp.to_rfc3339()
        )
    }
}

impl std::fmt::Display for WatermarkText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// An input document: immutable bytes plus the logical name used for the
/// output file and the email attachment.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// A fully processed (watermarked, banded, possibly compressed) output file
/// on temp storage, ready to be attached to an email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedOutput {
    pub path: PathBuf,
    pub name: String,
    /// File size in bytes, captured at creation so the packager never has
    /// to touch the filesystem.
    pub size: u64,
}

/// An ordered, non-empty batch of outputs whose combined size fits one
/// outbound message (or a single item too large for any budget).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentGroup {
    pub items: Vec<ProcessedOutput>,
}

impl AttachmentGroup {
    pub fn total_size(&self) -> u64 {
        self.items.iter().map(|item| item.size).sum()
    }
}

/// A single attachment handed to the mail transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub path: PathBuf,
    pub name: String,
    pub content_type: String,
}

/// The message contract between the packager and the mail transport.
///
/// The transport owns authentication, MIME assembly, and the wire size
/// ceiling; the packager's grouping exists precisely because that ceiling
/// is hard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn watermark_text_uses_purchase_time_when_present() {
        let bought = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let text = WatermarkText::new("Ana Ruiz", "ana@example.com", Some(bought));
        assert_eq!(
            text.canonical(),
            "Ana Ruiz | ana@example.com | 2026-03-14T09:26:53+00:00"
        );
    }

    #[test]
    fn watermark_text_never_lacks_a_timestamp() {
        let before = Utc::now();
        let text = WatermarkText::new("Ana Ruiz", "ana@example.com", None);
        assert!(text.timestamp >= before);
        assert!(text.canonical().contains(" | ana@example.com | "));
    }

    #[test]
    fn attachment_group_sums_sizes() {
        let mib = 1024 * 1024;
        let group = AttachmentGroup {
            items: vec![
                ProcessedOutput {
                    path: "/tmp/a.pdf".into(),
                    name: "a.pdf".into(),
                    size: 10 * mib,
                },
                ProcessedOutput {
                    path: "/tmp/b.pdf".into(),
                    name: "b.pdf".into(),
                    size: 5 * mib,
                },
            ],
        };
        assert_eq!(group.total_size(), 15 * mib);
    }
}
