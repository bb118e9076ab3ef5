// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// RFC 2822 multipart/mixed assembly for outbound messages.
//
// The Gmail API takes a complete raw message rather than structured fields,
// so the MIME envelope is built here: one text/plain body part followed by
// one base64 part per attachment, CRLF line endings throughout.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use filigrana_core::error::{FiligranaError, Result};
use filigrana_core::types::OutgoingMessage;
use uuid::Uuid;

/// RFC 2045 maximum encoded line length.
const BASE64_LINE_WIDTH: usize = 76;

/// Wrap a base64 payload at the MIME line limit.
fn wrap_base64(encoded: &str) -> String {
    encoded
        .as_bytes()
        .chunks(BASE64_LINE_WIDTH)
        // Chunks of an ASCII string are valid UTF-8.
        .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\r\n")
}

/// Assemble a complete raw MIME message for `message`, reading each
/// attachment from disk.
///
/// `from` is the configured sender address; the display name matches what
/// purchasers have always seen from this service.
pub fn assemble(from: &str, message: &OutgoingMessage) -> Result<String> {
    let boundary = format!("mixed_{}", Uuid::new_v4().simple());

    let mut parts: Vec<String> = vec![
        format!("From: PDF Delivery <{from}>"),
        format!("To: {}", message.to),
        format!("Subject: {}", message.subject),
        "MIME-Version: 1.0".into(),
        format!("Content-Type: multipart/mixed; boundary={boundary}"),
        String::new(),
        format!("--{boundary}"),
        "Content-Type: text/plain; charset=\"UTF-8\"".into(),
        "Content-Transfer-Encoding: 7bit".into(),
        String::new(),
        message.text.clone(),
        String::new(),
    ];

    for attachment in &message.attachments {
        let bytes = std::fs::read(&attachment.path).map_err(|e| {
            FiligranaError::Mail(format!(
                "cannot read attachment {}: {e}",
                attachment.path.display()
            ))
        })?;

        parts.push(format!("--{boundary}"));
        parts.push(format!(
            "Content-Type: {}; name=\"{}\"",
            attachment.content_type, attachment.name
        ));
        parts.push("Content-Transfer-Encoding: base64".into());
        parts.push(format!(
            "Content-Disposition: attachment; filename=\"{}\"",
            attachment.name
        ));
        parts.push(String::new());
        parts.push(wrap_base64(&STANDARD.encode(&bytes)));
    }

    parts.push(format!("--{boundary}--"));

    Ok(parts.join("\r\n"))
}
