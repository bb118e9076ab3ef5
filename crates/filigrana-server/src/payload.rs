// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Webhook payload field mapping.
//
// Vendors deliver purchase events in slightly different shapes: a bare
// object or a one-element array, purchaser fields inline or nested under
// `member`, the timestamp as `purchasedAt` or buried in
// `payment_transaction`. This module flattens all of them into a
// `PurchaseEvent`.

use chrono::{DateTime, Utc};
use filigrana_core::error::{FiligranaError, Result};
use filigrana_core::types::PurchaseEvent;
use serde_json::Value;
use tracing::warn;

/// Resolve the purchaser's full name from any of the supported shapes.
fn resolve_full_name(event: &Value) -> Option<String> {
    if let Some(name) = event.get("fullName").and_then(Value::as_str) {
        return Some(name.to_string());
    }
    if let Some(name) = event
        .get("member")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
    {
        return Some(name.to_string());
    }

    let first = event.get("first_name").and_then(Value::as_str);
    let last = event.get("last_name").and_then(Value::as_str);
    match (first, last) {
        (Some(first), Some(last)) => Some(format!("{first} {last}")),
        (Some(first), None) => Some(first.to_string()),
        (None, Some(last)) => Some(last.to_string()),
        (None, None) => None,
    }
}

/// Resolve the purchaser's email address.
fn resolve_email(event: &Value) -> Option<String> {
    event
        .get("email")
        .and_then(Value::as_str)
        .or_else(|| {
            event
                .get("member")
                .and_then(|m| m.get("email"))
                .and_then(Value::as_str)
        })
        .map(str::to_string)
}

/// Resolve the purchase timestamp; an unparseable value is tolerated and
/// treated as absent (the pipeline falls back to processing time).
fn resolve_purchased_at(event: &Value) -> Option<DateTime<Utc>> {
    let raw = event
        .get("purchasedAt")
        .and_then(Value::as_str)
        .or_else(|| {
            event
                .get("payment_transaction")
                .and_then(|t| t.get("created_at"))
                .and_then(Value::as_str)
        })?;

    match DateTime::parse_from_rfc3339(raw) {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(e) => {
            warn!(raw, error = %e, "unparseable purchase timestamp; using processing time");
            None
        }
    }
}

/// Parse a webhook body into a `PurchaseEvent`.
///
/// Accepts a single JSON object or an array whose first element is used.
/// Missing name or email is a validation error surfaced as HTTP 400 by the
/// caller.
pub fn parse_event(body: &[u8]) -> Result<PurchaseEvent> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| FiligranaError::Payload(format!("body is not valid JSON: {e}")))?;

    let event = match &value {
        Value::Array(items) => items
            .first()
            .ok_or_else(|| FiligranaError::Payload("empty event array".into()))?,
        Value::Object(_) => &value,
        other => {
            return Err(FiligranaError::Payload(format!(
                "expected object or array, got {other}"
            )))
        }
    };

    let full_name = resolve_full_name(event);
    let email = resolve_email(event);

    let (full_name, email) = match (full_name, email) {
        (Some(name), Some(email)) => (name, email),
        _ => {
            return Err(FiligranaError::Payload(
                "Faltan parámetros: fullName y email son requeridos".into(),
            ))
        }
    };

    Ok(PurchaseEvent {
        full_name,
        email,
        purchased_at: resolve_purchased_at(event),
        offer_title: event
            .get("offer")
            .and_then(|o| o.get("title"))
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}
