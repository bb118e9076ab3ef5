// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Attachment packager — groups processed outputs into size-bounded batches
// and emits one email per batch.
//
// Grouping is first-fit-in-order, not bin-packing optimisation: items are
// never reordered, so a purchaser reconciling partial deliveries sees their
// documents in the original sequence at the cost of an occasional extra
// message.

use filigrana_core::error::Result;
use filigrana_core::types::{Attachment, AttachmentGroup, OutgoingMessage, ProcessedOutput};
use tracing::{error, info, instrument, warn};

use crate::transport::MailTransport;

/// Subject line of the delivery emails.
const SUBJECT: &str = "Tu PDF con acceso personal";

/// Plain-text body of the delivery emails.
const BODY: &str = "Adjuntamos tu copia personalizada del material.";

/// MIME type of every attachment this service produces.
const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Split `outputs` into ordered groups whose total size stays within
/// `budget` bytes.
///
/// An item whose size alone reaches the budget still gets its own singleton
/// group — outputs are never dropped for being oversized.
pub fn group_outputs(outputs: &[ProcessedOutput], budget: u64) -> Vec<AttachmentGroup> {
    let mut groups = Vec::new();
    let mut current: Vec<ProcessedOutput> = Vec::new();
    let mut current_total: u64 = 0;

    for output in outputs {
        if !current.is_empty() && current_total + output.size > budget {
            groups.push(AttachmentGroup {
                items: std::mem::take(&mut current),
            });
            current_total = 0;
        }
        current_total += output.size;
        current.push(output.clone());
    }

    if !current.is_empty() {
        groups.push(AttachmentGroup { items: current });
    }

    groups
}

/// Subject for group `index` (1-based) of `total`: annotated with `(i/N)`
/// only when the delivery spans more than one message.
fn group_subject(index: usize, total: usize) -> String {
    if total > 1 {
        format!("{SUBJECT} ({index}/{total})")
    } else {
        SUBJECT.to_string()
    }
}

/// Outcome of a delivery run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Number of groups the outputs were split into.
    pub groups: usize,
    /// Number of groups whose send succeeded.
    pub sent: usize,
}

/// Group `outputs` under `budget` and send one email per group to `to`.
///
/// Sends are sequential and best-effort: a failed group is logged and does
/// not stop later groups — the `(i/N)` subject suffix lets the purchaser
/// spot the gap.
#[instrument(skip_all, fields(to = %to, outputs = outputs.len()))]
pub async fn deliver(
    transport: &dyn MailTransport,
    budget: u64,
    to: &str,
    outputs: &[ProcessedOutput],
) -> Result<DeliveryReport> {
    let groups = group_outputs(outputs, budget);
    let total = groups.len();
    let mut sent = 0usize;

    for (index, group) in groups.iter().enumerate() {
        let message = OutgoingMessage {
            to: to.to_string(),
            subject: group_subject(index + 1, total),
            text: BODY.to_string(),
            attachments: group
                .items
                .iter()
                .map(|item| Attachment {
                    path: item.path.clone(),
                    name: item.name.clone(),
                    content_type: PDF_CONTENT_TYPE.to_string(),
                })
                .collect(),
        };

        if group.total_size() > budget {
            warn!(
                group = index + 1,
                size = group.total_size(),
                budget,
                "singleton group exceeds the transport budget; sending anyway"
            );
        }

        match transport.send(&message).await {
            Ok(()) => {
                info!(group = index + 1, total, "group delivered");
                sent += 1;
            }
            Err(e) => {
                error!(group = index + 1, total, error = %e, "group send failed");
            }
        }
    }

    Ok(DeliveryReport { groups: total, sent })
}
