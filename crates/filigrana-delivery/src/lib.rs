// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Filigrana — outbound delivery: size-bounded attachment grouping, MIME
// assembly, and the Gmail API mail transport.

pub mod mime;
pub mod packager;
pub mod transport;

pub use packager::{deliver, group_outputs, DeliveryReport};
pub use transport::{GmailTransport, MailTransport};
