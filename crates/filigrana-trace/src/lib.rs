// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Filigrana — document fingerprinting and the delivery audit trail.

pub mod audit;
pub mod integrity;

pub use audit::{AuditEntry, AuditLog};
pub use integrity::{hash_bytes, verify_hash};
