// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Document fingerprinting — SHA-256 over the watermarked bytes.
//
// The digest is computed once per document, after the central watermark is
// applied and before the security band is drawn, so the hash printed on the
// band covers exactly the content the purchaser receives underneath it.

use filigrana_core::error::FiligranaError;
use sha2::{Digest, Sha256};

/// Compute the SHA-256 hash of `data` as a lowercase hex string.
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Verify that `data` matches the expected SHA-256 hex digest.
///
/// Returns `FiligranaError::IntegrityMismatch` carrying both digests when
/// the content does not match.
pub fn verify_hash(data: &[u8], expected_hex: &str) -> Result<(), FiligranaError> {
    let actual = hash_bytes(data);
    if actual == expected_hex {
        Ok(())
    } else {
        Err(FiligranaError::IntegrityMismatch {
            expected: expected_hex.to_owned(),
            actual,
        })
    }
}
