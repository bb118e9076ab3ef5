// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Filigrana — core types, error, and configuration shared across all crates.

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::FiligranaError;
pub use types::*;
