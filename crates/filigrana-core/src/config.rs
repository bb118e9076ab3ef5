// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Application configuration.
//
// Loaded once at startup from a JSON file and passed down by value — there
// is no global configuration state. Gmail credentials may be supplied (or
// overridden) through the conventional GMAIL_* environment variables so
// secrets can stay out of the config file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{FiligranaError, Result};

/// Default webhook listen port.
const DEFAULT_PORT: u16 = 3000;

/// Compress outputs larger than this (pre-attachment), in bytes.
const DEFAULT_COMPRESS_THRESHOLD: u64 = 20 * 1024 * 1024;

/// Combined attachment budget per outbound message, in bytes.
///
/// 17 MiB pre-encoding keeps a full group under the ~22.6 MiB wire limit
/// once base64 inflates it by 4/3.
const DEFAULT_ATTACHMENT_BUDGET: u64 = 17 * 1024 * 1024;

/// Top-level application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub gmail: GmailConfig,
    pub pipeline: PipelineConfig,
    /// Offer identifier → source-document policy. Offers absent from this
    /// map are acknowledged and dropped without processing.
    pub offers: HashMap<String, SourcePolicy>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            gmail: GmailConfig::default(),
            pipeline: PipelineConfig::default(),
            offers: HashMap::new(),
        }
    }
}

/// Webhook server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port for the webhook listener.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

/// Gmail API transport credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GmailConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    /// From-address used in outbound messages.
    pub sender: String,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            sender: String::new(),
        }
    }
}

impl GmailConfig {
    /// Overlay credentials from GMAIL_* environment variables, when set.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("GMAIL_CLIENT_ID") {
            self.client_id = v;
        }
        if let Ok(v) = std::env::var("GMAIL_CLIENT_SECRET") {
            self.client_secret = v;
        }
        if let Ok(v) = std::env::var("GMAIL_REFRESH_TOKEN") {
            self.refresh_token = v;
        }
        if let Ok(v) = std::env::var("GMAIL_SENDER") {
            self.sender = v;
        }
    }
}

/// Pipeline tunables: temp storage, compression, external tools, deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory for per-run temp storage and the audit database.
    pub data_dir: PathBuf,
    /// Outputs above this size go through the external compressor.
    pub compress_threshold_bytes: u64,
    /// Combined attachment budget per outbound message.
    pub attachment_budget_bytes: u64,
    /// Ghostscript binary used for lossy size reduction.
    pub ghostscript_bin: String,
    /// Optional sanitizer command; `{input}` and `{output}` elements are
    /// substituted with the actual paths. Always invoked as an argument
    /// list, never through a shell.
    pub sanitizer_command: Option<Vec<String>>,
    /// Deadline for each remote source download, in seconds.
    pub download_timeout_secs: u64,
    /// Deadline for each external tool invocation, in seconds.
    pub tool_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            compress_threshold_bytes: DEFAULT_COMPRESS_THRESHOLD,
            attachment_budget_bytes: DEFAULT_ATTACHMENT_BUDGET,
            ghostscript_bin: "gs".into(),
            sanitizer_command: None,
            download_timeout_secs: 30,
            tool_timeout_secs: 120,
        }
    }
}

/// A remote document reference: URL plus an optional logical name.
/// When the name is absent it is derived from the URL basename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSource {
    pub url: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// How the source documents for an offer are located.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourcePolicy {
    /// A single statically configured document, optionally fetched from a
    /// remote URL when the local file is absent.
    StaticFile {
        path: PathBuf,
        #[serde(default)]
        fallback_url: Option<String>,
    },
    /// Every PDF found in a local directory; when the directory does not
    /// exist, the configured remote list is used instead.
    Directory {
        path: PathBuf,
        #[serde(default)]
        fallback_urls: Vec<RemoteSource>,
    },
    /// An explicit remote URL list.
    RemoteList { sources: Vec<RemoteSource> },
}

impl AppConfig {
    /// Load configuration from a JSON file and overlay GMAIL_* env vars.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            FiligranaError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: AppConfig = serde_json::from_str(&data).map_err(|e| {
            FiligranaError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.gmail.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Structural validation that cannot be expressed through serde alone.
    pub fn validate(&self) -> Result<()> {
        for (offer, policy) in &self.offers {
            match policy {
                SourcePolicy::RemoteList { sources } => {
                    if sources.is_empty() {
                        return Err(FiligranaError::Config(format!(
                            "offer '{offer}': remote_list must not be empty"
                        )));
                    }
                    for source in sources {
                        if source.url.is_empty() {
                            return Err(FiligranaError::Config(format!(
                                "offer '{offer}': remote source with empty URL"
                            )));
                        }
                    }
                }
                SourcePolicy::Directory { fallback_urls, .. } => {
                    for source in fallback_urls {
                        if source.url.is_empty() {
                            return Err(FiligranaError::Config(format!(
                                "offer '{offer}': fallback source with empty URL"
                            )));
                        }
                    }
                }
                SourcePolicy::StaticFile { .. } => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.pipeline.compress_threshold_bytes, 20 * 1024 * 1024);
        assert_eq!(config.pipeline.attachment_budget_bytes, 17 * 1024 * 1024);
        assert!(config.offers.is_empty());
    }

    #[test]
    fn load_partial_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filigrana.json");
        std::fs::write(
            &path,
            r#"{
                "server": { "port": 8080 },
                "offers": {
                    "Test Product": {
                        "type": "directory",
                        "path": "/srv/docs/test-product"
                    }
                }
            }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(matches!(
            config.offers.get("Test Product"),
            Some(SourcePolicy::Directory { .. })
        ));
        // Untouched sections fall back to defaults.
        assert_eq!(config.pipeline.ghostscript_bin, "gs");
    }

    #[test]
    fn empty_remote_list_is_rejected() {
        let mut config = AppConfig::default();
        config.offers.insert(
            "Broken".into(),
            SourcePolicy::RemoteList { sources: vec![] },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn policy_round_trips_through_json() {
        let policy = SourcePolicy::RemoteList {
            sources: vec![RemoteSource {
                url: "https://cdn.example.com/guide.pdf".into(),
                name: Some("guide.pdf".into()),
            }],
        };
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"type\":\"remote_list\""));
        let back: SourcePolicy = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, SourcePolicy::RemoteList { .. }));
    }
}
