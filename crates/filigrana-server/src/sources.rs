// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Source-document resolution.
//
// Each offer maps (via configuration) to a policy: a static file with an
// optional remote fallback, a local directory scan, or an explicit remote
// URL list. Unmapped offers are an acknowledged no-op, not an error.
//
// Resolution failures (nothing to deliver at all) are fatal for the batch;
// an individual download failure only skips that document.

use std::path::Path;
use std::time::Duration;

use filigrana_core::config::{AppConfig, RemoteSource, SourcePolicy};
use filigrana_core::error::{FiligranaError, Result};
use filigrana_core::types::SourceDocument;
use tracing::{debug, info, warn};

/// Fallback attachment name when a URL has no usable basename.
const DEFAULT_REMOTE_NAME: &str = "document.pdf";

/// Derive an attachment filename from a URL: the path basename with any
/// query string stripped.
fn url_basename(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let base = without_query.rsplit('/').next().unwrap_or("");
    if base.is_empty() {
        DEFAULT_REMOTE_NAME.to_string()
    } else {
        base.to_string()
    }
}

/// Download one remote source, bounded by the configured deadline.
async fn download(
    http: &reqwest::Client,
    url: &str,
    deadline: Duration,
) -> Result<Vec<u8>> {
    let map_err = |reason: String| FiligranaError::Download {
        url: url.to_string(),
        reason,
    };

    let response = http
        .get(url)
        .timeout(deadline)
        .send()
        .await
        .map_err(|e| map_err(e.to_string()))?
        .error_for_status()
        .map_err(|e| map_err(e.to_string()))?;

    let bytes = response
        .bytes()
        .await
        .map_err(|e| map_err(e.to_string()))?;

    debug!(url, bytes = bytes.len(), "remote source downloaded");
    Ok(bytes.to_vec())
}

/// Fetch every entry of a remote list, skipping (and logging) entries that
/// fail to download.
async fn fetch_remote_list(
    http: &reqwest::Client,
    sources: &[RemoteSource],
    deadline: Duration,
) -> Vec<SourceDocument> {
    let mut documents = Vec::with_capacity(sources.len());
    for source in sources {
        let name = source
            .name
            .clone()
            .unwrap_or_else(|| url_basename(&source.url));
        match download(http, &source.url, deadline).await {
            Ok(bytes) => documents.push(SourceDocument::new(name, bytes)),
            Err(e) => warn!(url = %source.url, error = %e, "skipping failed download"),
        }
    }
    documents
}

/// Every `*.pdf` in `dir`, in deterministic name order.
fn scan_directory(dir: &Path) -> Result<Vec<SourceDocument>> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .map_err(|e| {
            FiligranaError::SourceResolution(format!("cannot read {}: {e}", dir.display()))
        })?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| DEFAULT_REMOTE_NAME.to_string());
        match std::fs::read(&path) {
            Ok(bytes) => documents.push(SourceDocument::new(name, bytes)),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
        }
    }
    Ok(documents)
}

/// Resolve the source documents for `offer_title` per the configured
/// policies.
///
/// Returns `Ok(None)` for unmapped (or absent) offers — an explicit
/// non-error outcome. A mapped offer that resolves to zero documents is a
/// source-resolution error.
pub async fn resolve_sources(
    config: &AppConfig,
    http: &reqwest::Client,
    offer_title: Option<&str>,
) -> Result<Option<Vec<SourceDocument>>> {
    let Some(title) = offer_title else {
        info!("event carries no offer title; dropping");
        return Ok(None);
    };
    let Some(policy) = config.offers.get(title) else {
        info!(offer = title, "unmapped offer; dropping");
        return Ok(None);
    };

    let deadline = Duration::from_secs(config.pipeline.download_timeout_secs);

    let documents = match policy {
        SourcePolicy::StaticFile { path, fallback_url } => {
            match std::fs::read(path) {
                Ok(bytes) => {
                    let name = path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| DEFAULT_REMOTE_NAME.to_string());
                    vec![SourceDocument::new(name, bytes)]
                }
                Err(read_err) => match fallback_url {
                    Some(url) => {
                        info!(
                            path = %path.display(),
                            url,
                            "static file absent; using remote fallback"
                        );
                        let bytes = download(http, url, deadline).await?;
                        vec![SourceDocument::new(url_basename(url), bytes)]
                    }
                    None => {
                        return Err(FiligranaError::SourceResolution(format!(
                            "static file {} unavailable: {read_err}",
                            path.display()
                        )))
                    }
                },
            }
        }
        SourcePolicy::Directory {
            path,
            fallback_urls,
        } => {
            if path.is_dir() {
                scan_directory(path)?
            } else if fallback_urls.is_empty() {
                return Err(FiligranaError::SourceResolution(format!(
                    "source directory {} absent and no remote fallback configured",
                    path.display()
                )));
            } else {
                info!(
                    path = %path.display(),
                    urls = fallback_urls.len(),
                    "source directory absent; using remote list"
                );
                fetch_remote_list(http, fallback_urls, deadline).await
            }
        }
        SourcePolicy::RemoteList { sources } => {
            fetch_remote_list(http, sources, deadline).await
        }
    };

    if documents.is_empty() {
        return Err(FiligranaError::SourceResolution(format!(
            "offer '{title}' resolved to zero documents"
        )));
    }

    info!(offer = title, documents = documents.len(), "sources resolved");
    Ok(Some(documents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use filigrana_core::config::SourcePolicy;

    fn http() -> reqwest::Client {
        reqwest::Client::new()
    }

    fn config_with(offer: &str, policy: SourcePolicy) -> AppConfig {
        let mut config = AppConfig::default();
        config.offers.insert(offer.to_string(), policy);
        config
    }

    #[test]
    fn url_basename_strips_path_and_query() {
        assert_eq!(
            url_basename("https://cdn.example.com/files/guide.pdf?sig=abc"),
            "guide.pdf"
        );
        assert_eq!(url_basename("https://cdn.example.com/annex.pdf"), "annex.pdf");
        assert_eq!(url_basename("https://cdn.example.com/"), "document.pdf");
    }

    #[tokio::test]
    async fn unmapped_offer_is_a_non_error_none() {
        let config = AppConfig::default();
        let resolved = resolve_sources(&config, &http(), Some("Unknown Product"))
            .await
            .unwrap();
        assert!(resolved.is_none());

        let resolved = resolve_sources(&config, &http(), None).await.unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn static_file_reads_local_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("guide.pdf");
        std::fs::write(&path, b"%PDF-1.5 fixture").unwrap();

        let config = config_with(
            "Test Product",
            SourcePolicy::StaticFile {
                path: path.clone(),
                fallback_url: None,
            },
        );

        let documents = resolve_sources(&config, &http(), Some("Test Product"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].name, "guide.pdf");
        assert_eq!(documents[0].bytes, b"%PDF-1.5 fixture");
    }

    #[tokio::test]
    async fn static_file_missing_without_fallback_is_fatal() {
        let config = config_with(
            "Test Product",
            SourcePolicy::StaticFile {
                path: "/nonexistent/guide.pdf".into(),
                fallback_url: None,
            },
        );

        let result = resolve_sources(&config, &http(), Some("Test Product")).await;
        assert!(matches!(
            result,
            Err(FiligranaError::SourceResolution(_))
        ));
    }

    #[tokio::test]
    async fn directory_scan_is_sorted_and_pdf_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"%PDF b").unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF a").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not a pdf").unwrap();
        std::fs::write(dir.path().join("C.PDF"), b"%PDF c").unwrap();

        let config = config_with(
            "Test Product",
            SourcePolicy::Directory {
                path: dir.path().to_path_buf(),
                fallback_urls: vec![],
            },
        );

        let documents = resolve_sources(&config, &http(), Some("Test Product"))
            .await
            .unwrap()
            .unwrap();
        let names: Vec<&str> = documents.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["C.PDF", "a.pdf", "b.pdf"]);
    }

    #[tokio::test]
    async fn empty_directory_for_mapped_offer_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(
            "Test Product",
            SourcePolicy::Directory {
                path: dir.path().to_path_buf(),
                fallback_urls: vec![],
            },
        );

        let result = resolve_sources(&config, &http(), Some("Test Product")).await;
        assert!(matches!(
            result,
            Err(FiligranaError::SourceResolution(_))
        ));
    }

    #[tokio::test]
    async fn absent_directory_without_fallback_is_fatal() {
        let config = config_with(
            "Test Product",
            SourcePolicy::Directory {
                path: "/nonexistent/docs".into(),
                fallback_urls: vec![],
            },
        );

        let result = resolve_sources(&config, &http(), Some("Test Product")).await;
        assert!(matches!(
            result,
            Err(FiligranaError::SourceResolution(_))
        ));
    }
}
