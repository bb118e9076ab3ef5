// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// Batch processor — drives each source document through
// load → watermark → hash → security band → save → compress, collects
// per-item success/failure, and hands the survivors to the packager.
//
// Documents within one event are processed strictly sequentially: PDF
// parsing and stamp rendering are memory-heavy, and bounding per-event
// concurrency to one keeps peak usage flat under bursty webhook traffic.
// Events themselves run as independent detached tasks with no shared
// mutable state.

use std::path::Path;
use std::sync::{Arc, Mutex};

use filigrana_core::config::AppConfig;
use filigrana_core::error::{FiligranaError, Result};
use filigrana_core::types::{
    EventId, ProcessedOutput, PurchaseEvent, SourceDocument, WatermarkText,
};
use filigrana_delivery::packager::{deliver, DeliveryReport};
use filigrana_delivery::transport::MailTransport;
use filigrana_document::compress;
use filigrana_document::overlay::OverlayRenderer;
use filigrana_document::pdf::PdfStore;
use filigrana_document::{add_security_features, apply_central_watermark};
use filigrana_trace::audit::AuditLog;
use filigrana_trace::integrity::hash_bytes;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Name of the audit database inside the data directory.
const AUDIT_DB: &str = "delivery.db";

/// Subdirectory of the data directory holding per-run temp storage.
const RUNS_DIR: &str = "runs";

/// How one webhook event ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The offer is not mapped to any source policy; acknowledged no-op.
    Unmapped,
    /// Sources were processed and handed to the transport.
    Delivered(DeliveryReport),
}

/// The per-event processing pipeline.
///
/// Constructed once at startup and shared (via `Arc`) by all webhook
/// connections. The audit connection is `Send` but not `Sync`, hence the
/// mutex; contention is negligible next to the PDF work.
pub struct Pipeline {
    config: AppConfig,
    http: reqwest::Client,
    transport: Arc<dyn MailTransport>,
    audit: Mutex<AuditLog>,
}

impl Pipeline {
    /// Initialise the pipeline: temp storage, audit database, HTTP client.
    pub fn new(config: AppConfig, transport: Arc<dyn MailTransport>) -> Result<Self> {
        let data_dir = &config.pipeline.data_dir;
        std::fs::create_dir_all(data_dir.join(RUNS_DIR))?;

        let audit = AuditLog::open(data_dir.join(AUDIT_DB))?;

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| FiligranaError::Config(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http,
            transport,
            audit: Mutex::new(audit),
        })
    }

    /// Run one event as a detached background task.
    ///
    /// The webhook handler has already answered 200 by the time this runs;
    /// failures are terminal for the event and observable only through
    /// logs and the audit trail.
    pub fn spawn(self: &Arc<Self>, event: PurchaseEvent) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            match pipeline.process_event(&event).await {
                Ok(ProcessOutcome::Unmapped) => {}
                Ok(ProcessOutcome::Delivered(report)) => {
                    info!(
                        email = %event.email,
                        groups = report.groups,
                        sent = report.sent,
                        "event processed"
                    );
                }
                Err(e) => {
                    error!(email = %event.email, error = %e, "background processing failed");
                }
            }
        });
    }

    /// Process one purchase event end to end.
    #[instrument(skip_all, fields(email = %event.email, offer = event.offer_title.as_deref().unwrap_or("-")))]
    pub async fn process_event(&self, event: &PurchaseEvent) -> Result<ProcessOutcome> {
        let sources = match crate::sources::resolve_sources(
            &self.config,
            &self.http,
            event.offer_title.as_deref(),
        )
        .await?
        {
            Some(sources) => sources,
            None => return Ok(ProcessOutcome::Unmapped),
        };

        let event_id = EventId::new();
        let run_dir = self
            .config
            .pipeline
            .data_dir
            .join(RUNS_DIR)
            .join(event_id.to_string());
        std::fs::create_dir_all(&run_dir)?;

        let text = WatermarkText::for_event(event);

        // Strictly sequential per-document chain; one failure skips only
        // that document.
        let mut outputs: Vec<ProcessedOutput> = Vec::new();
        let mut hashes: Vec<String> = Vec::new();
        for source in &sources {
            match self.process_document(&run_dir, &text, source).await {
                Ok((output, hash)) => {
                    self.audit("process", &hash, &event.email, true, Some(&output.name));
                    outputs.push(output);
                    hashes.push(hash);
                }
                Err(e) => {
                    warn!(source = %source.name, error = %e, "document failed; continuing batch");
                    self.audit(
                        "process",
                        "-",
                        &event.email,
                        false,
                        Some(&format!("{}: {e}", source.name)),
                    );
                }
            }
        }

        if outputs.is_empty() {
            return Err(FiligranaError::EmptyBatch(format!(
                "all {} source document(s) failed",
                sources.len()
            )));
        }

        let report = deliver(
            self.transport.as_ref(),
            self.config.pipeline.attachment_budget_bytes,
            &event.email,
            &outputs,
        )
        .await?;

        let all_sent = report.sent == report.groups;
        let details = format!("{}/{} groups sent", report.sent, report.groups);
        for hash in &hashes {
            self.audit("send", hash, &event.email, all_sent, Some(&details));
        }

        if all_sent {
            if let Err(e) = std::fs::remove_dir_all(&run_dir) {
                warn!(run_dir = %run_dir.display(), error = %e, "temp cleanup failed");
            }
        } else {
            // Keep the artifacts around for manual inspection.
            warn!(run_dir = %run_dir.display(), "partial delivery; keeping temp files");
        }

        Ok(ProcessOutcome::Delivered(report))
    }

    /// Run one source document through the stamping chain.
    ///
    /// Returns the final on-disk output plus the content hash displayed on
    /// its security band.
    async fn process_document(
        &self,
        run_dir: &Path,
        text: &WatermarkText,
        source: &SourceDocument,
    ) -> Result<(ProcessedOutput, String)> {
        let stem = safe_stem(&source.name);

        // The incoming bytes always touch disk first: the sanitizer is an
        // external process, and the raw copy doubles as debugging evidence
        // when a document fails mid-chain.
        let src_path = run_dir.join(format!("{stem}.src.pdf"));
        std::fs::write(&src_path, &source.bytes)?;

        let input_bytes = match compress::sanitize(&self.config.pipeline, &src_path).await {
            Some(clean_path) => std::fs::read(&clean_path)?,
            None => source.bytes.clone(),
        };

        // CPU-heavy section: parse, stamp, hash, band, serialise.
        let stage_text = text.clone();
        let (final_bytes, hash) = tokio::task::spawn_blocking(
            move || -> Result<(Vec<u8>, String)> {
                let renderer = OverlayRenderer::new();

                let mut store = PdfStore::from_bytes(&input_bytes)?;
                apply_central_watermark(&mut store, &renderer, &stage_text)?;
                let watermarked = store.save_to_bytes()?;

                // The hash covers exactly the watermarked bytes — computed
                // before the band so the band can display it.
                let hash = hash_bytes(&watermarked);

                let mut store = PdfStore::from_bytes(&watermarked)?;
                add_security_features(&mut store, &renderer, &stage_text, &hash)?;
                Ok((store.save_to_bytes()?, hash))
            },
        )
        .await
        .map_err(|e| FiligranaError::PdfError(format!("document worker failed: {e}")))??;

        let final_path = run_dir.join(format!("{stem}_{}.pdf", Uuid::new_v4().simple()));
        std::fs::write(&final_path, &final_bytes)?;
        let size = final_bytes.len() as u64;

        let (ship_path, ship_size) =
            compress::maybe_compress(&self.config.pipeline, &final_path, size).await;

        let attachment_name = Path::new(&source.name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{stem}.pdf"));

        Ok((
            ProcessedOutput {
                path: ship_path,
                name: attachment_name,
                size: ship_size,
            },
            hash,
        ))
    }

    /// Record an audit entry; failures are logged and swallowed — the
    /// audit trail must never take the pipeline down.
    fn audit(&self, action: &str, hash: &str, recipient: &str, success: bool, details: Option<&str>) {
        match self.audit.lock() {
            Ok(log) => {
                if let Err(e) = log.record(action, hash, recipient, success, details) {
                    error!(error = %e, "failed to record audit entry");
                }
            }
            Err(_) => error!("audit lock poisoned"),
        }
    }
}

/// A filesystem-safe stem derived from a logical document name. Keeps the
/// basename only and replaces anything outside a conservative character
/// set, so hostile names cannot escape the run directory.
fn safe_stem(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let cleaned: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "document".to_string()
    } else {
        cleaned
    }
}
