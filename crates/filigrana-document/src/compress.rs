// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Filigrana Contributors
//
// External sanitizer/compressor boundary.
//
// Both tools run as subprocesses with argument lists — paths are never
// interpolated into a shell string, so hostile filenames cannot inject
// commands. Every failure mode here (missing binary, non-zero exit,
// timeout, missing or not-smaller output) is an expected code path: the
// pipeline falls back to the pre-transform bytes and carries on.

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use filigrana_core::config::PipelineConfig;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Suffix for compressor output files.
const COMPRESSED_EXT: &str = "opt.pdf";

/// Suffix for sanitizer output files.
const SANITIZED_EXT: &str = "clean.pdf";

/// Run a tool with a deadline. `Err` covers spawn failures and timeouts;
/// a non-zero exit comes back as `Ok` with the status for the caller to
/// inspect.
async fn run_tool(program: &str, args: &[String], deadline: Duration) -> std::io::Result<Output> {
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);

    match tokio::time::timeout(deadline, command.output()).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("{program} exceeded {}s deadline", deadline.as_secs()),
        )),
    }
}

/// Normalise a PDF through the configured external sanitizer.
///
/// Returns the sanitized file's path when the tool succeeds, `None` when no
/// sanitizer is configured or anything about the invocation fails.
pub async fn sanitize(config: &PipelineConfig, input: &Path) -> Option<PathBuf> {
    let template = config.sanitizer_command.as_ref()?;
    let (program, arg_template) = template.split_first()?;

    let output_path = input.with_extension(SANITIZED_EXT);
    let args: Vec<String> = arg_template
        .iter()
        .map(|arg| match arg.as_str() {
            "{input}" => input.display().to_string(),
            "{output}" => output_path.display().to_string(),
            other => other.to_string(),
        })
        .collect();

    let deadline = Duration::from_secs(config.tool_timeout_secs);
    match run_tool(program, &args, deadline).await {
        Ok(result) if result.status.success() => {
            match std::fs::metadata(&output_path) {
                Ok(meta) if meta.len() > 0 => {
                    debug!(output = %output_path.display(), "sanitizer produced output");
                    Some(output_path)
                }
                _ => {
                    warn!(tool = program, "sanitizer exited cleanly but produced no output");
                    None
                }
            }
        }
        Ok(result) => {
            warn!(
                tool = program,
                status = %result.status,
                stderr = %String::from_utf8_lossy(&result.stderr),
                "sanitizer failed; keeping original"
            );
            None
        }
        Err(e) => {
            warn!(tool = program, error = %e, "sanitizer unavailable; keeping original");
            None
        }
    }
}

/// Compress `input` with Ghostscript when it exceeds the configured size
/// threshold.
///
/// Returns the path and size the caller should ship. The compressed
/// artifact is used only when it is strictly smaller than the input —
/// compression must never produce a larger attachment.
pub async fn maybe_compress(config: &PipelineConfig, input: &Path, size: u64) -> (PathBuf, u64) {
    if size <= config.compress_threshold_bytes {
        return (input.to_path_buf(), size);
    }

    info!(
        input = %input.display(),
        size,
        threshold = config.compress_threshold_bytes,
        "output oversized; invoking compressor"
    );

    let output_path = input.with_extension(COMPRESSED_EXT);
    let args = vec![
        "-sDEVICE=pdfwrite".to_string(),
        "-dCompatibilityLevel=1.4".to_string(),
        "-dPDFSETTINGS=/ebook".to_string(),
        "-dNOPAUSE".to_string(),
        "-dQUIET".to_string(),
        "-dBATCH".to_string(),
        format!("-sOutputFile={}", output_path.display()),
        input.display().to_string(),
    ];

    let deadline = Duration::from_secs(config.tool_timeout_secs);
    match run_tool(&config.ghostscript_bin, &args, deadline).await {
        Ok(result) if result.status.success() => match std::fs::metadata(&output_path) {
            Ok(meta) if meta.len() > 0 && meta.len() < size => {
                info!(
                    compressed = %output_path.display(),
                    before = size,
                    after = meta.len(),
                    "compression accepted"
                );
                (output_path, meta.len())
            }
            Ok(meta) => {
                warn!(
                    before = size,
                    after = meta.len(),
                    "compressed result not smaller; keeping original"
                );
                (input.to_path_buf(), size)
            }
            Err(e) => {
                warn!(error = %e, "compressor produced no readable output; keeping original");
                (input.to_path_buf(), size)
            }
        },
        Ok(result) => {
            warn!(
                status = %result.status,
                stderr = %String::from_utf8_lossy(&result.stderr),
                "compressor failed; keeping original"
            );
            (input.to_path_buf(), size)
        }
        Err(e) => {
            warn!(error = %e, "compressor unavailable; keeping original");
            (input.to_path_buf(), size)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(ghostscript: &str, threshold: u64) -> PipelineConfig {
        PipelineConfig {
            ghostscript_bin: ghostscript.into(),
            compress_threshold_bytes: threshold,
            ..PipelineConfig::default()
        }
    }

    fn write_input(dir: &tempfile::TempDir, len: usize) -> PathBuf {
        let path = dir.path().join("document.pdf");
        std::fs::write(&path, vec![0u8; len]).unwrap();
        path
    }

    #[tokio::test]
    async fn under_threshold_skips_the_compressor_entirely() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, 100);
        // A nonexistent binary proves the tool is never invoked.
        let config = config_with("/nonexistent/ghostscript", 1000);

        let (path, size) = maybe_compress(&config, &input, 100).await;
        assert_eq!(path, input);
        assert_eq!(size, 100);
    }

    #[tokio::test]
    async fn missing_binary_falls_back_to_original() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, 100);
        let config = config_with("/nonexistent/ghostscript", 10);

        let (path, size) = maybe_compress(&config, &input, 100).await;
        assert_eq!(path, input);
        assert_eq!(size, 100);
    }

    #[tokio::test]
    async fn clean_exit_without_output_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, 100);
        // `true` exits 0 but writes nothing.
        let config = config_with("true", 10);

        let (path, _) = maybe_compress(&config, &input, 100).await;
        assert_eq!(path, input);
    }

    #[tokio::test]
    async fn larger_output_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, 100);
        // Pre-seed the output path with a LARGER artifact; the exit-0 tool
        // leaves it in place, and the strictly-smaller rule must reject it.
        std::fs::write(input.with_extension(COMPRESSED_EXT), vec![1u8; 200]).unwrap();
        let config = config_with("true", 10);

        let (path, size) = maybe_compress(&config, &input, 100).await;
        assert_eq!(path, input);
        assert_eq!(size, 100);
    }

    #[tokio::test]
    async fn smaller_output_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, 100);
        std::fs::write(input.with_extension(COMPRESSED_EXT), vec![1u8; 40]).unwrap();
        let config = config_with("true", 10);

        let (path, size) = maybe_compress(&config, &input, 100).await;
        assert_eq!(path, input.with_extension(COMPRESSED_EXT));
        assert_eq!(size, 40);
    }

    #[tokio::test]
    async fn sanitizer_copies_through_placeholder_substitution() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, 64);
        let config = PipelineConfig {
            sanitizer_command: Some(vec![
                "cp".into(),
                "{input}".into(),
                "{output}".into(),
            ]),
            ..PipelineConfig::default()
        };

        let sanitized = sanitize(&config, &input).await.expect("sanitizer output");
        assert_eq!(sanitized, input.with_extension(SANITIZED_EXT));
        assert_eq!(std::fs::read(&sanitized).unwrap(), vec![0u8; 64]);
    }

    #[tokio::test]
    async fn sanitizer_absent_or_failing_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let input = write_input(&dir, 64);

        let unconfigured = PipelineConfig::default();
        assert!(sanitize(&unconfigured, &input).await.is_none());

        let failing = PipelineConfig {
            sanitizer_command: Some(vec!["false".into(), "{input}".into()]),
            ..PipelineConfig::default()
        };
        assert!(sanitize(&failing, &input).await.is_none());
    }
}
