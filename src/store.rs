//! Durable persistence of extraction results.
//!
//! ## Layout
//!
//! ```text
//! <output>/<safe-id>/results.json   full ProcessingResult for one image
//! <output>/<safe-id>/summary.json   lightweight per-item summary
//! <output>/summary.json             batch aggregate
//! <log>/debug/<stamp>_<id>_attemptN.json   raw malformed model output
//! <log>/ocr/<stamp>_<id>.txt               transcription text
//! ```
//!
//! Debug artifacts live in their own namespace so tooling that walks the
//! results directory never mistakes a raw model dump for a valid record.
//!
//! ## Concurrency
//!
//! Batch workers write concurrently to distinct identifiers with no locking.
//! Every write goes to a unique temporary path and is renamed into place, so
//! a partially written file is never observable under its final name; if two
//! workers ever race on the same identifier the last rename wins whole.

use crate::record::{BatchSummary, ParsedPrescription, ProcessingResult};
use chrono::Utc;
use serde_json::json;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

const RESULTS_FILENAME: &str = "results.json";
const SUMMARY_FILENAME: &str = "summary.json";
const DEBUG_SUBDIR: &str = "debug";
const OCR_SUBDIR: &str = "ocr";
const SAFE_NAME_MAX: usize = 100;
const DEBUG_BODY_MAX: usize = 5000;
const UNKNOWN_FALLBACK: &str = "unknown";

/// Filesystem store for per-item results, batch summaries, and debug dumps.
#[derive(Debug, Clone)]
pub struct ResultStore {
    output_dir: PathBuf,
    log_dir: PathBuf,
}

impl ResultStore {
    pub fn new(output_dir: impl AsRef<Path>, log_dir: impl AsRef<Path>) -> Self {
        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            log_dir: log_dir.as_ref().to_path_buf(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Directory a given identifier's artifacts land in.
    pub fn item_dir(&self, identifier: &str) -> PathBuf {
        self.output_dir.join(safe_identifier(identifier))
    }

    /// Persist the full result for one image under its item directory.
    pub async fn save_item(
        &self,
        identifier: &str,
        result: &ProcessingResult,
    ) -> io::Result<PathBuf> {
        let path = self.item_dir(identifier).join(RESULTS_FILENAME);
        write_json_atomic(&path, result).await?;
        debug!("Saved result for '{}' to {}", identifier, path.display());
        Ok(path)
    }

    /// Persist the lightweight per-item summary next to the full result.
    pub async fn save_item_summary(
        &self,
        identifier: &str,
        result: &ProcessingResult,
    ) -> io::Result<PathBuf> {
        let summary = json!({
            "timestamp": Utc::now(),
            "success": result.is_success(),
            "source_file": identifier,
            "error": result.error(),
            "elapsed_ms": result.elapsed_ms(),
            "medicines_count": result.medicines_count(),
        });
        let path = self.item_dir(identifier).join(SUMMARY_FILENAME);
        write_json_atomic(&path, &summary).await?;
        Ok(path)
    }

    /// Persist the batch aggregate at the top of the output directory.
    pub async fn save_batch_summary(&self, summary: &BatchSummary) -> io::Result<PathBuf> {
        let path = self.output_dir.join(SUMMARY_FILENAME);
        write_json_atomic(&path, summary).await?;
        debug!("Saved batch summary to {}", path.display());
        Ok(path)
    }

    /// Dump a raw malformed model response for offline inspection.
    ///
    /// Written to the debug namespace, keyed by identifier and attempt
    /// number, with the body capped so a runaway response cannot fill the disk.
    pub async fn save_debug_artifact(
        &self,
        identifier: &str,
        attempt: u32,
        raw_body: &str,
        error: &str,
    ) -> io::Result<PathBuf> {
        let now = Utc::now();
        let filename = format!(
            "{}_{}_attempt{}.json",
            now.format("%Y%m%d_%H%M%S"),
            safe_identifier(identifier),
            attempt,
        );
        let artifact = json!({
            "error": error,
            "source_file": identifier,
            "attempt": attempt,
            "timestamp": now,
            "raw_response": truncate_chars(raw_body, DEBUG_BODY_MAX),
        });
        let path = self.log_dir.join(DEBUG_SUBDIR).join(filename);
        write_json_atomic(&path, &artifact).await?;
        debug!("Saved debug artifact to {}", path.display());
        Ok(path)
    }

    /// Log the transcription text of a successful extraction.
    pub async fn save_ocr_text(&self, prescription: &ParsedPrescription) -> io::Result<PathBuf> {
        let source = prescription.source_file.as_deref().unwrap_or(UNKNOWN_FALLBACK);
        let filename = format!(
            "{}_{}.txt",
            Utc::now().format("%Y%m%d_%H%M%S"),
            safe_identifier(source),
        );
        let path = self.log_dir.join(OCR_SUBDIR).join(filename);
        let text = prescription.ocr_text.as_deref().unwrap_or("");
        write_atomic(&path, text.as_bytes()).await?;
        Ok(path)
    }
}

/// Derive a deterministic, filesystem-safe directory name from a source
/// identifier: drop the extension, case-fold, replace anything outside
/// `[a-z0-9._-]`, trim leading dots (no traversal), truncate, and fall back
/// to "unknown" when nothing survives.
pub fn safe_identifier(source: &str) -> String {
    let stem = Path::new(source)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(source);

    let safe: String = stem
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(SAFE_NAME_MAX)
        .collect();

    let safe = safe.trim_start_matches('.').to_string();
    if safe.is_empty() {
        UNKNOWN_FALLBACK.to_string()
    } else {
        safe
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Serialize to pretty JSON and write atomically.
async fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> io::Result<PathBuf> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_atomic(path, &body).await?;
    Ok(path.to_path_buf())
}

/// Write to a unique temporary sibling, then rename into place.
///
/// Rename within one directory is atomic on every supported platform, so a
/// reader either sees the previous complete file or the new complete file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let nonce = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp = path.with_extension(format!("tmp.{}.{}", std::process::id(), nonce));
    tokio::fs::write(&tmp, bytes).await?;
    match tokio::fs::rename(&tmp, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            // Best effort: do not leave the temp file behind on failure.
            let _ = tokio::fs::remove_file(&tmp).await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ItemError;
    use crate::record::{ParsedPrescription, PrescriptionMeta};

    fn store(dir: &tempfile::TempDir) -> ResultStore {
        ResultStore::new(dir.path().join("results"), dir.path().join("logs"))
    }

    fn failure_result() -> ProcessingResult {
        let err = ItemError::Source {
            source: "rx.png".into(),
            detail: "no such file".into(),
        };
        ProcessingResult::failure(&err, 10)
    }

    #[test]
    fn safe_identifier_folds_and_replaces() {
        assert_eq!(safe_identifier("Rx Scan #1.JPG"), "rx_scan__1");
        assert_eq!(safe_identifier("simple.png"), "simple");
        assert_eq!(safe_identifier("keep-these._ok.webp"), "keep-these._ok");
    }

    #[test]
    fn safe_identifier_blocks_traversal() {
        let safe = safe_identifier("../../etc/passwd");
        assert!(!safe.contains('/'));
        assert!(!safe.starts_with('.'));

        assert_eq!(safe_identifier(""), "unknown");
        assert_eq!(safe_identifier("..."), "unknown");
    }

    #[test]
    fn safe_identifier_truncates() {
        let long = "a".repeat(500);
        assert_eq!(safe_identifier(&long).len(), SAFE_NAME_MAX);
    }

    #[tokio::test]
    async fn save_item_writes_under_safe_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let path = store
            .save_item("My Scan.jpg", &failure_result())
            .await
            .unwrap();
        assert!(path.ends_with("my_scan/results.json"));
        assert!(path.exists());

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["status"], "failure");
    }

    #[tokio::test]
    async fn atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store.save_item("a.jpg", &failure_result()).await.unwrap();
        store
            .save_item_summary("a.jpg", &failure_result())
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(store.item_dir("a.jpg"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert!(entries.iter().all(|n| !n.contains("tmp")), "{entries:?}");
    }

    #[tokio::test]
    async fn debug_artifact_is_namespaced_and_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let huge = "x".repeat(20_000);
        let path = store
            .save_debug_artifact("rx1.jpg", 3, &huge, "schema mismatch")
            .await
            .unwrap();

        assert!(path.to_string_lossy().contains("debug"));
        assert!(path.to_string_lossy().contains("attempt3"));
        assert!(!path.starts_with(store.output_dir()));

        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["raw_response"].as_str().unwrap().len(), 5000);
        assert_eq!(value["error"], "schema mismatch");
    }

    #[tokio::test]
    async fn ocr_text_lands_in_log_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let prescription = ParsedPrescription {
            prescription_meta: PrescriptionMeta::default(),
            medicines: vec![],
            ocr_text: Some("Amoxicillin 500mg TID".into()),
            source_file: Some("rx1.jpg".into()),
            languages_detected: vec![],
        };
        let path = store.save_ocr_text(&prescription).await.unwrap();
        assert!(path.to_string_lossy().contains("ocr"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Amoxicillin 500mg TID"
        );
    }
}
