//! Input-image loading and validation.
//!
//! An image is accepted only when its extension is on the allow-list, its
//! magic bytes agree, and it fits under the configured size cap. Checking
//! content as well as extension catches the classic misnamed file (a PDF
//! renamed to `.jpg`) before any money is spent on a model call.

use crate::error::ItemError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Extensions the pipeline accepts, lowercase.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// A validated image ready for the model call.
#[derive(Debug, Clone)]
pub struct SourceImage {
    /// Display name used in prompts, logs, and result records.
    pub display_name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

/// Read one image from disk, enforcing extension, content, and size checks.
pub async fn load_image(path: &Path, max_bytes: u64) -> Result<SourceImage, ItemError> {
    let display_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let source_err = |detail: String| ItemError::Source {
        source: display_name.clone(),
        detail,
    };

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(source_err(format!(
            "unsupported extension '.{ext}' (supported: {})",
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| source_err(format!("cannot read file: {e}")))?;
    if !metadata.is_file() {
        return Err(source_err("not a regular file".into()));
    }
    if metadata.len() > max_bytes {
        return Err(source_err(format!(
            "file is {} bytes, over the {} byte limit",
            metadata.len(),
            max_bytes
        )));
    }

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| source_err(format!("cannot read file: {e}")))?;

    let mime = sniff_mime(&bytes)
        .ok_or_else(|| source_err("content is not a recognised image format".into()))?;

    debug!(
        "Loaded '{}': {} bytes, {}",
        display_name,
        bytes.len(),
        mime
    );
    Ok(SourceImage {
        display_name,
        mime,
        bytes,
    })
}

/// Identify the image format from its magic bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    None
}

/// Collect supported images under a directory, sorted by path so batch order
/// is deterministic regardless of directory enumeration order.
pub fn find_images(dir: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    collect_images(dir, recursive, &mut found)?;
    found.sort();
    Ok(found)
}

fn collect_images(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            if recursive {
                collect_images(&path, recursive, out)?;
            }
            continue;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ItemError;

    const PNG_HEADER: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn sniffs_known_formats() {
        assert_eq!(sniff_mime(&PNG_HEADER), Some("image/png"));
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));

        let mut webp = b"RIFF".to_vec();
        webp.extend_from_slice(&[0, 0, 0, 0]);
        webp.extend_from_slice(b"WEBP");
        assert_eq!(sniff_mime(&webp), Some("image/webp"));

        assert_eq!(sniff_mime(b"%PDF-1.4"), None);
    }

    #[tokio::test]
    async fn rejects_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "scan.pdf", b"%PDF-1.4");

        let err = load_image(&path, 1024).await.unwrap_err();
        assert!(matches!(err, ItemError::Source { .. }));
        assert!(err.to_string().contains("unsupported extension"));
    }

    #[tokio::test]
    async fn rejects_misnamed_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "fake.jpg", b"%PDF-1.4 not an image");

        let err = load_image(&path, 1024).await.unwrap_err();
        assert!(err.to_string().contains("not a recognised image format"));
    }

    #[tokio::test]
    async fn rejects_oversized_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = PNG_HEADER.to_vec();
        bytes.extend(std::iter::repeat(0u8).take(100));
        let path = write_file(dir.path(), "big.png", &bytes);

        let err = load_image(&path, 16).await.unwrap_err();
        assert!(err.to_string().contains("byte limit"));
    }

    #[tokio::test]
    async fn rejects_missing_file() {
        let err = load_image(Path::new("/nonexistent/rx.png"), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, ItemError::Source { .. }));
    }

    #[tokio::test]
    async fn loads_valid_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "rx1.png", &PNG_HEADER);

        let image = load_image(&path, 1024).await.unwrap();
        assert_eq!(image.display_name, "rx1.png");
        assert_eq!(image.mime, "image/png");
        assert_eq!(image.bytes.len(), 8);
    }

    #[test]
    fn find_images_is_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "b.jpg", &[0xFF, 0xD8, 0xFF]);
        write_file(dir.path(), "a.png", &PNG_HEADER);
        write_file(dir.path(), "notes.txt", b"hello");

        let found = find_images(dir.path(), false).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.png", "b.jpg"]);
    }

    #[test]
    fn find_images_recurses_when_asked() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("inner");
        std::fs::create_dir(&sub).unwrap();
        write_file(&sub, "deep.png", &PNG_HEADER);
        write_file(dir.path(), "top.png", &PNG_HEADER);

        assert_eq!(find_images(dir.path(), false).unwrap().len(), 1);
        assert_eq!(find_images(dir.path(), true).unwrap().len(), 2);
    }
}
