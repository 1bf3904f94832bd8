//! Source media handed to the compressor and the compressed result.

use std::path::Path;

use crate::error::TranscodeError;

pub const COMPRESSED_SUFFIX: &str = "_compressed";
pub const OUTPUT_EXTENSION: &str = "mp4";
const FALLBACK_STEM: &str = "video";

/// Input bytes plus the file name they came from. Never mutated by the compressor.
#[derive(Debug, Clone)]
pub struct MediaSource {
    name: String,
    bytes: Vec<u8>,
}

impl MediaSource {
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Reads a file from disk. An unreadable path is an invalid request, not an I/O failure.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, TranscodeError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            TranscodeError::invalid_request(format!(
                "cannot read source {}: {}",
                path.display(),
                e
            ))
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self { name, bytes })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lowercase alphanumeric extension of the source name, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(str::to_ascii_lowercase)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedMedia {
    pub file_name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

impl CompressedMedia {
    pub fn new(source_name: &str, bytes: Vec<u8>) -> Self {
        let file_name = compressed_file_name(source_name);
        let mime_type = mime_type_for(&file_name);
        Self {
            file_name,
            mime_type,
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub async fn write_to(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        tokio::fs::write(path, &self.bytes).await
    }
}

/// `clip.mov` -> `clip_compressed.mp4`. Directory components are dropped.
pub fn compressed_file_name(input_name: &str) -> String {
    let stem = Path::new(input_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_STEM.to_string());
    format!("{}{}.{}", stem, COMPRESSED_SUFFIX, OUTPUT_EXTENSION)
}

pub fn mime_type_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("mp4") | Some("m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("webm") => "video/webm",
        Some("mkv") => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_name_replaces_extension() {
        assert_eq!(compressed_file_name("clip.mov"), "clip_compressed.mp4");
        assert_eq!(compressed_file_name("clip.mp4"), "clip_compressed.mp4");
    }

    #[test]
    fn compressed_name_keeps_inner_dots() {
        assert_eq!(
            compressed_file_name("holiday.2024.final.MKV"),
            "holiday.2024.final_compressed.mp4"
        );
    }

    #[test]
    fn compressed_name_without_extension() {
        assert_eq!(compressed_file_name("clip"), "clip_compressed.mp4");
    }

    #[test]
    fn compressed_name_strips_directories() {
        assert_eq!(compressed_file_name("uploads/day1/clip.mov"), "clip_compressed.mp4");
    }

    #[test]
    fn compressed_name_falls_back_for_empty_input() {
        assert_eq!(compressed_file_name(""), "video_compressed.mp4");
    }

    #[test]
    fn mime_is_inferred_from_extension() {
        assert_eq!(mime_type_for("a.mp4"), "video/mp4");
        assert_eq!(mime_type_for("a.MOV"), "video/quicktime");
        assert_eq!(mime_type_for("a.webm"), "video/webm");
        assert_eq!(mime_type_for("a"), "application/octet-stream");
    }

    #[test]
    fn compressed_media_from_source_name() {
        let out = CompressedMedia::new("clip.mov", vec![1, 2, 3]);
        assert_eq!(out.file_name, "clip_compressed.mp4");
        assert_eq!(out.mime_type, "video/mp4");
        assert_eq!(out.size(), 3);
    }

    #[test]
    fn source_extension_is_sanitized() {
        assert_eq!(
            MediaSource::from_bytes("Clip.MOV", vec![0]).extension().as_deref(),
            Some("mov")
        );
        assert_eq!(MediaSource::from_bytes("clip", vec![0]).extension(), None);
        assert_eq!(MediaSource::from_bytes("a.m p4", vec![0]).extension(), None);
    }

    #[tokio::test]
    async fn from_path_reads_bytes_and_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.mov");
        std::fs::write(&path, b"abc").unwrap();
        let source = MediaSource::from_path(&path).await.unwrap();
        assert_eq!(source.name(), "sample.mov");
        assert_eq!(source.bytes(), b"abc");
        assert_eq!(source.len(), 3);
    }

    #[tokio::test]
    async fn from_path_missing_file_is_invalid_request() {
        let dir = tempfile::tempdir().unwrap();
        let err = MediaSource::from_path(dir.path().join("missing.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, TranscodeError::InvalidRequest(_)));
    }
}
