//! Profile artifacts and the writer that persists them
//!
//! File names derive from the sanitized request path plus a per-kind
//! suffix. The name is deliberately not request-unique: repeated requests
//! to the same path overwrite the previous artifact pair, keeping the
//! directory bounded by the set of distinct paths served.

use crate::core::ProfilerError;
use std::fmt;
use std::path::{Path, PathBuf};

/// The two kinds of artifact a session produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Sampled call-stack profile over the request's lifetime
    Cpu,
    /// Point-in-time snapshot of the process heap
    Memory,
}

impl ArtifactKind {
    /// File suffix for this artifact kind.
    pub fn suffix(&self) -> &'static str {
        match self {
            ArtifactKind::Cpu => "_cpu.cpuprofile",
            ArtifactKind::Memory => "_memory.heapsnapshot",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Cpu => write!(f, "cpu"),
            ArtifactKind::Memory => write!(f, "memory"),
        }
    }
}

/// A captured profile ready to be persisted. The byte layout is whatever
/// the backend produced; the writer only moves it to disk.
pub struct ProfileArtifact {
    /// Which capture produced these bytes
    pub kind: ArtifactKind,
    /// Serialized profile payload
    pub bytes: Vec<u8>,
}

/// Replace path separators so a request path maps to a single flat file
/// name rather than a directory tree: `"/work"` becomes `"_work"`.
pub fn sanitize_path(request_path: &str) -> String {
    request_path.replace('/', "_")
}

/// Persists profile artifacts into a target directory.
///
/// The directory is created once at process start; writes are full
/// overwrites of the target path.
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    /// Create a writer targeting `dir`.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The directory this writer persists into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Target file path for an artifact of `kind` triggered by a request to
    /// `request_path`.
    pub fn file_path(&self, request_path: &str, kind: ArtifactKind) -> PathBuf {
        self.dir
            .join(format!("{}{}", sanitize_path(request_path), kind.suffix()))
    }

    /// Persist an artifact, consuming it. Returns the written path.
    pub async fn write(
        &self,
        request_path: &str,
        artifact: ProfileArtifact,
    ) -> Result<PathBuf, ProfilerError> {
        let path = self.file_path(request_path, artifact.kind);

        tokio::fs::write(&path, &artifact.bytes)
            .await
            .map_err(|source| ProfilerError::Export {
                path: path.clone(),
                source,
            })?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("/"), "_");
        assert_eq!(sanitize_path("/work"), "_work");
        assert_eq!(sanitize_path("/api/v1/items"), "_api_v1_items");
    }

    #[test]
    fn test_file_naming() {
        let writer = ArtifactWriter::new(PathBuf::from("/tmp/profiles"));
        assert_eq!(
            writer.file_path("/work", ArtifactKind::Cpu),
            PathBuf::from("/tmp/profiles/_work_cpu.cpuprofile")
        );
        assert_eq!(
            writer.file_path("/work", ArtifactKind::Memory),
            PathBuf::from("/tmp/profiles/_work_memory.heapsnapshot")
        );
    }

    #[tokio::test]
    async fn test_write_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path().to_path_buf());

        let first = ProfileArtifact {
            kind: ArtifactKind::Cpu,
            bytes: b"first".to_vec(),
        };
        let path = writer.write("/work", first).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"first");

        let second = ProfileArtifact {
            kind: ArtifactKind::Cpu,
            bytes: b"second".to_vec(),
        };
        let again = writer.write("/work", second).await.unwrap();
        assert_eq!(again, path);
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_write_into_missing_directory_fails() {
        let writer = ArtifactWriter::new(PathBuf::from("/nonexistent/profiles"));
        let artifact = ProfileArtifact {
            kind: ArtifactKind::Memory,
            bytes: b"payload".to_vec(),
        };

        let err = writer.write("/work", artifact).await.unwrap_err();
        assert!(matches!(err, ProfilerError::Export { .. }));
    }
}
