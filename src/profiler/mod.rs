//! Per-request profiling
//!
//! A request's lifetime is bracketed by a profiling session: CPU sampling
//! starts when the request enters the pipeline, and when the response is
//! done the session stops sampling, takes a heap snapshot, and exports both
//! artifacts to the profiles directory. Sessions are tracked in a registry
//! keyed by a request-unique label so that overlapping requests never step
//! on each other's capture state.

pub mod artifact;
pub mod backend;
pub mod lag;
pub mod session;

pub use artifact::{ArtifactKind, ArtifactWriter, ProfileArtifact};
pub use backend::{PprofBackend, ProfilerBackend};
pub use session::{ActiveSession, CapturedArtifacts, SessionRegistry, SessionState};

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// The full per-request profiling stack: session registry plus artifact
/// writer, shared by the middleware across all in-flight requests.
pub struct RequestProfiler {
    registry: SessionRegistry,
    writer: ArtifactWriter,
}

impl RequestProfiler {
    /// Build a profiler over the given capture backend, exporting artifacts
    /// into `profiles_dir`.
    pub fn new(backend: Arc<dyn ProfilerBackend>, profiles_dir: PathBuf) -> Self {
        Self {
            registry: SessionRegistry::new(backend),
            writer: ArtifactWriter::new(profiles_dir),
        }
    }

    /// Start a profiling session for a request to `path`.
    pub async fn begin(&self, path: &str) -> Result<ActiveSession, crate::core::ProfilerError> {
        self.registry.begin(path).await
    }

    /// Finish a session: stop sampling, snapshot the heap, export both
    /// artifacts, and release the session. Every failure along the way is
    /// logged and contained; release happens unconditionally.
    pub async fn finish(&self, session: ActiveSession) {
        let captured = self.registry.capture(&session).await;

        let path = session.request_path().to_owned();
        let (cpu_saved, memory_saved) = tokio::join!(
            self.export(&path, captured.cpu),
            self.export(&path, captured.memory),
        );

        if cpu_saved || memory_saved {
            self.registry.mark_exported(&session);
        }

        self.registry.release(session);
    }

    async fn export(&self, request_path: &str, artifact: Option<ProfileArtifact>) -> bool {
        let Some(artifact) = artifact else {
            return false;
        };

        let kind = artifact.kind;
        match self.writer.write(request_path, artifact).await {
            Ok(path) => {
                info!(kind = %kind, path = %path.display(), "profile artifact saved");
                true
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "failed to export profile artifact");
                false
            }
        }
    }

    /// Number of sessions currently active, for diagnostics and tests.
    pub fn active_sessions(&self) -> usize {
        self.registry.active_count()
    }
}
