//! Request-scoped profiling sessions
//!
//! The registry is the single owner of all in-flight captures. Labels are
//! constructed from the request path plus a monotonically increasing
//! counter, so two concurrent requests to the same path never collide in
//! the backend's session table - the underlying profiler is
//! single-session-per-label and corrupts silently if that is violated.

use crate::core::ProfilerError;
use crate::profiler::artifact::{ArtifactKind, ProfileArtifact};
use crate::profiler::backend::ProfilerBackend;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Lifecycle of one profiling capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// CPU sampling is running
    Started,
    /// Sampling stopped, artifacts captured
    Stopped,
    /// At least one artifact reached disk
    Exported,
    /// Terminal state, set just before the record leaves the registry;
    /// after removal the absence of a record is what "released" looks
    /// like to observers.
    Released,
}

/// Registry-side record of an in-flight session.
struct SessionRecord {
    state: SessionState,
}

/// Handle to a session owned by exactly one request. Holding it is the
/// only way to capture or release the session.
pub struct ActiveSession {
    label: String,
    request_path: String,
    started_at: Instant,
}

impl ActiveSession {
    /// The backend correlation label, unique among concurrently active
    /// sessions.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The request path that triggered this session.
    pub fn request_path(&self) -> &str {
        &self.request_path
    }

    /// When sampling began.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }
}

/// Artifacts captured at session stop. Either side may be absent if its
/// capture failed; failures are logged where they happen.
pub struct CapturedArtifacts {
    /// CPU profile, if sampling stopped cleanly
    pub cpu: Option<ProfileArtifact>,
    /// Heap snapshot, if the dump succeeded
    pub memory: Option<ProfileArtifact>,
}

/// Tracks every active profiling session and mediates all backend access.
pub struct SessionRegistry {
    backend: Arc<dyn ProfilerBackend>,
    active: DashMap<String, SessionRecord>,
    seq: AtomicU64,
}

impl SessionRegistry {
    /// Create a registry over `backend`.
    pub fn new(backend: Arc<dyn ProfilerBackend>) -> Self {
        Self {
            backend,
            active: DashMap::new(),
            seq: AtomicU64::new(0),
        }
    }

    /// Start a session for a request to `path` and begin CPU sampling.
    ///
    /// The label is `path#<counter>`; the counter makes concurrent
    /// identical-path requests safe. The backend call contends on profiler
    /// state that another session's stop may hold while rendering, so it
    /// runs on the blocking pool rather than an executor thread.
    pub async fn begin(&self, path: &str) -> Result<ActiveSession, ProfilerError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let label = format!("{}#{}", path, seq);

        // The counter rules collisions out; a hit here means registry
        // state is corrupt, so refuse rather than clobber.
        if self.active.contains_key(&label) {
            return Err(ProfilerError::LabelInUse { label });
        }

        {
            let backend = Arc::clone(&self.backend);
            let label = label.clone();
            run_blocking(move || backend.start_cpu(&label)).await?;
        }
        self.active.insert(
            label.clone(),
            SessionRecord {
                state: SessionState::Started,
            },
        );

        debug!(%label, "profiling session started");
        Ok(ActiveSession {
            label,
            request_path: path.to_owned(),
            started_at: Instant::now(),
        })
    }

    /// Stop sampling and capture both artifacts for `session`.
    ///
    /// The two captures are independent: a CPU failure never skips the heap
    /// snapshot and vice versa. Capture failures are logged and surface as
    /// `None`. Backend calls block, so they run on the blocking pool.
    pub async fn capture(&self, session: &ActiveSession) -> CapturedArtifacts {
        let cpu = {
            let backend = Arc::clone(&self.backend);
            let label = session.label.clone();
            run_blocking(move || backend.stop_cpu(&label)).await
        };
        self.set_state(&session.label, SessionState::Stopped);

        let memory = {
            let backend = Arc::clone(&self.backend);
            run_blocking(move || backend.heap_snapshot()).await
        };

        CapturedArtifacts {
            cpu: into_artifact(ArtifactKind::Cpu, cpu, &session.label),
            memory: into_artifact(ArtifactKind::Memory, memory, &session.label),
        }
    }

    /// Record that at least one artifact of `session` reached disk.
    pub fn mark_exported(&self, session: &ActiveSession) {
        self.set_state(&session.label, SessionState::Exported);
    }

    /// Remove `session` from the registry. Consumes the handle; the label
    /// becomes reusable and no backend state remains for it.
    pub fn release(&self, session: ActiveSession) {
        self.set_state(&session.label, SessionState::Released);
        let removed = self.active.remove(&session.label);
        debug!(
            label = %session.label,
            final_state = ?removed.map(|(_, record)| record.state),
            elapsed_ms = session.started_at.elapsed().as_millis() as u64,
            "profiling session released"
        );
    }

    /// Number of sessions currently active.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Whether `label` belongs to an active session.
    pub fn is_active(&self, label: &str) -> bool {
        self.active.contains_key(label)
    }

    /// Current state of the session registered under `label`.
    pub fn state(&self, label: &str) -> Option<SessionState> {
        self.active.get(label).map(|record| record.state)
    }

    fn set_state(&self, label: &str, state: SessionState) {
        if let Some(mut record) = self.active.get_mut(label) {
            record.state = state;
        }
    }
}

/// Run a blocking backend call on the blocking pool, folding a cancelled
/// or panicked task into a backend error.
async fn run_blocking<T, F>(f: F) -> Result<T, ProfilerError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ProfilerError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(e) => Err(ProfilerError::backend(format!(
            "capture task failed: {}",
            e
        ))),
    }
}

fn into_artifact(
    kind: ArtifactKind,
    result: Result<Vec<u8>, ProfilerError>,
    label: &str,
) -> Option<ProfileArtifact> {
    match result {
        Ok(bytes) => Some(ProfileArtifact { kind, bytes }),
        Err(e) => {
            warn!(label, kind = %kind, error = %e, "profile capture failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiler::backend::testing::StubBackend;

    #[tokio::test]
    async fn test_concurrent_sessions_get_distinct_labels() {
        let backend = StubBackend::new();
        let registry = SessionRegistry::new(backend.clone());

        let a = registry.begin("/work").await.unwrap();
        let b = registry.begin("/work").await.unwrap();

        assert_ne!(a.label(), b.label());
        assert_eq!(registry.active_count(), 2);
        assert_eq!(backend.started.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_capture_produces_both_artifacts() {
        let backend = StubBackend::new();
        let registry = SessionRegistry::new(backend.clone());

        let session = registry.begin("/work").await.unwrap();
        let captured = registry.capture(&session).await;

        assert_eq!(captured.cpu.unwrap().bytes, b"stub-cpu-profile");
        assert_eq!(captured.memory.unwrap().bytes, b"stub-heap-snapshot");
        assert_eq!(registry.state(session.label()), Some(SessionState::Stopped));
        assert_eq!(backend.stopped.lock().clone(), vec![session.label().to_owned()]);

        registry.release(session);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_cpu_failure_does_not_skip_heap_capture() {
        let backend = StubBackend::failing(true, false);
        let registry = SessionRegistry::new(backend);

        let session = registry.begin("/work").await.unwrap();
        let captured = registry.capture(&session).await;

        assert!(captured.cpu.is_none());
        assert!(captured.memory.is_some());

        registry.release(session);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_heap_failure_does_not_affect_cpu_capture() {
        let backend = StubBackend::failing(false, true);
        let registry = SessionRegistry::new(backend);

        let session = registry.begin("/work").await.unwrap();
        let captured = registry.capture(&session).await;

        assert!(captured.cpu.is_some());
        assert!(captured.memory.is_none());

        registry.release(session);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_release_after_total_capture_failure() {
        let backend = StubBackend::failing(true, true);
        let registry = SessionRegistry::new(backend.clone());

        let session = registry.begin("/work").await.unwrap();
        let label = session.label().to_owned();
        let captured = registry.capture(&session).await;

        assert!(captured.cpu.is_none());
        assert!(captured.memory.is_none());
        // The backend handle was still released.
        assert_eq!(backend.stopped.lock().len(), 1);

        registry.release(session);
        assert!(!registry.is_active(&label));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_begin_does_not_stall_executor_behind_inflight_stop() {
        let backend = StubBackend::with_stop_delay(std::time::Duration::from_millis(200));
        let registry = Arc::new(SessionRegistry::new(backend));

        let first = registry.begin("/work").await.unwrap();

        // Hold the backend lock for 200ms inside a stop.
        let capture = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let _ = registry.capture(&first).await;
                registry.release(first);
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // This begin contends on that lock, but must wait on the blocking
        // pool, leaving the single executor thread free.
        let second = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.begin("/work").await })
        };

        let started = std::time::Instant::now();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(
            started.elapsed() < std::time::Duration::from_millis(150),
            "executor stalled behind an in-flight stop"
        );

        let session = second.await.unwrap().unwrap();
        registry.release(session);
        capture.await.unwrap();
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let backend = StubBackend::new();
        let registry = SessionRegistry::new(backend);

        let session = registry.begin("/").await.unwrap();
        assert_eq!(registry.state(session.label()), Some(SessionState::Started));

        registry.mark_exported(&session);
        assert_eq!(registry.state(session.label()), Some(SessionState::Exported));

        let label = session.label().to_owned();
        registry.release(session);
        assert_eq!(registry.state(&label), None);
    }
}
