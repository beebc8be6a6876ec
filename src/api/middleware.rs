//! Profiling middleware
//!
//! Wraps every request in a profiling session. The session handle lives in
//! a drop guard, so cleanup runs exactly once on every termination path:
//! normal completion, handler error, and client disconnect (axum drops the
//! in-flight middleware future on abort, which drops the guard).

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::{info, warn};

use super::server::AppState;
use crate::profiler::{ActiveSession, RequestProfiler};

/// Owns one request's session and finishes it on drop.
struct SessionGuard {
    profiler: Arc<RequestProfiler>,
    session: Option<ActiveSession>,
}

impl SessionGuard {
    fn new(profiler: Arc<RequestProfiler>, session: ActiveSession) -> Self {
        Self {
            profiler,
            session: Some(session),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let profiler = Arc::clone(&self.profiler);
            // Drop cannot await; the finish sequence (stop, snapshot,
            // export) runs as its own task and never blocks the pipeline.
            tokio::spawn(async move {
                profiler.finish(session).await;
            });
        }
    }
}

/// Start a session before the handler runs and finish it once the response
/// is produced. Profiling failures never alter the response.
pub async fn profile_request(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(profiler) = state.profiler.clone() else {
        return next.run(request).await;
    };

    let path = request.uri().path().to_owned();
    info!(%path, "starting CPU profiling for request");

    let _guard = match profiler.begin(&path).await {
        Ok(session) => Some(SessionGuard::new(profiler, session)),
        Err(e) => {
            warn!(%path, error = %e, "could not start profiling session, request proceeds unprofiled");
            None
        }
    };

    next.run(request).await
}
