//! HTTP server implementation for the reqprof API

use axum::{middleware, routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::profiler::RequestProfiler;
use crate::Result;

/// Shared application state: where artifacts live and, when profiling is
/// enabled, the profiler stack itself.
#[derive(Clone)]
pub struct AppState {
    /// Absolute path of the profiles directory
    pub profiles_dir: PathBuf,
    /// Present only when profiling is enabled
    pub profiler: Option<Arc<RequestProfiler>>,
}

/// Creates the application router with all routes and middleware
pub fn create_app(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(handlers::root_handler))
        .route("/work", get(handlers::work_handler))
        .route("/profiles", get(handlers::list_profiles));

    // The profiling layer only exists when profiling is enabled; a plain
    // request handler otherwise.
    if state.profiler.is_some() {
        app = app.layer(middleware::from_fn_with_state(
            state.clone(),
            super::middleware::profile_request,
        ));
    }

    app.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Start the HTTP server, running until `shutdown` resolves.
pub async fn start_server(
    addr: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
