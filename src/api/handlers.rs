//! HTTP request handlers for the reqprof server
//!
//! The workload handlers are synthetic busy-loops that exist only to give
//! the profiler something to sample; `black_box` keeps the optimizer from
//! deleting them.

use axum::{extract::State, http::StatusCode, response::Json};
use std::hint::black_box;

use super::server::AppState;

/// `GET /` - heavy synthetic computation.
pub async fn root_handler() -> &'static str {
    let mut sum: u64 = 0;
    for i in 0..10_000_000u64 {
        sum = sum.wrapping_add(i);
    }
    black_box(sum);
    "Hello, world!"
}

/// `GET /work` - lighter synthetic workload.
pub async fn work_handler() -> &'static str {
    let mut product: u64 = 1;
    for i in 1..100_000u64 {
        product = product.wrapping_mul(black_box(i % 100).max(1));
    }
    black_box(product);
    "Work done!"
}

/// `GET /profiles` - absolute paths of every file currently in the
/// profiles directory. An unreadable or missing directory is the one
/// profiling failure that is surfaced to clients.
pub async fn list_profiles(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, (StatusCode, String)> {
    let mut entries = tokio::fs::read_dir(&state.profiles_dir)
        .await
        .map_err(list_error)?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(list_error)? {
        files.push(entry.path().to_string_lossy().into_owned());
    }

    Ok(Json(files))
}

fn list_error(e: std::io::Error) -> (StatusCode, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Error reading profiles directory: {}", e),
    )
}
