//! `/ticks` push stream.

use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::json;
use tether_sse::axum_body::push_response;
use tracing::debug;

use crate::server::AppState;

/// Number of ticks sent when the query does not say.
pub const DEFAULT_TICK_COUNT: u64 = 10;

/// Largest tick count a client can ask for.
pub const MAX_TICK_COUNT: u64 = 10_000;

/// Query string of `/ticks`.
#[derive(Debug, Default, Deserialize)]
pub struct TickQuery {
    /// Events to send before completing.
    pub count: Option<u64>,
}

impl TickQuery {
    /// Requested count, defaulted and capped at [`MAX_TICK_COUNT`].
    pub fn tick_count(&self) -> u64 {
        self.count.unwrap_or(DEFAULT_TICK_COUNT).min(MAX_TICK_COUNT)
    }
}

/// GET /ticks?count=N
pub(crate) async fn ticks_handler(
    State(state): State<AppState>,
    Query(query): Query<TickQuery>,
) -> Response {
    let count = query.tick_count();
    let interval = state.config.tick_interval;
    debug!(count, ?interval, "starting tick stream");

    let (response, handle) = push_response(move |pusher| async move {
        for tick in 0..count {
            if tick > 0 {
                tokio::time::sleep(interval).await;
            }
            pusher.push(&json!({ "tick": tick })).await?;
        }
        Ok(())
    });

    // Streams still running at shutdown end with a terminal frame; the
    // watcher goes away with the stream otherwise
    let shutdown = state.shutdown.token();
    let _watch = tokio::spawn(async move {
        tokio::select! {
            () = handle.finished() => {}
            () = shutdown.cancelled() => handle.close(),
        }
    });
    response
}
