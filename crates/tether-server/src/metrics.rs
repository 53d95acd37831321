//! Prometheus metrics recorder and `/metrics` endpoint handler.
//!
//! Connection and push-stream metric names live next to the code that
//! records them (`tether_ws::metrics`, `tether_sse::metrics`).

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Utterances reported by chat workers (counter).
pub const CHAT_UTTERANCES_TOTAL: &str = "chat_utterances_total";
/// Websocket handshakes refused by authentication (counter, labels: `reason`).
pub const AUTH_REFUSALS_TOTAL: &str = "auth_refusals_total";

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if another recorder
/// is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}
