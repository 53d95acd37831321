//! Metric names recorded by the connection core.
//!
//! Recording goes through the `metrics` facade; whichever recorder the binary
//! installs (Prometheus in `tether-server`) picks them up.

/// Connections accepted (counter, labels: `connection_type`, `payload_mode`).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Currently active connections (gauge, labels: `connection_type`).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Workers closed because a newer connection took their key (counter).
pub const WS_DISPLACEMENTS_TOTAL: &str = "ws_displacements_total";
/// Inbound frames accepted onto the queue (counter, labels: `kind`).
pub const WS_FRAMES_RECEIVED_TOTAL: &str = "ws_frames_received_total";
/// Inbound frames rejected before dispatch (counter, labels: `kind`).
pub const WS_FRAME_ERRORS_TOTAL: &str = "ws_frame_errors_total";
/// Handler callbacks that failed or panicked (counter, labels: `kind`).
pub const WS_HANDLER_ERRORS_TOTAL: &str = "ws_handler_errors_total";
/// Connection lifetime in seconds (histogram, labels: `connection_type`).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
