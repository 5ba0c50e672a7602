//! Client configuration.

use std::time::Duration;

use parley_core::ConnectionConfig;

/// Default time a send may stay unconfirmed before it is marked failed.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Default maximum distance between a send's local timestamp and its echo's
/// server timestamp for a content match.
pub const DEFAULT_ECHO_TOLERANCE: Duration = Duration::from_secs(60);

/// Default time a failed send still accepts a late echo.
pub const DEFAULT_LATE_ECHO_WINDOW: Duration = Duration::from_secs(60);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Handshake, heartbeat and reconnect settings.
    pub connection: ConnectionConfig,
    /// Time before an unconfirmed send becomes `Failed`.
    pub send_timeout: Duration,
    /// Timestamp tolerance for content-matched echoes.
    pub echo_tolerance: Duration,
    /// How long a failed send still matches a late echo.
    pub late_echo_window: Duration,
    /// Operator id attached to list and history requests, if the deployment
    /// needs it.
    pub operator_id: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
            echo_tolerance: DEFAULT_ECHO_TOLERANCE,
            late_echo_window: DEFAULT_LATE_ECHO_WINDOW,
            operator_id: None,
        }
    }
}
