//! Controller configuration passed at construction

use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Default location of the shared state file
pub const DEFAULT_STATE_FILE: &str = "elk_fastlink_state.json";

/// Timings and paths for one [`DeviceController`](crate::DeviceController)
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// JSON file holding the last state of every device
    pub state_path: PathBuf,
    /// Delay before the first background connect after construction
    pub initial_connect_delay: Duration,
    /// Delay before retrying after a failed connect
    pub reconnect_delay: Duration,
    /// Shorter delay used when the stack reports an operation in progress
    pub busy_reconnect_delay: Duration,
    /// Period of the liveness check
    pub heartbeat_interval: Duration,
    /// Pause after the power-on frame and between effect frames
    pub settle_delay: Duration,
    /// Pause between a color frame and the native brightness frame
    pub native_settle_delay: Duration,
    /// Minimum spacing between two frames; `None` uses the device profile's value
    pub command_delay: Option<Duration>,
    /// Retry budget for every write
    pub retry: RetryPolicy,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            state_path: PathBuf::from(DEFAULT_STATE_FILE),
            initial_connect_delay: Duration::from_secs(3),
            reconnect_delay: Duration::from_secs(10),
            busy_reconnect_delay: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            settle_delay: Duration::from_millis(100),
            native_settle_delay: Duration::from_millis(30),
            command_delay: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl ControllerConfig {
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = path.into();
        self
    }
}
