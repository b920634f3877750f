use std::time::Duration;

/// How long an unanswered sensor test request stays outstanding before it is
/// presumed lost and sent again.
pub const DEFAULT_SENSOR_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);

/// Runtime knobs for a [`DeviceSession`](crate::session::DeviceSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub sensor_request_timeout: Duration,
}

impl SessionOptions {
    pub fn with_sensor_request_timeout(mut self, timeout: Duration) -> Self {
        self.sensor_request_timeout = timeout;
        self
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            sensor_request_timeout: DEFAULT_SENSOR_REQUEST_TIMEOUT,
        }
    }
}
