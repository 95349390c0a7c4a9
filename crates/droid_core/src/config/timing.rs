//! Timing configuration for device operations

use std::env;
use std::time::Duration;

fn env_f64(name: &str, default: f64) -> f64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Connection timing configuration for adb operations
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ConnectionTimingConfig {
    /// Timeout for `adb connect` in seconds
    pub connect_timeout: u64,
    /// Timeout for one-shot shell commands in seconds
    pub shell_timeout: u64,
    /// Delay after restarting the adb server
    pub server_restart_delay: f64,
    /// Delay after reconnecting a device
    pub reconnect_delay: f64,
}

impl Default for ConnectionTimingConfig {
    fn default() -> Self {
        Self {
            connect_timeout: env_u64("DROID_CORE_CONNECT_TIMEOUT", 10),
            shell_timeout: env_u64("DROID_CORE_SHELL_TIMEOUT", 10),
            server_restart_delay: env_f64("DROID_CORE_SERVER_RESTART_DELAY", 1.0),
            reconnect_delay: env_f64("DROID_CORE_RECONNECT_DELAY", 2.0),
        }
    }
}

/// Capture timing configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CaptureTimingConfig {
    /// Timeout for one capture call in seconds
    pub capture_timeout: u64,
    /// Timeout for one vendor shared-memory call in seconds.
    /// The call has no cancellation hook; on timeout its worker is abandoned.
    pub native_call_timeout: f64,
    /// Minimum interval between two captures in seconds
    pub screenshot_interval: f64,
}

impl Default for CaptureTimingConfig {
    fn default() -> Self {
        Self {
            capture_timeout: env_u64("DROID_CORE_CAPTURE_TIMEOUT", 10),
            native_call_timeout: env_f64("DROID_CORE_NATIVE_CALL_TIMEOUT", 0.5),
            screenshot_interval: env_f64("DROID_CORE_SCREENSHOT_INTERVAL", 0.1),
        }
    }
}

/// Injection timing configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InjectTimingConfig {
    /// Minimum sleep after a shell-backed tap in seconds
    pub tap_delay: f64,
    /// Wait between interpolated swipe points in milliseconds
    pub swipe_point_wait_ms: u64,
    /// Dwell at the swipe destination in milliseconds
    pub swipe_dwell_ms: u64,
}

impl Default for InjectTimingConfig {
    fn default() -> Self {
        Self {
            tap_delay: env_f64("DROID_CORE_TAP_DELAY", 0.05),
            swipe_point_wait_ms: env_u64("DROID_CORE_SWIPE_POINT_WAIT_MS", 10),
            swipe_dwell_ms: env_u64("DROID_CORE_SWIPE_DWELL_MS", 140),
        }
    }
}

/// Master timing configuration
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TimingConfig {
    pub connection: ConnectionTimingConfig,
    pub capture: CaptureTimingConfig,
    pub inject: InjectTimingConfig,
}

impl TimingConfig {
    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.connection.shell_timeout)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture.capture_timeout)
    }

    pub fn native_call_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.capture.native_call_timeout)
    }
}
