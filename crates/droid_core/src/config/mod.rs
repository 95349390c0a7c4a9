//! Configuration for the device I/O core
//!
//! All tunables are carried in one `CoreConfig` value that is threaded
//! explicitly into the components that need it. Defaults can be overridden
//! through `DROID_CORE_*` environment variables.

mod timing;

use std::collections::HashMap;
use std::env;

pub use timing::{
    CaptureTimingConfig, ConnectionTimingConfig, InjectTimingConfig, TimingConfig,
};

/// Retry budget for one device call
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first
    pub tries: u32,
    /// Base delay between attempts in seconds; the first retry runs
    /// immediately, later ones back off linearly from this value
    pub delay: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            tries: env::var("DROID_CORE_RETRY_TRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            delay: env::var("DROID_CORE_RETRY_DELAY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.5),
        }
    }
}

/// Watchdog thresholds
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WatchdogConfig {
    /// Stuck timer deadline in seconds
    pub stuck_limit: f64,
    /// Polls required beyond the deadline before the stuck timer fires
    pub stuck_confirm: u32,
    /// Per-identifier overrides of the repeated-operation allowance.
    /// An entry raises the single-identifier threshold for that operation
    /// only, for flows that legitimately hammer one control.
    pub loop_allowance: HashMap<String, u32>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            stuck_limit: env::var("DROID_CORE_STUCK_LIMIT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60.0),
            stuck_confirm: env::var("DROID_CORE_STUCK_CONFIRM")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
            loop_allowance: HashMap::new(),
        }
    }
}

/// Coordinate and timing jitter applied to synthesized gestures
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct JitterConfig {
    /// Positional jitter range in pixels, applied per interpolated point
    pub point_px: (i32, i32),
    /// Extra wait range in milliseconds, applied per interpolated point
    pub point_ms: (u64, u64),
}

impl Default for JitterConfig {
    fn default() -> Self {
        Self {
            point_px: (-3, 3),
            point_ms: (0, 10),
        }
    }
}

/// Swipe synthesis parameters
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SwipeConfig {
    /// Endpoints closer than this are dropped as a no-op click surrogate
    pub min_distance: f64,
    /// Approximate pixel distance covered per interpolated segment
    pub segment_len: f64,
    /// Jitter applied to interpolated points
    pub jitter: JitterConfig,
}

impl Default for SwipeConfig {
    fn default() -> Self {
        Self {
            min_distance: 10.0,
            segment_len: 40.0,
            jitter: JitterConfig::default(),
        }
    }
}

/// Requested capture backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum CaptureMethod {
    /// Pick from probed backends at session construction
    #[default]
    Auto,
    /// `screencap -p` over a text shell, PNG output
    ScreencapPng,
    /// `screencap` over exec-out, raw header + RGBA
    ScreencapRaw,
    /// Pushed swiftcap helper, magic token + zstd block
    SwiftCap,
    /// Vendor shared-memory renderer interface
    VendorShm,
}

/// Requested injection backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum ControlMethod {
    /// Pick from probed backends at session construction
    #[default]
    Auto,
    /// `input tap` / `input swipe`, no helper required
    ShellInput,
    /// Pushed touchd helper, text protocol over a forwarded socket
    Touchd,
    /// Vendor shared-memory touch interface
    VendorShm,
}

/// Master configuration threaded into `Device::connect`
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CoreConfig {
    /// Path to the adb binary; "adb" resolves through PATH
    pub adb_path: Option<String>,
    pub capture_method: CaptureMethod,
    pub control_method: ControlMethod,
    pub timing: TimingConfig,
    pub retry: RetryConfig,
    pub watchdog: WatchdogConfig,
    pub swipe: SwipeConfig,
    /// Local ports eligible for `adb forward`
    pub forward_port_range: Option<(u16, u16)>,
    /// Local path of the swiftcap helper binary, pushed on reinstall
    pub swiftcap_local: Option<String>,
    /// Local path of the touchd helper package, pushed on reinstall
    pub touchd_local: Option<String>,
}

impl CoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_adb_path(mut self, path: impl Into<String>) -> Self {
        self.adb_path = Some(path.into());
        self
    }

    pub fn with_capture_method(mut self, method: CaptureMethod) -> Self {
        self.capture_method = method;
        self
    }

    pub fn with_control_method(mut self, method: ControlMethod) -> Self {
        self.control_method = method;
        self
    }

    pub fn with_retry(mut self, tries: u32, delay: f64) -> Self {
        self.retry = RetryConfig { tries, delay };
        self
    }

    pub fn forward_port_range(&self) -> (u16, u16) {
        self.forward_port_range.unwrap_or((20000, 21000))
    }
}
