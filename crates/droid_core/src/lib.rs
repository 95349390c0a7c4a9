//! droid_core: device I/O core for Android automation
//!
//! This library provides the two primitives an automation client needs
//! against an Android device or emulator:
//! - capture the current screen as a decoded, normalized frame
//! - inject a touch gesture
//!
//! behind a facade that hides how fragile the underlying transports are:
//! session lifecycle and reconnect, multi-backend capture decoding with
//! corruption and black-frame detection, multi-backend touch injection,
//! bounded retry with categorized remediation, and a stuck/loop watchdog.
//!
//! # Example
//!
//! ```no_run
//! use droid_core::{connect, CoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> droid_core::Result<()> {
//!     let mut device = connect("127.0.0.1:16384", CoreConfig::new()).await?;
//!
//!     let frame = device.screenshot().await?;
//!     println!("{}x{}", frame.width(), frame.height());
//!
//!     device.tap(640, 360).await?;
//!     device.swipe((100, 500), (100, 100)).await?;
//!
//!     device.close().await;
//!     Ok(())
//! }
//! ```

// Core modules
pub mod error;

// Configuration
pub mod config;

// Transport and session
pub mod adb;
pub mod session;

// Capture and injection
pub mod backend;
pub mod capture;
pub mod inject;

// Recovery and supervision
pub mod retry;
pub mod watchdog;

// Facade
pub mod device;

mod util;

// Re-export commonly used types and functions
pub use error::{DeviceError, Result};

// Config re-exports
pub use config::{
    CaptureMethod, ControlMethod, CoreConfig, JitterConfig, RetryConfig, SwipeConfig,
    TimingConfig, WatchdogConfig,
};

// Transport re-exports
pub use adb::{revise_serial, AdbTransport, ConnectionType, DeviceEntry};
pub use session::{DeviceIdentity, Session, SessionState};

// Capture re-exports
pub use capture::codec::Frame;
pub use capture::native::{RawCaptureFn, VendorShmApi};

// Injection re-exports
pub use inject::{
    synthesize_long_press, synthesize_swipe, synthesize_tap, Gesture, GestureBuilder,
    GestureEvent,
};

// Recovery re-exports
pub use backend::{BackendDescriptor, BackendKind};
pub use retry::{classify, ErrorCategory, RetryContext};
pub use watchdog::{LoopDetector, StuckTimer, Watchdog};

// Facade re-exports
pub use device::{connect, Device};
