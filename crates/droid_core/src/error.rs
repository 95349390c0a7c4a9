/// Error types for device I/O operations
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// Connection to the device severed. Recoverable via reconnect.
    #[error("Transport lost: {0}")]
    TransportLost(String),

    /// Capture bytes failed structural decoding. Recoverable by retry or
    /// backend fallback.
    #[error("Capture corrupted: {0}")]
    CaptureCorrupted(String),

    /// Capture helper absent or incompatible on the device.
    #[error("Capture tool missing: {0}")]
    CaptureToolMissing(String),

    /// Injection helper absent or incompatible on the device.
    #[error("Injection tool missing: {0}")]
    InjectionToolMissing(String),

    /// The stuck watchdog fired: no observed progress within its deadline.
    #[error("Device unresponsive after {elapsed:.1}s and {polls} polls, waiting for {waiting_for}")]
    DeviceUnresponsive {
        elapsed: f64,
        polls: u32,
        waiting_for: String,
    },

    /// The loop watchdog fired: the same operations repeat without progress.
    /// Always surfaced to the caller, never silently retried.
    #[error("Input loop detected: {0}")]
    InputLoopDetected(String),

    /// Retry budget exhausted. Terminal; carries the last underlying cause.
    #[error("Operator intervention required after {attempts} attempts: {source}")]
    NeedsOperator {
        attempts: u32,
        #[source]
        source: Box<DeviceError>,
    },

    #[error("Command execution failed: {0}")]
    CommandFailed(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl DeviceError {
    /// True for the two watchdog errors and `NeedsOperator`, which must
    /// propagate to the caller instead of entering another retry loop.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeviceError::DeviceUnresponsive { .. }
                | DeviceError::InputLoopDetected(_)
                | DeviceError::NeedsOperator { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
