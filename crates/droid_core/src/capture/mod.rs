//! Screen capture pipeline
//!
//! This module provides:
//! - `codec`: frame type and backend byte-stream decoding
//! - `native`: vendor shared-memory interface with its timeout guard
//! - the pipeline that drives the active backend, paces captures, filters
//!   black frames and normalizes orientation

pub mod codec;
pub mod native;

use crate::adb::AdbTransport;
use crate::backend::SWIFTCAP_REMOTE;
use crate::config::{CaptureMethod, CaptureTimingConfig};
use crate::error::{DeviceError, Result};
use codec::{decode_raw_screencap, decode_swiftcap, Frame, ShellImageDecoder};
use native::VendorShmConn;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

fn helper_missing(msg: &str) -> bool {
    msg.contains("not found")
        || msg.contains("No such file")
        || msg.contains("inaccessible")
        || msg.contains("not executable")
        || msg.contains("Permission denied")
}

/// Drives the selected capture backend and owns per-backend decode state.
///
/// The pipeline never surfaces a black frame: a capture whose reference
/// region reads effectively zero is retried once in place and then reported
/// as corruption so the retry engine can remediate or fall back.
pub struct CapturePipeline {
    method: CaptureMethod,
    shell_decoder: ShellImageDecoder,
    timing: CaptureTimingConfig,
    last_capture: Option<Instant>,
    black_checked: bool,
}

impl CapturePipeline {
    pub fn new(method: CaptureMethod, timing: CaptureTimingConfig) -> Self {
        Self {
            method,
            shell_decoder: ShellImageDecoder::new(),
            timing,
            last_capture: None,
            black_checked: false,
        }
    }

    pub fn method(&self) -> CaptureMethod {
        self.method
    }

    /// Switch backends, e.g. when falling back after repeated corruption.
    pub fn set_method(&mut self, method: CaptureMethod) {
        if method != self.method {
            debug!("capture backend {:?} -> {:?}", self.method, method);
            self.method = method;
            self.shell_decoder = ShellImageDecoder::new();
            self.black_checked = false;
        }
    }

    /// Drop decode state tied to the lost session.
    pub fn invalidate(&mut self) {
        self.shell_decoder = ShellImageDecoder::new();
        self.black_checked = false;
        self.last_capture = None;
    }

    /// Enforce the minimum interval between captures.
    async fn pace(&mut self) {
        let interval = Duration::from_secs_f64(self.timing.screenshot_interval);
        if let Some(last) = self.last_capture {
            let elapsed = last.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
        self.last_capture = Some(Instant::now());
    }

    async fn capture_once(
        &mut self,
        transport: &AdbTransport,
        shm: Option<&mut VendorShmConn>,
    ) -> Result<Frame> {
        match self.method {
            CaptureMethod::ScreencapRaw => {
                let raw = transport.exec_out(&["screencap"]).await?;
                decode_raw_screencap(&raw)
            }
            CaptureMethod::ScreencapPng => {
                let raw = transport.shell_raw(&["screencap", "-p"]).await?;
                self.shell_decoder.decode(&raw)
            }
            CaptureMethod::SwiftCap => {
                let raw = match transport.exec_out(&[SWIFTCAP_REMOTE, "--stream"]).await {
                    Ok(raw) => raw,
                    Err(DeviceError::CommandFailed(msg)) if helper_missing(&msg) => {
                        return Err(DeviceError::CaptureToolMissing(msg));
                    }
                    Err(e) => return Err(e),
                };
                if let Some(text) = std::str::from_utf8(&raw).ok().map(str::trim) {
                    if helper_missing(text) {
                        return Err(DeviceError::CaptureToolMissing(text.to_string()));
                    }
                }
                decode_swiftcap(&raw)
            }
            CaptureMethod::VendorShm => {
                let conn = shm.ok_or_else(|| {
                    DeviceError::CaptureToolMissing(
                        "vendor shared-memory interface not initialized".to_string(),
                    )
                })?;
                conn.screenshot().await
            }
            CaptureMethod::Auto => Err(DeviceError::Config(
                "capture method not resolved before use".to_string(),
            )),
        }
    }

    /// Capture one frame, normalized to the canonical orientation.
    pub async fn capture(
        &mut self,
        transport: &AdbTransport,
        mut shm: Option<&mut VendorShmConn>,
        orientation: u8,
    ) -> Result<Frame> {
        self.pace().await;

        let mut frame = self.capture_once(transport, shm.as_deref_mut()).await?;
        if orientation != 0 {
            frame = frame.rotated(orientation)?;
        }

        if !self.black_checked {
            if frame.mean_region(0, 0, frame.width(), frame.height()) < 1.0 {
                warn!("Received pure black frame from {:?}, retrying once", self.method);
                let mut retry = self.capture_once(transport, shm.as_deref_mut()).await?;
                if orientation != 0 {
                    retry = retry.rotated(orientation)?;
                }
                if retry.mean_region(0, 0, retry.width(), retry.height()) < 1.0 {
                    return Err(DeviceError::CaptureCorrupted(
                        "backend returns pure black frames".to_string(),
                    ));
                }
                self.black_checked = true;
                return Ok(retry);
            }
            self.black_checked = true;
        }

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helper_missing_matches_shell_answers() {
        assert!(helper_missing("/system/bin/sh: /data/local/tmp/swiftcap: not found"));
        assert!(helper_missing("No such file or directory"));
        assert!(helper_missing("/system/bin/sh: swiftcap: inaccessible or not found"));
        assert!(!helper_missing("some pixels"));
    }
}
