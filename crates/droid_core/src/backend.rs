//! Backend capability probing and selection
//!
//! Which capture and injection paths work depends on what is installed on
//! the device and which emulator family hosts it. Probing happens at
//! session construction and again after specific failures; nothing here is
//! persisted.

use crate::adb::{shm_instance_id, AdbTransport};
use crate::config::{CaptureMethod, ControlMethod};
use crate::error::{DeviceError, Result};
use crate::session::DeviceIdentity;
use tracing::{debug, info};

/// Remote paths of the companion helpers.
pub const SWIFTCAP_REMOTE: &str = "/data/local/tmp/swiftcap";
pub const TOUCHD_REMOTE: &str = "/data/local/tmp/touchd";
/// Abstract socket the touchd helper listens on.
pub const TOUCHD_SOCKET: &str = "localabstract:touchd";

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum BackendKind {
    Capture,
    Inject,
}

/// Capability and availability of one backend on the probed device.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BackendDescriptor {
    pub name: &'static str,
    pub kind: BackendKind,
    /// Required helper present, or no helper required.
    pub helper_installed: bool,
    /// Device class supports this backend at all.
    pub compatible: bool,
}

impl BackendDescriptor {
    pub fn usable(&self) -> bool {
        self.helper_installed && self.compatible
    }
}

/// Probe every backend against one device.
///
/// `vendor_api_present` reports whether the embedder supplied the vendor
/// renderer library; without it the shared-memory paths are never usable
/// regardless of the emulator family.
pub async fn probe_backends(
    transport: &AdbTransport,
    identity: &DeviceIdentity,
    vendor_api_present: bool,
) -> Result<Vec<BackendDescriptor>> {
    let vendor_family = shm_instance_id(&identity.serial).is_some();
    let abi_supported = identity.cpu_abi.starts_with("arm") || identity.cpu_abi.starts_with("x86");

    let swiftcap_installed = transport.file_exists(SWIFTCAP_REMOTE).await.unwrap_or(false);
    let touchd_installed = transport.file_exists(TOUCHD_REMOTE).await.unwrap_or(false);

    let descriptors = vec![
        BackendDescriptor {
            name: "screencap_png",
            kind: BackendKind::Capture,
            helper_installed: true,
            compatible: true,
        },
        BackendDescriptor {
            name: "screencap_raw",
            kind: BackendKind::Capture,
            helper_installed: true,
            // exec-out needs a modern adbd
            compatible: identity.sdk_version == 0 || identity.sdk_version >= 21,
        },
        BackendDescriptor {
            name: "swiftcap",
            kind: BackendKind::Capture,
            helper_installed: swiftcap_installed,
            compatible: abi_supported,
        },
        BackendDescriptor {
            name: "vendor_shm_capture",
            kind: BackendKind::Capture,
            helper_installed: vendor_api_present,
            compatible: vendor_family,
        },
        BackendDescriptor {
            name: "shell_input",
            kind: BackendKind::Inject,
            helper_installed: true,
            compatible: true,
        },
        BackendDescriptor {
            name: "touchd",
            kind: BackendKind::Inject,
            helper_installed: touchd_installed,
            compatible: abi_supported,
        },
        BackendDescriptor {
            name: "vendor_shm_inject",
            kind: BackendKind::Inject,
            helper_installed: vendor_api_present,
            compatible: vendor_family,
        },
    ];
    debug!("Backend probe: {:?}", descriptors);
    Ok(descriptors)
}

fn usable(descriptors: &[BackendDescriptor], name: &str) -> bool {
    descriptors
        .iter()
        .any(|d| d.name == name && d.usable())
}

/// Resolve the capture method once, at session construction.
///
/// Preference order for `Auto`: the vendor shared-memory path when the
/// emulator family and library allow it, then the swiftcap helper, then
/// raw screencap, with PNG screencap as the always-available floor.
pub fn select_capture(
    descriptors: &[BackendDescriptor],
    requested: CaptureMethod,
) -> CaptureMethod {
    if requested != CaptureMethod::Auto {
        return requested;
    }
    let selected = if usable(descriptors, "vendor_shm_capture") {
        CaptureMethod::VendorShm
    } else if usable(descriptors, "swiftcap") {
        CaptureMethod::SwiftCap
    } else if usable(descriptors, "screencap_raw") {
        CaptureMethod::ScreencapRaw
    } else {
        CaptureMethod::ScreencapPng
    };
    info!("Capture method resolved to {:?}", selected);
    selected
}

/// Next capture method to try after the current one keeps corrupting.
pub fn capture_fallback(current: CaptureMethod) -> Option<CaptureMethod> {
    match current {
        CaptureMethod::VendorShm => Some(CaptureMethod::SwiftCap),
        CaptureMethod::SwiftCap => Some(CaptureMethod::ScreencapRaw),
        CaptureMethod::ScreencapRaw => Some(CaptureMethod::ScreencapPng),
        CaptureMethod::ScreencapPng | CaptureMethod::Auto => None,
    }
}

/// Resolve the injection method once, at session construction.
pub fn select_control(
    descriptors: &[BackendDescriptor],
    requested: ControlMethod,
) -> ControlMethod {
    if requested != ControlMethod::Auto {
        return requested;
    }
    let selected = if usable(descriptors, "vendor_shm_inject") {
        ControlMethod::VendorShm
    } else if usable(descriptors, "touchd") {
        ControlMethod::Touchd
    } else {
        ControlMethod::ShellInput
    };
    info!("Control method resolved to {:?}", selected);
    selected
}

/// Push the swiftcap helper onto the device and make it executable.
/// Idempotent; safe to run again on a device that already has it.
pub async fn install_swiftcap(transport: &AdbTransport, local: Option<&str>) -> Result<()> {
    let local = local.ok_or_else(|| {
        DeviceError::CaptureToolMissing(
            "no local swiftcap binary configured to install".to_string(),
        )
    })?;
    info!("Installing swiftcap from {}", local);
    transport.push(local, SWIFTCAP_REMOTE).await?;
    transport.shell(&["chmod", "755", SWIFTCAP_REMOTE]).await?;
    Ok(())
}

/// Push the touchd helper onto the device. Idempotent.
pub async fn install_touchd(transport: &AdbTransport, local: Option<&str>) -> Result<()> {
    let local = local.ok_or_else(|| {
        DeviceError::InjectionToolMissing(
            "no local touchd package configured to install".to_string(),
        )
    })?;
    info!("Installing touchd from {}", local);
    transport.push(local, TOUCHD_REMOTE).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &'static str, kind: BackendKind, installed: bool, compatible: bool) -> BackendDescriptor {
        BackendDescriptor {
            name,
            kind,
            helper_installed: installed,
            compatible,
        }
    }

    fn base_set(vendor: bool, swiftcap: bool, touchd: bool) -> Vec<BackendDescriptor> {
        vec![
            descriptor("screencap_png", BackendKind::Capture, true, true),
            descriptor("screencap_raw", BackendKind::Capture, true, true),
            descriptor("swiftcap", BackendKind::Capture, swiftcap, true),
            descriptor("vendor_shm_capture", BackendKind::Capture, vendor, vendor),
            descriptor("shell_input", BackendKind::Inject, true, true),
            descriptor("touchd", BackendKind::Inject, touchd, true),
            descriptor("vendor_shm_inject", BackendKind::Inject, vendor, vendor),
        ]
    }

    #[test]
    fn auto_prefers_vendor_then_helper_then_raw() {
        assert_eq!(
            select_capture(&base_set(true, true, false), CaptureMethod::Auto),
            CaptureMethod::VendorShm
        );
        assert_eq!(
            select_capture(&base_set(false, true, false), CaptureMethod::Auto),
            CaptureMethod::SwiftCap
        );
        assert_eq!(
            select_capture(&base_set(false, false, false), CaptureMethod::Auto),
            CaptureMethod::ScreencapRaw
        );
    }

    #[test]
    fn explicit_request_wins_over_heuristics() {
        assert_eq!(
            select_capture(&base_set(true, true, true), CaptureMethod::ScreencapPng),
            CaptureMethod::ScreencapPng
        );
        assert_eq!(
            select_control(&base_set(true, true, true), ControlMethod::ShellInput),
            ControlMethod::ShellInput
        );
    }

    #[test]
    fn control_falls_back_to_shell_input() {
        assert_eq!(
            select_control(&base_set(false, false, false), ControlMethod::Auto),
            ControlMethod::ShellInput
        );
        assert_eq!(
            select_control(&base_set(false, false, true), ControlMethod::Auto),
            ControlMethod::Touchd
        );
    }

    #[test]
    fn fallback_chain_terminates() {
        let mut method = CaptureMethod::VendorShm;
        let mut steps = 0;
        while let Some(next) = capture_fallback(method) {
            method = next;
            steps += 1;
        }
        assert_eq!(method, CaptureMethod::ScreencapPng);
        assert_eq!(steps, 3);
    }
}
