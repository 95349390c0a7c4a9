//! Session lifecycle and identity cache
//!
//! A session owns the transport to one device and every cache tied to it:
//! identity, orientation, resolution, forwarded ports. The state machine is
//! `Disconnected -> Connecting -> Identified -> Ready`, with `Ready ->
//! Ready` as the steady state for repeated calls. Any transport failure
//! invalidates the session; it is never destroyed, and reconnect replays
//! `Connecting` after dropping everything derived from the old link.

use crate::adb::{check_serial, AdbTransport};
use crate::config::CoreConfig;
use crate::error::{DeviceError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info, warn};

lazy_static! {
    static ref ORIENTATION_RE: Regex = Regex::new(r"orientation=([0-3])").unwrap();
    static ref WM_SIZE_RE: Regex = Regex::new(r"size:\s*(\d+)x(\d+)").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Identified,
    Ready,
}

/// Identity resolved once per `Connecting -> Identified` transition.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub serial: String,
    pub cpu_abi: String,
    pub sdk_version: u32,
}

/// Connection session for one device.
pub struct Session {
    transport: AdbTransport,
    state: SessionState,
    identity: Option<DeviceIdentity>,
    orientation: Option<u8>,
    resolution: Option<(u32, u32)>,
    forwarded_ports: Vec<u16>,
    reconnect_delay: Duration,
}

pub(crate) fn parse_orientation(dumpsys: &str) -> Option<u8> {
    ORIENTATION_RE
        .captures(dumpsys)
        .and_then(|c| c[1].parse().ok())
}

pub(crate) fn parse_wm_size(output: &str) -> Option<(u32, u32)> {
    WM_SIZE_RE
        .captures(output)
        .and_then(|c| Some((c[1].parse().ok()?, c[2].parse().ok()?)))
}

impl Session {
    /// Build a disconnected session for `target`: the serial is normalized
    /// and the transport prepared, but nothing touches the device yet.
    pub fn new(target: &str, config: &CoreConfig) -> Self {
        let serial = check_serial(target);
        let adb_path = config.adb_path.clone().unwrap_or_else(|| "adb".to_string());
        let transport = AdbTransport::new(adb_path, serial, config.timing.connection.clone());

        Self {
            transport,
            state: SessionState::Disconnected,
            identity: None,
            orientation: None,
            resolution: None,
            forwarded_ports: Vec::new(),
            reconnect_delay: Duration::from_secs_f64(config.timing.connection.reconnect_delay),
        }
    }

    /// Establish the session: connect the transport, resolve identity.
    pub async fn connect(target: &str, config: &CoreConfig) -> Result<Self> {
        let mut session = Self::new(target, config);
        session.establish().await?;
        Ok(session)
    }

    /// Run `Connecting -> Identified -> Ready`.
    pub async fn establish(&mut self) -> Result<()> {
        self.state = SessionState::Connecting;
        self.transport.connect_device().await?;
        if !self.transport.is_alive().await? {
            self.state = SessionState::Disconnected;
            return Err(DeviceError::DeviceNotFound(format!(
                "{} not listed with status \"device\"",
                self.transport.serial()
            )));
        }

        let identity = self.identify().await?;
        info!(
            "Device identified: {} ({}, sdk {})",
            identity.serial, identity.cpu_abi, identity.sdk_version
        );
        self.identity = Some(identity);
        self.state = SessionState::Identified;

        self.state = SessionState::Ready;
        Ok(())
    }

    async fn identify(&self) -> Result<DeviceIdentity> {
        let cpu_abi = self.transport.getprop("ro.product.cpu.abi").await?;
        let sdk_version = self
            .transport
            .getprop("ro.build.version.sdk")
            .await?
            .parse()
            .unwrap_or(0);
        Ok(DeviceIdentity {
            serial: self.transport.serial().to_string(),
            cpu_abi,
            sdk_version,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn serial(&self) -> &str {
        self.transport.serial()
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// The live transport. Refused once the session is marked lost;
    /// callers re-fetch after reconnect instead of holding stale handles.
    pub fn transport(&self) -> Result<&AdbTransport> {
        if self.state == SessionState::Ready {
            Ok(&self.transport)
        } else {
            Err(DeviceError::TransportLost(format!(
                "session is {:?}, reconnect required",
                self.state
            )))
        }
    }

    /// Invalidate after a transport failure. Every cache derived from the
    /// lost link drops with it.
    pub fn mark_lost(&mut self) {
        if self.state != SessionState::Disconnected {
            warn!("Session to {} marked lost", self.transport.serial());
        }
        self.state = SessionState::Disconnected;
        self.identity = None;
        self.orientation = None;
        self.resolution = None;
        // Ports are re-derived on reconnect; stale forwards are cleaned up
        // by the idempotent forward setup when they are next needed.
        self.forwarded_ports.clear();
    }

    /// Replay `Connecting` after a loss.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.mark_lost();
        tokio::time::sleep(self.reconnect_delay).await;
        let _ = self.transport.disconnect_device().await;
        self.establish().await
    }

    /// Restart the adb server, then reconnect. The escalation remediation
    /// for repeated transport losses.
    pub async fn restart_server_and_reconnect(&mut self) -> Result<()> {
        self.mark_lost();
        self.transport.restart_server().await?;
        self.establish().await
    }

    /// Cached device orientation in quarter turns, queried on first use.
    pub async fn orientation(&mut self) -> Result<u8> {
        if let Some(o) = self.orientation {
            return Ok(o);
        }
        let dumpsys = self.transport()?.shell(&["dumpsys", "display"]).await?;
        let o = parse_orientation(&dumpsys).unwrap_or(0);
        debug!("Device orientation: {}", o);
        self.orientation = Some(o);
        Ok(o)
    }

    /// Invalidation hook for rotation changes: the next capture or
    /// coordinate mapping re-queries, keeping the two consistent.
    pub fn invalidate_orientation(&mut self) {
        self.orientation = None;
    }

    /// Cached screen resolution from `wm size`.
    pub async fn resolution(&mut self) -> Result<(u32, u32)> {
        if let Some(r) = self.resolution {
            return Ok(r);
        }
        let output = self.transport()?.shell(&["wm", "size"]).await?;
        let r = parse_wm_size(&output).ok_or_else(|| {
            DeviceError::Parse(format!("cannot read resolution from {:?}", output))
        })?;
        self.resolution = Some(r);
        Ok(r)
    }

    pub fn track_forward(&mut self, port: u16) {
        if !self.forwarded_ports.contains(&port) {
            self.forwarded_ports.push(port);
        }
    }

    /// Orderly shutdown: remove forwards, drop the link.
    pub async fn close(&mut self) {
        for port in std::mem::take(&mut self.forwarded_ports) {
            let _ = self.transport.forward_remove(port).await;
        }
        let _ = self.transport.disconnect_device().await;
        self.state = SessionState::Disconnected;
        self.identity = None;
        self.orientation = None;
        self.resolution = None;
    }

    #[cfg(test)]
    pub(crate) fn for_tests(transport: AdbTransport) -> Self {
        Self {
            transport,
            state: SessionState::Ready,
            identity: None,
            orientation: Some(0),
            resolution: Some((1280, 720)),
            forwarded_ports: Vec::new(),
            reconnect_delay: Duration::from_millis(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionTimingConfig;

    fn test_session() -> Session {
        let transport = AdbTransport::new(
            "adb",
            "127.0.0.1:5555",
            ConnectionTimingConfig::default(),
        );
        Session::for_tests(transport)
    }

    #[test]
    fn orientation_parses_from_dumpsys() {
        let out = "DisplayDeviceInfo{..., rotation 0, orientation=1, ...}";
        assert_eq!(parse_orientation(out), Some(1));
        assert_eq!(parse_orientation("no such field"), None);
    }

    #[test]
    fn wm_size_parses() {
        assert_eq!(parse_wm_size("Physical size: 1280x720"), Some((1280, 720)));
        assert_eq!(
            parse_wm_size("Physical size: 1080x2400\nOverride size: 1080x2400"),
            Some((1080, 2400))
        );
        assert_eq!(parse_wm_size("garbage"), None);
    }

    #[test]
    fn lost_session_refuses_transport() {
        let mut session = test_session();
        assert!(session.transport().is_ok());
        session.mark_lost();
        assert!(matches!(
            session.transport(),
            Err(DeviceError::TransportLost(_))
        ));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn mark_lost_drops_dependent_caches() {
        let mut session = test_session();
        session.track_forward(20100);
        session.mark_lost();
        assert!(session.identity().is_none());
        assert!(session.forwarded_ports.is_empty());
    }

    #[test]
    fn invalidate_orientation_clears_cache_only() {
        let mut session = test_session();
        session.invalidate_orientation();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.transport().is_ok());
    }
}
