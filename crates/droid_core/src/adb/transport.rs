//! adb process transport
//!
//! Every device interaction ultimately runs through the adb binary. This
//! module wraps invocation with per-call timeouts, binary-safe `exec-out`,
//! idempotent port forwarding and server restart, and maps the well-known
//! failure strings onto the core error taxonomy.

use crate::config::ConnectionTimingConfig;
use crate::error::{DeviceError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

lazy_static! {
    static ref FORWARD_LINE: Regex =
        Regex::new(r"^(?P<serial>\S+)\s+(?P<local>\S+)\s+(?P<remote>\S+)$").unwrap();
}

/// Type of adb connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    Usb,
    Emulator,
    Remote,
}

/// One row of `adb devices -l`
#[derive(Debug, Clone)]
pub struct DeviceEntry {
    pub serial: String,
    pub status: String,
    pub connection_type: ConnectionType,
    pub model: Option<String>,
}

/// Interpret an adb failure message as a transport-level error.
///
/// The strings come from adb itself and are stable across versions.
pub fn classify_adb_failure(msg: &str) -> DeviceError {
    let lower = msg.to_lowercase();
    let severed = [
        "device offline",
        "device not found",
        "no devices/emulators found",
        "connection reset",
        "connection refused",
        "closed",
        "protocol fault",
        "cannot connect to daemon",
    ];
    if severed.iter().any(|s| lower.contains(s)) {
        DeviceError::TransportLost(msg.trim().to_string())
    } else {
        DeviceError::CommandFailed(msg.trim().to_string())
    }
}

/// Handle to one device through the adb binary.
///
/// The transport itself is stateless apart from its target serial; session
/// state (identity, orientation, tunnels) lives in [`crate::session::Session`].
#[derive(Debug, Clone)]
pub struct AdbTransport {
    adb_path: String,
    serial: String,
    timing: ConnectionTimingConfig,
}

impl AdbTransport {
    pub fn new(
        adb_path: impl Into<String>,
        serial: impl Into<String>,
        timing: ConnectionTimingConfig,
    ) -> Self {
        Self {
            adb_path: adb_path.into(),
            serial: serial.into(),
            timing,
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn adb_path(&self) -> &str {
        &self.adb_path
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.adb_path);
        cmd.arg("-s").arg(&self.serial);
        for arg in args {
            cmd.arg(arg);
        }
        cmd
    }

    /// adb commands that do not address one device (connect, server control)
    fn bare_command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.adb_path);
        for arg in args {
            cmd.arg(arg);
        }
        cmd
    }

    async fn run(&self, mut cmd: Command, timeout: Duration, what: &str) -> Result<Output> {
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                DeviceError::Timeout(format!("{} timeout after {:?}", what, timeout))
            })?
            .map_err(DeviceError::Io)?;
        Ok(output)
    }

    fn combined(output: &Output) -> String {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        format!("{}{}", stdout, stderr)
    }

    /// Run an adb command against the device, returning combined text output.
    pub async fn adb_command(&self, args: &[&str]) -> Result<String> {
        let timeout = Duration::from_secs(self.timing.shell_timeout);
        let output = self.run(self.command(args), timeout, args[0]).await?;
        let combined = Self::combined(&output);
        if output.status.success() {
            Ok(combined)
        } else {
            Err(classify_adb_failure(&combined))
        }
    }

    /// `adb shell <cmd>`, text output, trailing whitespace stripped.
    pub async fn shell(&self, cmd: &[&str]) -> Result<String> {
        let mut args = vec!["shell"];
        args.extend_from_slice(cmd);
        let out = self.adb_command(&args).await?;
        Ok(out.trim_end().to_string())
    }

    /// `adb shell <cmd>` keeping raw stdout bytes.
    ///
    /// The shell transport is text-oriented and may mangle line endings in
    /// binary output; callers feed the result through the codec's
    /// line-ending correction.
    pub async fn shell_raw(&self, cmd: &[&str]) -> Result<Vec<u8>> {
        let mut args = vec!["shell"];
        args.extend_from_slice(cmd);
        let timeout = Duration::from_secs(self.timing.shell_timeout);
        let output = self.run(self.command(&args), timeout, "shell").await?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(classify_adb_failure(&Self::combined(&output)))
        }
    }

    /// `adb exec-out <cmd>`: binary-safe stdout, no pty in the way.
    pub async fn exec_out(&self, cmd: &[&str]) -> Result<Vec<u8>> {
        let mut args = vec!["exec-out"];
        args.extend_from_slice(cmd);
        let timeout = Duration::from_secs(self.timing.shell_timeout);
        let output = self.run(self.command(&args), timeout, "exec-out").await?;
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(classify_adb_failure(&Self::combined(&output)))
        }
    }

    /// `adb getprop <name>`
    pub async fn getprop(&self, name: &str) -> Result<String> {
        self.shell(&["getprop", name]).await
    }

    /// Push a local file to the device.
    pub async fn push(&self, local: &str, remote: &str) -> Result<()> {
        let out = self.adb_command(&["push", local, remote]).await?;
        debug!("adb push: {}", out.trim());
        Ok(())
    }

    /// True when the remote path exists.
    pub async fn file_exists(&self, remote: &str) -> Result<bool> {
        let out = self
            .shell(&["ls", remote, "2>/dev/null", "&&", "echo", "__found__"])
            .await?;
        Ok(out.contains("__found__"))
    }

    /// Connect a TCP serial. No-op success for USB/emulator serials.
    pub async fn connect_device(&self) -> Result<()> {
        if !self.serial.contains(':') {
            return Ok(());
        }
        let timeout = Duration::from_secs(self.timing.connect_timeout);
        let output = self
            .run(
                self.bare_command(&["connect", &self.serial]),
                timeout,
                "connect",
            )
            .await?;
        let combined = Self::combined(&output);
        let lower = combined.to_lowercase();
        if lower.contains("connected") {
            debug!("adb connect: {}", combined.trim());
            Ok(())
        } else {
            Err(DeviceError::TransportLost(combined.trim().to_string()))
        }
    }

    /// Disconnect a TCP serial. Ignores "not found" answers.
    pub async fn disconnect_device(&self) -> Result<()> {
        if !self.serial.contains(':') {
            return Ok(());
        }
        let timeout = Duration::from_secs(5);
        let _ = self
            .run(
                self.bare_command(&["disconnect", &self.serial]),
                timeout,
                "disconnect",
            )
            .await?;
        Ok(())
    }

    /// Kill and restart the local adb server.
    pub async fn restart_server(&self) -> Result<()> {
        let timeout = Duration::from_secs(5);
        self.run(self.bare_command(&["kill-server"]), timeout, "kill-server")
            .await?;
        tokio::time::sleep(Duration::from_secs_f64(self.timing.server_restart_delay)).await;
        self.run(self.bare_command(&["start-server"]), timeout, "start-server")
            .await?;
        info!("adb server restarted");
        Ok(())
    }

    /// `adb forward tcp:<port> <remote>`, idempotent.
    ///
    /// Reuses an existing forward for the same serial and remote, removes
    /// redundant duplicates, otherwise creates one on a port inside
    /// `port_range`.
    pub async fn forward(&self, remote: &str, port_range: (u16, u16)) -> Result<u16> {
        let list = self.adb_command(&["forward", "--list"]).await?;
        let mut port: u16 = 0;
        for line in list.lines() {
            let Some(caps) = FORWARD_LINE.captures(line.trim()) else {
                continue;
            };
            if &caps["serial"] != self.serial || &caps["remote"] != remote {
                continue;
            }
            let Some(existing) = caps["local"]
                .strip_prefix("tcp:")
                .and_then(|p| p.parse::<u16>().ok())
            else {
                continue;
            };
            if port == 0 {
                info!("Reuse forward: tcp:{} -> {}", existing, remote);
                port = existing;
            } else {
                info!("Remove redundant forward: tcp:{}", existing);
                self.forward_remove(existing).await?;
            }
        }
        if port != 0 {
            return Ok(port);
        }

        let port = crate::util::random_port(port_range);
        info!("Create forward: tcp:{} -> {}", port, remote);
        self.adb_command(&["forward", &format!("tcp:{}", port), remote])
            .await?;
        Ok(port)
    }

    /// Remove one local forward. Removing a nonexistent forward is not an
    /// error.
    pub async fn forward_remove(&self, port: u16) -> Result<()> {
        let local = format!("tcp:{}", port);
        match self.adb_command(&["forward", "--remove", &local]).await {
            Ok(_) => Ok(()),
            Err(DeviceError::CommandFailed(msg)) if msg.contains("not found") => {
                warn!("forward --remove {}: {}", local, msg);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// `adb devices -l`
    pub async fn list_devices(&self) -> Result<Vec<DeviceEntry>> {
        let timeout = Duration::from_secs(5);
        let output = self
            .run(self.bare_command(&["devices", "-l"]), timeout, "devices")
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut devices = Vec::new();
        for line in stdout.lines().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 2 {
                continue;
            }
            let serial = parts[0].to_string();
            let connection_type = if serial.contains(':') {
                ConnectionType::Remote
            } else if serial.starts_with("emulator") {
                ConnectionType::Emulator
            } else {
                ConnectionType::Usb
            };
            let model = parts[2..]
                .iter()
                .find_map(|p| p.strip_prefix("model:"))
                .map(|s| s.to_string());
            devices.push(DeviceEntry {
                serial,
                status: parts[1].to_string(),
                connection_type,
                model,
            });
        }
        Ok(devices)
    }

    /// True when this transport's serial shows up with status "device".
    pub async fn is_alive(&self) -> Result<bool> {
        let devices = self.list_devices().await?;
        Ok(devices
            .iter()
            .any(|d| d.serial == self.serial && d.status == "device"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severed_messages_map_to_transport_lost() {
        assert!(matches!(
            classify_adb_failure("error: device offline"),
            DeviceError::TransportLost(_)
        ));
        assert!(matches!(
            classify_adb_failure("error: device 'emulator-5554' not found"),
            DeviceError::TransportLost(_)
        ));
        assert!(matches!(
            classify_adb_failure("Connection reset by peer"),
            DeviceError::TransportLost(_)
        ));
    }

    #[test]
    fn other_failures_stay_command_failed() {
        assert!(matches!(
            classify_adb_failure("/system/bin/sh: foo: inaccessible or not found"),
            DeviceError::CommandFailed(_)
        ));
    }

    #[test]
    fn forward_line_parses() {
        let caps = FORWARD_LINE
            .captures("127.0.0.1:16384 tcp:20137 localabstract:touchd")
            .unwrap();
        assert_eq!(&caps["serial"], "127.0.0.1:16384");
        assert_eq!(&caps["local"], "tcp:20137");
        assert_eq!(&caps["remote"], "localabstract:touchd");
    }
}
