//! Text-protocol touch injection over the touchd helper
//!
//! touchd is pushed to the device and started through an adb shell; it
//! listens on an abstract unix socket that is forwarded to a local TCP
//! port. The connection is persistent: opening it costs a helper start and
//! a handshake, so it is pre-warmed at session construction and reused for
//! every gesture until the session is invalidated.

use crate::adb::AdbTransport;
use crate::backend::{TOUCHD_REMOTE, TOUCHD_SOCKET};
use crate::error::{DeviceError, Result};
use crate::inject::builder::Gesture;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Capabilities advertised by the helper during its handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperInfo {
    pub version: u32,
    pub max_contacts: i32,
    pub max_x: i32,
    pub max_y: i32,
    pub max_pressure: i32,
    /// Helper-side processing time per touch event, milliseconds.
    pub event_delay_ms: u64,
}

/// Persistent connection to one touchd instance.
#[derive(Debug)]
pub struct TextInjector {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    info: HelperInfo,
    /// The `adb shell` process hosting the helper, if this injector
    /// started one. Killed on close.
    helper_process: Option<Child>,
    /// Forwarded local port, removed by the session on invalidation.
    pub forwarded_port: Option<u16>,
}

impl TextInjector {
    /// Full bring-up against a device: check install, start the helper,
    /// forward its socket, connect and handshake.
    pub async fn open(transport: &AdbTransport, port_range: (u16, u16)) -> Result<Self> {
        if !transport.file_exists(TOUCHD_REMOTE).await? {
            return Err(DeviceError::InjectionToolMissing(format!(
                "{} not installed on device",
                TOUCHD_REMOTE
            )));
        }

        let mut cmd = Command::new(transport.adb_path());
        cmd.arg("-s")
            .arg(transport.serial())
            .arg("shell")
            .arg(format!("CLASSPATH={}", TOUCHD_REMOTE))
            .arg("app_process")
            .arg("/")
            .arg("io.touchd.Agent")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let child = cmd.spawn().map_err(DeviceError::Io)?;

        // Give the helper a moment to bind its socket before forwarding
        tokio::time::sleep(Duration::from_millis(500)).await;

        let port = transport.forward(TOUCHD_SOCKET, port_range).await?;
        let stream = tokio::time::timeout(
            Duration::from_secs(5),
            TcpStream::connect(("127.0.0.1", port)),
        )
        .await
        .map_err(|_| DeviceError::Timeout("touchd socket connect timeout".to_string()))?
        .map_err(|e| DeviceError::TransportLost(format!("touchd socket: {}", e)))?;

        let mut injector = Self::from_stream(stream).await?;
        injector.helper_process = Some(child);
        injector.forwarded_port = Some(port);
        Ok(injector)
    }

    /// Handshake over an already-connected socket. Split out so tests can
    /// drive the protocol against a local fake.
    pub async fn from_stream(stream: TcpStream) -> Result<Self> {
        let (read_half, writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let info = Self::handshake(&mut reader).await?;
        info!(
            "touchd connected: version {}, max_contacts {}, range {}x{}, delay {}ms",
            info.version, info.max_contacts, info.max_x, info.max_y, info.event_delay_ms
        );
        Ok(Self {
            reader,
            writer,
            info,
            helper_process: None,
            forwarded_port: None,
        })
    }

    /// Read the `v` / `^` / `$` header lines.
    async fn handshake(reader: &mut BufReader<OwnedReadHalf>) -> Result<HelperInfo> {
        let mut version = 1u32;
        let deadline = Duration::from_secs(5);
        loop {
            let mut line = String::new();
            let n = tokio::time::timeout(deadline, reader.read_line(&mut line))
                .await
                .map_err(|_| {
                    DeviceError::InjectionToolMissing(
                        "no handshake from touchd, probably not installed".to_string(),
                    )
                })?
                .map_err(DeviceError::Io)?;
            if n == 0 {
                return Err(DeviceError::InjectionToolMissing(
                    "touchd closed the socket during handshake".to_string(),
                ));
            }
            let line = line.trim();
            debug!("touchd: {}", line);
            if line == "Aborted" {
                return Err(DeviceError::InjectionToolMissing(
                    "touchd aborted on startup, reinstall required".to_string(),
                ));
            }
            let mut parts = line.split_whitespace();
            match parts.next() {
                Some("v") => {
                    version = parts.next().and_then(|v| v.parse().ok()).unwrap_or(1);
                }
                Some("^") => {
                    let mut num = || parts.next().and_then(|v| v.parse::<i64>().ok());
                    let max_contacts = num().unwrap_or(2) as i32;
                    let max_x = num().unwrap_or(0) as i32;
                    let max_y = num().unwrap_or(0) as i32;
                    let max_pressure = num().unwrap_or(0) as i32;
                    let event_delay_ms = num().unwrap_or(5) as u64;
                    return Ok(HelperInfo {
                        version,
                        max_contacts,
                        max_x,
                        max_y,
                        max_pressure,
                        event_delay_ms,
                    });
                }
                // pid line or noise before the header; keep reading
                _ => continue,
            }
        }
    }

    pub fn info(&self) -> &HelperInfo {
        &self.info
    }

    /// Transmit one committed batch, then block for the helper's declared
    /// processing time plus the batch's own waits. The gesture is consumed;
    /// there is nothing left to resend accidentally.
    pub async fn send(&mut self, gesture: Gesture) -> Result<()> {
        if gesture.is_empty() {
            return Ok(());
        }
        let wire = gesture.to_wire();
        self.writer
            .write_all(wire.as_bytes())
            .await
            .map_err(|e| DeviceError::TransportLost(format!("touchd send: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| DeviceError::TransportLost(format!("touchd flush: {}", e)))?;

        let settle = gesture.total_wait_ms()
            + gesture.touch_event_count() as u64 * self.info.event_delay_ms;
        if settle > 0 {
            tokio::time::sleep(Duration::from_millis(settle)).await;
        }
        Ok(())
    }

    /// Tear down the socket and the hosting shell process.
    pub async fn close(&mut self) {
        let _ = self.writer.shutdown().await;
        if let Some(mut child) = self.helper_process.take() {
            if let Err(e) = child.kill().await {
                warn!("touchd process kill: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::builder::GestureBuilder;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn fake_helper(header: &'static str) -> (TcpStream, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(header.as_bytes()).await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                match sock.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => received.extend_from_slice(&buf[..n]),
                }
            }
            received
        });
        let client = TcpStream::connect(addr).await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn handshake_parses_header() {
        let (client, _server) = fake_helper("v 1\n^ 2 1279 719 2048 7\n$ 12345\n").await;
        let injector = TextInjector::from_stream(client).await.unwrap();
        let info = injector.info();
        assert_eq!(info.version, 1);
        assert_eq!((info.max_x, info.max_y), (1279, 719));
        assert_eq!(info.event_delay_ms, 7);
    }

    #[tokio::test]
    async fn handshake_defaults_event_delay() {
        let (client, _server) = fake_helper("v 1\n^ 10 1079 1919 255\n").await;
        let injector = TextInjector::from_stream(client).await.unwrap();
        assert_eq!(injector.info().event_delay_ms, 5);
    }

    #[tokio::test]
    async fn aborted_helper_is_tool_missing() {
        let (client, _server) = fake_helper("Aborted\n").await;
        let err = TextInjector::from_stream(client).await.unwrap_err();
        assert!(matches!(err, DeviceError::InjectionToolMissing(_)));
    }

    #[tokio::test]
    async fn send_writes_batch_in_order() {
        let (client, server) = fake_helper("v 1\n^ 2 1279 719 2048 0\n").await;
        let mut injector = TextInjector::from_stream(client).await.unwrap();

        let mut b = GestureBuilder::new();
        b.down(100, 200).commit();
        b.up().commit();
        injector.send(b.build()).await.unwrap();
        injector.close().await;

        let received = server.await.unwrap();
        assert_eq!(
            String::from_utf8(received).unwrap(),
            "d 0 100 200 50\nc\nu 0\nc\n"
        );
    }

    #[tokio::test]
    async fn send_on_closed_socket_is_transport_lost() {
        let (client, server) = fake_helper("v 1\n^ 2 1279 719 2048 0\n").await;
        let mut injector = TextInjector::from_stream(client).await.unwrap();
        injector.close().await;
        drop(server);

        let mut b = GestureBuilder::new();
        b.down(1, 1).commit();
        let err = injector.send(b.build()).await.unwrap_err();
        assert!(matches!(err, DeviceError::TransportLost(_)));
    }
}
