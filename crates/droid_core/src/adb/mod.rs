//! adb transport layer
//!
//! This module provides:
//! - `serial`: serial normalization and emulator-family heuristics
//! - `transport`: adb process invocation, forwarding, server control

mod serial;
mod transport;

pub use serial::{check_serial, is_local_emulator, revise_serial, serial_port, shm_instance_id};
pub use transport::{classify_adb_failure, AdbTransport, ConnectionType, DeviceEntry};
