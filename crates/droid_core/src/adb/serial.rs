//! Device serial normalization
//!
//! User-supplied serials arrive in many shapes: bare ports, full-width
//! punctuation pasted from chat clients, `auto` prefixes left over from
//! other tools. Everything is revised into a canonical form once, at
//! connect time, so the rest of the core never second-guesses it.

use tracing::warn;

/// Revise a raw serial into canonical form.
///
/// Handled shapes:
/// - `127.0.0.1:5555` stays as is
/// - full-width `：` `。` `，` become ASCII
/// - `127.0.0.1.5555` becomes `127.0.0.1:5555`
/// - a bare port `16384` becomes `127.0.0.1:16384`
/// - `auto127.0.0.1:5555` / `autoemulator-5554` lose the `auto` prefix
pub fn revise_serial(serial: &str) -> String {
    let mut serial: String = serial.split_whitespace().collect();
    serial = serial
        .replace('。', ".")
        .replace('，', ".")
        .replace(',', ".")
        .replace('：', ":");
    serial = serial.replace("127.0.0.1.", "127.0.0.1:");

    if let Ok(port) = serial.parse::<u32>() {
        if port > 1000 && port < 65536 {
            serial = format!("127.0.0.1:{}", port);
        }
    }

    serial = serial.replace("12127.0.0.1", "127.0.0.1");
    serial = serial
        .replace("auto127.0.0.1", "127.0.0.1")
        .replace("autoemulator", "emulator");
    serial
}

/// Normalize and log when revision changed anything.
pub fn check_serial(serial: &str) -> String {
    let revised = revise_serial(serial);
    if revised != serial {
        warn!("Serial \"{}\" is revised to \"{}\"", serial, revised);
    }
    revised
}

/// Port of a `127.0.0.1:<port>` or `emulator-<port>` serial, if any.
pub fn serial_port(serial: &str) -> Option<u16> {
    if let Some(rest) = serial.strip_prefix("emulator-") {
        return rest.parse().ok();
    }
    serial.rsplit_once(':').and_then(|(_, p)| p.parse().ok())
}

/// True when the serial addresses an emulator on the local machine.
pub fn is_local_emulator(serial: &str) -> bool {
    serial.starts_with("emulator-") || serial.starts_with("127.0.0.1:")
}

/// Predict the vendor-shm emulator instance id from its adb port.
///
/// Instances listen on `16384 + 32 * k`, and adb may report any port
/// within two of the base. Returns None when the port does not fit the
/// family's layout.
pub fn shm_instance_id(serial: &str) -> Option<u32> {
    let port = serial_port(serial)? as i32;
    let shifted = port - 16384 + 16;
    if shifted < 0 {
        return None;
    }
    let (index, offset) = (shifted / 32, shifted % 32 - 16);
    if (0..32).contains(&index) && (-2..=2).contains(&offset) {
        Some(index as u32)
    } else {
        None
    }
}
