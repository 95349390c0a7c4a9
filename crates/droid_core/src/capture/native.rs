//! Vendor shared-memory capture and touch interface
//!
//! Some emulators export an in-process renderer API that hands frames over
//! shared memory, an order of magnitude faster than any adb path. The API
//! is a plain C function table; the embedder loads the vendor library and
//! supplies it behind [`VendorShmApi`].
//!
//! None of the calls have a cooperative cancellation hook and all of them
//! occasionally hang inside the emulator, so every call runs on a
//! disposable blocking worker with a timeout. On timeout the worker is
//! abandoned, never joined; a completion arriving after abandonment is
//! discarded.

use crate::capture::codec::{frame_from_bgra_flipped, Frame};
use crate::error::{DeviceError, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Raw C signature of the vendor capture entry point:
/// `(connection, display, buffer_len, *width, *height, *pixels) -> status`.
/// Zero status is success. With a null pixel pointer the call only reports
/// the current resolution.
pub type RawCaptureFn = unsafe extern "C" fn(
    connection: i32,
    display: i32,
    buffer_len: i32,
    width: *mut i32,
    height: *mut i32,
    pixels: *mut u8,
) -> i32;

/// The vendor renderer function table.
///
/// Implementations wrap the loaded vendor library; tests substitute fakes.
/// All methods are blocking and may stall; callers must go through
/// [`VendorShmConn`], which guards every call with a worker timeout.
pub trait VendorShmApi: Send + Sync {
    /// Returns a connection handle, 0 on failure.
    fn connect(&self, instance_id: u32) -> i32;
    fn disconnect(&self, connection: i32);
    /// Capture into `pixels` (BGRA, bottom-left origin), or query the
    /// resolution when `pixels` is None. Non-zero status is an error.
    fn capture_display(
        &self,
        connection: i32,
        display: u32,
        width: &mut i32,
        height: &mut i32,
        pixels: Option<&mut [u8]>,
    ) -> i32;
    /// Touch down at coordinates already converted to the vendor space.
    fn touch_down(&self, connection: i32, display: u32, x: i32, y: i32) -> i32;
    fn touch_up(&self, connection: i32, display: u32) -> i32;
}

/// Run one blocking vendor call on a throwaway worker.
///
/// The worker is abandoned on timeout: the handle is dropped, the closure
/// keeps running to completion somewhere in the blocking pool, and whatever
/// it eventually produces has no observer.
async fn call_guarded<T, F>(timeout: Duration, what: &str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(f);
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_err)) => Err(DeviceError::CommandFailed(format!(
            "{} worker panicked: {}",
            what, join_err
        ))),
        Err(_) => {
            warn!("{} call timed out after {:?}, worker abandoned", what, timeout);
            Err(DeviceError::Timeout(format!(
                "{} timed out after {:?}",
                what, timeout
            )))
        }
    }
}

/// One connection to the vendor renderer of one emulator instance.
///
/// Shared between the capture pipeline and the native injector; the
/// single-caller invariant means the two never run concurrently.
pub struct VendorShmConn {
    api: Arc<dyn VendorShmApi>,
    instance_id: u32,
    display_id: u32,
    connect_id: i32,
    width: i32,
    height: i32,
    call_timeout: Duration,
}

impl VendorShmConn {
    pub fn new(api: Arc<dyn VendorShmApi>, instance_id: u32, call_timeout: Duration) -> Self {
        Self {
            api,
            instance_id,
            display_id: 0,
            connect_id: 0,
            width: 0,
            height: 0,
            call_timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connect_id > 0
    }

    /// Cached height of the vendor display; needed for coordinate
    /// conversion before injecting.
    pub fn display_height(&self) -> i32 {
        self.height
    }

    pub async fn connect(&mut self) -> Result<()> {
        if self.connect_id > 0 {
            return Ok(());
        }
        let api = self.api.clone();
        let instance = self.instance_id;
        let id = call_guarded(self.call_timeout, "vendor connect", move || {
            api.connect(instance)
        })
        .await?;
        if id == 0 {
            return Err(DeviceError::TransportLost(
                "vendor renderer connect failed, is the emulator running?".to_string(),
            ));
        }
        debug!("vendor renderer connected: {}", id);
        self.connect_id = id;
        Ok(())
    }

    pub async fn disconnect(&mut self) {
        if self.connect_id == 0 {
            return;
        }
        let api = self.api.clone();
        let id = self.connect_id;
        let _ = call_guarded(self.call_timeout, "vendor disconnect", move || {
            api.disconnect(id)
        })
        .await;
        self.connect_id = 0;
        self.width = 0;
        self.height = 0;
    }

    pub async fn reconnect(&mut self) -> Result<()> {
        self.disconnect().await;
        self.connect().await
    }

    /// Query the resolution with a null pixel pointer and cache it.
    pub async fn refresh_resolution(&mut self) -> Result<(i32, i32)> {
        self.connect().await?;
        let api = self.api.clone();
        let (id, display) = (self.connect_id, self.display_id);
        let (status, w, h) = call_guarded(self.call_timeout, "vendor resolution", move || {
            let (mut w, mut h) = (0i32, 0i32);
            let status = api.capture_display(id, display, &mut w, &mut h, None);
            (status, w, h)
        })
        .await?;
        if status != 0 {
            return Err(DeviceError::TransportLost(format!(
                "vendor resolution query failed with status {}",
                status
            )));
        }
        self.width = w;
        self.height = h;
        Ok((w, h))
    }

    /// Capture one frame. The vendor hands back BGRA with a bottom-left
    /// origin; the codec flips and reorders into the canonical layout.
    pub async fn screenshot(&mut self) -> Result<Frame> {
        self.connect().await?;
        self.refresh_resolution().await?;
        let (width, height) = (self.width, self.height);
        if width <= 0 || height <= 0 {
            return Err(DeviceError::CaptureCorrupted(format!(
                "vendor reported resolution {}x{}",
                width, height
            )));
        }

        let api = self.api.clone();
        let (id, display) = (self.connect_id, self.display_id);
        let (status, w, h, pixels) =
            call_guarded(self.call_timeout, "vendor capture", move || {
                let (mut w, mut h) = (width, height);
                let mut pixels = vec![0u8; width as usize * height as usize * 4];
                let status = api.capture_display(id, display, &mut w, &mut h, Some(&mut pixels));
                (status, w, h, pixels)
            })
            .await?;
        if status != 0 {
            return Err(DeviceError::TransportLost(format!(
                "vendor capture failed with status {}",
                status
            )));
        }
        frame_from_bgra_flipped(w as u32, h as u32, &pixels)
    }

    /// Touch down in screen coordinates; conversion into the vendor's
    /// height-major space happens here.
    pub async fn touch_down(&mut self, x: i32, y: i32) -> Result<()> {
        self.connect().await?;
        if self.height == 0 {
            self.refresh_resolution().await?;
        }
        let (vx, vy) = convert_xy(x, y, self.height);
        let api = self.api.clone();
        let (id, display) = (self.connect_id, self.display_id);
        let status = call_guarded(self.call_timeout, "vendor touch down", move || {
            api.touch_down(id, display, vx, vy)
        })
        .await?;
        if status != 0 {
            return Err(DeviceError::TransportLost(format!(
                "vendor touch down failed with status {}",
                status
            )));
        }
        Ok(())
    }

    pub async fn touch_up(&mut self) -> Result<()> {
        self.connect().await?;
        let api = self.api.clone();
        let (id, display) = (self.connect_id, self.display_id);
        let status = call_guarded(self.call_timeout, "vendor touch up", move || {
            api.touch_up(id, display)
        })
        .await?;
        if status != 0 {
            return Err(DeviceError::TransportLost(format!(
                "vendor touch up failed with status {}",
                status
            )));
        }
        Ok(())
    }
}

/// Convert screen coordinates into the vendor touch space, which is
/// height-major: axes swap and the new x mirrors against the display
/// height.
pub fn convert_xy(x: i32, y: i32, display_height: i32) -> (i32, i32) {
    (display_height - y, x)
}
