//! Device facade
//!
//! One `Device` per target: it owns the session, the capture pipeline, the
//! injectors and the watchdog, and is the only type external callers need.
//! Capture and inject calls run their attempts through the retry engine;
//! the remediation bound to each failure category lives here because it
//! needs to touch several components at once.

use crate::adb::shm_instance_id;
use crate::backend::{
    capture_fallback, install_swiftcap, install_touchd, probe_backends, select_capture,
    select_control, BackendDescriptor,
};
use crate::capture::native::{VendorShmApi, VendorShmConn};
use crate::capture::CapturePipeline;
use crate::capture::codec::Frame;
use crate::config::{CaptureMethod, ControlMethod, CoreConfig};
use crate::error::{DeviceError, Result};
use crate::inject::{
    synthesize_long_press, synthesize_swipe, synthesize_tap, Gesture, GestureEvent,
    NativeInjector, ShellInjector, TextInjector,
};
use crate::retry::{ErrorCategory, RetryContext};
use crate::session::Session;
use crate::watchdog::Watchdog;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Derive a loop-detector identifier from a gesture: taps on the same
/// control land in the same coarse cell even with jitter applied.
fn gesture_label(gesture: &Gesture) -> String {
    for event in gesture.events() {
        if let GestureEvent::Down { x, y, .. } = event {
            return format!("touch_{}_{}", x / 64, y / 64);
        }
    }
    "wait".to_string()
}

/// Live handle to one device.
pub struct Device {
    config: CoreConfig,
    session: Session,
    backends: Vec<BackendDescriptor>,
    pipeline: CapturePipeline,
    control_method: ControlMethod,
    shell_injector: ShellInjector,
    text_injector: Option<TextInjector>,
    prewarm: Option<JoinHandle<Result<TextInjector>>>,
    vendor: Option<VendorShmConn>,
    watchdog: Watchdog,
}

impl Device {
    /// Connect to `target` and resolve backends.
    ///
    /// `vendor_api` is the loaded vendor renderer library, when the
    /// embedder has one; without it the shared-memory backends are skipped
    /// by selection.
    pub async fn connect(
        target: &str,
        config: CoreConfig,
        vendor_api: Option<Arc<dyn VendorShmApi>>,
    ) -> Result<Self> {
        let mut session = Session::new(target, &config);

        // Connecting is itself retried: a sleeping emulator often needs an
        // adb server kick before it answers.
        let mut ctx = RetryContext::new(&config.retry);
        loop {
            match session.establish().await {
                Ok(()) => break,
                Err(e) => {
                    let category = ctx.record(e)?;
                    if category == ErrorCategory::TransportLost && ctx.attempts() >= 2 {
                        if let Err(e) = session.restart_server_and_reconnect().await {
                            warn!("Server restart during connect failed: {}", e);
                        } else {
                            break;
                        }
                    }
                    ctx.backoff().await;
                }
            }
        }

        let identity = session
            .identity()
            .cloned()
            .ok_or_else(|| DeviceError::DeviceNotFound(target.to_string()))?;

        let vendor = vendor_api.and_then(|api| {
            shm_instance_id(&identity.serial).map(|instance| {
                VendorShmConn::new(api, instance, config.timing.native_call_timeout())
            })
        });

        let transport = session.transport()?.clone();
        let backends = probe_backends(&transport, &identity, vendor.is_some()).await?;
        let capture_method = select_capture(&backends, config.capture_method);
        let control_method = select_control(&backends, config.control_method);

        let pipeline = CapturePipeline::new(capture_method, config.timing.capture.clone());
        let shell_injector = ShellInjector::new(config.timing.inject.clone());
        let watchdog = Watchdog::new(&config.watchdog);

        let mut device = Self {
            config,
            session,
            backends,
            pipeline,
            control_method,
            shell_injector,
            text_injector: None,
            prewarm: None,
            vendor,
            watchdog,
        };
        device.spawn_prewarm();
        Ok(device)
    }

    pub fn serial(&self) -> &str {
        self.session.serial()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn backends(&self) -> &[BackendDescriptor] {
        &self.backends
    }

    pub fn capture_method(&self) -> CaptureMethod {
        self.pipeline.method()
    }

    pub fn control_method(&self) -> ControlMethod {
        self.control_method
    }

    /// Tell the watchdog the automation made real progress (a screen it
    /// was waiting for appeared, a task step completed).
    pub fn notify_progress(&mut self) {
        self.watchdog.progress();
    }

    /// Note a target the caller is waiting to appear; reported if the
    /// device is later declared unresponsive.
    pub fn note_wait(&mut self, id: &str) {
        self.watchdog.note_wait(id);
    }

    /// Opening the touch transport costs a helper start and handshake;
    /// warming it in the background hides that behind session setup.
    fn spawn_prewarm(&mut self) {
        if self.control_method != ControlMethod::Touchd || self.text_injector.is_some() {
            return;
        }
        let Ok(transport) = self.session.transport().map(Clone::clone) else {
            return;
        };
        let port_range = self.config.forward_port_range();
        debug!("Pre-warming touchd connection");
        self.prewarm = Some(tokio::spawn(async move {
            TextInjector::open(&transport, port_range).await
        }));
    }

    /// Join the pre-warm task before the first send.
    async fn join_prewarm(&mut self) {
        let Some(handle) = self.prewarm.take() else {
            return;
        };
        match handle.await {
            Ok(Ok(injector)) => {
                if let Some(port) = injector.forwarded_port {
                    self.session.track_forward(port);
                }
                self.text_injector = Some(injector);
            }
            Ok(Err(e)) => warn!("touchd pre-warm failed, will open lazily: {}", e),
            Err(e) => warn!("touchd pre-warm task died: {}", e),
        }
    }

    async fn ensure_text_injector(&mut self) -> Result<()> {
        self.join_prewarm().await;
        if self.text_injector.is_none() {
            let transport = self.session.transport()?.clone();
            let injector =
                TextInjector::open(&transport, self.config.forward_port_range()).await?;
            if let Some(port) = injector.forwarded_port {
                self.session.track_forward(port);
            }
            self.text_injector = Some(injector);
        }
        Ok(())
    }

    /// Capture the current screen, decoded and orientation-normalized.
    pub async fn screenshot(&mut self) -> Result<Frame> {
        self.watchdog.check_stuck()?;

        let mut ctx = RetryContext::new(&self.config.retry);
        loop {
            match self.screenshot_once().await {
                Ok(frame) => return Ok(frame),
                Err(e) => {
                    let category = ctx.record(e)?;
                    self.remediate(category, ctx.attempts()).await;
                    ctx.backoff().await;
                }
            }
        }
    }

    async fn screenshot_once(&mut self) -> Result<Frame> {
        let orientation = self.session.orientation().await?;
        let transport = self.session.transport()?.clone();
        let result = self
            .pipeline
            .capture(&transport, self.vendor.as_mut(), orientation)
            .await;
        if result.is_err() {
            // A failed capture may mean the panel rotated under us;
            // re-query so capture and touch mapping stay consistent.
            self.session.invalidate_orientation();
        }
        result
    }

    /// Inject one gesture batch through the active backend.
    pub async fn inject(&mut self, gesture: Gesture) -> Result<()> {
        let label = gesture_label(&gesture);
        self.inject_as(&label, gesture).await
    }

    /// Inject with an explicit operation identifier for the loop detector.
    pub async fn inject_as(&mut self, label: &str, gesture: Gesture) -> Result<()> {
        if gesture.is_empty() {
            return Ok(());
        }
        // Inspected before the operation runs; a detected loop is surfaced,
        // never sent.
        self.watchdog.record_operation(label)?;

        let mut ctx = RetryContext::new(&self.config.retry);
        loop {
            // Replaying after a transient send failure may double a
            // low-cost touch; accepted.
            match self.inject_once(gesture.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    let category = ctx.record(e)?;
                    self.remediate(category, ctx.attempts()).await;
                    ctx.backoff().await;
                }
            }
        }
    }

    async fn inject_once(&mut self, gesture: Gesture) -> Result<()> {
        match self.control_method {
            ControlMethod::ShellInput => {
                let transport = self.session.transport()?.clone();
                self.shell_injector.send(&transport, gesture).await
            }
            ControlMethod::Touchd => {
                self.ensure_text_injector().await?;
                match self.text_injector.as_mut() {
                    Some(injector) => injector.send(gesture).await,
                    None => Err(DeviceError::InjectionToolMissing(
                        "touchd connection unavailable".to_string(),
                    )),
                }
            }
            ControlMethod::VendorShm => {
                let conn = self.vendor.as_mut().ok_or_else(|| {
                    DeviceError::InjectionToolMissing(
                        "vendor shared-memory interface not initialized".to_string(),
                    )
                })?;
                NativeInjector::send(conn, gesture).await
            }
            ControlMethod::Auto => Err(DeviceError::Config(
                "control method not resolved before use".to_string(),
            )),
        }
    }

    /// Tap at screen coordinates.
    pub async fn tap(&mut self, x: i32, y: i32) -> Result<()> {
        self.inject(synthesize_tap(x, y)).await
    }

    /// Long press at screen coordinates.
    pub async fn long_press(&mut self, x: i32, y: i32, duration_ms: u64) -> Result<()> {
        self.inject(synthesize_long_press(x, y, duration_ms)).await
    }

    /// Swipe between two points. Endpoints under the minimum distance are
    /// dropped as a no-op and reported as success.
    pub async fn swipe(&mut self, from: (i32, i32), to: (i32, i32)) -> Result<()> {
        match synthesize_swipe(from, to, &self.config.swipe, &self.config.timing.inject) {
            Some(gesture) => {
                let label = format!("swipe_{}_{}", from.0 / 64, from.1 / 64);
                self.inject_as(&label, gesture).await
            }
            None => {
                debug!(
                    "Swipe {:?} -> {:?} under minimum distance, dropped",
                    from, to
                );
                Ok(())
            }
        }
    }

    /// Run the remediation bound to a failure category. All remediations
    /// are idempotent; nested retrying calls may repeat them.
    async fn remediate(&mut self, category: ErrorCategory, failed_attempts: u32) {
        match category {
            ErrorCategory::TransportLost => {
                // Plain reconnect first; from the third failure on, assume
                // the local bridge itself is wedged and restart it too.
                let result = if failed_attempts >= 3 {
                    self.session.restart_server_and_reconnect().await
                } else {
                    self.session.reconnect().await
                };
                match result {
                    Ok(()) => info!("Session to {} reestablished", self.session.serial()),
                    Err(e) => warn!("Reconnect remediation failed: {}", e),
                }
                self.after_reconnect().await;
            }
            ErrorCategory::CaptureCorrupted => {
                // First corruption is retried on the same backend; repeats
                // push the pipeline down the fallback chain.
                if failed_attempts >= 2 {
                    if let Some(next) = capture_fallback(self.pipeline.method()) {
                        warn!("Capture keeps corrupting, falling back to {:?}", next);
                        self.pipeline.set_method(next);
                    }
                }
            }
            ErrorCategory::CaptureToolMissing => {
                if let Ok(transport) = self.session.transport().map(Clone::clone) {
                    match install_swiftcap(&transport, self.config.swiftcap_local.as_deref())
                        .await
                    {
                        Ok(()) => self.pipeline.invalidate(),
                        Err(e) => {
                            warn!("swiftcap reinstall failed: {}", e);
                            if let Some(next) = capture_fallback(self.pipeline.method()) {
                                self.pipeline.set_method(next);
                            }
                        }
                    }
                }
            }
            ErrorCategory::InjectionToolMissing => {
                if let Ok(transport) = self.session.transport().map(Clone::clone) {
                    match install_touchd(&transport, self.config.touchd_local.as_deref()).await {
                        Ok(()) => {
                            // Reopen against the fresh install on next use
                            if let Some(mut injector) = self.text_injector.take() {
                                injector.close().await;
                            }
                        }
                        Err(e) => {
                            warn!("touchd reinstall failed, using shell input: {}", e);
                            self.control_method = ControlMethod::ShellInput;
                        }
                    }
                }
            }
            ErrorCategory::Other => {}
        }
    }

    /// Drop every cache and connection derived from the old link.
    async fn after_reconnect(&mut self) {
        self.pipeline.invalidate();
        if let Some(mut injector) = self.text_injector.take() {
            injector.close().await;
        }
        if let Some(vendor) = self.vendor.as_mut() {
            vendor.disconnect().await;
        }
        self.watchdog.reset();
        self.spawn_prewarm();
    }

    /// Orderly shutdown.
    pub async fn close(&mut self) {
        if let Some(handle) = self.prewarm.take() {
            handle.abort();
        }
        if let Some(mut injector) = self.text_injector.take() {
            injector.close().await;
        }
        if let Some(vendor) = self.vendor.as_mut() {
            vendor.disconnect().await;
        }
        self.session.close().await;
        info!("Device {} closed", self.session.serial());
    }
}

/// Connect to a device. Top-level convenience mirroring `Device::connect`
/// without a vendor library.
pub async fn connect(target: &str, config: CoreConfig) -> Result<Device> {
    Device::connect(target, config, None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::GestureBuilder;

    #[test]
    fn gesture_label_buckets_jittered_taps_together() {
        let mut b = GestureBuilder::new();
        b.down(100, 200).commit();
        let a = gesture_label(&b.build());
        b.down(102, 198).commit();
        let c = gesture_label(&b.build());
        assert_eq!(a, c);
    }

    #[test]
    fn gesture_label_for_wait_only_batches() {
        let mut b = GestureBuilder::new();
        b.wait(100).commit();
        assert_eq!(gesture_label(&b.build()), "wait");
    }
}
