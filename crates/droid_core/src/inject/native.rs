//! Native touch injection through the vendor shared-memory interface
//!
//! Down and up map directly onto vendor calls; there is no line protocol.
//! A down while a contact is already held is interpreted by the vendor as
//! slide movement, so moves reuse the down call.

use crate::capture::native::VendorShmConn;
use crate::error::Result;
use crate::inject::builder::{Gesture, GestureEvent};
use std::time::Duration;

/// Replays gesture batches as vendor touch calls.
pub struct NativeInjector;

impl NativeInjector {
    pub async fn send(conn: &mut VendorShmConn, gesture: Gesture) -> Result<()> {
        for event in gesture.events() {
            match event {
                GestureEvent::Down { x, y, .. } | GestureEvent::Move { x, y, .. } => {
                    conn.touch_down(*x, *y).await?;
                }
                GestureEvent::Up { .. } => {
                    conn.touch_up().await?;
                }
                GestureEvent::Wait { ms } => {
                    tokio::time::sleep(Duration::from_millis(*ms)).await;
                }
                GestureEvent::Commit => {}
            }
        }
        Ok(())
    }
}
