//! Touch injection backends
//!
//! This module provides:
//! - `builder`: gesture events, the builder, the text wire protocol and
//!   gesture synthesis
//! - `text`: the persistent touchd text-protocol connection
//! - `shell`: `adb shell input` fallback
//! - `native`: vendor shared-memory touch calls

pub mod builder;
pub mod native;
pub mod shell;
pub mod text;

pub use builder::{
    synthesize_long_press, synthesize_swipe, synthesize_tap, Gesture, GestureBuilder,
    GestureEvent, DEFAULT_CONTACT, DEFAULT_PRESSURE,
};
pub use native::NativeInjector;
pub use shell::ShellInjector;
pub use text::{HelperInfo, TextInjector};
