//! `extern "C"` callbacks handed to the plugin.
//!
//! None of these carry a context pointer, so each one looks up the registered
//! session through [`crate::state::with_active`]. With no session registered the
//! call is logged and answered with a neutral value.

use std::ffi::{c_uint, c_void};

use crate::environment;
use crate::loader::Callbacks;
use crate::state;

/// The full callback set bound after a game loads.
pub fn table() -> Callbacks {
    Callbacks {
        video_refresh,
        audio_sample,
        audio_sample_batch,
        input_poll,
        input_state,
    }
}

pub unsafe extern "C" fn environment(cmd: c_uint, data: *mut c_void) -> bool {
    // SAFETY: the plugin passes the payload type that belongs to `cmd`.
    state::with_active(|session| unsafe { environment::handle(session, cmd, data) })
        .unwrap_or_else(|| {
            tracing::warn!(cmd, "environment command with no active session");
            false
        })
}

pub unsafe extern "C" fn video_refresh(
    data: *const c_void,
    width: c_uint,
    height: c_uint,
    pitch: usize,
) {
    // Errors are logged and counted by the session.
    let _ = state::with_active(|session| unsafe {
        // SAFETY: the plugin guarantees `height` rows of `pitch` bytes at `data`.
        session.present_raw(data.cast(), width, height, pitch)
    });
}

pub unsafe extern "C" fn audio_sample(left: i16, right: i16) {
    state::with_active(|session| session.push_audio_sample(left, right));
}

pub unsafe extern "C" fn audio_sample_batch(data: *const i16, frames: usize) -> usize {
    // A slice may not span more than `isize::MAX` bytes.
    let max = isize::MAX as usize / size_of::<i16>();
    let Some(len) = frames.checked_mul(2).filter(|&len| len <= max) else {
        return 0;
    };
    if data.is_null() || len == 0 {
        return 0;
    }
    // SAFETY: the plugin hands over `frames` interleaved stereo frames.
    let samples = unsafe { std::slice::from_raw_parts(data, len) };
    state::with_active(|session| session.push_audio_batch(samples)).unwrap_or(0)
}

pub unsafe extern "C" fn input_poll() {
    state::with_active(|session| session.latch_input());
}

pub unsafe extern "C" fn input_state(
    port: c_uint,
    device: c_uint,
    index: c_uint,
    id: c_uint,
) -> i16 {
    state::with_active(|session| session.input_state(port, device, index, id)).unwrap_or(0)
}
