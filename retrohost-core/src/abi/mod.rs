//! retrohost-core ABI module
//!
//! This module defines the native contract between:
//! - **Host**: `retrohost-core` (the frontend)
//! - **Plugin**: the dynamically loaded libretro core
//!
//! ## Exports (plugin -> host)
//! The plugin exports a fixed set of C symbols. Two of them are mandatory:
//! - `retro_init()`
//! - `retro_run()`
//!
//! `retro_set_environment` is required before anything else is resolved, because
//! plugins are allowed to query the environment from inside that call.
//!
//! ## Callbacks (host -> plugin)
//! The host hands the plugin plain `extern "C"` function pointers:
//! - environment: `bool (unsigned cmd, void *data)`
//! - video refresh: `void (const void *data, unsigned w, unsigned h, size_t pitch)`
//! - audio sample: `void (int16_t l, int16_t r)`
//! - audio sample batch: `size_t (const int16_t *data, size_t frames)`
//! - input poll: `void (void)`
//! - input state: `int16_t (unsigned port, unsigned device, unsigned index, unsigned id)`
//!
//! The record layouts (geometry, timing, system info, game info) come from
//! `libretro-sys` and are re-exported here so the rest of the crate names them in
//! one place.

use std::ffi::{c_char, c_uint, c_void};

pub use libretro_sys::{GameGeometry, GameInfo, SystemAvInfo, SystemInfo, SystemTiming};

/// libretro API version this host speaks.
pub const API_VERSION: c_uint = libretro_sys::API_VERSION;

/// Plugin export names (entry points).
pub mod symbols {
    pub const SET_ENVIRONMENT: &str = "retro_set_environment";
    pub const SET_VIDEO_REFRESH: &str = "retro_set_video_refresh";
    pub const SET_AUDIO_SAMPLE: &str = "retro_set_audio_sample";
    pub const SET_AUDIO_SAMPLE_BATCH: &str = "retro_set_audio_sample_batch";
    pub const SET_INPUT_POLL: &str = "retro_set_input_poll";
    pub const SET_INPUT_STATE: &str = "retro_set_input_state";

    pub const INIT: &str = "retro_init";
    pub const DEINIT: &str = "retro_deinit";
    pub const API_VERSION: &str = "retro_api_version";
    pub const GET_SYSTEM_INFO: &str = "retro_get_system_info";
    pub const GET_SYSTEM_AV_INFO: &str = "retro_get_system_av_info";
    pub const SET_CONTROLLER_PORT_DEVICE: &str = "retro_set_controller_port_device";
    pub const RESET: &str = "retro_reset";
    pub const RUN: &str = "retro_run";
    pub const SERIALIZE_SIZE: &str = "retro_serialize_size";
    pub const SERIALIZE: &str = "retro_serialize";
    pub const UNSERIALIZE: &str = "retro_unserialize";
    pub const CHEAT_RESET: &str = "retro_cheat_reset";
    pub const CHEAT_SET: &str = "retro_cheat_set";
    pub const LOAD_GAME: &str = "retro_load_game";
    pub const UNLOAD_GAME: &str = "retro_unload_game";
    pub const GET_REGION: &str = "retro_get_region";
    pub const GET_MEMORY_DATA: &str = "retro_get_memory_data";
    pub const GET_MEMORY_SIZE: &str = "retro_get_memory_size";
}

// Callback signatures handed to the plugin.
pub type EnvironmentFn = unsafe extern "C" fn(cmd: c_uint, data: *mut c_void) -> bool;
pub type VideoRefreshFn =
    unsafe extern "C" fn(data: *const c_void, width: c_uint, height: c_uint, pitch: usize);
pub type AudioSampleFn = unsafe extern "C" fn(left: i16, right: i16);
pub type AudioSampleBatchFn = unsafe extern "C" fn(data: *const i16, frames: usize) -> usize;
pub type InputPollFn = unsafe extern "C" fn();
pub type InputStateFn =
    unsafe extern "C" fn(port: c_uint, device: c_uint, index: c_uint, id: c_uint) -> i16;

// Plugin entry point signatures.
pub type SetEnvironmentFn = unsafe extern "C" fn(EnvironmentFn);
pub type SetVideoRefreshFn = unsafe extern "C" fn(VideoRefreshFn);
pub type SetAudioSampleFn = unsafe extern "C" fn(AudioSampleFn);
pub type SetAudioSampleBatchFn = unsafe extern "C" fn(AudioSampleBatchFn);
pub type SetInputPollFn = unsafe extern "C" fn(InputPollFn);
pub type SetInputStateFn = unsafe extern "C" fn(InputStateFn);
pub type VoidFn = unsafe extern "C" fn();
pub type ApiVersionFn = unsafe extern "C" fn() -> c_uint;
pub type GetSystemInfoFn = unsafe extern "C" fn(*mut SystemInfo);
pub type GetSystemAvInfoFn = unsafe extern "C" fn(*mut SystemAvInfo);
pub type SetControllerPortDeviceFn = unsafe extern "C" fn(port: c_uint, device: c_uint);
pub type SerializeSizeFn = unsafe extern "C" fn() -> usize;
pub type SerializeFn = unsafe extern "C" fn(data: *mut c_void, size: usize) -> bool;
pub type UnserializeFn = unsafe extern "C" fn(data: *const c_void, size: usize) -> bool;
pub type CheatSetFn = unsafe extern "C" fn(index: c_uint, enabled: bool, code: *const c_char);
pub type LoadGameFn = unsafe extern "C" fn(game: *const GameInfo) -> bool;
pub type GetRegionFn = unsafe extern "C" fn() -> c_uint;
pub type GetMemoryDataFn = unsafe extern "C" fn(id: c_uint) -> *mut c_void;
pub type GetMemorySizeFn = unsafe extern "C" fn(id: c_uint) -> usize;

/// Logger handed out for GET_LOG_INTERFACE.
///
/// The plugin calls this as a C variadic (`level, fmt, ...`). Only the two fixed
/// arguments are read on the host side; the variadic tail is never touched, which
/// is ABI compatible on the supported targets.
pub type LogPrintfFn = unsafe extern "C" fn(level: c_uint, fmt: *const c_char);

/// `struct retro_log_callback`.
#[repr(C)]
pub struct LogCallback {
    pub log: LogPrintfFn,
}

/// Raw pixel format codes accepted by SET_PIXEL_FORMAT.
pub mod pixel_format {
    use std::ffi::c_uint;

    pub const XRGB1555: c_uint = 0;
    pub const XRGB8888: c_uint = 1;
    pub const RGB565: c_uint = 2;
    /// Non-standard alias some plugin families send; carries the RGB565 layout.
    pub const RGB565_ALIAS: c_uint = 12;
}

/// Input device ids.
pub const DEVICE_JOYPAD: c_uint = libretro_sys::DEVICE_JOYPAD;
pub const DEVICE_KEYBOARD: c_uint = 3;

/// Joypad id that asks for all 16 buttons of a port as a bitmask.
pub const DEVICE_ID_JOYPAD_MASK: c_uint = 256;

/// Joypad button ids (libretro numbering).
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum JoypadButton {
    B = 0,
    Y = 1,
    Select = 2,
    Start = 3,
    Up = 4,
    Down = 5,
    Left = 6,
    Right = 7,
    A = 8,
    X = 9,
    L1 = 10,
    R1 = 11,
    L2 = 12,
    R2 = 13,
    L3 = 14,
    R3 = 15,
}

/// Number of ports and buttons tracked in the joypad table.
pub const MAX_PORTS: usize = 16;
pub const MAX_BUTTONS: usize = 16;

/// Size of the keyboard table (`RETROK_LAST`).
pub const KEYCODE_COUNT: usize = 324;

/// Memory region ids for get-memory-data/size.
pub mod memory {
    use std::ffi::c_uint;

    pub const SAVE_RAM: c_uint = 0;
    pub const RTC: c_uint = 1;
    pub const SYSTEM_RAM: c_uint = 2;
    pub const VIDEO_RAM: c_uint = 3;
}

/// Log levels (`enum retro_log_level`).
#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    pub fn from_raw(raw: c_uint) -> Self {
        match raw {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            _ => LogLevel::Error,
        }
    }
}
