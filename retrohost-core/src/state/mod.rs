//! Host-side session state.
//!
//! This module owns the mutable record every other component works on: current
//! geometry and timing, the negotiated pixel format, the canonical frame buffer,
//! the audio ring, and the input tables.
//!
//! Plugin callbacks are plain C functions with no context argument, so the active
//! session is also published in a process-wide slot:
//! - `register` when a core is loaded (fails if another session holds the slot),
//! - `unregister` on unload,
//! - `with_active` from the `extern "C"` trampolines.
//!
//! Locking rule: the session mutex is never held while calling into the plugin.
//! Every callback runs nested inside a plugin call, so it can always take the lock.

use lazy_static::lazy_static;
use parking_lot::Mutex;
use std::ffi::CString;
use std::path::Path;
use std::sync::Arc;

use crate::abi::{GameGeometry, SystemAvInfo};
use crate::av::audio::{self, AudioRingBuffer, SampleAccumulator};
use crate::av::video::{self, FrameBuffer, RawFrame, VideoFormat};
use crate::config::{HostConfig, ReadPolicy};
use crate::environment::CommandTable;
use crate::input::InputState;
use crate::runtime::RuntimeError;

pub type SharedSession = Arc<Mutex<SessionState>>;

lazy_static! {
    static ref ACTIVE_SESSION: Mutex<Option<SharedSession>> = Mutex::new(None);
}

/// Publish `session` as the target of plugin callbacks.
///
/// Returns `false` if a different session already holds the slot.
pub fn register(session: &SharedSession) -> bool {
    let mut slot = ACTIVE_SESSION.lock();
    match slot.as_ref() {
        Some(current) if !Arc::ptr_eq(current, session) => false,
        _ => {
            *slot = Some(Arc::clone(session));
            true
        }
    }
}

/// Clear the slot, but only if `session` is the one holding it.
pub fn unregister(session: &SharedSession) {
    let mut slot = ACTIVE_SESSION.lock();
    if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, session)) {
        *slot = None;
    }
}

pub fn has_active() -> bool {
    ACTIVE_SESSION.lock().is_some()
}

/// Run `f` against the active session. `None` if no session is registered.
pub fn with_active<R>(f: impl FnOnce(&mut SessionState) -> R) -> Option<R> {
    let session = ACTIVE_SESSION.lock().clone()?;
    let mut guard = session.lock();
    Some(f(&mut guard))
}

/// Display geometry as announced through AV info / SET_GEOMETRY.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Geometry {
    pub width: u32,
    pub height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub aspect_ratio: f32,
}

impl Geometry {
    pub fn from_raw(raw: &GameGeometry) -> Self {
        Self {
            width: raw.base_width,
            height: raw.base_height,
            max_width: raw.max_width,
            max_height: raw.max_height,
            aspect_ratio: raw.aspect_ratio,
        }
    }
}

/// Owned copy of `retro_system_av_info`.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct AvInfo {
    pub geometry: Geometry,
    pub fps: f64,
    pub sample_rate: f64,
}

impl AvInfo {
    pub fn from_raw(raw: &SystemAvInfo) -> Self {
        Self {
            geometry: Geometry::from_raw(&raw.geometry),
            fps: raw.timing.fps,
            sample_rate: raw.timing.sample_rate,
        }
    }
}

/// Directory strings handed to the plugin. They live as long as the session.
#[derive(Clone, Debug)]
pub struct HostPaths {
    pub system: CString,
    pub save: CString,
    pub content: CString,
}

impl HostPaths {
    fn from_config(config: &HostConfig) -> Self {
        Self {
            system: path_to_cstring(&config.system_dir),
            save: path_to_cstring(&config.save_dir),
            content: path_to_cstring(&config.content_dir),
        }
    }
}

pub(crate) fn path_to_cstring(path: &Path) -> CString {
    let text = path.to_string_lossy().replace('\0', "");
    CString::new(text).unwrap_or_default()
}

/// Which callback kinds the plugin has been handed.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BoundCallbacks {
    pub environment: bool,
    pub video_refresh: bool,
    pub audio_sample: bool,
    pub audio_sample_batch: bool,
    pub input_poll: bool,
    pub input_state: bool,
}

/// Counters for conditions that are absorbed instead of surfaced.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionStats {
    pub frames_run: u64,
    pub video_frames: u64,
    pub duplicate_frames: u64,
    pub dropped_video_frames: u64,
    pub audio_frames_accepted: u64,
    pub audio_frames_dropped: u64,
    pub audio_frames_padded: u64,
    pub unsupported_commands: u64,
}

/// One-shot warning flags, per session.
#[derive(Clone, Debug, Default)]
struct Warned {
    audio_full: bool,
    audio_unconfigured: bool,
    bad_frame: bool,
}

pub struct SessionState {
    pub config: HostConfig,
    pub paths: HostPaths,
    pub commands: CommandTable,

    pub geometry: Geometry,
    pub fps: f64,
    pub sample_rate: u32,
    /// Size of the last frame the plugin delivered.
    pub last_frame_size: (u32, u32),

    pub video: VideoFormat,
    pub frame: Option<FrameBuffer>,
    pub audio: Option<AudioRingBuffer>,
    pub accumulator: SampleAccumulator,

    /// Written by the presentation side.
    pub input: InputState,
    /// Snapshot the plugin reads; refreshed on input poll.
    pub latched_input: InputState,

    pub bound: BoundCallbacks,
    pub supports_no_game: bool,
    pub shutdown_requested: bool,
    pub stats: SessionStats,
    warned: Warned,
}

impl SessionState {
    pub fn new(config: HostConfig) -> Self {
        Self {
            paths: HostPaths::from_config(&config),
            commands: CommandTable::for_revision(config.command_revision),
            config,
            geometry: Geometry::default(),
            fps: 0.0,
            sample_rate: 0,
            last_frame_size: (0, 0),
            video: VideoFormat::default(),
            frame: None,
            audio: None,
            accumulator: SampleAccumulator::default(),
            input: InputState::default(),
            latched_input: InputState::default(),
            bound: BoundCallbacks::default(),
            supports_no_game: false,
            shutdown_requested: false,
            stats: SessionStats::default(),
            warned: Warned::default(),
        }
    }

    pub fn shared(config: HostConfig) -> SharedSession {
        Arc::new(Mutex::new(Self::new(config)))
    }

    /// Back to the freshly created state. Buffers are released; the command table
    /// (including any per-plugin overrides) is kept.
    pub fn reset(&mut self) {
        let commands = self.commands.clone();
        *self = Self::new(self.config.clone());
        self.commands = commands;
    }

    /// Apply a full AV info record: geometry, frame rate and sample rate.
    pub fn apply_av_info(&mut self, av: &AvInfo) {
        self.apply_geometry(av.geometry);
        self.fps = av.fps;
        self.set_sample_rate(av.sample_rate as u32);
        tracing::info!(
            width = self.geometry.width,
            height = self.geometry.height,
            aspect = self.geometry.aspect_ratio,
            fps = self.fps,
            sample_rate = self.sample_rate,
            "AV info applied"
        );
    }

    /// Update display geometry and size the canonical buffer to it.
    pub fn apply_geometry(&mut self, geometry: Geometry) {
        self.geometry = geometry;
        if geometry.width == 0 || geometry.height == 0 {
            tracing::warn!(
                width = geometry.width,
                height = geometry.height,
                "plugin reported empty display geometry; keeping frame buffer"
            );
            return;
        }
        video::resize_target(&mut self.frame, geometry.width, geometry.height);
    }

    /// Change the sample rate. A change (or a missing ring) reallocates the ring and
    /// drops whatever was buffered.
    pub fn set_sample_rate(&mut self, reported: u32) {
        let rate = if reported == 0 {
            tracing::warn!(
                fallback = self.config.fallback_sample_rate,
                "plugin reported a 0 Hz sample rate; using fallback"
            );
            self.config.fallback_sample_rate
        } else {
            reported
        };

        if rate == self.sample_rate && self.audio.is_some() {
            return;
        }

        let capacity = audio::capacity_for_rate(rate, self.config.fallback_ring_capacity);
        tracing::debug!(rate, capacity, "audio ring reallocated");
        self.sample_rate = rate;
        self.audio = Some(AudioRingBuffer::new(capacity, self.config.read_policy));
    }

    /// Convert a plugin frame into the canonical buffer.
    ///
    /// # Safety
    /// `data` must either be null or point to a frame of `height` rows, `pitch`
    /// bytes apart, as promised by the video-refresh contract.
    pub unsafe fn present_raw(
        &mut self,
        data: *const u8,
        width: u32,
        height: u32,
        pitch: usize,
    ) -> Result<(), RuntimeError> {
        if data.is_null() {
            // duplicate frame
            self.stats.duplicate_frames += 1;
            return Ok(());
        }

        let result = self.video.resolve(width, height, pitch).and_then(|format| {
            // SAFETY: caller upholds the frame contract for `data`.
            unsafe { RawFrame::from_ptr(data, width, height, pitch, format) }
                .map(|frame| (format, frame))
        });

        match result {
            Ok((format, frame)) => {
                self.video.commit(format);
                self.present(&frame);
                Ok(())
            }
            Err(err) => {
                self.stats.dropped_video_frames += 1;
                if !self.warned.bad_frame {
                    self.warned.bad_frame = true;
                    tracing::warn!(%err, "video frame dropped");
                }
                Err(err)
            }
        }
    }

    pub fn present(&mut self, frame: &RawFrame<'_>) {
        video::convert(
            frame,
            (self.geometry.width, self.geometry.height),
            &mut self.frame,
        );
        self.last_frame_size = (frame.width(), frame.height());
        self.stats.video_frames += 1;
    }

    /// Push a batch of interleaved stereo samples. Returns accepted frames.
    pub fn push_audio_batch(&mut self, samples: &[i16]) -> usize {
        let frames = samples.len() / 2;
        let result = match self.audio.as_mut() {
            Some(ring) => ring.write(samples),
            None => Err(RuntimeError::AudioNotConfigured { dropped: frames }),
        };

        match result {
            Ok(accepted) => {
                self.stats.audio_frames_accepted += accepted as u64;
                self.stats.audio_frames_dropped += (frames - accepted) as u64;
                accepted
            }
            Err(err) => {
                self.stats.audio_frames_dropped += frames as u64;
                let flag = match err {
                    RuntimeError::AudioNotConfigured { .. } => &mut self.warned.audio_unconfigured,
                    _ => &mut self.warned.audio_full,
                };
                if !*flag {
                    *flag = true;
                    tracing::warn!(%err, "audio batch dropped");
                }
                0
            }
        }
    }

    /// Single-sample path: accumulate, flushing early if the accumulator is full.
    pub fn push_audio_sample(&mut self, left: i16, right: i16) {
        if self.accumulator.is_full() {
            self.flush_audio();
        }
        self.accumulator.push(left, right);
    }

    /// Move accumulated single samples into the ring.
    pub fn flush_audio(&mut self) {
        if self.accumulator.is_empty() {
            return;
        }
        let (accepted, dropped) = self.accumulator.flush_into(self.audio.as_mut());
        self.stats.audio_frames_accepted += accepted as u64;
        self.stats.audio_frames_dropped += dropped as u64;
        if dropped > 0 && !self.warned.audio_full {
            self.warned.audio_full = true;
            tracing::warn!(dropped, "accumulated audio dropped");
        }
    }

    /// Pull interleaved stereo frames for the output side. See [`ReadPolicy`].
    pub fn read_audio(&mut self, out: &mut [f32]) -> usize {
        let requested = out.len() / 2;
        let padding = self.config.read_policy == ReadPolicy::Pad;
        let Some(ring) = self.audio.as_mut() else {
            out.fill(0.0);
            if !padding {
                return 0;
            }
            self.stats.audio_frames_padded += requested as u64;
            return requested;
        };

        let real = requested.min(ring.available());
        let returned = ring.read(out);
        if padding {
            self.stats.audio_frames_padded += (requested - real) as u64;
        }
        returned
    }

    /// Refresh the snapshot the plugin reads input from.
    pub fn latch_input(&mut self) {
        self.latched_input.latch_from(&self.input);
    }

    pub fn input_state(&self, port: u32, device: u32, index: u32, id: u32) -> i16 {
        self.latched_input.query(port, device, index, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::DEVICE_JOYPAD;

    fn av(width: u32, height: u32, rate: f64) -> AvInfo {
        AvInfo {
            geometry: Geometry {
                width,
                height,
                max_width: width,
                max_height: height,
                aspect_ratio: width as f32 / height as f32,
            },
            fps: 60.0,
            sample_rate: rate,
        }
    }

    #[test]
    fn sample_rate_change_reallocates_and_drops_audio() {
        let mut s = SessionState::new(HostConfig::default());
        s.apply_av_info(&av(160, 144, 32_000.0));
        assert_eq!(s.audio.as_ref().unwrap().capacity(), 8_000);
        assert_eq!(s.push_audio_batch(&[1, 1, 2, 2]), 2);

        s.apply_av_info(&av(160, 144, 48_000.0));
        let ring = s.audio.as_ref().unwrap();
        assert_eq!(ring.capacity(), 12_000);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn same_rate_keeps_buffered_audio() {
        let mut s = SessionState::new(HostConfig::default());
        s.apply_av_info(&av(160, 144, 32_000.0));
        s.push_audio_batch(&[1, 1]);
        s.apply_av_info(&av(320, 240, 32_000.0));
        assert_eq!(s.audio.as_ref().unwrap().available(), 1);
    }

    #[test]
    fn zero_rate_uses_fallback() {
        let mut s = SessionState::new(HostConfig::default());
        s.apply_av_info(&av(160, 144, 0.0));
        assert_eq!(s.sample_rate, 44_100);
        assert_eq!(s.audio.as_ref().unwrap().capacity(), 11_025);
    }

    #[test]
    fn geometry_sizes_frame_buffer() {
        let mut s = SessionState::new(HostConfig::default());
        s.apply_av_info(&av(256, 224, 44_100.0));
        let fb = s.frame.as_ref().unwrap();
        assert_eq!(fb.pixels().len(), 256 * 224 * 4);
    }

    #[test]
    fn audio_before_configuration_is_dropped() {
        let mut s = SessionState::new(HostConfig::default());
        assert_eq!(s.push_audio_batch(&[1, 2, 3, 4]), 0);
        assert_eq!(s.stats.audio_frames_dropped, 2);
    }

    #[test]
    fn read_without_ring_pads() {
        let mut s = SessionState::new(HostConfig::default());
        let mut out = [1.0f32; 6];
        assert_eq!(s.read_audio(&mut out), 3);
        assert!(out.iter().all(|&x| x == 0.0));
        assert_eq!(s.stats.audio_frames_padded, 3);
    }

    #[test]
    fn exact_read_without_ring_reports_nothing() {
        let config = HostConfig::default().with_read_policy(ReadPolicy::Exact);
        let mut s = SessionState::new(config);
        let mut out = [1.0f32; 6];
        assert_eq!(s.read_audio(&mut out), 0);
        assert!(out.iter().all(|&x| x == 0.0));
        assert_eq!(s.stats.audio_frames_padded, 0);
    }

    #[test]
    fn exact_short_read_is_not_counted_as_padding() {
        let config = HostConfig::default().with_read_policy(ReadPolicy::Exact);
        let mut s = SessionState::new(config);
        s.set_sample_rate(32_000);
        s.push_audio_batch(&[1, 1]);
        let mut out = [0.0f32; 8];
        assert_eq!(s.read_audio(&mut out), 1);
        assert_eq!(s.stats.audio_frames_padded, 0);
    }

    #[test]
    fn single_samples_flush_into_ring() {
        let mut s = SessionState::new(HostConfig::default());
        s.set_sample_rate(44_100);
        for i in 0..10 {
            s.push_audio_sample(i, -i);
        }
        assert_eq!(s.audio.as_ref().unwrap().available(), 0);
        s.flush_audio();
        assert_eq!(s.audio.as_ref().unwrap().available(), 10);
    }

    #[test]
    fn plugin_sees_latched_input_only() {
        let mut s = SessionState::new(HostConfig::default());
        s.input.set_button(0, 3, true);
        assert_eq!(s.input_state(0, DEVICE_JOYPAD, 0, 3), 0);
        s.latch_input();
        assert_eq!(s.input_state(0, DEVICE_JOYPAD, 0, 3), 1);
    }

    #[test]
    fn null_frame_counts_as_duplicate() {
        let mut s = SessionState::new(HostConfig::default());
        let res = unsafe { s.present_raw(std::ptr::null(), 10, 10, 20) };
        assert!(res.is_ok());
        assert_eq!(s.stats.duplicate_frames, 1);
        assert!(s.frame.is_none());
    }

    #[test]
    fn overflowing_frame_shape_is_dropped() {
        let mut s = SessionState::new(HostConfig::default());
        s.video.set_raw(crate::abi::pixel_format::RGB565).unwrap();
        let data = [0u8; 4];
        let res = unsafe { s.present_raw(data.as_ptr(), 1, 3, usize::MAX / 2 + 1) };
        assert!(matches!(res, Err(RuntimeError::GeometryInvalid { height: 3, .. })));
        assert_eq!(s.stats.dropped_video_frames, 1);
        assert_eq!(s.stats.video_frames, 0);
        assert!(s.frame.is_none());
    }

    #[test]
    fn rejected_frame_does_not_latch_stride_correction() {
        let mut s = SessionState::new(HostConfig::default());
        let data = [0u8; 8];
        // 16-bit stride on a declared 32-bit stream, but rows that overrun the address space
        let width = u32::MAX;
        let pitch = width as usize * 2;
        let res = unsafe { s.present_raw(data.as_ptr(), width, u32::MAX, pitch) };
        assert!(res.is_err());
        assert!(!s.video.corrected);
        assert_eq!(s.video.effective(), crate::av::PixelFormat::Xrgb8888);
    }

    #[test]
    fn accepted_16bit_stride_latches_correction() {
        let mut s = SessionState::new(HostConfig::default());
        let data = [0u8; 8];
        unsafe { s.present_raw(data.as_ptr(), 2, 2, 4) }.unwrap();
        assert!(s.video.corrected);
        assert_eq!(s.stats.video_frames, 1);
    }

    #[test]
    fn reset_releases_buffers() {
        let mut s = SessionState::new(HostConfig::default());
        s.apply_av_info(&av(64, 64, 22_050.0));
        s.supports_no_game = true;
        s.reset();
        assert!(s.frame.is_none());
        assert!(s.audio.is_none());
        assert!(!s.supports_no_game);
        assert_eq!(s.sample_rate, 0);
    }
}
