//! Audio/Video plumbing for retrohost-core.
//!
//! - Video: the plugin's raw frames are converted into one canonical RGBA8888
//!   buffer sized to the display geometry (`video`).
//! - Audio: the plugin's interleaved `i16` bursts land in a float ring buffer that
//!   the output side polls at its own pace (`audio`).
//!
//! Neither side blocks: a full ring drops, an empty ring pads, a malformed frame
//! is skipped.

pub mod audio;
pub mod video;


pub use audio::{AudioRingBuffer, SampleAccumulator};
pub use video::{FrameBuffer, PixelFormat, RawFrame, VideoFormat};
