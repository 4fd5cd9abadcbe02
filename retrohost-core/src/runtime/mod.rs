//! Plugin runtime: the C callback trampolines and the lifecycle controller.
//!
//! Responsibilities:
//! - Expose `extern "C"` entry points the plugin calls back into (video, audio,
//!   input, environment), routed to the registered session.
//! - Drive the plugin through load -> init -> game -> frames -> unload.
//!
//! Errors raised inside callbacks never cross the C boundary; they are logged once
//! per session, counted in [`crate::state::SessionStats`] and the frame continues.

pub mod callbacks;
pub mod frontend;

pub use frontend::{AudioReader, CoreState, Frontend};

/// Recoverable per-call failures. Callbacks absorb these; host-side helpers return them.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("unsupported environment command {0}")]
    UnsupportedEnvironmentCommand(u32),
    #[error("environment command {0} sent without a payload")]
    MissingPayload(u32),
    #[error("unsupported pixel format code {0}")]
    PixelFormatUnsupported(u32),
    #[error("audio ring buffer full, dropped {dropped} frames")]
    AudioBufferFull { dropped: usize },
    #[error("audio ring buffer not configured yet, dropped {dropped} frames")]
    AudioNotConfigured { dropped: usize },
    #[error("invalid frame geometry {width}x{height} with pitch {pitch}")]
    GeometryInvalid { width: u32, height: u32, pitch: usize },
}
