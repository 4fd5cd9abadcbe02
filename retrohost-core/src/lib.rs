//! retrohost-core: host side of the libretro plugin ABI.
//!
//! This crate loads a libretro core (a native shared library), answers its
//! environment negotiation, and turns what it produces into host-friendly data:
//! - video: one canonical RGBA8888 frame buffer at display resolution,
//! - audio: a stereo `f32` ring buffer drained by the output side,
//! - input: joypad/keyboard tables the plugin queries while a frame runs.
//!
//! Windowing, audio devices and input devices are out of scope; a presentation
//! layer drives [`Frontend`] and reads its buffers.
//!
//! Typical use:
//! ```no_run
//! use retrohost_core::{Frontend, HostConfig};
//! use std::path::Path;
//!
//! let mut frontend = Frontend::new(HostConfig::default());
//! frontend.load_core(Path::new("cores/libcore.so"))?;
//! frontend.init_core()?;
//! frontend.load_game(Some(Path::new("game.rom")))?;
//! while !frontend.shutdown_requested() {
//!     frontend.run_frame();
//!     # break;
//! }
//! # Ok::<(), retrohost_core::LoadError>(())
//! ```

pub mod abi;
pub mod av;
pub mod config;
pub mod environment;
pub mod input;
pub mod loader;
pub mod runtime;
pub mod state;

pub use av::{AudioRingBuffer, FrameBuffer, PixelFormat};
pub use config::{CommandRevision, HostConfig, ReadPolicy};
pub use environment::{CommandTable, EnvCommand};
pub use loader::{LoadError, NativeLibrary, PluginInfo, SymbolSource};
pub use runtime::{AudioReader, CoreState, Frontend, RuntimeError};
pub use state::SessionStats;
