//! Lifecycle controller.
//!
//! Drives one plugin through:
//! `Unloaded -> Loaded -> Initialized -> Running -> Unloaded`.
//!
//! Notes:
//! - Only one `Frontend` can hold a loaded plugin at a time (callbacks reach the
//!   session through a process-wide slot).
//! - `run_frame` is a no-op outside `Running`.
//! - `unload` is idempotent and also runs on drop.

use std::ffi::{CString, c_void};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::ptr;

use crate::abi::{self, GameInfo};
use crate::av::FrameBuffer;
use crate::config::HostConfig;
use crate::environment::CommandTable;
use crate::loader::{self, LoadError, PluginHandle, PluginInfo, SymbolSource};
use crate::runtime::callbacks;
use crate::state::{self, SessionState, SessionStats, SharedSession};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CoreState {
    Unloaded,
    Loaded,
    Initialized,
    Running,
}

/// Game content held for the plugin from load until unload.
struct GameImage {
    path: CString,
    data: Option<Vec<u8>>,
}

impl GameImage {
    fn info(&self) -> GameInfo {
        let (data, size) = match &self.data {
            Some(bytes) => (bytes.as_ptr() as *const c_void, bytes.len()),
            None => (ptr::null(), 0),
        };
        GameInfo {
            path: self.path.as_ptr(),
            data,
            size,
            meta: ptr::null(),
        }
    }
}

/// Read the whole file, failing cleanly if the buffer cannot be reserved.
fn read_image(path: &Path) -> Result<Vec<u8>, LoadError> {
    let unreadable = |source: std::io::Error| LoadError::GameUnreadable {
        path: path.to_path_buf(),
        source,
    };
    let mut file = std::fs::File::open(path).map_err(unreadable)?;
    let len = file.metadata().map_err(unreadable)?.len() as usize;
    if len == 0 {
        return Err(unreadable(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "empty file",
        )));
    }

    let mut bytes = Vec::new();
    bytes
        .try_reserve_exact(len)
        .map_err(|_| LoadError::AllocationFailed { bytes: len })?;
    file.read_to_end(&mut bytes).map_err(unreadable)?;
    Ok(bytes)
}

/// Read handle onto the session's audio ring, for an output thread.
///
/// Reads and plugin-side writes take the session lock for one bounded copy each,
/// so either side waits at most that long. An empty ring is padded and a full one
/// drops the batch; neither side waits for the other to make room or data.
#[derive(Clone)]
pub struct AudioReader {
    session: SharedSession,
}

impl AudioReader {
    /// See [`Frontend::read_audio`].
    pub fn read(&self, out: &mut [f32]) -> usize {
        self.session.lock().read_audio(out)
    }

    pub fn available(&self) -> usize {
        self.session.lock().audio.as_ref().map_or(0, |ring| ring.available())
    }

    pub fn sample_rate(&self) -> u32 {
        self.session.lock().sample_rate
    }
}

pub struct Frontend {
    state: CoreState,
    session: SharedSession,
    // Dropped before `game` so the plugin is gone before its content is freed.
    plugin: Option<PluginHandle>,
    game: Option<GameImage>,
    game_loaded: bool,
    initialized: bool,
    av_requeried: bool,
    system_info: Option<PluginInfo>,
}

impl Frontend {
    pub fn new(config: HostConfig) -> Self {
        Self {
            state: CoreState::Unloaded,
            session: SessionState::shared(config),
            plugin: None,
            game: None,
            game_loaded: false,
            initialized: false,
            av_requeried: false,
            system_info: None,
        }
    }

    pub fn state(&self) -> CoreState {
        self.state
    }

    fn expect_state(&self, action: &'static str, wanted: CoreState) -> Result<(), LoadError> {
        if self.state == wanted {
            Ok(())
        } else {
            Err(LoadError::InvalidState {
                action,
                state: self.state,
            })
        }
    }

    fn dispatch(&self) -> Option<&loader::DispatchTable> {
        self.plugin.as_ref().map(PluginHandle::dispatch)
    }

    /// Open the plugin library at `path`.
    pub fn load_core(&mut self, path: &Path) -> Result<(), LoadError> {
        self.load_with(|environment| loader::load(path, environment))
    }

    /// Load a plugin whose exports come from `source`.
    pub fn load_core_from(&mut self, source: Box<dyn SymbolSource>) -> Result<(), LoadError> {
        self.load_with(|environment| loader::load_from(source, environment))
    }

    fn load_with(
        &mut self,
        load: impl FnOnce(abi::EnvironmentFn) -> Result<PluginHandle, LoadError>,
    ) -> Result<(), LoadError> {
        self.expect_state("load a core", CoreState::Unloaded)?;
        if !state::register(&self.session) {
            return Err(LoadError::SessionActive);
        }

        match load(callbacks::environment) {
            Ok(plugin) => {
                tracing::info!(plugin = %plugin.describe(), "core loaded");
                self.session.lock().bound.environment = true;
                self.plugin = Some(plugin);
                self.state = CoreState::Loaded;
                Ok(())
            }
            Err(err) => {
                self.session.lock().reset();
                state::unregister(&self.session);
                Err(err)
            }
        }
    }

    /// Initialize the plugin, read its system info and plug in the default controller.
    pub fn init_core(&mut self) -> Result<(), LoadError> {
        self.expect_state("initialize", CoreState::Loaded)?;
        let Some(dispatch) = self.dispatch() else {
            return Err(LoadError::InvalidState {
                action: "initialize",
                state: self.state,
            });
        };

        dispatch.init();

        if let Some(version) = dispatch.api_version() {
            if version != abi::API_VERSION {
                tracing::warn!(
                    plugin = version,
                    host = abi::API_VERSION,
                    "plugin API version differs"
                );
            }
        }

        let info = dispatch.system_info();
        if let Some(info) = &info {
            tracing::info!(
                name = %info.library_name,
                version = %info.library_version,
                extensions = %info.valid_extensions,
                need_fullpath = info.need_fullpath,
                "core initialized"
            );
        }

        let device = self.session.lock().config.default_controller_device;
        dispatch.set_controller_port_device(0, device);

        self.system_info = info;
        self.initialized = true;
        self.state = CoreState::Initialized;
        Ok(())
    }

    /// Load `rom`, or start without content when `rom` is `None`.
    pub fn load_game(&mut self, rom: Option<&Path>) -> Result<(), LoadError> {
        self.expect_state("load a game", CoreState::Initialized)?;

        let image = match rom {
            None => {
                if !self.session.lock().supports_no_game {
                    return Err(LoadError::NoGameUnsupported);
                }
                None
            }
            Some(path) => Some(self.read_game(path)?),
        };

        let Some(dispatch) = self.plugin.as_ref().map(PluginHandle::dispatch) else {
            return Err(LoadError::InvalidState {
                action: "load a game",
                state: self.state,
            });
        };
        if !dispatch.has_load_game() {
            return Err(LoadError::SymbolMissing(abi::symbols::LOAD_GAME));
        }

        self.game = image;
        let info = self.game.as_ref().map(GameImage::info);
        // SAFETY: `info` borrows from `self.game`, which is kept until after unload_game.
        let accepted = unsafe { dispatch.load_game(info.as_ref()) };
        if !accepted {
            self.game = None;
            return Err(LoadError::GameRejected);
        }
        self.game_loaded = true;

        let bound = dispatch.bind(&callbacks::table());
        let av = dispatch.av_info();
        {
            let mut session = self.session.lock();
            session.bound = bound;
            match av {
                Some(av) => session.apply_av_info(&av),
                None => {
                    let rate = session.config.fallback_sample_rate;
                    session.set_sample_rate(rate);
                }
            }
        }

        tracing::info!(
            game = %rom.map(|p| p.display().to_string()).unwrap_or_default(),
            "game loaded"
        );
        self.state = CoreState::Running;
        Ok(())
    }

    fn read_game(&self, path: &Path) -> Result<GameImage, LoadError> {
        let resolved: PathBuf =
            std::fs::canonicalize(path).map_err(|source| LoadError::GameUnreadable {
                path: path.to_path_buf(),
                source,
            })?;
        let need_fullpath = self
            .system_info
            .as_ref()
            .is_some_and(|info| info.need_fullpath);

        let data = if need_fullpath {
            None
        } else {
            Some(read_image(&resolved)?)
        };
        Ok(GameImage {
            path: loader::game_path(&resolved)?,
            data,
        })
    }

    /// Run one frame. Returns `false` (and does nothing) unless a game is running.
    pub fn run_frame(&mut self) -> bool {
        if self.state != CoreState::Running {
            return false;
        }
        let Some(dispatch) = self.plugin.as_ref().map(PluginHandle::dispatch) else {
            return false;
        };

        {
            let mut session = self.session.lock();
            if session.bound.input_poll {
                session.latch_input();
            }
        }

        dispatch.run();

        // Some plugins only settle their timing after the first frame.
        let av = if self.av_requeried {
            None
        } else {
            self.av_requeried = true;
            dispatch.av_info()
        };

        let mut session = self.session.lock();
        if let Some(av) = av {
            session.apply_av_info(&av);
        }
        session.flush_audio();
        session.stats.frames_run += 1;
        true
    }

    pub fn reset(&mut self) {
        if matches!(self.state, CoreState::Initialized | CoreState::Running) {
            if let Some(dispatch) = self.dispatch() {
                dispatch.reset();
            }
        }
    }

    /// Tear everything down. Safe to call in any state, any number of times.
    pub fn unload(&mut self) {
        if let Some(plugin) = self.plugin.as_ref() {
            let dispatch = plugin.dispatch();
            if self.game_loaded {
                dispatch.unload_game();
            }
            if self.initialized {
                dispatch.deinit();
            }
        }
        self.game_loaded = false;
        self.game = None;
        self.initialized = false;
        self.av_requeried = false;
        self.system_info = None;

        if let Some(plugin) = self.plugin.take() {
            tracing::info!(plugin = %plugin.describe(), "core unloaded");
            drop(plugin);
        }

        if self.state != CoreState::Unloaded {
            self.session.lock().reset();
            state::unregister(&self.session);
        }
        self.state = CoreState::Unloaded;
    }

    pub fn system_info(&self) -> Option<&PluginInfo> {
        self.system_info.as_ref()
    }

    pub fn api_version(&self) -> Option<u32> {
        self.dispatch()?.api_version()
    }

    pub fn region(&self) -> Option<u32> {
        self.dispatch()?.region()
    }

    /// Copy of a plugin memory region (see [`abi::memory`]).
    pub fn memory(&self, id: u32) -> Option<Vec<u8>> {
        self.dispatch()?.memory(id)
    }

    /// Snapshot of the plugin state, if it supports serialization.
    pub fn serialize(&self) -> Option<Vec<u8>> {
        let dispatch = self.dispatch()?;
        let size = dispatch.serialize_size();
        if size == 0 {
            return None;
        }
        let mut out = vec![0u8; size];
        dispatch.serialize(&mut out).then_some(out)
    }

    pub fn unserialize(&self, data: &[u8]) -> bool {
        self.dispatch().is_some_and(|d| d.unserialize(data))
    }

    pub fn cheat_reset(&self) {
        if let Some(dispatch) = self.dispatch() {
            dispatch.cheat_reset();
        }
    }

    /// Returns `false` if there is no plugin or `code` contains a NUL byte.
    pub fn cheat_set(&self, index: u32, enabled: bool, code: &str) -> bool {
        let (Some(dispatch), Ok(code)) = (self.dispatch(), CString::new(code)) else {
            return false;
        };
        dispatch.cheat_set(index, enabled, &code);
        true
    }

    pub fn video_size(&self) -> (u32, u32) {
        let session = self.session.lock();
        match &session.frame {
            Some(fb) => (fb.width(), fb.height()),
            None => (session.geometry.width, session.geometry.height),
        }
    }

    pub fn fps(&self) -> f64 {
        self.session.lock().fps
    }

    pub fn sample_rate(&self) -> u32 {
        self.session.lock().sample_rate
    }

    /// Run `f` against the current canonical frame without copying it.
    pub fn with_frame<R>(&self, f: impl FnOnce(&FrameBuffer) -> R) -> Option<R> {
        self.session.lock().frame.as_ref().map(f)
    }

    pub fn frame(&self) -> Option<FrameBuffer> {
        self.session.lock().frame.clone()
    }

    /// Pull interleaved stereo `f32` frames into `out`.
    pub fn read_audio(&self, out: &mut [f32]) -> usize {
        self.session.lock().read_audio(out)
    }

    pub fn audio_reader(&self) -> AudioReader {
        AudioReader {
            session: self.session.clone(),
        }
    }

    pub fn set_button(&self, port: u32, button: u32, pressed: bool) {
        self.session.lock().input.set_button(port, button, pressed);
    }

    pub fn set_joypad(&self, port: u32, button: abi::JoypadButton, pressed: bool) {
        self.session.lock().input.set_joypad(port, button, pressed);
    }

    pub fn set_key(&self, keycode: u32, pressed: bool) {
        self.session.lock().input.set_key(keycode, pressed);
    }

    pub fn stats(&self) -> SessionStats {
        self.session.lock().stats
    }

    pub fn shutdown_requested(&self) -> bool {
        self.session.lock().shutdown_requested
    }

    /// Adjust the environment command mapping for this session.
    pub fn configure_commands(&self, f: impl FnOnce(&mut CommandTable)) {
        f(&mut self.session.lock().commands);
    }
}

impl Drop for Frontend {
    fn drop(&mut self) {
        self.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_frontend_is_idle() {
        let mut fe = Frontend::new(HostConfig::default());
        assert_eq!(fe.state(), CoreState::Unloaded);
        assert!(!fe.run_frame());
        assert_eq!(fe.video_size(), (0, 0));
        assert!(fe.serialize().is_none());
        assert!(!fe.cheat_set(0, true, "code"));
        fe.unload();
        fe.unload();
        assert_eq!(fe.state(), CoreState::Unloaded);
    }

    #[test]
    fn out_of_order_calls_are_rejected() {
        let mut fe = Frontend::new(HostConfig::default());
        assert!(matches!(
            fe.init_core(),
            Err(LoadError::InvalidState {
                state: CoreState::Unloaded,
                ..
            })
        ));
        assert!(matches!(
            fe.load_game(None),
            Err(LoadError::InvalidState { .. })
        ));
    }

    #[test]
    fn idle_audio_read_is_silence() {
        let fe = Frontend::new(HostConfig::default());
        let mut out = [0.25f32; 8];
        assert_eq!(fe.audio_reader().read(&mut out), 4);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn audio_reader_drains_from_another_thread() {
        let fe = Frontend::new(HostConfig::default());
        {
            let mut session = fe.session.lock();
            session.set_sample_rate(32_000);
            session.push_audio_batch(&[16_384, -16_384, 8_192, -8_192]);
        }

        let reader = fe.audio_reader();
        let (got, out) = std::thread::spawn(move || {
            let mut out = [0.0f32; 4];
            (reader.read(&mut out), out)
        })
        .join()
        .unwrap();

        assert_eq!(got, 2);
        assert_eq!(out, [0.5, -0.5, 0.25, -0.25]);
        assert_eq!(fe.audio_reader().available(), 0);
    }

    #[test]
    fn empty_rom_is_unreadable() {
        let path = std::env::temp_dir().join("retrohost-empty-rom.bin");
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(
            read_image(&path),
            Err(LoadError::GameUnreadable { .. })
        ));
        std::fs::write(&path, b"ROM").unwrap();
        assert_eq!(read_image(&path).unwrap(), b"ROM");
        let _ = std::fs::remove_file(&path);
    }
}
