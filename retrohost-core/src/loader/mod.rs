//! Plugin loading.
//!
//! Responsibilities:
//! - Open the plugin's shared library (`libloading`).
//! - Resolve the entry points into a [`DispatchTable`] of typed function pointers.
//! - Keep the library mapped for as long as the table is reachable.
//!
//! Order matters: `retro_set_environment` is resolved and called before anything
//! else, because plugins may issue environment commands from inside that call.
//! The remaining callback setters are resolved here but only invoked once a game
//! is loaded.
//!
//! Symbol lookup goes through [`SymbolSource`] so the same resolution path serves
//! native libraries and in-process plugins.

use std::ffi::{CStr, CString, c_char, c_uint, c_void};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

use crate::abi::{self, GameInfo, SystemAvInfo, SystemInfo, symbols};
use crate::runtime::CoreState;
use crate::state::{AvInfo, BoundCallbacks};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to open plugin {path}: {source}")]
    NotFound {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },
    #[error("plugin does not export `{0}`")]
    SymbolMissing(&'static str),
    #[error("failed to allocate {bytes} bytes")]
    AllocationFailed { bytes: usize },
    #[error("another session already owns the plugin callbacks")]
    SessionActive,
    #[error("cannot {action} while the core is {state:?}")]
    InvalidState {
        action: &'static str,
        state: CoreState,
    },
    #[error("failed to read game {path}: {source}")]
    GameUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("plugin rejected the game")]
    GameRejected,
    #[error("plugin does not support running without a game")]
    NoGameUnsupported,
}

/// Where exported symbols come from.
pub trait SymbolSource: Send {
    /// Address of the export `name`, if present.
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>>;

    /// Human-readable origin, for logs.
    fn describe(&self) -> String;
}

/// A plugin shared library mapped into the process.
pub struct NativeLibrary {
    library: libloading::Library,
    path: PathBuf,
}

impl NativeLibrary {
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        // SAFETY: loading a library runs its initializers; plugins are trusted code.
        let library = unsafe { libloading::Library::new(path) }.map_err(|source| {
            LoadError::NotFound {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self {
            library,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SymbolSource for NativeLibrary {
    fn resolve(&self, name: &str) -> Option<NonNull<c_void>> {
        // SAFETY: only the address is taken here; it is given a type by the caller.
        let symbol = unsafe { self.library.get::<*mut c_void>(name.as_bytes()) }.ok()?;
        NonNull::new(*symbol)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Resolve `name` as a function pointer of type `F`.
///
/// # Safety
/// `F` must be an `extern "C" fn` type matching the export's C signature.
unsafe fn resolve_fn<F: Copy>(source: &dyn SymbolSource, name: &str) -> Option<F> {
    debug_assert_eq!(size_of::<F>(), size_of::<*mut c_void>());
    let address = source.resolve(name)?.as_ptr();
    // SAFETY: F is a function pointer type of pointer size, per the contract above.
    Some(unsafe { std::mem::transmute_copy::<*mut c_void, F>(&address) })
}

/// Owned copy of `retro_system_info`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PluginInfo {
    pub library_name: String,
    pub library_version: String,
    pub valid_extensions: String,
    pub need_fullpath: bool,
    pub block_extract: bool,
}

impl PluginInfo {
    /// # Safety
    /// String pointers in `raw` must be null or NUL-terminated.
    unsafe fn from_raw(raw: &SystemInfo) -> Self {
        Self {
            library_name: unsafe { owned_str(raw.library_name) },
            library_version: unsafe { owned_str(raw.library_version) },
            valid_extensions: unsafe { owned_str(raw.valid_extensions) },
            need_fullpath: raw.need_fullpath,
            block_extract: raw.block_extract,
        }
    }
}

unsafe fn owned_str(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    // SAFETY: caller guarantees NUL termination.
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// Callbacks handed to the plugin once a game is loaded.
#[derive(Copy, Clone)]
pub struct Callbacks {
    pub video_refresh: abi::VideoRefreshFn,
    pub audio_sample: abi::AudioSampleFn,
    pub audio_sample_batch: abi::AudioSampleBatchFn,
    pub input_poll: abi::InputPollFn,
    pub input_state: abi::InputStateFn,
}

/// Typed entry points of a loaded plugin.
///
/// Only reachable through [`PluginHandle::dispatch`], so a table never outlives the
/// library its pointers point into.
pub struct DispatchTable {
    init: abi::VoidFn,
    run: abi::VoidFn,
    deinit: Option<abi::VoidFn>,
    api_version: Option<abi::ApiVersionFn>,
    get_system_info: Option<abi::GetSystemInfoFn>,
    get_system_av_info: Option<abi::GetSystemAvInfoFn>,
    set_controller_port_device: Option<abi::SetControllerPortDeviceFn>,
    reset: Option<abi::VoidFn>,
    serialize_size: Option<abi::SerializeSizeFn>,
    serialize: Option<abi::SerializeFn>,
    unserialize: Option<abi::UnserializeFn>,
    cheat_reset: Option<abi::VoidFn>,
    cheat_set: Option<abi::CheatSetFn>,
    load_game: Option<abi::LoadGameFn>,
    unload_game: Option<abi::VoidFn>,
    get_region: Option<abi::GetRegionFn>,
    get_memory_data: Option<abi::GetMemoryDataFn>,
    get_memory_size: Option<abi::GetMemorySizeFn>,

    // Deferred until a game is loaded.
    set_video_refresh: Option<abi::SetVideoRefreshFn>,
    set_audio_sample: Option<abi::SetAudioSampleFn>,
    set_audio_sample_batch: Option<abi::SetAudioSampleBatchFn>,
    set_input_poll: Option<abi::SetInputPollFn>,
    set_input_state: Option<abi::SetInputStateFn>,
}

impl DispatchTable {
    fn resolve(source: &dyn SymbolSource) -> Result<Self, LoadError> {
        // SAFETY (every call below): the target type is the abi alias for that export.
        unsafe {
            Ok(Self {
                init: resolve_fn(source, symbols::INIT)
                    .ok_or(LoadError::SymbolMissing(symbols::INIT))?,
                run: resolve_fn(source, symbols::RUN)
                    .ok_or(LoadError::SymbolMissing(symbols::RUN))?,
                deinit: resolve_fn(source, symbols::DEINIT),
                api_version: resolve_fn(source, symbols::API_VERSION),
                get_system_info: resolve_fn(source, symbols::GET_SYSTEM_INFO),
                get_system_av_info: resolve_fn(source, symbols::GET_SYSTEM_AV_INFO),
                set_controller_port_device: resolve_fn(
                    source,
                    symbols::SET_CONTROLLER_PORT_DEVICE,
                ),
                reset: resolve_fn(source, symbols::RESET),
                serialize_size: resolve_fn(source, symbols::SERIALIZE_SIZE),
                serialize: resolve_fn(source, symbols::SERIALIZE),
                unserialize: resolve_fn(source, symbols::UNSERIALIZE),
                cheat_reset: resolve_fn(source, symbols::CHEAT_RESET),
                cheat_set: resolve_fn(source, symbols::CHEAT_SET),
                load_game: resolve_fn(source, symbols::LOAD_GAME),
                unload_game: resolve_fn(source, symbols::UNLOAD_GAME),
                get_region: resolve_fn(source, symbols::GET_REGION),
                get_memory_data: resolve_fn(source, symbols::GET_MEMORY_DATA),
                get_memory_size: resolve_fn(source, symbols::GET_MEMORY_SIZE),
                set_video_refresh: resolve_fn(source, symbols::SET_VIDEO_REFRESH),
                set_audio_sample: resolve_fn(source, symbols::SET_AUDIO_SAMPLE),
                set_audio_sample_batch: resolve_fn(source, symbols::SET_AUDIO_SAMPLE_BATCH),
                set_input_poll: resolve_fn(source, symbols::SET_INPUT_POLL),
                set_input_state: resolve_fn(source, symbols::SET_INPUT_STATE),
            })
        }
    }

    // The methods below are thin shims over the plugin's exports. The plugin is
    // trusted native code; its contract is the libretro header.

    pub fn init(&self) {
        unsafe { (self.init)() }
    }

    pub fn run(&self) {
        unsafe { (self.run)() }
    }

    pub fn deinit(&self) {
        if let Some(f) = self.deinit {
            unsafe { f() }
        }
    }

    pub fn api_version(&self) -> Option<u32> {
        self.api_version.map(|f| unsafe { f() })
    }

    pub fn system_info(&self) -> Option<PluginInfo> {
        let f = self.get_system_info?;
        // SAFETY: all-zero is a valid `retro_system_info` (null strings, false flags).
        let mut raw: SystemInfo = unsafe { std::mem::zeroed() };
        unsafe {
            f(&mut raw);
            Some(PluginInfo::from_raw(&raw))
        }
    }

    pub fn av_info(&self) -> Option<AvInfo> {
        let f = self.get_system_av_info?;
        // SAFETY: plain numeric record.
        let mut raw: SystemAvInfo = unsafe { std::mem::zeroed() };
        unsafe { f(&mut raw) };
        Some(AvInfo::from_raw(&raw))
    }

    pub fn set_controller_port_device(&self, port: u32, device: u32) {
        if let Some(f) = self.set_controller_port_device {
            unsafe { f(port as c_uint, device as c_uint) }
        }
    }

    pub fn reset(&self) {
        if let Some(f) = self.reset {
            unsafe { f() }
        }
    }

    pub fn serialize_size(&self) -> usize {
        self.serialize_size.map_or(0, |f| unsafe { f() })
    }

    pub fn serialize(&self, out: &mut [u8]) -> bool {
        self.serialize
            .is_some_and(|f| unsafe { f(out.as_mut_ptr().cast(), out.len()) })
    }

    pub fn unserialize(&self, data: &[u8]) -> bool {
        self.unserialize
            .is_some_and(|f| unsafe { f(data.as_ptr().cast(), data.len()) })
    }

    pub fn cheat_reset(&self) {
        if let Some(f) = self.cheat_reset {
            unsafe { f() }
        }
    }

    pub fn cheat_set(&self, index: u32, enabled: bool, code: &CStr) {
        if let Some(f) = self.cheat_set {
            unsafe { f(index as c_uint, enabled, code.as_ptr()) }
        }
    }

    pub fn has_load_game(&self) -> bool {
        self.load_game.is_some()
    }

    /// `None` loads in no-game mode.
    ///
    /// # Safety
    /// Pointers inside `game` must stay valid until [`DispatchTable::unload_game`].
    pub unsafe fn load_game(&self, game: Option<&GameInfo>) -> bool {
        let Some(f) = self.load_game else {
            return false;
        };
        let game = game.map_or(ptr::null(), |g| g as *const GameInfo);
        unsafe { f(game) }
    }

    pub fn unload_game(&self) {
        if let Some(f) = self.unload_game {
            unsafe { f() }
        }
    }

    pub fn region(&self) -> Option<u32> {
        self.get_region.map(|f| unsafe { f() })
    }

    /// Copy of a plugin memory region. `None` if the region is not exposed.
    pub fn memory(&self, id: u32) -> Option<Vec<u8>> {
        let data = unsafe { self.get_memory_data?(id as c_uint) };
        let size = unsafe { self.get_memory_size?(id as c_uint) };
        if data.is_null() || size == 0 {
            return None;
        }
        // SAFETY: the plugin exposes `size` bytes at `data` for this region.
        Some(unsafe { std::slice::from_raw_parts(data as *const u8, size) }.to_vec())
    }

    /// Hand the plugin its AV and input callbacks. Returns which setters existed.
    pub fn bind(&self, callbacks: &Callbacks) -> BoundCallbacks {
        let mut bound = BoundCallbacks {
            environment: true,
            ..BoundCallbacks::default()
        };
        unsafe {
            if let Some(f) = self.set_video_refresh {
                f(callbacks.video_refresh);
                bound.video_refresh = true;
            }
            if let Some(f) = self.set_audio_sample {
                f(callbacks.audio_sample);
                bound.audio_sample = true;
            }
            if let Some(f) = self.set_audio_sample_batch {
                f(callbacks.audio_sample_batch);
                bound.audio_sample_batch = true;
            }
            if let Some(f) = self.set_input_poll {
                f(callbacks.input_poll);
                bound.input_poll = true;
            }
            if let Some(f) = self.set_input_state {
                f(callbacks.input_state);
                bound.input_state = true;
            }
        }
        bound
    }
}

/// A loaded plugin. Dropping it releases the library.
pub struct PluginHandle {
    // Declared first so it is dropped before the library goes away.
    dispatch: DispatchTable,
    source: Box<dyn SymbolSource>,
}

impl PluginHandle {
    pub fn dispatch(&self) -> &DispatchTable {
        &self.dispatch
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }
}

/// Open the library at `path` and load it. See [`load_from`].
pub fn load(path: &Path, environment: abi::EnvironmentFn) -> Result<PluginHandle, LoadError> {
    let library = NativeLibrary::open(path)?;
    load_from(Box::new(library), environment)
}

/// Resolve entry points from `source`, installing `environment` first.
///
/// On error `source` is dropped, releasing whatever it mapped.
pub fn load_from(
    source: Box<dyn SymbolSource>,
    environment: abi::EnvironmentFn,
) -> Result<PluginHandle, LoadError> {
    // SAFETY: the alias matches `void retro_set_environment(retro_environment_t)`.
    let set_environment: abi::SetEnvironmentFn =
        unsafe { resolve_fn(&*source, symbols::SET_ENVIRONMENT) }
            .ok_or(LoadError::SymbolMissing(symbols::SET_ENVIRONMENT))?;

    tracing::debug!(plugin = %source.describe(), "installing environment callback");
    // SAFETY: the plugin may call `environment` re-entrantly from here.
    unsafe { set_environment(environment) };

    let dispatch = DispatchTable::resolve(&*source)?;
    tracing::info!(plugin = %source.describe(), "plugin entry points resolved");
    Ok(PluginHandle { dispatch, source })
}

/// Build a NUL-terminated path string for `retro_game_info`.
pub(crate) fn game_path(path: &Path) -> Result<CString, LoadError> {
    CString::new(path.to_string_lossy().into_owned()).map_err(|err| LoadError::GameUnreadable {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, err),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    static ENV_INSTALLS: AtomicU32 = AtomicU32::new(0);
    static INITS: AtomicU32 = AtomicU32::new(0);

    unsafe extern "C" fn host_env(_: c_uint, _: *mut c_void) -> bool {
        false
    }
    unsafe extern "C" fn plugin_set_env(_: abi::EnvironmentFn) {
        ENV_INSTALLS.fetch_add(1, Ordering::SeqCst);
    }
    unsafe extern "C" fn plugin_init() {
        INITS.fetch_add(1, Ordering::SeqCst);
    }
    unsafe extern "C" fn plugin_run() {}
    unsafe extern "C" fn plugin_region() -> c_uint {
        1
    }

    struct Table(HashMap<&'static str, usize>);

    impl SymbolSource for Table {
        fn resolve(&self, name: &str) -> Option<NonNull<c_void>> {
            self.0.get(name).and_then(|&a| NonNull::new(a as *mut c_void))
        }
        fn describe(&self) -> String {
            "table".into()
        }
    }

    fn table(entries: &[(&'static str, usize)]) -> Box<Table> {
        Box::new(Table(entries.iter().copied().collect()))
    }

    #[test]
    fn missing_library_is_not_found() {
        let err = NativeLibrary::open(Path::new("/nonexistent/libcore.so"))
            .err()
            .unwrap();
        assert!(matches!(err, LoadError::NotFound { .. }));
    }

    #[test]
    fn missing_set_environment() {
        let err = load_from(table(&[]), host_env).err().unwrap();
        assert!(matches!(
            err,
            LoadError::SymbolMissing(symbols::SET_ENVIRONMENT)
        ));
    }

    #[test]
    fn missing_run_after_environment_installed() {
        let before = ENV_INSTALLS.load(Ordering::SeqCst);
        let source = table(&[
            (symbols::SET_ENVIRONMENT, plugin_set_env as usize),
            (symbols::INIT, plugin_init as usize),
        ]);
        let err = load_from(source, host_env).err().unwrap();
        assert!(matches!(err, LoadError::SymbolMissing(symbols::RUN)));
        assert!(ENV_INSTALLS.load(Ordering::SeqCst) > before);
    }

    #[test]
    fn minimal_plugin_loads_with_optional_exports_absent() {
        let source = table(&[
            (symbols::SET_ENVIRONMENT, plugin_set_env as usize),
            (symbols::INIT, plugin_init as usize),
            (symbols::RUN, plugin_run as usize),
            (symbols::GET_REGION, plugin_region as usize),
        ]);
        let handle = load_from(source, host_env).unwrap();
        let dispatch = handle.dispatch();

        let before = INITS.load(Ordering::SeqCst);
        dispatch.init();
        assert_eq!(INITS.load(Ordering::SeqCst), before + 1);

        assert_eq!(dispatch.region(), Some(1));
        assert_eq!(dispatch.api_version(), None);
        assert!(dispatch.system_info().is_none());
        assert!(dispatch.memory(abi::memory::SAVE_RAM).is_none());
        assert!(!dispatch.has_load_game());
        assert!(!dispatch.serialize(&mut [0u8; 4]));
        assert_eq!(handle.describe(), "table");
    }

    #[test]
    fn nul_in_game_path_is_unreadable() {
        let err = game_path(Path::new("bad\0name.rom")).unwrap_err();
        assert!(matches!(err, LoadError::GameUnreadable { .. }));
    }
}
