//! Environment command handling.
//!
//! The plugin negotiates everything it needs from the host (pixel format,
//! directories, timing, logging) through a single `bool (unsigned cmd, void *data)`
//! callback. Command numbers are not stable across plugin families, so the mapping
//! from number to meaning lives in a [`CommandTable`] chosen per
//! [`CommandRevision`]; the handler only ever works on the resolved [`EnvCommand`].
//!
//! Return value contract:
//! - `true`: recognized and applied (or acknowledged).
//! - `false`: unrecognized, missing payload, or rejected value.

use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_int, c_uint, c_void};

use crate::abi::{GameGeometry, LogCallback, LogLevel, SystemAvInfo};
use crate::config::CommandRevision;
use crate::runtime::RuntimeError;
use crate::state::{AvInfo, Geometry, SessionState};

/// Flag official headers OR into commands still marked experimental.
pub const EXPERIMENTAL: c_uint = 0x10000;

/// Log target used for messages emitted by the plugin itself.
pub const PLUGIN_LOG_TARGET: &str = "retrohost::plugin";

/// Bits answered to GET_AUDIO_VIDEO_ENABLE: video and audio both wanted.
const AUDIO_VIDEO_ENABLED: c_int = 0b11;

/// What a command means to the host, independent of its number.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EnvCommand {
    SetPixelFormat,
    GetSystemDirectory,
    GetSaveDirectory,
    GetContentDirectory,
    SetSupportNoGame,
    GetAudioVideoEnable,
    SetSystemAvInfo,
    SetGeometry,
    GetLogInterface,
    GetCanDupe,
    Shutdown,
    /// Recognized and acknowledged with no effect on the session.
    Advisory(Advisory),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Advisory {
    InputDescriptors,
    KeyboardCallback,
    Variables,
    AudioVideoEnable,
    AudioCallback,
    FastForwarding,
    DiskControl,
    DiskControlExt,
    MessageInterfaceVersion,
    MessageExt,
    InputMaxUsers,
    ControllerInfo,
    MinimumAudioLatency,
    Achievements,
    InputBitmasks,
    CoreOptionsDisplay,
}

use Advisory as A;
use EnvCommand as C;

const STANDARD: &[(c_uint, EnvCommand)] = &[
    (3, C::GetCanDupe),
    (7, C::Shutdown),
    (9, C::GetSystemDirectory),
    (10, C::SetPixelFormat),
    (11, C::Advisory(A::InputDescriptors)),
    (12, C::Advisory(A::KeyboardCallback)),
    (13, C::Advisory(A::DiskControl)),
    (16, C::Advisory(A::Variables)),
    (18, C::SetSupportNoGame),
    (22, C::Advisory(A::AudioCallback)),
    (27, C::GetLogInterface),
    (30, C::GetContentDirectory),
    (31, C::GetSaveDirectory),
    (32, C::SetSystemAvInfo),
    (35, C::Advisory(A::ControllerInfo)),
    (37, C::SetGeometry),
    (42, C::Advisory(A::Achievements)),
    (47, C::GetAudioVideoEnable),
    (51, C::Advisory(A::InputBitmasks)),
    (58, C::Advisory(A::DiskControlExt)),
    (63, C::Advisory(A::MinimumAudioLatency)),
    (64, C::Advisory(A::FastForwarding)),
    (69, C::Advisory(A::CoreOptionsDisplay)),
];

// Numbering from the older header some plugin families were built against.
// Code 12 doubles as the hardware-render request there; it is treated as the
// keyboard callback, matching how those frontends answered it.
const LEGACY: &[(c_uint, EnvCommand)] = &[
    (3, C::GetCanDupe),
    (5, C::Shutdown),
    (7, C::GetSystemDirectory),
    (9, C::Advisory(A::InputDescriptors)),
    (10, C::SetPixelFormat),
    (11, C::Advisory(A::DiskControl)),
    (12, C::Advisory(A::KeyboardCallback)),
    (14, C::Advisory(A::Variables)),
    (18, C::SetSupportNoGame),
    (22, C::Advisory(A::AudioCallback)),
    (27, C::GetLogInterface),
    (30, C::GetContentDirectory),
    (31, C::GetSaveDirectory),
    (32, C::SetSystemAvInfo),
    (33, C::Advisory(A::DiskControlExt)),
    (34, C::Advisory(A::MessageInterfaceVersion)),
    (35, C::Advisory(A::MessageExt)),
    (36, C::Advisory(A::InputMaxUsers)),
    (37, C::SetGeometry),
    (38, C::Advisory(A::MinimumAudioLatency)),
    (39, C::Advisory(A::FastForwarding)),
    (52, C::GetAudioVideoEnable),
    (53, C::Advisory(A::AudioVideoEnable)),
    (57, C::Advisory(A::Achievements)),
];

/// Number -> meaning lookup for one plugin family.
#[derive(Clone, Debug)]
pub struct CommandTable {
    revision: CommandRevision,
    entries: HashMap<c_uint, EnvCommand>,
}

impl CommandTable {
    pub fn for_revision(revision: CommandRevision) -> Self {
        let source = match revision {
            CommandRevision::Standard => STANDARD,
            CommandRevision::Legacy => LEGACY,
        };
        Self {
            revision,
            entries: source.iter().copied().collect(),
        }
    }

    pub fn revision(&self) -> CommandRevision {
        self.revision
    }

    /// Map (or remap) a command number for this session.
    pub fn insert(&mut self, code: c_uint, command: EnvCommand) {
        self.entries.insert(code, command);
    }

    pub fn remove(&mut self, code: c_uint) {
        self.entries.remove(&code);
    }

    pub fn lookup(&self, code: c_uint) -> Option<EnvCommand> {
        if let Some(cmd) = self.entries.get(&code) {
            return Some(*cmd);
        }
        match self.revision {
            CommandRevision::Standard => self.entries.get(&(code & !EXPERIMENTAL)).copied(),
            CommandRevision::Legacy => None,
        }
    }
}

/// Handle one environment call against `state`.
///
/// # Safety
/// `data` must be null or point to the payload type the plugin ABI associates with
/// `code` under the session's command table.
pub unsafe fn handle(state: &mut SessionState, code: c_uint, data: *mut c_void) -> bool {
    let Some(command) = state.commands.lookup(code) else {
        state.stats.unsupported_commands += 1;
        tracing::debug!(
            err = %RuntimeError::UnsupportedEnvironmentCommand(code),
            "environment command declined"
        );
        return false;
    };

    // SAFETY: forwarded from the caller.
    match unsafe { apply(state, code, command, data) } {
        Ok(()) => true,
        Err(err) => {
            tracing::debug!(?command, %err, "environment command rejected");
            false
        }
    }
}

unsafe fn apply(
    state: &mut SessionState,
    code: c_uint,
    command: EnvCommand,
    data: *mut c_void,
) -> Result<(), RuntimeError> {
    let needs_payload = !matches!(command, C::Shutdown | C::Advisory(_));
    if needs_payload && data.is_null() {
        return Err(RuntimeError::MissingPayload(code));
    }

    // SAFETY (all arms): `data` is non-null where dereferenced and points to the
    // payload type for `command`, per the caller's contract.
    match command {
        C::SetPixelFormat => {
            let raw = unsafe { *(data as *const c_uint) };
            let format = state.video.set_raw(raw)?;
            tracing::info!(code = raw, ?format, "pixel format set");
        }
        C::GetSystemDirectory => unsafe {
            *(data as *mut *const c_char) = state.paths.system.as_ptr();
        },
        C::GetSaveDirectory => unsafe {
            *(data as *mut *const c_char) = state.paths.save.as_ptr();
        },
        C::GetContentDirectory => unsafe {
            *(data as *mut *const c_char) = state.paths.content.as_ptr();
        },
        C::SetSupportNoGame => {
            let flag = data as *mut bool;
            // Only written when the plugin passed false; a plugin advertising
            // support may hand over read-only storage.
            if !unsafe { *flag } {
                unsafe { *flag = true };
            }
            state.supports_no_game = true;
        }
        C::GetAudioVideoEnable => unsafe {
            *(data as *mut c_int) = AUDIO_VIDEO_ENABLED;
        },
        C::SetSystemAvInfo => {
            let av = AvInfo::from_raw(unsafe { &*(data as *const SystemAvInfo) });
            state.apply_av_info(&av);
        }
        C::SetGeometry => {
            let geometry = Geometry::from_raw(unsafe { &*(data as *const GameGeometry) });
            state.apply_geometry(geometry);
        }
        C::GetLogInterface => unsafe {
            (*(data as *mut LogCallback)).log = plugin_log;
        },
        C::GetCanDupe => unsafe {
            *(data as *mut bool) = true;
        },
        C::Shutdown => {
            tracing::info!("plugin requested shutdown");
            state.shutdown_requested = true;
        }
        C::Advisory(kind) => {
            tracing::trace!(?kind, code, "advisory environment command acknowledged");
        }
    }
    Ok(())
}

/// Logger installed for GET_LOG_INTERFACE. Only the format string is forwarded.
pub unsafe extern "C" fn plugin_log(level: c_uint, fmt: *const c_char) {
    if fmt.is_null() {
        return;
    }
    // SAFETY: plugins pass a NUL-terminated format string.
    let text = unsafe { CStr::from_ptr(fmt) }.to_string_lossy();
    let text = text.trim_end();
    match LogLevel::from_raw(level) {
        LogLevel::Debug => tracing::debug!(target: PLUGIN_LOG_TARGET, "{text}"),
        LogLevel::Info => tracing::info!(target: PLUGIN_LOG_TARGET, "{text}"),
        LogLevel::Warn => tracing::warn!(target: PLUGIN_LOG_TARGET, "{text}"),
        LogLevel::Error => tracing::error!(target: PLUGIN_LOG_TARGET, "{text}"),
    }
}
