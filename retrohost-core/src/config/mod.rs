//! Host configuration.
//!
//! Everything the plugin can ask the host for that is not derived from the plugin
//! itself: directories, which environment command numbering to speak, and the
//! audio fallbacks used when a plugin reports nonsense.

use serde::Deserialize;
use std::path::PathBuf;

use crate::abi;

/// Which numeric mapping of environment commands the plugin family uses.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandRevision {
    /// Official `libretro.h` numbering.
    #[default]
    Standard,
    /// Alternate numbering shipped with older frontend headers.
    Legacy,
}

/// How `read` behaves when fewer frames are buffered than requested.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadPolicy {
    /// Always hand back exactly the requested number of frames, padding with silence.
    #[default]
    Pad,
    /// Hand back only the frames that were buffered.
    Exact,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub system_dir: PathBuf,
    pub save_dir: PathBuf,
    pub content_dir: PathBuf,
    pub command_revision: CommandRevision,
    /// Used when the plugin reports a 0 Hz sample rate.
    pub fallback_sample_rate: u32,
    /// Ring capacity in frames when `sample_rate / 4` comes out as zero.
    pub fallback_ring_capacity: usize,
    /// Device bound to port 0 after initialization.
    pub default_controller_device: u32,
    pub read_policy: ReadPolicy,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            system_dir: PathBuf::from("."),
            save_dir: PathBuf::from("."),
            content_dir: PathBuf::from("."),
            command_revision: CommandRevision::Standard,
            fallback_sample_rate: 44_100,
            fallback_ring_capacity: 11_025,
            default_controller_device: abi::DEVICE_JOYPAD,
            read_policy: ReadPolicy::Pad,
        }
    }
}

impl HostConfig {
    pub fn with_command_revision(mut self, revision: CommandRevision) -> Self {
        self.command_revision = revision;
        self
    }

    pub fn with_directories(mut self, system: PathBuf, save: PathBuf, content: PathBuf) -> Self {
        self.system_dir = system;
        self.save_dir = save;
        self.content_dir = content;
        self
    }

    pub fn with_read_policy(mut self, policy: ReadPolicy) -> Self {
        self.read_policy = policy;
        self
    }
}
