//! Headless run configuration.
use std::{fs, path::Path};

use chip8::{prelude::*, Hz};
use serde::Deserialize;

use crate::error::AppError;

/// Instruction rate used when the configuration doesn't specify one.
pub const DEFAULT_CLOCK_FREQUENCY: Hz = Hz(500);

/// Options for a headless run, loaded from YAML.
///
/// ```yaml
/// clock_frequency: 700
/// frames: 300
/// seed: 42
/// keys:
///   - { frame: 10, key: 5, pressed: true }
///   - { frame: 12, key: 5, pressed: false }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConf {
    #[serde(flatten)]
    pub vm: Chip8Conf,
    /// Number of 60 Hz frames to run before stopping.
    pub frames: u64,
    /// Scripted keypad input.
    pub keys: Vec<KeyEvent>,
}

impl Default for RunConf {
    fn default() -> Self {
        Self {
            vm: Chip8Conf {
                clock_frequency: Some(DEFAULT_CLOCK_FREQUENCY),
                seed: None,
            },
            frames: 600,
            keys: Vec::new(),
        }
    }
}

/// Key state change, applied at the start of the given frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct KeyEvent {
    pub frame: u64,
    pub key: KeyCode,
    pub pressed: bool,
}

impl RunConf {
    pub fn from_file(filepath: impl AsRef<Path>) -> Result<Self, AppError> {
        let source = fs::read_to_string(filepath)?;
        Self::from_yaml(&source)
    }

    pub fn from_yaml(source: &str) -> Result<Self, AppError> {
        let mut conf: RunConf = serde_yaml::from_str(source)?;
        conf.keys.sort_by_key(|event| event.frame);
        Ok(conf)
    }

    pub fn clock_frequency(&self) -> Hz {
        self.vm.clock_frequency.unwrap_or(DEFAULT_CLOCK_FREQUENCY)
    }
}
