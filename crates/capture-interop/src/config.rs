use core::time::Duration;
use std::{
    fs,
    io::{self, Read},
    path::Path,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::kernels::DEFAULT_BUILD_OPTIONS;

/// Tunables for capture and the edge pipeline, stored as TOML.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long unreferenced capture resources are kept before teardown.
    pub teardown_grace_ms: u64,
    /// The bounded wait of one acquire attempt.
    pub frame_timeout_ms: u64,
    /// How many undelivered frames a stream may buffer.
    pub stream_buffer_depth: usize,
    /// How many access-lost recoveries in a row a stream attempts before faulting.
    pub max_consecutive_errors: usize,
    /// Options passed when building kernel programs.
    pub build_options: String,
    /// Edge strength at or above which a pixel is an edge.
    pub threshold: u8,
    /// If the grayscale image is blurred before the gradient.
    pub blur: bool,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LoadError {
    #[error("Failed to open config file:\n{0}")]
    OpenFile(#[source] io::Error),

    #[error("Failed to save config file:\n{0}")]
    SaveFile(#[from] SaveError),

    #[error("Failed to read config file:\n{0}")]
    ReadFile(#[source] io::Error),

    #[error("Failed to deserialize config:\n{0}")]
    Deserialize(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SaveError {
    #[error("Failed to serialize config:\n{0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write file:\n{0}")]
    Write(#[from] io::Error),
}

impl Config {
    /// Load the config at `path`, writing the defaults there if no file exists.
    pub fn load_or_create(path: &Path) -> Result<Self, LoadError> {
        let file = fs::File::open(path);

        if file
            .as_ref()
            .is_err_and(|e| e.kind() == io::ErrorKind::NotFound)
        {
            let config = Self::default();
            config.save(path)?;

            return Ok(config);
        }

        let mut file = file.map_err(LoadError::OpenFile)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(LoadError::ReadFile)?;

        let config: Self = toml::from_str(&contents)?;

        Ok(config)
    }

    /// Write the config to `path`.
    pub fn save(&self, path: &Path) -> Result<(), SaveError> {
        let toml_string = toml::to_string_pretty(self)?;

        fs::write(path, toml_string.as_bytes())?;
        Ok(())
    }

    /// The teardown grace window.
    pub fn teardown_grace(&self) -> Duration {
        Duration::from_millis(self.teardown_grace_ms)
    }

    /// The bounded wait of one acquire attempt.
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            teardown_grace_ms: 1000,
            frame_timeout_ms: 100,
            stream_buffer_depth: 1,
            max_consecutive_errors: 5,
            build_options: DEFAULT_BUILD_OPTIONS.to_string(),
            threshold: 128,
            blur: true,
        }
    }
}
