// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Application configuration management.
//!
//! The detector settings and run options are stored in TOML through `confy`.
//! Command-line flags override whatever was loaded; `--save-config` writes the
//! merged result back.

use carrier_dsp::DetectorConfig;
use serde::{Deserialize, Serialize};

use crate::source::SourceKind;

const APP_NAME: &str = "carrier-monitor";
const CONFIG_NAME: &str = "config";

/// Application configuration stored in TOML format
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// Configuration schema version for migrations
    #[serde(default = "default_config_version")]
    pub config_version: u32,

    /// Source used when none is given on the command line
    #[serde(default)]
    pub source: SourceKind,

    /// Samples handed to the monitor per block
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Interval between status reports in milliseconds
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,

    /// Length of the demo signal in seconds
    #[serde(default = "default_duration_secs")]
    pub duration_secs: f64,

    /// Blocks queued ahead of the detector before the reader waits
    #[serde(default = "default_queue_limit")]
    pub queue_limit: usize,

    #[serde(default)]
    pub detector: DetectorConfig,
}

// Default value functions for serde
fn default_config_version() -> u32 {
    1
}

fn default_block_size() -> usize {
    16_384
}

fn default_report_interval_ms() -> u64 {
    1000
}

fn default_duration_secs() -> f64 {
    5.0
}

fn default_queue_limit() -> usize {
    64
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config_version: default_config_version(),
            source: SourceKind::default(),
            block_size: default_block_size(),
            report_interval_ms: default_report_interval_ms(),
            duration_secs: default_duration_secs(),
            queue_limit: default_queue_limit(),
            detector: DetectorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from disk, creating it with defaults if missing
    pub fn load() -> Result<Self, confy::ConfyError> {
        let mut config: AppConfig = confy::load(APP_NAME, CONFIG_NAME)?;
        if config.config_version < default_config_version() {
            log::info!("Upgrading configuration from version {}", config.config_version);
            config.config_version = default_config_version();
        }
        Ok(config)
    }

    /// Detector settings with the application's queue bound applied.
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            queue_limit: self.queue_limit.max(1),
            ..self.detector.clone()
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<(), confy::ConfyError> {
        confy::store(APP_NAME, CONFIG_NAME, self)
    }

    /// Get the config file path for display to user
    pub fn get_config_path() -> Result<std::path::PathBuf, confy::ConfyError> {
        confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
    }
}
