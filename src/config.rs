// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the rollup jobs and the scheduler.

use crate::rollup::HourlyWriteMode;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::debug;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub rollup: RollupConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RollupConfig {
    /// How the hourly job writes rows for a window that already has rows.
    #[serde(default)]
    pub hourly_write: HourlyWriteMode,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ScheduleConfig {
    /// Run the hourly job at every hour boundary.
    #[serde(default = "default_true")]
    pub hourly: bool,

    /// Run the daily job at midnight UTC.
    #[serde(default = "default_true")]
    pub daily: bool,

    /// Directory receiving one JSON file per daily result. Results are only
    /// logged when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_output_dir: Option<Utf8PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            hourly: true,
            daily: true,
            daily_output_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let content = fs::read_to_string(path.as_std_path())
            .with_context(|| format!("failed to read config file at {}", path))?;

        toml::from_str(&content).with_context(|| format!("failed to parse config file at {}", path))
    }

    /// Load configuration from a TOML file, or use defaults if it does not exist.
    pub fn load_or_default(path: &Utf8Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("no config file at {}, using defaults", path);
            Ok(Self::default())
        }
    }
}
