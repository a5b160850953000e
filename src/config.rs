// Copyright 2026 the fastcgi-runtime contributors
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

//! Engine tuning knobs: concurrency limits, the multiplexing policy, and
//! the spill pipe's memory/disk budget (§5).
//!
//! Behind the `config` feature, [`EngineConfig`] derives `serde::Deserialize`
//! and can be loaded from a TOML file; without the feature, construct it
//! directly or via [`EngineConfig::default`].

use std::path::PathBuf;

#[cfg_attr(feature = "config", derive(serde::Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on simultaneous connections accepted by the engine
    /// (`FCGI_MAX_CONNS` reported to `GET_VALUES`).
    pub max_conn: u32,
    /// Upper bound on simultaneous sessions across all connections
    /// (`FCGI_MAX_REQS`).
    pub max_sess: u32,
    /// Upper bound on simultaneous sessions multiplexed onto one
    /// connection (`FCGI_MPXS_CONNS` is reported as 1 iff this is > 1).
    pub max_sess_per_conn: u32,
    /// Preferred STDOUT buffer size new sessions start with, before a
    /// handler calls `set_buffer_size`.
    pub default_buffer_size: usize,
    /// Spill pipe in-memory budget before falling back to a temp file.
    pub pipe_ram_threshold: usize,
    /// Spill pipe maximum temp-file size before a session is aborted.
    pub pipe_max_file_size: usize,
    /// Directory temp-file chunks are created in; defaults to the
    /// platform temp directory.
    pub pipe_temp_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_conn: 64,
            max_sess: 1024,
            max_sess_per_conn: 1,
            default_buffer_size: 8 * 1024,
            pipe_ram_threshold: 256 * 1024,
            pipe_max_file_size: 64 * 1024 * 1024,
            pipe_temp_dir: std::env::temp_dir(),
        }
    }
}

impl EngineConfig {
    /// `true` once more than one session may be multiplexed onto a single
    /// connection; drives the `FCGI_MPXS_CONNS` value the engine reports.
    pub fn multiplexing_enabled(&self) -> bool {
        self.max_sess_per_conn > 1
    }

    pub fn pipe_config(&self) -> crate::spill::PipeConfig {
        crate::spill::PipeConfig {
            ram_threshold: self.pipe_ram_threshold,
            max_file_size: self.pipe_max_file_size,
            temp_dir: self.pipe_temp_dir.clone(),
        }
    }
}

#[cfg(feature = "config")]
impl EngineConfig {
    /// Loads an `EngineConfig` from a TOML file, starting from
    /// [`EngineConfig::default`] for any field the file omits.
    pub fn from_toml_file(path: &std::path::Path) -> Result<Self, crate::error::RuntimeError> {
        let text = std::fs::read_to_string(path)
            .map_err(crate::error::RuntimeError::Io)?;
        toml::from_str(&text)
            .map_err(|e| crate::error::RuntimeError::Config(e.to_string()))
    }
}

#[cfg(all(test, feature = "config"))]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_in_defaults() {
        let parsed: EngineConfig = toml::from_str("max_conn = 8\n").unwrap();
        assert_eq!(parsed.max_conn, 8);
        assert_eq!(parsed.max_sess, EngineConfig::default().max_sess);
    }

    #[test]
    fn multiplexing_flag_follows_max_sess_per_conn() {
        let mut config = EngineConfig::default();
        assert!(!config.multiplexing_enabled());
        config.max_sess_per_conn = 4;
        assert!(config.multiplexing_enabled());
    }
}
