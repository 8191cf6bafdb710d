// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//

//! Quern configuration

use std::collections::HashMap;
use std::result;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::{QuernError, Result};

/// Target size of a merged output block in bytes.
pub const QUERN_MERGE_BLOCK_SIZE: &str = "quern.merge.block.size";
/// Process-wide budget of concurrently open files for merge input.
pub const QUERN_MERGE_OPEN_FILE_LIMIT: &str = "quern.merge.open.file.limit";
/// Number of workers consuming merge events.
pub const QUERN_MERGE_EVENT_WORKERS: &str = "quern.merge.event.workers";
/// Initial sleep when caching a merged block hits buffer backpressure.
pub const QUERN_MERGE_CACHE_BACKOFF_INIT_MS: &str =
    "quern.merge.cache.backoff.init.ms";
/// Upper bound for the doubling backpressure sleep.
pub const QUERN_MERGE_CACHE_BACKOFF_MAX_MS: &str = "quern.merge.cache.backoff.max.ms";
/// Capacity of the in-memory shuffle block cache in bytes.
pub const QUERN_BUFFER_CAPACITY_BYTES: &str = "quern.buffer.capacity.bytes";
/// Base directory for local shuffle data and index files.
pub const QUERN_STORAGE_LOCAL_DATA_DIR: &str = "quern.storage.local.data.dir";

/// Result alias for configuration value parsing.
pub type ParseResult<T> = result::Result<T, String>;

static CONFIG_ENTRIES: LazyLock<HashMap<String, ConfigEntry>> = LazyLock::new(|| {
    let entries = vec![
        ConfigEntry::new(QUERN_MERGE_BLOCK_SIZE.to_string(),
                         "Target size in bytes of one merged output block; a single record larger than this still lands whole".to_string(),
                         DataType::UInt64, Some((14 * 1024 * 1024).to_string())),
        ConfigEntry::new(QUERN_MERGE_OPEN_FILE_LIMIT.to_string(),
                         "Process-wide budget of concurrently open files for file-backed merge input".to_string(),
                         DataType::UInt64, Some(1024.to_string())),
        ConfigEntry::new(QUERN_MERGE_EVENT_WORKERS.to_string(),
                         "Number of workers consuming merge events in parallel".to_string(),
                         DataType::UInt16, Some(4.to_string())),
        ConfigEntry::new(QUERN_MERGE_CACHE_BACKOFF_INIT_MS.to_string(),
                         "Initial sleep in milliseconds when caching a merged block is rejected for lack of buffer space".to_string(),
                         DataType::UInt64, Some(100.to_string())),
        ConfigEntry::new(QUERN_MERGE_CACHE_BACKOFF_MAX_MS.to_string(),
                         "Upper bound in milliseconds for the doubling backpressure sleep".to_string(),
                         DataType::UInt64, Some(2000.to_string())),
        ConfigEntry::new(QUERN_BUFFER_CAPACITY_BYTES.to_string(),
                         "Capacity in bytes of the in-memory shuffle block cache".to_string(),
                         DataType::UInt64, Some((256 * 1024 * 1024).to_string())),
        ConfigEntry::new(QUERN_STORAGE_LOCAL_DATA_DIR.to_string(),
                         "Base directory for local shuffle data and index files".to_string(),
                         DataType::Utf8, Some("/tmp/quern-shuffle".to_string())),
    ];
    entries
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect::<HashMap<_, _>>()
});

/// Data types supported for configuration values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// UTF-8 string value.
    Utf8,
    /// Unsigned 16-bit integer value.
    UInt16,
    /// Unsigned 64-bit integer value.
    UInt64,
    /// Boolean value.
    Boolean,
}

/// Configuration option meta-data
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    name: String,
    description: String,
    data_type: DataType,
    default_value: Option<String>,
}

impl ConfigEntry {
    fn new(
        name: String,
        description: String,
        data_type: DataType,
        default_value: Option<String>,
    ) -> Self {
        Self {
            name,
            description,
            data_type,
            default_value,
        }
    }

    /// Returns the description of this configuration option.
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Quern configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuernConfig {
    /// Settings stored in map for easy serde
    settings: HashMap<String, String>,
}

impl Default for QuernConfig {
    fn default() -> Self {
        // infallible because every entry carries a valid default
        Self::with_settings(HashMap::new()).unwrap()
    }
}

impl QuernConfig {
    /// Create a new configuration based on key-value pairs
    pub fn with_settings(settings: HashMap<String, String>) -> Result<Self> {
        let supported_entries = QuernConfig::valid_entries();
        for (name, entry) in supported_entries {
            if let Some(v) = settings.get(name) {
                // validate that we can parse the user-supplied value
                Self::parse_value(v.as_str(), entry.data_type).map_err(|e| QuernError::Configuration(format!("Failed to parse user-supplied value '{v}' for configuration setting '{name}': {e}")))?;
            } else if let Some(v) = entry.default_value.clone() {
                Self::parse_value(v.as_str(), entry.data_type).map_err(|e| QuernError::Configuration(format!("Failed to parse default value '{v}' for configuration setting '{name}': {e}")))?;
            } else {
                return Err(QuernError::Configuration(format!(
                    "No value specified for mandatory configuration setting '{name}'"
                )));
            }
        }
        for name in settings.keys() {
            if !supported_entries.contains_key(name) {
                return Err(QuernError::Configuration(format!(
                    "Configuration setting '{name}' does not exist"
                )));
            }
        }

        Ok(Self { settings })
    }

    /// Validates that a raw value parses as the given data type.
    pub fn parse_value(val: &str, data_type: DataType) -> ParseResult<()> {
        match data_type {
            DataType::UInt16 => {
                val.to_string()
                    .parse::<u16>()
                    .map_err(|e| format!("{e:?}"))?;
            }
            DataType::UInt64 => {
                val.to_string()
                    .parse::<u64>()
                    .map_err(|e| format!("{e:?}"))?;
            }
            DataType::Boolean => {
                val.to_string()
                    .parse::<bool>()
                    .map_err(|e| format!("{e:?}"))?;
            }
            DataType::Utf8 => {
                val.to_string();
            }
        }

        Ok(())
    }

    /// All available configuration options
    pub fn valid_entries() -> &'static HashMap<String, ConfigEntry> {
        &CONFIG_ENTRIES
    }

    /// Returns the raw settings map.
    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    /// Target size in bytes of one merged output block.
    pub fn merge_block_size(&self) -> usize {
        self.get_usize_setting(QUERN_MERGE_BLOCK_SIZE)
    }

    /// Process-wide budget of concurrently open files for merge input.
    pub fn merge_open_file_limit(&self) -> usize {
        self.get_usize_setting(QUERN_MERGE_OPEN_FILE_LIMIT)
    }

    /// Number of workers consuming merge events.
    pub fn merge_event_workers(&self) -> usize {
        self.get_usize_setting(QUERN_MERGE_EVENT_WORKERS)
    }

    /// Initial sleep when caching a merged block hits buffer backpressure.
    pub fn merge_cache_backoff_init(&self) -> Duration {
        Duration::from_millis(self.get_usize_setting(QUERN_MERGE_CACHE_BACKOFF_INIT_MS) as u64)
    }

    /// Upper bound for the doubling backpressure sleep.
    pub fn merge_cache_backoff_max(&self) -> Duration {
        Duration::from_millis(self.get_usize_setting(QUERN_MERGE_CACHE_BACKOFF_MAX_MS) as u64)
    }

    /// Capacity in bytes of the in-memory shuffle block cache.
    pub fn buffer_capacity_bytes(&self) -> usize {
        self.get_usize_setting(QUERN_BUFFER_CAPACITY_BYTES)
    }

    /// Base directory for local shuffle data and index files.
    pub fn local_data_dir(&self) -> String {
        self.get_string_setting(QUERN_STORAGE_LOCAL_DATA_DIR)
    }

    fn get_usize_setting(&self, key: &str) -> usize {
        if let Some(v) = self.settings.get(key) {
            // infallible because we validate all configs in the constructor
            v.parse().unwrap()
        } else {
            let entries = Self::valid_entries();
            // infallible because we validate all configs in the constructor
            let v = entries.get(key).unwrap().default_value.as_ref().unwrap();
            v.parse().unwrap()
        }
    }

    fn get_string_setting(&self, key: &str) -> String {
        if let Some(v) = self.settings.get(key) {
            // infallible because we validate all configs in the constructor
            v.to_string()
        } else {
            let entries = Self::valid_entries();
            // infallible because we validate all configs in the constructor
            let v = entries.get(key).unwrap().default_value.as_ref().unwrap();
            v.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() -> Result<()> {
        let config = QuernConfig::default();
        assert_eq!(14 * 1024 * 1024, config.merge_block_size());
        assert_eq!(1024, config.merge_open_file_limit());
        assert_eq!(4, config.merge_event_workers());
        assert_eq!(Duration::from_millis(100), config.merge_cache_backoff_init());
        assert_eq!(Duration::from_millis(2000), config.merge_cache_backoff_max());
        assert_eq!("/tmp/quern-shuffle", config.local_data_dir());
        Ok(())
    }

    #[test]
    fn custom_settings() -> Result<()> {
        let mut settings = HashMap::new();
        settings.insert(QUERN_MERGE_BLOCK_SIZE.to_string(), "1024".to_string());
        settings.insert(QUERN_MERGE_EVENT_WORKERS.to_string(), "2".to_string());
        let config = QuernConfig::with_settings(settings)?;
        assert_eq!(1024, config.merge_block_size());
        assert_eq!(2, config.merge_event_workers());
        // untouched keys keep their defaults
        assert_eq!(1024, config.merge_open_file_limit());
        Ok(())
    }

    #[test]
    fn invalid_value_is_rejected() {
        let mut settings = HashMap::new();
        settings.insert(QUERN_MERGE_BLOCK_SIZE.to_string(), "lots".to_string());
        assert!(QuernConfig::with_settings(settings).is_err());
    }

    #[test]
    fn unknown_key_is_rejected() {
        let mut settings = HashMap::new();
        settings.insert("quern.merge.unknown".to_string(), "1".to_string());
        assert!(QuernConfig::with_settings(settings).is_err());
    }
}
