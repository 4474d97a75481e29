/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use public::l7_protocol::L7Protocol;

use crate::flow_generator::perf::StitchPolicy;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("yaml config invalid: {0}")]
    YamlConfigInvalid(String),
    #[error("runtime config invalid: {0}")]
    RuntimeConfigInvalid(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct LogConfig {
    // flexi_logger spec, e.g. "info" or "info, l7_observer::flow_generator=debug"
    pub log_level: String,
    // log to stderr only when empty
    pub log_file: String,
    pub log_retention: u32,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_file: String::new(),
            log_retention: 7,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct TimeoutConfig {
    #[serde(with = "humantime_serde")]
    pub process: Duration,
    #[serde(with = "humantime_serde")]
    pub connection: Duration,
    #[serde(with = "humantime_serde")]
    pub process_no_connection: Duration,
    // a closed connection still waiting for responses
    #[serde(with = "humantime_serde")]
    pub connection_closed: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            process: 10 * MINUTE,
            connection: 2 * MINUTE,
            process_no_connection: 30 * Duration::from_secs(1),
            connection_closed: 5 * Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "kebab-case")]
pub struct AggregatorConfig {
    // keys per protocol aggregator for client side connections
    pub client_max_size: usize,
    pub server_max_size: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            client_max_size: 10000,
            server_max_size: 10000,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct ObserverConfig {
    pub log: LogConfig,
    pub timeout: TimeoutConfig,
    #[serde(with = "humantime_serde")]
    pub gc_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,
    pub protocol_stat: bool,
    pub stitch_policy: StitchPolicy,
    pub max_buffer_size: usize,
    pub max_id_cache_size: usize,
    pub aggregator: AggregatorConfig,
    pub enabled_protocols: Vec<L7Protocol>,
    // prepended to every output record, in key order
    pub tags: BTreeMap<String, String>,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            timeout: TimeoutConfig::default(),
            gc_interval: Duration::from_secs(10),
            flush_interval: Duration::from_secs(15),
            protocol_stat: false,
            stitch_policy: StitchPolicy::Fifo,
            max_buffer_size: 16384,
            max_id_cache_size: 1024,
            aggregator: AggregatorConfig::default(),
            enabled_protocols: L7Protocol::SUPPORTED.to_vec(),
            tags: BTreeMap::new(),
        }
    }
}

impl ObserverConfig {
    pub fn load_from_file<T: AsRef<Path>>(path: T) -> Result<Self, ConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::YamlConfigInvalid(e.to_string()))?;
        Self::load(&contents)
    }

    pub fn load<C: AsRef<str>>(contents: C) -> Result<Self, ConfigError> {
        let contents = contents.as_ref();
        if contents.trim().is_empty() {
            // parsing empty string leads to EOF error
            return Ok(Self::default());
        }
        let cfg: Self = serde_yaml::from_str(contents)
            .map_err(|e| ConfigError::YamlConfigInvalid(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timeout;
        if t.connection.is_zero() || t.connection > t.process {
            return Err(ConfigError::RuntimeConfigInvalid(format!(
                "timeout.connection {:?} not in (0, timeout.process {:?}]",
                t.connection, t.process
            )));
        }
        if t.process > 24 * HOUR {
            return Err(ConfigError::RuntimeConfigInvalid(format!(
                "timeout.process {:?} longer than 24h",
                t.process
            )));
        }
        if t.process_no_connection > t.process {
            return Err(ConfigError::RuntimeConfigInvalid(format!(
                "timeout.process-no-connection {:?} longer than timeout.process {:?}",
                t.process_no_connection, t.process
            )));
        }
        if self.gc_interval < Duration::from_secs(1) || self.gc_interval > HOUR {
            return Err(ConfigError::RuntimeConfigInvalid(format!(
                "gc-interval {:?} not in [1s, 1h]",
                self.gc_interval
            )));
        }
        if self.flush_interval < Duration::from_secs(1) || self.flush_interval > HOUR {
            return Err(ConfigError::RuntimeConfigInvalid(format!(
                "flush-interval {:?} not in [1s, 1h]",
                self.flush_interval
            )));
        }
        if self.max_buffer_size < 64 {
            return Err(ConfigError::RuntimeConfigInvalid(format!(
                "max-buffer-size({}) smaller than 64",
                self.max_buffer_size
            )));
        }
        if self.max_id_cache_size == 0 {
            return Err(ConfigError::RuntimeConfigInvalid(
                "max-id-cache-size is 0".to_owned(),
            ));
        }
        if self.aggregator.client_max_size == 0 || self.aggregator.server_max_size == 0 {
            return Err(ConfigError::RuntimeConfigInvalid(format!(
                "aggregator max sizes ({}, {}) must be positive",
                self.aggregator.client_max_size, self.aggregator.server_max_size
            )));
        }
        if let Some(p) = self
            .enabled_protocols
            .iter()
            .find(|p| **p == L7Protocol::Unknown)
        {
            return Err(ConfigError::RuntimeConfigInvalid(format!(
                "enabled-protocols contains {}",
                p
            )));
        }
        Ok(())
    }

    pub fn is_enabled(&self, protocol: L7Protocol) -> bool {
        self.enabled_protocols.contains(&protocol)
    }

    pub fn tags(&self) -> Vec<(String, String)> {
        self.tags
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}
