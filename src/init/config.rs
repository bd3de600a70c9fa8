// SPDX-License-Identifier: Apache-2.0

//! Pipeline configuration.
//!
//! A pipeline is described by a YAML (or JSON) file with an `input`, an
//! optional list of `filters` and an `output`. Any key can be overridden from
//! the environment with the `FLOX_` prefix and `__` between levels, for example
//! `FLOX_OUTPUT__TARGET=http://loki:3100`.

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tower::BoxError;

use crate::init::parse::{
    deser_into_string, deser_string_list, deserialize_key_value_pairs, parse_endpoint,
};
use crate::receivers::file::{FileReceiverConfig, StartFrom};

pub const ENV_PREFIX: &str = "FLOX_";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputConfig {
    #[serde(rename = "type", default)]
    pub input_type: String,
    #[serde(default, deserialize_with = "deser_into_string")]
    pub namespace: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub track_offset: bool,
    #[serde(default)]
    pub start_from: StartFrom,
    #[serde(default)]
    pub offsets_path: Option<PathBuf>,
    #[serde(default, with = "humantime_serde")]
    pub discovery_interval: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub idle_interval: Option<Duration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterConfig {
    #[serde(rename = "type", default)]
    pub filter_type: String,
    #[serde(default, deserialize_with = "deser_string_list")]
    pub drop_fields: Vec<String>,
    #[serde(default, deserialize_with = "deserialize_key_value_pairs")]
    pub rename_fields: Vec<(String, String)>,
    #[serde(default, deserialize_with = "deserialize_key_value_pairs")]
    pub add_fields: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OutputConfig {
    #[serde(rename = "type", default)]
    pub output_type: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "deser_string_list")]
    pub brokers: Vec<String>,
    #[serde(default, deserialize_with = "deser_into_string")]
    pub topic: String,
    #[serde(default, deserialize_with = "deser_into_string")]
    pub client_id: String,
    #[serde(default)]
    pub max_attempts: Option<usize>,
    #[serde(default, with = "humantime_serde")]
    pub backoff: Option<Duration>,
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl PipelineConfig {
    /// Load the pipeline file and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BoxError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(format!("config file not found: {}", path.display()).into());
        }

        Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| format!("failed to parse config {}: {}", path.display(), e).into())
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.input.input_type.is_empty() {
            return Err("'input.type' is required".to_string());
        }
        if self.output.output_type.is_empty() {
            return Err("'output.type' is required".to_string());
        }

        match self.input.input_type.as_str() {
            "file" => self.file_receiver_config().validate(),
            "http" => self.http_address().map(|_| ()),
            other => Err(format!("unsupported input type: {}", other)),
        }
    }

    pub fn file_receiver_config(&self) -> FileReceiverConfig {
        let defaults = FileReceiverConfig::default();
        let input = &self.input;
        FileReceiverConfig {
            path: input.path.clone(),
            namespace: input.namespace.clone(),
            track_offset: input.track_offset,
            start_from: input.start_from,
            discovery_interval: input
                .discovery_interval
                .unwrap_or(defaults.discovery_interval),
            idle_interval: input.idle_interval.unwrap_or(defaults.idle_interval),
            offsets_path: input.offsets_path.clone().unwrap_or(defaults.offsets_path),
        }
    }

    pub fn http_address(&self) -> Result<SocketAddr, String> {
        if self.input.address.is_empty() {
            return Err("'input.address' is required for http input".to_string());
        }
        parse_endpoint(&self.input.address)
            .map_err(|e| format!("invalid input address {}: {}", self.input.address, e))
    }
}
