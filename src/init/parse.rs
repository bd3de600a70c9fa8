// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Deserializer};
use std::error::Error;
use std::net::SocketAddr;
use tower::BoxError;

/// Parse a single key-value pair
pub(crate) fn parse_key_val<T, U>(s: &str) -> Result<(T, U), BoxError>
where
    T: std::str::FromStr,
    T::Err: Error + Send + Sync + 'static,
    U: std::str::FromStr,
    U::Err: Error + Send + Sync + 'static,
{
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{s}`"))?;
    Ok((s[..pos].parse()?, s[pos + 1..].parse()?))
}

/// Parse an endpoint
pub fn parse_endpoint(s: &str) -> Result<SocketAddr, Box<dyn Error + Send + Sync + 'static>> {
    // Use actual localhost address instead of localhost name, and treat a
    // bare ":port" as every interface.
    let s = if s.starts_with("localhost:") {
        s.replace("localhost:", "127.0.0.1:")
    } else if s.starts_with(':') {
        format!("0.0.0.0{}", s)
    } else {
        s.to_string()
    };
    let sa: SocketAddr = s.parse()?;
    Ok(sa)
}

// Support deser into a string from multiple value types. This allows a string
// environment variable to have a value that is a number or bool
pub(crate) fn deser_into_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    value_into_string(value).map_err(serde::de::Error::custom)
}

fn value_into_string(value: serde_json::Value) -> Result<String, &'static str> {
    match value {
        serde_json::Value::Number(num) => Ok(num.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        serde_json::Value::String(s) => Ok(s),
        _ => Err("unexpected value for string parameter"),
    }
}

/// Ordered name pairs, given either as a mapping or as a list of `key=value`
/// strings. A list keeps its written order; a mapping follows the order the
/// config loader hands it over in.
pub(crate) fn deserialize_key_value_pairs<'de, D>(
    deserializer: D,
) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| {
                value_into_string(v)
                    .map(|v| (k, v))
                    .map_err(serde::de::Error::custom)
            })
            .collect(),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => {
                    parse_key_val::<String, String>(&s).map_err(serde::de::Error::custom)
                }
                _ => Err(serde::de::Error::custom(
                    "expected KEY=value strings in pair list",
                )),
            })
            .collect(),
        _ => Err(serde::de::Error::custom(
            "expected a mapping or a list of KEY=value strings",
        )),
    }
}

/// A list of strings, also accepted as a single comma separated string so it
/// can be set from one environment variable.
pub(crate) fn deser_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(Vec::new()),
        serde_json::Value::String(s) => Ok(s
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|v| value_into_string(v).map_err(serde::de::Error::custom))
            .collect(),
        _ => Err(serde::de::Error::custom("expected a list of strings")),
    }
}
