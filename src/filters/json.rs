// SPDX-License-Identifier: Apache-2.0

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

use crate::event::Event;

static ENV_TEMPLATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$\{([A-Za-z0-9_]+)\}$").expect("valid template pattern"));

/// Field-level transform over JSON events: drop, then rename, then add.
#[derive(Debug, Clone, Default)]
pub struct JsonFilter {
    drop_fields: Vec<String>,
    rename_fields: Vec<(String, String)>,
    add_fields: Vec<(String, String)>,
}

impl JsonFilter {
    pub fn new(
        drop_fields: Vec<String>,
        rename_fields: Vec<(String, String)>,
        add_fields: Vec<(String, String)>,
    ) -> Self {
        Self {
            drop_fields,
            rename_fields,
            add_fields,
        }
    }

    pub fn apply(&self, event: &mut Event) {
        for name in &self.drop_fields {
            event.remove(name);
        }

        for (from, to) in &self.rename_fields {
            if let Some(value) = event.remove(from) {
                event.insert(to.clone(), value);
            }
        }

        for (name, template) in &self.add_fields {
            event.insert(name.clone(), Value::String(expand_template(template)));
        }
    }
}

/// A template that is exactly `${NAME}` expands to the value of the `NAME`
/// environment variable, or an empty string when unset. Anything else is used
/// literally.
pub fn expand_template(template: &str) -> String {
    match ENV_TEMPLATE.captures(template) {
        Some(caps) => std::env::var(&caps[1]).unwrap_or_default(),
        None => template.to_string(),
    }
}
