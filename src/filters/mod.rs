// SPDX-License-Identifier: Apache-2.0

//! Event filters applied between inputs and the output sink.

mod json;

pub use json::{JsonFilter, expand_template};

use tracing::warn;

use crate::event::Event;
use crate::init::config::FilterConfig;

/// Filters run in configured order against every event.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<JsonFilter>,
}

impl FilterChain {
    pub fn new(filters: Vec<JsonFilter>) -> Self {
        Self { filters }
    }

    /// Build from pipeline configuration. Filters of unknown type are ignored.
    pub fn from_config(configs: &[FilterConfig]) -> Self {
        let filters = configs
            .iter()
            .filter_map(|cfg| match cfg.filter_type.as_str() {
                "json" => Some(JsonFilter::new(
                    cfg.drop_fields.clone(),
                    cfg.rename_fields.clone(),
                    cfg.add_fields.clone(),
                )),
                other => {
                    warn!(filter_type = other, "Ignoring filter of unknown type");
                    None
                }
            })
            .collect();
        Self { filters }
    }

    /// Apply every filter and return how many ran.
    pub fn apply(&self, event: &mut Event) -> usize {
        for filter in &self.filters {
            filter.apply(event);
        }
        self.filters.len()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
