// SPDX-License-Identifier: Apache-2.0

//! Pipeline counters.

#[cfg(feature = "prometheus")]
pub mod metrics_server;

use std::sync::Arc;

use opentelemetry::KeyValue;
use opentelemetry::global;
use portable_atomic::{AtomicU64, Ordering};

pub const METER_NAME: &str = "flox";

pub trait Counter<T> {
    fn add(&self, value: T, attributes: &[KeyValue]);
}

#[derive(Clone)]
pub enum FloxCounter {
    /// Reported through the global OpenTelemetry meter provider.
    Otel(opentelemetry::metrics::Counter<u64>),
    /// In-process tally.
    Local(Arc<AtomicU64>),
    NoOp,
}

impl FloxCounter {
    pub fn local() -> Self {
        FloxCounter::Local(Arc::new(AtomicU64::new(0)))
    }

    /// Current tally for a local counter. Other variants report zero.
    pub fn value(&self) -> u64 {
        match self {
            FloxCounter::Local(v) => v.load(Ordering::Relaxed),
            _ => 0,
        }
    }
}

impl Counter<u64> for FloxCounter {
    fn add(&self, value: u64, attributes: &[KeyValue]) {
        match self {
            FloxCounter::Otel(c) => c.add(value, attributes),
            FloxCounter::Local(v) => {
                v.fetch_add(value, Ordering::Relaxed);
            }
            FloxCounter::NoOp => {}
        }
    }
}

/// Counters updated by the dispatcher for every event.
#[derive(Clone)]
pub struct PipelineMetrics {
    pub events_received: FloxCounter,
    pub events_filtered: FloxCounter,
    pub output_success: FloxCounter,
    pub output_failure: FloxCounter,
}

impl PipelineMetrics {
    /// Counters registered on the global meter provider.
    pub fn otel() -> Self {
        let meter = global::meter(METER_NAME);
        let counter = |name: &'static str, description: &'static str| {
            FloxCounter::Otel(
                meter
                    .u64_counter(name)
                    .with_description(description)
                    .build(),
            )
        };

        Self {
            events_received: counter("flox_events_received", "Events handed to the pipeline"),
            events_filtered: counter("flox_events_filtered", "Filter applications"),
            output_success: counter("flox_output_success", "Events delivered by the output"),
            output_failure: counter("flox_output_failure", "Events the output failed to deliver"),
        }
    }

    pub fn local() -> Self {
        Self {
            events_received: FloxCounter::local(),
            events_filtered: FloxCounter::local(),
            output_success: FloxCounter::local(),
            output_failure: FloxCounter::local(),
        }
    }

    pub fn noop() -> Self {
        Self {
            events_received: FloxCounter::NoOp,
            events_filtered: FloxCounter::NoOp,
            output_success: FloxCounter::NoOp,
            output_failure: FloxCounter::NoOp,
        }
    }
}
