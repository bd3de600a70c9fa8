// SPDX-License-Identifier: Apache-2.0

use tracing::warn;

use crate::event::Event;
use crate::exporters::{AnySink, Sink};
use crate::filters::FilterChain;
use crate::telemetry::{Counter, PipelineMetrics};
use crate::topology::EventHandler;

/// Runs the filter chain on each event and hands the result to the sink.
pub struct Dispatcher<S = AnySink> {
    chain: FilterChain,
    sink: S,
    metrics: PipelineMetrics,
}

impl<S: Sink> Dispatcher<S> {
    pub fn new(chain: FilterChain, sink: S, metrics: PipelineMetrics) -> Self {
        Self {
            chain,
            sink,
            metrics,
        }
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: Sink + 'static> EventHandler for Dispatcher<S> {
    async fn handle(&self, mut event: Event) {
        self.metrics.events_received.add(1, &[]);

        let applied = self.chain.apply(&mut event);
        if applied > 0 {
            self.metrics.events_filtered.add(applied as u64, &[]);
        }

        match self.sink.send(&event).await {
            Ok(()) => self.metrics.output_success.add(1, &[]),
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                self.metrics.output_failure.add(1, &[]);
                warn!(error = %e, "Failed to deliver event");
            }
        }
    }
}
