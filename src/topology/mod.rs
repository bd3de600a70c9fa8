// SPDX-License-Identifier: Apache-2.0

pub mod dispatcher;

use std::future::Future;

use crate::event::Event;

/// Receives every event produced by an input. Inputs await the returned
/// future before producing the next event from the same source.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: Event) -> impl Future<Output = ()> + Send;
}
