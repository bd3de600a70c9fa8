// SPDX-License-Identifier: Apache-2.0

use clap::Args;
#[cfg(feature = "prometheus")]
use std::net::SocketAddr;
use std::path::PathBuf;

#[cfg(feature = "prometheus")]
use crate::init::parse;

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    /// Pipeline configuration file
    #[arg(long, env = "FLOX_CONFIG", default_value = "pipeline.yaml")]
    pub config: PathBuf,

    /// Metrics endpoint
    #[arg(long, env = "FLOX_METRICS_ENDPOINT", default_value = "0.0.0.0:2112", value_parser = parse::parse_endpoint)]
    #[cfg(feature = "prometheus")]
    pub metrics_endpoint: SocketAddr,
}
