// SPDX-License-Identifier: Apache-2.0

pub mod crypto;
pub mod event;
pub mod exporters;
pub mod filters;
pub mod init;
pub mod listener;
pub mod receivers;
pub mod telemetry;
pub mod topology;
