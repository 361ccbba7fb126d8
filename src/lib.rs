#![forbid(unsafe_code)]

// chatload library - synthetic concurrent load against a Socket.IO chat service

pub mod activity;
pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod exporter;
pub mod metrics;
pub mod report;
pub mod room;
pub mod scheduler;
pub mod session;

#[cfg(test)]
mod testing;
