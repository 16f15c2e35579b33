//! # gymcast-server
//!
//! Axum HTTP + `WebSocket` server that fans out gym activity to per-gym channels.
//!
//! - `WebSocket` gateway: connection registry, channel membership, event routing
//! - [`BroadcastBridge`](websocket::bridge::BroadcastBridge): the seam HTTP handlers use to publish
//! - REST routes on the same listener: welcome, health, metrics, activity publish
//! - Ordered graceful shutdown via `CancellationToken` + `TaskTracker`

#![deny(unsafe_code)]

pub mod api;
pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use errors::ServerError;
