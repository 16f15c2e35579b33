//! # gymcast-core
//!
//! Foundation types shared by the gymcast crates:
//!
//! - **Branded IDs**: [`ConnectionId`] and [`ChannelId`] as newtypes for type safety
//! - **Events**: [`ActivityEvent`], [`ActivityKind`], and the outbound wire envelopes
//! - **Errors**: [`GymcastError`] via `thiserror`
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;

pub use errors::{GymcastError, Result};
pub use events::{ActivityEvent, ActivityKind, MemberActivity, OutboundEvent};
pub use ids::{ChannelId, ConnectionId};
