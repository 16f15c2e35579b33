//! WebSocket connection management, channel membership, event routing, and broadcasting.

pub mod bridge;
pub mod channels;
pub mod connection;
pub mod registry;
pub mod router;
pub mod session;
