//! Inbound event dispatch.
//!
//! Client frames are JSON objects `{"type": "<event>", ...payload}`. The
//! router maps each event name to an [`EventHandler`]. Malformed or unknown
//! frames are dropped with a debug log; they never produce a reply and never
//! close the connection.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use gymcast_core::{ActivityEvent, ActivityKind, ChannelId, ConnectionId};
use metrics::counter;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::bridge::{BroadcastBridge, DeliveryReport};
use super::connection::ClientConnection;
use super::registry::ConnectionRegistry;
use crate::metrics::{WS_EVENTS_DROPPED_TOTAL, WS_EVENTS_ROUTED_TOTAL};

/// Join a gym's channel.
pub const JOIN_GYM: &str = "join-gym";
/// Leave a gym's channel.
pub const LEAVE_GYM: &str = "leave-gym";
/// Join a channel by `channelId`; same handler as [`JOIN_GYM`].
pub const JOIN_CHANNEL: &str = "join-channel";
/// Leave a channel by `channelId`; same handler as [`LEAVE_GYM`].
pub const LEAVE_CHANNEL: &str = "leave-channel";
/// A member checked in.
pub const MEMBER_CHECKIN: &str = "member-checkin";
/// A member checked out.
pub const MEMBER_CHECKOUT: &str = "member-checkout";
/// Generic activity with an explicit `kind`.
pub const ACTIVITY: &str = "activity";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct RouteContext {
    /// Live connections and membership.
    pub registry: Arc<ConnectionRegistry>,
    /// Fan-out to channel members.
    pub bridge: BroadcastBridge,
}

/// What happened to one inbound frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Connection joined a channel.
    Joined {
        /// Channel joined.
        channel: ChannelId,
        /// `false` if it was already a member.
        newly_joined: bool,
    },
    /// Connection left a channel.
    Left {
        /// Channel left.
        channel: ChannelId,
        /// `false` if it was not a member.
        was_member: bool,
    },
    /// Activity was fanned out to the channel.
    Broadcast(DeliveryReport),
    /// Frame was discarded.
    Dropped(DropReason),
}

/// Why an inbound frame was discarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Not valid JSON.
    InvalidJson,
    /// No string `type` field.
    MissingType,
    /// No handler for this event type.
    UnknownType(String),
    /// Payload failed validation.
    InvalidPayload(String),
}

impl DropReason {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::MissingType => "missing_type",
            Self::UnknownType(_) => "unknown_type",
            Self::InvalidPayload(_) => "invalid_payload",
        }
    }
}

/// Trait implemented by every inbound event handler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event from `conn`. `payload` is the whole frame object.
    async fn handle(
        &self,
        conn: &Arc<ClientConnection>,
        payload: &Value,
        ctx: &RouteContext,
    ) -> RouteOutcome;
}

/// Dispatch table from event name to handler.
pub struct EventRouter {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    ctx: RouteContext,
}

impl EventRouter {
    /// Create a router with the built-in gym handlers registered.
    pub fn new(ctx: RouteContext) -> Self {
        let mut router = Self::empty(ctx);
        router.register(JOIN_GYM, JoinGym);
        router.register(LEAVE_GYM, LeaveGym);
        router.register(JOIN_CHANNEL, JoinGym);
        router.register(LEAVE_CHANNEL, LeaveGym);
        router.register(MEMBER_CHECKIN, MemberActivity::fixed(ActivityKind::CheckIn));
        router.register(MEMBER_CHECKOUT, MemberActivity::fixed(ActivityKind::CheckOut));
        router.register(ACTIVITY, MemberActivity::from_payload());
        router
    }

    /// Create a router with no handlers.
    pub fn empty(ctx: RouteContext) -> Self {
        Self {
            handlers: HashMap::new(),
            ctx,
        }
    }

    /// Register a handler for an event name, replacing any existing one.
    pub fn register(&mut self, event: &str, handler: impl EventHandler + 'static) {
        let _ = self.handlers.insert(event.to_owned(), Arc::new(handler));
    }

    /// Whether a handler exists for an event name.
    pub fn has_event(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Route one inbound text frame from `conn`.
    pub async fn route(&self, conn: &Arc<ClientConnection>, text: &str) -> RouteOutcome {
        let outcome = self.dispatch(conn, text).await;
        if let RouteOutcome::Dropped(ref reason) = outcome {
            counter!(WS_EVENTS_DROPPED_TOTAL, "reason" => reason.label()).increment(1);
            debug!(conn_id = %conn.id, ?reason, "inbound event dropped");
        }
        outcome
    }

    /// Remove a closed connection from the registry and all its channels.
    pub fn disconnect(&self, id: &ConnectionId) -> bool {
        self.ctx.registry.unregister(id)
    }

    async fn dispatch(&self, conn: &Arc<ClientConnection>, text: &str) -> RouteOutcome {
        let Ok(frame) = serde_json::from_str::<Value>(text) else {
            return RouteOutcome::Dropped(DropReason::InvalidJson);
        };
        let Some(event) = frame.get("type").and_then(Value::as_str) else {
            return RouteOutcome::Dropped(DropReason::MissingType);
        };
        let Some(handler) = self.handlers.get(event) else {
            return RouteOutcome::Dropped(DropReason::UnknownType(event.to_owned()));
        };
        counter!(WS_EVENTS_ROUTED_TOTAL, "event" => event.to_owned()).increment(1);
        debug!(conn_id = %conn.id, event, "dispatching event");
        handler.handle(conn, &frame, &self.ctx).await
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GymPayload {
    #[serde(alias = "channelId")]
    gym_id: ChannelId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityPayload {
    #[serde(alias = "channelId")]
    gym_id: ChannelId,
    member: Option<Value>,
    kind: Option<String>,
}

fn invalid(e: impl std::fmt::Display) -> RouteOutcome {
    RouteOutcome::Dropped(DropReason::InvalidPayload(e.to_string()))
}

struct JoinGym;

#[async_trait]
impl EventHandler for JoinGym {
    async fn handle(
        &self,
        conn: &Arc<ClientConnection>,
        payload: &Value,
        ctx: &RouteContext,
    ) -> RouteOutcome {
        match GymPayload::deserialize(payload) {
            Ok(p) => {
                let newly_joined = ctx.registry.join(conn, &p.gym_id);
                RouteOutcome::Joined {
                    channel: p.gym_id,
                    newly_joined,
                }
            }
            Err(e) => invalid(e),
        }
    }
}

struct LeaveGym;

#[async_trait]
impl EventHandler for LeaveGym {
    async fn handle(
        &self,
        conn: &Arc<ClientConnection>,
        payload: &Value,
        ctx: &RouteContext,
    ) -> RouteOutcome {
        match GymPayload::deserialize(payload) {
            Ok(p) => {
                let was_member = ctx.registry.leave(conn, &p.gym_id);
                RouteOutcome::Left {
                    channel: p.gym_id,
                    was_member,
                }
            }
            Err(e) => invalid(e),
        }
    }
}

/// Check-in/check-out relay. The kind is fixed by the event name or read
/// from the payload's `kind` field.
struct MemberActivity {
    kind: Option<ActivityKind>,
}

impl MemberActivity {
    fn fixed(kind: ActivityKind) -> Self {
        Self { kind: Some(kind) }
    }

    fn from_payload() -> Self {
        Self { kind: None }
    }
}

#[async_trait]
impl EventHandler for MemberActivity {
    async fn handle(
        &self,
        conn: &Arc<ClientConnection>,
        payload: &Value,
        ctx: &RouteContext,
    ) -> RouteOutcome {
        let p = match ActivityPayload::deserialize(payload) {
            Ok(p) => p,
            Err(e) => return invalid(e),
        };
        let Some(member) = p.member else {
            return invalid("missing member");
        };
        let kind = match (self.kind, p.kind.as_deref()) {
            (Some(kind), _) => kind,
            (None, Some(raw)) => match ActivityKind::from_str(raw) {
                Ok(kind) => kind,
                Err(e) => return invalid(e),
            },
            (None, None) => return invalid("missing kind"),
        };
        let event = ActivityEvent::now(kind, p.gym_id, member);
        RouteOutcome::Broadcast(ctx.bridge.publish_from(&conn.id, &event).await)
    }
}
