//! Activity events and their wire shapes.
//!
//! An [`ActivityEvent`] is transient: built at dispatch time, serialized once
//! into an [`OutboundEvent`] frame, delivered to the current channel members,
//! then discarded.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::GymcastError;
use crate::ids::{ChannelId, ConnectionId};

/// Outbound event type for member activity.
pub const MEMBER_ACTIVITY: &str = "member-activity";
/// Outbound event type sent once after the upgrade completes.
pub const CONNECTION_ESTABLISHED: &str = "connection.established";

/// Kind of member activity at a facility.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ActivityKind {
    /// Member entered the facility.
    #[serde(rename = "checkin", alias = "check-in")]
    CheckIn,
    /// Member left the facility.
    #[serde(rename = "checkout", alias = "check-out")]
    CheckOut,
}

impl ActivityKind {
    /// Wire name used in outbound frames.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CheckIn => "checkin",
            Self::CheckOut => "checkout",
        }
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = GymcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "checkin" | "check-in" => Ok(Self::CheckIn),
            "checkout" | "check-out" => Ok(Self::CheckOut),
            other => Err(GymcastError::UnknownActivityKind(other.to_string())),
        }
    }
}

/// A check-in/check-out event addressed to one channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ActivityEvent {
    /// What happened.
    pub kind: ActivityKind,
    /// Target channel.
    pub channel: ChannelId,
    /// Opaque subject reference (member id or object).
    pub member: Value,
    /// Server-assigned timestamp.
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    /// Build an event stamped with the current server time.
    #[must_use]
    pub fn now(kind: ActivityKind, channel: ChannelId, member: Value) -> Self {
        Self {
            kind,
            channel,
            member,
            timestamp: Utc::now(),
        }
    }
}

/// Payload of a `member-activity` frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemberActivity {
    /// `checkin` or `checkout`.
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    /// Subject of the activity.
    pub member: Value,
    /// RFC 3339 timestamp with millisecond precision.
    pub timestamp: String,
}

impl From<&ActivityEvent> for MemberActivity {
    fn from(event: &ActivityEvent) -> Self {
        Self {
            kind: event.kind,
            member: event.member.clone(),
            timestamp: format_timestamp(event.timestamp),
        }
    }
}

/// Envelope for every server → client frame.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEvent {
    /// Event type string.
    #[serde(rename = "type")]
    pub event_type: &'static str,
    /// Channel the event was addressed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gym_id: Option<ChannelId>,
    /// Envelope timestamp (only on lifecycle frames).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Event payload.
    pub data: Value,
}

impl OutboundEvent {
    /// `member-activity` frame for an activity event.
    pub fn member_activity(event: &ActivityEvent) -> crate::Result<Self> {
        Ok(Self {
            event_type: MEMBER_ACTIVITY,
            gym_id: Some(event.channel.clone()),
            timestamp: None,
            data: serde_json::to_value(MemberActivity::from(event))?,
        })
    }

    /// `connection.established` frame carrying the assigned client ID.
    #[must_use]
    pub fn connection_established(id: &ConnectionId) -> Self {
        Self {
            event_type: CONNECTION_ESTABLISHED,
            gym_id: None,
            timestamp: Some(format_timestamp(Utc::now())),
            data: serde_json::json!({ "clientId": id }),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Format a timestamp as RFC 3339 with milliseconds and a `Z` suffix.
#[must_use]
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
