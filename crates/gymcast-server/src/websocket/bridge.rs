//! Broadcast bridge: fan-out of activity events to channel members.
//!
//! The bridge is the only way code outside the connection layer (HTTP
//! handlers, tests) reaches clients. It is cheap to clone and safe to call
//! from many tasks at once.

use std::sync::Arc;

use gymcast_core::{ActivityEvent, ActivityKind, ChannelId, ConnectionId, OutboundEvent};
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::channels::ChannelTable;
use super::connection::Frame;
use crate::metrics::{BROADCAST_PUBLISHES_TOTAL, WS_BROADCAST_DROPS_TOTAL};

/// Outcome of one publish. Informational only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    /// Members in the snapshot, after sender exclusion.
    pub recipients: usize,
    /// Frames queued successfully.
    pub delivered: usize,
    /// Frames dropped on a full or closed queue.
    pub dropped: usize,
}

/// Publishes activity events to every member of a channel.
#[derive(Clone)]
pub struct BroadcastBridge {
    channels: Arc<ChannelTable>,
    /// `true` while publishes are allowed. Held for read during a publish.
    gate: Arc<RwLock<bool>>,
}

impl BroadcastBridge {
    /// Create a bridge over a membership table.
    pub fn new(channels: Arc<ChannelTable>) -> Self {
        Self {
            channels,
            gate: Arc::new(RwLock::new(true)),
        }
    }

    /// Deliver an event to every current member of its channel.
    pub async fn publish(&self, event: &ActivityEvent) -> DeliveryReport {
        self.publish_inner(event, None, "http").await
    }

    /// Build a timestamped activity event and publish it.
    pub async fn publish_activity(
        &self,
        channel: ChannelId,
        kind: ActivityKind,
        member: Value,
    ) -> DeliveryReport {
        self.publish(&ActivityEvent::now(kind, channel, member)).await
    }

    /// Deliver an event to every member except the sender.
    pub(crate) async fn publish_from(
        &self,
        sender: &ConnectionId,
        event: &ActivityEvent,
    ) -> DeliveryReport {
        self.publish_inner(event, Some(sender), "ws").await
    }

    /// Refuse new publishes after waiting for in-flight ones to finish.
    pub async fn close(&self) {
        let mut open = self.gate.write().await;
        *open = false;
    }

    /// Whether publishes are still accepted.
    pub async fn is_open(&self) -> bool {
        *self.gate.read().await
    }

    async fn publish_inner(
        &self,
        event: &ActivityEvent,
        exclude: Option<&ConnectionId>,
        origin: &'static str,
    ) -> DeliveryReport {
        let open = self.gate.read().await;
        if !*open {
            debug!(gym_id = %event.channel, "bridge closed, publish skipped");
            return DeliveryReport::default();
        }

        let frame = match OutboundEvent::member_activity(event).and_then(|e| e.to_json()) {
            Ok(json) => Frame::from(json),
            Err(e) => {
                warn!(gym_id = %event.channel, error = %e, "failed to serialize activity");
                return DeliveryReport::default();
            }
        };

        let members = self.channels.members_of(&event.channel);
        let mut report = DeliveryReport::default();
        for conn in members {
            if exclude == Some(&conn.id) {
                continue;
            }
            report.recipients += 1;
            if conn.send(frame.clone()) {
                report.delivered += 1;
            } else {
                report.dropped += 1;
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                warn!(conn_id = %conn.id, gym_id = %event.channel, "failed to deliver activity to client");
            }
        }
        drop(open);

        counter!(BROADCAST_PUBLISHES_TOTAL, "origin" => origin).increment(1);
        debug!(
            gym_id = %event.channel,
            kind = %event.kind,
            recipients = report.recipients,
            dropped = report.dropped,
            "activity published"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    use crate::websocket::connection::ClientConnection;

    fn gym(id: &str) -> ChannelId {
        ChannelId::parse(id).unwrap()
    }

    fn make_conn(id: &str, cap: usize) -> (Arc<ClientConnection>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(cap);
        (Arc::new(ClientConnection::new(ConnectionId::from(id), tx)), rx)
    }

    fn setup() -> (Arc<ChannelTable>, BroadcastBridge) {
        let table = Arc::new(ChannelTable::new());
        let bridge = BroadcastBridge::new(Arc::clone(&table));
        (table, bridge)
    }

    fn parse(frame: &Frame) -> Value {
        serde_json::from_str(frame.as_str()).unwrap()
    }

    #[tokio::test]
    async fn publish_reaches_every_member() {
        let (table, bridge) = setup();
        let (a, mut ra) = make_conn("a", 8);
        let (b, mut rb) = make_conn("b", 8);
        let _ = table.join(&gym("gym-1"), &a);
        let _ = table.join(&gym("gym-1"), &b);

        let report = bridge
            .publish_activity(gym("gym-1"), ActivityKind::CheckIn, json!("m1"))
            .await;
        assert_eq!(
            report,
            DeliveryReport {
                recipients: 2,
                delivered: 2,
                dropped: 0
            }
        );

        for rx in [&mut ra, &mut rb] {
            let v = parse(&rx.recv().await.unwrap());
            assert_eq!(v["type"], "member-activity");
            assert_eq!(v["gymId"], "gym-1");
            assert_eq!(v["data"]["type"], "checkin");
            assert_eq!(v["data"]["member"], "m1");
            assert!(v["data"]["timestamp"].as_str().unwrap().ends_with('Z'));
        }
    }

    #[tokio::test]
    async fn publish_to_empty_channel_is_a_noop() {
        let (_table, bridge) = setup();
        let report = bridge
            .publish_activity(gym("nobody"), ActivityKind::CheckOut, json!({"id": 7}))
            .await;
        assert_eq!(report, DeliveryReport::default());
    }

    #[tokio::test]
    async fn publish_does_not_leak_across_channels() {
        let (table, bridge) = setup();
        let (a, mut ra) = make_conn("a", 8);
        let (c, mut rc) = make_conn("c", 8);
        let _ = table.join(&gym("gym-1"), &a);
        let _ = table.join(&gym("gym-2"), &c);

        let _ = bridge
            .publish_activity(gym("gym-1"), ActivityKind::CheckIn, json!("m1"))
            .await;
        assert!(ra.try_recv().is_ok());
        assert!(rc.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_from_excludes_sender() {
        let (table, bridge) = setup();
        let (a, mut ra) = make_conn("a", 8);
        let (b, mut rb) = make_conn("b", 8);
        let _ = table.join(&gym("gym-1"), &a);
        let _ = table.join(&gym("gym-1"), &b);

        let event = ActivityEvent::now(ActivityKind::CheckIn, gym("gym-1"), json!("m1"));
        let report = bridge.publish_from(&a.id, &event).await;
        assert_eq!(report.recipients, 1);
        assert!(ra.try_recv().is_err());
        assert!(rb.try_recv().is_ok());
    }

    #[tokio::test]
    async fn full_queue_is_isolated() {
        let (table, bridge) = setup();
        let (slow, _rs) = make_conn("slow", 1);
        let (fast, mut rf) = make_conn("fast", 8);
        let _ = table.join(&gym("gym-1"), &slow);
        let _ = table.join(&gym("gym-1"), &fast);

        let _ = bridge
            .publish_activity(gym("gym-1"), ActivityKind::CheckIn, json!("m1"))
            .await;
        let report = bridge
            .publish_activity(gym("gym-1"), ActivityKind::CheckOut, json!("m1"))
            .await;
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(slow.drop_count(), 1);

        assert_eq!(parse(&rf.recv().await.unwrap())["data"]["type"], "checkin");
        assert_eq!(parse(&rf.recv().await.unwrap())["data"]["type"], "checkout");
    }

    #[tokio::test]
    async fn closed_bridge_skips_publish() {
        let (table, bridge) = setup();
        let (a, mut ra) = make_conn("a", 8);
        let _ = table.join(&gym("gym-1"), &a);

        let clone = bridge.clone();
        clone.close().await;
        assert!(!bridge.is_open().await);
        let report = bridge
            .publish_activity(gym("gym-1"), ActivityKind::CheckIn, json!("m1"))
            .await;
        assert_eq!(report, DeliveryReport::default());
        assert!(ra.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_publishes_all_arrive() {
        let (table, bridge) = setup();
        let (a, mut ra) = make_conn("a", 64);
        let _ = table.join(&gym("gym-1"), &a);

        let mut handles = Vec::new();
        for i in 0..20 {
            let bridge = bridge.clone();
            handles.push(tokio::spawn(async move {
                bridge
                    .publish_activity(gym("gym-1"), ActivityKind::CheckIn, json!(i))
                    .await
            }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().delivered, 1);
        }
        let mut seen = 0;
        while ra.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 20);
    }

    #[test]
    fn report_serializes_camel_case() {
        let report = DeliveryReport {
            recipients: 3,
            delivered: 2,
            dropped: 1,
        };
        let v = serde_json::to_value(report).unwrap();
        assert_eq!(v, json!({"recipients": 3, "delivered": 2, "dropped": 1}));
    }
}
