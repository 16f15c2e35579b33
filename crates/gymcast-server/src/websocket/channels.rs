//! Channel membership table.
//!
//! Maps each channel to the set of connections currently in it. Entries are
//! created on first join and dropped when the last member leaves. Each
//! channel's set is only touched under its `DashMap` shard lock, and callers
//! get owned snapshots so no lock is held while frames are delivered.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use gymcast_core::{ChannelId, ConnectionId};

use super::connection::ClientConnection;

type Members = HashMap<ConnectionId, Arc<ClientConnection>>;

/// Channel → members index.
#[derive(Default)]
pub struct ChannelTable {
    channels: DashMap<ChannelId, Members>,
}

impl ChannelTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a channel. Returns `true` if it was newly added.
    pub fn join(&self, channel: &ChannelId, conn: &Arc<ClientConnection>) -> bool {
        self.channels
            .entry(channel.clone())
            .or_default()
            .insert(conn.id.clone(), Arc::clone(conn))
            .is_none()
    }

    /// Remove a connection from a channel. Returns `true` if it was a member.
    pub fn leave(&self, channel: &ChannelId, id: &ConnectionId) -> bool {
        let removed = match self.channels.get_mut(channel) {
            Some(mut members) => members.remove(id).is_some(),
            None => return false,
        };
        // Guard above is released; drop the entry if it emptied.
        let _ = self.channels.remove_if(channel, |_, members| members.is_empty());
        removed
    }

    /// Snapshot of a channel's current members.
    pub fn members_of(&self, channel: &ChannelId) -> Vec<Arc<ClientConnection>> {
        self.channels
            .get(channel)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether a connection is a member of a channel.
    pub fn is_member(&self, channel: &ChannelId, id: &ConnectionId) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|members| members.contains_key(id))
    }

    /// Number of members in a channel.
    pub fn member_count(&self, channel: &ChannelId) -> usize {
        self.channels.get(channel).map_or(0, |members| members.len())
    }

    /// Number of channels with at least one member.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}
