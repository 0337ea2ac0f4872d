//! Tracks which broker subscription filters are requested and acknowledged.

use crate::protocol::{c2d_filter, METHOD_POST_FILTER, TWIN_DESIRED_FILTER, TWIN_RES_FILTER};

/// The subscription families a session can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicKind {
    CloudToDevice,
    TwinResponse,
    DesiredProperties,
    Methods,
}

pub const ALL_TOPIC_KINDS: [TopicKind; 4] = [
    TopicKind::CloudToDevice,
    TopicKind::TwinResponse,
    TopicKind::DesiredProperties,
    TopicKind::Methods,
];

#[derive(Debug, Clone, Copy, Default)]
struct Entry {
    requested: bool,
    acknowledged: bool,
}

/// Desired-versus-established subscription state.
///
/// `requested` survives disconnects so filters are re-issued on the next
/// session; `acknowledged` is cleared whenever the connection drops.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    c2d: Entry,
    twin_response: Entry,
    desired: Entry,
    methods: Entry,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, kind: TopicKind) -> &Entry {
        match kind {
            TopicKind::CloudToDevice => &self.c2d,
            TopicKind::TwinResponse => &self.twin_response,
            TopicKind::DesiredProperties => &self.desired,
            TopicKind::Methods => &self.methods,
        }
    }

    fn entry_mut(&mut self, kind: TopicKind) -> &mut Entry {
        match kind {
            TopicKind::CloudToDevice => &mut self.c2d,
            TopicKind::TwinResponse => &mut self.twin_response,
            TopicKind::DesiredProperties => &mut self.desired,
            TopicKind::Methods => &mut self.methods,
        }
    }

    /// Marks a filter wanted. Idempotent.
    pub fn request(&mut self, kind: TopicKind) {
        self.entry_mut(kind).requested = true;
    }

    /// Records broker confirmation of a filter.
    pub fn acknowledge(&mut self, kind: TopicKind) {
        self.entry_mut(kind).acknowledged = true;
    }

    /// Withdraws interest entirely; returns true if the filter had been
    /// acknowledged and therefore needs a wire unsubscribe.
    pub fn clear(&mut self, kind: TopicKind) -> bool {
        let entry = self.entry_mut(kind);
        let was_acknowledged = entry.acknowledged;
        *entry = Entry::default();
        was_acknowledged
    }

    pub fn is_requested(&self, kind: TopicKind) -> bool {
        self.entry(kind).requested
    }

    pub fn is_acknowledged(&self, kind: TopicKind) -> bool {
        self.entry(kind).acknowledged
    }

    /// Filters wanted but not yet confirmed on the current connection.
    pub fn pending(&self) -> Vec<TopicKind> {
        ALL_TOPIC_KINDS
            .into_iter()
            .filter(|kind| {
                let entry = self.entry(*kind);
                entry.requested && !entry.acknowledged
            })
            .collect()
    }

    /// Filters confirmed on the current connection.
    pub fn acknowledged(&self) -> Vec<TopicKind> {
        ALL_TOPIC_KINDS
            .into_iter()
            .filter(|kind| self.entry(*kind).acknowledged)
            .collect()
    }

    /// Drops all confirmations while keeping requests, so a reconnect
    /// re-issues every wanted filter.
    pub fn reset_acknowledgements(&mut self) {
        for kind in ALL_TOPIC_KINDS {
            self.entry_mut(kind).acknowledged = false;
        }
    }
}

/// The broker filter string for a subscription family.
pub fn filter_for(kind: TopicKind, device_id: &str) -> String {
    match kind {
        TopicKind::CloudToDevice => c2d_filter(device_id),
        TopicKind::TwinResponse => TWIN_RES_FILTER.to_string(),
        TopicKind::DesiredProperties => TWIN_DESIRED_FILTER.to_string(),
        TopicKind::Methods => METHOD_POST_FILTER.to_string(),
    }
}
