//! Change subscriptions on storage nodes.

use crate::crdt::{NodeId, StorageUpdate};

/// Identifies a subscription for [`Room::unsubscribe`](crate::Room::unsubscribe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Also report changes anywhere below the target node.
    pub is_deep: bool,
}

impl SubscribeOptions {
    pub fn deep() -> Self {
        Self { is_deep: true }
    }
}

type Callback = Box<dyn FnMut(&[StorageUpdate])>;

struct Subscription {
    id: SubscriptionId,
    target: NodeId,
    deep: bool,
    callback: Callback,
}

#[derive(Default)]
pub(crate) struct Subscriptions {
    next_id: u64,
    entries: Vec<Subscription>,
}

impl Subscriptions {
    pub fn add(&mut self, target: NodeId, options: SubscribeOptions, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.push(Subscription {
            id,
            target,
            deep: options.is_deep,
            callback,
        });
        id
    }

    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|s| s.id != id);
        self.entries.len() != before
    }

    /// Calls each subscriber once with the updates relevant to it.
    pub fn notify(&mut self, updates: &[StorageUpdate]) {
        for subscription in &mut self.entries {
            let relevant: Vec<StorageUpdate> = updates
                .iter()
                .filter(|update| {
                    if subscription.deep {
                        update.affects(&subscription.target)
                    } else {
                        update.node == subscription.target
                    }
                })
                .cloned()
                .collect();
            if !relevant.is_empty() {
                (subscription.callback)(&relevant);
            }
        }
    }
}

impl std::fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriptions")
            .field("count", &self.entries.len())
            .finish()
    }
}
