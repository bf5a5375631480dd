// Copyright (c) Lattica Contributors
// SPDX-License-Identifier: Apache-2.0

//! Expiring dial-history queue.
//!
//! A min-heap of `(expiry, node_id)` plus a membership map. Re-adding a node
//! overwrites its expiry; stale heap entries are skipped on pop.

use lattica_types::NodeId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use tokio::time::Instant;

#[derive(Default)]
pub struct DialHistory {
    heap: BinaryHeap<Reverse<(Instant, NodeId)>>,
    members: HashMap<NodeId, Instant>,
}

impl DialHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `id` until `expiry`. A later expiry replaces an earlier one.
    pub fn add(&mut self, id: NodeId, expiry: Instant) {
        self.heap.push(Reverse((expiry, id)));
        self.members.insert(id, expiry);
    }

    /// Whether `id` is still within its history window.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.members
            .get(id)
            .map(|expiry| *expiry > Instant::now())
            .unwrap_or(false)
    }

    /// Expiry of the soonest live entry, for timer rearming.
    pub fn next_expiry(&mut self) -> Option<Instant> {
        while let Some(Reverse((expiry, id))) = self.heap.peek().copied() {
            match self.members.get(&id) {
                Some(current) if *current == expiry => return Some(expiry),
                _ => {
                    // Superseded by a re-add or already expired out.
                    self.heap.pop();
                }
            }
        }
        None
    }

    /// Remove every entry expiring at or before `now`, invoking `on_expired`
    /// for each removed node.
    pub fn expire(&mut self, now: Instant, mut on_expired: impl FnMut(NodeId)) {
        while let Some(Reverse((expiry, id))) = self.heap.peek().copied() {
            if expiry > now {
                break;
            }
            self.heap.pop();
            if self.members.get(&id) == Some(&expiry) {
                self.members.remove(&id);
                on_expired(id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn id(n: u64) -> NodeId {
        NodeId::from_low_u64(n)
    }

    #[test]
    fn test_contains_until_expiry() {
        let mut history = DialHistory::new();
        history.add(id(1), Instant::now() + Duration::from_secs(60));
        assert!(history.contains(&id(1)));
        assert!(!history.contains(&id(2)));
    }

    #[test]
    fn test_expire_removes_due_entries() {
        let mut history = DialHistory::new();
        let now = Instant::now();
        history.add(id(1), now);
        history.add(id(2), now + Duration::from_secs(60));

        let mut expired = Vec::new();
        history.expire(now, |n| expired.push(n));

        assert_eq!(expired, vec![id(1)]);
        assert!(!history.contains(&id(1)));
        assert!(history.contains(&id(2)));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_readd_extends_expiry() {
        let mut history = DialHistory::new();
        let now = Instant::now();
        history.add(id(1), now);
        history.add(id(1), now + Duration::from_secs(60));

        let mut expired = Vec::new();
        history.expire(now, |n| expired.push(n));
        assert!(expired.is_empty());
        assert!(history.contains(&id(1)));
        // The stale heap entry must not surface as the next expiry.
        assert_eq!(history.next_expiry(), Some(now + Duration::from_secs(60)));
    }
}
