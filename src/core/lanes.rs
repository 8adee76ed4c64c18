//! Per-resource FIFO lists backing the retry queue and the dead-letter queue.

use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::{op::PendingRequest, types::ResourceId};

/// Which in-memory side queue a request was diverted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Transient failure, eligible for one more collective attempt.
    Retry,
    /// Permanent failure, never retried automatically.
    DeadLetter,
}

/// Requests grouped by resource id, each group kept in arrival order.
///
/// A resource id is a key only while its list is non-empty, so `contains`
/// doubles as the diversion test.
#[derive(Debug, Clone, Default)]
pub struct ResourceLanes {
    lists: HashMap<ResourceId, VecDeque<PendingRequest>>,
}

impl ResourceLanes {
    /// No lists.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `request` to the list for `id`.
    pub fn push(&mut self, id: ResourceId, request: PendingRequest) {
        self.lists.entry(id).or_default().push_back(request);
    }

    /// Pops the oldest entry for `id`, dropping the key once the list empties.
    pub fn pop_front(&mut self, id: &ResourceId) -> Option<PendingRequest> {
        let list = self.lists.get_mut(id)?;
        let head = list.pop_front();
        if list.is_empty() {
            self.lists.remove(id);
        }
        head
    }

    /// Copy of the list for `id`.
    pub fn get(&self, id: &ResourceId) -> Option<Vec<PendingRequest>> {
        self.lists.get(id).map(|list| list.iter().cloned().collect())
    }

    /// Removes the whole list for `id`.
    pub fn remove(&mut self, id: &ResourceId) -> Option<Vec<PendingRequest>> {
        self.lists.remove(id).map(Vec::from)
    }

    /// True when `id` has a non-empty list.
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.lists.contains_key(id)
    }

    /// Drops every list.
    pub fn clear(&mut self) {
        self.lists.clear();
    }

    /// Length of the list for `id`.
    pub fn len_for(&self, id: &ResourceId) -> usize {
        self.lists.get(id).map_or(0, VecDeque::len)
    }

    /// Total number of requests across all resources.
    pub fn total(&self) -> usize {
        self.lists.values().map(VecDeque::len).sum()
    }

    /// Points every entry listed under `id` at `to`. The list stays under its key.
    pub fn rebind_entries(&mut self, id: &ResourceId, to: &ResourceId) {
        if let Some(list) = self.lists.get_mut(id) {
            for request in list.iter_mut() {
                request.rebind(to.clone());
            }
        }
    }

    /// Owned copy of every list, sorted by resource id.
    pub fn snapshot(&self) -> Vec<(ResourceId, Vec<PendingRequest>)> {
        let mut out: Vec<_> = self
            .lists
            .iter()
            .map(|(id, list)| (id.clone(), list.iter().cloned().collect()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}
