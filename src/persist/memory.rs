//! In-process store with the same semantics as the SQLite one. Nothing survives a restart.

use std::collections::{BTreeMap, VecDeque};

use serde_json::Value;

use crate::{
    op::PendingRequest,
    types::{ResourceId, TimeRange},
};

use super::{DurableStore, PersistError, PersistResult, Table, document_id, document_span};

/// In-process [`DurableStore`]. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    queue: VecDeque<PendingRequest>,
    tables: BTreeMap<Table, BTreeMap<ResourceId, Value>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableStore for MemoryStore {
    fn enqueue(&mut self, requests: &[PendingRequest]) -> PersistResult<Vec<PendingRequest>> {
        self.queue.extend(requests.iter().cloned());
        Ok(self.queue.iter().cloned().collect())
    }

    fn dequeue(&mut self) -> PersistResult<Option<PendingRequest>> {
        Ok(self.queue.pop_front())
    }

    fn clear_queue(&mut self) -> PersistResult<()> {
        self.queue.clear();
        Ok(())
    }

    fn queued(&self) -> PersistResult<Vec<PendingRequest>> {
        Ok(self.queue.iter().cloned().collect())
    }

    fn add(&mut self, table: Table, values: &[Value]) -> PersistResult<Vec<Value>> {
        let rows = self.tables.entry(table).or_default();
        let mut keyed = Vec::with_capacity(values.len());
        for value in values {
            let id = document_id(value)?;
            if rows.contains_key(&id) || keyed.iter().any(|(k, _)| k == &id) {
                return Err(PersistError::Duplicate {
                    table: table.as_str(),
                    id: id.to_string(),
                });
            }
            keyed.push((id, value.clone()));
        }
        rows.extend(keyed);
        Ok(values.to_vec())
    }

    fn put(&mut self, table: Table, values: &[Value]) -> PersistResult<Vec<Value>> {
        let keyed = values
            .iter()
            .map(|v| Ok((document_id(v)?, v.clone())))
            .collect::<PersistResult<Vec<_>>>()?;
        self.tables.entry(table).or_default().extend(keyed);
        Ok(values.to_vec())
    }

    fn delete(&mut self, table: Table, ids: &[ResourceId]) -> PersistResult<Vec<ResourceId>> {
        let Some(rows) = self.tables.get_mut(&table) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter(|id| rows.remove(*id).is_some())
            .cloned()
            .collect())
    }

    fn find_by_id(&self, table: Table, id: &ResourceId) -> PersistResult<Option<Value>> {
        Ok(self.tables.get(&table).and_then(|rows| rows.get(id)).cloned())
    }

    fn find(&self, table: Table, range: &TimeRange) -> PersistResult<Vec<Value>> {
        let Some(rows) = self.tables.get(&table) else {
            return Ok(Vec::new());
        };
        let mut hits: Vec<_> = rows
            .values()
            .filter_map(|v| document_span(v).map(|span| (span, v)))
            .filter(|((start, end), _)| range.overlaps(*start, *end))
            .map(|((start, _), v)| (start, v))
            .collect();
        hits.sort_by_key(|(start, _)| *start);
        Ok(hits.into_iter().map(|(_, v)| v.clone()).collect())
    }
}
