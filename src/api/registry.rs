use std::sync::Arc;

use hashbrown::HashMap;

use crate::types::OperationId;

use super::traits::ApiOperation;

/// Maps operation ids to the callables that perform them.
///
/// Built once at startup and shared read-only behind an `Arc`.
#[derive(Clone, Default)]
pub struct Registry {
    ops: HashMap<OperationId, Arc<dyn ApiOperation>>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `operation` under its id, returning any operation it replaced.
    pub fn register(&mut self, operation: Arc<dyn ApiOperation>) -> Option<Arc<dyn ApiOperation>> {
        self.ops.insert(operation.id().clone(), operation)
    }

    /// Builder-style [`Registry::register`] for a batch.
    pub fn with_operations(mut self, operations: impl IntoIterator<Item = Arc<dyn ApiOperation>>) -> Self {
        for op in operations {
            self.register(op);
        }
        self
    }

    /// Operation registered under `id`.
    pub fn lookup(&self, id: &str) -> Option<Arc<dyn ApiOperation>> {
        self.ops.get(id).cloned()
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&str> = self.ops.keys().map(OperationId::as_str).collect();
        ids.sort_unstable();
        f.debug_struct("Registry").field("ops", &ids).finish()
    }
}
