use std::collections::BTreeMap;

use super::session::BatchLabels;

/// Maps task identifiers to the labels of the batch that scans them.
pub trait TaskCatalog: Send + Sync {
    fn labels_for(&self, task_id: &str) -> Option<BatchLabels>;
    fn task_ids(&self) -> Vec<String>;
}

/// In-memory catalog, filled by whoever fetched the task list.
#[derive(Debug, Clone, Default)]
pub struct StaticTaskCatalog {
    tasks: BTreeMap<String, BatchLabels>,
}

impl StaticTaskCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(mut self, task_id: impl Into<String>, labels: BatchLabels) -> Self {
        self.insert(task_id, labels);
        self
    }

    pub fn insert(&mut self, task_id: impl Into<String>, labels: BatchLabels) {
        self.tasks.insert(task_id.into(), labels);
    }
}

impl TaskCatalog for StaticTaskCatalog {
    fn labels_for(&self, task_id: &str) -> Option<BatchLabels> {
        self.tasks.get(task_id).cloned()
    }

    fn task_ids(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }
}
