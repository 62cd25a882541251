//! API shared state

use std::sync::Arc;

use crate::actors::ScannerHandle;
use crate::query::QueryEngine;
use crate::storage::SnapshotStore;

/// Shared state passed to all API handlers
#[derive(Clone)]
pub struct ApiState {
    pub query: Arc<QueryEngine>,

    /// For storage health only; reads go through `query`
    pub store: Arc<SnapshotStore>,

    /// Reports whether a scan is in flight (absent in tests)
    pub scanner: Option<ScannerHandle>,
}

impl ApiState {
    pub fn new(query: Arc<QueryEngine>, store: Arc<SnapshotStore>) -> Self {
        Self {
            query,
            store,
            scanner: None,
        }
    }

    pub fn with_scanner(mut self, scanner: ScannerHandle) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn is_scanning(&self) -> bool {
        self.scanner.as_ref().is_some_and(ScannerHandle::is_scanning)
    }
}
