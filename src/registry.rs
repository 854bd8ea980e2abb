//! Live set of scheduled probes.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::scheduler::{ProbeCell, ProbeHandle};

/// Registry entry: the live instance, plus the cancellation handle while
/// the probe is scheduled. Disabling detaches the handle but keeps the
/// instance so its counters stay readable.
#[derive(Debug, Clone)]
pub struct ProbeEntry {
    pub handle: Option<ProbeHandle>,
    pub cell: Arc<ProbeCell>,
}

impl ProbeEntry {
    fn is_live(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_done())
    }
}

/// The mutable set of probes, shared between the scheduler wiring, the
/// control plane, and the shutdown path.
///
/// A name maps to at most one entry; inserts and removals are atomic with
/// respect to lookups. Entries outlive their schedule: a disabled probe's
/// instance stays registered until a re-enable replaces it.
#[derive(Debug, Default)]
pub struct ProbeRegistry {
    entries: RwLock<HashMap<String, ProbeEntry>>,
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry under the probe's name, replacing any dead remnant.
    pub async fn register(&self, handle: ProbeHandle, cell: Arc<ProbeCell>) {
        let name = cell.name().to_owned();
        self.entries.write().await.insert(
            name,
            ProbeEntry {
                handle: Some(handle),
                cell,
            },
        );
    }

    /// Cancel and detach the named probe's schedule. The instance stays
    /// registered so its counters remain readable. Returns the instance,
    /// or `None` if the name had no attached schedule.
    pub async fn unregister(&self, name: &str) -> Option<Arc<ProbeCell>> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(name)?;
        entry.handle.take()?.cancel();
        Some(Arc::clone(&entry.cell))
    }

    /// True iff an entry exists whose schedule has not finished.
    pub async fn is_active(&self, name: &str) -> bool {
        self.entries
            .read()
            .await
            .get(name)
            .is_some_and(ProbeEntry::is_live)
    }

    /// Names of all live entries, sorted lexicographically.
    pub async fn list_active(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut names: Vec<String> = entries
            .iter()
            .filter(|(_, e)| e.is_live())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// The named instance, live or not.
    pub async fn cell(&self, name: &str) -> Option<Arc<ProbeCell>> {
        self.entries
            .read()
            .await
            .get(name)
            .map(|e| Arc::clone(&e.cell))
    }

    /// All registered instances; used by the one-shot shutdown flush.
    pub async fn cells(&self) -> Vec<Arc<ProbeCell>> {
        self.entries
            .read()
            .await
            .values()
            .map(|e| Arc::clone(&e.cell))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
