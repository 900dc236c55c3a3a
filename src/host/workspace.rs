//! The semantic workspace generated host code is registered with.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::HostCode;
use crate::settings::Project;

/// One live generated document.
#[derive(Debug, Clone)]
pub struct WorkspaceEntry {
    pub project: Project,
    pub name: String,
    pub code: Arc<HostCode>,
    /// Bumped on every refresh; starts at 1.
    pub version: u64,
}

/// Consumer of generated host code.
///
/// Implementations hold at most one entry per identifier.
pub trait Workspace: Send + Sync {
    /// Add `code` under `code.name`, or refresh the existing entry.
    /// Returns the entry's version after the call.
    fn register(&self, project: &Project, code: Arc<HostCode>) -> u64;

    fn unregister(&self, name: &str) -> Option<WorkspaceEntry>;

    fn entry(&self, name: &str) -> Option<WorkspaceEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Thread-safe in-process workspace.
#[derive(Debug, Default)]
pub struct InMemoryWorkspace {
    entries: DashMap<String, WorkspaceEntry>,
}

impl InMemoryWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifiers of all live entries, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Workspace for InMemoryWorkspace {
    fn register(&self, project: &Project, code: Arc<HostCode>) -> u64 {
        match self.entries.entry(code.name.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.project = project.clone();
                entry.code = code;
                entry.version += 1;
                tracing::debug!(
                    name = %entry.name,
                    version = entry.version,
                    "refreshed workspace entry"
                );
                entry.version
            }
            Entry::Vacant(vacant) => {
                let name = vacant.key().clone();
                tracing::debug!(%name, project = %project.name, "registered workspace entry");
                vacant.insert(WorkspaceEntry {
                    project: project.clone(),
                    name,
                    code,
                    version: 1,
                });
                1
            }
        }
    }

    fn unregister(&self, name: &str) -> Option<WorkspaceEntry> {
        let removed = self.entries.remove(name).map(|(_, entry)| entry);
        if removed.is_some() {
            tracing::debug!(%name, "unregistered workspace entry");
        }
        removed
    }

    fn entry(&self, name: &str) -> Option<WorkspaceEntry> {
        self.entries.get(name).map(|entry| entry.clone())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
