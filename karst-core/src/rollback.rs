//! Undo log for multi-step put operations.
//!
//! Every artifact a put creates is registered here right after it exists.
//! [`Rollback::finish`] undoes all of them on the blocking pool when the
//! operation failed, newest first, so a metadata key is always gone before
//! the directory it points at. Dropping an armed [`Rollback`] (a cancelled
//! or panicking operation) undoes them inline.

use crate::error::Result;
use crate::storage::DynMetadataStore;
use std::path::PathBuf;
use std::sync::Arc;

enum RollbackStep {
    RemoveDir(PathBuf),
    DeleteKey {
        store: Arc<DynMetadataStore>,
        key: String,
    },
}

pub struct Rollback {
    label: String,
    steps: Vec<RollbackStep>,
}

impl Rollback {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            steps: Vec::new(),
        }
    }

    pub fn remove_dir_on_failure(&mut self, path: PathBuf) {
        self.steps.push(RollbackStep::RemoveDir(path));
    }

    pub fn delete_key_on_failure(&mut self, store: Arc<DynMetadataStore>, key: impl Into<String>) {
        self.steps.push(RollbackStep::DeleteKey {
            store,
            key: key.into(),
        });
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.steps.len()
    }

    /// Keeps every registered artifact.
    pub fn commit(mut self) {
        self.steps.clear();
    }

    /// Commits on success. On failure the registered steps run on the
    /// blocking pool and the error is handed back once they are done.
    pub async fn finish<T>(mut self, result: Result<T>) -> Result<T> {
        if result.is_ok() {
            self.commit();
            return result;
        }

        let label = self.label.clone();
        let steps = std::mem::take(&mut self.steps);
        if let Err(error) = tokio::task::spawn_blocking(move || unwind(&label, steps)).await {
            tracing::warn!("Rollback of '{}' did not complete: {}", self.label, error);
        }
        result
    }
}

impl Drop for Rollback {
    fn drop(&mut self) {
        let steps = std::mem::take(&mut self.steps);
        unwind(&self.label, steps);
    }
}

fn unwind(label: &str, mut steps: Vec<RollbackStep>) {
    if steps.is_empty() {
        return;
    }

    tracing::info!("Rolling back {} step(s) of '{}'", steps.len(), label);

    while let Some(step) = steps.pop() {
        match step {
            RollbackStep::RemoveDir(path) => match std::fs::remove_dir_all(&path) {
                Ok(()) => tracing::debug!("Removed '{}'", path.display()),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => tracing::warn!(
                    "Rollback of '{}' failed to remove '{}': {}",
                    label,
                    path.display(),
                    error
                ),
            },
            RollbackStep::DeleteKey { store, key } => match store.delete(&key) {
                Ok(()) => tracing::debug!("Deleted metadata key {}", key),
                Err(error) => tracing::warn!(
                    "Rollback of '{}' failed to delete key {}: {}",
                    label,
                    key,
                    error
                ),
            },
        }
    }
}
