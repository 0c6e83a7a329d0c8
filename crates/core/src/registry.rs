use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::FileRef;

pub const DEFAULT_COMPLETED_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Uploading,
    Completed,
    Error,
}

impl UploadStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Uploading)
    }
}

#[derive(Debug, Clone)]
pub struct UploadTask {
    pub id: String,
    pub file: FileRef,
    pub progress: u8,
    pub status: UploadStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// In-memory list of upload tasks, in creation order.
///
/// Every operation is total: an unknown id, or a task already in a terminal
/// state, turns the call into a no-op. Progress callbacks race against user
/// dismissal, so they must never fail.
#[derive(Clone)]
pub struct UploadRegistry {
    shared: Arc<Shared>,
}

struct Shared {
    tasks: Mutex<Vec<UploadTask>>,
    completed_ttl: Duration,
    tx: watch::Sender<Vec<UploadTask>>,
}

impl Default for UploadRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_COMPLETED_TTL)
    }
}

impl UploadRegistry {
    pub fn new(completed_ttl: Duration) -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self {
            shared: Arc::new(Shared {
                tasks: Mutex::new(Vec::new()),
                completed_ttl,
                tx,
            }),
        }
    }

    pub fn completed_ttl(&self) -> Duration {
        self.shared.completed_ttl
    }

    /// Receiver that observes the full task list after every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<UploadTask>> {
        self.shared.tx.subscribe()
    }

    pub fn snapshot(&self) -> Vec<UploadTask> {
        self.shared.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<UploadTask> {
        self.shared.lock().iter().find(|t| t.id == id).cloned()
    }

    pub fn summary(&self) -> UploadSummary {
        let tasks = self.shared.lock();
        let mut s = UploadSummary::default();
        for t in tasks.iter() {
            match t.status {
                UploadStatus::Uploading => s.active += 1,
                UploadStatus::Completed => s.completed += 1,
                UploadStatus::Error => s.failed += 1,
            }
        }
        s
    }

    pub fn create(&self, file: FileRef) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        debug!(
            event = "registry.create",
            task_id = %id,
            file_name = %file.name(),
            file_size = file.size(),
            "registry.create"
        );
        self.shared.mutate(|tasks| {
            tasks.push(UploadTask {
                id: id.clone(),
                file,
                progress: 0,
                status: UploadStatus::Uploading,
                error: None,
            });
            true
        });
        id
    }

    /// Applies `value` if the task is still uploading and `value` moves it forward.
    pub fn set_progress(&self, id: &str, value: u8) -> bool {
        let value = value.min(100);
        self.shared.mutate(|tasks| match find_uploading(tasks, id) {
            Some(t) if value > t.progress => {
                t.progress = value;
                true
            }
            _ => false,
        })
    }

    pub fn mark_completed(&self, id: &str) -> bool {
        let changed = self.shared.mutate(|tasks| match find_uploading(tasks, id) {
            Some(t) => {
                t.progress = 100;
                t.status = UploadStatus::Completed;
                true
            }
            None => false,
        });
        if changed {
            debug!(event = "registry.completed", task_id = %id, "registry.completed");
            self.schedule_removal(id);
        }
        changed
    }

    pub fn mark_failed(&self, id: &str, detail: impl Into<String>) -> bool {
        let detail = detail.into();
        let changed = self.shared.mutate(|tasks| match find_uploading(tasks, id) {
            Some(t) => {
                t.status = UploadStatus::Error;
                t.error = Some(detail.clone());
                true
            }
            None => false,
        });
        if changed {
            debug!(event = "registry.failed", task_id = %id, error = %detail, "registry.failed");
        }
        changed
    }

    pub fn remove(&self, id: &str) -> bool {
        self.shared.mutate(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.id != id);
            tasks.len() != before
        })
    }

    pub fn clear_completed(&self) -> usize {
        let mut removed = 0;
        self.shared.mutate(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.status != UploadStatus::Completed);
            removed = before - tasks.len();
            removed > 0
        });
        removed
    }

    fn schedule_removal(&self, id: &str) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                event = "registry.auto_remove.skipped",
                task_id = %id,
                "registry.auto_remove.skipped"
            );
            return;
        };
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let ttl = self.shared.completed_ttl;
        let id = id.to_string();
        handle.spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(shared) = weak.upgrade() {
                shared.mutate(|tasks| {
                    let before = tasks.len();
                    tasks.retain(|t| !(t.id == id && t.status == UploadStatus::Completed));
                    tasks.len() != before
                });
            }
        });
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Vec<UploadTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` under the lock and publishes a new snapshot if it reports a change.
    fn mutate(&self, f: impl FnOnce(&mut Vec<UploadTask>) -> bool) -> bool {
        let mut tasks = self.lock();
        let changed = f(&mut tasks);
        if changed {
            self.tx.send_replace(tasks.clone());
        }
        changed
    }
}

fn find_uploading<'a>(tasks: &'a mut [UploadTask], id: &str) -> Option<&'a mut UploadTask> {
    tasks
        .iter_mut()
        .find(|t| t.id == id && t.status == UploadStatus::Uploading)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str) -> FileRef {
        FileRef::from_bytes(name, vec![0u8; 16])
    }

    #[tokio::test]
    async fn accepted_progress_is_strictly_increasing() {
        let r = UploadRegistry::default();
        let id = r.create(file("a.bin"));

        let mut accepted = Vec::new();
        for v in [10, 5, 10, 30, 29, 31, 250] {
            if r.set_progress(&id, v) {
                accepted.push(r.get(&id).unwrap().progress);
            }
        }
        assert_eq!(accepted, vec![10, 30, 31, 100]);
    }

    #[tokio::test]
    async fn completion_forces_full_progress() {
        let r = UploadRegistry::default();
        let id = r.create(file("a.bin"));
        r.set_progress(&id, 63);
        assert!(r.mark_completed(&id));

        let t = r.get(&id).unwrap();
        assert_eq!(t.progress, 100);
        assert_eq!(t.status, UploadStatus::Completed);
    }

    #[tokio::test]
    async fn unknown_ids_are_noops() {
        let r = UploadRegistry::default();
        assert!(!r.set_progress("missing", 10));
        assert!(!r.mark_completed("missing"));
        assert!(!r.mark_failed("missing", "x"));
        assert!(!r.remove("missing"));
        assert!(r.snapshot().is_empty());
    }

    #[tokio::test]
    async fn terminal_state_is_entered_once() {
        let r = UploadRegistry::default();
        let id = r.create(file("a.bin"));
        assert!(r.mark_failed(&id, "boom"));
        assert!(!r.mark_completed(&id));
        assert!(!r.set_progress(&id, 50));

        let t = r.get(&id).unwrap();
        assert_eq!(t.status, UploadStatus::Error);
        assert_eq!(t.error.as_deref(), Some("boom"));
        assert_eq!(t.progress, 0);
    }

    #[tokio::test]
    async fn clear_completed_keeps_active_and_failed() {
        let r = UploadRegistry::default();
        let a = r.create(file("a"));
        let b = r.create(file("b"));
        let c = r.create(file("c"));
        r.mark_completed(&a);
        r.mark_failed(&b, "x");

        assert_eq!(
            r.summary(),
            UploadSummary {
                active: 1,
                completed: 1,
                failed: 1
            }
        );
        assert_eq!(r.clear_completed(), 1);
        let ids: Vec<_> = r.snapshot().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![b, c]);
    }

    #[tokio::test]
    async fn subscribers_see_each_change() {
        let r = UploadRegistry::default();
        let mut rx = r.subscribe();
        let id = r.create(file("a"));

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().len(), 1);

        r.remove(&id);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_empty());
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let r = UploadRegistry::default();
        let a = r.create(file("same"));
        let b = r.create(file("same"));
        assert_ne!(a, b);
    }
}
