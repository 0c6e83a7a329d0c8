use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::api::{FileRef, UploadApi};
use crate::progress::ProgressSink;
use crate::registry::{UploadRegistry, UploadSummary, UploadTask};
use crate::submission::{SubmitOptions, Uploader};

/// Reloads the authoritative file list after a successful upload.
pub trait FileListRefresh: Send + Sync {
    fn refresh<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Drives uploads from file selection to a terminal, inspectable task.
///
/// Every upload ends in either `completed` or `error`; nothing raised by the
/// transport reaches the caller.
pub struct UploadManager<A> {
    uploader: Uploader<A>,
    registry: UploadRegistry,
    refresher: Arc<dyn FileListRefresh>,
    track_progress: bool,
    cancels: Mutex<HashMap<String, CancellationToken>>,
}

impl<A: UploadApi + 'static> UploadManager<A> {
    pub fn new(
        uploader: Uploader<A>,
        registry: UploadRegistry,
        refresher: Arc<dyn FileListRefresh>,
    ) -> Self {
        Self {
            uploader,
            registry,
            refresher,
            track_progress: true,
            cancels: Mutex::new(HashMap::new()),
        }
    }

    /// Use the one-shot endpoint instead of server-tracked progress.
    pub fn with_progress_tracking(mut self, enabled: bool) -> Self {
        self.track_progress = enabled;
        self
    }

    pub fn registry(&self) -> &UploadRegistry {
        &self.registry
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<UploadTask>> {
        self.registry.subscribe()
    }

    pub fn summary(&self) -> UploadSummary {
        self.registry.summary()
    }

    /// Registers the task and runs the upload in the background.
    pub fn start_upload(self: &Arc<Self>, file: FileRef, parent_id: Option<i64>) -> String {
        self.launch(file, parent_id).0
    }

    /// Runs the upload to its terminal state and returns the task as it
    /// stood on entering that state. `None` if it was dismissed first.
    pub async fn upload(
        self: &Arc<Self>,
        file: FileRef,
        parent_id: Option<i64>,
    ) -> Option<UploadTask> {
        let (id, handle) = self.launch(file, parent_id);
        match handle.await {
            Ok(task) => task,
            Err(e) => {
                error!(
                    event = "upload.supervisor.failed",
                    task_id = %id,
                    error = %e,
                    "upload.supervisor.failed"
                );
                self.registry.mark_failed(&id, format!("upload aborted: {e}"));
                self.registry.get(&id)
            }
        }
    }

    /// Removes the task and stops any polling still running for it.
    pub fn dismiss(&self, id: &str) -> bool {
        let removed = self.registry.remove(id);
        if let Some(cancel) = self.cancels().remove(id) {
            cancel.cancel();
            info!(event = "upload.dismissed", task_id = %id, "upload.dismissed");
        }
        removed
    }

    pub fn clear_completed(&self) -> usize {
        self.registry.clear_completed()
    }

    fn cancels(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.cancels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn launch(
        self: &Arc<Self>,
        file: FileRef,
        parent_id: Option<i64>,
    ) -> (String, JoinHandle<Option<UploadTask>>) {
        let id = self.registry.create(file.clone());
        let cancel = CancellationToken::new();
        self.cancels().insert(id.clone(), cancel.clone());
        info!(
            event = "upload.start",
            task_id = %id,
            file_name = %file.name(),
            tracked = self.track_progress,
            "upload.start"
        );

        let this = Arc::clone(self);
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            let worker = {
                let this = Arc::clone(&this);
                let task_id = task_id.clone();
                tokio::spawn(async move { this.run(&task_id, &file, parent_id, &cancel).await })
            };
            let task = match worker.await {
                Ok(task) => task,
                Err(e) => {
                    error!(
                        event = "upload.aborted",
                        task_id = %task_id,
                        error = %e,
                        "upload.aborted"
                    );
                    this.registry.mark_failed(&task_id, format!("upload aborted: {e}"));
                    this.registry.get(&task_id)
                }
            };
            this.cancels().remove(&task_id);
            task
        });
        (id, handle)
    }

    async fn run(
        &self,
        id: &str,
        file: &FileRef,
        parent_id: Option<i64>,
        cancel: &CancellationToken,
    ) -> Option<UploadTask> {
        let registry = self.registry.clone();
        let task_id = id.to_string();
        let sink = move |p: u8| {
            registry.set_progress(&task_id, p);
        };

        let options = SubmitOptions {
            parent_id,
            progress: self.track_progress.then_some(&sink as &dyn ProgressSink),
            cancel: Some(cancel),
        };
        let result = self.uploader.submit(file, options).await;

        // Snapshot before refreshing: the TTL can remove the task meanwhile.
        if result.is_success() {
            self.registry.mark_completed(id);
            let task = self.registry.get(id);
            self.refresher.refresh().await;
            task
        } else {
            let message = if result.message.trim().is_empty() {
                "upload failed".to_string()
            } else {
                result.message
            };
            self.registry.mark_failed(id, message);
            self.registry.get(id)
        }
    }
}
