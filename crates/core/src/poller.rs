use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiResponse, CODE_OK, UploadApi, UploadTaskStatus};
use crate::progress::{MonotonicProgress, ProgressSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTiming {
    /// Delay between status queries while the upload is running.
    pub interval: Duration,
    /// Delay after a well-formed answer that is not a usable status yet.
    pub not_ready_backoff: Duration,
    /// Delay after a failed or unparseable status query.
    pub transport_backoff: Duration,
}

impl Default for PollTiming {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            not_ready_backoff: Duration::from_secs(1),
            transport_backoff: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Succeeded(UploadTaskStatus),
    Failed(String),
    Cancelled,
}

/// Turns a server task handle into a non-decreasing stream of percentages.
///
/// Transport failures are never terminal; polling only stops on a definitive
/// server answer or on cancellation.
#[derive(Debug, Clone)]
pub struct ProgressPoller<A> {
    api: A,
    timing: PollTiming,
}

impl<A: UploadApi> ProgressPoller<A> {
    pub fn new(api: A, timing: PollTiming) -> Self {
        Self { api, timing }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub async fn poll(
        &self,
        handle: &str,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> PollOutcome {
        let mut progress = MonotonicProgress::new(sink);
        progress.report(0);

        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            let res = tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(handle),
                res = self.api.upload_task_status(handle) => res,
            };

            let wait = match res {
                Ok(ApiResponse {
                    code: CODE_OK,
                    data: Some(status),
                    ..
                }) => {
                    // Terminal answers never report intermediate progress.
                    if status.completed {
                        return finish(handle, status, &mut progress);
                    }
                    if progress.report(status.percent()) {
                        debug!(
                            event = "upload.poll.progress",
                            handle,
                            progress = status.percent(),
                            "upload.poll.progress"
                        );
                    }
                    self.timing.interval
                }
                Ok(env) => {
                    debug!(
                        event = "upload.poll.not_ready",
                        handle,
                        attempt,
                        code = env.code,
                        message = %env.message,
                        "upload.poll.not_ready"
                    );
                    self.timing.not_ready_backoff
                }
                Err(e) => {
                    warn!(
                        event = "upload.poll.retry",
                        handle,
                        attempt,
                        kind = e.kind(),
                        error = %e,
                        "upload.poll.retry"
                    );
                    self.timing.transport_backoff
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return cancelled(handle),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

impl<A: UploadApi + Clone + 'static> ProgressPoller<A> {
    /// Polls `handle` on a background task and exposes the percentages as a
    /// lazy, finite sequence.
    pub fn subscribe(&self, handle: impl Into<String>) -> ProgressSubscription {
        let handle = handle.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let poller = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let sink = move |p: u8| {
                let _ = tx.send(p);
            };
            poller.poll(&handle, &sink, &token).await
        });
        ProgressSubscription {
            rx,
            cancel,
            task: Some(task),
        }
    }
}

fn finish(
    handle: &str,
    status: UploadTaskStatus,
    progress: &mut MonotonicProgress<'_>,
) -> PollOutcome {
    if status.success {
        progress.report(100);
        info!(event = "upload.poll.succeeded", handle, "upload.poll.succeeded");
        return PollOutcome::Succeeded(status);
    }
    let message = status
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| "upload failed".to_string());
    info!(event = "upload.poll.failed", handle, error = %message, "upload.poll.failed");
    PollOutcome::Failed(message)
}

fn cancelled(handle: &str) -> PollOutcome {
    debug!(event = "upload.poll.cancelled", handle, "upload.poll.cancelled");
    PollOutcome::Cancelled
}

/// Progress of one server task. Ends when the poll reaches a terminal answer
/// or is unsubscribed; dropping it unsubscribes.
pub struct ProgressSubscription {
    rx: mpsc::UnboundedReceiver<u8>,
    cancel: CancellationToken,
    task: Option<JoinHandle<PollOutcome>>,
}

impl ProgressSubscription {
    pub async fn next(&mut self) -> Option<u8> {
        self.rx.recv().await
    }

    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    pub fn is_unsubscribed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn outcome(mut self) -> PollOutcome {
        let Some(task) = self.task.take() else {
            return PollOutcome::Cancelled;
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => PollOutcome::Failed(format!("poll task aborted: {e}")),
        }
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
