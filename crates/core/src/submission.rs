use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Error;
use crate::api::{FileRef, UploadApi, UploadResult};
use crate::poller::{PollOutcome, PollTiming, ProgressPoller};
use crate::progress::ProgressSink;

#[derive(Default, Clone, Copy)]
pub struct SubmitOptions<'a> {
    pub parent_id: Option<i64>,
    /// When set, the upload goes through the task-creating endpoint and is
    /// polled until the server reports completion.
    pub progress: Option<&'a dyn ProgressSink>,
    pub cancel: Option<&'a CancellationToken>,
}

enum Failure {
    Request(Error),
    Rejected { code: i32, message: String },
    Poll(String),
    Cancelled,
}

impl Failure {
    fn kind(&self) -> &'static str {
        match self {
            Self::Request(e) => e.kind(),
            Self::Rejected { .. } => "api",
            Self::Poll(_) => "poll_failed",
            Self::Cancelled => "cancelled",
        }
    }

    fn into_message(self) -> String {
        match self {
            Self::Request(e) => e.to_string(),
            Self::Rejected { message, .. } | Self::Poll(message) => message,
            Self::Cancelled => "upload cancelled".to_string(),
        }
    }
}

/// Sends file bytes to the server. Never fails: every failure class is
/// folded into an `UploadResult` with code 500.
#[derive(Debug, Clone)]
pub struct Uploader<A> {
    poller: ProgressPoller<A>,
}

impl<A: UploadApi> Uploader<A> {
    pub fn new(api: A, timing: PollTiming) -> Self {
        Self {
            poller: ProgressPoller::new(api, timing),
        }
    }

    pub fn api(&self) -> &A {
        self.poller.api()
    }

    pub fn poller(&self) -> &ProgressPoller<A> {
        &self.poller
    }

    pub async fn submit(&self, file: &FileRef, options: SubmitOptions<'_>) -> UploadResult {
        let started = Instant::now();
        info!(
            event = "upload.submit",
            file_name = %file.name(),
            file_size = file.size(),
            parent_id = ?options.parent_id,
            tracked = options.progress.is_some(),
            "upload.submit"
        );

        let never = CancellationToken::new();
        let cancel = options.cancel.unwrap_or(&never);

        let res = match options.progress {
            None => self.submit_once(file, options.parent_id, cancel).await,
            Some(sink) => {
                self.submit_tracked(file, options.parent_id, sink, cancel)
                    .await
            }
        };

        match res {
            Ok(result) => {
                info!(
                    event = "upload.finish",
                    file_name = %file.name(),
                    status = "succeeded",
                    duration_ms = started.elapsed().as_millis() as u64,
                    "upload.finish"
                );
                result
            }
            Err(failure) => {
                let kind = failure.kind();
                let message = failure.into_message();
                warn!(
                    event = "upload.finish",
                    file_name = %file.name(),
                    status = "failed",
                    kind,
                    error = %message,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "upload.finish"
                );
                UploadResult::failure(message)
            }
        }
    }

    async fn submit_once(
        &self,
        file: &FileRef,
        parent_id: Option<i64>,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, Failure> {
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Failure::Cancelled),
            res = self.api().upload_file(file, parent_id) => res,
        };
        let env = res.map_err(Failure::Request)?;
        if !env.is_success() {
            return Err(Failure::Rejected {
                code: env.code,
                message: non_empty_or(env.message, "upload failed"),
            });
        }
        Ok(env)
    }

    async fn submit_tracked(
        &self,
        file: &FileRef,
        parent_id: Option<i64>,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<UploadResult, Failure> {
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Failure::Cancelled),
            res = self.api().create_upload_task(file, parent_id) => res,
        };
        let env = res.map_err(Failure::Request)?;
        let accepted = env.is_success();
        let handle = match env.data {
            Some(handle) if accepted && !handle.trim().is_empty() => handle,
            _ => {
                return Err(Failure::Rejected {
                    code: env.code,
                    message: non_empty_or(env.message, "failed to create upload task"),
                });
            }
        };

        match self.poller.poll(&handle, sink, cancel).await {
            PollOutcome::Succeeded(status) => Ok(UploadResult::ok(
                "upload succeeded",
                serde_json::to_value(status).ok(),
            )),
            PollOutcome::Failed(message) => Err(Failure::Poll(message)),
            PollOutcome::Cancelled => Err(Failure::Cancelled),
        }
    }
}

fn non_empty_or(message: String, fallback: &str) -> String {
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}
