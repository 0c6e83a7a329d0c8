#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use cloud_drive_core::{
    ApiFuture, ApiResponse, Error, FileListRefresh, FileRef, UploadApi, UploadResult,
    UploadTaskStatus,
};

#[derive(Debug, Clone)]
pub enum Step {
    Progress(f64),
    Done {
        success: bool,
        message: Option<&'static str>,
    },
    NotReady,
    Transport,
    Malformed,
    Panic,
}

/// `UploadApi` that replays a per-file script of task-status answers.
///
/// The task handle for a file is `task-<file name>`. Once a script runs out,
/// every further status query answers "not ready".
#[derive(Default)]
pub struct ScriptedApi {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    one_shot: Mutex<VecDeque<cloud_drive_core::Result<UploadResult>>>,
    status_calls: AtomicUsize,
    one_shot_calls: AtomicUsize,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_task(self, file_name: &str, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(handle_for(file_name), steps.into());
        self
    }

    pub fn with_one_shot(self, res: cloud_drive_core::Result<UploadResult>) -> Self {
        self.one_shot.lock().unwrap().push_back(res);
        self
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn one_shot_calls(&self) -> usize {
        self.one_shot_calls.load(Ordering::SeqCst)
    }
}

pub fn handle_for(file_name: &str) -> String {
    format!("task-{file_name}")
}

fn status(progress: f64, completed: bool, success: bool, message: Option<&str>) -> UploadTaskStatus {
    UploadTaskStatus {
        progress,
        completed,
        success,
        message: message.map(str::to_string),
        ..Default::default()
    }
}

impl UploadApi for ScriptedApi {
    fn upload_file<'a>(
        &'a self,
        _file: &'a FileRef,
        _parent_id: Option<i64>,
    ) -> ApiFuture<'a, UploadResult> {
        Box::pin(async move {
            self.one_shot_calls.fetch_add(1, Ordering::SeqCst);
            self.one_shot
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(UploadResult::ok("ok", Some(serde_json::json!("stored")))))
        })
    }

    fn create_upload_task<'a>(
        &'a self,
        file: &'a FileRef,
        _parent_id: Option<i64>,
    ) -> ApiFuture<'a, ApiResponse<String>> {
        Box::pin(async move {
            let handle = handle_for(file.name());
            if self.scripts.lock().unwrap().contains_key(&handle) {
                Ok(ApiResponse::ok("ok", Some(handle)))
            } else {
                Ok(ApiResponse {
                    code: 400,
                    message: "unsupported file".to_string(),
                    data: None,
                })
            }
        })
    }

    fn upload_task_status<'a>(
        &'a self,
        handle: &'a str,
    ) -> ApiFuture<'a, ApiResponse<UploadTaskStatus>> {
        Box::pin(async move {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(handle)
                .and_then(|s| s.pop_front())
                .unwrap_or(Step::NotReady);
            match step {
                Step::Progress(p) => Ok(ApiResponse::ok("ok", Some(status(p, false, false, None)))),
                Step::Done { success, message } => Ok(ApiResponse::ok(
                    "ok",
                    Some(status(100.0, true, success, message)),
                )),
                Step::NotReady => Ok(ApiResponse {
                    code: 404,
                    message: "task not found".to_string(),
                    data: None,
                }),
                Step::Transport => Err(Error::Transport {
                    message: "connection reset".to_string(),
                }),
                Step::Malformed => Err(Error::MalformedResponse {
                    status: 502,
                    message: "invalid json".to_string(),
                }),
                Step::Panic => panic!("injected status panic"),
            }
        })
    }
}

#[derive(Default)]
pub struct CountingRefresh {
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingRefresh {
    /// Refresh that takes `delay` to finish, like a slow file listing.
    pub fn slow(delay: Duration) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FileListRefresh for CountingRefresh {
    fn refresh<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
        })
    }
}

pub fn file(name: &str, size: usize) -> FileRef {
    FileRef::from_bytes(name, vec![0u8; size])
}
