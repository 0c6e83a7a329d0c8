use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

pub const CODE_OK: i32 = 200;
pub const CODE_UNAUTHORIZED: i32 = 401;
pub const CODE_FAILURE: i32 = 500;

pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Uniform `{code, message, data}` envelope used by every endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub message: String,
    pub data: Option<T>,
}

fn null_as_empty<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            code: CODE_OK,
            message: message.into(),
            data,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: CODE_FAILURE,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == CODE_OK
    }

    /// Converts a non-200 envelope into `Error::Api`; `data` may still be absent.
    pub fn into_result(self) -> Result<Option<T>> {
        if !self.is_success() {
            return Err(Error::Api {
                code: self.code,
                message: self.message,
            });
        }
        Ok(self.data)
    }

    pub fn into_data(self) -> Result<T> {
        self.into_result()?.ok_or_else(|| Error::MalformedResponse {
            status: 200,
            message: "missing data".to_string(),
        })
    }
}

/// Result of an upload attempt. Every failure class is folded into code 500.
pub type UploadResult = ApiResponse<serde_json::Value>;

/// Read-only handle on a file selected for upload.
#[derive(Clone)]
pub struct FileRef {
    name: String,
    data: Arc<[u8]>,
}

impl FileRef {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data: Arc::from(bytes),
        }
    }

    pub async fn open(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidInput {
                message: format!("not a file path: {}", path.display()),
            })?;
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::from_bytes(name, bytes))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

impl std::fmt::Debug for FileRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileRef")
            .field("name", &self.name)
            .field("size", &self.size())
            .finish()
    }
}

/// Server-side view of a progress-tracked upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTaskStatus {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub total_size: Option<u64>,
    #[serde(default)]
    pub bytes_transferred: Option<u64>,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

impl UploadTaskStatus {
    /// Server progress floored and clamped into `0..=100`.
    pub fn percent(&self) -> u8 {
        if self.progress.is_nan() {
            return 0;
        }
        self.progress.floor().clamp(0.0, 100.0) as u8
    }
}

/// The three remote endpoints the upload lifecycle talks to.
pub trait UploadApi: Send + Sync {
    /// One-shot upload; the envelope is returned as the server sent it.
    fn upload_file<'a>(
        &'a self,
        file: &'a FileRef,
        parent_id: Option<i64>,
    ) -> ApiFuture<'a, UploadResult>;

    /// Starts a server-tracked upload; `data` carries the task handle.
    fn create_upload_task<'a>(
        &'a self,
        file: &'a FileRef,
        parent_id: Option<i64>,
    ) -> ApiFuture<'a, ApiResponse<String>>;

    fn upload_task_status<'a>(
        &'a self,
        handle: &'a str,
    ) -> ApiFuture<'a, ApiResponse<UploadTaskStatus>>;
}

impl<A: UploadApi + ?Sized> UploadApi for Arc<A> {
    fn upload_file<'a>(
        &'a self,
        file: &'a FileRef,
        parent_id: Option<i64>,
    ) -> ApiFuture<'a, UploadResult> {
        (**self).upload_file(file, parent_id)
    }

    fn create_upload_task<'a>(
        &'a self,
        file: &'a FileRef,
        parent_id: Option<i64>,
    ) -> ApiFuture<'a, ApiResponse<String>> {
        (**self).create_upload_task(file, parent_id)
    }

    fn upload_task_status<'a>(
        &'a self,
        handle: &'a str,
    ) -> ApiFuture<'a, ApiResponse<UploadTaskStatus>> {
        (**self).upload_task_status(handle)
    }
}
