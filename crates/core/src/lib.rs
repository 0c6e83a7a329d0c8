mod api;
mod auth;
pub mod config;
mod error;
mod files;
mod format;
mod http;
pub mod logging;
mod poller;
mod progress;
mod registry;
mod shares;
mod submission;
mod upload_manager;

pub const APP_NAME: &str = "CloudDrive";

pub use api::{
    ApiFuture, ApiResponse, CODE_FAILURE, CODE_OK, CODE_UNAUTHORIZED, FileRef, UploadApi,
    UploadResult, UploadTaskStatus,
};
pub use auth::AuthContext;
pub use error::{Error, Result};
pub use files::{FileInfo, FileList};
pub use format::format_file_size;
pub use http::HttpApiClient;
pub use poller::{PollOutcome, PollTiming, ProgressPoller, ProgressSubscription};
pub use progress::ProgressSink;
pub use registry::{DEFAULT_COMPLETED_TTL, UploadRegistry, UploadStatus, UploadSummary, UploadTask};
pub use shares::{ShareInfo, ShareRequest, generate_share_password, is_valid_share_password};
pub use submission::{SubmitOptions, Uploader};
pub use upload_manager::{FileListRefresh, UploadManager};
