use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::http::HttpApiClient;
use crate::upload_manager::FileListRefresh;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub id: i64,
    pub filename: String,
    #[serde(default)]
    pub original_filename: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub is_folder: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenameRequest<'a> {
    new_filename: &'a str,
}

impl HttpApiClient {
    pub async fn list_files(&self, parent_id: Option<i64>) -> Result<Vec<FileInfo>> {
        let mut req = self.get("/files");
        if let Some(id) = parent_id {
            req = req.query(&[("parentId", id)]);
        }
        let files: Option<Vec<FileInfo>> = self.send(req).await?.into_result()?;
        Ok(files.unwrap_or_default())
    }

    pub async fn search_files(&self, keyword: &str) -> Result<Vec<FileInfo>> {
        let req = self.get("/files/search").query(&[("keyword", keyword)]);
        let files: Option<Vec<FileInfo>> = self.send(req).await?.into_result()?;
        Ok(files.unwrap_or_default())
    }

    pub async fn rename_file(&self, file_id: i64, new_filename: &str) -> Result<()> {
        let new_filename = new_filename.trim();
        if new_filename.is_empty() {
            return Err(Error::InvalidInput {
                message: "new filename must not be empty".to_string(),
            });
        }
        let req = self
            .patch(&format!("/files/{file_id}/name"))
            .json(&RenameRequest { new_filename });
        self.send::<serde_json::Value>(req).await?.into_result()?;
        Ok(())
    }

    pub async fn delete_file(&self, file_id: i64) -> Result<()> {
        let req = self.delete(&format!("/files/{file_id}"));
        self.send::<serde_json::Value>(req).await?.into_result()?;
        Ok(())
    }

    pub async fn download_file(&self, file_id: i64) -> Result<Vec<u8>> {
        if !self.auth().is_authenticated() {
            return Err(Error::Api {
                code: crate::api::CODE_UNAUTHORIZED,
                message: "not signed in".to_string(),
            });
        }
        self.send_bytes(self.get(&format!("/files/{file_id}/content")), true)
            .await
    }
}

/// Client-side copy of one folder's listing, reloaded after each upload.
pub struct FileList {
    client: HttpApiClient,
    parent_id: Option<i64>,
    tx: watch::Sender<Vec<FileInfo>>,
}

impl FileList {
    pub fn new(client: HttpApiClient, parent_id: Option<i64>) -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self {
            client,
            parent_id,
            tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<FileInfo>> {
        self.tx.subscribe()
    }

    pub async fn reload(&self) -> Result<Vec<FileInfo>> {
        let files = self.client.list_files(self.parent_id).await?;
        debug!(
            event = "files.reloaded",
            parent_id = ?self.parent_id,
            count = files.len(),
            "files.reloaded"
        );
        self.tx.send_replace(files.clone());
        Ok(files)
    }
}

impl FileListRefresh for FileList {
    fn refresh<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if let Err(e) = self.reload().await {
                warn!(event = "files.reload.failed", error = %e, "files.reload.failed");
            }
        })
    }
}
