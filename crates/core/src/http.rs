use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::{
    ApiFuture, ApiResponse, CODE_UNAUTHORIZED, FileRef, UploadApi, UploadResult, UploadTaskStatus,
};
use crate::auth::AuthContext;
use crate::{Error, Result};

/// reqwest-backed client for the cloud drive REST API.
#[derive(Debug, Clone)]
pub struct HttpApiClient {
    base_url: String,
    auth: AuthContext,
    client: reqwest::Client,
}

impl HttpApiClient {
    pub fn new(base_url: impl Into<String>, auth: AuthContext) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            client: reqwest::Client::new(),
        }
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub(crate) fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path))
    }

    pub(crate) fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.post(self.url(path))
    }

    pub(crate) fn patch(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.patch(self.url(path))
    }

    pub(crate) fn delete(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.delete(self.url(path))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth.token() {
            Some(token) => req.header(reqwest::header::AUTHORIZATION, token),
            None => req,
        }
    }

    /// Sends a request and parses the envelope regardless of HTTP status.
    pub(crate) async fn send<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<ApiResponse<T>> {
        self.send_as(req, true).await
    }

    pub(crate) async fn send_as<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        with_session: bool,
    ) -> Result<ApiResponse<T>> {
        let req = if with_session { self.authorize(req) } else { req };
        let res = req
            .send()
            .await
            .map_err(|e| Error::Transport {
                message: format!("request failed: {e}"),
            })?;

        let status = res.status();
        let body = res.text().await.map_err(|e| Error::Transport {
            message: format!("read response failed: {e}"),
        })?;

        let parsed: ApiResponse<T> =
            serde_json::from_str(&body).map_err(|e| Error::MalformedResponse {
                status: status.as_u16(),
                message: format!("invalid json: {e}"),
            })?;

        if with_session && parsed.code == CODE_UNAUTHORIZED {
            self.auth.invalidate("unauthorized");
        }
        debug!(
            event = "api.response",
            http_status = status.as_u16(),
            code = parsed.code,
            "api.response"
        );
        Ok(parsed)
    }

    /// Like `send`, but for endpoints that stream raw bytes on success and an
    /// envelope on failure. Share downloads carry their own access token, so
    /// the session token is only attached when `with_session` is set.
    pub(crate) async fn send_bytes(
        &self,
        req: reqwest::RequestBuilder,
        with_session: bool,
    ) -> Result<Vec<u8>> {
        let req = if with_session { self.authorize(req) } else { req };
        let res = req.send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(
                match serde_json::from_str::<ApiResponse<serde_json::Value>>(&body) {
                    Ok(env) => {
                        if with_session && env.code == CODE_UNAUTHORIZED {
                            self.auth.invalidate("unauthorized");
                        }
                        Error::Api {
                            code: env.code,
                            message: env.message,
                        }
                    }
                    Err(_) => Error::Api {
                        code: i32::from(status.as_u16()),
                        message: format!("download failed (http {status})"),
                    },
                },
            );
        }
        Ok(res.bytes().await?.to_vec())
    }
}

fn upload_form(file: &FileRef, parent_id: Option<i64>) -> Form {
    let part = Part::bytes(file.bytes().to_vec()).file_name(file.name().to_string());
    let form = Form::new().part("file", part);
    match parent_id {
        Some(id) => form.text("parentId", id.to_string()),
        None => form,
    }
}

impl UploadApi for HttpApiClient {
    fn upload_file<'a>(
        &'a self,
        file: &'a FileRef,
        parent_id: Option<i64>,
    ) -> ApiFuture<'a, UploadResult> {
        Box::pin(async move {
            let req = self.post("/files").multipart(upload_form(file, parent_id));
            self.send(req).await
        })
    }

    fn create_upload_task<'a>(
        &'a self,
        file: &'a FileRef,
        parent_id: Option<i64>,
    ) -> ApiFuture<'a, ApiResponse<String>> {
        Box::pin(async move {
            let req = self
                .post("/files/progress")
                .multipart(upload_form(file, parent_id));
            self.send(req).await
        })
    }

    fn upload_task_status<'a>(
        &'a self,
        handle: &'a str,
    ) -> ApiFuture<'a, ApiResponse<UploadTaskStatus>> {
        Box::pin(async move {
            let req = self.get(&format!("/upload-progress/{handle}"));
            self.send(req).await
        })
    }
}
