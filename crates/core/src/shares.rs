use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::http::HttpApiClient;
use crate::{Error, Result};

pub const SHARE_PASSWORD_LEN: usize = 6;
const EXPIRE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareInfo {
    pub share_code: String,
    #[serde(default)]
    pub expire_time: Option<String>,
    #[serde(default)]
    pub has_password: bool,
    #[serde(default)]
    pub password: Option<String>,
    pub file_id: i64,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub create_time: Option<String>,
    #[serde(default)]
    pub visit_count: u32,
    #[serde(default)]
    pub is_expired: bool,
    /// Access token handed out after a successful password check.
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    pub file_id: i64,
    pub expire_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ShareRequest {
    /// `expire_time` is local time and must not be in the past.
    pub fn new(file_id: i64, expire_time: NaiveDateTime, password: Option<String>) -> Result<Self> {
        if expire_time < chrono::Local::now().naive_local() {
            return Err(Error::InvalidInput {
                message: "share expiry must not be in the past".to_string(),
            });
        }
        let password = password.filter(|p| !p.is_empty());
        if let Some(p) = &password
            && !is_valid_share_password(p)
        {
            return Err(Error::InvalidInput {
                message: "share password must be 6 letters/digits with at least one of each"
                    .to_string(),
            });
        }
        Ok(Self {
            file_id,
            expire_time: expire_time.format(EXPIRE_TIME_FORMAT).to_string(),
            password,
        })
    }
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    password: &'a str,
}

pub fn is_valid_share_password(password: &str) -> bool {
    password.len() == SHARE_PASSWORD_LEN
        && password.chars().all(|c| c.is_ascii_alphanumeric())
        && password.chars().any(|c| c.is_ascii_alphabetic())
        && password.chars().any(|c| c.is_ascii_digit())
}

pub fn generate_share_password() -> Result<String> {
    const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    const DIGITS: &[u8] = b"0123456789";
    const ALNUM: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

    let mut rnd = [0u8; SHARE_PASSWORD_LEN * 2];
    getrandom::getrandom(&mut rnd).map_err(|e| Error::Io(std::io::Error::other(e.to_string())))?;
    let pick = |set: &[u8], r: u8| set[usize::from(r) % set.len()];

    let mut out = Vec::with_capacity(SHARE_PASSWORD_LEN);
    out.push(pick(LETTERS, rnd[0]));
    out.push(pick(DIGITS, rnd[1]));
    for &r in &rnd[2..SHARE_PASSWORD_LEN] {
        out.push(pick(ALNUM, r));
    }
    // Fisher-Yates with the second half of the random bytes.
    for i in (1..out.len()).rev() {
        let j = usize::from(rnd[SHARE_PASSWORD_LEN + i]) % (i + 1);
        out.swap(i, j);
    }
    Ok(out.into_iter().map(char::from).collect())
}

impl HttpApiClient {
    pub async fn create_share(&self, request: &ShareRequest) -> Result<ShareInfo> {
        let req = self.post("/shares").json(request);
        self.send(req).await?.into_data()
    }

    pub async fn list_shares(&self) -> Result<Vec<ShareInfo>> {
        let shares: Option<Vec<ShareInfo>> = self.send(self.get("/shares")).await?.into_result()?;
        Ok(shares.unwrap_or_default())
    }

    pub async fn cancel_share(&self, share_code: &str) -> Result<()> {
        let req = self.delete(&format!("/shares/{share_code}"));
        self.send::<serde_json::Value>(req).await?.into_result()?;
        Ok(())
    }

    /// Checks a share password; the returned info carries the access token.
    pub async fn verify_share(&self, share_code: &str, password: &str) -> Result<ShareInfo> {
        let req = self
            .post(&format!("/shares/{share_code}/verification"))
            .json(&VerifyRequest { password });
        self.send(req).await?.into_data()
    }

    /// Fetches share details with a previously issued access token.
    pub async fn open_share(&self, share_code: &str, token: &str) -> Result<ShareInfo> {
        let req = self
            .post(&format!("/shares/{share_code}"))
            .header(reqwest::header::AUTHORIZATION, format!("{share_code}:{token}"));
        self.send_as(req, false).await?.into_data()
    }

    pub async fn download_shared_file(&self, share_code: &str, token: &str) -> Result<Vec<u8>> {
        if token.is_empty() {
            return Err(Error::Api {
                code: crate::api::CODE_UNAUTHORIZED,
                message: "missing share access token".to_string(),
            });
        }
        let req = self
            .get(&format!("/shares/{share_code}/content"))
            .header(reqwest::header::AUTHORIZATION, token);
        self.send_bytes(req, false).await
    }
}
