use crate::domain::model::FeishuCredentials;
use crate::utils::error::{RelayError, Result};
use md5::{Digest, Md5};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_EXPIRE_SECS: u64 = 7200;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    tenant_access_token: Option<String>,
    #[serde(default)]
    expire: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<UploadData>,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    #[serde(default)]
    image_key: Option<String>,
}

/// 飛書圖片上傳：tenant_access_token 快取到過期前 60 秒，圖片依 MD5 快取
pub struct FeishuImageUploader {
    client: Client,
    api_base: String,
    credentials: Mutex<FeishuCredentials>,
    token: Mutex<Option<CachedToken>>,
    images: Mutex<HashMap<String, String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn upstream(message: String) -> RelayError {
    RelayError::UpstreamError {
        service: "Feishu".to_string(),
        message,
    }
}

impl FeishuImageUploader {
    pub fn new(client: Client, api_base: &str) -> Self {
        Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            credentials: Mutex::new(FeishuCredentials::default()),
            token: Mutex::new(None),
            images: Mutex::new(HashMap::new()),
        }
    }

    /// 更換憑證並清掉舊 token
    pub fn set_credentials(&self, credentials: FeishuCredentials) {
        *lock(&self.credentials) = credentials;
        *lock(&self.token) = None;
    }

    pub fn has_credentials(&self) -> bool {
        lock(&self.credentials).is_configured()
    }

    pub async fn tenant_access_token(&self) -> Result<String> {
        let credentials = lock(&self.credentials).clone();
        if !credentials.is_configured() {
            tracing::warn!("⚠️ Feishu credentials are not configured");
            return Err(RelayError::MissingConfigError {
                field: "feishu_credentials".to_string(),
            });
        }

        if let Some(cached) = lock(&self.token).as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        tracing::info!("🔑 Requesting new Feishu tenant_access_token");
        let response = self
            .client
            .post(format!("{}/auth/v3/tenant_access_token/internal", self.api_base))
            .json(&serde_json::json!({
                "app_id": credentials.app_id,
                "app_secret": credentials.app_secret,
            }))
            .timeout(TOKEN_TIMEOUT)
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(upstream(format!("token request returned HTTP {}", response.status())));
        }

        let body: TokenResponse = response.json().await?;
        if body.code != 0 {
            return Err(upstream(format!(
                "code={}, msg={}",
                body.code,
                body.msg.unwrap_or_default()
            )));
        }
        let token = body
            .tenant_access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| upstream("token response has no tenant_access_token".to_string()))?;

        let expire = body.expire.unwrap_or(DEFAULT_TOKEN_EXPIRE_SECS);
        *lock(&self.token) = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + Duration::from_secs(expire),
        });
        tracing::info!("✅ Feishu tenant_access_token acquired (expires in {}s)", expire);
        Ok(token)
    }

    /// 上傳圖片並回傳 image_key
    pub async fn upload(&self, image: &[u8]) -> Result<String> {
        if image.is_empty() {
            return Err(RelayError::ValidationError {
                message: "圖片內容為空".to_string(),
            });
        }

        let digest = hex::encode(Md5::digest(image));
        if let Some(key) = lock(&self.images).get(&digest) {
            tracing::info!("♻️ Using cached Feishu image key");
            return Ok(key.clone());
        }

        let token = self.tenant_access_token().await?;
        let part = Part::bytes(image.to_vec())
            .file_name("screenshot.png")
            .mime_str("image/png")?;
        let form = Form::new().text("image_type", "message").part("image", part);

        let response = self
            .client
            .post(format!("{}/im/v1/images", self.api_base))
            .bearer_auth(token)
            .multipart(form)
            .timeout(UPLOAD_TIMEOUT)
            .send()
            .await?;

        if response.status() != reqwest::StatusCode::OK {
            return Err(upstream(format!("image upload returned HTTP {}", response.status())));
        }

        let body: UploadResponse = response.json().await?;
        if body.code != 0 {
            return Err(upstream(format!(
                "image upload failed: {}",
                body.msg.unwrap_or_default()
            )));
        }
        let key = body
            .data
            .and_then(|d| d.image_key)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| upstream("image upload response has no image_key".to_string()))?;

        tracing::info!("🖼️ Feishu image uploaded: {}", key);
        lock(&self.images).insert(digest, key.clone());
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn uploader(server: &MockServer) -> FeishuImageUploader {
        let uploader = FeishuImageUploader::new(Client::new(), &server.base_url());
        uploader.set_credentials(FeishuCredentials::new("cli_test", "secret"));
        uploader
    }

    #[tokio::test]
    async fn test_token_and_images_are_cached() {
        let server = MockServer::start_async().await;
        let token_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/auth/v3/tenant_access_token/internal")
                    .json_body(json!({"app_id": "cli_test", "app_secret": "secret"}));
                then.status(200).json_body(json!({
                    "code": 0,
                    "tenant_access_token": "t-123",
                    "expire": 7200
                }));
            })
            .await;
        let upload_mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/im/v1/images")
                    .header("authorization", "Bearer t-123")
                    .body_contains("image_type");
                then.status(200)
                    .json_body(json!({"code": 0, "data": {"image_key": "img_v2_abc"}}));
            })
            .await;

        let uploader = uploader(&server);

        assert_eq!(uploader.upload(b"PNG-ONE").await.unwrap(), "img_v2_abc");
        assert_eq!(uploader.upload(b"PNG-ONE").await.unwrap(), "img_v2_abc");
        assert_eq!(uploader.upload(b"PNG-TWO").await.unwrap(), "img_v2_abc");

        token_mock.assert_hits_async(1).await;
        upload_mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_short_lived_token_is_refreshed() {
        let server = MockServer::start_async().await;
        let token_mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/auth/v3/tenant_access_token/internal");
                then.status(200).json_body(json!({
                    "code": 0,
                    "tenant_access_token": "t-short",
                    "expire": 30
                }));
            })
            .await;

        let uploader = uploader(&server);
        uploader.tenant_access_token().await.unwrap();
        uploader.tenant_access_token().await.unwrap();

        token_mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_credential_change_drops_cached_token() {
        let server = MockServer::start_async().await;
        let token_mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/auth/v3/tenant_access_token/internal");
                then.status(200)
                    .json_body(json!({"code": 0, "tenant_access_token": "t-1"}));
            })
            .await;

        let uploader = uploader(&server);
        uploader.tenant_access_token().await.unwrap();
        uploader.set_credentials(FeishuCredentials::new("cli_other", "secret2"));
        uploader.tenant_access_token().await.unwrap();

        token_mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn test_api_error_code_is_reported() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/auth/v3/tenant_access_token/internal");
                then.status(200)
                    .json_body(json!({"code": 10003, "msg": "invalid app_secret"}));
            })
            .await;

        let err = uploader(&server).upload(b"PNG").await.unwrap_err();
        assert!(err.to_string().contains("invalid app_secret"));
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let uploader = FeishuImageUploader::new(Client::new(), "http://127.0.0.1:9");
        assert!(!uploader.has_credentials());
        let err = uploader.tenant_access_token().await.unwrap_err();
        assert!(matches!(err, RelayError::MissingConfigError { .. }));
    }
}
