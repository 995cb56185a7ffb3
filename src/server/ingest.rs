use crate::core::manager::DEFAULT_GROUP_ID;
use crate::domain::model::{truncate_chars, DeliveryResult, SendMode};
use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, FromRequest, Multipart, Path, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;

const ATTACHMENT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
struct JsonNotification {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Default, Deserialize)]
struct Attachment {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RelayResponse {
    pub success: bool,
    pub message: String,
    pub group_id: String,
    pub mode: SendMode,
    pub details: Vec<DeliveryResult>,
}

/// 收到的通知：文字加上選擇性的圖片
#[derive(Debug, Default)]
struct Notification {
    content: String,
    image: Option<Vec<u8>>,
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({"success": false, "message": message.into()}))).into_response()
}

/// `X-Forwarded-For` 的第一個位址，否則用連線來源
pub fn source_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn receive_default(State(state): State<AppState>, request: Request) -> Response {
    relay(state, DEFAULT_GROUP_ID.to_string(), request).await
}

pub async fn receive(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    request: Request,
) -> Response {
    relay(state, group_id, request).await
}

async fn relay(state: AppState, group_id: String, request: Request) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let source = source_ip(request.headers(), peer);

    let notification = match read_notification(&state, request).await {
        Ok(notification) => notification,
        Err(message) => {
            tracing::error!("❌ [{}] Error: {}", group_id, message);
            return failure(StatusCode::INTERNAL_SERVER_ERROR, message);
        }
    };

    if notification.content.is_empty() && notification.image.is_none() {
        return failure(StatusCode::BAD_REQUEST, "無內容");
    }

    let group = state.manager.group_or_create(&group_id);
    tracing::info!(
        "📨 [{}] Received: {}...",
        group_id,
        truncate_chars(&notification.content, 50)
    );

    let outcome = group
        .relay(&notification.content, notification.image, &source)
        .await;

    Json(RelayResponse {
        success: outcome.success,
        message: outcome.message,
        group_id,
        mode: group.send_mode(),
        details: outcome.details,
    })
    .into_response()
}

async fn read_notification(
    state: &AppState,
    request: Request,
) -> std::result::Result<Notification, String> {
    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.starts_with("application/json") || content_type.contains("+json") {
        let body = Bytes::from_request(request, state)
            .await
            .map_err(|e| e.body_text())?;
        let payload: JsonNotification = if body.is_empty() {
            JsonNotification::default()
        } else {
            serde_json::from_slice(&body).map_err(|e| format!("無效的 JSON: {}", e))?
        };

        let image = match payload.attachments.first().and_then(|a| a.url.as_deref()) {
            Some(url) if !url.is_empty() => fetch_attachment(state, url).await,
            _ => None,
        };
        return Ok(Notification {
            content: payload.content.unwrap_or_default(),
            image,
        });
    }

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, state)
            .await
            .map_err(|e| e.body_text())?;
        let mut notification = Notification::default();

        while let Some(field) = multipart.next_field().await.map_err(|e| e.body_text())? {
            match field.name() {
                Some("content") => {
                    notification.content = field.text().await.map_err(|e| e.body_text())?;
                }
                Some("file") => {
                    let bytes = field.bytes().await.map_err(|e| e.body_text())?;
                    if !bytes.is_empty() {
                        notification.image = Some(bytes.to_vec());
                    }
                }
                _ => {}
            }
        }
        return Ok(notification);
    }

    // 其餘一律當作 application/x-www-form-urlencoded
    let body = Bytes::from_request(request, state)
        .await
        .map_err(|e| e.body_text())?;
    let content = url::form_urlencoded::parse(&body)
        .find(|(key, _)| key == "content")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default();

    Ok(Notification {
        content,
        image: None,
    })
}

/// 下載第一個附件；失敗時只記錄，訊息照常轉發
async fn fetch_attachment(state: &AppState, location: &str) -> Option<Vec<u8>> {
    if state.allow_local_attachments && !location.contains("://") {
        return match tokio::fs::read(location).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!("⚠️ Cannot read local attachment {}: {}", location, e);
                None
            }
        };
    }

    if !(location.starts_with("http://") || location.starts_with("https://")) {
        tracing::warn!("⚠️ Ignoring attachment with unsupported location: {}", location);
        return None;
    }

    let mut response = match state
        .http
        .get(location)
        .timeout(ATTACHMENT_TIMEOUT)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!("⚠️ Attachment download failed: {}", e);
            return None;
        }
    };

    if response.status() != reqwest::StatusCode::OK {
        tracing::warn!("⚠️ Attachment download returned HTTP {}", response.status());
        return None;
    }

    let limit = state.max_attachment_bytes;
    if response.content_length().is_some_and(|len| len > limit as u64) {
        tracing::warn!("⚠️ Attachment larger than {} bytes, skipped", limit);
        return None;
    }

    // 沒有 Content-Length 時邊讀邊檢查
    let mut image = Vec::new();
    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                if image.len() + chunk.len() > limit {
                    tracing::warn!("⚠️ Attachment larger than {} bytes, skipped", limit);
                    return None;
                }
                image.extend_from_slice(&chunk);
            }
            Ok(None) => return Some(image),
            Err(e) => {
                tracing::warn!("⚠️ Attachment download failed: {}", e);
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_source_ip_prefers_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        let peer: SocketAddr = "192.168.1.2:5555".parse().unwrap();

        assert_eq!(source_ip(&headers, Some(peer)), "203.0.113.7");
        assert_eq!(source_ip(&HeaderMap::new(), Some(peer)), "192.168.1.2");
        assert_eq!(source_ip(&HeaderMap::new(), None), "unknown");
    }
}
