use crate::core::group::RelayGroup;
use crate::core::manager::{FeishuCredentialsView, HealthView, ManagerStatsView};
use crate::domain::model::{SendMode, WebhookKind};
use crate::domain::schedule::{validate_entries, RawScheduleEntry, ScheduleMode};
use crate::server::AppState;
use crate::utils::error::{RelayError, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DASHBOARD_HTML: &str = include_str!("dashboard.html");

/// 管理 API 的統一回應；業務錯誤也回 200
#[derive(Debug, Serialize)]
pub struct ApiReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ApiReply {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: Some(message.into()),
        })
    }

    fn fail(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: false,
            message: Some(message.into()),
        })
    }

    fn flag(success: bool) -> Json<Self> {
        Json(Self {
            success,
            message: None,
        })
    }

    fn from_result(result: Result<String>) -> Json<Self> {
        match result {
            Ok(message) => Self::ok(message),
            Err(e) => Self::fail(e.api_message()),
        }
    }
}

/// 空 body 視為預設值；格式錯誤回 400
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> std::result::Result<T, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            ApiReply::fail(format!("無效的 JSON: {}", e)),
        )
            .into_response()
    })
}

fn find_group(state: &AppState, group_id: &str) -> Result<Arc<RelayGroup>> {
    state
        .manager
        .group(group_id)
        .ok_or_else(|| RelayError::NotFound {
            what: "group".to_string(),
            id: group_id.to_string(),
        })
}

fn default_true() -> bool {
    true
}

// ---- 頁面與查詢 ----

pub async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

pub async fn health(State(state): State<AppState>) -> Json<HealthView> {
    Json(state.manager.health())
}

pub async fn stats(State(state): State<AppState>) -> Json<ManagerStatsView> {
    Json(state.manager.stats_view())
}

pub async fn feishu_credentials(State(state): State<AppState>) -> Json<FeishuCredentialsView> {
    Json(state.manager.feishu_credentials_view())
}

// ---- 飛書憑證 ----

#[derive(Debug, Default, Deserialize)]
pub struct CredentialsRequest {
    #[serde(default)]
    app_id: String,
    #[serde(default)]
    app_secret: String,
}

pub async fn update_feishu_credentials(State(state): State<AppState>, body: Bytes) -> Response {
    let request: CredentialsRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };
    ApiReply::from_result(
        state
            .manager
            .update_feishu_credentials(&request.app_id, &request.app_secret),
    )
    .into_response()
}

// ---- 群組 ----

#[derive(Debug, Default, Deserialize)]
pub struct CreateGroupRequest {
    #[serde(default)]
    group_id: String,
    #[serde(default)]
    display_name: Option<String>,
}

pub async fn create_group(State(state): State<AppState>, body: Bytes) -> Response {
    let request: CreateGroupRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let group_id = request.group_id.trim();
    if group_id.is_empty() {
        return ApiReply::fail("請提供群組 ID").into_response();
    }

    let (_, created) = state.manager.create_group(group_id, request.display_name);
    if created {
        ApiReply::ok("建立成功").into_response()
    } else {
        ApiReply::fail("此群組 ID 已存在").into_response()
    }
}

pub async fn delete_group(State(state): State<AppState>, Path(group_id): Path<String>) -> Json<ApiReply> {
    ApiReply::flag(state.manager.delete_group(&group_id))
}

#[derive(Debug, Default, Deserialize)]
pub struct ModeRequest {
    #[serde(default)]
    mode: String,
}

pub async fn set_mode(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    body: Bytes,
) -> Response {
    let request: ModeRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let result = find_group(&state, &group_id).and_then(|group| {
        let mode = SendMode::parse(&request.mode).ok_or_else(|| RelayError::ValidationError {
            message: "無效的模式".to_string(),
        })?;
        Ok(group.set_send_mode(mode))
    });
    ApiReply::from_result(result).into_response()
}

// ---- Webhook ----

#[derive(Debug, Deserialize)]
pub struct AddWebhookRequest {
    #[serde(default)]
    url: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default = "default_webhook_type")]
    webhook_type: String,
    #[serde(default)]
    is_fixed: bool,
}

fn default_webhook_type() -> String {
    WebhookKind::Discord.as_str().to_string()
}

impl Default for AddWebhookRequest {
    fn default() -> Self {
        Self {
            url: String::new(),
            name: None,
            webhook_type: default_webhook_type(),
            is_fixed: false,
        }
    }
}

pub async fn add_webhook(
    State(state): State<AppState>,
    Path(group_id): Path<String>,
    body: Bytes,
) -> Response {
    let request: AddWebhookRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let result = find_group(&state, &group_id).and_then(|group| {
        let kind: WebhookKind = request.webhook_type.parse()?;
        group.add_webhook(&request.url, request.name, kind, request.is_fixed)
    });
    ApiReply::from_result(result).into_response()
}

pub async fn remove_webhook(
    State(state): State<AppState>,
    Path((group_id, webhook_id)): Path<(String, String)>,
) -> Json<ApiReply> {
    match find_group(&state, &group_id) {
        Ok(group) => ApiReply::flag(group.remove_webhook(&webhook_id)),
        Err(e) => ApiReply::fail(e.api_message()),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RenameRequest {
    #[serde(default)]
    name: Option<String>,
}

pub async fn rename_webhook(
    State(state): State<AppState>,
    Path((group_id, webhook_id)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let request: RenameRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let result = find_group(&state, &group_id).and_then(|group| {
        group.rename_webhook(&webhook_id, request.name.as_deref().unwrap_or_default())
    });
    ApiReply::from_result(result).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    #[serde(default = "default_true")]
    enabled: bool,
}

impl Default for ToggleRequest {
    fn default() -> Self {
        Self { enabled: true }
    }
}

pub async fn toggle_webhook(
    State(state): State<AppState>,
    Path((group_id, webhook_id)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let request: ToggleRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let result = find_group(&state, &group_id)
        .and_then(|group| group.toggle_webhook(&webhook_id, request.enabled));
    ApiReply::from_result(result).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct FixedRequest {
    #[serde(default)]
    is_fixed: bool,
}

pub async fn set_fixed(
    State(state): State<AppState>,
    Path((group_id, webhook_id)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let request: FixedRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let result = find_group(&state, &group_id)
        .and_then(|group| group.set_fixed(&webhook_id, request.is_fixed));
    ApiReply::from_result(result).into_response()
}

#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    #[serde(default = "default_schedule_mode")]
    schedule_mode: String,
    #[serde(default)]
    schedules: Option<Vec<RawScheduleEntry>>,
}

fn default_schedule_mode() -> String {
    "off".to_string()
}

impl Default for ScheduleRequest {
    fn default() -> Self {
        Self {
            schedule_mode: default_schedule_mode(),
            schedules: None,
        }
    }
}

pub async fn set_schedule(
    State(state): State<AppState>,
    Path((group_id, webhook_id)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let request: ScheduleRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let result = find_group(&state, &group_id).and_then(|group| {
        if group.webhook(&webhook_id).is_none() {
            return Err(RelayError::NotFound {
                what: "webhook".to_string(),
                id: webhook_id.clone(),
            });
        }
        let mode = ScheduleMode::parse(&request.schedule_mode).ok_or_else(|| {
            RelayError::ValidationError {
                message: "無效的排程模式".to_string(),
            }
        })?;
        group.set_schedule(&webhook_id, mode, request.schedules.map(validate_entries))
    });

    // 排程變更立即寫入
    if result.is_ok() {
        if let Err(e) = state.manager.force_save().await {
            tracing::error!("❌ Save after schedule update failed: {}", e);
        }
    }
    ApiReply::from_result(result).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct TestRequest {
    #[serde(default)]
    content: Option<String>,
}

pub async fn test_webhook(
    State(state): State<AppState>,
    Path((group_id, webhook_id)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let request: TestRequest = match parse_body(&body) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let group = match find_group(&state, &group_id) {
        Ok(group) => group,
        Err(e) => return ApiReply::fail(e.api_message()).into_response(),
    };

    let reply = match group.test_webhook(&webhook_id, request.content).await {
        Ok(true) => ApiReply::ok("發送成功"),
        Ok(false) => ApiReply::fail("發送失敗"),
        Err(e) => ApiReply::fail(e.api_message()),
    };
    reply.into_response()
}

// ---- 保存 ----

pub async fn force_save(State(state): State<AppState>) -> Json<ApiReply> {
    match state.manager.force_save().await {
        Ok(()) => ApiReply::ok("已保存"),
        Err(e) => {
            tracing::error!("❌ Manual save failed: {}", e);
            ApiReply::fail(e.user_friendly_message())
        }
    }
}
