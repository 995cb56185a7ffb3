use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use clap::Parser;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use webhook_relay::utils::monitor::SystemMonitor;
use webhook_relay::{router, AppState, CliConfig, HttpNotifier, JsonFileStore, RelayManager};

// ops:hunter2
const GOOD_AUTH: &str = "Basic b3BzOmh1bnRlcjI=";
// x:wrong
const BAD_AUTH: &str = "Basic eDp3cm9uZw==";

struct TestApp {
    router: Router,
    manager: Arc<RelayManager>,
    config_file: String,
    _dir: TempDir,
}

async fn test_app(password: Option<&str>) -> Result<TestApp> {
    let dir = TempDir::new()?;
    let config_file = dir
        .path()
        .join("webhook_config.json")
        .to_string_lossy()
        .to_string();

    let config = CliConfig::parse_from([
        "webhook-relay",
        "--config-file",
        config_file.as_str(),
        "--webhook-groups",
        "{}",
    ]);
    let http = reqwest::Client::new();
    let notifier = Arc::new(HttpNotifier::new(http.clone(), "http://127.0.0.1:9"));
    let store = Arc::new(JsonFileStore::new(&config.config_file));
    let manager = RelayManager::load(&config, store, notifier, SystemMonitor::new(false)).await?;

    let state = AppState::new(manager.clone(), http).with_admin_password(password);
    Ok(TestApp {
        router: router(state),
        manager,
        config_file,
        _dir: dir,
    })
}

async fn call(app: &TestApp, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    Ok((status, body))
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// 健康檢查公開，管理 API 需要密碼
#[tokio::test]
async fn test_health_is_public_and_admin_requires_password() -> Result<()> {
    let app = test_app(Some("hunter2")).await?;

    let (status, body) = call(
        &app,
        Request::builder().uri("/health").body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], "4.5");
    assert_eq!(body["groups"], 0);

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/api/stats").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers()["www-authenticate"],
        "Basic realm=\"Webhook Relay Admin\""
    );

    let (status, _) = call(
        &app,
        Request::builder()
            .uri("/api/stats")
            .header("authorization", BAD_AUTH)
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(
        &app,
        Request::builder()
            .uri("/api/stats")
            .header("authorization", GOOD_AUTH)
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_groups"], 0);
    assert_eq!(body["timezone"], "UTC+8");

    // 接收端點不需要密碼
    let (status, _) = call(&app, json_request("POST", "/webhook/a", json!({"content": "hi"}))).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_dashboard_is_served() -> Result<()> {
    let app = test_app(None).await?;
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty())?)
        .await?;

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await?.to_bytes();
    assert!(String::from_utf8_lossy(&bytes).contains("Webhook 中繼站"));
    Ok(())
}

/// 沒有內容也沒有圖片時回 400
#[tokio::test]
async fn test_empty_notification_is_rejected() -> Result<()> {
    let app = test_app(None).await?;

    let (status, body) = call(&app, json_request("POST", "/webhook/a", json!({}))).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "無內容");

    let (status, body) = call(
        &app,
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("other=1"))?,
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "無內容");
    Ok(())
}

#[tokio::test]
async fn test_invalid_json_is_internal_error() -> Result<()> {
    let app = test_app(None).await?;

    let (status, body) = call(
        &app,
        Request::builder()
            .method("POST")
            .uri("/webhook/a")
            .header("content-type", "application/json")
            .body(Body::from("{oops"))?,
    )
    .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    Ok(())
}

/// 未知群組會自動建立；沒有 Webhook 時回報失敗但仍是 200
#[tokio::test]
async fn test_unknown_group_is_created_on_first_notification() -> Result<()> {
    let app = test_app(None).await?;

    let (status, body) = call(
        &app,
        json_request("POST", "/webhook/NewBoss", json!({"content": "hello"})),
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "無啟用的 Webhook");
    assert_eq!(body["group_id"], "NewBoss");
    assert_eq!(body["mode"], "sync");
    assert!(app.manager.group("newboss").is_some());
    Ok(())
}

/// 管理 API：群組與 Webhook 的完整操作流程
#[tokio::test]
async fn test_admin_group_and_webhook_lifecycle() -> Result<()> {
    let app = test_app(None).await?;

    let (_, body) = call(&app, json_request("POST", "/api/group", json!({"group_id": "  "}))).await?;
    assert_eq!(body["message"], "請提供群組 ID");

    let (_, body) = call(
        &app,
        json_request("POST", "/api/group", json!({"group_id": "Boss-1", "display_name": "喵z"})),
    )
    .await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "建立成功");

    let (_, body) = call(&app, json_request("POST", "/api/group", json!({"group_id": "boss1"}))).await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "此群組 ID 已存在");

    let (_, body) = call(
        &app,
        json_request("POST", "/api/group/missing/mode", json!({"mode": "sync"})),
    )
    .await?;
    assert_eq!(body["message"], "群組不存在");

    let (_, body) = call(
        &app,
        json_request("POST", "/api/group/boss1/mode", json!({"mode": "random"})),
    )
    .await?;
    assert_eq!(body["message"], "無效的模式");

    let (_, body) = call(
        &app,
        json_request("POST", "/api/group/boss1/mode", json!({"mode": "round_robin"})),
    )
    .await?;
    assert_eq!(body["message"], "已切換為輪詢模式");

    let (_, body) = call(
        &app,
        json_request(
            "POST",
            "/api/group/boss1/webhook",
            json!({"url": "http://insecure.example/hook"}),
        ),
    )
    .await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "無效的 URL（必須以 https:// 開頭）");

    let (_, body) = call(
        &app,
        json_request(
            "POST",
            "/api/group/boss1/webhook",
            json!({"url": "https://open.feishu.cn/open-apis/bot/v2/hook/x", "name": "飛書群", "webhook_type": "feishu", "is_fixed": true}),
        ),
    )
    .await?;
    assert_eq!(body["message"], "添加成功: 飛書群 (固定)");

    let group = app.manager.group("boss1").expect("group exists");
    let webhook_id = group.webhooks()[0].id.clone();
    let base = format!("/api/group/boss1/webhook/{}", webhook_id);

    let (_, body) = call(&app, json_request("POST", &format!("{}/toggle", base), json!({"enabled": false}))).await?;
    assert_eq!(body["message"], "飛書群 已禁用");

    let (_, body) = call(&app, json_request("POST", &format!("{}/fixed", base), json!({}))).await?;
    assert_eq!(body["message"], "飛書群 已取消固定發送");

    let (_, body) = call(&app, json_request("PATCH", &base, json!({"name": "新名字"}))).await?;
    assert_eq!(body["message"], "已重命名為: 新名字");

    let (_, body) = call(
        &app,
        json_request("POST", &format!("{}/schedule", base), json!({"schedule_mode": "weekly"})),
    )
    .await?;
    assert_eq!(body["message"], "無效的排程模式");

    let (_, body) = call(
        &app,
        json_request(
            "POST",
            &format!("{}/schedule", base),
            json!({
                "schedule_mode": "date_range",
                "schedules": [
                    {"date": "2025-02-23", "start_time": "12:00", "end_time": "22:00"},
                    {"date": "2025-02-24", "start_time": "25:00", "end_time": "12:00"},
                    {"date": "", "start_time": "00:00", "end_time": "12:00"}
                ]
            }),
        ),
    )
    .await?;
    assert_eq!(body["message"], "新名字 排程已更新 (1 筆)");

    // 排程變更會立即寫入配置文件
    let saved = std::fs::read_to_string(&app.config_file)?;
    assert!(saved.contains("date_range"));
    assert!(saved.contains("2025-02-23"));

    let (_, body) = call(
        &app,
        json_request("POST", "/api/group/boss1/webhook/nope/toggle", json!({})),
    )
    .await?;
    assert_eq!(body["message"], "找不到此 Webhook");

    let (_, body) = call(
        &app,
        Request::builder()
            .method("DELETE")
            .uri(&base)
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(body, json!({"success": true}));

    let (_, body) = call(
        &app,
        Request::builder()
            .method("DELETE")
            .uri("/api/group/boss1")
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(body, json!({"success": true}));
    assert!(app.manager.group("boss1").is_none());
    Ok(())
}

#[tokio::test]
async fn test_feishu_credentials_endpoints() -> Result<()> {
    let app = test_app(None).await?;

    let (_, body) = call(
        &app,
        json_request("POST", "/api/feishu/credentials", json!({"app_id": "", "app_secret": "x"})),
    )
    .await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "APP ID 和 APP Secret 不能為空");

    let (_, body) = call(
        &app,
        json_request(
            "POST",
            "/api/feishu/credentials",
            json!({"app_id": "cli_a1b2c3d4e5f6", "app_secret": "0123456789abcdef"}),
        ),
    )
    .await?;
    assert_eq!(body["success"], true);

    let (_, body) = call(
        &app,
        Request::builder()
            .uri("/api/feishu/credentials")
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(body["app_id_masked"], "cli_a1b2c3...");
    assert_eq!(body["app_secret_masked"], "01234567...");
    assert_eq!(body["is_configured"], true);
    Ok(())
}

#[tokio::test]
async fn test_manual_save_writes_config_file() -> Result<()> {
    let app = test_app(None).await?;
    app.manager.create_group("zz", None);

    let (_, body) = call(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/save")
            .body(Body::empty())?,
    )
    .await?;
    assert_eq!(body["message"], "已保存");

    let saved: Value = serde_json::from_str(&std::fs::read_to_string(&app.config_file)?)?;
    assert_eq!(saved["version"], "4.5");
    assert_eq!(saved["groups"]["zz"]["display_name"], "ZZ BOSS");
    Ok(())
}
