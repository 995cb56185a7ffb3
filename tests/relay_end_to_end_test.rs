use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use clap::Parser;
use http_body_util::BodyExt;
use httpmock::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;
use webhook_relay::domain::model::{WebhookKind, WebhookTarget};
use webhook_relay::utils::monitor::SystemMonitor;
use webhook_relay::{router, AppState, CliConfig, HttpNotifier, JsonFileStore, RelayManager};

const PNG_BYTES: &[u8] = &[0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a];

async fn load_manager(config_file: &str) -> Result<Arc<RelayManager>> {
    let config = CliConfig::parse_from([
        "webhook-relay",
        "--config-file",
        config_file,
        "--webhook-groups",
        "{}",
    ]);
    let notifier = Arc::new(HttpNotifier::new(reqwest::Client::new(), "http://127.0.0.1:9"));
    let store = Arc::new(JsonFileStore::new(&config.config_file));
    Ok(RelayManager::load(&config, store, notifier, SystemMonitor::new(false)).await?)
}

/// 建立一個帶有 Discord 目標的群組（測試用 http URL 直接寫入）
fn add_discord_target(manager: &RelayManager, group_id: &str, url: String, name: &str) {
    let (group, _) = manager.create_group(group_id, None);
    let target = WebhookTarget::new(
        url,
        Some(name.to_string()),
        WebhookKind::Discord,
        false,
        manager.clock(),
    );
    assert!(group.insert_webhook(target));
}

fn app(manager: Arc<RelayManager>, allow_local: bool) -> Router {
    router(AppState::new(manager, reqwest::Client::new()).with_local_attachments(allow_local))
}

async fn post(app: &Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok((status, serde_json::from_slice(&bytes)?))
}

fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// 測試 JSON 通知轉發到 Discord
#[tokio::test]
async fn test_json_notification_reaches_discord() -> Result<()> {
    let server = MockServer::start_async().await;
    let discord = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/webhooks/1/abc")
                .json_body(json!({"content": "BOSS 出現在 3 頻"}));
            then.status(204);
        })
        .await;

    let dir = TempDir::new()?;
    let config_file = dir.path().join("webhook_config.json");
    let manager = load_manager(&config_file.to_string_lossy()).await?;
    add_discord_target(&manager, "boss", server.url("/api/webhooks/1/abc"), "DC車1");
    let app = app(manager.clone(), false);

    let (status, body) = post(&app, json_post("/webhook/boss", json!({"content": "BOSS 出現在 3 頻"}))).await?;

    discord.assert_async().await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "[同步] 成功: 1");
    assert_eq!(body["group_id"], "boss");
    assert_eq!(body["mode"], "sync");
    assert_eq!(body["details"][0]["name"], "DC車1");
    assert_eq!(body["details"][0]["type"], "discord");
    assert_eq!(body["details"][0]["success"], true);

    let group = manager.group("boss").expect("group exists");
    let history = group.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].source, "203.0.113.7");
    assert_eq!(history[0].status, "[OK]DCDC車1");
    Ok(())
}

/// 測試表單與 multipart 上傳
#[tokio::test]
async fn test_form_and_multipart_notifications() -> Result<()> {
    let server = MockServer::start_async().await;
    let text = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hook")
                .json_body(json!({"content": "hello world"}));
            then.status(200);
        })
        .await;
    let image = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hook")
                .body_contains("screenshot.png")
                .body_contains("偵測到HP血條");
            then.status(200);
        })
        .await;

    let dir = TempDir::new()?;
    let manager = load_manager(&dir.path().join("c.json").to_string_lossy()).await?;
    add_discord_target(&manager, "default", server.url("/hook"), "one");
    let app = app(manager, false);

    let (status, body) = post(
        &app,
        Request::builder()
            .method("POST")
            .uri("/webhook")
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("content=hello%20world"))?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    text.assert_async().await;

    // 帶圖片的 BOSS 偵測訊息不會被過濾
    let boundary = "relaytestboundary";
    let mut multipart = Vec::new();
    multipart.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"content\"\r\n\r\n偵測到HP血條\r\n\
             --{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"shot.png\"\r\n\
             Content-Type: image/png\r\n\r\n",
            b = boundary
        )
        .as_bytes(),
    );
    multipart.extend_from_slice(PNG_BYTES);
    multipart.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    let (status, body) = post(
        &app,
        Request::builder()
            .method("POST")
            .uri("/webhook/default")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(multipart))?,
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    image.assert_async().await;
    Ok(())
}

/// 純文字的 BOSS 偵測訊息直接過濾，不發送
#[tokio::test]
async fn test_text_only_detection_is_filtered() -> Result<()> {
    let server = MockServer::start_async().await;
    let discord = server
        .mock_async(|when, then| {
            when.method(POST).path("/hook");
            then.status(204);
        })
        .await;

    let dir = TempDir::new()?;
    let manager = load_manager(&dir.path().join("c.json").to_string_lossy()).await?;
    add_discord_target(&manager, "boss", server.url("/hook"), "one");
    let app = app(manager.clone(), false);

    let (status, body) = post(&app, json_post("/webhook/boss", json!({"content": "BOSS存在 ⏰ 時間: 12:00"}))).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "已過濾");
    assert_eq!(discord.hits_async().await, 0);

    let group = manager.group("boss").expect("group exists");
    assert_eq!(group.history()[0].mode, "過濾");
    Ok(())
}

/// 測試附件 URL 下載後以圖片轉發
#[tokio::test]
async fn test_remote_attachment_is_downloaded() -> Result<()> {
    let server = MockServer::start_async().await;
    let screenshot = server
        .mock_async(|when, then| {
            when.method(GET).path("/shots/1.png");
            then.status(200).body(PNG_BYTES);
        })
        .await;
    let discord = server
        .mock_async(|when, then| {
            when.method(POST).path("/hook").body_contains("screenshot.png");
            then.status(200);
        })
        .await;

    let dir = TempDir::new()?;
    let manager = load_manager(&dir.path().join("c.json").to_string_lossy()).await?;
    add_discord_target(&manager, "boss", server.url("/hook"), "one");
    let app = app(manager.clone(), false);

    let (status, body) = post(
        &app,
        json_post(
            "/webhook/boss",
            json!({"attachments": [{"url": server.url("/shots/1.png")}]}),
        ),
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    screenshot.assert_async().await;
    discord.assert_async().await;
    assert!(manager.group("boss").expect("group exists").history()[0].has_image);
    Ok(())
}

/// 超過大小上限的附件不下載，訊息照常轉發
#[tokio::test]
async fn test_oversized_attachment_is_dropped() -> Result<()> {
    let server = MockServer::start_async().await;
    let screenshot = server
        .mock_async(|when, then| {
            when.method(GET).path("/shots/big.png");
            then.status(200).body(PNG_BYTES);
        })
        .await;
    let discord = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/hook")
                .json_body(json!({"content": "附件太大"}));
            then.status(204);
        })
        .await;

    let dir = TempDir::new()?;
    let manager = load_manager(&dir.path().join("c.json").to_string_lossy()).await?;
    add_discord_target(&manager, "boss", server.url("/hook"), "one");
    let app = router(
        AppState::new(manager.clone(), reqwest::Client::new())
            .with_max_attachment_bytes(PNG_BYTES.len() - 1),
    );

    let (status, body) = post(
        &app,
        json_post(
            "/webhook/boss",
            json!({"content": "附件太大", "attachments": [{"url": server.url("/shots/big.png")}]}),
        ),
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    screenshot.assert_async().await;
    discord.assert_async().await;
    assert!(!manager.group("boss").expect("group exists").history()[0].has_image);

    // 沒有文字時等同無內容
    let (status, body) = post(
        &app,
        json_post(
            "/webhook/boss",
            json!({"attachments": [{"url": server.url("/shots/big.png")}]}),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "無內容");
    Ok(())
}

/// 本地檔案附件預設不讀取
#[tokio::test]
async fn test_local_attachment_requires_opt_in() -> Result<()> {
    let server = MockServer::start_async().await;
    let discord = server
        .mock_async(|when, then| {
            when.method(POST).path("/hook").body_contains("screenshot.png");
            then.status(200);
        })
        .await;

    let dir = TempDir::new()?;
    let image_path = dir.path().join("local.png");
    std::fs::write(&image_path, PNG_BYTES)?;
    let request_body = json!({"attachments": [{"url": image_path.to_string_lossy()}]});

    let manager = load_manager(&dir.path().join("c.json").to_string_lossy()).await?;
    add_discord_target(&manager, "boss", server.url("/hook"), "one");

    let (status, body) = post(&app(manager.clone(), false), json_post("/webhook/boss", request_body.clone())).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "無內容");
    assert_eq!(discord.hits_async().await, 0);

    let (status, body) = post(&app(manager, true), json_post("/webhook/boss", request_body)).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    discord.assert_async().await;
    Ok(())
}

/// 目標失敗時回報失敗，統計也跟著更新
#[tokio::test]
async fn test_failed_delivery_is_reported() -> Result<()> {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/broken");
            then.status(500);
        })
        .await;

    let dir = TempDir::new()?;
    let manager = load_manager(&dir.path().join("c.json").to_string_lossy()).await?;
    add_discord_target(&manager, "boss", server.url("/broken"), "壞掉");
    let app = app(manager.clone(), false);

    let (status, body) = post(&app, json_post("/webhook/boss", json!({"content": "hi"}))).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "[同步] 成功: 0, 失敗: 1");
    assert_eq!(body["details"][0]["success"], false);

    let webhooks = manager.group("boss").expect("group exists").webhooks();
    assert_eq!(webhooks[0].stats.failed, 1);
    assert_eq!(webhooks[0].stats.sent, 0);
    Ok(())
}

/// 保存後重新載入，群組與目標都還在
#[tokio::test]
async fn test_state_survives_restart() -> Result<()> {
    let dir = TempDir::new()?;
    let config_file = dir.path().join("state").join("webhook_config.json");
    let config_path = config_file.to_string_lossy().to_string();

    let manager = load_manager(&config_path).await?;
    let (group, _) = manager.create_group("night", Some("夜班".to_string()));
    group.add_webhook(
        "https://discord.com/api/webhooks/9/zz",
        Some("車9".to_string()),
        WebhookKind::Discord,
        true,
    )?;
    manager.force_save().await?;
    drop(manager);

    let reloaded = load_manager(&config_path).await?;
    let group = reloaded.group("night").expect("group restored");
    assert_eq!(group.display_name(), "夜班");
    let webhooks = group.webhooks();
    assert_eq!(webhooks.len(), 1);
    assert_eq!(webhooks[0].name, "車9");
    assert!(webhooks[0].is_fixed);
    Ok(())
}
