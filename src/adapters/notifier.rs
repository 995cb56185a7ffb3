use crate::adapters::feishu::FeishuImageUploader;
use crate::domain::model::{FeishuCredentials, OutboundMessage, WebhookKind};
use crate::domain::ports::Notifier;
use crate::utils::error::{RelayError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use md5::{Digest, Md5};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

const IMAGE_TIMEOUT: Duration = Duration::from_secs(30);
const DISCORD_TEXT_TIMEOUT: Duration = Duration::from_secs(15);
const FEISHU_TIMEOUT: Duration = Duration::from_secs(10);
const WECOM_TIMEOUT: Duration = Duration::from_secs(10);

const NOTIFY_TITLE: &str = "BOSS 通知";
const IMAGE_FILE_NAME: &str = "screenshot.png";

/// 透過 reqwest 發送到 Discord / 飛書 / 企業微信
pub struct HttpNotifier {
    client: Client,
    uploader: FeishuImageUploader,
}

fn delivery_error(url: &str, message: impl Into<String>) -> RelayError {
    RelayError::DeliveryError {
        target: url.to_string(),
        message: message.into(),
    }
}

fn png_part(image: &[u8]) -> Result<Part> {
    Ok(Part::bytes(image.to_vec())
        .file_name(IMAGE_FILE_NAME)
        .mime_str("image/png")?)
}

/// 飛書富文本：每行非空文字一個區塊，接著圖片與時間戳
pub fn feishu_post_payload(content: &str, image_key: Option<&str>, timestamp: &str) -> Value {
    let mut blocks: Vec<Value> = content
        .split('\n')
        .filter(|line| !line.trim().is_empty())
        .map(|line| json!([{"tag": "text", "text": format!("{}\n", line)}]))
        .collect();

    if let Some(key) = image_key {
        blocks.push(json!([{
            "tag": "img",
            "image_key": key,
            "width": 800,
            "height": 600
        }]));
    }

    blocks.push(json!([{"tag": "text", "text": format!("\n{}", timestamp)}]));

    json!({
        "msg_type": "post",
        "content": {
            "post": {
                "zh_cn": {
                    "title": NOTIFY_TITLE,
                    "content": blocks
                }
            }
        }
    })
}

pub fn wecom_markdown_payload(content: &str, timestamp: &str) -> Value {
    json!({
        "msgtype": "markdown",
        "markdown": {
            "content": format!("## {}\n\n{}\n\n> {}", NOTIFY_TITLE, content, timestamp)
        }
    })
}

pub fn wecom_image_payload(image: &[u8]) -> Value {
    json!({
        "msgtype": "image",
        "image": {
            "base64": BASE64.encode(image),
            "md5": hex::encode(Md5::digest(image))
        }
    })
}

fn feishu_accepted(body: &Value) -> bool {
    body.get("code").and_then(Value::as_i64) == Some(0)
        || body.get("StatusCode").and_then(Value::as_i64) == Some(0)
}

impl HttpNotifier {
    pub fn new(client: Client, feishu_api_base: &str) -> Self {
        let uploader = FeishuImageUploader::new(client.clone(), feishu_api_base);
        Self { client, uploader }
    }

    async fn send_discord(&self, url: &str, message: &OutboundMessage) -> Result<()> {
        let response = match &message.image {
            Some(image) => {
                let form = Form::new()
                    .text("content", message.content.clone())
                    .part("file", png_part(image)?);
                self.client
                    .post(url)
                    .multipart(form)
                    .timeout(IMAGE_TIMEOUT)
                    .send()
                    .await?
            }
            None => {
                self.client
                    .post(url)
                    .json(&json!({"content": message.content}))
                    .timeout(DISCORD_TEXT_TIMEOUT)
                    .send()
                    .await?
            }
        };

        match response.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            status => Err(delivery_error(url, format!("Discord returned HTTP {}", status))),
        }
    }

    async fn send_feishu(&self, url: &str, message: &OutboundMessage) -> Result<()> {
        let payload = feishu_post_payload(
            &message.content,
            message.feishu_image_key.as_deref(),
            &message.timestamp,
        );
        let response = self
            .client
            .post(url)
            .json(&payload)
            .timeout(FEISHU_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(delivery_error(url, format!("Feishu returned HTTP {}", status)));
        }

        let body: Value = response.json().await?;
        if feishu_accepted(&body) {
            Ok(())
        } else {
            Err(delivery_error(url, format!("Feishu rejected message: {}", body)))
        }
    }

    async fn send_wecom(&self, url: &str, message: &OutboundMessage) -> Result<()> {
        let payload = wecom_markdown_payload(&message.content, &message.timestamp);
        let body: Value = self
            .client
            .post(url)
            .json(&payload)
            .timeout(WECOM_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;

        if body.get("errcode").and_then(Value::as_i64) != Some(0) {
            return Err(delivery_error(url, format!("WeCom rejected message: {}", body)));
        }

        // 圖片另外送一則，失敗只記警告
        if let Some(image) = &message.image {
            if let Err(e) = self.send_wecom_image(url, image).await {
                tracing::warn!("⚠️ WeCom image send failed: {}", e);
            }
        }

        Ok(())
    }

    async fn send_wecom_image(&self, url: &str, image: &[u8]) -> Result<()> {
        let body: Value = self
            .client
            .post(url)
            .json(&wecom_image_payload(image))
            .timeout(IMAGE_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;

        if body.get("errcode").and_then(Value::as_i64) == Some(0) {
            Ok(())
        } else {
            let errmsg = body.get("errmsg").and_then(Value::as_str).unwrap_or("unknown");
            Err(delivery_error(url, errmsg))
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, kind: WebhookKind, url: &str, message: &OutboundMessage) -> Result<()> {
        match kind {
            WebhookKind::Discord => self.send_discord(url, message).await,
            WebhookKind::Feishu => self.send_feishu(url, message).await,
            WebhookKind::Wecom => self.send_wecom(url, message).await,
        }
    }

    async fn upload_feishu_image(&self, image: &[u8]) -> Result<String> {
        self.uploader.upload(image).await
    }

    fn set_feishu_credentials(&self, credentials: FeishuCredentials) {
        self.uploader.set_credentials(credentials);
    }
}
