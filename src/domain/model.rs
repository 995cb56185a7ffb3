use crate::domain::schedule::{self, ScheduleEntry, ScheduleMode};
use crate::utils::clock::LocalClock;
use crate::utils::error::{RelayError, Result};
use chrono::{DateTime, FixedOffset, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// 配置文件格式版本
pub const SNAPSHOT_VERSION: &str = "4.5";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookKind {
    #[default]
    Discord,
    Feishu,
    Wecom,
}

impl WebhookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookKind::Discord => "discord",
            WebhookKind::Feishu => "feishu",
            WebhookKind::Wecom => "wecom",
        }
    }

    pub fn display_label(&self) -> &'static str {
        match self {
            WebhookKind::Discord => "Discord",
            WebhookKind::Feishu => "飛書",
            WebhookKind::Wecom => "企業微信",
        }
    }

    /// 歷史紀錄狀態欄用的短標籤
    pub fn short_label(&self) -> &'static str {
        match self {
            WebhookKind::Discord => "DC",
            WebhookKind::Feishu => "飛書",
            WebhookKind::Wecom => "微信",
        }
    }
}

impl FromStr for WebhookKind {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "discord" => Ok(WebhookKind::Discord),
            "feishu" => Ok(WebhookKind::Feishu),
            "wecom" => Ok(WebhookKind::Wecom),
            other => Err(RelayError::ValidationError {
                message: format!("類型必須是 'discord'、'feishu' 或 'wecom'（收到 '{}'）", other),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    #[default]
    Sync,
    RoundRobin,
}

impl SendMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sync" => Some(SendMode::Sync),
            "round_robin" => Some(SendMode::RoundRobin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SendMode::Sync => "sync",
            SendMode::RoundRobin => "round_robin",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SendMode::Sync => "同步模式",
            SendMode::RoundRobin => "輪詢模式",
        }
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            SendMode::Sync => "同步",
            SendMode::RoundRobin => "輪詢",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetStats {
    pub sent: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupStats {
    pub received: u64,
    pub total_sent: u64,
    pub total_failed: u64,
}

/// 轉發目標（Discord / 飛書 / 企業微信 Webhook）
#[derive(Debug, Clone)]
pub struct WebhookTarget {
    pub id: String,
    pub name: String,
    pub url: String,
    pub kind: WebhookKind,
    pub enabled: bool,
    pub is_fixed: bool,
    pub schedule_mode: ScheduleMode,
    pub schedules: Vec<ScheduleEntry>,
    pub stats: TargetStats,
    pub created_at: String,
}

impl WebhookTarget {
    pub fn new(
        url: String,
        name: Option<String>,
        kind: WebhookKind,
        is_fixed: bool,
        clock: &LocalClock,
    ) -> Self {
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| default_name(kind, clock));

        Self {
            id: generate_id(&url),
            name,
            url,
            kind,
            enabled: true,
            is_fixed,
            schedule_mode: ScheduleMode::Off,
            schedules: Vec::new(),
            stats: TargetStats::default(),
            created_at: clock.now_string(),
        }
    }

    /// 從配置文件 / 預設檔 / 環境變數的紀錄還原
    pub fn from_record(record: WebhookRecord, clock: &LocalClock) -> Self {
        let mut schedule_mode = record.schedule_mode;
        let mut schedules = record.schedules;

        // 舊版單一每日時段 → 以今天日期為基礎的一筆排程
        if record.schedule_enabled && schedules.is_empty() {
            let start = record.schedule_start.as_deref().unwrap_or("00:00");
            let end = record.schedule_end.as_deref().unwrap_or("23:59");
            match (schedule::parse_hhmm(start), schedule::parse_hhmm(end)) {
                (Ok(start_time), Ok(end_time)) => {
                    schedule_mode = ScheduleMode::DateRange;
                    schedules = vec![ScheduleEntry::new(
                        clock.now().date_naive(),
                        start_time,
                        end_time,
                    )];
                    tracing::info!(
                        "🔄 Migrated legacy schedule for '{}'",
                        record.name.as_deref().unwrap_or("?")
                    );
                }
                _ => tracing::warn!(
                    "⚠️ Ignoring malformed legacy schedule for '{}'",
                    record.name.as_deref().unwrap_or("?")
                ),
            }
        }

        let url = record.url;
        let name = record
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_name(record.kind, clock));

        Self {
            id: record
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| generate_id(&url)),
            name,
            url,
            kind: record.kind,
            enabled: record.enabled,
            is_fixed: record.is_fixed,
            schedule_mode,
            schedules,
            stats: record.stats,
            created_at: record.created_at.unwrap_or_else(|| clock.now_string()),
        }
    }

    pub fn to_record(&self) -> WebhookRecord {
        WebhookRecord {
            id: Some(self.id.clone()),
            name: Some(self.name.clone()),
            url: self.url.clone(),
            kind: self.kind,
            enabled: self.enabled,
            is_fixed: self.is_fixed,
            schedule_mode: self.schedule_mode,
            schedules: self.schedules.clone(),
            stats: self.stats,
            created_at: Some(self.created_at.clone()),
            ..WebhookRecord::default()
        }
    }

    pub fn is_in_schedule(&self, now: &DateTime<FixedOffset>) -> bool {
        schedule::is_in_schedule(self.schedule_mode, &self.schedules, now)
    }

    pub fn schedule_info(&self, now: &DateTime<FixedOffset>) -> String {
        schedule::schedule_info(self.schedule_mode, &self.schedules, now.date_naive())
    }

    pub fn url_preview(&self) -> String {
        let len = self.url.chars().count();
        if len > 35 {
            let tail: String = self.url.chars().skip(len - 30).collect();
            format!("...{}", tail)
        } else {
            self.url.clone()
        }
    }

    pub fn view(&self, now: &DateTime<FixedOffset>) -> WebhookView {
        WebhookView {
            id: self.id.clone(),
            name: self.name.clone(),
            url_preview: self.url_preview(),
            webhook_type: self.kind,
            enabled: self.enabled,
            is_fixed: self.is_fixed,
            schedule_mode: self.schedule_mode,
            schedules: self.schedules.clone(),
            schedule_info: self.schedule_info(now),
            is_in_schedule: self.is_in_schedule(now),
            sent: self.stats.sent,
            failed: self.stats.failed,
            created_at: self.created_at.clone(),
        }
    }
}

fn default_name(kind: WebhookKind, clock: &LocalClock) -> String {
    format!("{}-{}", kind.display_label(), clock.format_now("%H%M%S"))
}

/// URL + 當前時間的 MD5 前 8 碼
fn generate_id(url: &str) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let digest = Md5::digest(format!("{}{}", url, nanos).as_bytes());
    hex::encode(digest)[..8].to_string()
}

fn default_true() -> bool {
    true
}

/// 持久化 / 預設配置中的單筆 Webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(rename = "type", default)]
    pub kind: WebhookKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub is_fixed: bool,
    #[serde(default)]
    pub schedule_mode: ScheduleMode,
    #[serde(default, deserialize_with = "schedule::deserialize_lenient")]
    pub schedules: Vec<ScheduleEntry>,
    #[serde(default)]
    pub stats: TargetStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    // v4.4 舊格式欄位，只讀不寫
    #[serde(default, skip_serializing)]
    pub schedule_enabled: bool,
    #[serde(default, skip_serializing)]
    pub schedule_start: Option<String>,
    #[serde(default, skip_serializing)]
    pub schedule_end: Option<String>,
}

impl Default for WebhookRecord {
    fn default() -> Self {
        Self {
            id: None,
            name: None,
            url: String::new(),
            kind: WebhookKind::Discord,
            enabled: true,
            is_fixed: false,
            schedule_mode: ScheduleMode::Off,
            schedules: Vec::new(),
            stats: TargetStats::default(),
            created_at: None,
            schedule_enabled: false,
            schedule_start: None,
            schedule_end: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub send_mode: SendMode,
    #[serde(default)]
    pub current_index: usize,
    #[serde(default)]
    pub webhooks: Vec<WebhookRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeishuCredentials {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_secret: String,
}

impl FeishuCredentials {
    pub fn new(app_id: impl Into<String>, app_secret: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_secret: app_secret.into(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.app_id.is_empty() && !self.app_secret.is_empty()
    }
}

/// 整份配置文件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feishu_credentials: Option<FeishuCredentials>,
    #[serde(default)]
    pub groups: BTreeMap<String, GroupRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookView {
    pub id: String,
    pub name: String,
    pub url_preview: String,
    pub webhook_type: WebhookKind,
    pub enabled: bool,
    pub is_fixed: bool,
    pub schedule_mode: ScheduleMode,
    pub schedules: Vec<ScheduleEntry>,
    pub schedule_info: String,
    pub is_in_schedule: bool,
    pub sent: u64,
    pub failed: u64,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub time: String,
    pub content: String,
    pub status: String,
    pub source: String,
    pub has_image: bool,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryResult {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: WebhookKind,
    pub success: bool,
    pub is_fixed: bool,
    pub skipped: bool,
}

impl DeliveryResult {
    pub fn skipped(target: &WebhookTarget, is_fixed: bool) -> Self {
        Self {
            name: target.name.clone(),
            kind: target.kind,
            success: false,
            is_fixed,
            skipped: true,
        }
    }

    pub fn status_mark(&self) -> &'static str {
        if self.skipped {
            "[跳過]"
        } else if self.success {
            "[OK]"
        } else {
            "[失敗]"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayOutcome {
    pub success: bool,
    pub message: String,
    pub details: Vec<DeliveryResult>,
}

/// 轉發給下游的訊息內容
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub content: String,
    pub image: Option<Vec<u8>>,
    pub feishu_image_key: Option<String>,
    pub timestamp: String,
}

pub fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

pub fn tail_chars(value: &str, max: usize) -> String {
    let len = value.chars().count();
    value.chars().skip(len.saturating_sub(max)).collect()
}
