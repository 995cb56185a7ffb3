use crate::core::autosave::SaveTrigger;
use crate::core::filter::MessageFilter;
use crate::domain::model::{
    tail_chars, truncate_chars, DeliveryResult, GroupRecord, GroupStats, HistoryEntry,
    OutboundMessage, RelayOutcome, SendMode, WebhookKind, WebhookTarget, WebhookView,
};
use crate::domain::ports::Notifier;
use crate::domain::schedule::{ScheduleEntry, ScheduleMode};
use crate::utils::clock::LocalClock;
use crate::utils::error::{RelayError, Result};
use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

const HISTORY_CAPACITY: usize = 50;
const HISTORY_VIEW_LIMIT: usize = 20;
const CONTENT_PREVIEW_CHARS: usize = 50;
const SOURCE_TAIL_CHARS: usize = 15;
const STATUS_NAME_CHARS: usize = 8;

/// 群組共用的依賴
#[derive(Clone)]
pub struct GroupContext {
    pub notifier: Arc<dyn Notifier>,
    pub clock: LocalClock,
    pub filter: Arc<MessageFilter>,
    pub saver: SaveTrigger,
}

struct GroupState {
    webhooks: Vec<WebhookTarget>,
    send_mode: SendMode,
    current_index: usize,
    stats: GroupStats,
    history: VecDeque<HistoryEntry>,
}

impl GroupState {
    fn push_history(&mut self, entry: HistoryEntry) {
        self.history.push_front(entry);
        self.history.truncate(HISTORY_CAPACITY);
    }

    fn find_mut(&mut self, webhook_id: &str) -> Result<&mut WebhookTarget> {
        self.webhooks
            .iter_mut()
            .find(|wh| wh.id == webhook_id)
            .ok_or_else(|| RelayError::NotFound {
                what: "webhook".to_string(),
                id: webhook_id.to_string(),
            })
    }

    fn enabled_indices(&self, exclude_fixed: bool) -> Vec<usize> {
        self.webhooks
            .iter()
            .enumerate()
            .filter(|(_, wh)| wh.enabled && !(exclude_fixed && wh.is_fixed))
            .map(|(i, _)| i)
            .collect()
    }

    fn fixed_indices(&self) -> Vec<usize> {
        self.webhooks
            .iter()
            .enumerate()
            .filter(|(_, wh)| wh.enabled && wh.is_fixed)
            .map(|(i, _)| i)
            .collect()
    }

    /// 輪詢取下一個在排程內的 Webhook；每次嘗試都會推進游標
    fn next_round_robin(&mut self, now: &DateTime<FixedOffset>) -> (Option<usize>, Vec<usize>) {
        let candidates = self.enabled_indices(true);
        if candidates.is_empty() {
            return (None, Vec::new());
        }

        let total = candidates.len();
        let mut skipped = Vec::new();

        for _ in 0..total {
            self.current_index %= total;
            let index = candidates[self.current_index];
            self.current_index = (self.current_index + 1) % total;

            if self.webhooks[index].is_in_schedule(now) {
                return (Some(index), skipped);
            }
            skipped.push(index);
        }

        (None, skipped)
    }
}

/// 單一待發送 / 已跳過的目標
enum PlannedDelivery {
    Send {
        id: String,
        name: String,
        url: String,
        kind: WebhookKind,
        is_fixed: bool,
    },
    Skip(DeliveryResult),
}

impl PlannedDelivery {
    fn send(target: &WebhookTarget, is_fixed: bool) -> Self {
        PlannedDelivery::Send {
            id: target.id.clone(),
            name: target.name.clone(),
            url: target.url.clone(),
            kind: target.kind,
            is_fixed,
        }
    }
}

struct DeliveryPlan {
    mode: SendMode,
    deliveries: Vec<PlannedDelivery>,
    upload_feishu_image: bool,
}

/// BOSS 群組：一組轉發目標與發送模式
pub struct RelayGroup {
    group_id: String,
    display_name: String,
    state: Mutex<GroupState>,
    ctx: GroupContext,
}

impl RelayGroup {
    pub fn new(group_id: &str, display_name: Option<String>, ctx: GroupContext) -> Self {
        let group_id = group_id.to_lowercase();
        let display_name = display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("{} BOSS", group_id.to_uppercase()));

        Self {
            group_id,
            display_name,
            state: Mutex::new(GroupState {
                webhooks: Vec::new(),
                send_mode: SendMode::Sync,
                current_index: 0,
                stats: GroupStats::default(),
                history: VecDeque::with_capacity(HISTORY_CAPACITY),
            }),
            ctx,
        }
    }

    pub fn from_record(group_id: &str, record: GroupRecord, ctx: GroupContext) -> Self {
        let group = Self::new(group_id, record.display_name, ctx);
        {
            let mut state = group.state();
            state.send_mode = record.send_mode;
            state.current_index = record.current_index;
            for wh in record.webhooks {
                if wh.url.is_empty() {
                    tracing::warn!("⚠️ [{}] Skipping webhook without URL", group.group_id);
                    continue;
                }
                state
                    .webhooks
                    .push(WebhookTarget::from_record(wh, &group.ctx.clock));
            }
        }
        group
    }

    pub fn to_record(&self) -> GroupRecord {
        let state = self.state();
        GroupRecord {
            display_name: Some(self.display_name.clone()),
            send_mode: state.send_mode,
            current_index: state.current_index,
            webhooks: state.webhooks.iter().map(|wh| wh.to_record()).collect(),
        }
    }

    fn state(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn send_mode(&self) -> SendMode {
        self.state().send_mode
    }

    pub fn stats(&self) -> GroupStats {
        self.state().stats
    }

    pub fn webhook_count(&self) -> usize {
        self.state().webhooks.len()
    }

    pub fn webhook(&self, webhook_id: &str) -> Option<WebhookTarget> {
        self.state()
            .webhooks
            .iter()
            .find(|wh| wh.id == webhook_id)
            .cloned()
    }

    pub fn webhooks(&self) -> Vec<WebhookTarget> {
        self.state().webhooks.clone()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state().history.iter().cloned().collect()
    }

    // ---- 模式管理 ----

    pub fn set_send_mode(&self, mode: SendMode) -> String {
        self.state().send_mode = mode;
        self.ctx.saver.request();
        format!("已切換為{}", mode.name())
    }

    // ---- Webhook CRUD ----

    pub fn add_webhook(
        &self,
        url: &str,
        name: Option<String>,
        kind: WebhookKind,
        is_fixed: bool,
    ) -> Result<String> {
        let url = url.trim();
        if url.is_empty() || !url.starts_with("https://") {
            return Err(RelayError::ValidationError {
                message: "無效的 URL（必須以 https:// 開頭）".to_string(),
            });
        }

        let mut state = self.state();
        if state.webhooks.iter().any(|wh| wh.url == url) {
            return Err(RelayError::ValidationError {
                message: "此 Webhook URL 已存在".to_string(),
            });
        }

        let webhook = WebhookTarget::new(url.to_string(), name, kind, is_fixed, &self.ctx.clock);
        let fixed_text = if is_fixed { " (固定)" } else { "" };
        tracing::info!(
            "➕ [{}] Added {} webhook: {}{}",
            self.group_id,
            kind.as_str(),
            webhook.name,
            fixed_text
        );
        let message = format!("添加成功: {}{}", webhook.name, fixed_text);
        state.webhooks.push(webhook);
        drop(state);

        self.ctx.saver.request();
        Ok(message)
    }

    /// 直接加入已建好的目標，不檢查 URL 格式；重複 URL 會被忽略
    pub fn insert_webhook(&self, webhook: WebhookTarget) -> bool {
        let mut state = self.state();
        if state.webhooks.iter().any(|wh| wh.url == webhook.url) {
            return false;
        }
        state.webhooks.push(webhook);
        true
    }

    pub fn remove_webhook(&self, webhook_id: &str) -> bool {
        let mut state = self.state();
        let Some(position) = state.webhooks.iter().position(|wh| wh.id == webhook_id) else {
            return false;
        };

        let removed = state.webhooks.remove(position);
        if state.current_index >= state.webhooks.len() && !state.webhooks.is_empty() {
            state.current_index = 0;
        }
        drop(state);

        tracing::info!("➖ [{}] Removed webhook: {}", self.group_id, removed.name);
        self.ctx.saver.request();
        true
    }

    pub fn toggle_webhook(&self, webhook_id: &str, enabled: bool) -> Result<String> {
        let message = {
            let mut state = self.state();
            let wh = state.find_mut(webhook_id)?;
            wh.enabled = enabled;
            format!("{} 已{}", wh.name, if enabled { "啟用" } else { "禁用" })
        };
        self.ctx.saver.request();
        Ok(message)
    }

    pub fn set_fixed(&self, webhook_id: &str, is_fixed: bool) -> Result<String> {
        let message = {
            let mut state = self.state();
            let wh = state.find_mut(webhook_id)?;
            wh.is_fixed = is_fixed;
            format!(
                "{} {}固定發送",
                wh.name,
                if is_fixed { "已設為" } else { "已取消" }
            )
        };
        self.ctx.saver.request();
        Ok(message)
    }

    pub fn rename_webhook(&self, webhook_id: &str, name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RelayError::ValidationError {
                message: "名稱不能為空".to_string(),
            });
        }

        {
            let mut state = self.state();
            let wh = state.find_mut(webhook_id)?;
            wh.name = name.to_string();
        }
        self.ctx.saver.request();
        Ok(format!("已重命名為: {}", name))
    }

    /// 設定排程；`schedules` 為 None 時保留原本的排程列表
    pub fn set_schedule(
        &self,
        webhook_id: &str,
        mode: ScheduleMode,
        schedules: Option<Vec<ScheduleEntry>>,
    ) -> Result<String> {
        let mut state = self.state();
        let wh = state.find_mut(webhook_id)?;
        wh.schedule_mode = mode;
        if let Some(schedules) = schedules {
            wh.schedules = schedules;
        }

        Ok(match mode {
            ScheduleMode::Off => format!("{} 排程已關閉", wh.name),
            ScheduleMode::DateRange => {
                format!("{} 排程已更新 ({} 筆)", wh.name, wh.schedules.len())
            }
        })
    }

    // ---- 訊息中繼 ----

    pub async fn relay(&self, content: &str, image: Option<Vec<u8>>, source: &str) -> RelayOutcome {
        let has_image = image.is_some();
        let timestamp = self.ctx.clock.now_string();
        let source = tail_chars(source, SOURCE_TAIL_CHARS);

        // 過濾純文字 BOSS 偵測訊息（不計入接收數）
        if self.ctx.filter.should_drop(content, has_image) {
            tracing::info!("🔇 [{}] Filtered text-only detection message", self.group_id);
            self.state().push_history(HistoryEntry {
                time: timestamp,
                content: truncate_chars(content, CONTENT_PREVIEW_CHARS),
                status: "已過濾（純文字）".to_string(),
                source,
                has_image: false,
                mode: "過濾".to_string(),
            });
            return RelayOutcome {
                success: true,
                message: "已過濾".to_string(),
                details: Vec::new(),
            };
        }

        let plan = match self.plan(content, has_image, &timestamp, &source) {
            Ok(plan) => plan,
            Err(outcome) => return outcome,
        };

        // 飛書需要先上傳圖片取得 image_key
        let feishu_image_key = match (&image, plan.upload_feishu_image) {
            (Some(bytes), true) => match self.ctx.notifier.upload_feishu_image(bytes).await {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::error!("❌ [{}] Feishu image upload failed: {}", self.group_id, e);
                    None
                }
            },
            _ => None,
        };

        let message = OutboundMessage {
            content: content.to_string(),
            image,
            feishu_image_key,
            timestamp: timestamp.clone(),
        };

        let results = self.deliver(plan.deliveries, &message).await;
        self.record(plan.mode, content, has_image, timestamp, source, results)
    }

    /// 在鎖內決定這次要送哪些目標
    fn plan(
        &self,
        content: &str,
        has_image: bool,
        timestamp: &str,
        source: &str,
    ) -> std::result::Result<DeliveryPlan, RelayOutcome> {
        let now = self.ctx.clock.now();
        let mut state = self.state();
        state.stats.received += 1;

        let upload_feishu_image = has_image
            && state
                .webhooks
                .iter()
                .any(|wh| wh.enabled && wh.kind == WebhookKind::Feishu && wh.is_in_schedule(&now));

        let mut deliveries = Vec::new();

        // 1. 固定的 Webhook 一律嘗試（仍受排程限制）
        let fixed = state.fixed_indices();
        for &i in &fixed {
            let wh = &state.webhooks[i];
            if wh.is_in_schedule(&now) {
                deliveries.push(PlannedDelivery::send(wh, true));
            } else {
                tracing::info!("⏭️ [{}] Fixed {} is outside its schedule", self.group_id, wh.name);
                deliveries.push(PlannedDelivery::Skip(DeliveryResult::skipped(wh, true)));
            }
        }

        let mode = state.send_mode;
        let no_target = |state: &mut GroupState, status: &str| {
            state.push_history(HistoryEntry {
                time: timestamp.to_string(),
                content: truncate_chars(content, CONTENT_PREVIEW_CHARS),
                status: status.to_string(),
                source: source.to_string(),
                has_image,
                mode: mode.short_name().to_string(),
            });
        };

        // 2. 依模式處理非固定的 Webhook
        match mode {
            SendMode::Sync => {
                let enabled = state.enabled_indices(true);
                if enabled.is_empty() && fixed.is_empty() {
                    no_target(&mut *state, "無啟用的 Webhook");
                    return Err(RelayOutcome {
                        success: false,
                        message: "無啟用的 Webhook".to_string(),
                        details: Vec::new(),
                    });
                }

                for i in enabled {
                    let wh = &state.webhooks[i];
                    if wh.is_in_schedule(&now) {
                        deliveries.push(PlannedDelivery::send(wh, false));
                    } else {
                        tracing::info!("⏭️ [{}] {} is outside its schedule", self.group_id, wh.name);
                        deliveries.push(PlannedDelivery::Skip(DeliveryResult::skipped(wh, false)));
                    }
                }
            }
            SendMode::RoundRobin => {
                let (chosen, skipped) = state.next_round_robin(&now);
                for &i in &skipped {
                    let wh = &state.webhooks[i];
                    tracing::info!("⏭️ [{}] Round robin skipped {} (outside schedule)", self.group_id, wh.name);
                    deliveries.push(PlannedDelivery::Skip(DeliveryResult::skipped(wh, false)));
                }

                match chosen {
                    Some(i) => deliveries.push(PlannedDelivery::send(&state.webhooks[i], false)),
                    None if fixed.is_empty() => {
                        let message = if skipped.is_empty() {
                            "無啟用的 Webhook"
                        } else {
                            "所有 Webhook 都不在排程內"
                        };
                        no_target(&mut *state, message);
                        let details = deliveries
                            .into_iter()
                            .filter_map(|d| match d {
                                PlannedDelivery::Skip(result) => Some(result),
                                PlannedDelivery::Send { .. } => None,
                            })
                            .collect();
                        return Err(RelayOutcome {
                            success: false,
                            message: message.to_string(),
                            details,
                        });
                    }
                    None => {}
                }
            }
        }

        Ok(DeliveryPlan {
            mode,
            deliveries,
            upload_feishu_image,
        })
    }

    /// 鎖外並行發送，結果保持計畫順序
    async fn deliver(
        &self,
        deliveries: Vec<PlannedDelivery>,
        message: &OutboundMessage,
    ) -> Vec<(Option<String>, DeliveryResult)> {
        let sends = deliveries.into_iter().map(|delivery| async move {
            match delivery {
                PlannedDelivery::Skip(result) => (None, result),
                PlannedDelivery::Send {
                    id,
                    name,
                    url,
                    kind,
                    is_fixed,
                } => {
                    let success = match self.ctx.notifier.send(kind, &url, message).await {
                        Ok(()) => {
                            tracing::info!("✅ [{}] OK -> {}", self.group_id, name);
                            true
                        }
                        Err(e) => {
                            tracing::error!("❌ [{}] FAIL -> {}: {}", self.group_id, name, e);
                            false
                        }
                    };
                    (
                        Some(id),
                        DeliveryResult {
                            name,
                            kind,
                            success,
                            is_fixed,
                            skipped: false,
                        },
                    )
                }
            }
        });

        futures::future::join_all(sends).await
    }

    fn record(
        &self,
        mode: SendMode,
        content: &str,
        has_image: bool,
        timestamp: String,
        source: String,
        results: Vec<(Option<String>, DeliveryResult)>,
    ) -> RelayOutcome {
        let success_count = results.iter().filter(|(_, r)| r.success).count();
        let fail_count = results
            .iter()
            .filter(|(_, r)| !r.success && !r.skipped)
            .count();
        let skipped_count = results.iter().filter(|(_, r)| r.skipped).count();

        let status = results
            .iter()
            .map(|(_, r)| {
                format!(
                    "{}{}{}",
                    r.status_mark(),
                    r.kind.short_label(),
                    truncate_chars(&r.name, STATUS_NAME_CHARS)
                )
            })
            .collect::<Vec<_>>()
            .join(" | ");

        let preview = if content.chars().count() > CONTENT_PREVIEW_CHARS {
            format!("{}...", truncate_chars(content, CONTENT_PREVIEW_CHARS))
        } else {
            content.to_string()
        };

        {
            let mut state = self.state();
            for (id, result) in &results {
                let Some(id) = id else { continue };
                // 發送期間可能已被刪除
                if let Some(wh) = state.webhooks.iter_mut().find(|wh| &wh.id == id) {
                    if result.success {
                        wh.stats.sent += 1;
                    } else {
                        wh.stats.failed += 1;
                    }
                }
            }
            state.stats.total_sent += success_count as u64;
            state.stats.total_failed += fail_count as u64;
            state.push_history(HistoryEntry {
                time: timestamp,
                content: preview,
                status,
                source,
                has_image,
                mode: mode.short_name().to_string(),
            });
        }

        let mut parts = vec![format!("成功: {}", success_count)];
        if fail_count > 0 {
            parts.push(format!("失敗: {}", fail_count));
        }
        if skipped_count > 0 {
            parts.push(format!("排程外: {}", skipped_count));
        }

        RelayOutcome {
            success: success_count > 0,
            message: format!("[{}] {}", mode.short_name(), parts.join(", ")),
            details: results.into_iter().map(|(_, r)| r).collect(),
        }
    }

    /// 測試單個 Webhook：不看啟用狀態與排程
    pub async fn test_webhook(&self, webhook_id: &str, content: Option<String>) -> Result<bool> {
        let target = self.webhook(webhook_id).ok_or_else(|| RelayError::NotFound {
            what: "webhook".to_string(),
            id: webhook_id.to_string(),
        })?;

        let message = OutboundMessage {
            content: content.unwrap_or_else(|| format!("[測試] {}", target.name)),
            image: None,
            feishu_image_key: None,
            timestamp: self.ctx.clock.now_string(),
        };

        let success = match self.ctx.notifier.send(target.kind, &target.url, &message).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("⚠️ [{}] Test send to {} failed: {}", self.group_id, target.name, e);
                false
            }
        };

        if let Ok(wh) = self.state().find_mut(webhook_id) {
            if success {
                wh.stats.sent += 1;
            } else {
                wh.stats.failed += 1;
            }
        }

        Ok(success)
    }

    // ---- 統計 ----

    pub fn stats_view(&self) -> GroupStatsView {
        let now = self.ctx.clock.now();
        let state = self.state();

        GroupStatsView {
            group_id: self.group_id.clone(),
            display_name: self.display_name.clone(),
            send_mode: state.send_mode,
            send_mode_name: state.send_mode.name(),
            webhooks_total: state.webhooks.len(),
            webhooks_enabled: state.enabled_indices(false).len(),
            webhooks_fixed: state.fixed_indices().len(),
            current_index: state.current_index,
            received: state.stats.received,
            total_sent: state.stats.total_sent,
            total_failed: state.stats.total_failed,
            success_rate: success_rate(state.stats.total_sent, state.stats.received),
            webhooks: state.webhooks.iter().map(|wh| wh.view(&now)).collect(),
            history: state.history.iter().take(HISTORY_VIEW_LIMIT).cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupStatsView {
    pub group_id: String,
    pub display_name: String,
    pub send_mode: SendMode,
    pub send_mode_name: &'static str,
    pub webhooks_total: usize,
    pub webhooks_enabled: usize,
    pub webhooks_fixed: usize,
    pub current_index: usize,
    pub received: u64,
    pub total_sent: u64,
    pub total_failed: u64,
    pub success_rate: String,
    pub webhooks: Vec<WebhookView>,
    pub history: Vec<HistoryEntry>,
}

pub fn success_rate(sent: u64, received: u64) -> String {
    format!("{:.1}%", sent as f64 / received.max(1) as f64 * 100.0)
}
