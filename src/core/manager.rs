use crate::config::presets;
use crate::core::autosave;
use crate::core::filter::MessageFilter;
use crate::core::group::{success_rate, GroupContext, GroupStatsView, RelayGroup};
use crate::domain::model::{FeishuCredentials, GroupRecord, Snapshot, SNAPSHOT_VERSION};
use crate::domain::ports::{ConfigProvider, Notifier, SnapshotStore};
use crate::utils::clock::LocalClock;
use crate::utils::error::{RelayError, Result};
use crate::utils::monitor::{SystemMonitor, SystemStats};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const DEFAULT_GROUP_ID: &str = "default";

/// 所有群組與飛書憑證的擁有者，負責載入與保存配置
pub struct RelayManager {
    groups: RwLock<BTreeMap<String, Arc<RelayGroup>>>,
    ctx: GroupContext,
    store: Arc<dyn SnapshotStore>,
    credentials: Mutex<FeishuCredentials>,
    started: Instant,
    save_delay: Duration,
    save_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
    save_lock: tokio::sync::Mutex<()>,
    monitor: SystemMonitor,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeishuCredentialsView {
    pub app_id: String,
    pub app_id_masked: String,
    pub app_secret: String,
    pub app_secret_masked: String,
    pub is_configured: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManagerStatsView {
    pub uptime: String,
    pub total_groups: usize,
    pub total_received: u64,
    pub total_sent: u64,
    pub total_failed: u64,
    pub success_rate: String,
    pub config_file: String,
    pub timezone: String,
    pub current_time: String,
    pub groups: Vec<GroupStatsView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthView {
    pub status: &'static str,
    pub version: &'static str,
    pub groups: usize,
    pub config_file: String,
}

impl RelayManager {
    /// 載入順序：JSON 配置文件 → TOML 預設檔 → WEBHOOK_GROUPS 環境變數
    pub async fn load(
        config: &dyn ConfigProvider,
        store: Arc<dyn SnapshotStore>,
        notifier: Arc<dyn Notifier>,
        monitor: SystemMonitor,
    ) -> Result<Arc<Self>> {
        let clock = LocalClock::new(config.timezone_offset())?;
        let (saver, save_rx) = autosave::channel();
        let ctx = GroupContext {
            notifier: notifier.clone(),
            clock,
            filter: Arc::new(MessageFilter::new(config.filter_keywords().to_vec())),
            saver,
        };

        let mut credentials = config.feishu_credentials();
        let snapshot = match store.load().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!("❌ Failed to load {}: {}", store.location(), e);
                None
            }
        };
        let from_snapshot = snapshot.is_some();

        let mut groups = BTreeMap::new();
        match snapshot {
            Some(snapshot) => {
                if let Some(saved) = snapshot.feishu_credentials {
                    credentials = saved;
                }
                for (group_id, record) in snapshot.groups {
                    let group = RelayGroup::from_record(&group_id, record, ctx.clone());
                    groups.insert(group.group_id().to_string(), Arc::new(group));
                }
                tracing::info!("📂 Loaded {} groups from {}", groups.len(), store.location());
            }
            None => {
                for (group_id, record) in seed_records(config)? {
                    let group = RelayGroup::from_record(&group_id, record, ctx.clone());
                    tracing::info!(
                        "🌱 {} -> {} ({} webhooks)",
                        group_id,
                        group.display_name(),
                        group.webhook_count()
                    );
                    groups.insert(group_id, Arc::new(group));
                }
            }
        }

        notifier.set_feishu_credentials(credentials.clone());

        let manager = Arc::new(Self {
            groups: RwLock::new(groups),
            ctx,
            store,
            credentials: Mutex::new(credentials),
            started: Instant::now(),
            save_delay: Duration::from_millis(config.save_delay_ms()),
            save_rx: Mutex::new(Some(save_rx)),
            save_lock: tokio::sync::Mutex::new(()),
            monitor,
        });

        tracing::info!("🚀 Webhook relay v{} ready", SNAPSHOT_VERSION);
        tracing::info!("   Groups: {}", manager.group_count());
        tracing::info!("   Config file: {}", manager.config_location());
        tracing::info!("   Timezone: {}", manager.ctx.clock.label());
        {
            let credentials = manager.credentials();
            if !credentials.app_id.is_empty() {
                tracing::info!("   Feishu APP ID: {}", mask(&credentials.app_id, 10, None));
            }
        }

        if !from_snapshot {
            if let Err(e) = manager.force_save().await {
                tracing::error!("❌ Initial save failed: {}", e);
            }
        }

        Ok(manager)
    }

    fn groups_read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Arc<RelayGroup>>> {
        self.groups.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn groups_write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Arc<RelayGroup>>> {
        self.groups.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn credentials(&self) -> std::sync::MutexGuard<'_, FeishuCredentials> {
        self.credentials.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn clock(&self) -> &LocalClock {
        &self.ctx.clock
    }

    pub fn config_location(&self) -> String {
        self.store.location()
    }

    pub fn group_count(&self) -> usize {
        self.groups_read().len()
    }

    pub fn groups(&self) -> Vec<Arc<RelayGroup>> {
        self.groups_read().values().cloned().collect()
    }

    // ---- 群組管理 ----

    pub fn group(&self, group_id: &str) -> Option<Arc<RelayGroup>> {
        self.groups_read().get(&group_id.to_lowercase()).cloned()
    }

    /// 建立群組；已存在時原樣回傳，第二個值表示是否新建
    pub fn create_group(&self, group_id: &str, display_name: Option<String>) -> (Arc<RelayGroup>, bool) {
        let clean_id = sanitize_group_id(group_id);
        let mut groups = self.groups_write();
        if let Some(existing) = groups.get(&clean_id) {
            return (existing.clone(), false);
        }

        let group = Arc::new(RelayGroup::new(&clean_id, display_name, self.ctx.clone()));
        groups.insert(clean_id.clone(), group.clone());
        drop(groups);

        tracing::info!("🆕 Created group: {}", clean_id);
        self.ctx.saver.request();
        (group, true)
    }

    pub fn group_or_create(&self, group_id: &str) -> Arc<RelayGroup> {
        match self.group(group_id) {
            Some(group) => group,
            None => self.create_group(group_id, None).0,
        }
    }

    pub fn delete_group(&self, group_id: &str) -> bool {
        let removed = self.groups_write().remove(&group_id.to_lowercase()).is_some();
        if removed {
            tracing::info!("🗑️ Deleted group: {}", group_id);
            self.ctx.saver.request();
        }
        removed
    }

    // ---- 飛書憑證 ----

    pub fn update_feishu_credentials(&self, app_id: &str, app_secret: &str) -> Result<String> {
        let credentials = FeishuCredentials::new(app_id.trim(), app_secret.trim());
        if !credentials.is_configured() {
            return Err(RelayError::ValidationError {
                message: "APP ID 和 APP Secret 不能為空".to_string(),
            });
        }

        tracing::info!("🔑 Feishu credentials updated: {}", mask(&credentials.app_id, 10, None));
        *self.credentials() = credentials.clone();
        self.ctx.notifier.set_feishu_credentials(credentials);
        self.ctx.saver.request();
        Ok("飛書憑證已更新並保存".to_string())
    }

    pub fn feishu_credentials_view(&self) -> FeishuCredentialsView {
        let credentials = self.credentials().clone();
        FeishuCredentialsView {
            app_id_masked: mask(&credentials.app_id, 10, None),
            app_secret_masked: mask(&credentials.app_secret, 8, Some("***")),
            is_configured: credentials.is_configured(),
            app_id: credentials.app_id,
            app_secret: credentials.app_secret,
        }
    }

    // ---- 統計 ----

    pub fn stats_view(&self) -> ManagerStatsView {
        let groups: Vec<GroupStatsView> = self.groups().iter().map(|g| g.stats_view()).collect();
        let total_received = groups.iter().map(|g| g.received).sum();
        let total_sent = groups.iter().map(|g| g.total_sent).sum();
        let total_failed = groups.iter().map(|g| g.total_failed).sum();

        ManagerStatsView {
            uptime: format_uptime(self.started.elapsed()),
            total_groups: groups.len(),
            total_received,
            total_sent,
            total_failed,
            success_rate: success_rate(total_sent, total_received),
            config_file: self.config_location(),
            timezone: self.ctx.clock.label(),
            current_time: self.ctx.clock.now_string(),
            groups,
            system: self.monitor.get_stats(),
        }
    }

    /// 記錄一次進程資源使用（未啟用監控時不輸出）
    pub fn log_system_stats(&self, phase: &str) {
        self.monitor.log_stats(phase);
    }

    pub fn health(&self) -> HealthView {
        HealthView {
            status: "ok",
            version: SNAPSHOT_VERSION,
            groups: self.group_count(),
            config_file: self.config_location(),
        }
    }

    // ---- 持久化 ----

    pub fn snapshot(&self) -> Snapshot {
        let groups = self
            .groups()
            .iter()
            .map(|g| (g.group_id().to_string(), g.to_record()))
            .collect();

        Snapshot {
            version: SNAPSHOT_VERSION.to_string(),
            updated_at: self.ctx.clock.now_string(),
            feishu_credentials: Some(self.credentials().clone()),
            groups,
        }
    }

    /// 立即寫入配置文件
    pub async fn force_save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;
        let snapshot = self.snapshot();
        self.store.save(&snapshot).await?;
        tracing::info!("💾 Configuration saved to {}", self.store.location());
        Ok(())
    }

    /// 啟動防抖動的背景保存任務；只能啟動一次
    pub fn spawn_autosave(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let rx = self
            .save_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()?;
        let manager: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(autosave::run_debounced(rx, self.save_delay, move || {
            let manager = manager.clone();
            async move {
                let Some(manager) = manager.upgrade() else {
                    return;
                };
                if let Err(e) = manager.force_save().await {
                    tracing::error!("❌ Autosave failed: {}", e);
                }
            }
        })))
    }
}

/// 小寫並只保留 `[a-z0-9_]`，空字串視為 `default`
pub fn sanitize_group_id(group_id: &str) -> String {
    let clean: String = group_id
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if clean.is_empty() {
        DEFAULT_GROUP_ID.to_string()
    } else {
        clean
    }
}

pub fn format_uptime(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    let (hours, remainder) = (total / 3600, total % 3600);
    format!("{}h {}m {}s", hours, remainder / 60, remainder % 60)
}

fn mask(value: &str, keep: usize, short: Option<&str>) -> String {
    if value.chars().count() > keep {
        format!("{}...", value.chars().take(keep).collect::<String>())
    } else {
        short.map(str::to_string).unwrap_or_else(|| value.to_string())
    }
}

/// 沒有配置文件時的初始群組：預設檔在前，環境變數補上
fn seed_records(config: &dyn ConfigProvider) -> Result<BTreeMap<String, GroupRecord>> {
    let mut seeds = BTreeMap::new();

    if let Some(path) = config.presets_file() {
        let groups = presets::load_presets(path)?;
        tracing::info!("📋 Loaded {} preset groups from {}", groups.len(), path);
        merge_seed(&mut seeds, groups);
    }

    let from_env = presets::parse_groups_json(config.webhook_groups_json())?;
    if !from_env.is_empty() {
        tracing::info!("📋 Loaded {} groups from WEBHOOK_GROUPS", from_env.len());
    }
    merge_seed(&mut seeds, from_env);

    Ok(seeds)
}

fn merge_seed(seeds: &mut BTreeMap<String, GroupRecord>, incoming: BTreeMap<String, GroupRecord>) {
    for (group_id, record) in incoming {
        let group_id = sanitize_group_id(&group_id);
        match seeds.get_mut(&group_id) {
            Some(existing) => {
                if existing.display_name.is_none() {
                    existing.display_name = record.display_name;
                }
                for webhook in record.webhooks {
                    if !existing.webhooks.iter().any(|wh| wh.url == webhook.url) {
                        existing.webhooks.push(webhook);
                    }
                }
            }
            None => {
                seeds.insert(group_id, record);
            }
        }
    }
}
