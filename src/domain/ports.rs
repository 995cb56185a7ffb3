use crate::domain::model::{FeishuCredentials, OutboundMessage, Snapshot, WebhookKind};
use crate::utils::error::Result;
use async_trait::async_trait;

/// 下游聊天平台的發送端
#[async_trait]
pub trait Notifier: Send + Sync {
    /// 發送一則訊息；失敗以 `Err` 回報，由呼叫端決定如何記錄
    async fn send(&self, kind: WebhookKind, url: &str, message: &OutboundMessage) -> Result<()>;

    /// 預先上傳圖片到飛書，回傳 image_key
    async fn upload_feishu_image(&self, image: &[u8]) -> Result<String>;

    /// 熱更新飛書應用憑證
    fn set_feishu_credentials(&self, credentials: FeishuCredentials);
}

/// 配置快照的存放位置
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> Result<Option<Snapshot>>;
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;
    fn location(&self) -> String;
}

pub trait ConfigProvider: Send + Sync {
    fn config_file(&self) -> &str;
    fn presets_file(&self) -> Option<&str>;
    fn webhook_groups_json(&self) -> &str;
    fn timezone_offset(&self) -> i32;
    fn filter_keywords(&self) -> &[String];
    fn feishu_credentials(&self) -> FeishuCredentials;
    fn save_delay_ms(&self) -> u64;
}
