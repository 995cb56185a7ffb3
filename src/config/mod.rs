pub mod presets;
pub mod store;

use crate::core::ConfigProvider;
use crate::domain::model::FeishuCredentials;
use crate::utils::error::Result;
use crate::utils::validation::{
    validate_non_empty_string, validate_path, validate_positive_number, validate_range,
    validate_url, Validate,
};
use clap::Parser;
use serde::{Deserialize, Serialize};

pub const DEFAULT_FEISHU_API_BASE: &str = "https://open.feishu.cn/open-apis";

#[derive(Debug, Clone, Serialize, Deserialize, Parser)]
#[command(name = "webhook-relay")]
#[command(about = "Relay BOSS notifications to Discord, Feishu and WeCom webhooks")]
pub struct CliConfig {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true, help = "Empty disables admin auth")]
    pub admin_password: Option<String>,

    #[arg(long, env = "CONFIG_FILE", default_value = "webhook_config.json")]
    pub config_file: String,

    #[arg(long, env = "WEBHOOK_PRESETS", help = "TOML preset groups used when no config file exists")]
    pub presets: Option<String>,

    #[arg(long, env = "WEBHOOK_GROUPS", default_value = "{}")]
    pub webhook_groups: String,

    #[arg(long, env = "FEISHU_APP_ID", default_value = "")]
    pub feishu_app_id: String,

    #[arg(long, env = "FEISHU_APP_SECRET", default_value = "", hide_env_values = true)]
    pub feishu_app_secret: String,

    #[arg(long, env = "FEISHU_API_BASE", default_value = DEFAULT_FEISHU_API_BASE)]
    pub feishu_api_base: String,

    #[arg(long, env = "TIMEZONE_OFFSET", default_value_t = 8, allow_negative_numbers = true)]
    pub timezone_offset: i32,

    #[arg(
        long,
        env = "FILTER_KEYWORDS",
        value_delimiter = ',',
        default_value = "偵測到HP血條,BOSS存在,⏰ 時間:,🩸"
    )]
    pub filter_keywords: Vec<String>,

    #[arg(long, env = "ALLOW_LOCAL_ATTACHMENTS", help = "Allow attachment URLs pointing at local files")]
    pub allow_local_attachments: bool,

    #[arg(long, env = "SAVE_DELAY_MS", default_value_t = 2000)]
    pub save_delay_ms: u64,

    #[arg(long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, env = "JSON_LOGS", help = "Emit JSON log lines")]
    pub json_logs: bool,

    #[arg(long, help = "Include process CPU / memory in /api/stats")]
    pub monitor: bool,
}

impl CliConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 空字串視為未設定密碼
    pub fn admin_password(&self) -> Option<&str> {
        self.admin_password.as_deref().filter(|p| !p.is_empty())
    }
}

impl ConfigProvider for CliConfig {
    fn config_file(&self) -> &str {
        &self.config_file
    }

    fn presets_file(&self) -> Option<&str> {
        self.presets.as_deref().filter(|p| !p.is_empty())
    }

    fn webhook_groups_json(&self) -> &str {
        &self.webhook_groups
    }

    fn timezone_offset(&self) -> i32 {
        self.timezone_offset
    }

    fn filter_keywords(&self) -> &[String] {
        &self.filter_keywords
    }

    fn feishu_credentials(&self) -> FeishuCredentials {
        FeishuCredentials::new(self.feishu_app_id.trim(), self.feishu_app_secret.trim())
    }

    fn save_delay_ms(&self) -> u64 {
        self.save_delay_ms
    }
}

impl Validate for CliConfig {
    fn validate(&self) -> Result<()> {
        validate_non_empty_string("host", &self.host)?;
        validate_positive_number("port", self.port as u64, 1)?;
        validate_path("config_file", &self.config_file)?;
        if let Some(presets) = self.presets_file() {
            validate_path("presets", presets)?;
        }
        validate_url("feishu_api_base", &self.feishu_api_base)?;
        validate_range("timezone_offset", self.timezone_offset, -12, 14)?;
        validate_positive_number("save_delay_ms", self.save_delay_ms, 1)?;
        Ok(())
    }
}
