use crate::domain::model::GroupRecord;
use crate::utils::error::{RelayError, Result};
use crate::utils::validation::validate_webhook_url;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// 預設群組檔（TOML），只在沒有 JSON 配置文件時使用
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PresetFile {
    #[serde(default)]
    pub groups: BTreeMap<String, GroupRecord>,
}

impl PresetFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        // 處理環境變數替換
        let processed = substitute_env_vars(content)?;

        toml::from_str(&processed).map_err(|e| RelayError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 丟掉沒有 URL 或 URL 無效（例如未解析的 `${VAR}`）的 Webhook
    pub fn into_groups(self) -> BTreeMap<String, GroupRecord> {
        let mut groups = self.groups;
        for (group_id, record) in groups.iter_mut() {
            record.webhooks.retain(|wh| {
                if wh.url.is_empty() {
                    return false;
                }
                match validate_webhook_url("url", &wh.url) {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!("⚠️ [{}] Skipping preset webhook: {}", group_id, e);
                        false
                    }
                }
            });
        }
        groups
    }
}

/// 替換環境變數 (例如 ${DISCORD_A_URL})，找不到的保留原樣
pub fn substitute_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| RelayError::ConfigError {
        message: format!("Invalid placeholder pattern: {}", e),
    })?;

    let result = re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    });

    Ok(result.to_string())
}

pub fn load_presets(path: &str) -> Result<BTreeMap<String, GroupRecord>> {
    Ok(PresetFile::from_file(path)?.into_groups())
}

/// `WEBHOOK_GROUPS` 環境變數：與配置文件 `groups` 相同的 JSON 結構
pub fn parse_groups_json(json: &str) -> Result<BTreeMap<String, GroupRecord>> {
    if json.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let groups: BTreeMap<String, GroupRecord> =
        serde_json::from_str(json).map_err(|e| RelayError::InvalidConfigValueError {
            field: "WEBHOOK_GROUPS".to_string(),
            value: crate::domain::model::truncate_chars(json, 40),
            reason: e.to_string(),
        })?;

    Ok(PresetFile { groups }.into_groups())
}
