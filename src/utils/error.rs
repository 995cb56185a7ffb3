use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}' ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },

    #[error("{service} API error: {message}")]
    UpstreamError { service: String, message: String },

    #[error("Delivery to '{target}' failed: {message}")]
    DeliveryError { target: String, message: String },

    #[error("{what} not found: {id}")]
    NotFound { what: String, id: String },
}

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Storage,
    Input,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl RelayError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            RelayError::ConfigError { .. }
            | RelayError::InvalidConfigValueError { .. }
            | RelayError::MissingConfigError { .. } => ErrorCategory::Configuration,
            RelayError::HttpError(_)
            | RelayError::UpstreamError { .. }
            | RelayError::DeliveryError { .. } => ErrorCategory::Network,
            RelayError::IoError(_) | RelayError::SerializationError(_) => ErrorCategory::Storage,
            RelayError::ValidationError { .. } | RelayError::NotFound { .. } => {
                ErrorCategory::Input
            }
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RelayError::ValidationError { .. } | RelayError::NotFound { .. } => {
                ErrorSeverity::Low
            }
            RelayError::HttpError(_)
            | RelayError::UpstreamError { .. }
            | RelayError::DeliveryError { .. } => ErrorSeverity::Medium,
            RelayError::SerializationError(_) => ErrorSeverity::High,
            RelayError::ConfigError { .. }
            | RelayError::InvalidConfigValueError { .. }
            | RelayError::MissingConfigError { .. }
            | RelayError::IoError(_) => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => {
                "檢查命令列參數與環境變數（PORT、CONFIG_FILE、TIMEZONE_OFFSET 等）".to_string()
            }
            ErrorCategory::Network => "確認目標 Webhook URL 與網路連線是否正常".to_string(),
            ErrorCategory::Storage => "確認配置文件路徑可寫入且 JSON 格式正確".to_string(),
            ErrorCategory::Input => "檢查請求內容後再試一次".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            RelayError::InvalidConfigValueError { field, reason, .. } => {
                format!("配置項 {} 無效：{}", field, reason)
            }
            RelayError::MissingConfigError { field } => format!("缺少必要配置：{}", field),
            RelayError::ConfigError { message } => format!("配置錯誤：{}", message),
            RelayError::IoError(e) => format!("檔案讀寫失敗：{}", e),
            RelayError::SerializationError(e) => format!("JSON 解析失敗：{}", e),
            other => other.to_string(),
        }
    }

    /// 管理 API 回給前端的訊息
    pub fn api_message(&self) -> String {
        match self {
            RelayError::ValidationError { message } => message.clone(),
            RelayError::NotFound { what, .. } if what == "group" => "群組不存在".to_string(),
            RelayError::NotFound { what, .. } if what == "webhook" => "找不到此 Webhook".to_string(),
            other => other.to_string(),
        }
    }
}
