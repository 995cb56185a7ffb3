use crate::utils::error::{RelayError, Result};
use chrono::{DateTime, FixedOffset, Utc};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// 以固定 UTC 偏移計算的本地時鐘（排程判斷、歷史紀錄、訊息時間戳共用）
#[derive(Debug, Clone, Copy)]
pub struct LocalClock {
    offset: FixedOffset,
    offset_hours: i32,
    frozen: Option<DateTime<FixedOffset>>,
}

impl LocalClock {
    pub fn new(offset_hours: i32) -> Result<Self> {
        let offset = FixedOffset::east_opt(offset_hours * 3600).ok_or_else(|| {
            RelayError::InvalidConfigValueError {
                field: "timezone_offset".to_string(),
                value: offset_hours.to_string(),
                reason: "Offset is out of range".to_string(),
            }
        })?;
        Ok(Self {
            offset,
            offset_hours,
            frozen: None,
        })
    }

    /// 固定在某個時間點的時鐘，測試用
    pub fn frozen(at: DateTime<FixedOffset>) -> Self {
        let offset = *at.offset();
        Self {
            offset,
            offset_hours: offset.local_minus_utc() / 3600,
            frozen: Some(at),
        }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        match self.frozen {
            Some(at) => at,
            None => Utc::now().with_timezone(&self.offset),
        }
    }

    pub fn now_string(&self) -> String {
        self.now().format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn format_now(&self, fmt: &str) -> String {
        self.now().format(fmt).to_string()
    }

    /// 例如 `UTC+8`、`UTC-5`
    pub fn label(&self) -> String {
        if self.offset_hours >= 0 {
            format!("UTC+{}", self.offset_hours)
        } else {
            format!("UTC{}", self.offset_hours)
        }
    }
}
