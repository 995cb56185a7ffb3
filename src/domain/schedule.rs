//! 日期時段排程：每個 Webhook 可以設定多組「指定日期 + 時段」。

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M";
const MAX_INFO_ENTRIES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    #[default]
    Off,
    DateRange,
}

impl ScheduleMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(ScheduleMode::Off),
            "date_range" => Some(ScheduleMode::DateRange),
            _ => None,
        }
    }
}

/// 單筆排程；時段兩端皆包含，`start > end` 代表跨午夜
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawScheduleEntry")]
pub struct ScheduleEntry {
    #[serde(serialize_with = "serialize_date")]
    pub date: NaiveDate,
    #[serde(serialize_with = "serialize_hhmm")]
    pub start_time: NaiveTime,
    #[serde(serialize_with = "serialize_hhmm")]
    pub end_time: NaiveTime,
}

/// API 與舊配置文件送來的原始排程欄位
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawScheduleEntry {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

impl TryFrom<RawScheduleEntry> for ScheduleEntry {
    type Error = String;

    fn try_from(raw: RawScheduleEntry) -> Result<Self, Self::Error> {
        let field = |value: Option<String>, name: &str| -> Result<String, String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| format!("missing {}", name))
        };

        let date = field(raw.date, "date")?;
        let start = field(raw.start_time, "start_time")?;
        let end = field(raw.end_time, "end_time")?;

        Ok(Self {
            date: NaiveDate::parse_from_str(&date, DATE_FORMAT)
                .map_err(|e| format!("invalid date '{}': {}", date, e))?,
            start_time: parse_hhmm(&start)?,
            end_time: parse_hhmm(&end)?,
        })
    }
}

impl ScheduleEntry {
    pub fn new(date: NaiveDate, start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            date,
            start_time,
            end_time,
        }
    }

    /// 當前分鐘是否落在此排程的時段內（只比較時段，不比較日期）
    fn covers(&self, minute: NaiveTime) -> bool {
        if self.start_time <= self.end_time {
            self.start_time <= minute && minute <= self.end_time
        } else {
            minute >= self.start_time || minute <= self.end_time
        }
    }

    fn sort_key(&self) -> (NaiveDate, NaiveTime) {
        (self.date, self.start_time)
    }
}

pub fn parse_hhmm(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT)
        .map_err(|e| format!("invalid time '{}': {}", value, e))
}

fn serialize_date<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&date.format(DATE_FORMAT).to_string())
}

fn serialize_hhmm<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.format(TIME_FORMAT).to_string())
}

/// 驗證排程列表，缺欄位或格式錯誤的項目直接丟棄
pub fn validate_entries(raw: Vec<RawScheduleEntry>) -> Vec<ScheduleEntry> {
    raw.into_iter()
        .filter_map(|entry| match ScheduleEntry::try_from(entry) {
            Ok(entry) => Some(entry),
            Err(reason) => {
                tracing::debug!("Dropping schedule entry: {}", reason);
                None
            }
        })
        .collect()
}

/// 載入配置文件時容忍個別壞掉的排程項
pub fn deserialize_lenient<'de, D>(deserializer: D) -> Result<Vec<ScheduleEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<RawScheduleEntry>::deserialize(deserializer)?;
    Ok(validate_entries(raw))
}

pub fn is_in_schedule(
    mode: ScheduleMode,
    schedules: &[ScheduleEntry],
    now: &DateTime<FixedOffset>,
) -> bool {
    if mode == ScheduleMode::Off {
        return true;
    }

    let today = now.date_naive();
    // 精度到分鐘，與管理介面的 HH:MM 一致
    let minute = now
        .time()
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or_else(|| now.time());

    schedules
        .iter()
        .filter(|entry| entry.date == today)
        .any(|entry| entry.covers(minute))
}

/// 排程摘要，例如 `2/23 12:00-22:00 | 2/24 00:00-12:00 (+2)`
pub fn schedule_info(mode: ScheduleMode, schedules: &[ScheduleEntry], today: NaiveDate) -> String {
    if mode == ScheduleMode::Off {
        return String::new();
    }

    if schedules.is_empty() {
        return "排程: 無排程項".to_string();
    }

    let mut upcoming: Vec<&ScheduleEntry> =
        schedules.iter().filter(|entry| entry.date >= today).collect();
    upcoming.sort_by_key(|entry| entry.sort_key());

    if upcoming.is_empty() {
        return "排程: 已全部過期".to_string();
    }

    let parts: Vec<String> = upcoming
        .iter()
        .take(MAX_INFO_ENTRIES)
        .map(|entry| {
            format!(
                "{} {}-{}",
                entry.date.format("%-m/%-d"),
                entry.start_time.format(TIME_FORMAT),
                entry.end_time.format(TIME_FORMAT)
            )
        })
        .collect();

    let mut info = parts.join(" | ");
    if upcoming.len() > MAX_INFO_ENTRIES {
        info.push_str(&format!(" (+{})", upcoming.len() - MAX_INFO_ENTRIES));
    }
    info
}
