/// 純文字 BOSS 偵測訊息的預設過濾關鍵字
pub const DEFAULT_FILTER_KEYWORDS: &[&str] = &["偵測到HP血條", "BOSS存在", "⏰ 時間:", "🩸"];

/// 沒有圖片且命中關鍵字的訊息不轉發
#[derive(Debug, Clone)]
pub struct MessageFilter {
    keywords: Vec<String>,
}

impl MessageFilter {
    pub fn new(keywords: Vec<String>) -> Self {
        let keywords = keywords
            .into_iter()
            .filter(|k| !k.is_empty())
            .collect();
        Self { keywords }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn should_drop(&self, content: &str, has_image: bool) -> bool {
        if has_image || content.is_empty() {
            return false;
        }
        self.keywords.iter().any(|k| content.contains(k.as_str()))
    }
}

impl Default for MessageFilter {
    fn default() -> Self {
        Self::new(DEFAULT_FILTER_KEYWORDS.iter().map(|k| k.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_only_detection_is_dropped() {
        let filter = MessageFilter::default();
        assert!(filter.should_drop("偵測到HP血條 50%", false));
        assert!(filter.should_drop("🩸 BOSS", false));
        assert!(!filter.should_drop("普通訊息", false));
    }

    #[test]
    fn test_messages_with_images_pass() {
        let filter = MessageFilter::default();
        assert!(!filter.should_drop("偵測到HP血條", true));
    }

    #[test]
    fn test_empty_keywords_are_ignored() {
        let filter = MessageFilter::new(vec![String::new()]);
        assert!(filter.keywords().is_empty());
        assert!(!filter.should_drop("anything", false));
    }
}
