// Adapters layer: concrete implementations of the domain ports over HTTP.

pub mod feishu;
pub mod notifier;

pub use feishu::FeishuImageUploader;
pub use notifier::HttpNotifier;
