use clap::Parser;
use std::sync::Arc;
use webhook_relay::utils::error::{ErrorSeverity, RelayError};
use webhook_relay::utils::monitor::SystemMonitor;
use webhook_relay::utils::{logger, validation::Validate};
use webhook_relay::{AppState, CliConfig, HttpNotifier, JsonFileStore, RelayManager};

fn exit_with(e: &RelayError) -> ! {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ Webhook relay failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    // 輸出用戶友好的錯誤信息
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}

async fn run(config: CliConfig) -> webhook_relay::Result<()> {
    let http = reqwest::Client::builder().build()?;
    let notifier = Arc::new(HttpNotifier::new(http.clone(), &config.feishu_api_base));
    let store = Arc::new(JsonFileStore::new(&config.config_file));

    let monitor = SystemMonitor::new(config.monitor);
    if monitor.is_enabled() {
        tracing::info!("🔍 System monitoring enabled");
    }

    let manager = RelayManager::load(&config, store, notifier, monitor).await?;
    let autosave = manager.spawn_autosave();
    manager.log_system_stats("Startup");

    tracing::info!(
        "🔐 Admin password: {}",
        if config.admin_password().is_some() { "enabled" } else { "disabled" }
    );
    if config.allow_local_attachments {
        tracing::warn!("⚠️ Local file attachments are allowed");
    }

    let state = AppState::new(manager, http)
        .with_admin_password(config.admin_password())
        .with_local_attachments(config.allow_local_attachments);

    let result = webhook_relay::serve(state, &config.bind_address()).await;
    if let Some(task) = autosave {
        task.abort();
    }
    result
}

#[tokio::main]
async fn main() {
    let config = CliConfig::parse();

    // 初始化日誌
    if config.json_logs {
        logger::init_json_logger(config.verbose);
    } else {
        logger::init_cli_logger(config.verbose);
    }

    tracing::info!("Starting webhook-relay");
    if config.verbose {
        tracing::debug!("Listen address: {}", config.bind_address());
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        exit_with(&e);
    }

    if let Err(e) = run(config).await {
        exit_with(&e);
    }
}
