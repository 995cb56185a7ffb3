//! HTTP 介面：公開的 Webhook 接收端點、健康檢查，以及需要密碼的管理 API。

pub mod admin;
pub mod auth;
pub mod ingest;

use crate::core::RelayManager;
use crate::utils::error::Result;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;

pub(crate) const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<RelayManager>,
    pub http: reqwest::Client,
    pub admin_password: Option<Arc<str>>,
    pub allow_local_attachments: bool,
    pub max_attachment_bytes: usize,
}

impl AppState {
    pub fn new(manager: Arc<RelayManager>, http: reqwest::Client) -> Self {
        Self {
            manager,
            http,
            admin_password: None,
            allow_local_attachments: false,
            max_attachment_bytes: MAX_BODY_BYTES,
        }
    }

    pub fn with_admin_password(mut self, password: Option<&str>) -> Self {
        self.admin_password = password.filter(|p| !p.is_empty()).map(Arc::from);
        self
    }

    pub fn with_local_attachments(mut self, allow: bool) -> Self {
        self.allow_local_attachments = allow;
        self
    }

    pub fn with_max_attachment_bytes(mut self, limit: usize) -> Self {
        self.max_attachment_bytes = limit;
        self
    }
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/", get(admin::dashboard))
        .route("/api/stats", get(admin::stats))
        .route(
            "/api/feishu/credentials",
            get(admin::feishu_credentials).post(admin::update_feishu_credentials),
        )
        .route("/api/group", post(admin::create_group))
        .route("/api/group/{group_id}", axum::routing::delete(admin::delete_group))
        .route("/api/group/{group_id}/mode", post(admin::set_mode))
        .route("/api/group/{group_id}/webhook", post(admin::add_webhook))
        .route(
            "/api/group/{group_id}/webhook/{webhook_id}",
            axum::routing::delete(admin::remove_webhook).patch(admin::rename_webhook),
        )
        .route(
            "/api/group/{group_id}/webhook/{webhook_id}/toggle",
            post(admin::toggle_webhook),
        )
        .route(
            "/api/group/{group_id}/webhook/{webhook_id}/fixed",
            post(admin::set_fixed),
        )
        .route(
            "/api/group/{group_id}/webhook/{webhook_id}/schedule",
            post(admin::set_schedule),
        )
        .route(
            "/api/group/{group_id}/webhook/{webhook_id}/test",
            post(admin::test_webhook),
        )
        .route("/api/save", post(admin::force_save))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_admin));

    Router::new()
        .route("/webhook/{group_id}", post(ingest::receive))
        .route("/webhook", post(ingest::receive_default))
        .route("/health", get(admin::health))
        .merge(admin)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// 啟動伺服器，收到關機訊號後做最後一次保存
pub async fn serve(state: AppState, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("🌐 Listening on http://{}", listener.local_addr()?);

    let manager = state.manager.clone();
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("🛑 Shutting down, saving configuration");
    manager.log_system_stats("Shutdown");
    manager.force_save().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("❌ Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("❌ Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
