use crate::server::AppState;
use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

const REALM: &str = "Basic realm=\"Webhook Relay Admin\"";

/// 取出 HTTP Basic 認證中的密碼；帳號不檢查
pub fn basic_password(header: &str) -> Option<String> {
    let (scheme, encoded) = header.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }

    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (_, password) = credentials.split_once(':')?;
    Some(password.to_string())
}

/// 設定了管理密碼時，管理介面與 API 需要 Basic 認證
pub async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.admin_password.as_deref() else {
        return next.run(request).await;
    };

    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(basic_password)
        .is_some_and(|password| password == expected);

    if authorized {
        next.run(request).await
    } else {
        tracing::warn!("🔒 Rejected admin request to {}", request.uri().path());
        (
            StatusCode::UNAUTHORIZED,
            [(WWW_AUTHENTICATE, REALM)],
            "需要密碼才能訪問管理介面\n",
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_password() {
        // admin:s3cret
        assert_eq!(
            basic_password("Basic YWRtaW46czNjcmV0").as_deref(),
            Some("s3cret")
        );
        // anyone:pa:ss
        assert_eq!(
            basic_password("basic YW55b25lOnBhOnNz").as_deref(),
            Some("pa:ss")
        );
        assert!(basic_password("Bearer abc").is_none());
        assert!(basic_password("Basic !!!").is_none());
        assert!(basic_password("Basic").is_none());
    }
}
