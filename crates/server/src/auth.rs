//! # 運用エンドポイントの認証
//!
//! `x-api-key` ヘッダを設定済みのAPIキーと定数時間で比較する。
//! APIキーが未設定なら運用エンドポイントは常に403を返す。

use axum::http::HeaderMap;

use crate::config::AppState;
use crate::error::ServerError;

/// APIキーを運ぶヘッダ名。
pub const API_KEY_HEADER: &str = "x-api-key";

pub(crate) fn require_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), ServerError> {
    let Some(expected) = &state.api_key else {
        return Err(ServerError::Forbidden);
    };
    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if katachi_crypto::constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        tracing::warn!("APIキーが一致しません");
        Err(ServerError::Unauthorized)
    }
}
