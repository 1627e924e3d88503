//! # POST /url
//!
//! 変換チェーンの（署名付き）URL発行（運用エンドポイント）。

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use katachi_core::Job;
use katachi_types::{UrlRequest, UrlResponse};

use crate::auth::require_api_key;
use crate::config::AppState;
use crate::error::ServerError;

/// POST /url: チェーン（と末尾のテンプレート）のURLを返す。
pub async fn handle_url(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<UrlRequest>,
) -> Result<Json<UrlResponse>, ServerError> {
    require_api_key(&state, &headers)?;

    let service = &state.service;
    let mut job = Job::from_spec(body.chain);
    if let Some(template) = body.template {
        job = service.apply_template(&job, &template.name, &template.args)?;
    }
    let url = service.url_for(&job)?;
    tracing::debug!(url = %url, "URLを発行しました");
    Ok(Json(UrlResponse { url }))
}
