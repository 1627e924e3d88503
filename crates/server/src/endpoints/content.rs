//! # POST /content, DELETE /content/{uid}
//!
//! データストアへのコンテンツの保存と削除（運用エンドポイント）。

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;

use katachi_core::{Content, StoreOptions};
use katachi_types::UploadResponse;

use crate::auth::require_api_key;
use crate::config::AppState;
use crate::error::ServerError;

/// POST /content のクエリ。
#[derive(Debug, Default, Deserialize)]
pub struct UploadParams {
    /// 元のファイル名
    pub name: Option<String>,
    /// 明示的なフォーマット
    pub format: Option<String>,
    /// MIMEタイプの上書き
    pub mime_type: Option<String>,
}

/// POST /content: 本文をデータストアに保存し、取得用URLを返す。
pub async fn handle_upload(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<Json<UploadResponse>, ServerError> {
    require_api_key(&state, &headers)?;
    if body.is_empty() {
        return Err(ServerError::BadRequest(
            "コンテンツは1バイト以上である必要があります".to_string(),
        ));
    }

    let mut content = Content::new(body.to_vec());
    if let Some(name) = params.name.filter(|s| !s.is_empty()) {
        content = content.with_name(name);
    }
    if let Some(format) = params.format.filter(|s| !s.is_empty()) {
        content = content.with_format(format);
    }
    if let Some(mime_type) = params.mime_type.filter(|s| !s.is_empty()) {
        content = content.with_mime_type(mime_type);
    }

    let service = &state.service;
    let uid = service.store(&content, &StoreOptions::default()).await?;
    let url = service.url_for(&service.fetch(uid.as_str()))?;
    Ok(Json(UploadResponse { uid, url }))
}

/// DELETE /content/{uid}: データストアから削除する。存在しなくても成功。
pub async fn handle_delete(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(uid): Path<String>,
) -> Result<StatusCode, ServerError> {
    require_api_key(&state, &headers)?;
    state.service.destroy(&uid).await?;
    Ok(StatusCode::NO_CONTENT)
}
