//! # GET|HEAD <prefix>/<チェーン>
//!
//! 変換チェーンのURLに応答する。
//! 検証 → デコード → 実行 → MIMEタイプ解決の順に進み、
//! `If-None-Match` がETagに一致すれば実行せずに304を返す。

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::Response;

use katachi_core::Rendered;

use crate::config::AppState;
use crate::error::ServerError;

/// `If-None-Match` がETagに一致するか。`*` とカンマ区切りの列挙、弱いETagを扱う。
fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag)
}

fn header_value(value: &str) -> Result<HeaderValue, ServerError> {
    HeaderValue::from_str(value)
        .map_err(|e| ServerError::BadRequest(format!("ヘッダ値にできません ({value:?}): {e}")))
}

/// `Content-Disposition` の値。ファイル名はASCIIに限って付ける。
fn content_disposition(rendered: &Rendered) -> String {
    match rendered.filename() {
        Some(name)
            if name
                .chars()
                .all(|c| c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\')) =>
        {
            format!("inline; filename=\"{name}\"")
        }
        _ => "inline".to_string(),
    }
}

fn not_modified(etag: &str, cache_control: &str) -> Result<Response, ServerError> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::NOT_MODIFIED;
    let headers = response.headers_mut();
    headers.insert(header::ETAG, header_value(etag)?);
    headers.insert(header::CACHE_CONTROL, header_value(cache_control)?);
    Ok(response)
}

/// 変換チェーンのURLへのリクエストを処理する。
pub async fn handle_transform(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response, ServerError> {
    if method != Method::GET && method != Method::HEAD {
        return Err(ServerError::MethodNotAllowed(method.to_string()));
    }
    let service = &state.service;

    // デコード済みのパスではなく受信したままのパスを使う
    let job = service.decode_request(uri.path(), uri.query())?;
    let etag = service.etag(&job)?;
    if etag_matches(&headers, &etag) {
        tracing::debug!(path = %uri.path(), "ETagが一致したため304を返します");
        return not_modified(&etag, &service.config().cache_control());
    }

    let rendered = tokio::time::timeout(state.request_timeout, service.render(&job))
        .await
        .map_err(|_| {
            tracing::warn!(path = %uri.path(), timeout = ?state.request_timeout, "処理がタイムアウトしました");
            ServerError::Timeout
        })??;

    let disposition = content_disposition(&rendered);
    let data = rendered.content.read_data().await?.into_owned();
    let length = data.len();
    tracing::info!(
        path = %uri.path(),
        mime_type = %rendered.mime_type,
        size = length,
        "変換結果を返します"
    );

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        Body::from(data)
    };
    let mut response = Response::new(body);
    let out = response.headers_mut();
    out.insert(header::CONTENT_TYPE, header_value(&rendered.mime_type)?);
    out.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    out.insert(header::CACHE_CONTROL, header_value(&rendered.cache_control)?);
    out.insert(header::ETAG, header_value(&rendered.etag)?);
    out.insert(header::CONTENT_DISPOSITION, header_value(&disposition)?);
    Ok(response)
}
