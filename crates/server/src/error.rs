//! # サーバーエラー型
//!
//! Coreのエラー分類をHTTPステータスに対応付ける。

use axum::http::StatusCode;
use katachi_core::{CoreError, DataStoreError};

/// サーバーエラー型。
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// 変換チェーンの構築・検証・実行での失敗
    #[error(transparent)]
    Core(#[from] CoreError),
    /// APIキーが一致しない
    #[error("認証に失敗しました")]
    Unauthorized,
    /// 運用エンドポイントが無効（APIキー未設定）
    #[error("この操作は無効化されています")]
    Forbidden,
    /// 許可されていないメソッド
    #[error("許可されていないメソッドです: {0}")]
    MethodNotAllowed(String),
    /// 処理時間の上限を超えた
    #[error("処理がタイムアウトしました")]
    Timeout,
    /// 不正なリクエスト
    #[error("不正なリクエスト: {0}")]
    BadRequest(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Core(e) => match e {
                CoreError::Parse(_) | CoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
                CoreError::Verification(_) => StatusCode::FORBIDDEN,
                CoreError::UnregisteredCapability { .. } | CoreError::UnsupportedFormat { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                CoreError::DataStore(DataStoreError::NotFound(_)) => StatusCode::NOT_FOUND,
                CoreError::DataStore(DataStoreError::InvalidUid(_)) => StatusCode::BAD_REQUEST,
                CoreError::DataStore(_) => StatusCode::BAD_GATEWAY,
                CoreError::Configuration(_) | CoreError::Operation { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ServerError::Unauthorized => StatusCode::UNAUTHORIZED,
            ServerError::Forbidden => StatusCode::FORBIDDEN,
            ServerError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ServerError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl axum::response::IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        match &self {
            // 拒否は実行前に起きるのでwarnに留める
            ServerError::Core(e) if e.is_rejection() => {
                tracing::warn!(status = %status, error = %e, "リクエストを拒否しました");
            }
            _ if status.is_server_error() => {
                tracing::error!(status = %status, error = %self, "リクエストの処理に失敗しました");
            }
            _ => {
                tracing::debug!(status = %status, error = %self, "リクエストエラー");
            }
        }
        (status, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use katachi_types::StepKind;

    /// エラー分類ごとのステータスコードを確認
    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServerError::from(CoreError::Parse("x".into())), 400),
            (CoreError::InvalidArgument("x".into()).into(), 400),
            (CoreError::Verification("x".into()).into(), 403),
            (
                CoreError::UnregisteredCapability {
                    kind: StepKind::Process,
                    name: Some("resize".into()),
                }
                .into(),
                422,
            ),
            (
                CoreError::UnsupportedFormat {
                    kind: StepKind::Encode,
                    name: "jpg".into(),
                    format: "pdf".into(),
                }
                .into(),
                422,
            ),
            (CoreError::from(DataStoreError::NotFound("a".into())).into(), 404),
            (CoreError::from(DataStoreError::InvalidUid("..".into())).into(), 400),
            (CoreError::from(DataStoreError::Backend("down".into())).into(), 502),
            (CoreError::Configuration("x".into()).into(), 500),
            (CoreError::operation("thumb", "broken").into(), 500),
            (ServerError::Unauthorized, 401),
            (ServerError::Forbidden, 403),
            (ServerError::MethodNotAllowed("POST".into()), 405),
            (ServerError::Timeout, 504),
        ];
        for (error, expected) in cases {
            assert_eq!(error.status().as_u16(), expected, "{error}");
        }
    }
}
