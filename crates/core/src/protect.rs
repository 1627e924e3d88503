//! # 署名付きURL
//!
//! サービス自身が発行した署名を持つリクエストだけに変換の実行を許す。
//! 署名はパスプレフィックスを除いたチェーンのパスに対して計算し、
//! クエリパラメータ `sha` で運ぶ。

use std::collections::BTreeMap;

use url::form_urlencoded;

use katachi_crypto::{check_signature_length, sign_path, verify_path_signature, CryptoError};
use katachi_types::SIGNATURE_PARAM;

use crate::error::{CoreError, CoreResult};

/// 署名長のデフォルト値。
pub const DEFAULT_SHA_LENGTH: usize = 16;

/// クエリパラメータ。
pub type QueryParams = BTreeMap<String, String>;

fn config_error(e: CryptoError) -> CoreError {
    CoreError::Configuration(e.to_string())
}

/// `path` に対する署名パラメータを発行する。
pub fn issue(path: &str, secret: &str, sha_length: usize) -> CoreResult<QueryParams> {
    let signature = sign_path(secret, path, sha_length).map_err(config_error)?;
    Ok(QueryParams::from([(SIGNATURE_PARAM.to_string(), signature)]))
}

/// `params` に含まれる署名が `path` に対して正しいかを検証する。
/// 署名パラメータの欠落・長さ違いは `false`。
pub fn verify(path: &str, params: &QueryParams, secret: &str, sha_length: usize) -> bool {
    match params.get(SIGNATURE_PARAM) {
        Some(signature) => verify_path_signature(secret, path, signature, sha_length),
        None => false,
    }
}

/// クエリ文字列をパースする。同じキーが複数ある場合は最初の値を使う。
pub fn parse_query(query: &str) -> QueryParams {
    let mut params = QueryParams::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        params.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }
    params
}

/// クエリパラメータをクエリ文字列にする。
pub fn to_query(params: &QueryParams) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params.iter())
        .finish()
}

/// 秘密鍵と署名長を束ねた署名器。
#[derive(Clone)]
pub struct UrlProtector {
    secret: String,
    sha_length: usize,
}

impl UrlProtector {
    /// 空の秘密鍵や範囲外の署名長は設定エラー。
    pub fn new(secret: impl Into<String>, sha_length: usize) -> CoreResult<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(CoreError::Configuration("秘密鍵が空です".to_string()));
        }
        check_signature_length(sha_length).map_err(config_error)?;
        Ok(Self { secret, sha_length })
    }

    pub fn sha_length(&self) -> usize {
        self.sha_length
    }

    pub fn issue(&self, path: &str) -> CoreResult<QueryParams> {
        issue(path, &self.secret, self.sha_length)
    }

    pub fn verify(&self, path: &str, params: &QueryParams) -> bool {
        verify(path, params, &self.secret, self.sha_length)
    }
}

impl std::fmt::Debug for UrlProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlProtector")
            .field("secret", &"<redacted>")
            .field("sha_length", &self.sha_length)
            .finish()
    }
}
