//! # サービス設定
//!
//! 認識する設定項目とそのデフォルト値を列挙した固定のレコード。
//! 未知のキーは受け付けず、妥当性はサービス構築時にまとめて検証する。

use serde::{Deserialize, Serialize};

use katachi_crypto::check_signature_length;

use crate::error::{CoreError, CoreResult};
use crate::protect::DEFAULT_SHA_LENGTH;

/// キャッシュ有効期間のデフォルト（1年、秒）。
pub const DEFAULT_CACHE_DURATION: u64 = 365 * 24 * 60 * 60;

/// フォールバックMIMEタイプのデフォルト。
pub const DEFAULT_FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// `ServiceConfig::set` が受け付けるキー。
pub const CONFIG_KEYS: &[&str] = &[
    "cache_duration",
    "fallback_mime_type",
    "path_prefix",
    "protect_from_dos_attacks",
    "secret",
    "sha_length",
    "infer_mime_type_from_file_ext",
];

/// サービス設定。
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Cache-Controlのmax-age（秒）
    pub cache_duration: u64,
    /// MIMEタイプが決まらなかった場合の値
    pub fallback_mime_type: String,
    /// URLパスの前置部分（空ならルート）
    pub path_prefix: String,
    /// 署名のないリクエストを拒否するか
    pub protect_from_dos_attacks: bool,
    /// 署名用の秘密鍵
    pub secret: Option<String>,
    /// 署名の文字数
    pub sha_length: usize,
    /// ファイル拡張子からMIMEタイプを推定するか
    pub infer_mime_type_from_file_ext: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            cache_duration: DEFAULT_CACHE_DURATION,
            fallback_mime_type: DEFAULT_FALLBACK_MIME_TYPE.to_string(),
            path_prefix: String::new(),
            protect_from_dos_attacks: true,
            secret: None,
            sha_length: DEFAULT_SHA_LENGTH,
            infer_mime_type_from_file_ext: true,
        }
    }
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("cache_duration", &self.cache_duration)
            .field("fallback_mime_type", &self.fallback_mime_type)
            .field("path_prefix", &self.path_prefix)
            .field("protect_from_dos_attacks", &self.protect_from_dos_attacks)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("sha_length", &self.sha_length)
            .field("infer_mime_type_from_file_ext", &self.infer_mime_type_from_file_ext)
            .finish()
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> CoreResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| CoreError::Configuration(format!("{key} の値が不正です ({value:?}): {e}")))
}

impl ServiceConfig {
    /// 設定項目を1つ文字列から設定する。未知のキーは設定エラー。
    pub fn set(&mut self, key: &str, value: &str) -> CoreResult<()> {
        match key {
            "cache_duration" => self.cache_duration = parse_value(key, value)?,
            "fallback_mime_type" => self.fallback_mime_type = value.to_string(),
            "path_prefix" => self.path_prefix = value.to_string(),
            "protect_from_dos_attacks" => self.protect_from_dos_attacks = parse_value(key, value)?,
            "secret" => self.secret = Some(value.to_string()).filter(|s| !s.is_empty()),
            "sha_length" => self.sha_length = parse_value(key, value)?,
            "infer_mime_type_from_file_ext" => {
                self.infer_mime_type_from_file_ext = parse_value(key, value)?
            }
            other => {
                return Err(CoreError::Configuration(format!("未知の設定キーです: {other}")));
            }
        }
        Ok(())
    }

    /// JSONから読み込む。未知のフィールドは設定エラー。
    pub fn from_json(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| CoreError::Configuration(format!("設定のパースに失敗: {e}")))
    }

    /// 設定の整合性を検証する。
    pub fn validate(&self) -> CoreResult<()> {
        if self.protect_from_dos_attacks && self.secret.is_none() {
            return Err(CoreError::Configuration(
                "protect_from_dos_attacks が有効な場合は secret が必要です".to_string(),
            ));
        }
        check_signature_length(self.sha_length).map_err(|e| CoreError::Configuration(e.to_string()))?;
        if !self.path_prefix.is_empty()
            && (!self.path_prefix.starts_with('/') || self.path_prefix.ends_with('/'))
        {
            return Err(CoreError::Configuration(format!(
                "path_prefix は '/' で始まり '/' で終わらない必要があります: {}",
                self.path_prefix
            )));
        }
        if self.fallback_mime_type.is_empty() {
            return Err(CoreError::Configuration("fallback_mime_type が空です".to_string()));
        }
        Ok(())
    }

    /// Cache-Controlヘッダ値。
    pub fn cache_control(&self) -> String {
        format!("public, max-age={}", self.cache_duration)
    }
}
