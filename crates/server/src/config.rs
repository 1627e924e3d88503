//! # サーバー設定・共有状態
//!
//! 環境変数からの設定読み込みとサーバーの共有状態の定義。
//! `KATACHI_<KEY>` はサービス設定の `<key>` に対応する。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use katachi_core::config::CONFIG_KEYS;
use katachi_core::{Service, ServiceConfig};
use katachi_types::TemplateSet;

/// アップロード上限のデフォルト（64MiB）。
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// リクエスト処理時間上限のデフォルト（秒）。
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// データストアの種類。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStoreKind {
    File,
    Memory,
    #[cfg(feature = "vendor-aws")]
    S3,
}

impl std::str::FromStr for DataStoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(DataStoreKind::File),
            "memory" => Ok(DataStoreKind::Memory),
            #[cfg(feature = "vendor-aws")]
            "s3" => Ok(DataStoreKind::S3),
            other => Err(anyhow::anyhow!("未対応のデータストアです: {other}")),
        }
    }
}

/// サーバー設定。
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 待ち受けアドレス
    pub listen_addr: String,
    /// データストアの種類
    pub datastore: DataStoreKind,
    /// ファイルデータストアのルート
    pub root_path: PathBuf,
    /// 運用エンドポイントのAPIキー（未設定なら運用エンドポイントは無効）
    pub api_key: Option<String>,
    /// テンプレート定義ファイル
    pub templates_path: Option<PathBuf>,
    /// リクエストごとの処理時間上限
    pub request_timeout: Duration,
    /// アップロード最大サイズ（バイト）
    pub max_upload_bytes: usize,
    /// サービス設定
    pub service: ServiceConfig,
}

impl ServerConfig {
    /// 環境変数から構築する。
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意の参照関数から構築する。
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut service = ServiceConfig::default();
        for key in CONFIG_KEYS {
            let var = format!("KATACHI_{}", key.to_ascii_uppercase());
            if let Some(value) = lookup(&var) {
                service.set(key, &value)?;
            }
        }

        let listen_addr = lookup("KATACHI_LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:3000".to_string());
        let datastore = lookup("KATACHI_DATASTORE")
            .unwrap_or_else(|| "file".to_string())
            .parse()?;
        let root_path = lookup("KATACHI_ROOT_PATH")
            .unwrap_or_else(|| "./katachi-data".to_string())
            .into();
        let api_key = lookup("KATACHI_API_KEY").filter(|k| !k.is_empty());
        let templates_path = lookup("KATACHI_TEMPLATES").map(PathBuf::from);
        let request_timeout = match lookup("KATACHI_REQUEST_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(v.parse().map_err(|e| {
                anyhow::anyhow!("KATACHI_REQUEST_TIMEOUT_SECS の値が不正です ({v:?}): {e}")
            })?),
            None => Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        };
        let max_upload_bytes = match lookup("KATACHI_MAX_UPLOAD_BYTES") {
            Some(v) => v.parse().map_err(|e| {
                anyhow::anyhow!("KATACHI_MAX_UPLOAD_BYTES の値が不正です ({v:?}): {e}")
            })?,
            None => DEFAULT_MAX_UPLOAD_BYTES,
        };

        Ok(Self {
            listen_addr,
            datastore,
            root_path,
            api_key,
            templates_path,
            request_timeout,
            max_upload_bytes,
            service,
        })
    }

    /// テンプレート定義ファイルを読み込む。未指定なら空。
    pub fn load_templates(&self) -> anyhow::Result<TemplateSet> {
        let Some(path) = &self.templates_path else {
            return Ok(TemplateSet::new());
        };
        let json = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("テンプレートの読み込みに失敗 ({}): {e}", path.display()))?;
        let templates: TemplateSet = serde_json::from_str(&json)
            .map_err(|e| anyhow::anyhow!("テンプレートのパースに失敗 ({}): {e}", path.display()))?;
        tracing::info!(path = %path.display(), count = templates.len(), "テンプレートを読み込みました");
        Ok(templates)
    }
}

/// サーバーの共有状態。
pub struct AppState {
    /// 構成済みのサービス
    pub service: Arc<Service>,
    /// 運用エンドポイントのAPIキー
    pub api_key: Option<String>,
    /// リクエストごとの処理時間上限
    pub request_timeout: Duration,
    /// アップロード最大サイズ（バイト）
    pub max_upload_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:3000");
        assert_eq!(config.datastore, DataStoreKind::File);
        assert_eq!(config.root_path, PathBuf::from("./katachi-data"));
        assert_eq!(config.api_key, None);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.max_upload_bytes, DEFAULT_MAX_UPLOAD_BYTES);
        assert_eq!(config.service, ServiceConfig::default());
    }

    /// KATACHI_<KEY> がサービス設定に反映されることを確認
    #[test]
    fn test_service_keys() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("KATACHI_SECRET", "s3cr3t"),
            ("KATACHI_SHA_LENGTH", "10"),
            ("KATACHI_PATH_PREFIX", "/media"),
            ("KATACHI_CACHE_DURATION", "60"),
            ("KATACHI_INFER_MIME_TYPE_FROM_FILE_EXT", "false"),
            ("KATACHI_DATASTORE", "memory"),
            ("KATACHI_API_KEY", "key"),
            ("KATACHI_REQUEST_TIMEOUT_SECS", "5"),
        ]))
        .unwrap();
        assert_eq!(config.service.secret.as_deref(), Some("s3cr3t"));
        assert_eq!(config.service.sha_length, 10);
        assert_eq!(config.service.path_prefix, "/media");
        assert_eq!(config.service.cache_duration, 60);
        assert!(!config.service.infer_mime_type_from_file_ext);
        assert_eq!(config.datastore, DataStoreKind::Memory);
        assert_eq!(config.api_key.as_deref(), Some("key"));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values() {
        for vars in [
            [("KATACHI_SHA_LENGTH", "many")],
            [("KATACHI_PROTECT_FROM_DOS_ATTACKS", "maybe")],
            [("KATACHI_DATASTORE", "tape")],
            [("KATACHI_REQUEST_TIMEOUT_SECS", "-1")],
        ] {
            assert!(ServerConfig::from_lookup(lookup(&vars)).is_err(), "{vars:?}");
        }
    }

    #[test]
    fn test_load_templates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.json");
        std::fs::write(
            &path,
            r#"{"thumb": [{"kind": "process", "name": "thumb", "args": ["$0"]}, {"kind": "encode", "name": "jpg"}]}"#,
        )
        .unwrap();
        let config = ServerConfig {
            templates_path: Some(path),
            ..ServerConfig::from_lookup(lookup(&[])).unwrap()
        };
        let templates = config.load_templates().unwrap();
        assert_eq!(templates["thumb"].len(), 2);

        let missing = ServerConfig {
            templates_path: Some(dir.path().join("missing.json")),
            ..config
        };
        assert!(missing.load_templates().is_err());
    }
}
