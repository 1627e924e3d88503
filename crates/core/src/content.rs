//! # コンテンツハンドル
//!
//! リクエスト内で扱うバイナリデータと、そこから導かれるメタデータ
//! （フォーマット、MIMEタイプ上書き、解析結果）を保持する。
//! リクエストごとに生成され、リクエスト間で共有されない。

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreResult, DataStoreError};

/// データ本体。メモリ上のバイト列か、未読のファイル参照。
#[derive(Debug, Clone, PartialEq)]
enum Payload {
    Bytes(Vec<u8>),
    File(PathBuf),
}

/// データ本体以外の属性。データストアはこれをデータと並べて永続化する。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentInfo {
    /// 元のファイル名（拡張子推定に使う）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// 明示的なフォーマット（"jpg" 等）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    /// MIMEタイプの上書き
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// 解析結果などの付随メタデータ
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, serde_json::Value>,
}

/// コンテンツハンドル。
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    payload: Payload,
    info: ContentInfo,
}

impl Content {
    /// メモリ上のバイト列からコンテンツを作る。
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Payload::Bytes(data.into()),
            info: ContentInfo::default(),
        }
    }

    /// ファイル参照からコンテンツを作る。データは最初のアクセス時に読む。
    /// ファイル名がコンテンツ名になる。
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        Self {
            payload: Payload::File(path),
            info: ContentInfo {
                name,
                ..ContentInfo::default()
            },
        }
    }

    /// 永続化された属性とデータからコンテンツを復元する。
    pub fn from_parts(data: impl Into<Vec<u8>>, info: ContentInfo) -> Self {
        Self {
            payload: Payload::Bytes(data.into()),
            info,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.info.name = Some(name.into());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.info.format = Some(format.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.info.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.info.meta.insert(key.into(), value);
        self
    }

    /// 同じ属性を引き継いだまま、データだけを差し替えたコンテンツを作る。
    /// データが変わるため、MIMEタイプの上書きは引き継がない。
    pub fn derive(&self, data: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Payload::Bytes(data.into()),
            info: ContentInfo {
                mime_type: None,
                ..self.info.clone()
            },
        }
    }

    /// データ本体を返す。ファイル参照の場合はここで同期的に読み込むため、
    /// 非同期の文脈では `read_data` か `load` を使う。
    pub fn data(&self) -> CoreResult<Cow<'_, [u8]>> {
        match &self.payload {
            Payload::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
            Payload::File(path) => {
                let bytes = std::fs::read(path).map_err(DataStoreError::Io)?;
                Ok(Cow::Owned(bytes))
            }
        }
    }

    /// データ本体を返す。ファイル参照は `tokio::fs` で読む。
    pub async fn read_data(&self) -> CoreResult<Cow<'_, [u8]>> {
        match &self.payload {
            Payload::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
            Payload::File(path) => {
                let bytes = tokio::fs::read(path).await.map_err(DataStoreError::Io)?;
                Ok(Cow::Owned(bytes))
            }
        }
    }

    /// ファイル参照をメモリ上に読み込んだコンテンツにする。
    pub async fn load(self) -> CoreResult<Content> {
        let Content { payload, info } = self;
        let payload = match payload {
            Payload::File(path) => {
                Payload::Bytes(tokio::fs::read(&path).await.map_err(DataStoreError::Io)?)
            }
            bytes => bytes,
        };
        Ok(Content { payload, info })
    }

    /// データ本体を所有権ごと取り出す。
    pub fn into_data(self) -> CoreResult<Vec<u8>> {
        match self.payload {
            Payload::Bytes(bytes) => Ok(bytes),
            Payload::File(path) => Ok(std::fs::read(&path).map_err(DataStoreError::Io)?),
        }
    }

    /// データサイズ（バイト）。ファイル参照の場合は読み込まずに求める。
    pub fn size(&self) -> CoreResult<u64> {
        match &self.payload {
            Payload::Bytes(bytes) => Ok(bytes.len() as u64),
            Payload::File(path) => Ok(std::fs::metadata(path).map_err(DataStoreError::Io)?.len()),
        }
    }

    /// ファイル参照のパス（メモリ上のデータならNone）
    pub fn path(&self) -> Option<&Path> {
        match &self.payload {
            Payload::File(path) => Some(path),
            Payload::Bytes(_) => None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.info.name.as_deref()
    }

    /// 明示的に設定されたフォーマット。
    pub fn format(&self) -> Option<&str> {
        self.info.format.as_deref()
    }

    /// コンテンツ名の拡張子（小文字）。
    pub fn ext(&self) -> Option<String> {
        let name = self.info.name.as_deref()?;
        Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .filter(|e| !e.is_empty())
    }

    /// 明示的なフォーマット、なければ拡張子。
    /// レジストリのフォーマット判定に使う。
    pub fn format_or_ext(&self) -> Option<String> {
        self.info
            .format
            .clone()
            .or_else(|| self.ext())
    }

    /// MIMEタイプの上書き。
    pub fn mime_type(&self) -> Option<&str> {
        self.info.mime_type.as_deref()
    }

    pub fn set_format(&mut self, format: impl Into<String>) {
        self.info.format = Some(format.into());
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.info.meta.insert(key.into(), value);
    }

    pub fn meta(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.info.meta
    }

    /// 永続化用の属性一式。
    pub fn info(&self) -> &ContentInfo {
        &self.info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_ext_is_lowercased() {
        let content = Content::new(vec![1, 2, 3]).with_name("Photo.JPG");
        assert_eq!(content.ext().as_deref(), Some("jpg"));
        assert_eq!(content.format(), None);
        assert_eq!(content.format_or_ext().as_deref(), Some("jpg"));

        let content = content.with_format("png");
        assert_eq!(content.format_or_ext().as_deref(), Some("png"));
    }

    #[test]
    fn test_no_ext() {
        assert_eq!(Content::new(vec![]).ext(), None);
        assert_eq!(Content::new(vec![]).with_name("README").ext(), None);
    }

    /// ファイル参照が遅延読み込みされ、名前が引き継がれることを確認
    #[test]
    fn test_lazy_file_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        let content = Content::from_path(&path);
        // まだファイルが存在しない → 読み込みで失敗
        assert!(content.data().is_err());

        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"hello")
            .unwrap();
        assert_eq!(content.name(), Some("hello.txt"));
        assert_eq!(content.size().unwrap(), 5);
        assert_eq!(&*content.data().unwrap(), b"hello");
        assert_eq!(content.into_data().unwrap(), b"hello".to_vec());
    }

    /// 非同期の読み込みでファイル参照がメモリ上のデータになることを確認
    #[tokio::test]
    async fn test_async_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.png");
        let content = Content::from_path(&path).with_format("png");
        assert!(content.read_data().await.is_err());

        std::fs::write(&path, b"bytes").unwrap();
        assert_eq!(&*content.read_data().await.unwrap(), b"bytes");

        let loaded = content.load().await.unwrap();
        assert_eq!(loaded.path(), None);
        assert_eq!(loaded.format(), Some("png"));
        assert_eq!(loaded.name(), Some("a.png"));
        std::fs::remove_file(&path).unwrap();
        assert_eq!(&*loaded.data().unwrap(), b"bytes");
    }

    /// deriveでメタデータは残り、MIMEタイプ上書きは消えることを確認
    #[test]
    fn test_derive_keeps_info_but_drops_mime_override() {
        let original = Content::new(vec![1])
            .with_name("a.png")
            .with_format("png")
            .with_mime_type("image/x-custom")
            .with_meta("width", serde_json::json!(10));
        let derived = original.derive(vec![2, 3]);
        assert_eq!(&*derived.data().unwrap(), &[2, 3]);
        assert_eq!(derived.name(), Some("a.png"));
        assert_eq!(derived.format(), Some("png"));
        assert_eq!(derived.mime_type(), None);
        assert_eq!(derived.meta()["width"], serde_json::json!(10));
    }
}
