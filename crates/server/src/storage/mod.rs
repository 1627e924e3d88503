//! # データストア実装
//!
//! ローカルファイルシステム上のデータストア。
//! S3互換ストレージ実装は `s3` サブモジュールを参照。
//!
//! データ本体は `<root>/<uid>`、属性は `<root>/<uid>.meta.json` に置く。
//! 採番するuidは `<uuidの先頭2桁>/<uuid>`。

#[cfg(feature = "vendor-aws")]
pub mod s3;

#[cfg(feature = "vendor-aws")]
pub use s3::S3DataStore;

use std::io::ErrorKind;
use std::path::PathBuf;

use katachi_core::{Content, ContentInfo, DataStore, DataStoreError, StoreOptions};

/// 属性ファイルの拡張子。
const META_SUFFIX: &str = ".meta.json";

/// 新しいuidを採番する。
pub(crate) fn generate_uid() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}/{}", &id[..2], id)
}

/// uidを検証する。パス走査になりうるものと、属性ファイルと紛らわしいものは拒否する。
pub(crate) fn validate_uid(uid: &str) -> Result<(), DataStoreError> {
    let valid_segment = |segment: &str| {
        !segment.is_empty()
            && segment != "."
            && segment != ".."
            && !segment.ends_with(META_SUFFIX)
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    };
    if uid.split('/').all(valid_segment) {
        Ok(())
    } else {
        Err(DataStoreError::InvalidUid(uid.to_string()))
    }
}

/// ファイルシステム上のデータストア。
pub struct FileDataStore {
    root: PathBuf,
}

impl FileDataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn data_path(&self, uid: &str) -> PathBuf {
        self.root.join(uid)
    }

    fn meta_path(&self, uid: &str) -> PathBuf {
        self.root.join(format!("{uid}{META_SUFFIX}"))
    }

    /// 既存の配置と衝突しないか確認する。
    /// 途中のセグメントはディレクトリ、末尾のセグメントはファイルでなければならない。
    async fn check_layout(&self, uid: &str) -> Result<(), DataStoreError> {
        let segments: Vec<&str> = uid.split('/').collect();
        let mut path = self.root.clone();
        for (i, segment) in segments.iter().enumerate() {
            path.push(segment);
            let is_last = i + 1 == segments.len();
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_dir() == is_last => {
                    return Err(DataStoreError::InvalidUid(format!(
                        "{uid}（既存のコンテンツと配置が衝突します）"
                    )));
                }
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn not_found(uid: &str, e: std::io::Error) -> DataStoreError {
    if e.kind() == ErrorKind::NotFound {
        DataStoreError::NotFound(uid.to_string())
    } else {
        DataStoreError::Io(e)
    }
}

#[async_trait::async_trait]
impl DataStore for FileDataStore {
    async fn store(&self, content: &Content, opts: &StoreOptions) -> Result<String, DataStoreError> {
        let uid = match &opts.uid {
            Some(uid) => uid.clone(),
            None => generate_uid(),
        };
        validate_uid(&uid)?;
        self.check_layout(&uid).await?;

        let data = content
            .read_data()
            .await
            .map_err(|e| DataStoreError::Backend(format!("コンテンツの読み込みに失敗: {e}")))?;
        let meta = serde_json::to_vec(content.info())
            .map_err(|e| DataStoreError::Backend(format!("属性のシリアライズに失敗: {e}")))?;

        let path = self.data_path(&uid);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        tokio::fs::write(self.meta_path(&uid), meta).await?;

        tracing::debug!(uid = %uid, size = data.len(), "ファイルに保存しました");
        Ok(uid)
    }

    async fn fetch(&self, uid: &str) -> Result<Content, DataStoreError> {
        validate_uid(uid)?;
        let data = tokio::fs::read(self.data_path(uid))
            .await
            .map_err(|e| not_found(uid, e))?;
        let info = match tokio::fs::read(self.meta_path(uid)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| DataStoreError::Backend(format!("属性のパースに失敗 ({uid}): {e}")))?,
            // 属性ファイルがなければデータのみとして扱う
            Err(e) if e.kind() == ErrorKind::NotFound => ContentInfo::default(),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(uid = %uid, size = data.len(), "ファイルから取得しました");
        Ok(Content::from_parts(data, info))
    }

    async fn destroy(&self, uid: &str) -> Result<(), DataStoreError> {
        validate_uid(uid)?;
        for path in [self.data_path(uid), self.meta_path(uid)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(uid = %uid, "ファイルを削除しました");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_uid() {
        let uid = generate_uid();
        let (shard, id) = uid.split_once('/').unwrap();
        assert_eq!(shard.len(), 2);
        assert_eq!(id.len(), 32);
        assert!(id.starts_with(shard));
        assert!(validate_uid(&uid).is_ok());
    }

    #[test]
    fn test_validate_uid() {
        for ok in ["abc", "ab/abcdef", "photos/2024/cat.jpg", "a_b-c.d"] {
            assert!(validate_uid(ok).is_ok(), "{ok}");
        }
        for bad in [
            "",
            "/etc/passwd",
            "../secret",
            "a/../../b",
            "a//b",
            "a/",
            "./a",
            "a b",
            "a\\b",
            "x.meta.json",
            "x.meta.json/y",
            "a/b.meta.json",
        ] {
            assert!(
                matches!(validate_uid(bad), Err(DataStoreError::InvalidUid(_))),
                "{bad}"
            );
        }
    }

    /// 保存したデータと属性がそのまま取得できることを確認
    #[tokio::test]
    async fn test_store_fetch_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDataStore::new(dir.path());
        let content = Content::new(b"hello".to_vec())
            .with_name("greeting.txt")
            .with_meta("width", serde_json::json!(3));

        let uid = store.store(&content, &StoreOptions::default()).await.unwrap();
        assert!(dir.path().join(&uid).exists());

        let fetched = store.fetch(&uid).await.unwrap();
        assert_eq!(fetched.data().unwrap().as_ref(), b"hello");
        assert_eq!(fetched.info(), content.info());
    }

    #[tokio::test]
    async fn test_store_with_uid() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDataStore::new(dir.path());
        let content = Content::new(b"x".to_vec());
        let uid = store
            .store(&content, &StoreOptions::with_uid("photos/cat"))
            .await
            .unwrap();
        assert_eq!(uid, "photos/cat");
        assert!(store.fetch("photos/cat").await.is_ok());

        let err = store
            .store(&content, &StoreOptions::with_uid("../escape"))
            .await
            .unwrap_err();
        assert!(matches!(err, DataStoreError::InvalidUid(_)));
    }

    /// 既存のuidと配置が衝突するuidでの保存がInvalidUidになることを確認
    #[tokio::test]
    async fn test_store_rejects_layout_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDataStore::new(dir.path());
        let content = Content::new(b"x".to_vec());

        store.store(&content, &StoreOptions::with_uid("a")).await.unwrap();
        let err = store
            .store(&content, &StoreOptions::with_uid("a/b"))
            .await
            .unwrap_err();
        assert!(matches!(err, DataStoreError::InvalidUid(_)));

        store.store(&content, &StoreOptions::with_uid("c/d")).await.unwrap();
        let err = store
            .store(&content, &StoreOptions::with_uid("c"))
            .await
            .unwrap_err();
        assert!(matches!(err, DataStoreError::InvalidUid(_)));

        // 同じuidへの上書きは衝突ではない
        store.store(&content, &StoreOptions::with_uid("c/d")).await.unwrap();
        assert_eq!(store.fetch("a").await.unwrap().data().unwrap().as_ref(), b"x");
    }

    /// 属性ファイルのないデータも取得できることを確認
    #[tokio::test]
    async fn test_fetch_without_sidecar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("raw"), b"data").unwrap();
        let store = FileDataStore::new(dir.path());
        let fetched = store.fetch("raw").await.unwrap();
        assert_eq!(fetched.data().unwrap().as_ref(), b"data");
        assert_eq!(fetched.info(), &ContentInfo::default());
    }

    /// 削除が冪等で、削除後の取得がNotFoundになることを確認
    #[tokio::test]
    async fn test_destroy_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDataStore::new(dir.path());
        let uid = store
            .store(&Content::new(b"x".to_vec()), &StoreOptions::default())
            .await
            .unwrap();

        store.destroy(&uid).await.unwrap();
        store.destroy(&uid).await.unwrap();
        assert!(matches!(
            store.fetch(&uid).await,
            Err(DataStoreError::NotFound(_))
        ));
    }
}
