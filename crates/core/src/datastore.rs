//! # データストア
//!
//! コンテンツの永続化境界の抽象インターフェース。
//! ファイルシステム・S3互換ストレージの実装は `katachi-server` を参照。
//! ここではテストと単体利用のためのインメモリ実装のみを持つ。

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::content::{Content, ContentInfo};
use crate::error::DataStoreError;

/// 保存時のオプション。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// 保存先uidの指定。Noneならデータストアが採番する。
    pub uid: Option<String>,
}

impl StoreOptions {
    pub fn with_uid(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
        }
    }
}

/// データストアの抽象インターフェース。
///
/// - `fetch(store(content, opts))` は同じデータと属性を返す
/// - `destroy` は冪等（存在しないuidの削除は成功扱い）
/// - 存在しないuidの `fetch` は `DataStoreError::NotFound`
#[async_trait::async_trait]
pub trait DataStore: Send + Sync {
    /// コンテンツを保存し、uidを返す。
    async fn store(&self, content: &Content, opts: &StoreOptions) -> Result<String, DataStoreError>;

    /// uidのコンテンツを取得する。
    async fn fetch(&self, uid: &str) -> Result<Content, DataStoreError>;

    /// uidのコンテンツを削除する。
    async fn destroy(&self, uid: &str) -> Result<(), DataStoreError>;
}

/// インメモリのデータストア。
#[derive(Default)]
pub struct MemoryDataStore {
    entries: RwLock<HashMap<String, (Vec<u8>, ContentInfo)>>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存されている件数。
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl DataStore for MemoryDataStore {
    async fn store(&self, content: &Content, opts: &StoreOptions) -> Result<String, DataStoreError> {
        let uid = match &opts.uid {
            Some(uid) if uid.is_empty() => return Err(DataStoreError::InvalidUid(uid.clone())),
            Some(uid) => uid.clone(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let data = content
            .read_data()
            .await
            .map_err(|e| DataStoreError::Backend(e.to_string()))?
            .into_owned();
        self.entries
            .write()
            .await
            .insert(uid.clone(), (data, content.info().clone()));
        tracing::debug!(uid = %uid, "メモリに保存しました");
        Ok(uid)
    }

    async fn fetch(&self, uid: &str) -> Result<Content, DataStoreError> {
        let entries = self.entries.read().await;
        let (data, info) = entries
            .get(uid)
            .ok_or_else(|| DataStoreError::NotFound(uid.to_string()))?;
        Ok(Content::from_parts(data.clone(), info.clone()))
    }

    async fn destroy(&self, uid: &str) -> Result<(), DataStoreError> {
        if self.entries.write().await.remove(uid).is_some() {
            tracing::debug!(uid = %uid, "メモリから削除しました");
        }
        Ok(())
    }
}
