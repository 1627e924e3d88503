//! # S3互換データストア実装
//!
//! AWS S3, MinIO, Cloudflare R2 等のS3互換APIを使用するデータストア。
//! データ本体を `<uid>`、属性を `<uid>.meta.json` のオブジェクトとして置く。

use s3::error::S3Error;

use katachi_core::{Content, ContentInfo, DataStore, DataStoreError, StoreOptions};

use super::{generate_uid, validate_uid, META_SUFFIX};

/// S3互換ストレージによるデータストア実装。
pub struct S3DataStore {
    bucket: s3::Bucket,
}

/// AWS S3エンドポイント（s3.REGION.amazonaws.com）からリージョンを取り出す。
/// 非AWSエンドポイントではus-east-1。
fn detect_region(endpoint: &str) -> String {
    endpoint
        .find("s3.")
        .and_then(|start| {
            let rest = &endpoint[start + 3..];
            rest.find(".amazonaws.com").map(|end| rest[..end].to_string())
        })
        .filter(|region| !region.is_empty())
        .unwrap_or_else(|| "us-east-1".to_string())
}

/// S3のレスポンス（ステータス, 本体）をデータストアのエラーに対応付ける。
fn check(uid: &str, op: &str, result: Result<(u16, Vec<u8>), S3Error>) -> Result<Vec<u8>, DataStoreError> {
    match result {
        Ok((status, body)) => match status {
            200..=299 => Ok(body),
            404 => Err(DataStoreError::NotFound(uid.to_string())),
            status => Err(DataStoreError::Backend(format!("{op}に失敗 ({uid}): HTTP {status}"))),
        },
        Err(S3Error::HttpFailWithBody(404, _)) => Err(DataStoreError::NotFound(uid.to_string())),
        Err(e) => Err(DataStoreError::Backend(format!("{op}に失敗 ({uid}): {e}"))),
    }
}

impl S3DataStore {
    pub fn new(bucket: s3::Bucket) -> Self {
        Self { bucket }
    }

    fn init_bucket(
        endpoint: &str,
        region: Option<String>,
        access_key: &str,
        secret_key: &str,
        bucket_name: &str,
    ) -> anyhow::Result<s3::Bucket> {
        let region = s3::Region::Custom {
            region: region.unwrap_or_else(|| detect_region(endpoint)),
            endpoint: endpoint.to_string(),
        };

        let credentials = s3::creds::Credentials::new(
            Some(access_key),
            Some(secret_key),
            None,
            None,
            None,
        )?;

        let bucket = s3::Bucket::new(bucket_name, region, credentials)?.with_path_style();

        Ok(*bucket)
    }

    /// 環境変数から構築する。
    pub fn from_env() -> anyhow::Result<Self> {
        let endpoint = std::env::var("KATACHI_S3_ENDPOINT")
            .unwrap_or_else(|_| "http://localhost:9000".to_string());
        let access_key =
            std::env::var("KATACHI_S3_ACCESS_KEY").unwrap_or_else(|_| "minioadmin".to_string());
        let secret_key =
            std::env::var("KATACHI_S3_SECRET_KEY").unwrap_or_else(|_| "minioadmin".to_string());
        let bucket_name =
            std::env::var("KATACHI_S3_BUCKET").unwrap_or_else(|_| "katachi".to_string());
        let region = std::env::var("KATACHI_S3_REGION").ok();

        let bucket = Self::init_bucket(&endpoint, region, &access_key, &secret_key, &bucket_name)?;
        tracing::info!(endpoint = %endpoint, bucket = %bucket_name, "S3データストアを設定");

        Ok(Self::new(bucket))
    }
}

#[async_trait::async_trait]
impl DataStore for S3DataStore {
    async fn store(&self, content: &Content, opts: &StoreOptions) -> Result<String, DataStoreError> {
        let uid = match &opts.uid {
            Some(uid) => uid.clone(),
            None => generate_uid(),
        };
        validate_uid(&uid)?;

        let data = content
            .read_data()
            .await
            .map_err(|e| DataStoreError::Backend(format!("コンテンツの読み込みに失敗: {e}")))?;
        let meta = serde_json::to_vec(content.info())
            .map_err(|e| DataStoreError::Backend(format!("属性のシリアライズに失敗: {e}")))?;
        let content_type = content.mime_type().unwrap_or("application/octet-stream");

        check(
            &uid,
            "アップロード",
            self.bucket
                .put_object_with_content_type(&uid, &data, content_type)
                .await
                .map(|r| (r.status_code(), r.bytes().to_vec())),
        )?;
        check(
            &uid,
            "属性のアップロード",
            self.bucket
                .put_object_with_content_type(format!("{uid}{META_SUFFIX}"), &meta, "application/json")
                .await
                .map(|r| (r.status_code(), r.bytes().to_vec())),
        )?;

        tracing::debug!(uid = %uid, size = data.len(), "S3に保存しました");
        Ok(uid)
    }

    async fn fetch(&self, uid: &str) -> Result<Content, DataStoreError> {
        validate_uid(uid)?;
        let response = self.bucket.get_object(uid).await;
        let data = check(uid, "ダウンロード", response.map(|r| (r.status_code(), r.bytes().to_vec())))?;

        let meta_key = format!("{uid}{META_SUFFIX}");
        let response = self.bucket.get_object(&meta_key).await;
        let info = match check(uid, "属性のダウンロード", response.map(|r| (r.status_code(), r.bytes().to_vec()))) {
            Ok(meta) => serde_json::from_slice(&meta)
                .map_err(|e| DataStoreError::Backend(format!("属性のパースに失敗 ({uid}): {e}")))?,
            Err(DataStoreError::NotFound(_)) => ContentInfo::default(),
            Err(e) => return Err(e),
        };

        tracing::debug!(uid = %uid, size = data.len(), "S3から取得しました");
        Ok(Content::from_parts(data, info))
    }

    async fn destroy(&self, uid: &str) -> Result<(), DataStoreError> {
        validate_uid(uid)?;
        for key in [uid.to_string(), format!("{uid}{META_SUFFIX}")] {
            let response = self.bucket.delete_object(&key).await;
            match check(uid, "削除", response.map(|r| (r.status_code(), Vec::new()))) {
                Ok(_) | Err(DataStoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        tracing::debug!(uid = %uid, "S3から削除しました");
        Ok(())
    }
}
