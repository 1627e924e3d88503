//! # Katachi Server
//!
//! 変換チェーンのURLに応答するHTTPサーバー。
//!
//! ## 役割
//! - 署名付きURLの検証とチェーンのデコード
//! - チェーンの実行とMIMEタイプの解決
//! - ETagによる条件付きリクエスト
//! - 運用者向けのコンテンツ保存・URL発行（APIキー認証）
//!
//! ## API エンドポイント
//! - `GET|HEAD <prefix>/<チェーン>?sha=…`: 変換結果
//! - `POST /content?name=…`: コンテンツの保存
//! - `DELETE /content/{uid}`: コンテンツの削除
//! - `POST /url`: チェーンのURL発行

mod auth;
mod config;
mod endpoints;
mod error;
mod storage;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, post};
use axum::Router;

use katachi_core::{DataStore, MagicAnalyser, MemoryDataStore, Service, ServiceBuilder, MAGIC_ANALYSER};
use katachi_types::TemplateSet;

use config::{AppState, DataStoreKind, ServerConfig};
use endpoints::{handle_delete, handle_transform, handle_upload, handle_url};
use storage::FileDataStore;

/// 設定に従ってデータストアを開く。
fn open_datastore(config: &ServerConfig) -> anyhow::Result<Arc<dyn DataStore>> {
    let datastore: Arc<dyn DataStore> = match config.datastore {
        DataStoreKind::File => {
            tracing::info!(root = %config.root_path.display(), "ファイルデータストアを使用します");
            Arc::new(FileDataStore::new(&config.root_path))
        }
        DataStoreKind::Memory => {
            tracing::warn!("インメモリデータストアを使用します（再起動で消えます）");
            Arc::new(MemoryDataStore::new())
        }
        #[cfg(feature = "vendor-aws")]
        DataStoreKind::S3 => Arc::new(storage::S3DataStore::from_env()?),
    };
    Ok(datastore)
}

/// 標準のケイパビリティを登録したサービスビルダー。
/// マジックバイト解析を先に登録し、MIMEタイプ解決で優先させる。
fn service_builder(config: &ServerConfig, datastore: Arc<dyn DataStore>, templates: TemplateSet) -> ServiceBuilder {
    Service::builder(config.service.clone())
        .datastore(datastore)
        .templates(templates)
        .register(|caps| {
            caps.analysers.register(MAGIC_ANALYSER, MagicAnalyser);
            katachi_image::register_all(caps);
        })
}

fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/content", post(handle_upload))
        .route("/content/{*uid}", delete(handle_delete))
        .route("/url", post(handle_url))
        .fallback(handle_transform)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env()?;
    let datastore = open_datastore(&config)?;
    let templates = config.load_templates()?;
    let service = service_builder(&config, datastore, templates).build()?;

    if config.api_key.is_none() {
        tracing::warn!("KATACHI_API_KEYが未設定です。運用エンドポイントは無効です");
    }

    let state = Arc::new(AppState {
        service: Arc::new(service),
        api_key: config.api_key.clone(),
        request_timeout: config.request_timeout,
        max_upload_bytes: config.max_upload_bytes,
    });

    tracing::info!("Katachiサーバーを {} で起動します", config.listen_addr);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// テスト
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use image::{GenericImageView, ImageFormat};
    use katachi_core::{Content, CoreResult, Job, StoreOptions};
    use katachi_types::{Step, StepKind, UploadResponse, UrlResponse};

    const SECRET: &str = "s3cr3t";
    const API_KEY: &str = "k3y";

    /// テスト用サーバー
    struct Fixture {
        base: String,
        service: Arc<Service>,
        /// `count` 加工の呼び出し回数
        calls: Arc<AtomicUsize>,
        client: reqwest::Client,
    }

    impl Fixture {
        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }
    }

    async fn fixture(protected: bool, api_key: Option<&str>) -> Fixture {
        fixture_with_timeout(protected, api_key, Duration::from_secs(10)).await
    }

    /// 実際のルーターを127.0.0.1の空きポートで起動する。
    /// `slow` 加工は1.5秒かかる。
    async fn fixture_with_timeout(protected: bool, api_key: Option<&str>, request_timeout: Duration) -> Fixture {
        let mut config = ServerConfig::from_lookup(|_| None).unwrap();
        config.service.path_prefix = "/media".to_string();
        config.service.protect_from_dos_attacks = protected;
        config.service.secret = Some(SECRET.to_string());

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let service = service_builder(&config, Arc::new(MemoryDataStore::new()), TemplateSet::new())
            .template(
                "small",
                vec![
                    Step::new(StepKind::Process, "thumb", ["$0"]),
                    Step::new(StepKind::Encode, "jpg", Vec::<String>::new()),
                ],
            )
            .register(move |caps| {
                caps.processors.register(
                    "count",
                    move |content: &Content, _args: &[String]| -> CoreResult<Content> {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(content.clone())
                    },
                );
                caps.processors.register(
                    "slow",
                    |content: &Content, _args: &[String]| -> CoreResult<Content> {
                        std::thread::sleep(Duration::from_millis(1500));
                        Ok(content.clone())
                    },
                );
            })
            .build()
            .unwrap();
        let service = Arc::new(service);

        let state = Arc::new(AppState {
            service: service.clone(),
            api_key: api_key.map(str::to_string),
            request_timeout,
            max_upload_bytes: 1024 * 1024,
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app(state)).await.unwrap();
        });

        Fixture {
            base: format!("http://127.0.0.1:{port}"),
            service,
            calls,
            client: reqwest::Client::new(),
        }
    }

    fn png(width: u32, height: u32) -> Content {
        katachi_image::generate::plain(width, height, [255, 0, 0, 255], ImageFormat::Png)
            .unwrap()
            .with_name("red.png")
    }

    async fn stored_job(fx: &Fixture) -> Job {
        let uid = fx.service.store(&png(32, 16), &StoreOptions::default()).await.unwrap();
        fx.service
            .fetch(uid)
            .process("thumb", ["8x8"])
            .process("count", ["x"])
            .encode("jpg")
    }

    /// 署名付きURLへのリクエストが変換結果とヘッダを返すことを確認
    #[tokio::test]
    async fn test_signed_request_is_served() {
        let fx = fixture(true, None).await;
        let job = stored_job(&fx).await;
        let url = fx.service.url_for(&job).unwrap();
        assert!(url.starts_with("/media/f~"));
        assert!(url.contains("?sha="));

        let response = fx.client.get(fx.url(&url)).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let headers = response.headers().clone();
        assert_eq!(headers["content-type"], "image/jpeg");
        assert_eq!(headers["cache-control"], "public, max-age=31536000");
        assert_eq!(headers["etag"], fx.service.etag(&job).unwrap().as_str());
        assert_eq!(headers["content-disposition"], "inline; filename=\"red.jpg\"");

        let body = response.bytes().await.unwrap();
        let image = image::load_from_memory(&body).unwrap();
        assert_eq!(image.dimensions(), (8, 4));
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    }

    /// 署名が改竄・欠落したリクエストが403で拒否され、加工が呼ばれないことを確認
    #[tokio::test]
    async fn test_corrupted_signature_is_rejected() {
        let fx = fixture(true, None).await;
        let job = stored_job(&fx).await;
        let url = fx.service.url_for(&job).unwrap();

        // 署名の最後の1文字を変える
        let mut corrupted = url.clone();
        let last = corrupted.pop().unwrap();
        corrupted.push(if last == '0' { '1' } else { '0' });

        // パスを変えて元の署名を使い回す
        let (path, query) = url.split_once('?').unwrap();
        let tampered = format!("{}?{}", path.replace("8x8", "9x9"), query);

        for target in [corrupted, path.to_string(), tampered] {
            let response = fx.client.get(fx.url(&target)).send().await.unwrap();
            assert_eq!(response.status().as_u16(), 403, "{target}");
        }
        assert_eq!(fx.calls.load(Ordering::SeqCst), 0);
    }

    /// If-None-MatchがETagに一致すれば実行せずに304を返すことを確認
    #[tokio::test]
    async fn test_not_modified() {
        let fx = fixture(true, None).await;
        let job = stored_job(&fx).await;
        let url = fx.url(&fx.service.url_for(&job).unwrap());
        let etag = fx.service.etag(&job).unwrap();

        let response = fx
            .client
            .get(&url)
            .header("if-none-match", &etag)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 304);
        assert_eq!(response.headers()["etag"], etag.as_str());
        assert_eq!(fx.calls.load(Ordering::SeqCst), 0);

        let response = fx
            .client
            .get(&url)
            .header("if-none-match", "\"other\"")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    }

    /// 同期的な加工がタイムアウトを超えると、完了を待たずに504を返すことを確認
    #[tokio::test]
    async fn test_slow_step_times_out() {
        let fx = fixture_with_timeout(false, None, Duration::from_millis(100)).await;
        let url = fx.url("/media/g~plain~4~4/p~slow/e~png");

        let started = std::time::Instant::now();
        let response = fx.client.get(&url).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 504);
        assert!(started.elapsed() < Duration::from_millis(1000));
    }

    /// HEADがヘッダのみを返すことを確認
    #[tokio::test]
    async fn test_head_request() {
        let fx = fixture(false, None).await;
        let url = fx.url("/media/g~plain~4~4~00ff00/e~png");

        let response = fx.client.head(&url).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.headers()["content-type"], "image/png");
        assert!(response.headers().contains_key("etag"));
        assert!(response.bytes().await.unwrap().is_empty());

        let response = fx.client.get(&url).send().await.unwrap();
        let body = response.bytes().await.unwrap();
        assert_eq!(image::guess_format(&body).unwrap(), ImageFormat::Png);
    }

    /// エラー分類がHTTPステータスに対応付けられることを確認
    #[tokio::test]
    async fn test_error_statuses() {
        let fx = fixture(false, None).await;
        let cases = [
            ("/media/zzz", 400),
            ("/media/g~plain~4~4/p~nope", 422),
            ("/other/g~plain~4~4", 400),
            ("/media/g~plain~0~4", 400),
            ("/media/f~missing", 404),
        ];
        for (path, expected) in cases {
            let response = fx.client.get(fx.url(path)).send().await.unwrap();
            assert_eq!(response.status().as_u16(), expected, "{path}");
        }

        let response = fx
            .client
            .post(fx.url("/media/g~plain~4~4"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 405);
    }

    /// 保存 → 署名付きURLでの取得 → 削除の流れを確認
    #[tokio::test]
    async fn test_upload_fetch_delete() {
        let fx = fixture(true, Some(API_KEY)).await;
        let data = png(6, 6).into_data().unwrap();

        let response = fx
            .client
            .post(fx.url("/content?name=cat.png"))
            .body(data.clone())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 401);

        let response = fx
            .client
            .post(fx.url("/content?name=cat.png"))
            .header("x-api-key", API_KEY)
            .body(Vec::<u8>::new())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);

        let uploaded: UploadResponse = fx
            .client
            .post(fx.url("/content?name=cat.png"))
            .header("x-api-key", API_KEY)
            .body(data.clone())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(uploaded.url.starts_with("/media/f~"));

        let response = fx.client.get(fx.url(&uploaded.url)).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.headers()["content-type"], "image/png");
        assert_eq!(response.headers()["content-disposition"], "inline; filename=\"cat.png\"");
        assert_eq!(response.bytes().await.unwrap().as_ref(), data.as_slice());

        let delete_url = fx.url(&format!("/content/{}", uploaded.uid));
        let response = fx.client.delete(&delete_url).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 401);
        let response = fx
            .client
            .delete(&delete_url)
            .header("x-api-key", API_KEY)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 204);

        let response = fx.client.get(fx.url(&uploaded.url)).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 404);
    }

    /// APIキー未設定時に運用エンドポイントが403を返すことを確認
    #[tokio::test]
    async fn test_operator_endpoints_disabled() {
        let fx = fixture(true, None).await;
        let response = fx
            .client
            .post(fx.url("/content"))
            .header("x-api-key", "anything")
            .body(vec![1u8])
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 403);

        let response = fx
            .client
            .post(fx.url("/url"))
            .json(&serde_json::json!({"source": {"type": "fetch", "uid": "a"}}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 403);
    }

    /// POST /url で発行したURL（テンプレート適用を含む）が取得できることを確認
    #[tokio::test]
    async fn test_issue_url() {
        let fx = fixture(true, Some(API_KEY)).await;

        let issued: UrlResponse = fx
            .client
            .post(fx.url("/url"))
            .header("x-api-key", API_KEY)
            .json(&serde_json::json!({
                "source": {"type": "generate", "name": "plain", "args": ["20", "10"]},
                "template": {"name": "small", "args": ["10x10"]}
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(issued.url.starts_with("/media/g~plain~20~10/p~thumb~10x10/e~jpg?sha="));

        let response = fx.client.get(fx.url(&issued.url)).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.headers()["content-type"], "image/jpeg");
        let image = image::load_from_memory(&response.bytes().await.unwrap()).unwrap();
        assert_eq!(image.dimensions(), (10, 5));

        let response = fx
            .client
            .post(fx.url("/url"))
            .header("x-api-key", API_KEY)
            .json(&serde_json::json!({
                "source": {"type": "fetch", "uid": "a"},
                "template": {"name": "missing"}
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 400);
    }
}
