//! # サービス
//!
//! データストア・4種のレジストリ・署名器・MIMEタイプ表・チェーンテンプレートを
//! 束ねる構成ルート。起動時に一度だけ構築し、`Arc<Service>` として共有する。
//! 構築後はすべて読み取り専用のため、並行リクエスト間でロックは不要。
//!
//! ## リクエスト処理
//! 1. パスプレフィックスを除去
//! 2. 署名を検証（保護有効時）
//! 3. パスをチェーンにデコード
//! 4. チェーンを実行
//! 5. MIMEタイプを解決

use std::sync::Arc;

use serde_json::Value;

use katachi_types::{Step, TemplateSet};

use crate::config::ServiceConfig;
use crate::content::Content;
use crate::datastore::{DataStore, MemoryDataStore, StoreOptions};
use crate::error::{CoreError, CoreResult};
use crate::job::Job;
use crate::mime::MimeTable;
use crate::protect::{self, UrlProtector};
use crate::registry::Capabilities;

/// ETagに使うハッシュの16進文字数。
const ETAG_LENGTH: usize = 32;

// ---------------------------------------------------------------------------
// ビルダー
// ---------------------------------------------------------------------------

/// `Service` のビルダー。ケイパビリティとMIMEタイプの追加はここでのみ行える。
pub struct ServiceBuilder {
    config: ServiceConfig,
    datastore: Option<Arc<dyn DataStore>>,
    caps: Capabilities,
    mime_table: MimeTable,
    templates: TemplateSet,
}

impl ServiceBuilder {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config,
            datastore: None,
            caps: Capabilities::new(),
            mime_table: MimeTable::new(),
            templates: TemplateSet::new(),
        }
    }

    /// データストアを設定する。未設定ならインメモリ実装を使う。
    pub fn datastore(mut self, datastore: Arc<dyn DataStore>) -> Self {
        self.datastore = Some(datastore);
        self
    }

    /// ケイパビリティの登録先。
    pub fn capabilities_mut(&mut self) -> &mut Capabilities {
        &mut self.caps
    }

    /// クロージャでケイパビリティを登録する。
    pub fn register(mut self, f: impl FnOnce(&mut Capabilities)) -> Self {
        f(&mut self.caps);
        self
    }

    /// MIMEタイプ表に追加する。
    pub fn mime_type(mut self, format: &str, mime_type: impl Into<String>) -> Self {
        self.mime_table.insert(format, mime_type);
        self
    }

    /// 名前付きチェーンテンプレートを追加する。
    pub fn template(mut self, name: impl Into<String>, steps: Vec<Step>) -> Self {
        self.templates.insert(name.into(), steps);
        self
    }

    pub fn templates(mut self, templates: TemplateSet) -> Self {
        self.templates.extend(templates);
        self
    }

    /// 設定を検証してサービスを構築する。
    pub fn build(self) -> CoreResult<Service> {
        self.config.validate()?;

        let protector = match (&self.config.secret, self.config.protect_from_dos_attacks) {
            (Some(secret), true) => Some(UrlProtector::new(secret.clone(), self.config.sha_length)?),
            _ => None,
        };
        for (name, steps) in &self.templates {
            if name.is_empty() || steps.iter().any(|s| s.name.is_empty()) {
                return Err(CoreError::Configuration(format!(
                    "テンプレート {name:?} に名前のないステップがあります"
                )));
            }
        }
        let datastore = self.datastore.unwrap_or_else(|| {
            tracing::debug!("データストアが未設定のため、インメモリ実装を使います");
            Arc::new(MemoryDataStore::new())
        });

        tracing::info!(
            protected = protector.is_some(),
            path_prefix = %self.config.path_prefix,
            analysers = self.caps.analysers.len(),
            processors = self.caps.processors.len(),
            encoders = self.caps.encoders.len(),
            generators = self.caps.generators.len(),
            templates = self.templates.len(),
            "サービスを構築しました"
        );

        Ok(Service {
            config: self.config,
            datastore,
            caps: Arc::new(self.caps),
            mime_table: self.mime_table,
            protector,
            templates: self.templates,
        })
    }
}

// ---------------------------------------------------------------------------
// サービス
// ---------------------------------------------------------------------------

/// レスポンスとして返す変換結果。
#[derive(Debug, Clone)]
pub struct Rendered {
    /// 変換後のコンテンツ
    pub content: Content,
    /// 解決済みMIMEタイプ
    pub mime_type: String,
    /// 引用符付きのETag
    pub etag: String,
    /// Cache-Controlヘッダ値
    pub cache_control: String,
}

impl Rendered {
    /// ダウンロード時のファイル名。フォーマットが確定していれば拡張子を合わせる。
    pub fn filename(&self) -> Option<String> {
        let name = self.content.name()?;
        let stem = std::path::Path::new(name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| name.to_string());
        match self.content.format() {
            Some(format) => Some(format!("{stem}.{format}")),
            None => Some(name.to_string()),
        }
    }
}

/// 構成済みのサービス。
pub struct Service {
    config: ServiceConfig,
    datastore: Arc<dyn DataStore>,
    caps: Arc<Capabilities>,
    mime_table: MimeTable,
    protector: Option<UrlProtector>,
    templates: TemplateSet,
}

impl Service {
    pub fn builder(config: ServiceConfig) -> ServiceBuilder {
        ServiceBuilder::new(config)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        self.caps.as_ref()
    }

    pub fn mime_table(&self) -> &MimeTable {
        &self.mime_table
    }

    pub fn datastore(&self) -> &Arc<dyn DataStore> {
        &self.datastore
    }

    /// 署名が必要か。
    pub fn is_protected(&self) -> bool {
        self.protector.is_some()
    }

    // -----------------------------------------------------------------------
    // チェーンの構築
    // -----------------------------------------------------------------------

    pub fn fetch(&self, uid: impl Into<String>) -> Job {
        Job::from_uid(uid)
    }

    pub fn generate<I, A>(&self, name: impl Into<String>, args: I) -> Job
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        Job::from_generator(name, args)
    }

    pub fn new_job(&self, content: Content) -> Job {
        Job::from_content(content)
    }

    /// テンプレートのステップ列を、引数を埋め込んだ形で返す。
    pub fn template(&self, name: &str, args: &[String]) -> CoreResult<Vec<Step>> {
        let steps = self
            .templates
            .get(name)
            .ok_or_else(|| CoreError::InvalidArgument(format!("テンプレートが定義されていません: {name}")))?;
        steps
            .iter()
            .map(|step| -> CoreResult<Step> {
                let substituted = step
                    .args
                    .iter()
                    .map(|arg| substitute(arg, args))
                    .collect::<CoreResult<Vec<_>>>()?;
                Ok(Step {
                    kind: step.kind,
                    name: step.name.clone(),
                    args: substituted,
                })
            })
            .collect()
    }

    /// テンプレートのステップ列をチェーンの末尾に追加する。
    pub fn apply_template(&self, job: &Job, name: &str, args: &[String]) -> CoreResult<Job> {
        Ok(job.with_steps(self.template(name, args)?))
    }

    /// テンプレート名の一覧。
    pub fn template_names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    // -----------------------------------------------------------------------
    // URL
    // -----------------------------------------------------------------------

    /// チェーンのURL（パスプレフィックス + パス + 保護有効時は署名クエリ）。
    pub fn url_for(&self, job: &Job) -> CoreResult<String> {
        let path = job.encode_to_path()?;
        let mut url = format!("{}{}", self.config.path_prefix, path);
        if let Some(protector) = &self.protector {
            url.push('?');
            url.push_str(&protect::to_query(&protector.issue(&path)?));
        }
        Ok(url)
    }

    /// リクエストパスからパスプレフィックスを除いたチェーンのパスを返す。
    pub fn chain_path<'a>(&self, request_path: &'a str) -> CoreResult<&'a str> {
        let prefix = &self.config.path_prefix;
        request_path
            .strip_prefix(prefix.as_str())
            .filter(|rest| rest.starts_with('/'))
            .ok_or_else(|| {
                CoreError::Parse(format!(
                    "パスがプレフィックス {prefix:?} で始まっていません: {request_path}"
                ))
            })
    }

    /// チェーンのパスに対する署名を検証する。保護無効なら常に成功。
    pub fn authorize(&self, chain_path: &str, query: Option<&str>) -> CoreResult<()> {
        let Some(protector) = &self.protector else {
            return Ok(());
        };
        let params = protect::parse_query(query.unwrap_or_default());
        if protector.verify(chain_path, &params) {
            Ok(())
        } else {
            tracing::warn!(path = %chain_path, "署名の検証に失敗しました");
            Err(CoreError::Verification(format!(
                "署名が欠落しているか一致しません: {chain_path}"
            )))
        }
    }

    /// リクエストのパスとクエリを検証し、チェーンにデコードする。
    /// 署名の検証はデコードより前に行う。
    pub fn decode_request(&self, request_path: &str, query: Option<&str>) -> CoreResult<Job> {
        let chain_path = self.chain_path(request_path)?;
        self.authorize(chain_path, query)?;
        Job::decode_from_path(chain_path)
    }

    // -----------------------------------------------------------------------
    // 実行
    // -----------------------------------------------------------------------

    pub async fn execute(&self, job: &Job) -> CoreResult<Content> {
        job.execute(&self.caps, self.datastore.as_ref()).await
    }

    /// チェーンを実行し、その結果を解析する。`name` がNoneなら自動ディスパッチ。
    pub async fn analyse(&self, job: &Job, name: Option<&str>, args: &[String]) -> CoreResult<Option<Value>> {
        let content = self.execute(job).await?;
        self.caps.analysers.call(name, &content, args)
    }

    /// 自動ディスパッチで解析する。該当なしは値なしとして扱う。
    fn auto_analyse(&self, content: &Content, property: &str) -> CoreResult<Option<String>> {
        match self.caps.analysers.call(None, content, &[property.to_string()]) {
            Ok(None) => Ok(None),
            Ok(Some(Value::String(value))) => Ok(Some(value)),
            Ok(Some(other)) => {
                tracing::debug!(property, value = %other, "解析結果が文字列ではないため無視します");
                Ok(None)
            }
            Err(CoreError::UnregisteredCapability { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// コンテンツのMIMEタイプを解決する。
    ///
    /// 1. MIMEタイプの上書き
    /// 2. 明示的なフォーマット → MIMEタイプ表
    /// 3. 拡張子 → MIMEタイプ表（拡張子推定が有効な場合）
    /// 4. 解析（自動ディスパッチ）の `mime_type`
    /// 5. 解析（自動ディスパッチ）の `format` → MIMEタイプ表
    /// 6. フォールバック
    ///
    /// 前の段で決まれば以降の段は実行しない。
    pub fn resolve_mime_type(&self, content: &Content) -> CoreResult<String> {
        if let Some(mime) = content.mime_type() {
            return Ok(mime.to_string());
        }
        if let Some(mime) = content.format().and_then(|f| self.mime_table.lookup(f)) {
            return Ok(mime.to_string());
        }
        if self.config.infer_mime_type_from_file_ext {
            if let Some(mime) = content.ext().and_then(|e| self.mime_table.lookup(&e).map(str::to_string)) {
                return Ok(mime);
            }
        }
        if let Some(mime) = self.auto_analyse(content, "mime_type")? {
            return Ok(mime);
        }
        if let Some(format) = self.auto_analyse(content, "format")? {
            if let Some(mime) = self.mime_table.lookup(&format) {
                return Ok(mime.to_string());
            }
        }
        Ok(self.config.fallback_mime_type.clone())
    }

    /// チェーンに対するETag。デコードは一対一なので、チェーンのパスから決まる。
    pub fn etag(&self, job: &Job) -> CoreResult<String> {
        let path = job.encode_to_path()?;
        let hash = katachi_crypto::sha256_hex(path.as_bytes());
        Ok(format!("\"{}\"", &hash[..ETAG_LENGTH]))
    }

    /// チェーンを実行し、レスポンスに必要な情報をまとめる。
    pub async fn render(&self, job: &Job) -> CoreResult<Rendered> {
        let etag = self.etag(job)?;
        let content = self.execute(job).await?.load().await?;
        let mime_type = self.resolve_mime_type(&content)?;
        Ok(Rendered {
            content,
            mime_type,
            etag,
            cache_control: self.config.cache_control(),
        })
    }

    /// リクエストの検証・デコード・実行・MIMEタイプ解決を一括で行う。
    pub async fn respond(&self, request_path: &str, query: Option<&str>) -> CoreResult<Rendered> {
        let job = self.decode_request(request_path, query)?;
        self.render(&job).await
    }

    // -----------------------------------------------------------------------
    // データストア
    // -----------------------------------------------------------------------

    pub async fn store(&self, content: &Content, opts: &StoreOptions) -> CoreResult<String> {
        let uid = self.datastore.store(content, opts).await?;
        tracing::info!(uid = %uid, "コンテンツを保存しました");
        Ok(uid)
    }

    pub async fn destroy(&self, uid: &str) -> CoreResult<()> {
        self.datastore.destroy(uid).await?;
        tracing::info!(uid = %uid, "コンテンツを削除しました");
        Ok(())
    }
}

/// `$0`, `$1`… を引数で置き換える。数字が続かない `$` はそのまま残す。
fn substitute(template: &str, args: &[String]) -> CoreResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut digits = String::new();
        while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
            digits.push(d);
            chars.next();
        }
        if digits.is_empty() {
            out.push('$');
            continue;
        }
        let value = digits
            .parse::<usize>()
            .ok()
            .and_then(|index| args.get(index))
            .ok_or_else(|| CoreError::InvalidArgument(format!("テンプレート引数 ${digits} が指定されていません")))?;
        out.push_str(value);
    }
    Ok(out)
}
