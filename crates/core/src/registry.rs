//! # ケイパビリティレジストリ
//!
//! 名前 → 操作の対応表。解析・加工・エンコード・生成の4種類があり、
//! それぞれが独立したレジストリインスタンスを持つ。
//!
//! ## ディスパッチ
//! - 名前指定: 完全一致で引く。未登録なら `UnregisteredCapability`、
//!   フォーマット判定を満たさなければ `UnsupportedFormat`。
//! - 名前省略（自動ディスパッチ）: 登録順に走査し、フォーマット判定を満たし
//!   かつ結果を返した最初の操作を採用する。該当なしは `UnregisteredCapability`。
//!
//! 登録は起動時のみ行い、配信中は読み取り専用として扱う。

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use katachi_types::{Step, StepKind};

use crate::content::Content;
use crate::error::{CoreError, CoreResult};

// ---------------------------------------------------------------------------
// フォーマット判定
// ---------------------------------------------------------------------------

/// フォーマット判定関数。引数はコンテンツのフォーマット（不明ならNone）。
pub type FormatPredicate = Arc<dyn Fn(Option<&str>) -> bool + Send + Sync>;

/// 登録された操作がどのフォーマットを扱えるかの宣言。
#[derive(Clone, Default)]
pub enum FormatSupport {
    /// すべてのフォーマット（フォーマット不明を含む）
    #[default]
    Any,
    /// 列挙したフォーマットのみ。フォーマット不明は対象外。
    Only(BTreeSet<String>),
    /// 任意の判定関数
    Predicate(FormatPredicate),
}

impl FormatSupport {
    /// フォーマットを列挙して宣言する。
    pub fn only<I, S>(formats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FormatSupport::Only(formats.into_iter().map(Into::into).collect())
    }

    /// 判定関数で宣言する。
    pub fn predicate(f: impl Fn(Option<&str>) -> bool + Send + Sync + 'static) -> Self {
        FormatSupport::Predicate(Arc::new(f))
    }

    /// フォーマットを扱えるか。
    pub fn accepts(&self, format: Option<&str>) -> bool {
        match self {
            FormatSupport::Any => true,
            FormatSupport::Only(formats) => format.is_some_and(|f| formats.contains(f)),
            FormatSupport::Predicate(predicate) => predicate(format),
        }
    }
}

impl fmt::Debug for FormatSupport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatSupport::Any => f.write_str("Any"),
            FormatSupport::Only(formats) => f.debug_tuple("Only").field(formats).finish(),
            FormatSupport::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// ケイパビリティトレイト
// ---------------------------------------------------------------------------

/// 解析。コンテンツを変えずに値を返す。値がない場合は `Ok(None)`。
///
/// 自動ディスパッチ時は、問い合わせ対象のプロパティ名（`mime_type` 等）が
/// 最初の引数として渡される。答えられないプロパティには `Ok(None)` を返す。
pub trait Analyser: Send + Sync {
    fn analyse(&self, content: &Content, args: &[String]) -> CoreResult<Option<serde_json::Value>>;
}

/// 加工。新しいコンテンツを返す。
pub trait Processor: Send + Sync {
    fn process(&self, content: &Content, args: &[String]) -> CoreResult<Content>;
}

/// エンコード。新しいコンテンツを返し、そのフォーマットは
/// `output_format`（省略時は登録名）に確定される。
pub trait Encoder: Send + Sync {
    fn encode(&self, content: &Content, args: &[String]) -> CoreResult<Content>;

    /// 出力フォーマット。Noneなら登録名を使う。
    fn output_format(&self) -> Option<&str> {
        None
    }
}

/// 生成。入力コンテンツを取らない。
pub trait Generator: Send + Sync {
    fn generate(&self, args: &[String]) -> CoreResult<Content>;
}

impl<F> Analyser for F
where
    F: Fn(&Content, &[String]) -> CoreResult<Option<serde_json::Value>> + Send + Sync,
{
    fn analyse(&self, content: &Content, args: &[String]) -> CoreResult<Option<serde_json::Value>> {
        self(content, args)
    }
}

impl<F> Processor for F
where
    F: Fn(&Content, &[String]) -> CoreResult<Content> + Send + Sync,
{
    fn process(&self, content: &Content, args: &[String]) -> CoreResult<Content> {
        self(content, args)
    }
}

impl<F> Encoder for F
where
    F: Fn(&Content, &[String]) -> CoreResult<Content> + Send + Sync,
{
    fn encode(&self, content: &Content, args: &[String]) -> CoreResult<Content> {
        self(content, args)
    }
}

impl<F> Generator for F
where
    F: Fn(&[String]) -> CoreResult<Content> + Send + Sync,
{
    fn generate(&self, args: &[String]) -> CoreResult<Content> {
        self(args)
    }
}

// ---------------------------------------------------------------------------
// レジストリ本体
// ---------------------------------------------------------------------------

struct Entry<T: ?Sized> {
    name: String,
    op: Arc<T>,
    support: FormatSupport,
}

/// 1種類分のケイパビリティレジストリ。登録順が自動ディスパッチの優先順位になる。
pub struct CapabilityRegistry<T: ?Sized> {
    kind: StepKind,
    entries: Vec<Entry<T>>,
}

impl<T: ?Sized> CapabilityRegistry<T> {
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            entries: Vec::new(),
        }
    }

    pub fn kind(&self) -> StepKind {
        self.kind
    }

    /// 同名の登録があれば優先順位を保ったまま置き換える。
    fn insert(&mut self, name: String, op: Arc<T>, support: FormatSupport) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.name == name) {
            tracing::debug!(kind = %self.kind, name = %name, "登録済みの操作を置き換えます");
            entry.op = op;
            entry.support = support;
        } else {
            tracing::debug!(kind = %self.kind, name = %name, "操作を登録しました");
            self.entries.push(Entry { name, op, support });
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    /// 登録順の操作名一覧
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn unregistered(&self, name: Option<&str>) -> CoreError {
        CoreError::UnregisteredCapability {
            kind: self.kind,
            name: name.map(str::to_string),
        }
    }

    fn find(&self, name: &str) -> CoreResult<&Entry<T>> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| self.unregistered(Some(name)))
    }

    /// 名前指定・自動ディスパッチ共通の処理。
    /// `f` は (登録名, 操作) を受け取り、結果がなければ `Ok(None)` を返す。
    fn dispatch<R>(
        &self,
        name: Option<&str>,
        content: &Content,
        mut f: impl FnMut(&str, &T) -> CoreResult<Option<R>>,
    ) -> CoreResult<Option<R>> {
        let format = content.format_or_ext();
        match name {
            Some(name) => {
                let entry = self.find(name)?;
                if !entry.support.accepts(format.as_deref()) {
                    return Err(CoreError::UnsupportedFormat {
                        kind: self.kind,
                        name: name.to_string(),
                        format: format.unwrap_or_else(|| "unknown".to_string()),
                    });
                }
                f(&entry.name, &*entry.op)
            }
            None => {
                for entry in &self.entries {
                    if !entry.support.accepts(format.as_deref()) {
                        continue;
                    }
                    if let Some(result) = f(&entry.name, &*entry.op)? {
                        tracing::debug!(kind = %self.kind, name = %entry.name, "自動ディスパッチで選択");
                        return Ok(Some(result));
                    }
                }
                Err(self.unregistered(None))
            }
        }
    }
}

impl CapabilityRegistry<dyn Analyser> {
    pub fn register(&mut self, name: impl Into<String>, op: impl Analyser + 'static) {
        self.insert(name.into(), Arc::new(op), FormatSupport::Any);
    }

    pub fn register_with(
        &mut self,
        name: impl Into<String>,
        op: impl Analyser + 'static,
        support: FormatSupport,
    ) {
        self.insert(name.into(), Arc::new(op), support);
    }

    /// 解析を実行する。名前指定時に値がなければ `Ok(None)`。
    pub fn call(
        &self,
        name: Option<&str>,
        content: &Content,
        args: &[String],
    ) -> CoreResult<Option<serde_json::Value>> {
        self.dispatch(name, content, |_, op| op.analyse(content, args))
    }
}

impl CapabilityRegistry<dyn Processor> {
    pub fn register(&mut self, name: impl Into<String>, op: impl Processor + 'static) {
        self.insert(name.into(), Arc::new(op), FormatSupport::Any);
    }

    pub fn register_with(
        &mut self,
        name: impl Into<String>,
        op: impl Processor + 'static,
        support: FormatSupport,
    ) {
        self.insert(name.into(), Arc::new(op), support);
    }

    pub fn call(&self, name: Option<&str>, content: &Content, args: &[String]) -> CoreResult<Content> {
        self.dispatch(name, content, |_, op| op.process(content, args).map(Some))?
            .ok_or_else(|| self.unregistered(name))
    }
}

impl CapabilityRegistry<dyn Encoder> {
    pub fn register(&mut self, name: impl Into<String>, op: impl Encoder + 'static) {
        self.insert(name.into(), Arc::new(op), FormatSupport::Any);
    }

    pub fn register_with(
        &mut self,
        name: impl Into<String>,
        op: impl Encoder + 'static,
        support: FormatSupport,
    ) {
        self.insert(name.into(), Arc::new(op), support);
    }

    /// エンコードを実行し、結果のフォーマットを出力フォーマットに確定する。
    pub fn call(&self, name: Option<&str>, content: &Content, args: &[String]) -> CoreResult<Content> {
        self.dispatch(name, content, |registered, op| {
            let mut encoded = op.encode(content, args)?;
            encoded.set_format(op.output_format().unwrap_or(registered));
            Ok(Some(encoded))
        })?
        .ok_or_else(|| self.unregistered(name))
    }
}

impl CapabilityRegistry<dyn Generator> {
    pub fn register(&mut self, name: impl Into<String>, op: impl Generator + 'static) {
        self.insert(name.into(), Arc::new(op), FormatSupport::Any);
    }

    /// 生成を実行する。入力コンテンツがないためフォーマット判定は行わない。
    pub fn call(&self, name: &str, args: &[String]) -> CoreResult<Content> {
        self.find(name)?.op.generate(args)
    }
}

// ---------------------------------------------------------------------------
// 4種のレジストリの束
// ---------------------------------------------------------------------------

/// 解析・加工・エンコード・生成のレジストリ一式。
pub struct Capabilities {
    pub analysers: CapabilityRegistry<dyn Analyser>,
    pub processors: CapabilityRegistry<dyn Processor>,
    pub encoders: CapabilityRegistry<dyn Encoder>,
    pub generators: CapabilityRegistry<dyn Generator>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            analysers: CapabilityRegistry::new(StepKind::Analyse),
            processors: CapabilityRegistry::new(StepKind::Process),
            encoders: CapabilityRegistry::new(StepKind::Encode),
            generators: CapabilityRegistry::new(StepKind::Generate),
        }
    }
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// 1ステップを適用する。
    ///
    /// - 加工・生成・エンコード: 結果で置き換える
    /// - 解析: 値があればステップ名をキーにメタデータへ記録する
    pub fn apply(&self, step: &Step, content: Content) -> CoreResult<Content> {
        tracing::debug!(kind = %step.kind, name = %step.name, args = ?step.args, "ステップを適用");
        match step.kind {
            StepKind::Analyse => {
                let mut content = content;
                if let Some(value) = self.analysers.call(Some(&step.name), &content, &step.args)? {
                    content.set_meta(step.name.clone(), value);
                }
                Ok(content)
            }
            StepKind::Process => self.processors.call(Some(&step.name), &content, &step.args),
            StepKind::Encode => self.encoders.call(Some(&step.name), &content, &step.args),
            StepKind::Generate => self.generators.call(&step.name, &step.args),
        }
    }
}
