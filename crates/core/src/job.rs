//! # 変換チェーン
//!
//! ソースと順序付きステップ列の組。構築は値として行い（ステップの追加は
//! 新しいチェーンを返す）、実行は `execute` を呼ぶまで遅延される。
//!
//! ## 実行
//! 1. ソースを具体的なコンテンツに解決（データストア取得 / 生成 / 複製）
//! 2. ステップを順に適用
//!
//! 同期的なケイパビリティ呼び出しはステップごとに `spawn_blocking` で
//! ブロッキング用スレッドに載せる。リクエストが破棄されると、
//! 実行中のステップは最後まで走るが次のステップは開始されない。

use std::sync::Arc;

use katachi_types::{ChainSpec, SourceSpec, Step, StepKind};

use crate::codec;
use crate::content::Content;
use crate::datastore::DataStore;
use crate::error::{CoreError, CoreResult};
use crate::registry::Capabilities;

/// チェーンのソース。
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    /// データストアから取得する
    Fetch { uid: String },
    /// ジェネレータで生成する
    Generate { name: String, args: Vec<String> },
    /// 手元のコンテンツをそのまま使う（URL化はできない）
    Content(Content),
}

/// 変換チェーン。
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    source: Source,
    steps: Vec<Step>,
}

fn to_args<I, A>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = A>,
    A: ToString,
{
    args.into_iter().map(|a| a.to_string()).collect()
}

impl Job {
    pub fn new(source: Source) -> Self {
        Self {
            source,
            steps: Vec::new(),
        }
    }

    /// データストアのuidをソースとするチェーン。
    pub fn from_uid(uid: impl Into<String>) -> Self {
        Self::new(Source::Fetch { uid: uid.into() })
    }

    /// ジェネレータをソースとするチェーン。
    pub fn from_generator<I, A>(name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        Self::new(Source::Generate {
            name: name.into(),
            args: to_args(args),
        })
    }

    /// 手元のコンテンツをソースとするチェーン。
    pub fn from_content(content: Content) -> Self {
        Self::new(Source::Content(content))
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    // -----------------------------------------------------------------------
    // 構築（いずれも元のチェーンは変更しない）
    // -----------------------------------------------------------------------

    pub fn with_step<I, A>(&self, kind: StepKind, name: impl Into<String>, args: I) -> Job
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        self.with_steps([Step::new(kind, name, args)])
    }

    /// ステップ列をまとめて末尾に追加する。
    pub fn with_steps(&self, steps: impl IntoIterator<Item = Step>) -> Job {
        let mut job = self.clone();
        job.steps.extend(steps);
        job
    }

    pub fn process<I, A>(&self, name: impl Into<String>, args: I) -> Job
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        self.with_step(StepKind::Process, name, args)
    }

    /// 引数なしのエンコード。
    pub fn encode(&self, name: impl Into<String>) -> Job {
        self.encode_with(name, Vec::<String>::new())
    }

    pub fn encode_with<I, A>(&self, name: impl Into<String>, args: I) -> Job
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        self.with_step(StepKind::Encode, name, args)
    }

    /// 引数なしの解析。結果は実行時にメタデータへ記録される。
    pub fn analyse(&self, name: impl Into<String>) -> Job {
        self.analyse_with(name, Vec::<String>::new())
    }

    pub fn analyse_with<I, A>(&self, name: impl Into<String>, args: I) -> Job
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        self.with_step(StepKind::Analyse, name, args)
    }

    pub fn generate<I, A>(&self, name: impl Into<String>, args: I) -> Job
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        self.with_step(StepKind::Generate, name, args)
    }

    // -----------------------------------------------------------------------
    // 実行
    // -----------------------------------------------------------------------

    /// ソースを解決し、ステップを順に適用した結果を返す。
    pub async fn execute(&self, caps: &Arc<Capabilities>, datastore: &dyn DataStore) -> CoreResult<Content> {
        let mut content = match &self.source {
            Source::Fetch { uid } => {
                tracing::debug!(uid = %uid, "データストアから取得");
                datastore.fetch(uid).await?
            }
            Source::Generate { name, args } => {
                let caps = Arc::clone(caps);
                let (name, args) = (name.clone(), args.clone());
                run_blocking(move || caps.generators.call(&name, &args)).await?
            }
            Source::Content(content) => content.clone(),
        };
        for step in &self.steps {
            let caps = Arc::clone(caps);
            let step = step.clone();
            content = run_blocking(move || caps.apply(&step, content)).await?;
        }
        Ok(content)
    }

    // -----------------------------------------------------------------------
    // 直列化
    // -----------------------------------------------------------------------

    /// JSON表現に変換する。手元のコンテンツをソースに持つ場合は表現できない。
    pub fn to_spec(&self) -> CoreResult<ChainSpec> {
        let source = match &self.source {
            Source::Fetch { uid } => SourceSpec::Fetch { uid: uid.clone() },
            Source::Generate { name, args } => SourceSpec::Generate {
                name: name.clone(),
                args: args.clone(),
            },
            Source::Content(_) => {
                return Err(CoreError::InvalidArgument(
                    "手元のコンテンツをソースとするチェーンはURLで表現できません".to_string(),
                ));
            }
        };
        Ok(ChainSpec {
            source,
            steps: self.steps.clone(),
        })
    }

    pub fn from_spec(spec: ChainSpec) -> Job {
        let source = match spec.source {
            SourceSpec::Fetch { uid } => Source::Fetch { uid },
            SourceSpec::Generate { name, args } => Source::Generate { name, args },
        };
        Job {
            source,
            steps: spec.steps,
        }
    }

    /// 正規形のURLパスにエンコードする（パスプレフィックスは含まない）。
    pub fn encode_to_path(&self) -> CoreResult<String> {
        codec::encode_path(&self.to_spec()?)
    }

    /// URLパスからチェーンを復元する。
    pub fn decode_from_path(path: &str) -> CoreResult<Job> {
        codec::decode_path(path).map(Job::from_spec)
    }
}

/// 同期処理をブロッキング用スレッドで実行する。
async fn run_blocking<T, F>(f: F) -> CoreResult<T>
where
    F: FnOnce() -> CoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CoreError::operation("spawn_blocking", e))?
}
