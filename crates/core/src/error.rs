//! # Core エラー型
//!
//! 変換チェーンの構築・検証・実行で共通のエラー型。

use katachi_types::StepKind;

/// データストア操作のエラー型。
/// バックエンド固有のエラーはすべてここに包む。
#[derive(Debug, thiserror::Error)]
pub enum DataStoreError {
    /// 指定されたuidのコンテンツが存在しない
    #[error("コンテンツが見つかりません: {0}")]
    NotFound(String),
    /// uidの形式が不正（パス走査などを含む）
    #[error("不正なuidです: {0}")]
    InvalidUid(String),
    /// バックエンドでの失敗
    #[error("データストア操作に失敗: {0}")]
    Backend(String),
    /// ローカルIOエラー
    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),
}

/// Coreのエラー型。
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// 設定が不正（秘密鍵の欠落、未知の設定キー等）
    #[error("設定エラー: {0}")]
    Configuration(String),
    /// エンコード済みパスの形式が不正
    #[error("パスの解析に失敗: {0}")]
    Parse(String),
    /// 名前付き操作が未登録、または自動ディスパッチで該当なし
    #[error("{kind}操作が登録されていません: {}", .name.as_deref().unwrap_or("(自動選択)"))]
    UnregisteredCapability {
        /// レジストリ種別
        kind: StepKind,
        /// 操作名（自動ディスパッチ時はNone）
        name: Option<String>,
    },
    /// 署名が欠落または不一致
    #[error("署名の検証に失敗: {0}")]
    Verification(String),
    /// データストアでの失敗
    #[error(transparent)]
    DataStore(#[from] DataStoreError),
    /// 操作が対応していないフォーマットのコンテンツに適用された
    #[error("{kind}操作 {name} はフォーマット {format} に対応していません")]
    UnsupportedFormat {
        /// レジストリ種別
        kind: StepKind,
        /// 操作名
        name: String,
        /// コンテンツのフォーマット（不明時は "unknown"）
        format: String,
    },
    /// 操作そのものの失敗（デコード不能なデータ等）
    #[error("操作 {name} の実行に失敗: {message}")]
    Operation {
        /// 操作名
        name: String,
        /// 失敗内容
        message: String,
    },
    /// 引数が不正（テンプレート引数の不足、URL化できないチェーン等）
    #[error("不正な引数: {0}")]
    InvalidArgument(String),
}

impl CoreError {
    /// 操作の失敗を作るヘルパー。ケイパビリティ実装から使う。
    pub fn operation(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        CoreError::Operation {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// 実行前に発生し、部分的な出力を持たないエラーかどうか。
    pub fn is_rejection(&self) -> bool {
        matches!(self, CoreError::Parse(_) | CoreError::Verification(_))
    }
}

/// Coreの結果型
pub type CoreResult<T> = Result<T, CoreError>;
