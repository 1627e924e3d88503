//! # Katachi 共有型定義
//!
//! 変換チェーンの記述とHTTPサーバーのリクエスト/レスポンスを
//! Rust構造体として提供する。
//!
//! ## エンコーディング規則
//! - JSON: テンプレート定義ファイル、URL発行API、CLI出力
//! - URLパス: `katachi-core` の `codec` モジュールを参照

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// 署名を格納するクエリパラメータ名。
pub const SIGNATURE_PARAM: &str = "sha";

// ---------------------------------------------------------------------------
// ステップ
// ---------------------------------------------------------------------------

/// 変換ステップの種別。どのケイパビリティレジストリで解決するかを決める。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// 解析（コンテンツは変えず、メタデータを得る）
    Analyse,
    /// 加工（コンテンツを置き換える）
    Process,
    /// エンコード（コンテンツを置き換え、フォーマットを確定する）
    Encode,
    /// 生成（入力を使わずコンテンツを作る）
    Generate,
}

impl StepKind {
    /// ログやエラーメッセージ用の名前。
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Analyse => "analyse",
            StepKind::Process => "process",
            StepKind::Encode => "encode",
            StepKind::Generate => "generate",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 変換チェーンの1ステップ。
/// 引数は順序付きの文字列列で、意味は各ケイパビリティが解釈する。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Step {
    /// ステップ種別
    pub kind: StepKind,
    /// レジストリに登録された操作名
    pub name: String,
    /// 操作への引数
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl Step {
    /// 任意の `ToString` 値を引数に取ってステップを構築する。
    pub fn new<I, A>(kind: StepKind, name: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: ToString,
    {
        Self {
            kind,
            name: name.into(),
            args: args.into_iter().map(|a| a.to_string()).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// チェーン記述
// ---------------------------------------------------------------------------

/// 変換チェーンのソース。URLで表現できるものだけを持つ。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceSpec {
    /// データストアから取得する
    Fetch {
        /// データストア上の識別子
        uid: String,
    },
    /// ジェネレータで生成する
    Generate {
        /// ジェネレータ名
        name: String,
        /// ジェネレータ引数
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<String>,
    },
}

/// 変換チェーン全体のJSON表現。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSpec {
    /// ソース
    pub source: SourceSpec,
    /// 順序付きステップ列
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// 名前付きチェーンテンプレートの定義ファイル形式。
/// テンプレート名 → ステップ列。引数中の `$0`, `$1`… は適用時に置換される。
pub type TemplateSet = BTreeMap<String, Vec<Step>>;

// ---------------------------------------------------------------------------
// サーバーAPI
// ---------------------------------------------------------------------------

/// POST /content のレスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    /// 保存されたコンテンツの識別子
    pub uid: String,
    /// 取得用の（署名付き）URL
    pub url: String,
}

/// テンプレートの呼び出し。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateCall {
    /// テンプレート名
    pub name: String,
    /// `$0`, `$1`… に埋め込む引数
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

/// POST /url のリクエスト。
/// チェーンの後ろにテンプレートのステップ列を続けることができる。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlRequest {
    /// 変換チェーン
    #[serde(flatten)]
    pub chain: ChainSpec,
    /// 末尾に適用するテンプレート
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateCall>,
}

/// POST /url のレスポンス。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlResponse {
    /// チェーンの（署名付き）URL
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// テンプレート定義ファイルが期待する形でパースできることを確認
    #[test]
    fn test_template_set_from_json() {
        let json = r#"{
            "thumb": [
                {"kind": "process", "name": "thumb", "args": ["$0"]},
                {"kind": "encode", "name": "jpg"}
            ]
        }"#;
        let set: TemplateSet = serde_json::from_str(json).unwrap();
        let thumb = &set["thumb"];
        assert_eq!(thumb.len(), 2);
        assert_eq!(thumb[0], Step::new(StepKind::Process, "thumb", ["$0"]));
        assert!(thumb[1].args.is_empty());
    }

    /// URL発行リクエストがチェーンとテンプレートを同じ階層で受け取ることを確認
    #[test]
    fn test_url_request_flattened() {
        let request: UrlRequest = serde_json::from_value(serde_json::json!({
            "source": {"type": "fetch", "uid": "abc"},
            "template": {"name": "thumb", "args": ["100x100"]}
        }))
        .unwrap();
        assert_eq!(request.chain.source, SourceSpec::Fetch { uid: "abc".to_string() });
        assert!(request.chain.steps.is_empty());
        assert_eq!(request.template.unwrap().args, vec!["100x100"]);
    }

    /// ソースが `type` タグで判別されることを確認
    #[test]
    fn test_chain_spec_source_tag() {
        let spec: ChainSpec = serde_json::from_value(serde_json::json!({
            "source": {"type": "generate", "name": "plain", "args": ["10", "10", "ff0000"]},
            "steps": [{"kind": "encode", "name": "png"}]
        }))
        .unwrap();
        assert_eq!(
            spec.source,
            SourceSpec::Generate {
                name: "plain".to_string(),
                args: vec!["10".into(), "10".into(), "ff0000".into()],
            }
        );
        assert_eq!(spec.steps[0].kind, StepKind::Encode);
    }
}
