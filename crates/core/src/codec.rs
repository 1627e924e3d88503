//! # チェーンのURLパス表現
//!
//! 変換チェーンとURLパスを一対一に対応させる。
//!
//! ## 形式
//! `/<セグメント>/<セグメント>/...`
//!
//! - 先頭セグメントはソース、以降は順にステップ
//! - セグメント = `<コード>~<フィールド>~<フィールド>...`
//! - コード: `f` 取得（uid）/ `g` 生成 / `p` 加工 / `e` エンコード / `a` 解析
//! - フィールドは `application/x-www-form-urlencoded` 形式でエスケープする。
//!   エスケープ結果は `~` と `/` を含まないため区切りと衝突しない
//!
//! 引数は可変長なので、任意引数を後から足しても以前のパスはそのまま読める。
//! デコード時はエスケープが正規形であることまで確認し、
//! 同じチェーンを表す別表記を受け付けない。

use url::form_urlencoded;

use katachi_types::{ChainSpec, SourceSpec, Step, StepKind};

use crate::error::{CoreError, CoreResult};

/// セグメント内のフィールド区切り。
pub const FIELD_SEPARATOR: char = '~';

const CODE_FETCH: &str = "f";
const CODE_GENERATE: &str = "g";
const CODE_PROCESS: &str = "p";
const CODE_ENCODE: &str = "e";
const CODE_ANALYSE: &str = "a";

fn step_code(kind: StepKind) -> &'static str {
    match kind {
        StepKind::Analyse => CODE_ANALYSE,
        StepKind::Process => CODE_PROCESS,
        StepKind::Encode => CODE_ENCODE,
        StepKind::Generate => CODE_GENERATE,
    }
}

fn step_kind(code: &str) -> Option<StepKind> {
    match code {
        CODE_ANALYSE => Some(StepKind::Analyse),
        CODE_PROCESS => Some(StepKind::Process),
        CODE_ENCODE => Some(StepKind::Encode),
        CODE_GENERATE => Some(StepKind::Generate),
        _ => None,
    }
}

/// フィールドを1つエスケープする。
fn escape(field: &str) -> String {
    form_urlencoded::byte_serialize(field.as_bytes()).collect()
}

/// エスケープ済みフィールドを戻す。正規形でなければエラー。
fn unescape(field: &str) -> CoreResult<String> {
    if let Some(c) = field
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(*c, '*' | '-' | '.' | '_' | '+' | '%')))
    {
        return Err(CoreError::Parse(format!("使用できない文字が含まれています: {c:?}")));
    }
    // 上の検査で '&' と '=' は含まれないため、得られるのは高々1組
    let decoded = form_urlencoded::parse(field.as_bytes())
        .next()
        .map(|(key, _)| key.into_owned())
        .unwrap_or_default();
    if escape(&decoded) != field {
        return Err(CoreError::Parse(format!("エスケープが正規形ではありません: {field}")));
    }
    Ok(decoded)
}

fn segment(code: &str, name: &str, args: &[String]) -> String {
    let mut out = String::from(code);
    for field in std::iter::once(name).chain(args.iter().map(String::as_str)) {
        out.push(FIELD_SEPARATOR);
        out.push_str(&escape(field));
    }
    out
}

fn require_name(what: &str, name: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::InvalidArgument(format!("{what}の名前が空です")));
    }
    Ok(())
}

/// チェーンをURLパスにエンコードする。
pub fn encode_path(spec: &ChainSpec) -> CoreResult<String> {
    let mut segments = Vec::with_capacity(spec.steps.len() + 1);
    match &spec.source {
        SourceSpec::Fetch { uid } => {
            require_name("uid", uid)?;
            segments.push(segment(CODE_FETCH, uid, &[]));
        }
        SourceSpec::Generate { name, args } => {
            require_name("ジェネレータ", name)?;
            segments.push(segment(CODE_GENERATE, name, args));
        }
    }
    for step in &spec.steps {
        require_name(step.kind.as_str(), &step.name)?;
        segments.push(segment(step_code(step.kind), &step.name, &step.args));
    }
    Ok(format!("/{}", segments.join("/")))
}

/// セグメントを (コード, 名前, 引数) に分解する。
fn split_segment(raw: &str) -> CoreResult<(&str, String, Vec<String>)> {
    let mut parts = raw.split(FIELD_SEPARATOR);
    let code = parts.next().unwrap_or_default();
    let name = match parts.next() {
        Some(name) => unescape(name)?,
        None => return Err(CoreError::Parse(format!("名前がありません: {raw}"))),
    };
    if name.is_empty() {
        return Err(CoreError::Parse(format!("名前が空です: {raw}")));
    }
    let args = parts.map(unescape).collect::<CoreResult<Vec<_>>>()?;
    Ok((code, name, args))
}

/// URLパスをチェーンにデコードする。
pub fn decode_path(path: &str) -> CoreResult<ChainSpec> {
    let body = path
        .strip_prefix('/')
        .ok_or_else(|| CoreError::Parse("パスは '/' で始まる必要があります".to_string()))?;
    if body.is_empty() {
        return Err(CoreError::Parse("ソースがありません".to_string()));
    }

    let mut segments = body.split('/');
    let first = segments.next().unwrap_or_default();
    if first.is_empty() {
        return Err(CoreError::Parse("空のセグメントがあります".to_string()));
    }
    let (code, name, args) = split_segment(first)?;
    let source = match code {
        CODE_FETCH => {
            if !args.is_empty() {
                return Err(CoreError::Parse(format!("取得セグメントに余分なフィールドがあります: {first}")));
            }
            SourceSpec::Fetch { uid: name }
        }
        CODE_GENERATE => SourceSpec::Generate { name, args },
        other => {
            return Err(CoreError::Parse(format!("ソースとして使えないコードです: {other:?}")));
        }
    };

    let mut steps = Vec::new();
    for raw in segments {
        if raw.is_empty() {
            return Err(CoreError::Parse("空のセグメントがあります".to_string()));
        }
        let (code, name, args) = split_segment(raw)?;
        let kind = step_kind(code)
            .ok_or_else(|| CoreError::Parse(format!("未知のステップコードです: {code:?}")))?;
        steps.push(Step { kind, name, args });
    }

    Ok(ChainSpec { source, steps })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetch(uid: &str) -> SourceSpec {
        SourceSpec::Fetch { uid: uid.to_string() }
    }

    #[test]
    fn test_encode_simple_chain() {
        let spec = ChainSpec {
            source: fetch("abc123"),
            steps: vec![
                Step::new(StepKind::Process, "resize", [100, 100]),
                Step::new(StepKind::Encode, "jpg", Vec::<String>::new()),
            ],
        };
        assert_eq!(encode_path(&spec).unwrap(), "/f~abc123/p~resize~100~100/e~jpg");
    }

    /// 特殊文字を含むチェーンが往復で一致することを確認
    #[test]
    fn test_roundtrip_with_special_characters() {
        let specs = vec![
            ChainSpec {
                source: fetch("2026/10/19/photo one.jpg"),
                steps: vec![
                    Step::new(StepKind::Process, "thumb", ["300x200#"]),
                    Step::new(StepKind::Process, "text", ["~ tilde / slash & amp = eq ? q"]),
                    Step::new(StepKind::Process, "unicode", ["形", "", "+", "%41"]),
                    Step::new(StepKind::Analyse, "width", Vec::<String>::new()),
                    Step::new(StepKind::Encode, "webp", ["80"]),
                ],
            },
            ChainSpec {
                source: SourceSpec::Generate {
                    name: "plain".to_string(),
                    args: vec!["10".into(), "20".into(), "#ff0000".into()],
                },
                steps: vec![Step::new(StepKind::Generate, "plain", ["1", "1"])],
            },
            ChainSpec {
                source: fetch("x"),
                steps: vec![],
            },
        ];

        for spec in specs {
            let path = encode_path(&spec).unwrap();
            assert!(!path.contains(&['?', '#', ' ', '&'][..]), "URLパスとして安全でない: {path}");
            assert_eq!(decode_path(&path).unwrap(), spec, "往復で一致しない: {path}");
        }
    }

    /// 空引数と引数なしが区別されることを確認
    #[test]
    fn test_empty_argument_is_distinct_from_no_argument() {
        let none = ChainSpec {
            source: fetch("u"),
            steps: vec![Step::new(StepKind::Process, "p", Vec::<String>::new())],
        };
        let empty = ChainSpec {
            source: fetch("u"),
            steps: vec![Step::new(StepKind::Process, "p", [""])],
        };
        let a = encode_path(&none).unwrap();
        let b = encode_path(&empty).unwrap();
        assert_ne!(a, b);
        assert_eq!(decode_path(&a).unwrap(), none);
        assert_eq!(decode_path(&b).unwrap(), empty);
    }

    /// 引数を後から増やしても以前のパスが読めることを確認
    #[test]
    fn test_older_paths_still_decode() {
        let old = decode_path("/f~uid/p~thumb~100x100").unwrap();
        let new = decode_path("/f~uid/p~thumb~100x100~center").unwrap();
        assert_eq!(old.steps[0].args, vec!["100x100"]);
        assert_eq!(new.steps[0].args, vec!["100x100", "center"]);
    }

    /// 不正なパスがParseErrorになることを確認
    #[test]
    fn test_malformed_paths_are_rejected() {
        let bad = [
            "",
            "f~uid",
            "/",
            "/f~uid/",
            "/f~uid//p~x",
            "/f",
            "/f~",
            "/f~uid~extra",
            "/p~resize",
            "/f~uid/f~other",
            "/f~uid/z~thing",
            "/f~uid/p~",
            "/f~uid/p~re size",
            "/f~uid/p~x~%zz",
            "/f~uid/p~x~%4",
            "/f~uid/p~x~%41",
            "/f~uid/p~x~a%2b",
            "/f~uid/p~x~%FF",
            "/f~uid/p~x~a=b",
        ];
        for path in bad {
            let result = decode_path(path);
            assert!(
                matches!(result, Err(CoreError::Parse(_))),
                "{path:?} が拒否されなかった: {result:?}"
            );
        }
    }

    /// 名前が空のチェーンはエンコードできないことを確認
    #[test]
    fn test_encode_rejects_empty_names() {
        let spec = ChainSpec {
            source: fetch(""),
            steps: vec![],
        };
        assert!(matches!(encode_path(&spec), Err(CoreError::InvalidArgument(_))));

        let spec = ChainSpec {
            source: fetch("u"),
            steps: vec![Step::new(StepKind::Process, "", Vec::<String>::new())],
        };
        assert!(matches!(encode_path(&spec), Err(CoreError::InvalidArgument(_))));
    }
}
