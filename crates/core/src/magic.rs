//! # マジックバイト解析
//!
//! データ先頭のシグネチャからフォーマットを判定する軽量な解析。
//! デコードを伴わないため、画像モジュールより前に登録して優先させる。

use serde_json::Value;

use crate::content::Content;
use crate::error::CoreResult;
use crate::registry::Analyser;

/// 登録名。
pub const MAGIC_ANALYSER: &str = "magic";

/// 先頭バイトからフォーマットとMIMEタイプを判定する。
pub fn detect_format(data: &[u8]) -> Option<(&'static str, &'static str)> {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(("jpg", "image/jpeg"))
    } else if data.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        Some(("png", "image/png"))
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some(("gif", "image/gif"))
    } else if data.len() >= 12 && data.starts_with(b"RIFF") && data[8..12] == *b"WEBP" {
        Some(("webp", "image/webp"))
    } else if data.starts_with(b"BM") && data.len() >= 14 {
        Some(("bmp", "image/bmp"))
    } else if data.starts_with(&[0x49, 0x49, 0x2A, 0x00]) || data.starts_with(&[0x4D, 0x4D, 0x00, 0x2A]) {
        Some(("tiff", "image/tiff"))
    } else if data.starts_with(b"%PDF-") {
        Some(("pdf", "application/pdf"))
    } else {
        None
    }
}

/// `mime_type` と `format` の2つのプロパティに答える解析。
#[derive(Debug, Default, Clone, Copy)]
pub struct MagicAnalyser;

impl Analyser for MagicAnalyser {
    fn analyse(&self, content: &Content, args: &[String]) -> CoreResult<Option<Value>> {
        let property = match args.first().map(String::as_str) {
            Some(p @ ("mime_type" | "format")) => p,
            _ => return Ok(None),
        };
        let data = content.data()?;
        Ok(detect_format(&data)
            .map(|(format, mime)| Value::from(if property == "format" { format } else { mime })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ask(data: &[u8], property: &str) -> Option<Value> {
        MagicAnalyser
            .analyse(&Content::new(data.to_vec()), &[property.to_string()])
            .unwrap()
    }

    #[test]
    fn test_detects_known_signatures() {
        let cases: &[(&[u8], &str, &str)] = &[
            (&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0], "jpg", "image/jpeg"),
            (&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A], "png", "image/png"),
            (b"GIF89a....", "gif", "image/gif"),
            (b"RIFF\x10\x00\x00\x00WEBPVP8 ", "webp", "image/webp"),
            (b"BM\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00\x00", "bmp", "image/bmp"),
            (b"II*\x00\x08\x00", "tiff", "image/tiff"),
            (b"%PDF-1.7\n", "pdf", "application/pdf"),
        ];
        for (data, format, mime) in cases {
            assert_eq!(ask(data, "format"), Some(json!(format)));
            assert_eq!(ask(data, "mime_type"), Some(json!(mime)));
        }
    }

    /// 未知のデータや未対応のプロパティには値を返さないことを確認
    #[test]
    fn test_unknown_yields_none() {
        assert_eq!(ask(b"hello world", "mime_type"), None);
        assert_eq!(ask(&[0xFF, 0xD8, 0xFF], "width"), None);
        assert_eq!(
            MagicAnalyser.analyse(&Content::new(vec![0xFF, 0xD8, 0xFF]), &[]).unwrap(),
            None
        );
    }
}
