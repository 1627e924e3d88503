//! # 画像解析
//!
//! 1つの解析でいくつかのプロパティに答える。引数の先頭が問い合わせ対象。
//!
//! | プロパティ | 値 |
//! |-----------|----|
//! | `width`, `height` | ピクセル数 |
//! | `aspect_ratio` | 幅 / 高さ |
//! | `portrait`, `landscape` | 縦長 / 横長か |
//! | `format`, `mime_type` | フォーマット名とMIMEタイプ |
//! | `image` | 画像としてデコードできるか |
//!
//! 幅・高さはヘッダのみを読み、全体のデコードは `image` でのみ行う。

use std::io::Cursor;

use image::ImageReader;
use serde_json::{json, Value};

use katachi_core::{Analyser, Content, CoreError, CoreResult};

use crate::codec::{format_name, guess_format};

/// 画像の解析。
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageAnalyser;

fn dimensions(data: &[u8]) -> CoreResult<(u32, u32)> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| CoreError::operation("image", e))?
        .into_dimensions()
        .map_err(|e| CoreError::operation("image", format!("画像サイズの取得に失敗: {e}")))
}

impl Analyser for ImageAnalyser {
    fn analyse(&self, content: &Content, args: &[String]) -> CoreResult<Option<Value>> {
        let Some(property) = args.first() else {
            return Ok(None);
        };
        let data = content.data()?;
        let Some(format) = guess_format(&data) else {
            // 画像でなければ答えない
            return Ok(None);
        };

        let value = match property.as_str() {
            "format" => format_name(format).map(Value::from),
            "mime_type" => Some(json!(format.to_mime_type())),
            "image" => Some(json!(image::load_from_memory_with_format(&data, format).is_ok())),
            "width" | "height" | "aspect_ratio" | "portrait" | "landscape" => {
                let (width, height) = dimensions(&data)?;
                Some(match property.as_str() {
                    "width" => json!(width),
                    "height" => json!(height),
                    "aspect_ratio" => json!(f64::from(width) / f64::from(height.max(1))),
                    "portrait" => json!(height > width),
                    _ => json!(width > height),
                })
            }
            _ => None,
        };
        Ok(value)
    }
}
