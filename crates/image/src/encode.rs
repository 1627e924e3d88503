//! # 画像エンコード
//!
//! `jpg` / `jpeg` は省略可能な品質（1-100）を取る。その他は引数なし。

use image::ImageFormat;

use katachi_core::{Content, CoreError, CoreResult, Encoder};

use crate::codec::{decode, encode, format_name, optional_arg};

/// 指定フォーマットへのエンコーダ。
#[derive(Debug, Clone, Copy)]
pub struct ImageEncoder {
    format: ImageFormat,
    output: &'static str,
}

impl ImageEncoder {
    /// 扱えないフォーマットならNone。
    pub fn new(format: ImageFormat) -> Option<Self> {
        format_name(format).map(|output| Self { format, output })
    }
}

impl Encoder for ImageEncoder {
    fn encode(&self, content: &Content, args: &[String]) -> CoreResult<Content> {
        let op = self.output;
        let quality = match self.format {
            ImageFormat::Jpeg => optional_arg::<u8>(op, args, 0, "品質")?,
            _ => None,
        };
        if let Some(q) = quality {
            if !(1..=100).contains(&q) {
                return Err(CoreError::InvalidArgument(format!(
                    "{op}: 品質は1から100の範囲である必要があります: {q}"
                )));
            }
        }
        let (image, _) = decode(op, content)?;
        let data = encode(op, &image, self.format, quality)?;
        Ok(content.derive(data))
    }

    fn output_format(&self) -> Option<&str> {
        Some(self.output)
    }
}
