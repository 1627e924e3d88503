//! # 画像生成
//!
//! `plain`: 単色の画像を生成する。引数は 幅, 高さ, 色, フォーマット（省略時 png）。
//! 色は `rgb` / `rrggbb` / `rrggbbaa` の16進表記（先頭の `#` は任意）。

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use katachi_core::{Content, CoreError, CoreResult, Generator};

use crate::codec::{arg, check_dimension, encode, format_from_name, format_name};

const OP: &str = "plain";

/// 色指定を解釈する。
pub fn parse_colour(raw: &str) -> CoreResult<[u8; 4]> {
    let hex = raw.trim_start_matches('#');
    let invalid = || CoreError::InvalidArgument(format!("{OP}: 色の指定が不正です: {raw:?}"));
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());
    match hex.len() {
        3 => {
            let mut out = [255u8; 4];
            for (i, c) in hex.chars().enumerate() {
                let v = channel(&c.to_string())?;
                out[i] = v * 17;
            }
            Ok(out)
        }
        6 | 8 => {
            let mut out = [255u8; 4];
            for i in 0..hex.len() / 2 {
                out[i] = channel(&hex[i * 2..i * 2 + 2])?;
            }
            Ok(out)
        }
        _ => Err(invalid()),
    }
}

/// 単色画像のコンテンツを作る。
pub fn plain(width: u32, height: u32, colour: [u8; 4], format: ImageFormat) -> CoreResult<Content> {
    let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(colour)));
    let data = encode(OP, &image, format, None)?;
    let mut content = Content::new(data);
    if let Some(name) = format_name(format) {
        content.set_format(name);
    }
    Ok(content)
}

/// 単色画像のジェネレータ。
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainGenerator;

impl Generator for PlainGenerator {
    fn generate(&self, args: &[String]) -> CoreResult<Content> {
        let width = check_dimension(OP, arg(OP, args, 0, "幅")?)?;
        let height = check_dimension(OP, arg(OP, args, 1, "高さ")?)?;
        let colour = match args.get(2) {
            Some(raw) if !raw.is_empty() => parse_colour(raw)?,
            _ => [255, 255, 255, 255],
        };
        let format = match args.get(3) {
            Some(raw) if !raw.is_empty() => format_from_name(raw)
                .ok_or_else(|| CoreError::InvalidArgument(format!("{OP}: 未対応のフォーマットです: {raw}")))?,
            _ => ImageFormat::Png,
        };
        plain(width, height, colour, format)
    }
}
