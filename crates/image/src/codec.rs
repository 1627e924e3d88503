//! # 画像の読み書き
//!
//! コンテンツと `image::DynamicImage` の相互変換、および引数の解釈。

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};

use katachi_core::{Content, CoreError, CoreResult};

/// 生成・加工で扱う画像の一辺の上限（ピクセル）。
pub const MAX_DIMENSION: u32 = 10_000;

/// 扱えるフォーマット名。
pub const IMAGE_FORMATS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff"];

/// フォーマットが不明か、扱える画像フォーマットか。
/// 不明な場合はデコード時に判定する。
pub fn accepts_format(format: Option<&str>) -> bool {
    format.map_or(true, |f| IMAGE_FORMATS.contains(&f))
}

/// フォーマット名 → `ImageFormat`
pub fn format_from_name(name: &str) -> Option<ImageFormat> {
    match name.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
        "png" => Some(ImageFormat::Png),
        "gif" => Some(ImageFormat::Gif),
        "webp" => Some(ImageFormat::WebP),
        "bmp" => Some(ImageFormat::Bmp),
        "tif" | "tiff" => Some(ImageFormat::Tiff),
        _ => None,
    }
}

/// `ImageFormat` → フォーマット名。扱わないフォーマットはNone。
pub fn format_name(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("jpg"),
        ImageFormat::Png => Some("png"),
        ImageFormat::Gif => Some("gif"),
        ImageFormat::WebP => Some("webp"),
        ImageFormat::Bmp => Some("bmp"),
        ImageFormat::Tiff => Some("tiff"),
        _ => None,
    }
}

/// データ先頭から画像フォーマットを推定する。
pub fn guess_format(data: &[u8]) -> Option<ImageFormat> {
    image::guess_format(data).ok().filter(|f| format_name(*f).is_some())
}

/// コンテンツをデコードし、元のフォーマットとともに返す。
pub fn decode(op: &str, content: &Content) -> CoreResult<(DynamicImage, ImageFormat)> {
    let data = content.data()?;
    let format = guess_format(&data)
        .ok_or_else(|| CoreError::operation(op, "画像として認識できないデータです"))?;
    let image = image::load_from_memory_with_format(&data, format)
        .map_err(|e| CoreError::operation(op, format!("画像のデコードに失敗: {e}")))?;
    Ok((image, format))
}

/// 画像をエンコードする。JPEGのみ品質を指定できる。
pub fn encode(op: &str, image: &DynamicImage, format: ImageFormat, quality: Option<u8>) -> CoreResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let result = match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            match quality {
                Some(q) => rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, q)),
                None => rgb.write_to(&mut buf, format),
            }
        }
        ImageFormat::Png | ImageFormat::Tiff => image.write_to(&mut buf, format),
        _ => DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut buf, format),
    };
    result.map_err(|e| CoreError::operation(op, format!("画像のエンコードに失敗: {e}")))?;
    Ok(buf.into_inner())
}

/// 加工結果を元と同じフォーマットで書き戻したコンテンツを作る。
pub fn replace(op: &str, content: &Content, image: &DynamicImage, format: ImageFormat) -> CoreResult<Content> {
    let data = encode(op, image, format, None)?;
    let mut out = content.derive(data);
    if let Some(name) = format_name(format) {
        out.set_format(name);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// 引数
// ---------------------------------------------------------------------------

/// `index` 番目の引数を数値として取り出す。
pub fn arg<T: std::str::FromStr>(op: &str, args: &[String], index: usize, what: &str) -> CoreResult<T> {
    let raw = args
        .get(index)
        .ok_or_else(|| CoreError::InvalidArgument(format!("{op}: {what} が指定されていません")))?;
    raw.trim()
        .parse()
        .map_err(|_| CoreError::InvalidArgument(format!("{op}: {what} が不正です: {raw:?}")))
}

/// 省略可能な引数。空文字は省略扱い。
pub fn optional_arg<T: std::str::FromStr>(
    op: &str,
    args: &[String],
    index: usize,
    what: &str,
) -> CoreResult<Option<T>> {
    match args.get(index) {
        Some(raw) if !raw.is_empty() => arg(op, args, index, what).map(Some),
        _ => Ok(None),
    }
}

/// 一辺の長さを検証する。
pub fn check_dimension(op: &str, value: u32) -> CoreResult<u32> {
    if value == 0 || value > MAX_DIMENSION {
        return Err(CoreError::InvalidArgument(format!(
            "{op}: 画像サイズは1から{MAX_DIMENSION}の範囲である必要があります: {value}"
        )));
    }
    Ok(value)
}
