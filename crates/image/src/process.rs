//! # 画像加工
//!
//! 加工結果は入力と同じフォーマットで書き戻す。
//!
//! | 名前 | 引数 |
//! |------|------|
//! | `resize` | 幅, 高さ（縦横比を無視） |
//! | `thumb` | ジオメトリ `WxH` / `Wx` / `xH` / `WxH#`（切り抜き） / `WxH!`（縦横比を無視） |
//! | `crop` | x, y, 幅, 高さ |
//! | `rotate` | 90 / 180 / 270 |
//! | `flip`, `flop` | 上下 / 左右反転 |
//! | `grayscale` | なし |
//! | `blur` | sigma |

use image::imageops::FilterType;
use image::DynamicImage;

use katachi_core::{Content, CoreError, CoreResult, Processor};

use crate::codec::{arg, check_dimension, decode, replace, MAX_DIMENSION};

/// 画像1枚に対する加工関数。第1引数は操作名（エラーメッセージ用）。
pub type ImageFn = fn(&str, DynamicImage, &[String]) -> CoreResult<DynamicImage>;

/// リサイズに使うフィルタ。
const FILTER: FilterType = FilterType::Lanczos3;

/// 画像1枚を変換する関数を加工として包む。
pub struct ImageProcessor<F> {
    name: &'static str,
    f: F,
}

impl<F> ImageProcessor<F>
where
    F: Fn(&str, DynamicImage, &[String]) -> CoreResult<DynamicImage> + Send + Sync,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> Processor for ImageProcessor<F>
where
    F: Fn(&str, DynamicImage, &[String]) -> CoreResult<DynamicImage> + Send + Sync,
{
    fn process(&self, content: &Content, args: &[String]) -> CoreResult<Content> {
        let (image, format) = decode(self.name, content)?;
        let (width, height) = (image.width(), image.height());
        let processed = (self.f)(self.name, image, args)?;
        tracing::debug!(
            op = self.name,
            from = %format!("{width}x{height}"),
            to = %format!("{}x{}", processed.width(), processed.height()),
            "画像を加工しました"
        );
        replace(self.name, content, &processed, format)
    }
}

// ---------------------------------------------------------------------------
// 各加工
// ---------------------------------------------------------------------------

pub fn resize(op: &str, image: DynamicImage, args: &[String]) -> CoreResult<DynamicImage> {
    let width = check_dimension(op, arg(op, args, 0, "幅")?)?;
    let height = check_dimension(op, arg(op, args, 1, "高さ")?)?;
    Ok(image.resize_exact(width, height, FILTER))
}

/// サムネイルのジオメトリ。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Geometry {
    /// 枠内に収める（縦横比維持）
    Fit { width: Option<u32>, height: Option<u32> },
    /// 枠を埋めてはみ出しを中央で切り抜く
    Fill { width: u32, height: u32 },
    /// 指定サイズに変形する
    Exact { width: u32, height: u32 },
}

/// `WxH` 形式のジオメトリを解釈する。
pub fn parse_geometry(op: &str, raw: &str) -> CoreResult<Geometry> {
    let invalid = || CoreError::InvalidArgument(format!("{op}: ジオメトリが不正です: {raw:?}"));
    let (body, mode) = match raw.chars().last() {
        Some(c @ ('#' | '!')) => (&raw[..raw.len() - 1], Some(c)),
        _ => (raw, None),
    };
    let (w, h) = body.split_once('x').ok_or_else(invalid)?;
    let side = |s: &str| -> CoreResult<Option<u32>> {
        if s.is_empty() {
            return Ok(None);
        }
        let value = s.parse().map_err(|_| invalid())?;
        check_dimension(op, value).map(Some)
    };
    let (width, height) = (side(w)?, side(h)?);
    match (mode, width, height) {
        (_, None, None) => Err(invalid()),
        (None, width, height) => Ok(Geometry::Fit { width, height }),
        (Some('#'), Some(width), Some(height)) => Ok(Geometry::Fill { width, height }),
        (Some(_), Some(width), Some(height)) => Ok(Geometry::Exact { width, height }),
        (Some(_), _, _) => Err(invalid()),
    }
}

pub fn thumb(op: &str, image: DynamicImage, args: &[String]) -> CoreResult<DynamicImage> {
    let raw = args
        .first()
        .ok_or_else(|| CoreError::InvalidArgument(format!("{op}: ジオメトリが指定されていません")))?;
    Ok(match parse_geometry(op, raw)? {
        // 省略した辺も上限で抑え、拡大しすぎないようにする
        Geometry::Fit { width, height } => image.resize(
            width.unwrap_or(MAX_DIMENSION),
            height.unwrap_or(MAX_DIMENSION),
            FILTER,
        ),
        Geometry::Fill { width, height } => image.resize_to_fill(width, height, FILTER),
        Geometry::Exact { width, height } => image.resize_exact(width, height, FILTER),
    })
}

pub fn crop(op: &str, image: DynamicImage, args: &[String]) -> CoreResult<DynamicImage> {
    let x: u32 = arg(op, args, 0, "x")?;
    let y: u32 = arg(op, args, 1, "y")?;
    let width = check_dimension(op, arg(op, args, 2, "幅")?)?;
    let height = check_dimension(op, arg(op, args, 3, "高さ")?)?;
    if x >= image.width() || y >= image.height() {
        return Err(CoreError::InvalidArgument(format!(
            "{op}: 切り抜き位置 ({x}, {y}) が画像 {}x{} の外です",
            image.width(),
            image.height()
        )));
    }
    // はみ出した分は画像の端で止める
    Ok(image.crop_imm(x, y, width, height))
}

pub fn rotate(op: &str, image: DynamicImage, args: &[String]) -> CoreResult<DynamicImage> {
    match arg::<u32>(op, args, 0, "角度")? {
        90 => Ok(image.rotate90()),
        180 => Ok(image.rotate180()),
        270 => Ok(image.rotate270()),
        other => Err(CoreError::InvalidArgument(format!(
            "{op}: 角度は90, 180, 270のいずれかです: {other}"
        ))),
    }
}

pub fn flip(_op: &str, image: DynamicImage, _args: &[String]) -> CoreResult<DynamicImage> {
    Ok(image.flipv())
}

pub fn flop(_op: &str, image: DynamicImage, _args: &[String]) -> CoreResult<DynamicImage> {
    Ok(image.fliph())
}

pub fn grayscale(_op: &str, image: DynamicImage, _args: &[String]) -> CoreResult<DynamicImage> {
    Ok(image.grayscale())
}

pub fn blur(op: &str, image: DynamicImage, args: &[String]) -> CoreResult<DynamicImage> {
    let sigma: f32 = arg(op, args, 0, "sigma")?;
    if !(sigma.is_finite() && sigma > 0.0 && sigma <= 100.0) {
        return Err(CoreError::InvalidArgument(format!(
            "{op}: sigmaは0より大きく100以下である必要があります: {sigma}"
        )));
    }
    Ok(image.blur(sigma))
}
