//! # Katachi 画像モジュール
//!
//! `image` クレートを使った解析・加工・エンコード・生成のケイパビリティ。
//! 登録は `register_all` を明示的に呼んだときにのみ行われる。
//!
//! ## 登録名
//! - 解析: `image`
//! - 加工: `resize`, `thumb`, `crop`, `rotate`, `flip`, `flop`, `grayscale`, `blur`
//! - エンコード: `jpg`, `jpeg`, `png`, `gif`, `bmp`, `tiff`, `webp`
//! - 生成: `plain`

pub mod analyser;
pub mod codec;
pub mod encode;
pub mod generate;
pub mod process;

use image::ImageFormat;

use katachi_core::{Capabilities, FormatSupport};

pub use analyser::ImageAnalyser;
pub use encode::ImageEncoder;
pub use generate::PlainGenerator;
pub use process::ImageProcessor;

/// 画像フォーマット（または不明）のコンテンツだけを受け付ける宣言。
pub fn image_support() -> FormatSupport {
    FormatSupport::predicate(codec::accepts_format)
}

/// すべての画像ケイパビリティを登録する。
pub fn register_all(caps: &mut Capabilities) {
    caps.analysers
        .register_with("image", ImageAnalyser, image_support());

    let processors: [(&'static str, process::ImageFn); 8] = [
        ("resize", process::resize),
        ("thumb", process::thumb),
        ("crop", process::crop),
        ("rotate", process::rotate),
        ("flip", process::flip),
        ("flop", process::flop),
        ("grayscale", process::grayscale),
        ("blur", process::blur),
    ];
    for (name, f) in processors {
        caps.processors
            .register_with(name, ImageProcessor::new(name, f), image_support());
    }

    let encoders = [
        ("jpg", ImageFormat::Jpeg),
        ("jpeg", ImageFormat::Jpeg),
        ("png", ImageFormat::Png),
        ("gif", ImageFormat::Gif),
        ("bmp", ImageFormat::Bmp),
        ("tiff", ImageFormat::Tiff),
        ("webp", ImageFormat::WebP),
    ];
    for (name, format) in encoders {
        if let Some(encoder) = ImageEncoder::new(format) {
            caps.encoders.register_with(name, encoder, image_support());
        }
    }

    caps.generators.register("plain", PlainGenerator);

    tracing::debug!("画像モジュールを登録しました");
}
