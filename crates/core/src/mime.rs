//! # MIMEタイプ表
//!
//! フォーマット（拡張子）→ MIMEタイプの対応表。
//! 既定の表から始まり、サービス構築時にのみ追加できる。

use std::collections::HashMap;

/// 既定の対応表。
const DEFAULT_MIME_TYPES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("jpe", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
    ("webp", "image/webp"),
    ("bmp", "image/bmp"),
    ("tif", "image/tiff"),
    ("tiff", "image/tiff"),
    ("ico", "image/vnd.microsoft.icon"),
    ("svg", "image/svg+xml"),
    ("avif", "image/avif"),
    ("heic", "image/heic"),
    ("pdf", "application/pdf"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("txt", "text/plain"),
    ("csv", "text/csv"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("ogg", "audio/ogg"),
    ("mp4", "video/mp4"),
    ("mov", "video/quicktime"),
    ("webm", "video/webm"),
];

/// MIMEタイプ表。キーは小文字・先頭ドットなしで正規化する。
#[derive(Debug, Clone)]
pub struct MimeTable {
    types: HashMap<String, String>,
}

fn normalize(format: &str) -> String {
    format.trim_start_matches('.').to_ascii_lowercase()
}

impl Default for MimeTable {
    fn default() -> Self {
        Self {
            types: DEFAULT_MIME_TYPES
                .iter()
                .map(|(ext, mime)| (ext.to_string(), mime.to_string()))
                .collect(),
        }
    }
}

impl MimeTable {
    /// 既定の対応表で初期化する。
    pub fn new() -> Self {
        Self::default()
    }

    /// 空の表。
    pub fn empty() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    pub fn insert(&mut self, format: &str, mime_type: impl Into<String>) {
        self.types.insert(normalize(format), mime_type.into());
    }

    pub fn lookup(&self, format: &str) -> Option<&str> {
        self.types.get(&normalize(format)).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
