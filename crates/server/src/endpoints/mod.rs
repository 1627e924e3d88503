//! # エンドポイント

pub mod content;
pub mod transform;
pub mod url;

pub use content::{handle_delete, handle_upload};
pub use transform::handle_transform;
pub use url::handle_url;
