//! # Katachi Core
//!
//! オンデマンドのコンテンツ変換を実装する。
//!
//! ## 処理フロー
//! 1. リクエストパスを署名付きURLとして検証する
//! 2. パスを変換チェーン（ソース + ステップ列）にデコードする
//! 3. ソースをデータストアまたはジェネレータから取得する
//! 4. 各ステップをケイパビリティレジストリ経由で適用する
//! 5. 結果のMIMEタイプをフォールバック順に解決する
//!
//! ## モジュール
//! | モジュール | 役割 |
//! |-----------|------|
//! | `registry` | 解析・加工・エンコード・生成のレジストリ |
//! | `content` | コンテンツハンドル |
//! | `job`, `codec` | 変換チェーンとURLパス表現 |
//! | `protect` | 署名付きURL |
//! | `mime`, `magic` | MIMEタイプ表とマジックバイト解析 |
//! | `datastore` | データストアの抽象と、インメモリ実装 |
//! | `config`, `service` | 設定とサービス構成 |

pub mod codec;
pub mod config;
pub mod content;
pub mod datastore;
pub mod error;
pub mod job;
pub mod magic;
pub mod mime;
pub mod protect;
pub mod registry;
pub mod service;

pub use config::ServiceConfig;
pub use content::{Content, ContentInfo};
pub use datastore::{DataStore, MemoryDataStore, StoreOptions};
pub use error::{CoreError, CoreResult, DataStoreError};
pub use job::{Job, Source};
pub use magic::{MagicAnalyser, MAGIC_ANALYSER};
pub use mime::MimeTable;
pub use protect::UrlProtector;
pub use registry::{
    Analyser, Capabilities, CapabilityRegistry, Encoder, FormatSupport, Generator, Processor,
};
pub use service::{Rendered, Service, ServiceBuilder};
