//! # Katachi CLI
//!
//! 運用者向けのコマンドラインツール。
//!
//! ```bash
//! # 保存済みコンテンツのサムネイルURLを署名付きで発行する
//! katachi url --secret s3cr3t --fetch ab/abcdef --step p:thumb:100x100# --step e:jpg
//!
//! # 署名付きURLを検証する
//! katachi verify --secret s3cr3t '/f~ab%2Fabcdef/e~jpg?sha=0123456789abcdef'
//!
//! # パスをチェーンのJSONにデコードする
//! katachi decode /g~plain~10~10/e~png
//! ```

use anyhow::{anyhow, bail, Result};
use clap::{Args, Parser, Subcommand};

use katachi_core::protect::DEFAULT_SHA_LENGTH;
use katachi_core::{Job, Service, ServiceConfig};
use katachi_types::{Step, StepKind};

#[derive(Parser)]
#[command(name = "katachi")]
#[command(about = "Katachi - オンデマンド変換URLの運用ツール", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// URLの署名に関する共通オプション。
#[derive(Args)]
struct SigningArgs {
    /// 署名用の秘密鍵（未指定なら署名しない）
    #[arg(long, env = "KATACHI_SECRET")]
    secret: Option<String>,

    /// 署名の文字数
    #[arg(long, default_value_t = DEFAULT_SHA_LENGTH)]
    sha_length: usize,

    /// パスプレフィックス（例: /media）
    #[arg(long, default_value = "")]
    prefix: String,
}

impl SigningArgs {
    /// 署名設定だけを持つサービスを構築する。
    fn service(&self) -> Result<Service> {
        let config = ServiceConfig {
            protect_from_dos_attacks: self.secret.is_some(),
            secret: self.secret.clone(),
            sha_length: self.sha_length,
            path_prefix: self.prefix.clone(),
            ..ServiceConfig::default()
        };
        Ok(Service::builder(config).build()?)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// チェーンのURLを発行する
    Url {
        #[command(flatten)]
        signing: SigningArgs,

        /// データストアから取得するコンテンツのuid
        #[arg(long, conflicts_with = "generate", required_unless_present = "generate")]
        fetch: Option<String>,

        /// ジェネレータ（name:arg:arg…）
        #[arg(long)]
        generate: Option<String>,

        /// ステップ（kind:name:arg:arg…、kindは p/e/a/g または process/encode/analyse/generate）
        #[arg(long = "step")]
        steps: Vec<String>,
    },

    /// 署名付きURL（パス?クエリ）を検証してチェーンを表示する（秘密鍵が必要）
    Verify {
        #[command(flatten)]
        signing: SigningArgs,

        /// 検証するURLのパスとクエリ
        url: String,
    },

    /// パスをチェーンのJSONにデコードする（署名は検証しない）
    Decode {
        /// パスプレフィックス
        #[arg(long, default_value = "")]
        prefix: String,

        /// デコードするパス
        path: String,
    },
}

/// `name:arg:arg…` を名前と引数に分ける。
fn split_fields(raw: &str) -> Result<(String, Vec<String>)> {
    let mut fields = raw.split(':').map(str::to_string);
    let name = fields.next().unwrap_or_default();
    if name.is_empty() {
        bail!("名前が空です: {raw:?}");
    }
    Ok((name, fields.collect()))
}

fn parse_kind(raw: &str) -> Result<StepKind> {
    Ok(match raw {
        "p" | "process" => StepKind::Process,
        "e" | "encode" => StepKind::Encode,
        "a" | "analyse" => StepKind::Analyse,
        "g" | "generate" => StepKind::Generate,
        other => bail!("未知のステップ種別です: {other:?}"),
    })
}

/// `kind:name:arg:arg…` をステップとして解釈する。
fn parse_step(raw: &str) -> Result<Step> {
    let (kind, rest) = raw
        .split_once(':')
        .ok_or_else(|| anyhow!("ステップは kind:name[:arg…] の形式です: {raw:?}"))?;
    let (name, args) = split_fields(rest)?;
    Ok(Step::new(parse_kind(kind)?, name, args))
}

fn build_job(fetch: Option<String>, generate: Option<String>, steps: &[String]) -> Result<Job> {
    let job = match (fetch, generate) {
        (Some(uid), None) => Job::from_uid(uid),
        (None, Some(generator)) => {
            let (name, args) = split_fields(&generator)?;
            Job::from_generator(name, args)
        }
        _ => bail!("--fetch と --generate のどちらか一方を指定してください"),
    };
    let steps = steps.iter().map(|s| parse_step(s)).collect::<Result<Vec<_>>>()?;
    Ok(job.with_steps(steps))
}

/// 署名付きURLを検証してチェーンを返す。秘密鍵がなければ検証できない。
fn verify_url(signing: &SigningArgs, url: &str) -> Result<Job> {
    if signing.secret.is_none() {
        bail!("検証には --secret または KATACHI_SECRET が必要です");
    }
    let service = signing.service()?;
    let (path, query) = match url.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (url, None),
    };
    Ok(service.decode_request(path, query)?)
}

fn print_chain(job: &Job) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&job.to_spec()?)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Url {
            signing,
            fetch,
            generate,
            steps,
        } => {
            let service = signing.service()?;
            let job = build_job(fetch, generate, &steps)?;
            println!("{}", service.url_for(&job)?);
        }
        Commands::Verify { signing, url } => {
            let job = verify_url(&signing, &url)?;
            eprintln!("署名は有効です");
            print_chain(&job)?;
        }
        Commands::Decode { prefix, path } => {
            let rest = path
                .strip_prefix(prefix.as_str())
                .ok_or_else(|| anyhow!("パスがプレフィックス {prefix:?} で始まっていません"))?;
            let path = rest.split_once('?').map_or(rest, |(path, _)| path);
            print_chain(&Job::decode_from_path(path)?)?;
        }
    }
    Ok(())
}
