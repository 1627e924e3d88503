//! # Katachi 暗号処理
//!
//! 署名付きURLのための鍵付きハッシュと、その定数時間比較を実装する。
//!
//! ## 暗号アルゴリズム
//! | 用途 | アルゴリズム |
//! |------|------------|
//! | パス署名 | HMAC-SHA256（16進小文字、先頭から切り詰め） |
//! | 署名比較 | 定数時間比較（`subtle`） |
//! | ハッシュ | SHA-256 |

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256の16進表現の長さ。署名長の上限。
pub const MAX_SIGNATURE_LENGTH: usize = 64;

/// 暗号処理のエラー型
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// HMAC鍵の初期化に失敗
    #[error("HMAC鍵の初期化に失敗しました")]
    InvalidKey,
    /// 署名長が範囲外
    #[error("署名長は1から{MAX_SIGNATURE_LENGTH}の範囲である必要があります: {0}")]
    InvalidSignatureLength(usize),
}

/// 署名長が有効範囲（1..=64）にあるかを確認する。
pub fn check_signature_length(length: usize) -> Result<(), CryptoError> {
    if (1..=MAX_SIGNATURE_LENGTH).contains(&length) {
        Ok(())
    } else {
        Err(CryptoError::InvalidSignatureLength(length))
    }
}

/// HMAC-SHA256を計算し、16進小文字で返す。
pub fn hmac_sha256_hex(secret: &[u8], message: &[u8]) -> Result<String, CryptoError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| CryptoError::InvalidKey)?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// リクエストパスに対する署名を計算する。
///
/// `HMAC-SHA256(secret, path)` の16進表現を `length` 文字に切り詰める。
pub fn sign_path(secret: &str, path: &str, length: usize) -> Result<String, CryptoError> {
    check_signature_length(length)?;
    let mut digest = hmac_sha256_hex(secret.as_bytes(), path.as_bytes())?;
    digest.truncate(length);
    Ok(digest)
}

/// 提示された署名がパスに対して正しいかを検証する。
///
/// 長さが一致しない署名や鍵エラーは検証失敗として扱う。
/// 比較時間は不一致の位置に依存しない。
pub fn verify_path_signature(secret: &str, path: &str, signature: &str, length: usize) -> bool {
    if signature.len() != length {
        return false;
    }
    match sign_path(secret, path, length) {
        Ok(expected) => constant_time_eq(expected.as_bytes(), signature.as_bytes()),
        Err(_) => false,
    }
}

/// 定数時間でバイト列を比較する。
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// SHA-256ハッシュ計算。
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// SHA-256ハッシュの16進表現。
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}
