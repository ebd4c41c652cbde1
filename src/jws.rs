//! JWS 編碼器。
//!
//! 依 ACME 規範組裝 `{protected, payload, signature}` 三段式信封：
//! protected header 固定為 `{alg: "RS256", nonce, url}` 加上 `jwk`
//! （註冊前）或 `kid`（註冊後）之一；空 payload 編碼為空字串而非
//! `{}` 的 Base64，這是 POST-as-GET 輪詢所要求的形式。
//! 本模組不發出任何網路請求，是輸入的純函式（僅同步呼叫簽名設施）。

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    base64::{b64url, json_b64url},
    error::Result,
    jwk::Jwk,
    key_pair::KeyPair,
};

/// 簽名者在 protected header 中的身分表示。
///
/// 帳戶註冊前只能用公鑰（JWK）自我識別；一旦 CA 發給帳戶 URL（kid），
/// 之後所有請求都必須改用 kid。
#[derive(Debug, Clone, Copy)]
pub enum SignerId<'a> {
    /// 以整份 JWK 識別（僅限 new-account 請求）。
    Jwk(&'a Jwk),
    /// 以 CA 指派的帳戶 URL 識別。
    Kid(&'a str),
}

/// 一個組裝完成、可直接作為請求本體的 JWS 信封。
#[derive(Debug, Serialize)]
pub struct Jws {
    protected: String,
    payload: String,
    signature: String,
}

impl Jws {
    /// 簽署並組裝 JWS 信封。
    ///
    /// # 參數
    ///
    /// - `url`: 請求目標 URL，會寫入 protected header。
    /// - `nonce`: 本次請求消耗的 anti-replay token。
    /// - `signer`: JWK 或 kid 身分。
    /// - `payload`: 請求負載；`None` 表示 POST-as-GET 的空 payload。
    /// - `key_pair`: 帳戶金鑰，用於 RS256 簽名。
    ///
    /// # Errors
    ///
    /// 序列化或簽名失敗時回傳 [`crate::error::AcmeError`]。
    pub fn sign(
        url: &str,
        nonce: &str,
        signer: SignerId<'_>,
        payload: Option<&Value>,
        key_pair: &KeyPair,
    ) -> Result<Self> {
        let protected = json_b64url(&Self::protected_header(url, nonce, signer))?;
        let payload = match payload {
            Some(value) => json_b64url(value)?,
            None => String::new(),
        };

        let signing_input = format!("{}.{}", protected, payload);
        let signature = b64url(key_pair.sign_rs256(signing_input.as_bytes())?);

        Ok(Jws {
            protected,
            payload,
            signature,
        })
    }

    /// 序列化為 JSON 字串，作為 `application/jose+json` 請求本體。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn protected_header(url: &str, nonce: &str, signer: SignerId<'_>) -> Value {
        let mut map = Map::new();
        map.insert("alg".to_string(), Value::String("RS256".to_string()));
        map.insert("nonce".to_string(), Value::String(nonce.to_string()));
        map.insert("url".to_string(), Value::String(url.to_string()));
        match signer {
            SignerId::Jwk(jwk) => {
                map.insert("jwk".to_string(), jwk.to_value());
            }
            SignerId::Kid(kid) => {
                map.insert("kid".to_string(), Value::String(kid.to_string()));
            }
        }
        Value::Object(map)
    }
}
