//! JSON Web Key (JWK) 模組，目前僅支援 RSA 公鑰表示。

use serde_json::{Map, Value};

use crate::{
    base64::b64url,
    key_pair::{KeyError, KeyPair},
};

/// RSA 公鑰的 JWK 表示，欄位為 `{kty, n, e}`。
///
/// 帳戶尚未註冊（沒有 kid）之前，簽名請求的 protected header
/// 以整份 JWK 自我識別；thumbprint 亦從這個表示導出。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jwk {
    n: String,
    e: String,
}

impl Jwk {
    /// 從金鑰對的公鑰參數建立 JWK。
    ///
    /// # Errors
    ///
    /// 金鑰不是 RSA 時回傳 [`KeyError::NotRsa`]。
    pub fn from_key_pair(key_pair: &KeyPair) -> Result<Self, KeyError> {
        let (n, e) = key_pair.public_components()?;
        Ok(Jwk {
            n: b64url(n),
            e: b64url(e),
        })
    }

    /// 產生 JWK 的 JSON 值，鍵按字典序排列（`e`、`kty`、`n`）。
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("e".to_string(), Value::String(self.e.clone()));
        map.insert("kty".to_string(), Value::String("RSA".to_string()));
        map.insert("n".to_string(), Value::String(self.n.clone()));
        Value::Object(map)
    }

    /// 產生 RFC 7638 正規化的 JSON 字串，作為 thumbprint 的雜湊輸入。
    ///
    /// # Errors
    ///
    /// 序列化失敗時回傳 [`KeyError::Serialization`]。
    pub fn canonical_json(&self) -> Result<String, KeyError> {
        Ok(serde_json::to_string(&self.to_value())?)
    }
}
