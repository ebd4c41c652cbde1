//! URL 安全、無填充的 Base64 編碼輔助模組。
//!
//! ACME 協議中所有經簽名的資料（protected header、payload、簽名本體）
//! 都必須使用無填充的 URL 安全 Base64 表示，本模組對 [`base64`] crate
//! 做了薄封裝，並提供具備「鍵排序正規化」的 JSON 編碼函式。

use ::base64::{engine::general_purpose::URL_SAFE_NO_PAD, DecodeError, Engine};
use serde_json::{Map, Value};

/// 將任意位元組編碼為 URL 安全、無填充的 Base64 字串。
pub fn b64url<T: AsRef<[u8]>>(input: T) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// 解碼 URL 安全、無填充的 Base64 字串。
///
/// # Errors
///
/// 輸入含無效字元或長度不合法時回傳 [`DecodeError`]。
pub fn b64url_decode(input: &str) -> Result<Vec<u8>, DecodeError> {
    URL_SAFE_NO_PAD.decode(input)
}

/// 將 JSON 值以「正規化形式」序列化後進行 Base64 URL 編碼。
///
/// 正規化係指遞迴地將所有物件的鍵按字典序排序，與 RFC 7638 對
/// thumbprint 的要求一致；如此同一份資料無論欄位插入順序為何，
/// 編碼結果都是確定的。
///
/// # Errors
///
/// 序列化失敗時回傳 [`serde_json::Error`]。
pub fn json_b64url(value: &Value) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(&canonicalize(value))?;
    Ok(b64url(json.as_bytes()))
}

/// 遞迴地將 JSON 物件的鍵按字典序重新排列。
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
