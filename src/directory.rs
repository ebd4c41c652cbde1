//! ACME 目錄解析模組。
//!
//! 目錄文件是 CA 定義的端點地圖；客戶端只消費其中三個 URL
//! （newNonce、newAccount、newOrder），每個會話只抓取一次並快取
//! 在會話物件上。

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::error::{AcmeError, Result};

/// Let's Encrypt 正式環境目錄 URL。
pub const LETS_ENCRYPT_DIRECTORY: &str = "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging 環境目錄 URL，測試時應優先使用。
pub const LETS_ENCRYPT_STAGING_DIRECTORY: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";

/// CA 端點地圖中被消費的欄位。
#[derive(Debug, Clone, Deserialize)]
pub struct Directory {
    /// 取得新 nonce 的端點。
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    /// 註冊新帳戶的端點。
    #[serde(rename = "newAccount")]
    pub new_account: String,
    /// 建立新訂單的端點。
    #[serde(rename = "newOrder")]
    pub new_order: String,
}

impl Directory {
    /// 從指定 URL 抓取並解析目錄文件。
    ///
    /// # Errors
    ///
    /// 回應非 200、或文件缺少必要欄位時回傳 [`AcmeError::Protocol`]。
    pub fn fetch(client: &Client, url: &str) -> Result<Self> {
        let response = client
            .get(url)
            .header("Accept", "application/json")
            .send()?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(AcmeError::Protocol(format!(
                "directory fetch returned {}",
                status
            )));
        }
        let body = response.text()?;
        serde_json::from_str(&body)
            .map_err(|e| AcmeError::Protocol(format!("directory document invalid: {}", e)))
    }
}
