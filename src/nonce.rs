//! Nonce 管理模組。
//!
//! ACME 伺服器要求每個簽名請求的 protected header 帶一個單次使用的
//! anti-replay token，並在每個回應（無論成功或失敗）的 `Replay-Nonce`
//! 標頭提供新的值。[`NonceManager`] 最多快取一個 nonce：
//! [`consume`](NonceManager::consume) 取走快取（必要時先抓一個），
//! [`observe`](NonceManager::observe) 無條件以回應標頭覆寫快取——
//! 伺服器在 nonce 被使用的瞬間即令其失效，不覆寫就會在下一個請求
//! 吃到 `badNonce`。
//!
//! 錯誤回應缺少 `Replay-Nonce` 標頭時不視為致命，僅讓快取留空、
//! 由下一次 `consume` 惰性補抓；在 CA 行為異常時這有潛在風險，
//! 相關測試明確標註了這個語義。

use log::debug;
use reqwest::{blocking::Client, header::HeaderMap};

use crate::error::{AcmeError, Result};

/// `Replay-Nonce` 標頭名稱。
const REPLAY_NONCE: &str = "Replay-Nonce";

/// 持有至多一個有效 nonce 的管理器。
///
/// 單一寫者：同一個簽發流程內由 [`crate::account::Account`] 獨佔持有，
/// 不支援並行簽發共用。
#[derive(Debug)]
pub struct NonceManager {
    client: Client,
    new_nonce_url: String,
    cached: Option<String>,
}

impl NonceManager {
    /// 建立管理器，`new_nonce_url` 為目錄中的 newNonce 端點。
    pub fn new(client: Client, new_nonce_url: impl Into<String>) -> Self {
        Self {
            client,
            new_nonce_url: new_nonce_url.into(),
            cached: None,
        }
    }

    /// 向 newNonce 端點發出 HEAD 請求，抓取一個新 nonce 存入快取。
    ///
    /// # Errors
    ///
    /// 回應非 2xx 或缺少 `Replay-Nonce` 標頭時回傳
    /// [`AcmeError::Protocol`]；連線失敗回傳 [`AcmeError::Transport`]。
    pub fn fetch(&mut self) -> Result<()> {
        let response = self.client.head(&self.new_nonce_url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(AcmeError::Protocol(format!(
                "newNonce returned {}",
                status
            )));
        }
        match Self::from_headers(response.headers()) {
            Some(nonce) => {
                debug!("fetched fresh nonce from {}", self.new_nonce_url);
                self.cached = Some(nonce);
                Ok(())
            }
            None => Err(AcmeError::Protocol(
                "newNonce response missing Replay-Nonce header".to_string(),
            )),
        }
    }

    /// 取走快取的 nonce 供一個簽名請求使用；快取為空時先抓一個。
    ///
    /// 取走即清空快取，保證同一個 nonce 不會交給兩個請求。
    pub fn consume(&mut self) -> Result<String> {
        if let Some(nonce) = self.cached.take() {
            return Ok(nonce);
        }
        self.fetch()?;
        self.cached.take().ok_or_else(|| {
            AcmeError::Protocol("nonce cache empty after fetch".to_string())
        })
    }

    /// 以回應標頭中的 `Replay-Nonce`（若存在）無條件覆寫快取。
    ///
    /// 必須對「每一個」回應呼叫，包含錯誤回應。
    pub fn observe(&mut self, headers: &HeaderMap) {
        if let Some(nonce) = Self::from_headers(headers) {
            self.cached = Some(nonce);
        }
    }

    fn from_headers(headers: &HeaderMap) -> Option<String> {
        headers
            .get(REPLAY_NONCE)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
    }
}
