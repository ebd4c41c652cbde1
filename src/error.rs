//! 統一的錯誤分類。
//!
//! 錯誤分為幾類：傳輸層失敗（`Transport`，對本次嘗試一律致命，核心
//! 不做隱藏重試）、協議層缺漏（`Protocol`，表示 CA 回應缺少必要欄位
//! 或格式不符）、CA 明確拒絕（`AuthorizationInvalid` / `OrderInvalid`，
//! 附帶 CA 的 problem 詳情）、輪詢超時（`Timeout`，可由呼叫端以新訂單
//! 重試），以及金鑰／CSR／儲存等本地失敗。

use std::fmt;

use serde::Deserialize;
use thiserror::Error;

use crate::{
    certificate::CertificateError, csr::CsrError, key_pair::KeyError, storage::StorageError,
};

/// RFC 7807 風格的 problem document，ACME 錯誤回應的標準格式。
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Problem {
    /// 機器可讀的錯誤類型 URN，例如 `urn:ietf:params:acme:error:unauthorized`。
    #[serde(rename = "type", default)]
    pub problem_type: Option<String>,
    /// 人類可讀的錯誤說明。
    #[serde(default)]
    pub detail: Option<String>,
}

impl Problem {
    /// 嘗試從回應本體解析 problem document；非 JSON 或欄位全缺時回傳 `None`。
    pub fn from_body(body: &str) -> Option<Self> {
        let problem: Problem = serde_json::from_str(body).ok()?;
        if problem.problem_type.is_none() && problem.detail.is_none() {
            return None;
        }
        Some(problem)
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.problem_type, &self.detail) {
            (Some(t), Some(d)) => write!(f, "{}: {}", t, d),
            (Some(t), None) => write!(f, "{}", t),
            (None, Some(d)) => write!(f, "{}", d),
            (None, None) => write!(f, "unknown problem"),
        }
    }
}

/// 簽發流程中所有操作共用的錯誤類型。
#[derive(Debug, Error)]
pub enum AcmeError {
    /// HTTP 層的連線或逾時錯誤。
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// CA 回應缺少必要欄位或格式不符。
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// CA 回絕了請求（非 2xx），附帶 problem 詳情。
    #[error("Request failed: {status}, {problem}")]
    RequestFailed {
        status: reqwest::StatusCode,
        problem: String,
    },
    /// CA 明確判定授權驗證失敗。
    #[error("Authorization invalid: {0}")]
    AuthorizationInvalid(String),
    /// CA 明確判定訂單失敗。
    #[error("Order invalid: {0}")]
    OrderInvalid(String),
    /// 輪詢在期限內未達終止狀態；呼叫端可選擇以新訂單重試。
    #[error("Timed out while polling {0}")]
    Timeout(&'static str),
    /// 授權中沒有可用的 http-01 挑戰。
    #[error("No http-01 challenge offered (available: {0})")]
    UnsupportedChallenge(String),
    /// 金鑰產生或簽名失敗。
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    /// CSR 產生失敗。
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    /// 證書解析或效期檢查失敗。
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
    /// 儲存層失敗。
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    /// JSON 序列化或反序列化失敗。
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// 回應標頭無法轉為字串。
    #[error("Request header error: {0}")]
    HeaderValue(#[from] reqwest::header::ToStrError),
}

impl AcmeError {
    /// 從非 2xx 回應建立錯誤，優先保留 CA 的 problem 詳情。
    pub fn from_response(status: reqwest::StatusCode, body: &str) -> Self {
        let problem = Problem::from_body(body)
            .map(|p| p.to_string())
            .unwrap_or_else(|| body.trim().to_string());
        AcmeError::RequestFailed { status, problem }
    }
}

/// 結果類型，當操作成功返回 `T`，失敗則返回 [`AcmeError`]。
pub type Result<T> = std::result::Result<T, AcmeError>;
