//! 授權與挑戰模組。
//!
//! 每個訂單識別符對應一個授權（authorization），授權下掛一組候選
//! 挑戰；本客戶端只消費 `http-01` 類型，其餘類型會被略過而非報錯。
//! 挑戰的發布（讓 `GET /.well-known/acme-challenge/<token>` 回傳
//! key authorization）交由 [`ChallengePublisher`] 外部介面完成。

use std::{
    fs,
    path::{Path, PathBuf},
};

use log::info;
use serde::Deserialize;

use crate::error::{AcmeError, Problem, Result};

/// 挑戰類型。未知類型解析為 [`ChallengeType::Unknown`] 並被略過。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
    #[serde(other)]
    Unknown,
}

impl ChallengeType {
    /// 返回挑戰類型對應的字串表示。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
            Self::Unknown => "unknown",
        }
    }
}

/// 挑戰狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// 一個 ACME 驗證挑戰。
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    /// 挑戰類型。
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    /// 挑戰自身的 URL，對其 POST 空 JSON 即表示「可以來驗了」。
    pub url: String,
    /// 挑戰 token。
    pub token: String,
    /// 當前狀態。
    pub status: ChallengeStatus,
    /// 驗證失敗時 CA 附上的 problem 詳情。
    #[serde(default)]
    pub error: Option<Problem>,
}

impl Challenge {
    /// 計算 HTTP-01 的 key authorization：`token + "." + thumbprint`。
    pub fn key_authorization(&self, thumbprint: &str) -> String {
        format!("{}.{}", self.token, thumbprint)
    }
}

/// 授權狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

/// 一個訂單識別符的授權物件。
#[derive(Debug, Clone, Deserialize)]
pub struct Authorization {
    /// 授權狀態；先前已驗證過的識別符會直接是 `valid`。
    pub status: AuthorizationStatus,
    /// 候選挑戰列表。
    #[serde(default)]
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    /// 選出 `http-01` 挑戰。
    ///
    /// # Errors
    ///
    /// 列表中不存在 `http-01` 時回傳 [`AcmeError::UnsupportedChallenge`]，
    /// 錯誤訊息列出 CA 實際提供的類型。
    pub fn http01_challenge(&self) -> Result<&Challenge> {
        self.challenges
            .iter()
            .find(|c| c.challenge_type == ChallengeType::Http01)
            .ok_or_else(|| {
                let offered = self
                    .challenges
                    .iter()
                    .map(|c| c.challenge_type.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                AcmeError::UnsupportedChallenge(offered)
            })
    }

    /// 萃取 CA 對驗證失敗的說明，用於組裝致命錯誤。
    pub fn failure_detail(&self) -> String {
        self.challenges
            .iter()
            .filter_map(|c| c.error.as_ref())
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// 挑戰發布介面（外部協作者）。
///
/// 實作者必須讓目標域名上
/// `GET /.well-known/acme-challenge/{token}`（port 80，純 HTTP）
/// 以 `text/plain` 回傳一模一樣的 `key_authorization` 字串。
/// 以相同內容重複發布同一個 token 是冪等的。
pub trait ChallengePublisher {
    /// 發布一個挑戰回應。
    fn publish(&self, token: &str, key_authorization: &str) -> Result<()>;
}

/// 以本地目錄為後端的發布實作。
///
/// 將 key authorization 寫為 `<dir>/<token>`，適用於由網頁伺服器
/// （或反向代理）直接服務該目錄的部署形態。
#[derive(Debug)]
pub struct DirPublisher {
    dir: PathBuf,
}

impl DirPublisher {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl ChallengePublisher for DirPublisher {
    fn publish(&self, token: &str, key_authorization: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(crate::storage::StorageError::Io)?;
        let path = self.dir.join(token);
        fs::write(&path, key_authorization).map_err(crate::storage::StorageError::Io)?;
        info!("published http-01 token at {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authz(json: &str) -> Authorization {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_key_authorization_format() {
        let challenge: Challenge = serde_json::from_str(
            r#"{"type":"http-01","url":"https://ca/chall/1","token":"tok","status":"pending"}"#,
        )
        .unwrap();
        assert_eq!(challenge.key_authorization("thumb"), "tok.thumb");
    }

    #[test]
    fn test_http01_selection_skips_unknown_types() {
        let authorization = authz(
            r#"{
                "status": "pending",
                "challenges": [
                    {"type":"dns-01","url":"u1","token":"t1","status":"pending"},
                    {"type":"snail-mail-01","url":"u2","token":"t2","status":"pending"},
                    {"type":"http-01","url":"u3","token":"t3","status":"pending"}
                ]
            }"#,
        );
        let challenge = authorization.http01_challenge().unwrap();
        assert_eq!(challenge.token, "t3");
    }

    #[test]
    fn test_missing_http01_is_unsupported() {
        let authorization = authz(
            r#"{
                "status": "pending",
                "challenges": [
                    {"type":"dns-01","url":"u1","token":"t1","status":"pending"},
                    {"type":"tls-alpn-01","url":"u2","token":"t2","status":"pending"}
                ]
            }"#,
        );
        match authorization.http01_challenge() {
            Err(AcmeError::UnsupportedChallenge(offered)) => {
                assert!(offered.contains("dns-01"));
                assert!(offered.contains("tls-alpn-01"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_failure_detail_quotes_ca_problem() {
        let authorization = authz(
            r#"{
                "status": "invalid",
                "challenges": [
                    {
                        "type": "http-01",
                        "url": "u",
                        "token": "t",
                        "status": "invalid",
                        "error": {
                            "type": "urn:ietf:params:acme:error:unauthorized",
                            "detail": "Invalid response from http://example.com"
                        }
                    }
                ]
            }"#,
        );
        let detail = authorization.failure_detail();
        assert!(detail.contains("unauthorized"));
        assert!(detail.contains("Invalid response"));
    }

    #[test]
    fn test_dir_publisher_writes_exact_content() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = DirPublisher::new(dir.path().join("acme-challenge"));
        publisher.publish("tok", "tok.thumb").unwrap();
        let content =
            fs::read_to_string(dir.path().join("acme-challenge").join("tok")).unwrap();
        assert_eq!(content, "tok.thumb");

        // 同內容重複發布為冪等
        publisher.publish("tok", "tok.thumb").unwrap();
    }
}
