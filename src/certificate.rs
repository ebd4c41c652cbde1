//! 證書檢視模組。
//!
//! 下載回來的憑證鏈由本模組解析：取出葉憑證、讀取效期、判斷是否
//! 該續約。續約本身就是再跑一次完整簽發，這裡只負責回答「該不該」。

use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use openssl::{asn1::Asn1Time, x509::X509};
use thiserror::Error;

/// 證書相關操作可能出現的錯誤類型。
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    Parse(#[from] openssl::error::ErrorStack),
    #[error("Empty certificate chain")]
    EmptyChain,
    #[error("Invalid expiration timestamp")]
    InvalidTimestamp,
}

type Result<T> = std::result::Result<T, CertificateError>;

/// X.509 葉憑證封裝，提供效期檢查。
pub struct Certificate {
    pub cert: X509,
}

impl Certificate {
    /// 解析單張 PEM 證書。
    pub fn new(pem: &str) -> Result<Self> {
        let cert = X509::from_pem(pem.as_bytes())?;
        Ok(Certificate { cert })
    }

    /// 從 PEM 憑證鏈取出葉憑證（鏈中第一張）。
    ///
    /// # Errors
    ///
    /// 鏈中沒有任何證書時回傳 [`CertificateError::EmptyChain`]。
    pub fn from_pem_chain(pem: &str) -> Result<Self> {
        let mut stack = X509::stack_from_pem(pem.as_bytes())?;
        if stack.is_empty() {
            return Err(CertificateError::EmptyChain);
        }
        Ok(Certificate {
            cert: stack.remove(0),
        })
    }

    /// 證書剩餘的有效秒數；已過期時為負值。
    pub fn remaining_seconds(&self) -> Result<i64> {
        let now = Asn1Time::from_unix(Utc::now().timestamp())?;
        // diff 方向：從 now 到 notAfter，剩餘有效期為正
        let diff = now.diff(self.cert.not_after())?;
        Ok(diff.days as i64 * 86_400 + diff.secs as i64)
    }

    /// 判斷證書是否該續約。
    ///
    /// 剩餘有效時間低於 `threshold_days`（或已過期）時回傳 `true`。
    pub fn should_renew(&self, threshold_days: u32) -> Result<bool> {
        let remaining = self.remaining_seconds()?;
        let threshold = threshold_days as i64 * 86_400;
        debug!(
            "certificate has {} seconds remaining (threshold {})",
            remaining, threshold
        );
        Ok(remaining <= threshold)
    }

    /// 證書的 notAfter 時間。
    pub fn not_after(&self) -> Result<DateTime<Utc>> {
        let epoch = Asn1Time::from_unix(0)?;
        let diff = epoch.diff(self.cert.not_after())?;
        let timestamp = diff.days as i64 * 86_400 + diff.secs as i64;
        Utc.timestamp_opt(timestamp, 0)
            .single()
            .ok_or(CertificateError::InvalidTimestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_pair::{KeyPair, DEFAULT_KEY_BITS};
    use openssl::{hash::MessageDigest, x509::X509NameBuilder};

    fn self_signed(days: u32) -> String {
        let key_pair = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", "example.com").unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key_pair.pri_key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(days).unwrap())
            .unwrap();
        builder
            .sign(&key_pair.pri_key, MessageDigest::sha256())
            .unwrap();

        String::from_utf8(builder.build().to_pem().unwrap()).unwrap()
    }

    #[test]
    fn test_should_renew_thresholds() {
        let cert = Certificate::new(&self_signed(90)).unwrap();
        assert!(!cert.should_renew(30).unwrap());
        assert!(cert.should_renew(120).unwrap());
    }

    #[test]
    fn test_chain_takes_leaf() {
        let leaf = self_signed(90);
        let issuer = self_signed(365);
        let chain = format!("{leaf}{issuer}");

        let cert = Certificate::from_pem_chain(&chain).unwrap();
        // 葉憑證（90 天）而非簽發者（365 天）
        let remaining = cert.remaining_seconds().unwrap();
        assert!(remaining < 91 * 86_400);
    }

    #[test]
    fn test_empty_chain_rejected() {
        assert!(matches!(
            Certificate::from_pem_chain(""),
            Err(CertificateError::EmptyChain)
        ));
    }

    #[test]
    fn test_not_after_in_future() {
        let cert = Certificate::new(&self_signed(30)).unwrap();
        assert!(cert.not_after().unwrap() > Utc::now());
    }
}
