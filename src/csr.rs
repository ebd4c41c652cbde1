//! PKCS#10 證書簽名請求（CSR）建構模組。
//!
//! finalize 一個訂單需要提交以域名金鑰簽署的 CSR：
//! 主體為 `CN=<domain>`，並帶 `subjectAltName = DNS:<domain>` 擴展。

use openssl::{
    hash::MessageDigest,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::key_pair::KeyPair;

/// CSR 建構過程可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),
    #[error("No subject domain")]
    NoDomain,
}

type Result<T> = std::result::Result<T, CsrError>;

/// CSR 建構器。
///
/// # 範例
///
/// ```no_run
/// # use acme_http01::{csr::Csr, key_pair::{KeyPair, DEFAULT_KEY_BITS}};
/// let domain_key = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
/// let der = Csr::new("example.com").to_der(&domain_key).unwrap();
/// ```
pub struct Csr {
    domain: String,
}

impl Csr {
    /// 以單一域名建立 CSR 建構器。
    pub fn new(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
        }
    }

    /// 以域名金鑰簽署並輸出 DER 編碼的 PKCS#10 請求。
    ///
    /// # Errors
    ///
    /// 域名為空時回傳 [`CsrError::NoDomain`]，
    /// OpenSSL 操作失敗時回傳 [`CsrError::OpenSsl`]。
    pub fn to_der(&self, key_pair: &KeyPair) -> Result<Vec<u8>> {
        Ok(self.build(key_pair)?.to_der()?)
    }

    /// 構建 X509 請求物件。
    pub fn build(&self, key_pair: &KeyPair) -> Result<X509Req> {
        if self.domain.is_empty() {
            return Err(CsrError::NoDomain);
        }

        let mut req_builder = X509Req::builder()?;

        let mut name_builder = X509NameBuilder::new()?;
        name_builder.append_entry_by_text("CN", &self.domain)?;
        req_builder.set_subject_name(&name_builder.build())?;

        let san = SubjectAlternativeName::new()
            .dns(&self.domain)
            .build(&req_builder.x509v3_context(None))?;
        let mut extensions = Stack::new()?;
        extensions.push(san)?;
        req_builder.add_extensions(&extensions)?;

        req_builder.set_pubkey(&key_pair.pri_key)?;
        req_builder.sign(&key_pair.pri_key, MessageDigest::sha256())?;

        Ok(req_builder.build())
    }
}
