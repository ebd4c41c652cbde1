//! RSA 金鑰對模組。
//!
//! 產生金鑰、讀寫 PEM、RS256 簽名與公鑰參數（modulus、exponent）的
//! 提取都集中在這裡；其餘模組一律透過 [`KeyPair`] 的窄介面取用，
//! 不直接接觸 OpenSSL。

use openssl::{
    error::ErrorStack,
    hash::MessageDigest,
    pkey::{PKey, Private, Public},
    rsa::Rsa,
    sign::Signer,
};
use thiserror::Error;

use crate::{
    base64::b64url,
    jwk::Jwk,
    storage::{Storage, StorageError},
};

/// 金鑰相關操作的錯誤列舉。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] ErrorStack),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Not an RSA key")]
    NotRsa,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, KeyError>;

/// 預設的 RSA 金鑰長度（位元）。
pub const DEFAULT_KEY_BITS: u32 = 2048;

/// 一組 RSA 金鑰對。
///
/// 帳戶金鑰與域名金鑰各自獨立持有一個 `KeyPair`；
/// 前者只簽 JWS 信封，後者只簽 CSR，兩者不得混用。
#[derive(Debug)]
pub struct KeyPair {
    /// 私鑰，使用 OpenSSL 的 `PKey` 封裝。
    pub pri_key: PKey<Private>,
    /// 公鑰，從私鑰派生而來。
    pub pub_key: PKey<Public>,
}

impl KeyPair {
    /// 產生指定長度的新 RSA 金鑰對。
    ///
    /// # Errors
    ///
    /// 金鑰產生失敗時回傳 [`KeyError::OpenSsl`]。
    pub fn generate(bits: u32) -> Result<Self> {
        let rsa = Rsa::generate(bits)?;
        let pri_key = PKey::from_rsa(rsa)?;
        let pub_key = Self::derive_public_key(&pri_key)?;
        Ok(Self { pri_key, pub_key })
    }

    /// 根據 PEM 格式的私鑰資料建立金鑰對。
    pub fn from_pem(pri_key_pem: &[u8]) -> Result<Self> {
        let pri_key = PKey::private_key_from_pem(pri_key_pem)?;
        let pub_key = Self::derive_public_key(&pri_key)?;
        Ok(Self { pri_key, pub_key })
    }

    /// 從儲存中讀取既有私鑰；不存在時產生新金鑰並以受限權限寫回。
    ///
    /// 重複執行會重用同一把金鑰，這是帳戶能跨次執行維持身分的前提。
    ///
    /// # 參數
    ///
    /// - `storage`: 儲存後端。
    /// - `key`: 私鑰在儲存中的檔名，例如 `account.key`。
    /// - `bits`: 新金鑰的長度。
    pub fn load_or_create(storage: &dyn Storage, key: &str, bits: u32) -> Result<Self> {
        match storage.read_file(key) {
            Ok(pem) => return Self::from_pem(&pem),
            Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(KeyError::Storage(e)),
        }

        let pair = Self::generate(bits)?;
        storage.write_file_private(key, &pair.to_pem()?)?;
        Ok(pair)
    }

    /// 將私鑰序列化為 PKCS#8 PEM。
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pri_key.private_key_to_pem_pkcs8()?)
    }

    /// 以 RSA-SHA256 對資料簽名，回傳原始簽名位元組。
    ///
    /// 這是 JWS 編碼器唯一依賴的簽名入口。
    ///
    /// # Errors
    ///
    /// 簽名過程失敗時回傳 [`KeyError::OpenSsl`]。
    pub fn sign_rs256(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.pri_key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }

    /// 取得公鑰參數 `(modulus, exponent)` 的大端位元組表示。
    ///
    /// # Errors
    ///
    /// 金鑰不是 RSA 時回傳 [`KeyError::NotRsa`]。
    pub fn public_components(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let rsa = self.pub_key.rsa().map_err(|_| KeyError::NotRsa)?;
        Ok((rsa.n().to_vec(), rsa.e().to_vec()))
    }

    /// 計算帳戶金鑰的 JWK thumbprint（SHA-256，Base64 URL 編碼）。
    ///
    /// HTTP-01 挑戰的 key authorization 即 `token + "." + thumbprint`。
    pub fn thumbprint(&self) -> Result<String> {
        let jwk = Jwk::from_key_pair(self)?;
        let hash = openssl::sha::sha256(jwk.canonical_json()?.as_bytes());
        Ok(b64url(hash))
    }

    /// 根據私鑰派生出對應的公鑰。
    fn derive_public_key(pri_key: &PKey<Private>) -> Result<PKey<Public>> {
        let rsa = pri_key.rsa().map_err(|_| KeyError::NotRsa)?;
        let pub_rsa = Rsa::from_public_components(rsa.n().to_owned()?, rsa.e().to_owned()?)?;
        Ok(PKey::from_rsa(pub_rsa)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemStorage;
    use openssl::sign::Verifier;

    #[test]
    fn test_sign_rs256_verifies() {
        let pair = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let data = b"protected.payload";
        let signature = pair.sign_rs256(data).unwrap();

        let mut verifier = Verifier::new(MessageDigest::sha256(), &pair.pub_key).unwrap();
        verifier.update(data).unwrap();
        assert!(verifier.verify(&signature).unwrap());
    }

    #[test]
    fn test_public_components_shape() {
        let pair = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let (n, e) = pair.public_components().unwrap();
        assert_eq!(n.len(), 256); // 2048 位元的 modulus
        assert_eq!(e, vec![0x01, 0x00, 0x01]); // 65537
    }

    #[test]
    fn test_load_or_create_reuses_key() {
        let storage = MemStorage::new();
        let first = KeyPair::load_or_create(&storage, "account.key", DEFAULT_KEY_BITS).unwrap();
        let second = KeyPair::load_or_create(&storage, "account.key", DEFAULT_KEY_BITS).unwrap();
        assert_eq!(
            first.public_components().unwrap(),
            second.public_components().unwrap()
        );
    }

    #[test]
    fn test_pem_roundtrip() {
        let pair = KeyPair::generate(DEFAULT_KEY_BITS).unwrap();
        let restored = KeyPair::from_pem(&pair.to_pem().unwrap()).unwrap();
        assert_eq!(
            pair.public_components().unwrap(),
            restored.public_components().unwrap()
        );
    }
}
