//! ACME 帳戶與會話管理模組。
//!
//! [`Account`] 是整個簽發流程的會話物件：持有帳戶金鑰、目錄快取、
//! nonce 管理器、持久化儲存與 HTTP client。所有簽名請求都經由
//! [`Account::post`] 發出，確保 nonce 的消耗與回收遵守單一寫者紀律。
//!
//! 帳戶身分跨次執行的持久化：私鑰存為 `account.key`（受限權限），
//! CA 指派的帳戶 URL（kid）存為 `account.kid`。kid 已存在時
//! [`Account::ensure_account`] 不發出任何網路請求。

use std::path::PathBuf;

use log::{debug, info};
use reqwest::{
    blocking::Client,
    header::{HeaderMap, CONTENT_TYPE},
    StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::{
    directory::{Directory, LETS_ENCRYPT_DIRECTORY, LETS_ENCRYPT_STAGING_DIRECTORY},
    error::{AcmeError, Result},
    jwk::Jwk,
    jws::{Jws, SignerId},
    key_pair::{KeyPair, DEFAULT_KEY_BITS},
    nonce::NonceManager,
    storage::{DirStorage, Storage, StorageError},
};

/// 帳戶私鑰在輸出目錄中的檔名。
pub const ACCOUNT_KEY_FILE: &str = "account.key";
/// 帳戶 kid 在輸出目錄中的檔名。
pub const ACCOUNT_KID_FILE: &str = "account.kid";

/// 一次簽名請求的原始回應。
///
/// 呼叫端自行決定非 2xx 是否致命（例如訂單輪詢會容忍暫時性失敗），
/// 因此這裡不先行報錯。
#[derive(Debug)]
pub struct SignedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl SignedResponse {
    /// 非 2xx 時轉為 [`AcmeError::RequestFailed`]，保留 CA 的 problem 詳情。
    pub fn require_success(self) -> Result<Self> {
        if self.status.is_success() {
            Ok(self)
        } else {
            Err(AcmeError::from_response(self.status, &self.body))
        }
    }

    /// 將回應本體解析為指定類型。
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// 取出 `Location` 標頭。
    ///
    /// # Errors
    ///
    /// 標頭不存在時回傳 [`AcmeError::Protocol`]。
    pub fn location(&self) -> Result<String> {
        self.headers
            .get("Location")
            .ok_or_else(|| AcmeError::Protocol("Location header not found".to_string()))?
            .to_str()
            .map(ToString::to_string)
            .map_err(AcmeError::from)
    }
}

/// 簽名身分的選擇。
enum SignAs {
    /// 以 kid 簽名（註冊後的常態）。
    Kid,
    /// 以原始 JWK 簽名（僅限 new-account）。
    Jwk,
}

/// ACME 會話物件。
///
/// 內部可變狀態只有 nonce 快取與 kid，皆為單一寫者；同一個輸出目錄
/// 上的並行簽發必須由呼叫端自行序列化。
#[derive(Debug)]
pub struct Account {
    /// 帳戶聯絡信箱。
    pub email: String,
    /// 帳戶金鑰對，只用於簽署 JWS 信封。
    pub key_pair: KeyPair,
    /// 會話期間快取的目錄。
    pub dir: Directory,
    /// CA 指派的帳戶 URL；註冊前為 `None`。
    pub kid: Option<String>,
    /// nonce 管理器。
    pub nonce: NonceManager,
    /// 產物儲存。
    pub storage: Box<dyn Storage>,
    /// 產物輸出目錄，用於回報最終檔案路徑。
    pub out_dir: PathBuf,
    client: Client,
}

impl Account {
    /// 以預設配置（正式環境目錄）建立會話。
    ///
    /// # Errors
    ///
    /// 目錄抓取、金鑰載入或初始 nonce 抓取失敗時回傳 [`AcmeError`]。
    pub fn new(email: &str, out_dir: impl Into<PathBuf>) -> Result<Self> {
        AccountBuilder::new(email, out_dir).build()
    }

    fn from_builder(builder: AccountBuilder) -> Result<Self> {
        let client = Client::new();
        let out_dir = builder.out_dir.clone();
        let storage: Box<dyn Storage> = Box::new(DirStorage::open(&out_dir)?);

        let key_pair = KeyPair::load_or_create(&*storage, ACCOUNT_KEY_FILE, builder.key_bits)?;
        let dir = Directory::fetch(&client, &builder.dir_url)?;

        let mut nonce = NonceManager::new(client.clone(), dir.new_nonce.clone());
        nonce.fetch()?;

        let kid = match storage.read_file(ACCOUNT_KID_FILE) {
            Ok(data) => Some(String::from_utf8_lossy(&data).trim().to_string()),
            Err(StorageError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        Ok(Account {
            email: builder.email,
            key_pair,
            dir,
            kid,
            nonce,
            storage,
            out_dir,
            client,
        })
    }

    /// 確保帳戶已於 CA 註冊。
    ///
    /// kid 已持久化時直接返回（冪等、零網路呼叫）；否則以原始 JWK
    /// 簽署 new-account 請求，從回應的 `Location` 標頭取得帳戶 URL，
    /// 持久化之後才返回。
    ///
    /// # Errors
    ///
    /// 回應非 2xx 或缺少 `Location` 標頭時回傳對應的 [`AcmeError`]。
    pub fn ensure_account(&mut self) -> Result<()> {
        if self.kid.is_some() {
            debug!("reusing persisted account identity");
            return Ok(());
        }

        let contact = if self.email.starts_with("mailto:") {
            self.email.clone()
        } else {
            format!("mailto:{}", self.email)
        };
        let payload = json!({
            "termsOfServiceAgreed": true,
            "contact": [contact],
        });

        let url = self.dir.new_account.clone();
        let response = self
            .post_signed(&url, Some(&payload), SignAs::Jwk)?
            .require_success()?;
        let kid = response.location()?;

        self.storage.write_file(ACCOUNT_KID_FILE, kid.as_bytes())?;
        info!("registered ACME account: {}", kid);
        self.kid = Some(kid);
        Ok(())
    }

    /// 以 kid 身分發出簽名 POST。
    ///
    /// `payload` 為 `None` 時即 POST-as-GET。每個回應（含錯誤回應）
    /// 的 `Replay-Nonce` 都會回收進 nonce 快取。
    pub fn post(&mut self, url: &str, payload: Option<&Value>) -> Result<SignedResponse> {
        self.post_signed(url, payload, SignAs::Kid)
    }

    fn post_signed(
        &mut self,
        url: &str,
        payload: Option<&Value>,
        sign_as: SignAs,
    ) -> Result<SignedResponse> {
        let nonce = self.nonce.consume()?;

        let jwk;
        let signer = match sign_as {
            SignAs::Kid => {
                let kid = self.kid.as_deref().ok_or_else(|| {
                    AcmeError::Protocol("no account kid available".to_string())
                })?;
                SignerId::Kid(kid)
            }
            SignAs::Jwk => {
                jwk = Jwk::from_key_pair(&self.key_pair)?;
                SignerId::Jwk(&jwk)
            }
        };

        let jws = Jws::sign(url, &nonce, signer, payload, &self.key_pair)?;
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/jose+json")
            .body(jws.to_json()?)
            .send()?;

        // 無論結果如何都回收 Replay-Nonce
        self.nonce.observe(response.headers());

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text()?;
        Ok(SignedResponse {
            status,
            headers,
            body,
        })
    }

    /// 未簽名的 JSON GET，用於授權物件的讀取與輪詢。
    pub fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()?;
        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(AcmeError::from_response(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// 下載 PEM 憑證鏈。
    ///
    /// # Errors
    ///
    /// 回應非 200 時致命，回傳 [`AcmeError::RequestFailed`]。
    pub fn get_pem_chain(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/pem-certificate-chain")
            .send()?;
        let status = response.status();
        let body = response.text()?;
        if status != StatusCode::OK {
            return Err(AcmeError::from_response(status, &body));
        }
        Ok(body)
    }
}

/// 用於構建 [`Account`] 會話的構造器。
pub struct AccountBuilder {
    email: String,
    dir_url: String,
    out_dir: PathBuf,
    key_bits: u32,
}

impl AccountBuilder {
    /// 建立構造器。
    ///
    /// 預設使用 Let's Encrypt 正式環境目錄與 2048 位元 RSA 金鑰；
    /// `out_dir` 為產物輸出目錄，不存在時會自動建立。
    pub fn new(email: &str, out_dir: impl Into<PathBuf>) -> Self {
        AccountBuilder {
            email: email.to_string(),
            dir_url: LETS_ENCRYPT_DIRECTORY.to_string(),
            out_dir: out_dir.into(),
            key_bits: DEFAULT_KEY_BITS,
        }
    }

    /// 切換至 staging 環境目錄。
    pub fn staging(mut self, staging: bool) -> Self {
        if staging {
            self.dir_url = LETS_ENCRYPT_STAGING_DIRECTORY.to_string();
        }
        self
    }

    /// 指定任意 ACME 目錄 URL（覆寫 staging 選擇）。
    pub fn directory_url(mut self, dir_url: &str) -> Self {
        self.dir_url = dir_url.to_string();
        self
    }

    /// 設置帳戶金鑰位數。
    pub fn key_bits(mut self, key_bits: u32) -> Self {
        self.key_bits = key_bits;
        self
    }

    /// 構建會話：載入或產生帳戶金鑰、抓取目錄、抓取初始 nonce、
    /// 讀取既有 kid。
    pub fn build(self) -> Result<Account> {
        Account::from_builder(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn directory_body(server_url: &str) -> String {
        format!(
            r#"{{"newNonce":"{0}/new-nonce","newAccount":"{0}/new-acct","newOrder":"{0}/new-order"}}"#,
            server_url
        )
    }

    fn mock_directory(server: &mut Server, hits: usize) -> mockito::Mock {
        let body = directory_body(&server.url());
        server
            .mock("GET", "/directory")
            .with_status(200)
            .with_body(body)
            .expect(hits)
            .create()
    }

    fn mock_nonce(server: &mut Server, hits: usize) -> mockito::Mock {
        server
            .mock("HEAD", "/new-nonce")
            .with_status(200)
            .with_header("Replay-Nonce", "nonce-0")
            .expect(hits)
            .create()
    }

    fn build_account(server: &Server, out_dir: &std::path::Path) -> Account {
        AccountBuilder::new("user@example.com", out_dir)
            .directory_url(&format!("{}/directory", server.url()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_session_init_fetches_directory_and_one_nonce() {
        let mut server = Server::new();
        let dir_mock = mock_directory(&mut server, 1);
        let nonce_mock = mock_nonce(&mut server, 1);

        let out = tempfile::tempdir().unwrap();
        let account = build_account(&server, out.path());

        assert_eq!(account.dir.new_order, format!("{}/new-order", server.url()));
        dir_mock.assert();
        nonce_mock.assert();
    }

    #[test]
    fn test_ensure_account_registers_once_then_reuses_kid() {
        let mut server = Server::new();
        mock_directory(&mut server, 2);
        mock_nonce(&mut server, 2);

        let kid_url = format!("{}/acct/42", server.url());
        let new_acct_mock = server
            .mock("POST", "/new-acct")
            .match_header("Content-Type", "application/jose+json")
            .match_body(Matcher::Regex(r#""protected""#.to_string()))
            .with_status(201)
            .with_header("Location", &kid_url)
            .with_header("Replay-Nonce", "nonce-1")
            .with_body(r#"{"status":"valid"}"#)
            .expect(1)
            .create();

        let out = tempfile::tempdir().unwrap();

        // 第一次：真正註冊
        let mut account = build_account(&server, out.path());
        account.ensure_account().unwrap();
        assert_eq!(account.kid.as_deref(), Some(kid_url.as_str()));
        assert!(account.storage.exists(ACCOUNT_KID_FILE).unwrap());

        // 第二次：kid 已持久化，ensure_account 不得再打 new-account
        let mut account = build_account(&server, out.path());
        account.ensure_account().unwrap();
        assert_eq!(account.kid.as_deref(), Some(kid_url.as_str()));

        new_acct_mock.assert();
    }

    #[test]
    fn test_ensure_account_requires_location_header() {
        let mut server = Server::new();
        mock_directory(&mut server, 1);
        mock_nonce(&mut server, 1);
        server
            .mock("POST", "/new-acct")
            .with_status(201)
            .with_header("Replay-Nonce", "nonce-1")
            .with_body("{}")
            .create();

        let out = tempfile::tempdir().unwrap();
        let mut account = build_account(&server, out.path());
        match account.ensure_account() {
            Err(AcmeError::Protocol(msg)) => assert!(msg.contains("Location")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_failed_post_surfaces_problem_detail() {
        let mut server = Server::new();
        mock_directory(&mut server, 1);
        mock_nonce(&mut server, 1);
        server
            .mock("POST", "/new-acct")
            .with_status(400)
            .with_header("Replay-Nonce", "nonce-err")
            .with_body(
                r#"{"type":"urn:ietf:params:acme:error:invalidContact","detail":"no such scheme"}"#,
            )
            .create();

        let out = tempfile::tempdir().unwrap();
        let mut account = build_account(&server, out.path());
        match account.ensure_account() {
            Err(AcmeError::RequestFailed { problem, .. }) => {
                assert!(problem.contains("invalidContact"));
                assert!(problem.contains("no such scheme"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        // 錯誤回應上的 Replay-Nonce 也必須被回收
        assert_eq!(account.nonce.consume().unwrap(), "nonce-err");
    }
}
