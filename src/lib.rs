//! # ACME HTTP-01 憑證簽發客戶端
//!
//! 本庫實作 ACME v2 協議的最小閉環：以 `http-01` 挑戰向
//! Let's Encrypt（或任何相容 CA）為單一域名取得憑證鏈。
//!
//! - **account**: 會話與帳戶管理，包含 JWS 簽名請求、nonce 回收、
//!   帳戶金鑰與 kid 的跨次執行持久化。
//! - **order**: 訂單狀態機，從建立訂單、完成 http-01 授權、
//!   finalize CSR 到下載憑證鏈的完整編排。
//! - **challenge**: 授權與挑戰的資料模型，以及把 key authorization
//!   放上網的 [`ChallengePublisher`](challenge::ChallengePublisher) 介面。
//! - **certificate**: 憑證鏈解析與續約判斷。
//!
//! ## 示例
//!
//! ```no_run
//! use acme_http01::{
//!     account::AccountBuilder,
//!     challenge::DirPublisher,
//!     order::{self, PollConfig},
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1. 建立會話（載入或產生帳戶金鑰、抓取目錄與初始 nonce）
//!     let mut account = AccountBuilder::new("user@example.com", "/etc/acme")
//!         .staging(true)
//!         .build()?;
//!
//!     // 2. 挑戰發布：網頁伺服器需將此目錄服務於
//!     //    http://example.com/.well-known/acme-challenge/
//!     let publisher = DirPublisher::new("/var/www/acme-challenge");
//!
//!     // 3. 執行完整簽發流程
//!     let issued = order::issue(
//!         &mut account,
//!         "example.com",
//!         &publisher,
//!         &PollConfig::default(),
//!     )?;
//!     println!("fullchain at {}", issued.fullchain_path.display());
//!
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod csr;
pub mod directory;
pub mod error;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod order;
pub mod storage;
