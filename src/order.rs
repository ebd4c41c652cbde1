//! 訂單協調模組：簽發流程的狀態機。
//!
//! 一次簽發走過固定的階段序列：建立訂單、逐一完成授權（發布
//! http-01 挑戰並輪詢至 `valid`）、以新產生的域名金鑰簽 CSR 並
//! finalize、輪詢訂單至 `valid`、下載憑證鏈並落盤。任何階段的致命
//! 錯誤（CA 拒絕、輪詢超時、傳輸失敗）都會中止整個流程；超時後
//! 殘留的 `processing` 訂單直接棄置，重試一律從新訂單開始。

use std::{
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use log::{debug, info};
use serde::Deserialize;
use serde_json::json;

use crate::{
    account::Account,
    base64::b64url,
    challenge::{Authorization, AuthorizationStatus, ChallengePublisher},
    csr::Csr,
    error::{AcmeError, Problem, Result},
    key_pair::{KeyPair, DEFAULT_KEY_BITS},
};

/// 憑證鏈在輸出目錄中的檔名。
pub const FULLCHAIN_FILE: &str = "fullchain.pem";
/// 域名私鑰副本在輸出目錄中的檔名，與憑證鏈成對部署。
pub const PRIVKEY_FILE: &str = "privkey.pem";

/// 輪詢節奏設定，授權輪詢與訂單輪詢共用。
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// 兩次查詢之間的間隔。
    pub interval: Duration,
    /// 單一輪詢迴圈的總時限，超過即放棄本次簽發。
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(120),
        }
    }
}

/// 訂單狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// CA 回傳的訂單資源中被消費的欄位。
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResource {
    pub status: OrderStatus,
    /// 授權物件的 URL 列表，每個識別符一個。
    #[serde(default)]
    pub authorizations: Vec<String>,
    /// finalize 端點。
    pub finalize: String,
    /// 訂單 `valid` 後出現的憑證下載 URL。
    #[serde(default)]
    pub certificate: Option<String>,
    /// 訂單失敗時 CA 附上的 problem 詳情。
    #[serde(default)]
    pub error: Option<Problem>,
}

/// 一張進行中的訂單。
#[derive(Debug)]
pub struct Order {
    /// 訂單自身的 URL，來自 new-order 回應的 `Location` 標頭。
    pub url: String,
    /// 最近一次看到的訂單資源。
    pub resource: OrderResource,
}

/// 輪詢中每一次查詢的判定。
enum PollOutcome<T> {
    Done(T),
    Pending,
}

/// 反覆執行 `check` 直到其回報完成、回傳致命錯誤、或超過時限。
///
/// 判定完成或致命與否完全交給 `check`；這裡只負責節奏與期限。
fn poll_until<T, F>(config: &PollConfig, what: &'static str, mut check: F) -> Result<T>
where
    F: FnMut() -> Result<PollOutcome<T>>,
{
    let deadline = Instant::now() + config.timeout;
    loop {
        match check()? {
            PollOutcome::Done(value) => return Ok(value),
            PollOutcome::Pending => {}
        }
        if Instant::now() >= deadline {
            return Err(AcmeError::Timeout(what));
        }
        thread::sleep(config.interval);
    }
}

impl Order {
    /// 向 CA 建立一張單一 DNS 識別符的新訂單。
    ///
    /// # Errors
    ///
    /// 回應非 2xx 時回傳 [`AcmeError::RequestFailed`]；
    /// 缺少 `Location` 標頭時回傳 [`AcmeError::Protocol`]。
    pub fn place(account: &mut Account, domain: &str) -> Result<Self> {
        let payload = json!({
            "identifiers": [{"type": "dns", "value": domain}],
        });
        let new_order_url = account.dir.new_order.clone();
        let response = account
            .post(&new_order_url, Some(&payload))?
            .require_success()?;
        let url = response.location()?;
        let resource: OrderResource = response.json()?;
        info!("placed order for {} ({:?})", domain, resource.status);
        Ok(Self { url, resource })
    }

    /// 完成訂單的所有授權。
    ///
    /// 對每個授權：讀取授權物件，已是 `valid` 則跳過（先前驗證過的
    /// 識別符不需重新發布挑戰）；否則選出 http-01 挑戰、透過
    /// `publisher` 發布 key authorization、通知 CA 開始驗證，
    /// 然後輪詢授權直到 `valid`。
    ///
    /// # Errors
    ///
    /// CA 判定驗證失敗時回傳 [`AcmeError::AuthorizationInvalid`]，
    /// 時限內未達終止狀態時回傳 [`AcmeError::Timeout`]。
    pub fn authorize(
        &self,
        account: &mut Account,
        publisher: &dyn ChallengePublisher,
        poll: &PollConfig,
    ) -> Result<()> {
        let thumbprint = account.key_pair.thumbprint()?;

        for authz_url in &self.resource.authorizations {
            let authorization: Authorization = account.get_json(authz_url)?;
            match authorization.status {
                AuthorizationStatus::Valid => {
                    debug!("authorization {} already valid, skipping", authz_url);
                    continue;
                }
                AuthorizationStatus::Pending => {}
                other => {
                    return Err(AcmeError::AuthorizationInvalid(failure_of(
                        &authorization,
                        other,
                    )))
                }
            }

            let challenge = authorization.http01_challenge()?.clone();
            let key_authorization = challenge.key_authorization(&thumbprint);
            publisher.publish(&challenge.token, &key_authorization)?;

            // 空 JSON 物件表示「回應已就位，可以來驗了」
            account
                .post(&challenge.url, Some(&json!({})))?
                .require_success()?;
            info!("triggered http-01 validation for {}", authz_url);

            poll_until(poll, "authorization", || {
                let authorization: Authorization = account.get_json(authz_url)?;
                match authorization.status {
                    AuthorizationStatus::Valid => Ok(PollOutcome::Done(())),
                    AuthorizationStatus::Pending => Ok(PollOutcome::Pending),
                    other => Err(AcmeError::AuthorizationInvalid(failure_of(
                        &authorization,
                        other,
                    ))),
                }
            })?;
            debug!("authorization {} is valid", authz_url);
        }
        Ok(())
    }

    /// 提交 CSR 以 finalize 訂單。
    pub fn finalize(&mut self, account: &mut Account, csr_der: &[u8]) -> Result<()> {
        let payload = json!({ "csr": b64url(csr_der) });
        let finalize_url = self.resource.finalize.clone();
        let response = account
            .post(&finalize_url, Some(&payload))?
            .require_success()?;
        self.resource = response.json()?;
        info!("finalized order ({:?})", self.resource.status);
        Ok(())
    }

    /// 以 POST-as-GET 輪詢訂單直到 `valid`，回傳憑證下載 URL。
    ///
    /// 非 2xx 的輪詢回應（例如 `badNonce`，其 `Replay-Nonce` 已被
    /// 回收）視為暫時性失敗，留在迴圈內繼續輪詢，由期限收束。
    ///
    /// # Errors
    ///
    /// 訂單轉為 `invalid` 時回傳 [`AcmeError::OrderInvalid`]；
    /// `valid` 但缺少憑證 URL 時回傳 [`AcmeError::Protocol`]；
    /// 時限內未達終止狀態時回傳 [`AcmeError::Timeout`]。
    pub fn poll_certificate_url(
        &mut self,
        account: &mut Account,
        poll: &PollConfig,
    ) -> Result<String> {
        let order_url = self.url.clone();
        let resource = &mut self.resource;
        poll_until(poll, "order", || {
            let response = account.post(&order_url, None)?;
            if !response.status.is_success() {
                debug!("order poll returned {}, retrying", response.status);
                return Ok(PollOutcome::Pending);
            }
            *resource = response.json()?;
            match resource.status {
                OrderStatus::Valid => match resource.certificate.clone() {
                    Some(certificate_url) => Ok(PollOutcome::Done(certificate_url)),
                    None => Err(AcmeError::Protocol(
                        "valid order missing certificate URL".to_string(),
                    )),
                },
                OrderStatus::Invalid => {
                    let detail = resource
                        .error
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "order reported invalid".to_string());
                    Err(AcmeError::OrderInvalid(detail))
                }
                _ => Ok(PollOutcome::Pending),
            }
        })
    }
}

fn failure_of(authorization: &Authorization, status: AuthorizationStatus) -> String {
    let detail = authorization.failure_detail();
    if detail.is_empty() {
        format!("authorization is {:?}", status)
    } else {
        detail
    }
}

/// 一次成功簽發的產出。
#[derive(Debug)]
pub struct IssuedCertificate {
    /// 簽發的域名。
    pub domain: String,
    /// 憑證鏈檔案路徑（葉憑證在前）。
    pub fullchain_path: PathBuf,
    /// 域名私鑰檔案路徑。
    pub privkey_path: PathBuf,
    /// 憑證鏈內容。
    pub fullchain_pem: String,
}

/// 為單一域名執行完整簽發流程。
///
/// 依序：確保帳戶已註冊、建立訂單、完成授權、產生一把新的域名金鑰
/// 並落盤（`<domain>.key`）、建構 CSR 並落盤（`<domain>.csr`）、
/// finalize、輪詢訂單、下載憑證鏈並寫出 `fullchain.pem` 與
/// `privkey.pem`。域名金鑰每次簽發都重新產生，不重用。
pub fn issue(
    account: &mut Account,
    domain: &str,
    publisher: &dyn ChallengePublisher,
    poll: &PollConfig,
) -> Result<IssuedCertificate> {
    account.ensure_account()?;

    let mut order = Order::place(account, domain)?;
    order.authorize(account, publisher, poll)?;

    let domain_key = KeyPair::generate(DEFAULT_KEY_BITS)?;
    let domain_key_pem = domain_key.to_pem()?;
    account
        .storage
        .write_file_private(&format!("{domain}.key"), &domain_key_pem)?;

    let csr_der = Csr::new(domain).to_der(&domain_key)?;
    account
        .storage
        .write_file(&format!("{domain}.csr"), &csr_der)?;

    order.finalize(account, &csr_der)?;
    let certificate_url = order.poll_certificate_url(account, poll)?;

    let fullchain_pem = account.get_pem_chain(&certificate_url)?;
    account
        .storage
        .write_file(FULLCHAIN_FILE, fullchain_pem.as_bytes())?;
    account
        .storage
        .write_file_private(PRIVKEY_FILE, &domain_key_pem)?;
    info!("certificate issued for {}", domain);

    Ok(IssuedCertificate {
        domain: domain.to_string(),
        fullchain_path: account.out_dir.join(FULLCHAIN_FILE),
        privkey_path: account.out_dir.join(PRIVKEY_FILE),
        fullchain_pem,
    })
}
