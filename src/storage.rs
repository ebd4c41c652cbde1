//! 簽發產物的儲存層。
//!
//! 客戶端會產生數個需要跨次執行保留的檔案：帳戶私鑰（`account.key`）、
//! 帳戶識別 URL（`account.kid`）、域名私鑰與 CSR，以及最終的憑證鏈。
//! [`Storage`] 特徵抽象了這些讀寫操作，[`DirStorage`] 以一般目錄實作，
//! [`MemStorage`] 供測試使用。

use std::{
    collections::HashMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::RwLock,
};

use thiserror::Error;

/// 儲存操作可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Key not found: {0}")]
    NotFound(String),
    #[error("Key is invalid: {0}")]
    InvalidKey(String),
    #[error("Lock poisoned")]
    LockPoisoned,
}

/// 儲存操作的結果類型，封裝 [`StorageError`]。
pub type Result<T> = std::result::Result<T, StorageError>;

/// 定義儲存系統所需實現的 API。
///
/// 鍵為相對檔名（例如 `account.key`、`example.com.csr`），
/// 不允許路徑分隔符，避免寫出儲存根目錄之外。
pub trait Storage: Send + Sync + fmt::Debug {
    /// 讀取指定 key 所對應檔案的內容。
    fn read_file(&self, key: &str) -> Result<Vec<u8>>;

    /// 將資料寫入指定 key 所對應的檔案中。
    fn write_file(&self, key: &str, value: &[u8]) -> Result<()>;

    /// 以受限權限（unix 上為 0o600）寫入檔案，用於私鑰等敏感資料。
    fn write_file_private(&self, key: &str, value: &[u8]) -> Result<()>;

    /// 檢查指定 key 是否存在。
    fn exists(&self, key: &str) -> Result<bool>;

    /// 刪除指定 key；key 不存在時視為成功。
    fn remove(&self, key: &str) -> Result<()>;
}

/// 驗證 key 為單一檔名，不含路徑成分。
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    if key.contains('/') || key.contains('\\') || key.contains('\0') || key == "." || key == ".."
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// 以一般目錄為後端的儲存實作，每個 key 對應目錄下的一個檔案。
#[derive(Debug)]
pub struct DirStorage {
    root: PathBuf,
}

impl DirStorage {
    /// 開啟（必要時建立）指定目錄作為儲存根。
    ///
    /// # Errors
    ///
    /// 目錄無法建立時回傳 [`StorageError::Io`]。
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// 回傳指定 key 對應的完整路徑。
    pub fn path_of(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl Storage for DirStorage {
    fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        match fs::read(self.path_of(key)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    fn write_file(&self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(key)?;
        fs::write(self.path_of(key), value)?;
        Ok(())
    }

    fn write_file_private(&self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(key)?;
        let path = self.path_of(key);

        #[cfg(unix)]
        {
            use std::{io::Write, os::unix::fs::OpenOptionsExt};
            let mut file = fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&path)?;
            file.write_all(value)?;
            return Ok(());
        }

        #[cfg(not(unix))]
        {
            fs::write(path, value)?;
            Ok(())
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        Ok(self.path_of(key).exists())
    }

    fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        match fs::remove_file(self.path_of(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e)),
        }
    }
}

/// 記憶體儲存實作，僅供測試與暫時性流程使用。
#[derive(Debug, Default)]
pub struct MemStorage {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemStorage {
    fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        validate_key(key)?;
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        entries
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn write_file(&self, key: &str, value: &[u8]) -> Result<()> {
        validate_key(key)?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn write_file_private(&self, key: &str, value: &[u8]) -> Result<()> {
        self.write_file(key, value)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.contains_key(key))
    }

    fn remove(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| StorageError::LockPoisoned)?;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_storage_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirStorage::open(dir.path()).unwrap();

        storage.write_file("account.kid", b"https://ca/acct/1").unwrap();
        assert!(storage.exists("account.kid").unwrap());
        assert_eq!(
            storage.read_file("account.kid").unwrap(),
            b"https://ca/acct/1"
        );

        storage.remove("account.kid").unwrap();
        assert!(!storage.exists("account.kid").unwrap());
        // 重複刪除不報錯
        storage.remove("account.kid").unwrap();
    }

    #[test]
    fn test_dir_storage_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirStorage::open(dir.path()).unwrap();
        assert!(matches!(
            storage.read_file("missing"),
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_dir_storage_rejects_path_components() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DirStorage::open(dir.path()).unwrap();
        assert!(matches!(
            storage.write_file("../escape", b"x"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            storage.read_file(""),
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_private_write_restricts_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = DirStorage::open(dir.path()).unwrap();
        storage.write_file_private("account.key", b"secret").unwrap();

        let mode = fs::metadata(storage.path_of("account.key"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_mem_storage_roundtrip() {
        let storage = MemStorage::new();
        storage.write_file("k", b"v").unwrap();
        assert_eq!(storage.read_file("k").unwrap(), b"v");
        storage.remove("k").unwrap();
        assert!(matches!(
            storage.read_file("k"),
            Err(StorageError::NotFound(_))
        ));
    }
}
