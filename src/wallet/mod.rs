//! Wallet session: passphrase unlock with TTL, lock, and rotation.
//!
//! The keystore blob at `<home>/wallet.enc.json` is the only durable form
//! of the signer. Unlocking decrypts it into process memory for a bounded
//! window; mutating actions fetch the signer by value at action start and
//! never hold it past the action.

use chrono::{DateTime, Duration, Utc};
use ethers::core::k256::ecdsa::SigningKey;
use ethers::signers::{Signer, Wallet};
use std::path::{Path, PathBuf};

use crate::db::Database;

pub const KEYSTORE_FILE: &str = "wallet.enc.json";

/// Minimum passphrase length accepted by rotation.
const MIN_PASSPHRASE_LEN: usize = 12;
/// Distinct character classes (lower/upper/digit/symbol) required.
const MIN_CHARACTER_CLASSES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("keystore not found at {0}")]
    KeystoreMissing(String),
    #[error("failed to decrypt keystore: {0}")]
    Decrypt(String),
    #[error("failed to encrypt keystore: {0}")]
    Encrypt(String),
    #[error("Wallet is locked")]
    Locked,
    #[error("passphrase rejected: {0}")]
    WeakPassphrase(String),
    #[error("new passphrase must differ from the old one")]
    SamePassphrase,
    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),
}

pub struct WalletSession {
    keystore_path: PathBuf,
    signer: Option<Wallet<SigningKey>>,
    unlocked_until: Option<DateTime<Utc>>,
}

impl WalletSession {
    pub fn new(keystore_path: PathBuf) -> Self {
        WalletSession {
            keystore_path,
            signer: None,
            unlocked_until: None,
        }
    }

    /// Generate a fresh signer and write its keystore. Used by onboarding
    /// and by tests; refuses to clobber an existing keystore.
    pub fn create_keystore(home_dir: &Path, passphrase: &str) -> Result<String, WalletError> {
        let path = home_dir.join(KEYSTORE_FILE);
        if path.exists() {
            return Err(WalletError::Encrypt(format!(
                "keystore already exists at {}",
                path.display()
            )));
        }
        std::fs::create_dir_all(home_dir).map_err(|e| WalletError::Encrypt(e.to_string()))?;
        let (wallet, _) = Wallet::<SigningKey>::new_keystore(
            home_dir,
            &mut rand::thread_rng(),
            passphrase,
            Some(KEYSTORE_FILE),
        )
        .map_err(|e| WalletError::Encrypt(e.to_string()))?;
        restrict_permissions(&path);
        Ok(format_address(&wallet))
    }

    /// Decrypt the keystore and open an unlock session for `ttl_sec`.
    /// Returns the signer address.
    pub fn unlock(
        &mut self,
        db: &Database,
        passphrase: &str,
        ttl_sec: u64,
    ) -> Result<String, WalletError> {
        if !self.keystore_path.is_file() {
            return Err(WalletError::KeystoreMissing(
                self.keystore_path.display().to_string(),
            ));
        }
        let wallet = Wallet::<SigningKey>::decrypt_keystore(&self.keystore_path, passphrase)
            .map_err(|e| WalletError::Decrypt(e.to_string()))?;

        let address = format_address(&wallet);
        let expires_at = Utc::now() + Duration::seconds(ttl_sec as i64);
        db.insert_unlock_session(&address, &expires_at.to_rfc3339())?;

        self.signer = Some(wallet);
        self.unlocked_until = Some(expires_at);
        log::info!("[WALLET] unlocked {} for {}s", address, ttl_sec);
        Ok(address)
    }

    /// Discard the in-memory signer and revoke active sessions.
    pub fn lock(&mut self, db: &Database) -> Result<(), WalletError> {
        self.signer = None;
        self.unlocked_until = None;
        db.revoke_unlock_sessions()?;
        db.insert_memory_episode(
            "wallet locked",
            None,
            Some("wallet:lock"),
            &serde_json::Value::Null,
        )?;
        log::info!("[WALLET] locked");
        Ok(())
    }

    pub fn is_unlocked(&self) -> bool {
        match (&self.signer, self.unlocked_until) {
            (Some(_), Some(until)) => Utc::now() < until,
            _ => false,
        }
    }

    /// Snapshot the signer for one action. None when locked or expired.
    pub fn account(&self) -> Option<Wallet<SigningKey>> {
        if self.is_unlocked() {
            self.signer.clone()
        } else {
            None
        }
    }

    /// The signer address while unlocked.
    pub fn address(&self) -> Option<String> {
        if self.is_unlocked() {
            self.signer.as_ref().map(format_address)
        } else {
            None
        }
    }

    /// Re-encrypt the keystore under a new passphrase, then lock.
    pub fn rotate(
        &mut self,
        db: &Database,
        old_passphrase: &str,
        new_passphrase: &str,
    ) -> Result<(), WalletError> {
        if old_passphrase == new_passphrase {
            return Err(WalletError::SamePassphrase);
        }
        check_passphrase_strength(new_passphrase)?;
        if !self.keystore_path.is_file() {
            return Err(WalletError::KeystoreMissing(
                self.keystore_path.display().to_string(),
            ));
        }

        let wallet = Wallet::<SigningKey>::decrypt_keystore(&self.keystore_path, old_passphrase)
            .map_err(|e| WalletError::Decrypt(e.to_string()))?;
        let secret = wallet.signer().to_bytes();

        let dir = self
            .keystore_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let temp_name = format!("{}.rotate", KEYSTORE_FILE);
        Wallet::<SigningKey>::encrypt_keystore(
            &dir,
            &mut rand::thread_rng(),
            secret,
            new_passphrase,
            Some(temp_name.as_str()),
        )
        .map_err(|e| WalletError::Encrypt(e.to_string()))?;
        std::fs::rename(dir.join(&temp_name), &self.keystore_path)
            .map_err(|e| WalletError::Encrypt(e.to_string()))?;
        restrict_permissions(&self.keystore_path);

        self.lock(db)?;
        log::info!("[WALLET] passphrase rotated, wallet relocked");
        Ok(())
    }
}

fn format_address(wallet: &Wallet<SigningKey>) -> String {
    format!("{:?}", wallet.address()).to_lowercase()
}

fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
            log::warn!("[WALLET] could not restrict {}: {}", path.display(), e);
        }
    }
}

fn check_passphrase_strength(passphrase: &str) -> Result<(), WalletError> {
    if passphrase.len() < MIN_PASSPHRASE_LEN {
        return Err(WalletError::WeakPassphrase(format!(
            "must be at least {} characters",
            MIN_PASSPHRASE_LEN
        )));
    }
    let classes = [
        passphrase.chars().any(|c| c.is_ascii_lowercase()),
        passphrase.chars().any(|c| c.is_ascii_uppercase()),
        passphrase.chars().any(|c| c.is_ascii_digit()),
        passphrase
            .chars()
            .any(|c| !c.is_ascii_alphanumeric() && !c.is_whitespace()),
    ]
    .iter()
    .filter(|present| **present)
    .count();
    if classes < MIN_CHARACTER_CLASSES {
        return Err(WalletError::WeakPassphrase(format!(
            "must use at least {} of: lowercase, uppercase, digits, symbols",
            MIN_CHARACTER_CLASSES
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSPHRASE: &str = "Correct-Horse-42";

    fn setup() -> (tempfile::TempDir, WalletSession, Database) {
        let dir = tempfile::tempdir().unwrap();
        WalletSession::create_keystore(dir.path(), PASSPHRASE).unwrap();
        let session = WalletSession::new(dir.path().join(KEYSTORE_FILE));
        let db = Database::new(":memory:").unwrap();
        (dir, session, db)
    }

    #[test]
    fn test_unlock_and_lock() {
        let (_dir, mut session, db) = setup();
        assert!(!session.is_unlocked());
        let address = session.unlock(&db, PASSPHRASE, 300).unwrap();
        assert!(address.starts_with("0x"));
        assert!(session.is_unlocked());
        assert!(session.account().is_some());
        assert!(db.active_unlock_session().unwrap().is_some());

        session.lock(&db).unwrap();
        assert!(!session.is_unlocked());
        assert!(session.account().is_none());
        assert!(db.active_unlock_session().unwrap().is_none());
    }

    #[test]
    fn test_wrong_passphrase_rejected() {
        let (_dir, mut session, db) = setup();
        assert!(matches!(
            session.unlock(&db, "Wrong-Horse-42", 300),
            Err(WalletError::Decrypt(_))
        ));
        assert!(!session.is_unlocked());
    }

    #[test]
    fn test_rotation_requires_strength() {
        let (_dir, mut session, db) = setup();
        assert!(matches!(
            session.rotate(&db, PASSPHRASE, PASSPHRASE),
            Err(WalletError::SamePassphrase)
        ));
        assert!(matches!(
            session.rotate(&db, PASSPHRASE, "short"),
            Err(WalletError::WeakPassphrase(_))
        ));
        assert!(matches!(
            session.rotate(&db, PASSPHRASE, "alllowercaseonly"),
            Err(WalletError::WeakPassphrase(_))
        ));
    }

    #[test]
    fn test_rotation_reencrypts_and_locks() {
        let (_dir, mut session, db) = setup();
        let address = session.unlock(&db, PASSPHRASE, 300).unwrap();
        session.rotate(&db, PASSPHRASE, "New-Horse-1234").unwrap();
        assert!(!session.is_unlocked());

        // Old passphrase no longer decrypts; new one yields the same key.
        assert!(session.unlock(&db, PASSPHRASE, 300).is_err());
        let rotated = session.unlock(&db, "New-Horse-1234", 300).unwrap();
        assert_eq!(rotated, address);
    }

    #[test]
    fn test_expired_ttl_locks_account_access() {
        let (_dir, mut session, db) = setup();
        session.unlock(&db, PASSPHRASE, 300).unwrap();
        // Force expiry by rewinding the window.
        session.unlocked_until = Some(Utc::now() - Duration::seconds(1));
        assert!(!session.is_unlocked());
        assert!(session.account().is_none());
    }

    #[test]
    fn test_strength_checker() {
        assert!(check_passphrase_strength("Abcdef123456").is_ok());
        assert!(check_passphrase_strength("abcdef!23456").is_ok());
        assert!(check_passphrase_strength("abcdefghijkl").is_err());
        assert!(check_passphrase_strength("Ab1!").is_err());
    }
}
