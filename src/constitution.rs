//! Governance file verification.
//!
//! `constitution.md` and `laws.md` are hash-pinned: the first verification
//! records their sha256 in KV, and every later run compares against the
//! pinned value. A mismatch means the governance files were tampered with
//! and the runtime must refuse to start. Verified files are forced
//! read-only.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::config::AgentConfig;
use crate::db::tables::kv::keys;
use crate::db::Database;

#[derive(Debug, thiserror::Error)]
pub enum ConstitutionError {
    #[error("governance file '{0}' hash mismatch: expected {1}, found {2}")]
    HashMismatch(String, String, String),
    #[error("failed to read governance file '{0}': {1}")]
    Io(String, String),
    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),
}

/// sha256 of a file's contents, hex-encoded.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let contents = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(hex::encode(hasher.finalize()))
}

/// Verify both governance files against their pinned hashes. Missing files
/// are skipped (onboarding creates them); present files are pinned on first
/// sight and chmod'd to 0444.
pub fn verify_governance_files(
    config: &AgentConfig,
    db: &Database,
) -> Result<(), ConstitutionError> {
    for path in [config.constitution_file(), config.laws_file()] {
        if !path.is_file() {
            log::warn!(
                "[CONSTITUTION] governance file {} not present, skipping verification",
                path.display()
            );
            continue;
        }
        verify_file(&path, db)?;
    }
    Ok(())
}

fn verify_file(path: &Path, db: &Database) -> Result<(), ConstitutionError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    let actual = hash_file(path)
        .map_err(|e| ConstitutionError::Io(path.display().to_string(), e.to_string()))?;

    let key = format!("{}{}", keys::CONSTITUTION_HASH_PREFIX, name);
    match db.kv_get(&key)? {
        None => {
            db.kv_set(&key, &actual)?;
            log::info!("[CONSTITUTION] pinned hash for {}", name);
        }
        Some(pinned) if pinned == actual => {}
        Some(pinned) => {
            return Err(ConstitutionError::HashMismatch(name, pinned, actual));
        }
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o444)) {
            log::warn!(
                "[CONSTITUTION] could not mark {} read-only: {}",
                path.display(),
                e
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;

    fn setup() -> (tempfile::TempDir, AgentConfig, Database) {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::default_under(dir.path());
        let db = Database::new(":memory:").unwrap();
        (dir, config, db)
    }

    #[test]
    fn test_first_sight_pins_hash() {
        let (dir, config, db) = setup();
        std::fs::write(dir.path().join("constitution.md"), "be good").unwrap();
        std::fs::write(dir.path().join("laws.md"), "law 1").unwrap();

        verify_governance_files(&config, &db).unwrap();
        let pinned = db
            .kv_get("constitution_hash_v1:constitution.md")
            .unwrap()
            .unwrap();
        assert_eq!(pinned.len(), 64);
        // Second run against unchanged files passes.
        verify_governance_files(&config, &db).unwrap();
    }

    #[test]
    fn test_tampered_file_detected() {
        let (dir, config, db) = setup();
        let path = dir.path().join("constitution.md");
        std::fs::write(&path, "be good").unwrap();
        verify_governance_files(&config, &db).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        }
        std::fs::write(&path, "be evil").unwrap();
        let err = verify_governance_files(&config, &db).unwrap_err();
        assert!(matches!(err, ConstitutionError::HashMismatch(..)));
    }

    #[test]
    fn test_missing_files_skipped() {
        let (_dir, config, db) = setup();
        verify_governance_files(&config, &db).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_verified_file_forced_readonly() {
        use std::os::unix::fs::PermissionsExt;
        let (dir, config, db) = setup();
        let path = dir.path().join("laws.md");
        std::fs::write(&path, "law 1").unwrap();
        verify_governance_files(&config, &db).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o444);
    }
}
