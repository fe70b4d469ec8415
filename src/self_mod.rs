//! Bounded self-modification with deterministic rollback.
//!
//! Every write is gated (emergency stop, survival tier, rate limit,
//! protected paths, scope), backed up, hashed, and recorded as a mutation
//! plus a rollback point. Rolling back a path restores the most recent
//! pre-image byte for byte, or deletes the file if it did not exist.

use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::constitution::hash_file;
use crate::db::tables::kv::keys;
use crate::db::Database;
use crate::survival::SurvivalTier;

/// Successful writes allowed per rolling hour.
const MAX_WRITES_PER_HOUR: usize = 6;
/// Rolling window length in milliseconds.
const RATE_WINDOW_MS: i64 = 60 * 60 * 1000;
/// KV sentinel meaning "the pre-image did not exist; rollback deletes".
pub const DELETE_SENTINEL: &str = "__DELETE__";

#[derive(Debug, thiserror::Error)]
pub enum SelfModError {
    #[error("Self-modification denied: emergency stop is enabled")]
    EmergencyStop,
    #[error("Self-modification denied: survival tier is dead")]
    SurvivalDead,
    #[error("Self-modification denied: disabled by autonomy policy")]
    Disabled,
    #[error("Self-modification denied: 6 writes/hour limit exceeded")]
    RateLimited,
    #[error("Self-modification denied: '{0}' is a protected path")]
    ProtectedPath(String),
    #[error("Self-modification denied: '{0}' is outside the agent scope")]
    OutOfScope(String),
    #[error("rollback failed: no backup recorded for mutation {0}")]
    MissingBackup(String),
    #[error("rollback failed: no rollback point for path '{0}'")]
    NoRollbackPoint(String),
    #[error("self-mod I/O error: {0}")]
    Io(String),
    #[error("database error: {0}")]
    Store(#[from] rusqlite::Error),
}

/// Result of a successful write.
#[derive(Debug, Clone)]
pub struct SelfModOutcome {
    pub mutation_id: String,
    pub path: String,
    pub before_hash: Option<String>,
    pub after_hash: String,
    pub backup_path: Option<String>,
}

/// Result of a rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// The pre-image was restored from its backup.
    Restored,
    /// The file did not exist before the mutation and was deleted.
    Deleted,
}

pub struct SelfModEngine {
    db: Arc<Database>,
    home_dir: PathBuf,
    rollbacks_dir: PathBuf,
    protected_paths: Vec<PathBuf>,
    enabled: bool,
}

impl SelfModEngine {
    pub fn new(
        db: Arc<Database>,
        home_dir: &Path,
        rollbacks_dir: &Path,
        protected_paths: &[String],
        enabled: bool,
    ) -> Self {
        let protected = protected_paths
            .iter()
            .map(|p| {
                let path = Path::new(p);
                if path.is_absolute() {
                    normalize_path(path)
                } else {
                    normalize_path(&home_dir.join(path))
                }
            })
            .collect();
        SelfModEngine {
            db,
            home_dir: normalize_path(home_dir),
            rollbacks_dir: rollbacks_dir.to_path_buf(),
            protected_paths: protected,
            enabled,
        }
    }

    /// Apply one gated, reversible write.
    pub fn apply(
        &self,
        target_path: &Path,
        content: &str,
        reason: Option<&str>,
    ) -> Result<SelfModOutcome, SelfModError> {
        self.check_emergency_and_survival()?;
        if !self.enabled {
            return Err(SelfModError::Disabled);
        }
        self.check_rate_limit()?;

        let target = normalize_path(target_path);
        let display = target.display().to_string();

        for protected in &self.protected_paths {
            if target == *protected || target.starts_with(protected) {
                return Err(SelfModError::ProtectedPath(display));
            }
        }

        let cwd = std::env::current_dir()
            .map(|d| normalize_path(&d))
            .unwrap_or_else(|_| self.home_dir.clone());
        if !(target.starts_with(&cwd) || target.starts_with(&self.home_dir)) {
            return Err(SelfModError::OutOfScope(display));
        }

        let before_hash = if target.is_file() {
            Some(hash_file(&target).map_err(|e| SelfModError::Io(e.to_string()))?)
        } else {
            None
        };

        let backup_path = if target.is_file() {
            Some(self.write_backup(&target)?)
        } else {
            None
        };

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SelfModError::Io(e.to_string()))?;
            restrict_dir_permissions(parent);
        }
        atomic_write(&target, content.as_bytes())?;

        let after_hash = hash_file(&target).map_err(|e| SelfModError::Io(e.to_string()))?;
        self.record_write_timestamp()?;

        let (mutation_id, _) = self.db.insert_self_mod_mutation(
            &display,
            before_hash.as_deref(),
            &after_hash,
            reason,
        )?;

        let backup_key = format!("{}{}", keys::SELF_MOD_BACKUP_PREFIX, mutation_id);
        match &backup_path {
            Some(path) => self.db.kv_set(&backup_key, path)?,
            None => self.db.kv_set(&backup_key, DELETE_SENTINEL)?,
        }

        log::info!(
            "[SELF-MOD] wrote {} (mutation {}, before {:?})",
            display,
            mutation_id,
            before_hash
        );
        Ok(SelfModOutcome {
            mutation_id,
            path: display,
            before_hash,
            after_hash,
            backup_path,
        })
    }

    /// Revert the most recent mutation recorded for a path.
    pub fn rollback(&self, target_path: &Path) -> Result<RollbackOutcome, SelfModError> {
        let target = normalize_path(target_path);
        let display = target.display().to_string();

        let point = self
            .db
            .latest_rollback_point_for_path(&display)?
            .ok_or_else(|| SelfModError::NoRollbackPoint(display.clone()))?;

        let backup_key = format!("{}{}", keys::SELF_MOD_BACKUP_PREFIX, point.mutation_id);
        let locator = self
            .db
            .kv_get(&backup_key)?
            .ok_or_else(|| SelfModError::MissingBackup(point.mutation_id.clone()))?;

        if locator == DELETE_SENTINEL {
            match std::fs::remove_file(&target) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(SelfModError::Io(e.to_string())),
            }
            log::info!("[SELF-MOD] rollback deleted {}", display);
            return Ok(RollbackOutcome::Deleted);
        }

        let backup = PathBuf::from(&locator);
        if !backup.is_file() {
            return Err(SelfModError::MissingBackup(point.mutation_id));
        }
        let bytes = std::fs::read(&backup).map_err(|e| SelfModError::Io(e.to_string()))?;
        atomic_write(&target, &bytes)?;
        log::info!("[SELF-MOD] rollback restored {} from {}", display, locator);
        Ok(RollbackOutcome::Restored)
    }

    fn check_emergency_and_survival(&self) -> Result<(), SelfModError> {
        if self.db.get_emergency_state()?.enabled {
            return Err(SelfModError::EmergencyStop);
        }
        if let Some(snapshot) = self.db.latest_survival_snapshot()? {
            if SurvivalTier::parse(&snapshot.tier) == Some(SurvivalTier::Dead) {
                return Err(SelfModError::SurvivalDead);
            }
        }
        Ok(())
    }

    fn check_rate_limit(&self) -> Result<(), SelfModError> {
        let now = Utc::now().timestamp_millis();
        let stamps: Vec<i64> = self
            .db
            .kv_get_json(keys::SELF_MOD_TIMESTAMPS)?
            .unwrap_or_default();
        let recent = stamps
            .iter()
            .filter(|ts| now - **ts < RATE_WINDOW_MS)
            .count();
        if recent >= MAX_WRITES_PER_HOUR {
            return Err(SelfModError::RateLimited);
        }
        Ok(())
    }

    fn record_write_timestamp(&self) -> Result<(), SelfModError> {
        let now = Utc::now().timestamp_millis();
        self.db.kv_update(keys::SELF_MOD_TIMESTAMPS, |current| {
            let mut stamps: Vec<i64> = current
                .and_then(|raw| serde_json::from_str(&raw).ok())
                .unwrap_or_default();
            stamps.retain(|ts| now - *ts < RATE_WINDOW_MS);
            stamps.push(now);
            serde_json::to_string(&stamps).unwrap_or_else(|_| "[]".to_string())
        })?;
        Ok(())
    }

    fn write_backup(&self, target: &Path) -> Result<String, SelfModError> {
        std::fs::create_dir_all(&self.rollbacks_dir)
            .map_err(|e| SelfModError::Io(e.to_string()))?;
        restrict_dir_permissions(&self.rollbacks_dir);

        let basename = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        let sanitized: String = basename
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        let backup = self
            .rollbacks_dir
            .join(format!("{}.{}.bak", sanitized, Utc::now().timestamp_millis()));
        std::fs::copy(target, &backup).map_err(|e| SelfModError::Io(e.to_string()))?;
        restrict_file_permissions(&backup);
        Ok(backup.display().to_string())
    }
}

/// Lexical normalization: absolute, with `.` and `..` resolved.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("/"))
            .join(path)
    };
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn atomic_write(target: &Path, bytes: &[u8]) -> Result<(), SelfModError> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let temp = parent.join(format!(
        ".{}.tmp-{}",
        target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string()),
        uuid::Uuid::new_v4()
    ));
    std::fs::write(&temp, bytes).map_err(|e| SelfModError::Io(e.to_string()))?;
    restrict_file_permissions(&temp);
    std::fs::rename(&temp, target).map_err(|e| SelfModError::Io(e.to_string()))?;
    Ok(())
}

fn restrict_file_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
}

fn restrict_dir_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(home: &Path, enabled: bool) -> (SelfModEngine, Arc<Database>) {
        let db = Arc::new(Database::new(":memory:").unwrap());
        let engine = SelfModEngine::new(
            db.clone(),
            home,
            &home.join("data").join("rollbacks"),
            &["constitution.md".to_string(), "wallet.enc.json".to_string()],
            enabled,
        );
        (engine, db)
    }

    #[test]
    fn test_write_records_mutation_and_rollback_point() {
        let home = tempfile::tempdir().unwrap();
        let (engine, db) = engine(home.path(), true);
        let target = home.path().join("notes.md");

        let outcome = engine.apply(&target, "first", Some("seed notes")).unwrap();
        assert!(outcome.before_hash.is_none());
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "first");
        assert_eq!(db.count_self_mod_mutations().unwrap(), 1);
        assert!(db
            .latest_rollback_point_for_path(&outcome.path)
            .unwrap()
            .is_some());
        // Created-file backups use the delete sentinel.
        let locator = db
            .kv_get(&format!("self_mod_backup_v1:{}", outcome.mutation_id))
            .unwrap()
            .unwrap();
        assert_eq!(locator, DELETE_SENTINEL);
    }

    #[test]
    fn test_rollback_restores_pre_image() {
        let home = tempfile::tempdir().unwrap();
        let (engine, _db) = engine(home.path(), true);
        let target = home.path().join("x.txt");
        std::fs::write(&target, "A").unwrap();

        let outcome = engine.apply(&target, "B", None).unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "B");
        assert_eq!(outcome.before_hash.as_deref(), Some(&hash_bytes(b"A")[..]));

        assert_eq!(engine.rollback(&target).unwrap(), RollbackOutcome::Restored);
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "A");
        assert_eq!(
            hash_file(&target).unwrap(),
            outcome.before_hash.unwrap()
        );
    }

    #[test]
    fn test_rollback_deletes_created_file() {
        let home = tempfile::tempdir().unwrap();
        let (engine, _db) = engine(home.path(), true);
        let target = home.path().join("fresh.txt");
        engine.apply(&target, "new", None).unwrap();
        assert_eq!(engine.rollback(&target).unwrap(), RollbackOutcome::Deleted);
        assert!(!target.exists());
    }

    #[test]
    fn test_rate_limit_seventh_refused() {
        let home = tempfile::tempdir().unwrap();
        let (engine, db) = engine(home.path(), true);
        let target = home.path().join("notes.md");

        for i in 0..6 {
            engine.apply(&target, &format!("rev {i}"), None).unwrap();
        }
        let err = engine.apply(&target, "rev 6", None).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Self-modification denied: 6 writes/hour limit exceeded"
        );
        // No file change, no new mutation row.
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "rev 5");
        assert_eq!(db.count_self_mod_mutations().unwrap(), 6);
    }

    #[test]
    fn test_stale_timestamps_fall_out_of_window() {
        let home = tempfile::tempdir().unwrap();
        let (engine, db) = engine(home.path(), true);
        let stale = Utc::now().timestamp_millis() - RATE_WINDOW_MS - 1000;
        db.kv_set_json(keys::SELF_MOD_TIMESTAMPS, &vec![stale; 6])
            .unwrap();
        engine
            .apply(&home.path().join("notes.md"), "ok", None)
            .unwrap();
    }

    #[test]
    fn test_protected_path_refused() {
        let home = tempfile::tempdir().unwrap();
        let (engine, _db) = engine(home.path(), true);
        let err = engine
            .apply(&home.path().join("constitution.md"), "mine now", None)
            .unwrap_err();
        assert!(matches!(err, SelfModError::ProtectedPath(_)));
    }

    #[test]
    fn test_traversal_into_protected_path_refused() {
        let home = tempfile::tempdir().unwrap();
        let (engine, _db) = engine(home.path(), true);
        let sneaky = home.path().join("skills").join("..").join("wallet.enc.json");
        let err = engine.apply(&sneaky, "stolen", None).unwrap_err();
        assert!(matches!(err, SelfModError::ProtectedPath(_)));
    }

    #[test]
    fn test_out_of_scope_refused() {
        let home = tempfile::tempdir().unwrap();
        let (engine, _db) = engine(home.path(), true);
        let err = engine
            .apply(Path::new("/etc/aethernet-test.conf"), "nope", None)
            .unwrap_err();
        assert!(matches!(err, SelfModError::OutOfScope(_)));
    }

    #[test]
    fn test_disabled_refused() {
        let home = tempfile::tempdir().unwrap();
        let (engine, _db) = engine(home.path(), false);
        let err = engine
            .apply(&home.path().join("notes.md"), "x", None)
            .unwrap_err();
        assert!(matches!(err, SelfModError::Disabled));
    }

    #[test]
    fn test_emergency_stop_refuses() {
        let home = tempfile::tempdir().unwrap();
        let (engine, db) = engine(home.path(), true);
        db.set_emergency_stop(true, Some("halt")).unwrap();
        let err = engine
            .apply(&home.path().join("notes.md"), "x", None)
            .unwrap_err();
        assert!(matches!(err, SelfModError::EmergencyStop));
    }

    #[test]
    fn test_dead_tier_refuses() {
        let home = tempfile::tempdir().unwrap();
        let (engine, db) = engine(home.path(), true);
        db.insert_survival_snapshot("dead", 0).unwrap();
        let err = engine
            .apply(&home.path().join("notes.md"), "x", None)
            .unwrap_err();
        assert!(matches!(err, SelfModError::SurvivalDead));
    }

    fn hash_bytes(bytes: &[u8]) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }
}
