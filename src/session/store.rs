//! Session artifact files and the single-writer lock protecting them.
//!
//! An artifact is never edited in place: writers take `<file>.lock`, write a
//! temporary sibling and rename it over the artifact.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::error::{HarnessError, Result};
use crate::session::Session;
use crate::utils::safe_file_stem;
use crate::wait::wait_until;

/// Artifact path for a base URL, e.g. `session-localhost_8009.json`
pub fn session_path_for(dir: &Path, base_url: &str) -> PathBuf {
    let host = base_url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    dir.join(format!("session-{}.json", safe_file_stem(host)))
}

/// Read an artifact; `Ok(None)` when missing or unreadable as a session
pub fn read_session(path: &Path) -> Result<Option<Session>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_str::<Session>(&content) {
        Ok(session) => Ok(Some(session)),
        Err(e) => {
            log::warn!("ignoring corrupt session artifact {}: {}", path.display(), e);
            Ok(None)
        }
    }
}

/// Replace the artifact atomically. Caller must hold the [`SessionLock`].
pub fn write_session(path: &Path, session: &Session) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    let json = serde_json::to_string_pretty(session)?;
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Remove the artifact. Caller must hold the [`SessionLock`].
pub fn remove_session(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Exclusive writer lock, released on drop
#[derive(Debug)]
pub struct SessionLock {
    path: PathBuf,
}

impl SessionLock {
    /// Acquire `<artifact>.lock`, breaking a lock older than `stale_after`
    pub async fn acquire(artifact: &Path, timeout: Duration, stale_after: Duration) -> Result<Self> {
        let lock_path = lock_path_for(artifact);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let acquired = wait_until("session lock", timeout, || {
            let lock_path = lock_path.clone();
            async move { try_create_lock(&lock_path, stale_after) }
        })
        .await;

        match acquired {
            Ok(()) => {
                log::debug!("acquired {}", lock_path.display());
                Ok(Self { path: lock_path })
            }
            Err(HarnessError::Timeout { waited_ms, .. }) => Err(HarnessError::Lock {
                path: lock_path,
                waited_ms,
            }),
            Err(e) => Err(e),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::warn!("failed to release {}: {}", self.path.display(), e);
        }
    }
}

fn lock_path_for(artifact: &Path) -> PathBuf {
    let mut name = artifact.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn try_create_lock(lock_path: &Path, stale_after: Duration) -> Result<Option<()>> {
    match OpenOptions::new().write(true).create_new(true).open(lock_path) {
        Ok(mut file) => {
            let _ = writeln!(file, "{}", std::process::id());
            Ok(Some(()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            if is_stale(lock_path, stale_after) {
                log::warn!("breaking stale lock {}", lock_path.display());
                let _ = std::fs::remove_file(lock_path);
            }
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn is_stale(lock_path: &Path, stale_after: Duration) -> bool {
    std::fs::metadata(lock_path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map_or(false, |age| age > stale_after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::cookie;
    use crate::session::{CredentialsRef, ExpiryPolicy};

    fn sample_session() -> Session {
        Session {
            base_url: "http://localhost:8009".to_string(),
            captured_at: chrono::Utc::now(),
            expires_policy: ExpiryPolicy::ReuseUntilFailure,
            credentials_ref: CredentialsRef("a1b2c3".to_string()),
            cookies: vec![cookie("laravel_session", "abc")],
            local_storage: Default::default(),
        }
    }

    #[test]
    fn test_session_path_is_keyed_by_base_url() {
        let dir = Path::new("/tmp/sessions");
        assert_eq!(
            session_path_for(dir, "http://localhost:8009/"),
            dir.join("session-localhost_8009.json")
        );
        assert_ne!(
            session_path_for(dir, "http://localhost:8009"),
            session_path_for(dir, "http://127.0.0.1:8009")
        );
    }

    #[test]
    fn test_write_then_read_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/session-x.json");

        assert!(read_session(&path).unwrap().is_none());
        write_session(&path, &sample_session()).unwrap();

        let loaded = read_session(&path).unwrap().expect("session written");
        assert_eq!(loaded.cookies[0].name, "laravel_session");
        assert_eq!(loaded.credentials_ref.0, "a1b2c3");

        remove_session(&path).unwrap();
        assert!(!path.exists());
        remove_session(&path).unwrap();
    }

    #[test]
    fn test_corrupt_artifact_reads_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(read_session(&path).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("session.json");
        let stale = Duration::from_secs(60);

        let first = SessionLock::acquire(&artifact, Duration::from_millis(50), stale)
            .await
            .unwrap();
        assert!(first.path().exists());

        let err = SessionLock::acquire(&artifact, Duration::from_millis(50), stale)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Lock { .. }));

        drop(first);
        let second = SessionLock::acquire(&artifact, Duration::from_millis(50), stale).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_stale_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("session.json");
        std::fs::write(lock_path_for(&artifact), "999999").unwrap();

        let lock = SessionLock::acquire(&artifact, Duration::from_millis(500), Duration::ZERO).await;
        assert!(lock.is_ok());
    }
}
