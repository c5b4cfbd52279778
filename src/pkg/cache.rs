// Purpose: Shared on-disk store of VCS working copies, keyed by normalized repository location.
// Inputs/Outputs: Cache keys in, working-copy paths and per-key / system-wide locks out.
// Invariants: At most one working copy per key; every mutation of it holds that key's lock.
// Gotchas: The system lock is an OS file lock, so it also serializes separate processes.

use anyhow::Context;
use fs2::FileExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::pkg::error::PkgError;
use crate::pkg::vcs::CacheKey;

pub fn ensure_dir(p: &Path) -> anyhow::Result<()> {
    fs::create_dir_all(p).with_context(|| format!("create {}", p.display()))
}

pub fn url_hash(url: &str) -> String {
    let mut h = Sha256::new();
    h.update(url.as_bytes());
    hex::encode(h.finalize())
}

fn escape_key(url: &str) -> String {
    let mut s: String = url
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();
    s.truncate(64);
    s
}

/// Held while a working copy is being mutated.
pub type KeyGuard<'a> = MutexGuard<'a, ()>;

pub struct Cache {
    root: PathBuf,
    locks: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
}

impl Cache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the cache layout. Safe to call repeatedly.
    pub fn setup(&self) -> anyhow::Result<()> {
        ensure_dir(&self.root.join("src"))
    }

    /// Forgets per-key bookkeeping, e.g. after the tree was wiped.
    pub fn reset(&self) {
        self.lock_table().clear();
    }

    /// Wipes every working copy and reinitializes an empty cache.
    pub fn clear(&self) -> anyhow::Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("remove {}", self.root.display()))?;
        }
        self.reset();
        self.setup()
    }

    pub fn working_copy(&self, key: &CacheKey) -> PathBuf {
        let hash = url_hash(&format!("{}:{}", key.kind, key.url));
        self.root.join("src").join(format!(
            "{}-{}-{}",
            escape_key(&key.url),
            key.kind,
            &hash[..12]
        ))
    }

    /// The mutex guarding one key. Callers lock it for the duration of any
    /// fetch/checkout/copy against that working copy.
    pub fn key_lock(&self, key: &CacheKey) -> Arc<Mutex<()>> {
        self.lock_table()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn lock_table(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<Mutex<()>>>> {
        // A worker that panicked mid-install leaves the table itself intact.
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Locks a key mutex, tolerating poisoning from a panicked sibling.
pub fn hold(m: &Mutex<()>) -> KeyGuard<'_> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Process-wide advisory lock on the cache. Released on drop.
pub struct SystemLock {
    _file: File,
}

impl SystemLock {
    /// `timeout == None` blocks until the lock is free. With a timeout the
    /// lock is polled and `CacheLockTimeout` is returned once it elapses.
    pub fn acquire(home: &Path, timeout: Option<Duration>) -> anyhow::Result<Self> {
        ensure_dir(home)?;
        let lock_path = home.join("lock");
        let f = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("open {}", lock_path.display()))?;
        match timeout {
            None => {
                if f.try_lock_exclusive().is_err() {
                    log::info!("waiting for another run to release {}", lock_path.display());
                    f.lock_exclusive()
                        .with_context(|| format!("lock {}", lock_path.display()))?;
                }
            }
            Some(limit) => {
                let start = Instant::now();
                while f.try_lock_exclusive().is_err() {
                    if start.elapsed() >= limit {
                        return Err(PkgError::CacheLockTimeout {
                            path: lock_path,
                            timeout: limit,
                        }
                        .into());
                    }
                    thread::sleep(Duration::from_millis(50));
                }
            }
        }
        Ok(Self { _file: f })
    }
}

#[cfg(test)]
mod tests {
    use super::{Cache, SystemLock, hold};
    use crate::pkg::error::{PkgError, kind_of};
    use crate::pkg::vcs::{CacheKey, VcsType};
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;

    fn key(url: &str, kind: VcsType) -> CacheKey {
        CacheKey {
            url: url.to_string(),
            kind,
        }
    }

    #[test]
    fn working_copy_paths_are_distinct_per_key_and_stable() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cache = Cache::new(tmp.path());
        let a = cache.working_copy(&key("github.com/a/b", VcsType::Git));
        let b = cache.working_copy(&key("github.com/a/b", VcsType::Hg));
        let c = cache.working_copy(&key("github.com/a/c", VcsType::Git));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, cache.working_copy(&key("github.com/a/b", VcsType::Git)));
        assert!(a.starts_with(tmp.path().join("src")));
    }

    #[test]
    fn key_lock_is_shared_per_key() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let cache = Cache::new(tmp.path());
        let k = key("github.com/a/b", VcsType::Git);
        let l1 = cache.key_lock(&k);
        let l2 = cache.key_lock(&k);
        assert!(Arc::ptr_eq(&l1, &l2));
        let other = cache.key_lock(&key("github.com/a/c", VcsType::Git));
        assert!(!Arc::ptr_eq(&l1, &other));

        let _g = hold(&l1);
        assert!(l2.try_lock().is_err(), "same key must serialize");
        assert!(other.try_lock().is_ok(), "other keys stay free");
    }

    #[test]
    fn clear_recreates_an_empty_cache() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let root = tmp.path().join("cache");
        let cache = Cache::new(&root);
        cache.setup().expect("setup");
        cache.setup().expect("setup is idempotent");
        let wc = cache.working_copy(&key("github.com/a/b", VcsType::Git));
        fs::create_dir_all(&wc).expect("mkdir wc");
        let before = cache.key_lock(&key("github.com/a/b", VcsType::Git));

        cache.clear().expect("clear");
        assert!(root.join("src").is_dir());
        assert!(!wc.exists());
        let after = cache.key_lock(&key("github.com/a/b", VcsType::Git));
        assert!(!Arc::ptr_eq(&before, &after), "reset drops old bookkeeping");
    }

    #[test]
    fn system_lock_times_out_when_held() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let held = SystemLock::acquire(tmp.path(), None).expect("first lock");
        let err = match SystemLock::acquire(tmp.path(), Some(Duration::from_millis(120))) {
            Ok(_) => panic!("second lock must not be granted"),
            Err(e) => e,
        };
        assert!(matches!(
            kind_of(&err),
            Some(PkgError::CacheLockTimeout { .. })
        ));
        drop(held);
        SystemLock::acquire(tmp.path(), Some(Duration::from_millis(500)))
            .expect("lock after release");
    }
}
