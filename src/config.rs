// Purpose: Explicit per-run configuration and project paths, replacing process-wide globals.
// Inputs/Outputs: Environment + CLI overrides in, `Config`/`Project` values passed to every action.
// Invariants: Built once per process; nothing below reads the environment on its own.
// Gotchas: The vendor path may be a symlink chain; `vendor_dir` resolves it.

use anyhow::{Context, bail};
use directories::BaseDirs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::pkg::cache::{Cache, SystemLock};
use crate::pkg::fsutil;
use crate::pkg::importer::Importers;
use crate::pkg::install::DEFAULT_WORKERS;

pub const MANIFEST_NAME: &str = "vendr.toml";
pub const LOCK_NAME: &str = "vendr.lock";
pub const VENDOR_NAME: &str = "vendor";

#[derive(Debug, Clone)]
pub struct Config {
    /// Holds the shared cache and the system lock file.
    pub home: PathBuf,
    pub manifest_name: String,
    pub lock_name: String,
    pub vendor_name: String,
    pub workers: usize,
    /// `None` waits for the system lock indefinitely.
    pub lock_timeout: Option<Duration>,
    pub resolve_dev: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            home: default_home(),
            manifest_name: MANIFEST_NAME.to_string(),
            lock_name: LOCK_NAME.to_string(),
            vendor_name: VENDOR_NAME.to_string(),
            workers: DEFAULT_WORKERS,
            lock_timeout: None,
            resolve_dev: true,
        }
    }
}

impl Config {
    /// Defaults overlaid with `VENDR_HOME`, `VENDR_MANIFEST`, `VENDR_JOBS`
    /// and `VENDR_LOCK_TIMEOUT`.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(get: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |k: &str| get(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(home) = get("VENDR_HOME") {
            cfg.home = PathBuf::from(home);
        }
        if let Some(name) = get("VENDR_MANIFEST") {
            cfg.manifest_name = name;
        }
        if let Some(jobs) = get("VENDR_JOBS") {
            cfg.workers = parse_jobs(&jobs).context("VENDR_JOBS")?;
        }
        if let Some(secs) = get("VENDR_LOCK_TIMEOUT") {
            cfg.lock_timeout = Some(parse_timeout(&secs).context("VENDR_LOCK_TIMEOUT")?);
        }
        Ok(cfg)
    }

    pub fn cache_root(&self) -> PathBuf {
        self.home.join("cache")
    }

    pub fn cache(&self) -> Cache {
        Cache::new(self.cache_root())
    }

    pub fn importers(&self) -> Importers {
        Importers::standard(&self.manifest_name)
    }

    pub fn system_lock(&self) -> anyhow::Result<SystemLock> {
        SystemLock::acquire(&self.home, self.lock_timeout)
    }
}

/// `<home dir>/.vendr`, or `./.vendr` when no home directory is known.
pub fn default_home() -> PathBuf {
    match BaseDirs::new() {
        Some(b) => b.home_dir().join(".vendr"),
        None => PathBuf::from(".vendr"),
    }
}

pub fn parse_jobs(s: &str) -> anyhow::Result<usize> {
    let n: usize = s
        .trim()
        .parse()
        .with_context(|| format!("invalid worker count `{}`", s))?;
    Ok(n.max(1))
}

/// Whole or fractional seconds.
pub fn parse_timeout(s: &str) -> anyhow::Result<Duration> {
    let secs: f64 = s
        .trim()
        .parse()
        .with_context(|| format!("invalid timeout `{}`", s))?;
    match Duration::try_from_secs_f64(secs) {
        Ok(d) => Ok(d),
        Err(_) => bail!("invalid timeout `{}`", s),
    }
}

/// A project directory and the file names it uses.
#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    manifest_name: String,
    lock_name: String,
    vendor_name: String,
}

impl Project {
    pub fn at(root: impl Into<PathBuf>, cfg: &Config) -> Self {
        Self {
            root: root.into(),
            manifest_name: cfg.manifest_name.clone(),
            lock_name: cfg.lock_name.clone(),
            vendor_name: cfg.vendor_name.clone(),
        }
    }

    /// Walks up from `cwd` to the directory holding the manifest.
    pub fn discover(cwd: &Path, cfg: &Config) -> anyhow::Result<Self> {
        let root = fsutil::find_upwards(cwd, &cfg.manifest_name).with_context(|| {
            format!(
                "{} not found in {} or its parents (run `vendr init` first)",
                cfg.manifest_name,
                cwd.display()
            )
        })?;
        Ok(Self::at(root, cfg))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(&self.manifest_name)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(&self.lock_name)
    }

    pub fn vendor_dir(&self) -> PathBuf {
        fsutil::resolve_links(&self.root.join(&self.vendor_name))
    }
}
