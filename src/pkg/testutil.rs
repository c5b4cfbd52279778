//! In-memory VCS back-end for resolver and installer tests.

use anyhow::{Context, bail};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::pkg::cache::Cache;
use crate::pkg::importer::Importers;
use crate::pkg::vcs::{Backend, Vcs, VcsType, detect, normalize_url};

#[derive(Debug, Clone, Default)]
pub struct MemoryRepo {
    commits: Vec<(String, BTreeMap<String, String>)>,
    tags: BTreeMap<String, String>,
    branches: BTreeMap<String, String>,
    default_branch: String,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self {
            default_branch: "main".to_string(),
            ..Default::default()
        }
    }

    /// Adds a commit and moves the default branch to it.
    pub fn commit(mut self, id: &str, files: &[(&str, &str)]) -> Self {
        let files = files
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.commits.push((id.to_string(), files));
        self.branches
            .insert(self.default_branch.clone(), id.to_string());
        self
    }

    /// Tags the latest commit.
    pub fn tag(mut self, name: &str) -> Self {
        if let Some((id, _)) = self.commits.last() {
            self.tags.insert(name.to_string(), id.clone());
        }
        self
    }

    /// Points a branch at the latest commit.
    pub fn branch(mut self, name: &str) -> Self {
        if let Some((id, _)) = self.commits.last() {
            self.branches.insert(name.to_string(), id.clone());
        }
        self
    }

    fn resolve(&self, reference: &str) -> Option<&(String, BTreeMap<String, String>)> {
        let id = self
            .tags
            .get(reference)
            .or_else(|| self.branches.get(reference))
            .cloned()
            .unwrap_or_else(|| reference.to_string());
        self.commits.iter().find(|(c, _)| *c == id)
    }
}

/// Remote repositories live in `remotes`; every working copy keeps the
/// snapshot it last fetched, so new tags need an `update` to appear.
#[derive(Default)]
pub struct MemoryVcs {
    remotes: Mutex<HashMap<String, MemoryRepo>>,
    fetched: Mutex<HashMap<PathBuf, MemoryRepo>>,
    active: Mutex<HashMap<PathBuf, usize>>,
    pub max_concurrent_per_copy: AtomicUsize,
    pub clones: AtomicUsize,
    pub updates: AtomicUsize,
    pub checkouts: Mutex<Vec<(PathBuf, String)>>,
    pub checkout_delay: Duration,
}

impl MemoryVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            checkout_delay: delay,
            ..Self::default()
        }
    }

    pub fn publish(&self, url: &str, repo: MemoryRepo) {
        self.remotes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(normalize_url(url), repo);
    }

    fn snapshot(&self, wc: &Path) -> anyhow::Result<MemoryRepo> {
        self.fetched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(wc)
            .cloned()
            .with_context(|| format!("{} is not a working copy", wc.display()))
    }

    fn remote_for(&self, wc: &Path) -> anyhow::Result<MemoryRepo> {
        let url = fs::read_to_string(wc.join(".git").join("URL"))?;
        self.remotes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&normalize_url(&url))
            .cloned()
            .with_context(|| format!("remote {} vanished", url))
    }

    fn write_tree(wc: &Path, id: &str, files: &BTreeMap<String, String>) -> anyhow::Result<()> {
        for ent in fs::read_dir(wc)? {
            let p = ent?.path();
            if p.file_name().and_then(|s| s.to_str()) == Some(".git") {
                continue;
            }
            if p.is_dir() {
                fs::remove_dir_all(&p)?;
            } else {
                fs::remove_file(&p)?;
            }
        }
        for (rel, body) in files {
            let p = wc.join(rel);
            if let Some(parent) = p.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&p, body)?;
        }
        fs::write(wc.join(".git").join("HEAD"), id)?;
        Ok(())
    }
}

impl Backend for MemoryVcs {
    fn kind(&self) -> VcsType {
        VcsType::Git
    }

    fn clone_repo(&self, url: &str, wc: &Path) -> anyhow::Result<()> {
        let repo = self
            .remotes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&normalize_url(url))
            .cloned();
        let Some(repo) = repo else {
            bail!("repository {} not found", url);
        };
        self.clones.fetch_add(1, Ordering::SeqCst);
        fs::create_dir_all(wc.join(".git"))?;
        fs::write(wc.join(".git").join("URL"), url)?;
        let (id, files) = repo
            .resolve(&repo.default_branch)
            .cloned()
            .context("empty repository")?;
        Self::write_tree(wc, &id, &files)?;
        self.fetched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(wc.to_path_buf(), repo);
        Ok(())
    }

    fn update(&self, wc: &Path) -> anyhow::Result<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let repo = self.remote_for(wc)?;
        self.fetched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(wc.to_path_buf(), repo);
        Ok(())
    }

    fn checkout(&self, wc: &Path, reference: &str) -> anyhow::Result<()> {
        let now = {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            let n = active.entry(wc.to_path_buf()).or_insert(0);
            *n += 1;
            *n
        };
        self.max_concurrent_per_copy.fetch_max(now, Ordering::SeqCst);
        thread::sleep(self.checkout_delay);

        let result = self.snapshot(wc).and_then(|repo| {
            let (id, files) = repo
                .resolve(reference)
                .cloned()
                .with_context(|| format!("unknown reference {}", reference))?;
            Self::write_tree(wc, &id, &files)
        });
        self.checkouts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((wc.to_path_buf(), reference.to_string()));

        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(n) = active.get_mut(wc) {
            *n -= 1;
        }
        result
    }

    fn current_revision(&self, wc: &Path) -> anyhow::Result<String> {
        Ok(fs::read_to_string(wc.join(".git").join("HEAD"))?)
    }

    fn tags(&self, wc: &Path) -> anyhow::Result<Vec<String>> {
        Ok(self.snapshot(wc)?.tags.keys().cloned().collect())
    }

    fn branches(&self, wc: &Path) -> anyhow::Result<Vec<String>> {
        Ok(self.snapshot(wc)?.branches.keys().cloned().collect())
    }

    fn is_reference(&self, wc: &Path, reference: &str) -> bool {
        self.snapshot(wc)
            .map(|r| r.resolve(reference).is_some())
            .unwrap_or(false)
    }

    fn default_branch(&self, wc: &Path) -> anyhow::Result<String> {
        Ok(self.snapshot(wc)?.default_branch)
    }
}

/// Everything a resolver/installer test needs, rooted in a temp dir.
pub struct Fixture {
    pub tmp: tempfile::TempDir,
    pub backend: Arc<MemoryVcs>,
    pub vcs: Vcs,
    pub cache: Cache,
    pub importers: Importers,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_backend(MemoryVcs::new())
    }

    pub fn with_backend(backend: MemoryVcs) -> Self {
        let tmp = tempfile::tempdir().expect("tempdir");
        let backend = Arc::new(backend);
        let vcs = memory_vcs(&backend);
        let cache = Cache::new(tmp.path().join("cache"));
        cache.setup().expect("cache setup");
        Self {
            tmp,
            backend,
            vcs,
            cache,
            importers: Importers::standard("vendr.toml"),
        }
    }

    pub fn vendor(&self) -> PathBuf {
        self.tmp.path().join("vendor")
    }
}

/// Default detectors with every fetch served by `backend`.
pub fn memory_vcs(backend: &Arc<MemoryVcs>) -> Vcs {
    let detectors = detect::default_detectors().expect("detectors");
    Vcs::with_detectors(detectors).with_backend(backend.clone())
}

/// Manifest text declaring `deps` as `(package, version)` imports.
pub fn manifest_text(package: &str, deps: &[(&str, &str)]) -> String {
    let mut out = format!("package = {:?}\n", package);
    for (name, version) in deps {
        out.push_str("\n[[import]]\n");
        out.push_str(&format!("package = {:?}\n", name));
        if !version.is_empty() {
            out.push_str(&format!("version = {:?}\n", version));
        }
    }
    out
}
